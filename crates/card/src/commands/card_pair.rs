//! Card to card pairing commands.
//!
//! The two cards never talk directly. Each message below is produced by one
//! card, relayed by the terminal(s) and consumed by the other card:
//!
//! ```text
//! sender                      receiver
//! INIT_CARD_PAIRING(cert_r) -> cert_s, salt_s
//!                             CARD_PAIR(cert_s, salt_s) -> cert_r, salt_r, iv, sig_r
//! CARD_PAIR_2(salt_r, iv, sig_r) -> sig_s
//!                             FINALIZE_CARD_PAIR(sig_s)
//! ```
//!
//! The sending card already holds `cert_r` from INIT_CARD_PAIRING, so the
//! terminal checks the certificate in the CARD_PAIR answer against it and
//! forwards only the session part.

use bytes::{BufMut, Bytes, BytesMut};
use cipher::Iv;

use super::CardCommand;
use crate::apdu::Command;
use crate::cert::CardCertificate;
use crate::constants::{CLA_GP, ins, tags};
use crate::crypto::{PhononScp, Salt};
use crate::tlv::{self, TlvCollection};
use crate::{Error, Result};

fn salt_from(records: &TlvCollection) -> Result<Salt> {
    let salt = records.find_first(tags::SALT)?;
    if salt.len() != 32 {
        return Err(Error::InvalidResponseLength {
            expected: 32,
            actual: salt.len(),
        });
    }
    Ok(Salt::clone_from_slice(salt))
}

/// Sender's answer to INIT_CARD_PAIRING
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardPairingInit {
    pub certificate: CardCertificate,
    pub salt: Salt,
}

impl CardPairingInit {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let records = TlvCollection::parse(data, &[])?;
        Ok(Self {
            certificate: CardCertificate::parse(records.find_first(tags::CARD_CERTIFICATE)?)?,
            salt: salt_from(&records)?,
        })
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        buf.put(tlv::encode(tags::CARD_CERTIFICATE, &self.certificate.serialize())?);
        buf.put(tlv::encode(tags::SALT, &self.salt)?);
        Ok(buf.freeze())
    }
}

/// Session material the receiver derived in CARD_PAIR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardPairSession {
    pub salt: Salt,
    pub iv: Iv<PhononScp>,
    /// Receiver's signature over the pairing cryptogram
    pub signature: Bytes,
}

impl CardPairSession {
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::from_records(&TlvCollection::parse(data, &[])?)
    }

    fn from_records(records: &TlvCollection) -> Result<Self> {
        let iv = records.find_first(tags::AES_IV)?;
        if iv.len() != 16 {
            return Err(Error::InvalidResponseLength {
                expected: 16,
                actual: iv.len(),
            });
        }
        Ok(Self {
            salt: salt_from(records)?,
            iv: Iv::<PhononScp>::clone_from_slice(iv),
            signature: records.find_first(tags::ECDSA_SIGNATURE)?.clone(),
        })
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        buf.put(tlv::encode(tags::SALT, &self.salt)?);
        buf.put(tlv::encode(tags::AES_IV, &self.iv)?);
        buf.put(tlv::encode(tags::ECDSA_SIGNATURE, &self.signature)?);
        Ok(buf.freeze())
    }
}

/// Receiver's answer to CARD_PAIR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardPairData {
    /// Receiver's own certificate
    pub certificate: CardCertificate,
    pub session: CardPairSession,
}

impl CardPairData {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let records = TlvCollection::parse(data, &[])?;
        Ok(Self {
            certificate: CardCertificate::parse(records.find_first(tags::CARD_CERTIFICATE)?)?,
            session: CardPairSession::from_records(&records)?,
        })
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        buf.put(tlv::encode(tags::CARD_CERTIFICATE, &self.certificate.serialize())?);
        buf.put(self.session.to_bytes()?);
        Ok(buf.freeze())
    }
}

/// Sender's answer to CARD_PAIR_2: its signature over the same cryptogram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardPair2Data {
    pub signature: Bytes,
}

impl CardPair2Data {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let records = TlvCollection::parse(data, &[])?;
        Ok(Self {
            signature: records.find_first(tags::ECDSA_SIGNATURE)?.clone(),
        })
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(tlv::encode(tags::ECDSA_SIGNATURE, &self.signature)?)
    }
}

/// INIT_CARD_PAIRING, sent to the sending card with the receiver's
/// certificate.
#[derive(Debug, Clone)]
pub struct InitCardPairingCommand {
    receiver_certificate: Bytes,
}

impl InitCardPairingCommand {
    pub fn with_certificate(receiver_certificate: impl Into<Bytes>) -> Self {
        Self {
            receiver_certificate: receiver_certificate.into(),
        }
    }
}

impl CardCommand for InitCardPairingCommand {
    type Output = CardPairingInit;

    fn to_command(&self) -> Result<Command> {
        Command::new(CLA_GP, ins::INIT_CARD_PAIRING, 0x00, 0x00)
            .with_data(tlv::encode(tags::CARD_CERTIFICATE, &self.receiver_certificate)?)
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        CardPairingInit::parse(&data)
    }
}

/// CARD_PAIR, sent to the receiving card
#[derive(Debug, Clone)]
pub struct CardPairCommand {
    init: CardPairingInit,
}

impl CardPairCommand {
    pub const fn with_init(init: CardPairingInit) -> Self {
        Self { init }
    }
}

impl CardCommand for CardPairCommand {
    type Output = CardPairData;

    fn to_command(&self) -> Result<Command> {
        Command::new(CLA_GP, ins::CARD_PAIR, 0x00, 0x00).with_data(self.init.to_bytes()?)
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        CardPairData::parse(&data)
    }
}

/// CARD_PAIR_2, sent back to the sending card
#[derive(Debug, Clone)]
pub struct CardPair2Command {
    session: CardPairSession,
}

impl CardPair2Command {
    pub const fn with_session(session: CardPairSession) -> Self {
        Self { session }
    }
}

impl CardCommand for CardPair2Command {
    type Output = CardPair2Data;

    fn to_command(&self) -> Result<Command> {
        Command::new(CLA_GP, ins::CARD_PAIR_2, 0x00, 0x00).with_data(self.session.to_bytes()?)
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        CardPair2Data::parse(&data)
    }
}

/// FINALIZE_CARD_PAIR, sent to the receiving card
#[derive(Debug, Clone)]
pub struct FinalizeCardPairCommand {
    data: CardPair2Data,
}

impl FinalizeCardPairCommand {
    pub const fn with_data(data: CardPair2Data) -> Self {
        Self { data }
    }
}

impl CardCommand for FinalizeCardPairCommand {
    type Output = ();

    fn to_command(&self) -> Result<Command> {
        Command::new(CLA_GP, ins::FINALIZE_CARD_PAIR, 0x00, 0x00).with_data(self.data.to_bytes()?)
    }

    fn parse_response(&self, _data: Bytes) -> Result<Self::Output> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> CardPairSession {
        CardPairSession {
            salt: Salt::clone_from_slice(&[0x11; 32]),
            iv: Iv::<PhononScp>::clone_from_slice(&[0x22; 16]),
            signature: Bytes::from_static(&[0x30, 0x02, 0x00, 0x00]),
        }
    }

    #[test]
    fn test_pair_session_layout() {
        let session = session();
        let raw = session.to_bytes().unwrap();
        assert_eq!(&raw[..2], &[0x91, 0x20]);
        assert_eq!(&raw[34..36], &[0x92, 0x10]);
        assert_eq!(&raw[52..], &[0x93, 0x04, 0x30, 0x02, 0x00, 0x00]);
        assert_eq!(CardPairSession::parse(&raw).unwrap(), session);
    }

    #[test]
    fn test_pair_data_needs_certificate() {
        let raw = session().to_bytes().unwrap();
        assert!(matches!(CardPairData::parse(&raw), Err(Error::Tlv(_))));
    }

    #[test]
    fn test_pair_2_forwards_session_only() {
        let command = CardPair2Command::with_session(session()).to_command().unwrap();
        assert_eq!(command.data(), &session().to_bytes().unwrap());
    }

    #[test]
    fn test_short_salt_rejected() {
        let mut raw = BytesMut::new();
        raw.put(tlv::encode(tags::SALT, &[0x11; 31]).unwrap());
        raw.put(tlv::encode(tags::AES_IV, &[0x22; 16]).unwrap());
        raw.put(tlv::encode(tags::ECDSA_SIGNATURE, &[0x30]).unwrap());
        assert!(matches!(
            CardPairSession::parse(&raw),
            Err(Error::InvalidResponseLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn test_missing_signature() {
        assert!(matches!(CardPair2Data::parse(&[]), Err(Error::Tlv(_))));
    }

    #[test]
    fn test_command_headers() {
        let finalize = FinalizeCardPairCommand::with_data(CardPair2Data {
            signature: Bytes::from_static(&[0xAA]),
        })
        .to_command()
        .unwrap();
        assert_eq!(finalize.to_bytes().as_ref(), &[0x80, 0x53, 0x00, 0x00, 0x03, 0x93, 0x01, 0xAA]);
    }
}
