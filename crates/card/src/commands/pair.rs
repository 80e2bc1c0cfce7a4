use bytes::{BufMut, Bytes, BytesMut};
use k256::PublicKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use tracing::trace;

use super::CardCommand;
use crate::apdu::{Command, HexSlice};
use crate::cert::CardCertificate;
use crate::constants::{CLA_GP, ins};
use crate::crypto::{Cryptogram, Salt};
use crate::status::{PairingError, PairingStep, StatusWord};
use crate::{Error, Result};

const SALT_LENGTH: usize = 32;
/// Shortest DER ECDSA signature
const MIN_SIGNATURE_LENGTH: usize = 8;

/// PAIR step 1: send our salt and pairing key, receive the card's salt,
/// certificate and signature over the shared secret.
#[derive(Debug, Clone)]
pub struct PairStep1Command {
    client_salt: Salt,
    public_key: PublicKey,
}

impl PairStep1Command {
    pub const fn new(client_salt: Salt, public_key: PublicKey) -> Self {
        Self {
            client_salt,
            public_key,
        }
    }
}

/// Card answer to [`PairStep1Command`]
#[derive(Debug, Clone)]
pub struct PairStep1Response {
    pub card_salt: Salt,
    pub certificate: CardCertificate,
    /// DER signature over `sha256(client_salt || ecdh)`
    pub signature: Bytes,
}

impl PairStep1Response {
    /// `card_salt(32) || cert(cert[1]) || der_sig`
    pub fn parse(data: &[u8]) -> Result<Self> {
        let cert_len = *data.get(SALT_LENGTH + 1).ok_or(Error::InvalidResponseLength {
            expected: SALT_LENGTH + 2,
            actual: data.len(),
        })? as usize;
        let cert_end = SALT_LENGTH + cert_len;
        if data.len() < cert_end + MIN_SIGNATURE_LENGTH {
            return Err(Error::InvalidResponseLength {
                expected: cert_end + MIN_SIGNATURE_LENGTH,
                actual: data.len(),
            });
        }

        trace!(cert = %HexSlice(&data[SALT_LENGTH..cert_end]), "pairing certificate");
        Ok(Self {
            card_salt: Salt::clone_from_slice(&data[..SALT_LENGTH]),
            certificate: CardCertificate::parse(&data[SALT_LENGTH..cert_end])?,
            signature: Bytes::copy_from_slice(&data[cert_end..]),
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_slice(&self.card_salt);
        buf.put(self.certificate.serialize());
        buf.put_slice(&self.signature);
        buf.freeze()
    }
}

impl CardCommand for PairStep1Command {
    type Output = PairStep1Response;
    const SECURE: bool = false;

    fn to_command(&self) -> Result<Command> {
        let mut data = BytesMut::with_capacity(SALT_LENGTH + 65);
        data.put_slice(&self.client_salt);
        data.put_slice(self.public_key.to_encoded_point(false).as_bytes());
        Ok(Command::new(CLA_GP, ins::PAIR, 0x00, 0x00)
            .with_data(data.freeze())?
            .with_le(0))
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        PairStep1Response::parse(&data)
    }

    fn map_status(&self, status: StatusWord) -> Error {
        PairingError::from_status(PairingStep::First, status.value()).into()
    }
}

/// PAIR step 2: prove knowledge of the shared secret
#[derive(Debug, Clone)]
pub struct PairStep2Command {
    cryptogram: Cryptogram,
}

impl PairStep2Command {
    pub const fn with_cryptogram(cryptogram: Cryptogram) -> Self {
        Self { cryptogram }
    }
}

/// Assigned slot and the salt for the pairing key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairStep2Response {
    pub index: u8,
    pub salt: Salt,
}

impl CardCommand for PairStep2Command {
    type Output = PairStep2Response;
    const SECURE: bool = false;

    fn to_command(&self) -> Result<Command> {
        Ok(Command::new(CLA_GP, ins::PAIR, 0x01, 0x00)
            .with_data(self.cryptogram.to_vec())?
            .with_le(0))
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        match data.split_first() {
            Some((&index, salt)) if salt.len() == SALT_LENGTH => Ok(PairStep2Response {
                index,
                salt: Salt::clone_from_slice(salt),
            }),
            _ => Err(Error::InvalidResponseLength {
                expected: 1 + SALT_LENGTH,
                actual: data.len(),
            }),
        }
    }

    fn map_status(&self, status: StatusWord) -> Error {
        PairingError::from_status(PairingStep::Second, status.value()).into()
    }
}

#[cfg(test)]
mod tests {
    use k256::SecretKey;
    use k256::ecdsa::{Signature, SigningKey, signature::Signer};

    use super::*;
    use crate::cert::{MOCK_CA_PRIVATE_KEY, SignerError};

    fn certificate() -> Bytes {
        let ca = SigningKey::from_slice(&MOCK_CA_PRIVATE_KEY).unwrap();
        let signer = move |preimage: &[u8]| -> std::result::Result<Vec<u8>, SignerError> {
            let signature: Signature = ca.sign(preimage);
            Ok(signature.to_der().as_bytes().to_vec())
        };
        let card = SecretKey::from_slice(&[0x66; 32]).unwrap().public_key();
        CardCertificate::create(&card, &signer).unwrap()
    }

    #[test]
    fn test_step1_response_layout() {
        let cert = certificate();
        let mut raw = BytesMut::new();
        raw.put_slice(&[0xAA; 32]);
        raw.put_slice(&cert);
        raw.put_slice(&[0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01]);

        let parsed = PairStep1Response::parse(&raw).unwrap();
        assert_eq!(parsed.card_salt.as_slice(), &[0xAA; 32]);
        assert_eq!(parsed.certificate.serialize(), cert);
        assert_eq!(parsed.signature.len(), 8);
        assert_eq!(parsed.to_bytes(), raw.freeze());
    }

    #[test]
    fn test_step1_response_too_short() {
        let cert = certificate();
        let mut raw = BytesMut::new();
        raw.put_slice(&[0xAA; 32]);
        raw.put_slice(&cert);
        raw.put_slice(&[0x30, 0x06]);
        assert!(matches!(
            PairStep1Response::parse(&raw),
            Err(Error::InvalidResponseLength { .. })
        ));
        assert!(PairStep1Response::parse(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_step_specific_status() {
        let salt = Salt::default();
        let key = SecretKey::from_slice(&[0x01; 32]).unwrap().public_key();
        let step1 = PairStep1Command::new(salt, key);
        let step2 = PairStep2Command::with_cryptogram(Cryptogram::default());

        assert!(matches!(
            step1.map_status(StatusWord::from(0x6982u16)),
            Error::Pairing(PairingError::UnableToGenerateSecret)
        ));
        assert!(matches!(
            step2.map_status(StatusWord::from(0x6982u16)),
            Error::Pairing(PairingError::CryptogramVerificationFailed)
        ));
        assert!(matches!(
            step2.map_status(StatusWord::from(0x6A84u16)),
            Error::Pairing(PairingError::NoPairingSlots)
        ));
    }

    #[test]
    fn test_step2_response() {
        let step2 = PairStep2Command::with_cryptogram(Cryptogram::default());
        let mut raw = vec![3u8];
        raw.extend_from_slice(&[0x5A; 32]);
        let parsed = step2.parse_response(Bytes::from(raw)).unwrap();
        assert_eq!(parsed.index, 3);
        assert!(step2.parse_response(Bytes::from_static(&[3, 1, 2])).is_err());
    }
}
