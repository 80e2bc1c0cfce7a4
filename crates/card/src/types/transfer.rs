use bytes::{BufMut, Bytes, BytesMut};
use k256::SecretKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;

use super::Phonon;
use crate::constants::tags;
use crate::tlv::{self, TlvCollection};
use crate::{Error, Result};

/// A phonon together with its private key, as it moves between cards
#[derive(Debug, Clone)]
pub struct PrivatePhonon {
    pub secret_key: SecretKey,
    pub phonon: Phonon,
}

impl PrivatePhonon {
    /// Encode as a private description record (tag `0x44`).
    pub fn encode(&self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        body.put(tlv::encode(tags::PHONON_PRIV_KEY, &self.secret_key.to_bytes())?);
        body.put(tlv::encode(
            tags::CURVE_TYPE,
            &[u8::from(self.phonon.curve_type)],
        )?);
        body.put(self.phonon.encode_descriptor()?);
        Ok(tlv::encode(tags::PRIVATE_DESCRIPTION, &body)?)
    }

    /// Decode the value of a private description record.
    pub fn decode(description: &[u8]) -> Result<Self> {
        let records = TlvCollection::parse(description, &[])?;
        let secret_key = SecretKey::from_slice(records.find_first(tags::PHONON_PRIV_KEY)?)
            .map_err(|_| Error::InvalidData("invalid phonon private key"))?;

        let mut phonon = Phonon::from_collection(&records)?;
        phonon.key_index = None;
        phonon.pub_key = Some(Bytes::copy_from_slice(
            secret_key.public_key().to_encoded_point(false).as_bytes(),
        ));
        Ok(Self { secret_key, phonon })
    }
}

/// Wrap private descriptions into one transfer packet (tag `0x43`).
pub fn encode_transfer_packet(phonons: &[PrivatePhonon]) -> Result<Bytes> {
    let mut body = BytesMut::new();
    for phonon in phonons {
        body.put(phonon.encode()?);
    }
    Ok(tlv::encode(tags::TRANSFER_PHONON_PACKET, &body)?)
}

/// Unwrap a transfer packet. An empty packet is rejected.
pub fn decode_transfer_packet(data: &[u8]) -> Result<Vec<PrivatePhonon>> {
    let records = TlvCollection::parse(data, &[tags::TRANSFER_PHONON_PACKET])?;
    records
        .find_all(tags::PRIVATE_DESCRIPTION)?
        .iter()
        .map(|description| PrivatePhonon::decode(description))
        .collect()
}
