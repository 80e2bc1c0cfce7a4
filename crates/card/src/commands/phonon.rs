use bytes::{BufMut, Bytes, BytesMut};
use k256::{PublicKey, SecretKey};
use tracing::debug;

use super::CardCommand;
use crate::apdu::Command;
use crate::constants::{CLA_GP, CLA_ISO7816, ins, tags};
use crate::tlv::{self, TlvCollection};
use crate::types::{KeyIndex, Phonon, PhononFilter};
use crate::{Error, Result};

fn key_index_record(key_index: KeyIndex) -> Result<Bytes> {
    Ok(tlv::encode(tags::KEY_INDEX, &key_index.to_bytes())?)
}

/// CREATE_PHONON: mint a fresh key in the next free slot
#[derive(Debug, Clone, Copy, Default)]
pub struct CreatePhononCommand;

impl CardCommand for CreatePhononCommand {
    type Output = (KeyIndex, PublicKey);

    fn to_command(&self) -> Result<Command> {
        Command::new(CLA_ISO7816, ins::CREATE_PHONON, 0x00, 0x00).with_data(vec![0x00])
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        let records = TlvCollection::parse(&data, &[tags::PHONON_KEY_COLLECTION])?;
        let key_index = KeyIndex::from_bytes(records.find_first(tags::KEY_INDEX)?)?;
        let public_key = PublicKey::from_sec1_bytes(records.find_first(tags::PHONON_PUB_KEY)?)?;
        debug!(%key_index, "phonon created");
        Ok((key_index, public_key))
    }
}

/// SET_DESCRIPTOR: attach value and currency to a created phonon
#[derive(Debug, Clone)]
pub struct SetDescriptorCommand {
    key_index: KeyIndex,
    phonon: Phonon,
}

impl SetDescriptorCommand {
    pub const fn new(key_index: KeyIndex, phonon: Phonon) -> Self {
        Self { key_index, phonon }
    }
}

impl CardCommand for SetDescriptorCommand {
    type Output = ();

    fn to_command(&self) -> Result<Command> {
        let mut data = BytesMut::new();
        data.put(key_index_record(self.key_index)?);
        data.put(self.phonon.encode_descriptor()?);
        Command::new(CLA_GP, ins::SET_DESCRIPTOR, 0x00, 0x00).with_data(data.freeze())
    }

    fn parse_response(&self, _data: Bytes) -> Result<Self::Output> {
        Ok(())
    }
}

/// LIST_PHONONS. Long listings arrive over several frames, each one a
/// separate phonon collection record.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListPhononsCommand {
    filter: PhononFilter,
}

impl ListPhononsCommand {
    pub const fn with_filter(filter: PhononFilter) -> Self {
        Self { filter }
    }
}

impl CardCommand for ListPhononsCommand {
    type Output = Vec<Phonon>;

    fn to_command(&self) -> Result<Command> {
        Command::new(CLA_ISO7816, ins::LIST_PHONONS, 0x00, self.filter.p2())
            .with_data(self.filter.encode()?)
    }

    fn continuation(&self) -> Option<Command> {
        Some(Command::new(CLA_ISO7816, ins::LIST_PHONONS, 0x01, 0x00))
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        let records = TlvCollection::parse(&data, &[tags::PHONON_COLLECTION])?;
        records
            .get_all(tags::PHONON_DESCRIPTOR)
            .iter()
            .map(|descriptor| Phonon::decode(descriptor))
            .collect()
    }
}

/// GET_PHONON_PUB_KEY
#[derive(Debug, Clone, Copy)]
pub struct GetPhononPubKeyCommand {
    key_index: KeyIndex,
}

impl GetPhononPubKeyCommand {
    pub const fn with_key_index(key_index: KeyIndex) -> Self {
        Self { key_index }
    }
}

impl CardCommand for GetPhononPubKeyCommand {
    /// Raw key bytes. Native phonons carry a hash rather than a curve point.
    type Output = Bytes;

    fn to_command(&self) -> Result<Command> {
        Command::new(CLA_ISO7816, ins::GET_PHONON_PUB_KEY, 0x00, 0x00)
            .with_data(key_index_record(self.key_index)?)
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        let records = TlvCollection::parse(
            &data,
            &[tags::TRANSFER_PHONON_PACKET, tags::PRIVATE_DESCRIPTION],
        )?;
        Ok(records.find_first(tags::PHONON_PUB_KEY)?.clone())
    }
}

/// DESTROY_PHONON: delete a phonon and hand out its private key
#[derive(Debug, Clone, Copy)]
pub struct DestroyPhononCommand {
    key_index: KeyIndex,
}

impl DestroyPhononCommand {
    pub const fn with_key_index(key_index: KeyIndex) -> Self {
        Self { key_index }
    }
}

impl CardCommand for DestroyPhononCommand {
    type Output = SecretKey;

    fn to_command(&self) -> Result<Command> {
        Command::new(CLA_ISO7816, ins::DESTROY_PHONON, 0x00, 0x00)
            .with_data(key_index_record(self.key_index)?)
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        let records = TlvCollection::parse(&data, &[])?;
        SecretKey::from_slice(records.find_first(tags::PHONON_PRIV_KEY)?)
            .map_err(|_| Error::InvalidData("invalid phonon private key"))
    }
}
