use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use super::CardCommand;
use crate::apdu::Command;
use crate::constants::{CLA_ISO7816, ins, tags};
use crate::tlv;
use crate::types::KeyIndex;
use crate::{Error, Result};

/// Most indices a single key index list record can hold.
pub const MAX_SEND_COUNT: usize = tlv::MAX_VALUE_LENGTH / 2;

/// SEND_PHONONS: export phonons to the paired counterparty card.
///
/// The card answers with one card-to-card encrypted transfer packet per
/// frame and deletes the phonons it sent.
#[derive(Debug, Clone)]
pub struct SendPhononsCommand {
    indices: Vec<KeyIndex>,
}

impl SendPhononsCommand {
    pub fn with_indices(indices: Vec<KeyIndex>) -> Result<Self> {
        if indices.is_empty() {
            return Err(Error::InvalidData("no phonons to send"));
        }
        if indices.len() > MAX_SEND_COUNT {
            return Err(Error::InvalidData("too many phonons in one send"));
        }
        Ok(Self { indices })
    }

    pub fn indices(&self) -> &[KeyIndex] {
        &self.indices
    }
}

fn continue_send() -> Command {
    Command::new(CLA_ISO7816, ins::SEND_PHONONS, 0x01, 0x00)
}

fn packets_from(frames: Vec<Bytes>) -> Result<Vec<Bytes>> {
    if frames.iter().any(Bytes::is_empty) {
        return Err(Error::InvalidData("empty transfer packet"));
    }
    debug!(packets = frames.len(), "phonons sent");
    Ok(frames)
}

impl CardCommand for SendPhononsCommand {
    /// Encrypted packets, ready for [`ReceivePhononsCommand`]
    type Output = Vec<Bytes>;

    fn to_command(&self) -> Result<Command> {
        let mut list = BytesMut::with_capacity(self.indices.len() * 2);
        for index in &self.indices {
            list.put_u16(index.value());
        }
        // Checked against MAX_SEND_COUNT on construction
        let count = self.indices.len() as u8;
        Command::new(CLA_ISO7816, ins::SEND_PHONONS, 0x00, count)
            .with_data(tlv::encode(tags::KEY_INDEX_LIST, &list)?)
    }

    fn continuation(&self) -> Option<Command> {
        Some(continue_send())
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        self.parse_frames(vec![data])
    }

    fn parse_frames(&self, frames: Vec<Bytes>) -> Result<Self::Output> {
        packets_from(frames)
    }
}

/// Pick up the packets of an interrupted SEND_PHONONS.
///
/// The card keeps the frames it still owes until the applet is selected
/// again, so after the secure channel is reopened the rest can be fetched.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResumeSendCommand;

impl CardCommand for ResumeSendCommand {
    type Output = Vec<Bytes>;

    fn to_command(&self) -> Result<Command> {
        Ok(continue_send())
    }

    fn continuation(&self) -> Option<Command> {
        Some(continue_send())
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        self.parse_frames(vec![data])
    }

    fn parse_frames(&self, frames: Vec<Bytes>) -> Result<Self::Output> {
        packets_from(frames)
    }
}

/// RECEIVE_PHONONS: import a packet produced by the counterparty's
/// SEND_PHONONS.
#[derive(Debug, Clone)]
pub struct ReceivePhononsCommand {
    packet: Bytes,
}

impl ReceivePhononsCommand {
    pub fn with_packet(packet: impl Into<Bytes>) -> Self {
        Self {
            packet: packet.into(),
        }
    }
}

impl CardCommand for ReceivePhononsCommand {
    type Output = ();

    fn to_command(&self) -> Result<Command> {
        Command::new(CLA_ISO7816, ins::RECEIVE_PHONONS, 0x00, 0x00).with_data(self.packet.clone())
    }

    fn parse_response(&self, _data: Bytes) -> Result<Self::Output> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_command_layout() {
        let command = SendPhononsCommand::with_indices(vec![KeyIndex::new(1), KeyIndex::new(0x0102)])
            .unwrap()
            .to_command()
            .unwrap();
        assert_eq!(
            command.to_bytes().as_ref(),
            &hex::decode("003500020642040001 0102".replace(' ', "")).unwrap()[..]
        );
    }

    #[test]
    fn test_send_limits() {
        assert!(SendPhononsCommand::with_indices(vec![]).is_err());
        assert!(SendPhononsCommand::with_indices(vec![KeyIndex::new(0); MAX_SEND_COUNT]).is_ok());
        assert!(
            SendPhononsCommand::with_indices(vec![KeyIndex::new(0); MAX_SEND_COUNT + 1]).is_err()
        );
    }

    #[test]
    fn test_frames_stay_separate() {
        let command = SendPhononsCommand::with_indices(vec![KeyIndex::new(0)]).unwrap();
        let frames = vec![Bytes::from_static(&[0x01; 32]), Bytes::from_static(&[0x02; 48])];
        assert_eq!(command.parse_frames(frames.clone()).unwrap(), frames);
        assert!(command.parse_frames(vec![Bytes::new()]).is_err());
    }

    #[test]
    fn test_resume_asks_for_next_frame() {
        let command = ResumeSendCommand.to_command().unwrap();
        assert_eq!(command.to_bytes().as_ref(), &[0x00, 0x35, 0x01, 0x00]);
        assert_eq!(ResumeSendCommand.continuation().unwrap(), command);
    }
}
