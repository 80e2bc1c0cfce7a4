use bytes::Bytes;

use super::CardCommand;
use crate::apdu::Command;
use crate::constants::{CLA_ISO7816, ins};
use crate::types::ApplicationInfo;
use crate::Result;

/// SELECT the phonon applet by AID
#[derive(Debug, Clone)]
pub struct SelectCommand {
    aid: Bytes,
}

impl SelectCommand {
    pub fn with_aid(aid: impl Into<Bytes>) -> Self {
        Self { aid: aid.into() }
    }
}

impl CardCommand for SelectCommand {
    type Output = ApplicationInfo;
    const SECURE: bool = false;

    fn to_command(&self) -> Result<Command> {
        Ok(Command::new(CLA_ISO7816, ins::SELECT, 0x04, 0x00)
            .with_data(self.aid.clone())?
            .with_le(0))
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        ApplicationInfo::parse(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PHONON_AID;

    #[test]
    fn test_select_apdu() {
        let command = SelectCommand::with_aid(PHONON_AID).to_command().unwrap();
        assert_eq!(
            hex::encode(command.to_bytes()),
            "00a4040008a00000082000030100"
        );
    }
}
