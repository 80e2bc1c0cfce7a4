use bytes::Bytes;

use super::CardCommand;
use crate::apdu::Command;
use crate::constants::{CLA_GP, PAIRING_SLOTS, ins};
use crate::{Error, Result};

/// UNPAIR: free a pairing slot
#[derive(Debug, Clone, Copy)]
pub struct UnpairCommand {
    index: u8,
}

impl UnpairCommand {
    pub fn with_index(index: u8) -> Result<Self> {
        if usize::from(index) >= PAIRING_SLOTS {
            return Err(Error::InvalidData("pairing index out of range"));
        }
        Ok(Self { index })
    }
}

impl CardCommand for UnpairCommand {
    type Output = ();

    fn to_command(&self) -> Result<Command> {
        Ok(Command::new(CLA_GP, ins::UNPAIR, self.index, 0x00))
    }

    fn parse_response(&self, _data: Bytes) -> Result<Self::Output> {
        Ok(())
    }
}
