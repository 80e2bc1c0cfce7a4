use bytes::Bytes;

use super::CardCommand;
use crate::apdu::Command;
use crate::constants::{CLA_GP, ins};
use crate::types::AvailableMemory;
use crate::Result;

/// GET_AVAILABLE_MEMORY, a diagnostic readout
#[derive(Debug, Clone, Copy, Default)]
pub struct GetAvailableMemoryCommand;

impl CardCommand for GetAvailableMemoryCommand {
    type Output = AvailableMemory;
    const SECURE: bool = false;

    fn to_command(&self) -> Result<Command> {
        Ok(Command::new(CLA_GP, ins::GET_AVAILABLE_MEMORY, 0x00, 0x00).with_le(0))
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        AvailableMemory::parse(&data)
    }
}
