use bytes::Bytes;

use super::CardCommand;
use crate::apdu::Command;
use crate::constants::{CLA_GP, ins};
use crate::crypto::Challenge;
use crate::{Error, Result};

/// MUTUALLY AUTHENTICATE command, the first message over a fresh channel
#[derive(Debug, Clone)]
pub struct MutuallyAuthenticateCommand {
    challenge: Challenge,
}

impl MutuallyAuthenticateCommand {
    /// Create a MUTUALLY AUTHENTICATE command with challenge
    pub const fn with_challenge(challenge: Challenge) -> Self {
        Self { challenge }
    }
}

impl CardCommand for MutuallyAuthenticateCommand {
    type Output = Challenge;

    fn to_command(&self) -> Result<Command> {
        Ok(Command::new(CLA_GP, ins::MUTUALLY_AUTHENTICATE, 0x00, 0x00)
            .with_data(self.challenge.to_vec())?
            .with_le(0))
    }

    /// The card answers with its own 32 byte challenge. Decrypting it at all
    /// proves it holds the session keys.
    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        if data.len() != 32 {
            return Err(Error::MutualAuthenticationFailed);
        }
        Ok(Challenge::clone_from_slice(&data))
    }
}
