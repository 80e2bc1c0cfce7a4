use bytes::{BufMut, Bytes, BytesMut};
use cipher::Iv;
use k256::PublicKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;

use super::CardCommand;
use crate::apdu::Command;
use crate::constants::{CLA_GP, ins};
use crate::crypto::{PhononScp, Salt};
use crate::{Error, Result};

const RESPONSE_LENGTH: usize = 48;

/// OPEN SECURE CHANNEL command
#[derive(Debug, Clone)]
pub struct OpenSecureChannelCommand {
    pairing_index: u8,
    public_key: PublicKey,
}

impl OpenSecureChannelCommand {
    /// Create an OPEN SECURE CHANNEL command for a pairing slot and our
    /// ephemeral key
    pub const fn with_pairing_index_and_pubkey(pairing_index: u8, public_key: PublicKey) -> Self {
        Self {
            pairing_index,
            public_key,
        }
    }
}

/// Session salt and initial IV
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSecureChannelResponse {
    pub salt: Salt,
    pub iv: Iv<PhononScp>,
}

impl OpenSecureChannelResponse {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != RESPONSE_LENGTH {
            return Err(Error::InvalidResponseLength {
                expected: RESPONSE_LENGTH,
                actual: data.len(),
            });
        }
        Ok(Self {
            salt: Salt::clone_from_slice(&data[..32]),
            iv: Iv::<PhononScp>::clone_from_slice(&data[32..]),
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESPONSE_LENGTH);
        buf.put_slice(&self.salt);
        buf.put_slice(&self.iv);
        buf.freeze()
    }
}

impl CardCommand for OpenSecureChannelCommand {
    type Output = OpenSecureChannelResponse;
    const SECURE: bool = false;

    fn to_command(&self) -> Result<Command> {
        Ok(
            Command::new(CLA_GP, ins::OPEN_SECURE_CHANNEL, self.pairing_index, 0x00)
                .with_data(Bytes::copy_from_slice(
                    self.public_key.to_encoded_point(false).as_bytes(),
                ))?
                .with_le(0),
        )
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        OpenSecureChannelResponse::parse(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_length_is_exact() {
        let response = OpenSecureChannelResponse {
            salt: Salt::clone_from_slice(&[1; 32]),
            iv: Iv::<PhononScp>::clone_from_slice(&[2; 16]),
        };
        let raw = response.to_bytes();
        assert_eq!(OpenSecureChannelResponse::parse(&raw).unwrap(), response);
        assert!(OpenSecureChannelResponse::parse(&raw[..47]).is_err());
    }
}
