use bytes::Bytes;
use k256::PublicKey;
use tracing::debug;

use super::CardCommand;
use crate::apdu::Command;
use crate::constants::{CLA_GP, ins, tags};
use crate::crypto::{Challenge, calculate_cryptogram, verify_prehash_der};
use crate::{Error, Result};

/// Public key record plus the uncompressed key
const KEY_RECORD_LENGTH: usize = 67;

/// IDENTIFY_CARD: prove possession of the identity key over a nonce
#[derive(Debug, Clone)]
pub struct IdentifyCardCommand {
    nonce: Challenge,
}

impl IdentifyCardCommand {
    /// Create an IDENTIFY_CARD command with the nominated nonce
    pub const fn with_nonce(nonce: Challenge) -> Self {
        Self { nonce }
    }

    /// Create an IDENTIFY_CARD command with a random 256-bit nonce
    pub fn with_random_nonce() -> Self {
        Self::with_nonce(crate::crypto::random_salt())
    }

    pub const fn nonce(&self) -> &Challenge {
        &self.nonce
    }
}

/// Identity key and its signature over the nonce
#[derive(Debug, Clone)]
pub struct IdentifyCardResponse {
    pub public_key: PublicKey,
    pub signature: Bytes,
}

impl IdentifyCardResponse {
    /// `80 41 || pubkey(65) || der_sig`
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < KEY_RECORD_LENGTH {
            return Err(Error::InvalidResponseLength {
                expected: KEY_RECORD_LENGTH,
                actual: data.len(),
            });
        }
        if data[0] != tags::ECC_PUBLIC_KEY {
            return Err(Error::InvalidData("identify response missing public key"));
        }
        Ok(Self {
            public_key: PublicKey::from_sec1_bytes(&data[2..KEY_RECORD_LENGTH])?,
            signature: Bytes::copy_from_slice(&data[KEY_RECORD_LENGTH..]),
        })
    }

    /// Check the signature over `sha256(nonce)`.
    pub fn verify(&self, nonce: &[u8]) -> Result<()> {
        verify_prehash_der(&self.public_key, &calculate_cryptogram(&[nonce]), &self.signature)
    }
}

impl CardCommand for IdentifyCardCommand {
    type Output = IdentifyCardResponse;
    const SECURE: bool = false;

    fn to_command(&self) -> Result<Command> {
        Command::new(CLA_GP, ins::IDENTIFY_CARD, 0x00, 0x00).with_data(self.nonce.to_vec())
    }

    fn parse_response(&self, data: Bytes) -> Result<Self::Output> {
        let response = IdentifyCardResponse::parse(&data)?;
        response.verify(&self.nonce)?;
        debug!("card identity verified");
        Ok(response)
    }
}
