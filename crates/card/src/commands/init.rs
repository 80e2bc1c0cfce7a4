use bytes::{Bytes, BytesMut};
use k256::PublicKey;
use k256::ecdh::SharedSecret;
use rand::RngCore;
use zeroize::Zeroizing;

use super::CardCommand;
use super::pin::validate_pin;
use crate::apdu::Command;
use crate::constants::{CLA_GP, ins};
use crate::crypto::one_shot_encrypt;
use crate::Result;

pub const PAIRING_TOKEN_LENGTH: usize = 32;

/// INIT: set the PIN and pairing token on a fresh card.
///
/// The payload is one-shot encrypted to the card identity key, so INIT is
/// sent outside the secure channel.
#[derive(Debug, Clone)]
pub struct InitCommand {
    data: Bytes,
}

impl InitCommand {
    /// Encrypt `pin || pairing_token` under the ECDH secret agreed with the
    /// card. `public_key` is our half of that agreement.
    pub fn with_secret(
        public_key: &PublicKey,
        shared_secret: &SharedSecret,
        pin: &str,
        pairing_token: &[u8; PAIRING_TOKEN_LENGTH],
    ) -> Result<Self> {
        validate_pin(pin)?;

        let mut payload = BytesMut::with_capacity(pin.len() + PAIRING_TOKEN_LENGTH + 16);
        payload.extend_from_slice(pin.as_bytes());
        payload.extend_from_slice(pairing_token);

        Ok(Self {
            data: one_shot_encrypt(public_key, shared_secret, &mut payload)?,
        })
    }

    /// Fresh random pairing token
    pub fn random_pairing_token() -> Zeroizing<[u8; PAIRING_TOKEN_LENGTH]> {
        let mut token = Zeroizing::new([0u8; PAIRING_TOKEN_LENGTH]);
        rand::rng().fill_bytes(&mut token[..]);
        token
    }
}

impl CardCommand for InitCommand {
    type Output = ();
    const SECURE: bool = false;

    fn to_command(&self) -> Result<Command> {
        Command::new(CLA_GP, ins::INIT, 0x00, 0x00).with_data(self.data.clone())
    }

    fn parse_response(&self, _data: Bytes) -> Result<Self::Output> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use k256::SecretKey;

    use super::*;
    use crate::crypto::{generate_ecdh_shared_secret, one_shot_decrypt};

    #[test]
    fn test_card_recovers_pin_and_token() {
        let card = SecretKey::from_slice(&[0x44; 32]).unwrap();
        let host = SecretKey::from_slice(&[0x55; 32]).unwrap();
        let secret = generate_ecdh_shared_secret(&host, &card.public_key());
        let token = InitCommand::random_pairing_token();

        let command =
            InitCommand::with_secret(&host.public_key(), &secret, "123456", &token).unwrap();
        let apdu = command.to_command().unwrap();
        assert_eq!(apdu.instruction(), 0xFE);

        let plaintext = one_shot_decrypt(&card, apdu.data()).unwrap();
        assert_eq!(&plaintext[..6], b"123456");
        assert_eq!(&plaintext[6..], token.as_slice());
    }

    #[test]
    fn test_rejects_bad_pin() {
        let card = SecretKey::from_slice(&[0x44; 32]).unwrap();
        let secret = generate_ecdh_shared_secret(&card, &card.public_key());
        let token = [0u8; 32];
        assert!(InitCommand::with_secret(&card.public_key(), &secret, "12", &token).is_err());
    }
}
