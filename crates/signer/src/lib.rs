//! Certificate authority signers for Phonon cards.
//!
//! A card only pairs with terminals and other cards once its identity key is
//! certified by a CA the peer trusts. [`LocalCaSigner`] holds the CA key in
//! memory and plugs into [`CardCertificate::create`] through the
//! [`CertificateSigner`] trait.

use std::fmt;

use bytes::Bytes;
use k256::PublicKey;
use k256::ecdsa::{Signature, SigningKey, signature::Signer};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use phonon_card::{CertificateSigner, SignerError};
use phonon_card::cert::{CardCertificate, CertificateError, MOCK_CA_PRIVATE_KEY};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// Private key of the demo CA. Development cards ship with certificates it
/// signed, so it is only fit for test fleets.
const DEMO_CA_PRIVATE_KEY: [u8; 32] = [
    0x03, 0x8D, 0x01, 0x08, 0x90, 0x00, 0x00, 0x00, 0x10, 0xAA, 0x82, 0x07, 0x09, 0x80, 0x00,
    0x00, 0x01, 0xBB, 0x03, 0x06, 0x90, 0x08, 0x35, 0xF9, 0x10, 0xCC, 0x04, 0x85, 0x09, 0x00,
    0x00, 0x91,
];

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid CA private key")]
    InvalidKey(#[from] k256::ecdsa::Error),

    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A CA whose signing key lives in process memory
#[derive(Clone)]
pub struct LocalCaSigner {
    key: SigningKey,
}

impl fmt::Debug for LocalCaSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCaSigner")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

impl LocalCaSigner {
    /// The demo CA, matching [`phonon_card::cert::DEMO_CA_PUBLIC_KEY`].
    pub fn demo() -> Result<Self> {
        Self::from_bytes(&DEMO_CA_PRIVATE_KEY)
    }

    /// The CA behind mock card certificates, matching
    /// [`phonon_card::cert::MOCK_CA_PUBLIC_KEY`].
    pub fn mock() -> Result<Self> {
        Self::from_bytes(&MOCK_CA_PRIVATE_KEY)
    }

    /// A fresh CA with a random key
    pub fn random() -> Self {
        Self {
            key: SigningKey::random(&mut rand_v8::thread_rng()),
        }
    }

    /// Load a CA from a 32 byte secp256k1 scalar.
    pub fn from_bytes(private_key: &[u8]) -> Result<Self> {
        Ok(Self {
            key: SigningKey::from_slice(private_key)?,
        })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(self.key.verifying_key())
    }

    /// Uncompressed SEC1 encoding, the form cards and terminals are
    /// configured with
    pub fn public_key_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.key.verifying_key().to_encoded_point(false).as_bytes())
    }

    pub fn private_key_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.key.to_bytes().to_vec())
    }

    /// Mint a certificate for a card identity key.
    pub fn certify(&self, card_public_key: &PublicKey) -> Result<Bytes> {
        let certificate = CardCertificate::create(card_public_key, self)?;
        debug!(len = certificate.len(), "certificate minted");
        Ok(certificate)
    }
}

impl CertificateSigner for LocalCaSigner {
    fn sign(&self, preimage: &[u8]) -> std::result::Result<Vec<u8>, SignerError> {
        let signature: Signature = self.key.try_sign(preimage).map_err(SignerError::new)?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::SecretKey;
    use phonon_card::cert::{DEMO_CA_PUBLIC_KEY, MOCK_CA_PUBLIC_KEY};

    #[test]
    fn test_known_ca_keys() {
        assert_eq!(
            LocalCaSigner::demo().unwrap().public_key_bytes().as_ref(),
            &DEMO_CA_PUBLIC_KEY[..]
        );
        assert_eq!(
            LocalCaSigner::mock().unwrap().public_key_bytes().as_ref(),
            &MOCK_CA_PUBLIC_KEY[..]
        );
    }

    #[test]
    fn test_certify_validates() {
        let ca = LocalCaSigner::random();
        let card = SecretKey::random(&mut rand_v8::thread_rng()).public_key();

        let raw = ca.certify(&card).unwrap();
        let certificate = CardCertificate::parse(&raw).unwrap();
        certificate.validate(&ca.public_key_bytes()).unwrap();
        assert_eq!(certificate.public_key().unwrap(), card);

        let other = LocalCaSigner::random();
        assert!(certificate.validate(&other.public_key_bytes()).is_err());
    }

    #[test]
    fn test_private_key_round_trip() {
        let ca = LocalCaSigner::random();
        let restored = LocalCaSigner::from_bytes(&ca.private_key_bytes()).unwrap();
        assert_eq!(restored.public_key(), ca.public_key());
    }

    #[test]
    fn test_rejects_invalid_scalar() {
        assert!(matches!(
            LocalCaSigner::from_bytes(&[0u8; 32]),
            Err(Error::InvalidKey(_))
        ));
        assert!(LocalCaSigner::from_bytes(&hex::decode("0102").unwrap()).is_err());
    }
}
