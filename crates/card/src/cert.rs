//! Card certificates.
//!
//! A certificate binds a card's identity key to a CA. The layout is fixed:
//!
//! ```text
//! cert_type(1) cert_len(1) perm_type(1) perm_len(1) permissions(perm_len)
//! pubkey_type(1) pubkey_len(1) pubkey(pubkey_len) signature(DER)
//! ```
//!
//! `cert_len` is the length of the whole certificate including the signature.
//! The CA signs SHA-256 over everything after the first two bytes, excluding
//! the signature.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use k256::{PublicKey, elliptic_curve::sec1::ToEncodedPoint};
use thiserror::Error;
use tracing::{debug, warn};

use crate::apdu::HexSlice;
use crate::crypto::{calculate_cryptogram, verify_prehash_der};

/// Demo CA used by development cards
pub const DEMO_CA_PUBLIC_KEY: [u8; 65] = [
    0x04, 0x5c, 0xfd, 0xf7, 0x7a, 0x00, 0xb4, 0xb6, 0xb4, 0xa5, 0xb8, 0xbb, 0x26, 0xb5, 0x49,
    0x7d, 0xbc, 0x7a, 0x4d, 0x01, 0xcb, 0xef, 0xd7, 0xaa, 0xea, 0xf5, 0xf6, 0xf8, 0xf8, 0x86,
    0x59, 0x76, 0xe7, 0x94, 0x1a, 0xb0, 0xec, 0x16, 0x51, 0x20, 0x9c, 0x44, 0x40, 0x09, 0xfd,
    0x48, 0xd9, 0x25, 0xa1, 0x7d, 0xe5, 0x04, 0x0b, 0xa4, 0x7e, 0xaf, 0x3f, 0x5b, 0x51, 0x72,
    0x0d, 0xd4, 0x0b, 0x2f, 0x9d,
];

/// CA of the alpha card run
pub const ALPHA_CA_PUBLIC_KEY: [u8; 65] = [
    0x04, 0x72, 0xd5, 0x8c, 0x1e, 0xc4, 0x8f, 0x00, 0x72, 0xeb, 0xc3, 0x97, 0x12, 0xa8, 0xec,
    0x74, 0xe5, 0xa4, 0x58, 0x19, 0x31, 0xd6, 0xff, 0xe5, 0x97, 0xb6, 0x45, 0x9b, 0x46, 0x3c,
    0x87, 0xfc, 0xe1, 0x59, 0xb8, 0xe1, 0xae, 0x40, 0xc3, 0x83, 0xcd, 0xae, 0x78, 0xaa, 0xdf,
    0xff, 0xb0, 0x83, 0x91, 0x7c, 0x91, 0x1c, 0x3f, 0x9d, 0x75, 0xa5, 0xf1, 0xa9, 0x24, 0xb6,
    0x27, 0xf1, 0x5d, 0xec, 0x51,
];

/// CA that signs mock card certificates
pub const MOCK_CA_PUBLIC_KEY: [u8; 65] = [
    0x04, 0xa0, 0x48, 0xd2, 0x7a, 0xe0, 0x10, 0xeb, 0x05, 0x82, 0x32, 0x25, 0xd9, 0x8a, 0x00,
    0xf8, 0x19, 0xe7, 0x93, 0x88, 0x08, 0xf4, 0x04, 0x40, 0x0b, 0x4a, 0x8b, 0x66, 0xc3, 0x09,
    0xa7, 0x54, 0x15, 0x80, 0x81, 0xc8, 0x09, 0x3b, 0x49, 0x19, 0xe4, 0x13, 0x69, 0x48, 0x33,
    0xc1, 0x60, 0xe7, 0xcf, 0x3b, 0x77, 0x92, 0xd6, 0x73, 0x8c, 0xce, 0x54, 0x6b, 0xf0, 0x67,
    0x99, 0x7b, 0x18, 0x0f, 0x11,
];

/// Private half of [`MOCK_CA_PUBLIC_KEY`]. Public on purpose: it only ever
/// signs mock cards.
pub const MOCK_CA_PRIVATE_KEY: [u8; 32] = [
    0xab, 0x7e, 0xa6, 0xe2, 0xa6, 0xcf, 0x1c, 0x7f, 0xb4, 0xb8, 0x5b, 0x43, 0xba, 0x47, 0x2a,
    0x85, 0xfd, 0x94, 0xd6, 0x9b, 0x67, 0xfa, 0xce, 0x7a, 0x9a, 0x07, 0xcd, 0xde, 0x16, 0x85,
    0xd8, 0x3b,
];

/// Fixed header of every certificate this crate mints: type `0x30`, a length
/// placeholder, two zero permission bytes and an uncompressed key marker.
const CERT_HEADER: [u8; 8] = [0x30, 0x00, 0x02, 0x02, 0x00, 0x00, 0x80, 0x41];

const PUBLIC_KEY_LENGTH: usize = 65;

/// Error raised by a [`CertificateSigner`]
#[derive(Debug, Error)]
#[error("certificate signer failed: {0}")]
pub struct SignerError(Box<dyn std::error::Error + Send + Sync>);

impl SignerError {
    pub fn new(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(error.into())
    }
}

/// Certificate parsing and minting errors
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate too short: needed {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },

    #[error("certificate header declares a zero length")]
    InvalidHeader,

    #[error("certificate public key must be 65 bytes, got {0}")]
    InvalidPublicKeyLength(usize),

    #[error("certificate of {0} bytes does not fit its one byte length")]
    TooLong(usize),

    #[error(transparent)]
    Signer(#[from] SignerError),
}

/// A certificate failed validation against the CA.
///
/// Bad CA keys, malformed signatures and wrong signers all end up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("certificate signature was invalid")]
pub struct InvalidCertificate;

/// Something that can sign a certificate preimage on behalf of a CA.
///
/// Implementations hash the preimage with SHA-256 themselves and return a DER
/// encoded ECDSA signature. Keys may live in memory, an HSM, or elsewhere.
pub trait CertificateSigner {
    fn sign(&self, preimage: &[u8]) -> Result<Vec<u8>, SignerError>;
}

impl<F> CertificateSigner for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>, SignerError>,
{
    fn sign(&self, preimage: &[u8]) -> Result<Vec<u8>, SignerError> {
        self(preimage)
    }
}

/// Parsed card certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardCertificate {
    cert_type: u8,
    cert_len: u8,
    permission_type: u8,
    permissions: Bytes,
    pubkey_type: u8,
    public_key: Bytes,
    signature: Bytes,
}

impl CardCertificate {
    /// Parse a raw certificate, checking every derived bound.
    ///
    /// Trailing bytes past `cert_len` are ignored.
    pub fn parse(raw: &[u8]) -> Result<Self, CertificateError> {
        let need = |needed: usize| {
            if raw.len() < needed {
                Err(CertificateError::TooShort {
                    needed,
                    actual: raw.len(),
                })
            } else {
                Ok(())
            }
        };

        need(4)?;
        let cert_type = raw[0];
        let cert_len = raw[1];
        let permission_type = raw[2];
        let perm_len = raw[3] as usize;
        if cert_len == 0 || perm_len == 0 {
            debug!(cert = %HexSlice(raw), "invalid certificate header");
            return Err(CertificateError::InvalidHeader);
        }

        need(6 + perm_len)?;
        let permissions = Bytes::copy_from_slice(&raw[4..4 + perm_len]);
        let pubkey_type = raw[4 + perm_len];
        let pubkey_len = raw[5 + perm_len] as usize;
        if pubkey_len != PUBLIC_KEY_LENGTH {
            return Err(CertificateError::InvalidPublicKeyLength(pubkey_len));
        }

        let key_start = 6 + perm_len;
        let key_end = key_start + pubkey_len;
        let cert_len_usize = cert_len as usize;
        need(key_end)?;
        need(cert_len_usize)?;
        if cert_len_usize < key_end {
            return Err(CertificateError::TooShort {
                needed: key_end,
                actual: cert_len_usize,
            });
        }

        Ok(Self {
            cert_type,
            cert_len,
            permission_type,
            permissions,
            pubkey_type,
            public_key: Bytes::copy_from_slice(&raw[key_start..key_end]),
            signature: Bytes::copy_from_slice(&raw[key_end..cert_len_usize]),
        })
    }

    /// The signed portion: everything but `cert_type`, `cert_len` and the
    /// signature.
    pub fn digest(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.permissions.len() + self.public_key.len());
        buf.put_u8(self.permission_type);
        buf.put_u8(self.permissions.len() as u8);
        buf.put_slice(&self.permissions);
        buf.put_u8(self.pubkey_type);
        buf.put_u8(self.public_key.len() as u8);
        buf.put_slice(&self.public_key);
        buf.freeze()
    }

    /// Full certificate bytes, as sent over the wire.
    pub fn serialize(&self) -> Bytes {
        let digest = self.digest();
        let mut buf = BytesMut::with_capacity(2 + digest.len() + self.signature.len());
        buf.put_u8(self.cert_type);
        buf.put_u8(self.cert_len);
        buf.put_slice(&digest);
        buf.put_slice(&self.signature);
        buf.freeze()
    }

    pub const fn cert_type(&self) -> u8 {
        self.cert_type
    }

    /// Total length declared in the header
    pub const fn len(&self) -> usize {
        self.cert_len as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.cert_len == 0
    }

    pub const fn permissions(&self) -> &Bytes {
        &self.permissions
    }

    /// Raw uncompressed identity key
    pub const fn public_key_bytes(&self) -> &Bytes {
        &self.public_key
    }

    /// Identity key of the certified card
    pub fn public_key(&self) -> crate::Result<PublicKey> {
        Ok(PublicKey::from_sec1_bytes(&self.public_key)?)
    }

    pub const fn signature(&self) -> &Bytes {
        &self.signature
    }

    /// Check the CA signature over [`Self::digest`].
    pub fn validate(&self, ca_public_key: &[u8]) -> Result<(), InvalidCertificate> {
        let ca = PublicKey::from_sec1_bytes(ca_public_key).map_err(|_| {
            warn!("could not parse CA public key");
            InvalidCertificate
        })?;

        let hash = calculate_cryptogram(&[self.digest().as_ref()]);
        verify_prehash_der(&ca, &hash, &self.signature).map_err(|err| {
            warn!(%err, "card certificate failed validation");
            InvalidCertificate
        })?;

        debug!("card certificate valid");
        Ok(())
    }

    /// Mint a certificate for `card_public_key`, signed by `signer`.
    pub fn create(
        card_public_key: &PublicKey,
        signer: &impl CertificateSigner,
    ) -> Result<Bytes, CertificateError> {
        let point = card_public_key.to_encoded_point(false);

        let mut cert = BytesMut::with_capacity(CERT_HEADER.len() + PUBLIC_KEY_LENGTH + 72);
        cert.put_slice(&CERT_HEADER);
        cert.put_slice(point.as_bytes());

        let signature = signer.sign(&cert[2..])?;
        cert.put_slice(&signature);

        let total = cert.len();
        cert[1] = u8::try_from(total).map_err(|_| CertificateError::TooLong(total))?;
        Ok(cert.freeze())
    }
}

impl fmt::Display for CardCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Permissions: {}, PubKey: {} (length: {}), Sig: {} (length {})",
            HexSlice(&self.permissions),
            HexSlice(&self.public_key),
            self.public_key.len(),
            HexSlice(&self.signature),
            self.signature.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::{
        SecretKey,
        ecdsa::{Signature, SigningKey, signature::Signer},
    };

    fn signer_for(key: SigningKey) -> impl CertificateSigner {
        move |preimage: &[u8]| -> Result<Vec<u8>, SignerError> {
            let signature: Signature = key.sign(preimage);
            Ok(signature.to_der().as_bytes().to_vec())
        }
    }

    fn mock_ca() -> SigningKey {
        SigningKey::from_slice(&MOCK_CA_PRIVATE_KEY).unwrap()
    }

    fn card_key() -> PublicKey {
        SecretKey::random(&mut rand_v8::thread_rng()).public_key()
    }

    #[test]
    fn test_mock_ca_key_pair() {
        let derived = mock_ca().verifying_key().to_encoded_point(false);
        assert_eq!(derived.as_bytes(), &MOCK_CA_PUBLIC_KEY[..]);
    }

    #[test]
    fn test_create_layout() {
        let card = card_key();
        let raw = CardCertificate::create(&card, &signer_for(mock_ca())).unwrap();

        assert_eq!(&raw[..1], &[0x30]);
        assert_eq!(raw[1] as usize, raw.len());
        assert_eq!(&raw[2..8], &CERT_HEADER[2..]);
        assert_eq!(&raw[8..73], card.to_encoded_point(false).as_bytes());

        let cert = CardCertificate::parse(&raw).unwrap();
        assert_eq!(cert.serialize(), raw);
        assert_eq!(cert.public_key().unwrap(), card);
        assert_eq!(cert.digest().as_ref(), &raw[2..73]);
    }

    #[test]
    fn test_validate() {
        let raw = CardCertificate::create(&card_key(), &signer_for(mock_ca())).unwrap();
        let cert = CardCertificate::parse(&raw).unwrap();

        assert!(cert.validate(&MOCK_CA_PUBLIC_KEY).is_ok());
        assert_eq!(cert.validate(&DEMO_CA_PUBLIC_KEY), Err(InvalidCertificate));
        assert_eq!(cert.validate(&[0x04; 10]), Err(InvalidCertificate));
    }

    #[test]
    fn test_mutated_permission_fails() {
        let raw = CardCertificate::create(&card_key(), &signer_for(mock_ca())).unwrap();
        let mut mutated = raw.to_vec();
        mutated[4] ^= 0x01;

        let cert = CardCertificate::parse(&mutated).unwrap();
        assert_eq!(cert.validate(&MOCK_CA_PUBLIC_KEY), Err(InvalidCertificate));
    }

    #[test]
    fn test_mutated_signature_fails() {
        let raw = CardCertificate::create(&card_key(), &signer_for(mock_ca())).unwrap();
        let mut mutated = raw.to_vec();
        let last = mutated.len() - 1;
        mutated[last] ^= 0x01;

        let cert = CardCertificate::parse(&mutated).unwrap();
        assert_eq!(cert.validate(&MOCK_CA_PUBLIC_KEY), Err(InvalidCertificate));
    }

    #[test]
    fn test_parse_bounds() {
        let raw = CardCertificate::create(&card_key(), &signer_for(mock_ca())).unwrap();

        for len in 0..raw.len() {
            assert!(CardCertificate::parse(&raw[..len]).is_err(), "len {len}");
        }

        let mut zero_len = raw.to_vec();
        zero_len[1] = 0;
        assert!(matches!(
            CardCertificate::parse(&zero_len),
            Err(CertificateError::InvalidHeader)
        ));

        // cert_len shorter than the key it claims to contain
        let mut short = raw.to_vec();
        short[1] = 40;
        assert!(matches!(
            CardCertificate::parse(&short),
            Err(CertificateError::TooShort { .. })
        ));

        let mut bad_key = raw.to_vec();
        bad_key[7] = 0x21;
        assert!(matches!(
            CardCertificate::parse(&bad_key),
            Err(CertificateError::InvalidPublicKeyLength(0x21))
        ));
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let raw = CardCertificate::create(&card_key(), &signer_for(mock_ca())).unwrap();
        let mut padded = raw.to_vec();
        padded.extend_from_slice(&[0xFF; 7]);
        let cert = CardCertificate::parse(&padded).unwrap();
        assert_eq!(cert.serialize(), raw);
    }

    #[test]
    fn test_signer_error_propagates() {
        let failing = |_: &[u8]| -> Result<Vec<u8>, SignerError> {
            Err(SignerError::new("hsm offline"))
        };
        let err = CardCertificate::create(&card_key(), &failing).unwrap_err();
        assert!(matches!(err, CertificateError::Signer(_)));
        assert!(err.to_string().contains("hsm offline"));
    }
}
