use std::panic::{AssertUnwindSafe, catch_unwind};

use bytes::Bytes;
use thiserror::Error;

use crate::apdu::TransportError;
use crate::card_pairing::CardPairingStage;
use crate::cert::{CertificateError, InvalidCertificate};
use crate::status::{CardError, PairingError, StatusKind, StatusWord};
use crate::tlv::TlvError;

/// Result type for phonon card operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for phonon card operations
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-related errors
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Malformed TLV payloads
    #[error(transparent)]
    Tlv(#[from] TlvError),

    /// Certificate layout or minting errors
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// Certificate did not validate against the configured CA
    #[error(transparent)]
    InvalidCertificate(#[from] InvalidCertificate),

    /// Status word errors
    #[error(transparent)]
    Card(#[from] CardError),

    /// Terminal to card pairing errors
    #[error(transparent)]
    Pairing(#[from] PairingError),

    #[error("wrong PIN, {0} tries remaining")]
    PinTriesRemaining(u8),

    #[error("unexpected status word {0}")]
    UnexpectedStatus(StatusWord),

    #[error("invalid response length: expected at least {expected} bytes, got {actual}")]
    InvalidResponseLength { expected: usize, actual: usize },

    #[error("command data of {0} bytes exceeds the APDU limit")]
    CommandTooLong(usize),

    #[error("invalid response MAC")]
    InvalidResponseMac,

    #[error("secure channel not open")]
    SecureChannelNotOpen,

    #[error("no ECDH secret agreed with the card")]
    KeyAgreementRequired,

    #[error("card application not selected")]
    NotSelected,

    #[error("pairing required")]
    PairingRequired,

    #[error("card already initialized")]
    AlreadyInitialized,

    #[error("mutual authentication failed")]
    MutualAuthenticationFailed,

    #[error("card pairing step out of order: expected {expected:?}, currently {actual:?}")]
    CardPairingOutOfOrder {
        expected: CardPairingStage,
        actual: CardPairingStage,
    },

    #[error("continuation did not finish within {0} frames")]
    ContinuationLimitExceeded(usize),

    #[error("cannot send {requested} phonons at once, at most {max}")]
    SendLimitExceeded { requested: usize, max: usize },

    /// SEND_PHONONS broke off after the card had already released some
    /// packets. They are carried here so the phonons can still be delivered.
    #[error("send interrupted after {} packet(s)", .packets.len())]
    IncompleteSend {
        packets: Vec<Bytes>,
        source: Box<Error>,
    },

    #[error("transfer interrupted after delivering {delivered} packet(s)")]
    TransferInterrupted { delivered: usize, source: Box<Error> },

    #[error("counterparty certificate differs from the one pairing started with")]
    CounterpartyCertificateMismatch,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid data: {0}")]
    InvalidData(&'static str),

    #[error("unpad error")]
    UnpadError(#[from] cipher::block_padding::UnpadError),

    #[error("pad error")]
    PadError(#[from] cipher::inout::PadError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Turn a non-success status word into an error.
    pub const fn from_status(status: StatusWord) -> Self {
        match status.kind() {
            StatusKind::PinTriesRemaining(tries) => Self::PinTriesRemaining(tries),
            StatusKind::Failure(error) => Self::Card(error),
            StatusKind::Success | StatusKind::Continuation { .. } => {
                Self::UnexpectedStatus(status)
            }
        }
    }
}

impl From<k256::elliptic_curve::Error> for Error {
    fn from(_: k256::elliptic_curve::Error) -> Self {
        Self::InvalidPublicKey
    }
}

impl From<k256::ecdsa::Error> for Error {
    fn from(_: k256::ecdsa::Error) -> Self {
        Self::InvalidSignature
    }
}

/// Run `f`, converting an unexpected panic into [`Error::Internal`].
///
/// Meant for the single boundary where an embedder calls into the card stack
/// so that one corrupted exchange cannot take the whole terminal down.
pub fn guard<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with non-string payload".to_string());
        Err(Error::Internal(message))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_passes_results_through() {
        assert_eq!(guard(|| Ok(7)).unwrap(), 7);
        assert!(matches!(
            guard::<(), _>(|| Err(Error::SecureChannelNotOpen)),
            Err(Error::SecureChannelNotOpen)
        ));
    }

    #[test]
    fn test_guard_catches_panics() {
        let result = guard::<(), _>(|| panic!("corrupted frame"));
        match result {
            Err(Error::Internal(message)) => assert_eq!(message, "corrupted frame"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            Error::InvalidData("empty transfer packet").to_string(),
            "invalid data: empty transfer packet"
        );
        let err = Error::IncompleteSend {
            packets: vec![Bytes::from_static(&[0x01]); 2],
            source: Box::new(Error::Transport(TransportError::Disconnected)),
        };
        assert_eq!(err.to_string(), "send interrupted after 2 packet(s)");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(
            Error::from_status(StatusWord::from(0x63C1)),
            Error::PinTriesRemaining(1)
        ));
        assert!(matches!(
            Error::from_status(StatusWord::from(0x6A84)),
            Error::Card(CardError::PhononTableFull)
        ));
        assert!(matches!(
            Error::from_status(StatusWord::from(0x9003)),
            Error::UnexpectedStatus(_)
        ));
    }
}
