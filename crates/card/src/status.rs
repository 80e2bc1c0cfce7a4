//! Status word taxonomy.
//!
//! Every status word the card can return resolves to exactly one
//! [`StatusKind`]: success, continuation, PIN tries remaining, or a named
//! [`CardError`] with [`CardError::Unknown`] as the fallback. PAIR has its own
//! step-dependent table, see [`PairingError::from_status`].

use std::fmt;

use derive_more::{From, Into};
use thiserror::Error;

use crate::constants::status::*;

/// Two byte ISO 7816 status word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Into)]
pub struct StatusWord(u16);

impl StatusWord {
    pub const SUCCESS: Self = Self(SW_NO_ERROR);

    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self(((sw1 as u16) << 8) | sw2 as u16)
    }

    pub const fn value(&self) -> u16 {
        self.0
    }

    pub const fn sw1(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn sw2(&self) -> u8 {
        self.0 as u8
    }

    pub const fn to_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub const fn is_success(&self) -> bool {
        self.0 == SW_NO_ERROR
    }

    pub const fn is_continuation(&self) -> bool {
        is_continuation(self.0)
    }

    /// Classify this status word.
    pub const fn kind(&self) -> StatusKind {
        match self.0 {
            SW_NO_ERROR => StatusKind::Success,
            sw if is_continuation(sw) => StatusKind::Continuation {
                remaining: sw - SW_NO_ERROR,
            },
            sw if sw & 0xFFF0 == SW_PIN_TRIES_BASE => {
                StatusKind::PinTriesRemaining((sw & 0x000F) as u8)
            }
            sw => StatusKind::Failure(CardError::from_status(sw)),
        }
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// `true` iff the card signalled that more frames follow.
pub const fn is_continuation(status_word: u16) -> bool {
    status_word > SW_NO_ERROR && status_word <= SW_CONTINUATION_MAX
}

/// Classification of a status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Success,
    /// More data follows. The low byte is the card's hint of what is left.
    Continuation { remaining: u16 },
    PinTriesRemaining(u8),
    Failure(CardError),
}

/// Errors reported by the card through its status word
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CardError {
    #[error("wrong length")]
    WrongLength,

    #[error("security status not satisfied: valid PIN or secure channel required")]
    SecurityStatusNotSatisfied,

    #[error("invalid file")]
    InvalidFile,

    #[error("conditions of use not satisfied")]
    ConditionsNotSatisfied,

    #[error("invalid data format")]
    InvalidFormat,

    #[error("key index out of valid range")]
    KeyIndexInvalid,

    #[error("phonon table full")]
    PhononTableFull,

    #[error("incorrect P1/P2")]
    IncorrectP1P2,

    #[error("instruction not supported or card uninitialized")]
    InsNotSupported,

    #[error("class not supported")]
    ClaNotSupported,

    #[error("unknown error: {0:04X}")]
    Unknown(u16),
}

impl CardError {
    /// Static mapping from status word to error.
    pub const fn from_status(sw: u16) -> Self {
        match sw {
            SW_WRONG_LENGTH => Self::WrongLength,
            SW_SECURITY_STATUS_NOT_SATISFIED => Self::SecurityStatusNotSatisfied,
            SW_INVALID_FILE => Self::InvalidFile,
            SW_CONDITIONS_NOT_SATISFIED => Self::ConditionsNotSatisfied,
            SW_WRONG_DATA => Self::InvalidFormat,
            SW_RECORD_NOT_FOUND => Self::KeyIndexInvalid,
            SW_NOT_ENOUGH_MEMORY => Self::PhononTableFull,
            SW_INCORRECT_P1P2 => Self::IncorrectP1P2,
            SW_INS_NOT_SUPPORTED => Self::InsNotSupported,
            SW_CLA_NOT_SUPPORTED => Self::ClaNotSupported,
            other => Self::Unknown(other),
        }
    }
}

/// Which PAIR round trip produced a status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStep {
    /// Salt and pairing key exchange
    First,
    /// Client cryptogram
    Second,
}

/// Terminal to card pairing failures
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PairingError {
    #[error("pairing data has an invalid format")]
    InvalidFormat,

    #[error("card certificate not loaded")]
    CertificateNotLoaded,

    #[error("card was unable to generate the pairing secret")]
    UnableToGenerateSecret,

    #[error("card rejected the client cryptogram")]
    CryptogramVerificationFailed,

    #[error("no free pairing slots")]
    NoPairingSlots,

    #[error("pairing step sent out of order")]
    StepOrderViolated,

    #[error("secure channel already open")]
    ChannelAlreadyOpen,

    #[error("PIN not set")]
    PinNotSet,

    #[error("card certificate failed CA validation")]
    InvalidCardCertificate,

    #[error("card signature over the pairing secret is invalid")]
    InvalidCardSignature,

    #[error("unknown pairing error: {0:04X}")]
    Unknown(u16),
}

impl PairingError {
    /// Map a PAIR status word. `6982` means different things per step.
    pub const fn from_status(step: PairingStep, sw: u16) -> Self {
        match (step, sw) {
            (_, SW_WRONG_DATA) => Self::InvalidFormat,
            (_, SW_CERTIFICATE_NOT_LOADED) => Self::CertificateNotLoaded,
            (PairingStep::First, SW_SECURITY_STATUS_NOT_SATISFIED) => {
                Self::UnableToGenerateSecret
            }
            (PairingStep::Second, SW_SECURITY_STATUS_NOT_SATISFIED) => {
                Self::CryptogramVerificationFailed
            }
            (_, SW_NOT_ENOUGH_MEMORY) => Self::NoPairingSlots,
            (_, SW_INCORRECT_P1P2) => Self::StepOrderViolated,
            (_, SW_CONDITIONS_NOT_SATISFIED) => Self::ChannelAlreadyOpen,
            (_, SW_INS_NOT_SUPPORTED) => Self::PinNotSet,
            (_, other) => Self::Unknown(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuation_range() {
        assert!(!is_continuation(0x9000));
        assert!(is_continuation(0x9001));
        assert!(is_continuation(0x9005));
        assert!(is_continuation(0x9100));
        assert!(!is_continuation(0x9101));
        assert!(!is_continuation(0x6A84));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(StatusWord::SUCCESS.kind(), StatusKind::Success);
        assert_eq!(
            StatusWord::from(0x9002).kind(),
            StatusKind::Continuation { remaining: 2 }
        );
        assert_eq!(
            StatusWord::from(0x63C2).kind(),
            StatusKind::PinTriesRemaining(2)
        );
        assert_eq!(
            StatusWord::new(0x6A, 0x84).kind(),
            StatusKind::Failure(CardError::PhononTableFull)
        );
        assert_eq!(
            StatusWord::from(0x6F00).kind(),
            StatusKind::Failure(CardError::Unknown(0x6F00))
        );
    }

    #[test]
    fn test_bytes() {
        let sw = StatusWord::new(0x63, 0xC1);
        assert_eq!(sw.value(), 0x63C1);
        assert_eq!(sw.to_bytes(), [0x63, 0xC1]);
        assert_eq!(sw.to_string(), "63C1");
    }

    #[test]
    fn test_pairing_table_is_step_dependent() {
        assert_eq!(
            PairingError::from_status(PairingStep::First, 0x6982),
            PairingError::UnableToGenerateSecret
        );
        assert_eq!(
            PairingError::from_status(PairingStep::Second, 0x6982),
            PairingError::CryptogramVerificationFailed
        );
        assert_eq!(
            PairingError::from_status(PairingStep::First, 0x6A84),
            PairingError::NoPairingSlots
        );
        assert_eq!(
            PairingError::from_status(PairingStep::Second, 0x6A86),
            PairingError::StepOrderViolated
        );
        assert_eq!(
            PairingError::from_status(PairingStep::First, 0x6D00),
            PairingError::PinNotSet
        );
        assert_eq!(
            PairingError::from_status(PairingStep::First, 0x6985),
            PairingError::ChannelAlreadyOpen
        );
        assert_eq!(
            PairingError::from_status(PairingStep::First, 0x6882),
            PairingError::CertificateNotLoaded
        );
        assert_eq!(
            PairingError::from_status(PairingStep::Second, 0x6A80),
            PairingError::InvalidFormat
        );
        assert_eq!(
            PairingError::from_status(PairingStep::First, 0x1234),
            PairingError::Unknown(0x1234)
        );
    }
}
