use std::fmt;

use cipher::Key;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::apdu::HexSlice;
use crate::crypto::PhononScp;

/// Result of a successful PAIR: the slot the card assigned and the long
/// term key both sides derived for it.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PairingInfo {
    pub key: Key<PhononScp>,
    pub index: u8,
}

impl PairingInfo {
    pub const fn new(key: Key<PhononScp>, index: u8) -> Self {
        Self { key, index }
    }
}

// Never print the pairing key.
impl fmt::Debug for PairingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingInfo")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PairingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {} key {}", self.index, HexSlice(&self.key))
    }
}
