//! Session state for the phonon secure channel.
//!
//! A [`Session`] is the key material plus the chained IV of one open
//! channel. It knows nothing about how the keys were derived; terminal to card
//! and card to card pairing both end by installing one.

use std::collections::HashSet;

use cipher::{Iv, Key};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::Result;
use crate::crypto::{ApduMeta, PhononScp, calculate_mac};

/// Phonon SCP keys
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct Keys {
    /// Encryption key
    enc: Key<PhononScp>,
    /// MAC key
    mac: Key<PhononScp>,
}

impl Keys {
    /// Create a new key set with the specified encryption and MAC keys.
    pub(crate) const fn new(enc: Key<PhononScp>, mac: Key<PhononScp>) -> Self {
        Self { enc, mac }
    }

    /// Get the encryption key
    pub(crate) const fn enc(&self) -> &Key<PhononScp> {
        &self.enc
    }

    /// Get the MAC key
    pub(crate) const fn mac(&self) -> &Key<PhononScp> {
        &self.mac
    }
}

/// Session state for an open secure channel
#[derive(Clone)]
pub(crate) struct Session {
    /// Session keys
    keys: Keys,
    /// Chained IV, replaced after every message
    iv: Iv<PhononScp>,
    /// Every MAC the chain has passed through. The MAC covers only the
    /// ciphertext, so a replayed frame is recognized by its MAC alone.
    seen: HashSet<[u8; 16]>,
}

impl Session {
    pub(crate) fn new(
        enc_key: Key<PhononScp>,
        mac_key: Key<PhononScp>,
        iv: Iv<PhononScp>,
    ) -> Self {
        Self {
            keys: Keys::new(enc_key, mac_key),
            iv,
            seen: HashSet::new(),
        }
    }

    pub(crate) const fn keys(&self) -> &Keys {
        &self.keys
    }

    pub(crate) const fn iv(&self) -> &Iv<PhononScp> {
        &self.iv
    }

    /// MAC `data` under the session MAC key with the fixed zero meta block.
    pub(crate) fn mac(&self, data: &[u8]) -> Result<Iv<PhononScp>> {
        calculate_mac(&ApduMeta::default(), data, self.keys.mac())
    }

    /// Whether `mac` already chained a frame in this session
    pub(crate) fn has_seen(&self, mac: &Iv<PhononScp>) -> bool {
        self.seen.contains(&mac_key_of(mac))
    }

    pub(crate) fn set_iv(&mut self, iv: Iv<PhononScp>) {
        self.seen.insert(mac_key_of(&iv));
        self.iv = iv;
    }
}

fn mac_key_of(mac: &Iv<PhononScp>) -> [u8; 16] {
    let mut key = [0u8; 16];
    key.copy_from_slice(mac);
    key
}

impl Drop for Session {
    fn drop(&mut self) {
        self.iv.zeroize();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chained_macs_are_remembered() {
        let mut session = Session::new(
            Key::<PhononScp>::default(),
            Key::<PhononScp>::default(),
            Iv::<PhononScp>::default(),
        );
        let mac = session.mac(b"frame").unwrap();
        assert!(!session.has_seen(&mac));

        session.set_iv(mac);
        assert!(session.has_seen(&mac));
        assert_eq!(session.iv(), &mac);
    }
}
