use bytes::Bytes;

use crate::cert::DEMO_CA_PUBLIC_KEY;
use crate::constants::PHONON_AID;

/// Default cap on continuation frames for a single logical response.
pub const DEFAULT_MAX_CONTINUATION_FRAMES: usize = 64;

/// Settings for a [`PhononCard`](crate::PhononCard) session.
///
/// Nothing here is read from the environment; embedders build one and pass it
/// to the constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardConfig {
    ca_public_key: Bytes,
    aid: Bytes,
    max_continuation_frames: usize,
    insecure_static_keys: bool,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            ca_public_key: Bytes::from_static(&DEMO_CA_PUBLIC_KEY),
            aid: Bytes::from_static(PHONON_AID),
            max_continuation_frames: DEFAULT_MAX_CONTINUATION_FRAMES,
            insecure_static_keys: false,
        }
    }
}

impl CardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// CA that card certificates must chain to
    pub fn with_ca_public_key(mut self, ca_public_key: impl Into<Bytes>) -> Self {
        self.ca_public_key = ca_public_key.into();
        self
    }

    pub fn with_aid(mut self, aid: impl Into<Bytes>) -> Self {
        self.aid = aid.into();
        self
    }

    pub const fn with_max_continuation_frames(mut self, max: usize) -> Self {
        self.max_continuation_frames = max;
        self
    }

    /// Use the fixed debug key instead of a fresh ephemeral key for ECDH.
    /// Only for decrypting captured traffic during development.
    pub const fn with_insecure_static_keys(mut self, enabled: bool) -> Self {
        self.insecure_static_keys = enabled;
        self
    }

    pub const fn ca_public_key(&self) -> &Bytes {
        &self.ca_public_key
    }

    pub const fn aid(&self) -> &Bytes {
        &self.aid
    }

    pub const fn max_continuation_frames(&self) -> usize {
        self.max_continuation_frames
    }

    pub const fn insecure_static_keys(&self) -> bool {
        self.insecure_static_keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::MOCK_CA_PUBLIC_KEY;

    #[test]
    fn test_defaults() {
        let config = CardConfig::default();
        assert_eq!(config.ca_public_key().as_ref(), &DEMO_CA_PUBLIC_KEY[..]);
        assert_eq!(config.aid().as_ref(), PHONON_AID);
        assert_eq!(config.max_continuation_frames(), 64);
        assert!(!config.insecure_static_keys());
    }

    #[test]
    fn test_builders() {
        let config = CardConfig::new()
            .with_ca_public_key(MOCK_CA_PUBLIC_KEY.to_vec())
            .with_max_continuation_frames(3)
            .with_insecure_static_keys(true);
        assert_eq!(config.ca_public_key().as_ref(), &MOCK_CA_PUBLIC_KEY[..]);
        assert_eq!(config.max_continuation_frames(), 3);
        assert!(config.insecure_static_keys());
    }
}
