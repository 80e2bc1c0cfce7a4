use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use k256::PublicKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use tracing::{debug, trace};

use super::Version;
use crate::apdu::HexSlice;
use crate::constants::tags;
use crate::tlv;
use crate::{Error, Result};

/// Shortest SELECT response from an initialized card
const INITIALIZED_MIN_LENGTH: usize = 88;
const UID_RANGE: std::ops::Range<usize> = 4..20;
const PUBLIC_KEY_RANGE: std::ops::Range<usize> = 22..87;
pub const INSTANCE_UID_LENGTH: usize = 16;

/// Card identity returned by SELECT.
///
/// An initialized card answers with an application info template holding its
/// instance UID, identity key and applet details. A card without a PIN only
/// reports its identity key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationInfo {
    /// Unique instance UID, absent on uninitialized cards
    pub instance_uid: Option<Bytes>,
    /// Card identity key, the ECDH peer for INIT and the secure channel
    pub public_key: PublicKey,
    /// Applet version
    pub version: Option<Version>,
    /// Free pairing slots
    pub remaining_slots: Option<u8>,
    /// Whether a PIN has been set
    pub initialized: bool,
}

impl ApplicationInfo {
    /// Parse a SELECT response payload.
    pub fn parse(data: &[u8]) -> Result<Self> {
        trace!(len = data.len(), "parsing select response");
        match data.first() {
            Some(&tags::TEMPLATE_APPLICATION_INFO) => Self::parse_initialized(data),
            Some(&tags::ECC_PUBLIC_KEY) => Self::parse_uninitialized(data),
            Some(_) => Err(Error::InvalidData("unknown select response template")),
            None => Err(Error::InvalidResponseLength {
                expected: 1,
                actual: 0,
            }),
        }
    }

    fn parse_initialized(data: &[u8]) -> Result<Self> {
        if data.len() < INITIALIZED_MIN_LENGTH {
            return Err(Error::InvalidResponseLength {
                expected: INITIALIZED_MIN_LENGTH,
                actual: data.len(),
            });
        }

        let instance_uid = Bytes::copy_from_slice(&data[UID_RANGE]);
        let public_key = PublicKey::from_sec1_bytes(&data[PUBLIC_KEY_RANGE])?;

        // Version and slot records follow the key. Older applets omit them.
        let (version, remaining_slots) = match tlv::parse(&data[PUBLIC_KEY_RANGE.end..], &[]) {
            Ok(trailer) => (
                trailer
                    .find_first(tags::APPLICATION_VERSION)
                    .ok()
                    .and_then(|v| Version::try_from(v.as_ref()).ok()),
                trailer
                    .find_first(tags::PAIRING_SLOTS)
                    .ok()
                    .and_then(|v| v.first().copied()),
            ),
            Err(e) => {
                debug!("ignoring malformed select trailer: {e}");
                (None, None)
            }
        };

        debug!(uid = %HexSlice(&instance_uid), "selected initialized card");
        Ok(Self {
            instance_uid: Some(instance_uid),
            public_key,
            version,
            remaining_slots,
            initialized: true,
        })
    }

    fn parse_uninitialized(data: &[u8]) -> Result<Self> {
        let len = *data.get(1).ok_or(Error::InvalidResponseLength {
            expected: 2,
            actual: data.len(),
        })? as usize;
        let key = data.get(2..2 + len).ok_or(Error::InvalidResponseLength {
            expected: 2 + len,
            actual: data.len(),
        })?;

        debug!("selected uninitialized card");
        Ok(Self {
            instance_uid: None,
            public_key: PublicKey::from_sec1_bytes(key)?,
            version: None,
            remaining_slots: None,
            initialized: false,
        })
    }

    /// Encode in the layout a card uses, see [`Self::parse`].
    pub fn to_bytes(&self) -> Result<Bytes> {
        let point = self.public_key.to_encoded_point(false);
        let key = tlv::encode(tags::ECC_PUBLIC_KEY, point.as_bytes())?;

        let Some(uid) = self.instance_uid.as_ref().filter(|_| self.initialized) else {
            return Ok(key);
        };
        if uid.len() != INSTANCE_UID_LENGTH {
            return Err(Error::InvalidData("instance uid must be 16 bytes"));
        }

        let mut body = BytesMut::new();
        body.put(tlv::encode(tags::INSTANCE_UID, uid)?);
        body.put(key);
        if let Some(version) = self.version {
            body.put(tlv::encode(
                tags::APPLICATION_VERSION,
                &[version.major, version.minor],
            )?);
        }
        if let Some(slots) = self.remaining_slots {
            body.put(tlv::encode(tags::PAIRING_SLOTS, &[slots])?);
        }
        Ok(tlv::encode(tags::TEMPLATE_APPLICATION_INFO, &body)?)
    }
}

impl fmt::Display for ApplicationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Application Info:")?;
        match &self.instance_uid {
            Some(uid) => writeln!(f, "  Instance UID: {}", HexSlice(uid))?,
            None => writeln!(f, "  Instance UID: -")?,
        }
        writeln!(
            f,
            "  Public key: {}",
            HexSlice(self.public_key.to_encoded_point(false).as_bytes())
        )?;
        if let Some(version) = self.version {
            writeln!(f, "  Version: {version}")?;
        }
        if let Some(slots) = self.remaining_slots {
            writeln!(f, "  Free pairing slots: {slots}")?;
        }
        write!(f, "  Initialized: {}", self.initialized)
    }
}

#[cfg(test)]
mod tests {
    use k256::SecretKey;

    use super::*;

    fn identity() -> PublicKey {
        SecretKey::from_slice(&[0x07; 32]).unwrap().public_key()
    }

    #[test]
    fn test_initialized_layout() {
        let info = ApplicationInfo {
            instance_uid: Some(Bytes::from_static(&[0xAB; 16])),
            public_key: identity(),
            version: Some(Version { major: 1, minor: 3 }),
            remaining_slots: Some(5),
            initialized: true,
        };
        let raw = info.to_bytes().unwrap();

        assert_eq!(raw[0], 0xA4);
        assert!(raw.len() >= 88);
        assert_eq!(&raw[4..20], &[0xAB; 16]);
        assert_eq!(&raw[20..22], &[0x80, 0x41]);
        assert_eq!(ApplicationInfo::parse(&raw).unwrap(), info);
    }

    #[test]
    fn test_uninitialized_layout() {
        let info = ApplicationInfo {
            instance_uid: None,
            public_key: identity(),
            version: None,
            remaining_slots: None,
            initialized: false,
        };
        let raw = info.to_bytes().unwrap();
        assert_eq!(raw[0], 0x80);
        assert_eq!(ApplicationInfo::parse(&raw).unwrap(), info);
    }

    #[test]
    fn test_short_responses() {
        let short = [0xA4; 87];
        assert!(matches!(
            ApplicationInfo::parse(&short),
            Err(Error::InvalidResponseLength {
                expected: 88,
                actual: 87
            })
        ));

        assert!(matches!(
            ApplicationInfo::parse(&[0x80, 0x41, 0x04]),
            Err(Error::InvalidResponseLength { .. })
        ));
        assert!(matches!(
            ApplicationInfo::parse(&[0x80]),
            Err(Error::InvalidResponseLength { .. })
        ));
        assert!(ApplicationInfo::parse(&[]).is_err());
    }
}
