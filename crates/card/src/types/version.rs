use derive_more::{Display, From, Into};

use crate::{Error, Result};

/// Applet version (major.minor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, From, Into)]
#[display("{}.{}", major, minor)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl TryFrom<&[u8]> for Version {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        match value {
            [major, minor] => Ok(Self {
                major: *major,
                minor: *minor,
            }),
            _ => Err(Error::InvalidData("version must be two bytes")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let version = Version::try_from(&[0x01, 0x02][..]).unwrap();
        assert_eq!(version.to_string(), "1.2");
        assert!(Version::try_from(&[0x01][..]).is_err());
    }
}
