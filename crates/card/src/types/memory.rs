use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

const RESPONSE_LENGTH: usize = 12;

/// Free memory reported by GET_AVAILABLE_MEMORY, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailableMemory {
    pub persistent: u32,
    pub on_reset: u32,
    pub on_deselect: u32,
}

impl AvailableMemory {
    /// Parse the three big endian counters. Anything but 12 bytes is rejected.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != RESPONSE_LENGTH {
            return Err(Error::InvalidResponseLength {
                expected: RESPONSE_LENGTH,
                actual: data.len(),
            });
        }
        let mut buf = data;
        Ok(Self {
            persistent: buf.get_u32(),
            on_reset: buf.get_u32(),
            on_deselect: buf.get_u32(),
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESPONSE_LENGTH);
        buf.put_u32(self.persistent);
        buf.put_u32(self.on_reset);
        buf.put_u32(self.on_deselect);
        buf.freeze()
    }
}

impl fmt::Display for AvailableMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "persistent: {}, on reset: {}, on deselect: {}",
            self.persistent, self.on_reset, self.on_deselect
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let raw = hex::decode("00007FFF0000040000000100").unwrap();
        let memory = AvailableMemory::parse(&raw).unwrap();
        assert_eq!(memory.persistent, 0x7FFF);
        assert_eq!(memory.on_reset, 0x400);
        assert_eq!(memory.on_deselect, 0x100);
        assert_eq!(memory.to_bytes().as_ref(), raw.as_slice());
    }

    #[test]
    fn test_wrong_length() {
        assert!(matches!(
            AvailableMemory::parse(&[0; 11]),
            Err(Error::InvalidResponseLength {
                expected: 12,
                actual: 11
            })
        ));
        assert!(AvailableMemory::parse(&[0; 13]).is_err());
    }
}
