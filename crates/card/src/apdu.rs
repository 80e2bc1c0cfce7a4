//! APDU command and response framing and the transport seam.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::trace;

use crate::constants::MAX_APDU_LENGTH;
use crate::status::StatusWord;
use crate::{Error, Result};

/// Errors raised by a [`CardTransport`] implementation
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no card present")]
    NoCard,

    #[error("card removed during exchange")]
    Disconnected,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Byte-in, byte-out connection to a card.
///
/// Exactly one command is in flight at a time: `transmit_raw` blocks until the
/// card has answered.
pub trait CardTransport {
    /// Send a serialized command and return the raw response including the
    /// trailing status word.
    fn transmit_raw(&mut self, command: &[u8]) -> std::result::Result<Bytes, TransportError>;

    /// Send a command and parse the response.
    fn transmit(&mut self, command: &Command) -> Result<Response> {
        let raw = command.to_bytes();
        trace!(command = %HexSlice(&raw), "transmit");
        let response = self.transmit_raw(&raw)?;
        trace!(response = %HexSlice(&response), "receive");
        Response::from_bytes(&response)
    }

    /// Reset the underlying connection.
    fn reset(&mut self) -> std::result::Result<(), TransportError> {
        Ok(())
    }
}

impl<T: CardTransport + ?Sized> CardTransport for &mut T {
    fn transmit_raw(&mut self, command: &[u8]) -> std::result::Result<Bytes, TransportError> {
        (**self).transmit_raw(command)
    }

    fn reset(&mut self) -> std::result::Result<(), TransportError> {
        (**self).reset()
    }
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn transmit_raw(&mut self, command: &[u8]) -> std::result::Result<Bytes, TransportError> {
        (**self).transmit_raw(command)
    }

    fn reset(&mut self) -> std::result::Result<(), TransportError> {
        (**self).reset()
    }
}

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Bytes,
    le: Option<u8>,
}

impl Command {
    /// Longest data field that still fits in [`MAX_APDU_LENGTH`] together with
    /// the header, Lc and Le.
    pub const MAX_DATA_LENGTH: usize = MAX_APDU_LENGTH - 6;

    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Bytes::new(),
            le: None,
        }
    }

    /// Attach a data field. Oversized payloads must be chunked by the caller.
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if data.len() > Self::MAX_DATA_LENGTH {
            return Err(Error::CommandTooLong(data.len()));
        }
        self.data = data;
        Ok(self)
    }

    pub const fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    pub const fn class(&self) -> u8 {
        self.cla
    }

    pub const fn instruction(&self) -> u8 {
        self.ins
    }

    pub const fn p1(&self) -> u8 {
        self.p1
    }

    pub const fn p2(&self) -> u8 {
        self.p2
    }

    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    pub const fn le(&self) -> Option<u8> {
        self.le
    }

    /// Convert to raw APDU bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(6 + self.data.len());
        buf.put_u8(self.cla);
        buf.put_u8(self.ins);
        buf.put_u8(self.p1);
        buf.put_u8(self.p2);
        if !self.data.is_empty() {
            buf.put_u8(self.data.len() as u8);
            buf.put_slice(&self.data);
        }
        if let Some(le) = self.le {
            buf.put_u8(le);
        }
        buf.freeze()
    }

    /// Parse a short APDU. Used by the card side of the mock.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let Some((header, body)) = raw.split_first_chunk::<4>() else {
            return Err(Error::InvalidResponseLength {
                expected: 4,
                actual: raw.len(),
            });
        };
        let [cla, ins, p1, p2] = *header;
        let command = Self::new(cla, ins, p1, p2);

        match body {
            [] => Ok(command),
            [le] => Ok(command.with_le(*le)),
            [lc, rest @ ..] => {
                let lc = *lc as usize;
                match rest.len() {
                    n if n == lc => command.with_data(Bytes::copy_from_slice(rest)),
                    n if n == lc + 1 => Ok(command
                        .with_data(Bytes::copy_from_slice(&rest[..lc]))?
                        .with_le(rest[lc])),
                    _ => Err(Error::InvalidData("command Lc does not match data length")),
                }
            }
        }
    }
}

/// Response to an APDU command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    data: Bytes,
    status: StatusWord,
}

impl Response {
    pub fn new(data: impl Into<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            data: data.into(),
            status: status.into(),
        }
    }

    pub fn success(data: impl Into<Bytes>) -> Self {
        Self::new(data, StatusWord::SUCCESS)
    }

    /// Bare status response with no data
    pub fn status_only(status: impl Into<StatusWord>) -> Self {
        Self::new(Bytes::new(), status)
    }

    /// Parse `data || sw1 || sw2`.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let Some((data, [sw1, sw2])) = raw.split_last_chunk::<2>() else {
            return Err(Error::InvalidResponseLength {
                expected: 2,
                actual: raw.len(),
            });
        };
        Ok(Self {
            data: Bytes::copy_from_slice(data),
            status: StatusWord::new(*sw1, *sw2),
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 2);
        buf.put_slice(&self.data);
        buf.put_slice(&self.status.to_bytes());
        buf.freeze()
    }

    pub const fn status(&self) -> StatusWord {
        self.status
    }

    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Require `9000`, mapping anything else to a typed error.
    pub fn check(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::from_status(self.status))
        }
    }
}

/// Hex formatter for byte dumps in trace output
pub(crate) struct HexSlice<'a>(pub(crate) &'a [u8]);

impl fmt::Display for HexSlice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization() {
        let command = Command::new(0x80, 0x12, 0x00, 0x00)
            .with_data(vec![0xAA, 0xBB])
            .unwrap();
        assert_eq!(command.to_bytes().as_ref(), &[0x80, 0x12, 0x00, 0x00, 0x02, 0xAA, 0xBB]);

        let command = Command::new(0x00, 0xA4, 0x04, 0x00).with_le(0);
        assert_eq!(command.to_bytes().as_ref(), &[0x00, 0xA4, 0x04, 0x00, 0x00]);
    }

    #[test]
    fn test_command_parse() {
        let raw = hex::decode("80320102031122330A").unwrap();
        let command = Command::from_bytes(&raw).unwrap();
        assert_eq!(command.instruction(), 0x32);
        assert_eq!(command.p1(), 0x01);
        assert_eq!(command.p2(), 0x02);
        assert_eq!(command.data().as_ref(), &[0x11, 0x22, 0x33]);
        assert_eq!(command.le(), Some(0x0A));

        assert!(Command::from_bytes(&[0x80, 0x32]).is_err());
        assert!(Command::from_bytes(&hex::decode("8032000005AABB").unwrap()).is_err());
    }

    #[test]
    fn test_command_too_long() {
        let max = vec![0u8; Command::MAX_DATA_LENGTH];
        let command = Command::new(0x80, 0x35, 0x00, 0x00).with_data(max).unwrap();
        assert!(command.to_bytes().len() <= MAX_APDU_LENGTH);

        let err = Command::new(0x80, 0x35, 0x00, 0x00)
            .with_data(vec![0u8; Command::MAX_DATA_LENGTH + 1])
            .unwrap_err();
        assert!(matches!(err, Error::CommandTooLong(251)));
    }

    #[test]
    fn test_response_parse() {
        let response = Response::from_bytes(&[0x01, 0x02, 0x90, 0x00]).unwrap();
        assert!(response.is_success());
        assert_eq!(response.data().as_ref(), &[0x01, 0x02]);
        assert_eq!(response.to_bytes().as_ref(), &[0x01, 0x02, 0x90, 0x00]);

        let response = Response::from_bytes(&[0x6A, 0x84]).unwrap();
        assert!(response.data().is_empty());
        assert_eq!(response.status().value(), 0x6A84);

        assert!(matches!(
            Response::from_bytes(&[0x90]),
            Err(Error::InvalidResponseLength { expected: 2, actual: 1 })
        ));
    }
}
