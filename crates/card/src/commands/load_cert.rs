use bytes::Bytes;

use super::CardCommand;
use crate::apdu::Command;
use crate::cert::CardCertificate;
use crate::constants::{CLA_GP, ins};
use crate::Result;

/// LOAD_CERT: install a CA-signed identity certificate.
///
/// A card needs its certificate before it can pair, so this runs in the
/// clear.
#[derive(Debug, Clone)]
pub struct LoadCertCommand {
    certificate: Bytes,
}

impl LoadCertCommand {
    /// Wrap raw certificate bytes after checking their layout.
    pub fn with_certificate(certificate: impl Into<Bytes>) -> Result<Self> {
        let certificate = certificate.into();
        CardCertificate::parse(&certificate)?;
        Ok(Self { certificate })
    }
}

impl CardCommand for LoadCertCommand {
    type Output = ();
    const SECURE: bool = false;

    fn to_command(&self) -> Result<Command> {
        Command::new(CLA_GP, ins::LOAD_CERT, 0x00, 0x00).with_data(self.certificate.clone())
    }

    fn parse_response(&self, _data: Bytes) -> Result<Self::Output> {
        Ok(())
    }
}
