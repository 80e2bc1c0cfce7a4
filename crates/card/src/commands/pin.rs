use bytes::Bytes;

use super::CardCommand;
use crate::apdu::Command;
use crate::constants::{CLA_GP, ins};
use crate::{Error, Result};

pub const PIN_LENGTH: usize = 6;

/// PINs are exactly six ASCII digits.
pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(Error::InvalidData("PIN must be 6 digits"))
    }
}

/// VERIFY_PIN. A wrong PIN answers `63Cx`, surfaced as
/// [`Error::PinTriesRemaining`].
#[derive(Debug, Clone)]
pub struct VerifyPinCommand {
    pin: String,
}

impl VerifyPinCommand {
    pub fn with_pin(pin: &str) -> Result<Self> {
        validate_pin(pin)?;
        Ok(Self {
            pin: pin.to_owned(),
        })
    }
}

impl CardCommand for VerifyPinCommand {
    type Output = ();

    fn to_command(&self) -> Result<Command> {
        Command::new(CLA_GP, ins::VERIFY_PIN, 0x00, 0x00)
            .with_data(Bytes::copy_from_slice(self.pin.as_bytes()))
    }

    fn parse_response(&self, _data: Bytes) -> Result<Self::Output> {
        Ok(())
    }
}

/// CHANGE_PIN, requires a verified PIN
#[derive(Debug, Clone)]
pub struct ChangePinCommand {
    pin: String,
}

impl ChangePinCommand {
    pub fn with_pin(new_pin: &str) -> Result<Self> {
        validate_pin(new_pin)?;
        Ok(Self {
            pin: new_pin.to_owned(),
        })
    }
}

impl CardCommand for ChangePinCommand {
    type Output = ();

    fn to_command(&self) -> Result<Command> {
        Command::new(CLA_GP, ins::CHANGE_PIN, 0x00, 0x00)
            .with_data(Bytes::copy_from_slice(self.pin.as_bytes()))
    }

    fn parse_response(&self, _data: Bytes) -> Result<Self::Output> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusWord;

    #[test]
    fn test_pin_validation() {
        assert!(validate_pin("123456").is_ok());
        assert!(validate_pin("12345").is_err());
        assert!(validate_pin("1234567").is_err());
        assert!(validate_pin("12345a").is_err());
        assert!(VerifyPinCommand::with_pin("abc").is_err());
    }

    #[test]
    fn test_wrong_pin_status() {
        let command = VerifyPinCommand::with_pin("123456").unwrap();
        assert_eq!(
            hex::encode(command.to_command().unwrap().to_bytes()),
            "8020000006313233343536"
        );
        assert!(matches!(
            command.map_status(StatusWord::from(0x63C2u16)),
            Error::PinTriesRemaining(2)
        ));
    }
}
