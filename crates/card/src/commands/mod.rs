//! Typed command/response pairs for the phonon applet.
//!
//! Every command knows how to build its APDU, whether it has to travel
//! through the secure channel and how to read a successful payload. Running
//! the exchange is left to [`PhononCard`](crate::PhononCard).

use bytes::Bytes;

use crate::apdu::Command;
use crate::continuation::assemble;
use crate::status::StatusWord;
use crate::{Error, Result};

pub mod card_pair;
pub mod ident;
pub mod init;
pub mod load_cert;
pub mod memory;
pub mod mutually_authenticate;
pub mod open_secure_channel;
pub mod pair;
pub mod phonon;
pub mod pin;
pub mod select;
pub mod transfer;
pub mod unpair;

pub use card_pair::{
    CardPair2Command, CardPair2Data, CardPairCommand, CardPairData, CardPairSession,
    CardPairingInit, FinalizeCardPairCommand, InitCardPairingCommand,
};
pub use ident::{IdentifyCardCommand, IdentifyCardResponse};
pub use init::InitCommand;
pub use load_cert::LoadCertCommand;
pub use memory::GetAvailableMemoryCommand;
pub use mutually_authenticate::MutuallyAuthenticateCommand;
pub use open_secure_channel::{OpenSecureChannelCommand, OpenSecureChannelResponse};
pub use pair::{PairStep1Command, PairStep1Response, PairStep2Command, PairStep2Response};
pub use phonon::{
    CreatePhononCommand, DestroyPhononCommand, GetPhononPubKeyCommand, ListPhononsCommand,
    SetDescriptorCommand,
};
pub use pin::{ChangePinCommand, VerifyPinCommand};
pub use select::SelectCommand;
pub use transfer::{ReceivePhononsCommand, ResumeSendCommand, SendPhononsCommand};
pub use unpair::UnpairCommand;

/// A command together with the interpretation of its response.
pub trait CardCommand {
    /// Parsed success payload
    type Output;

    /// Whether the command must be wrapped by the secure channel
    const SECURE: bool = true;

    fn to_command(&self) -> Result<Command>;

    /// Request for the next frame when the card answers with a continuation
    /// status. `None` for commands that never span frames.
    fn continuation(&self) -> Option<Command> {
        None
    }

    /// Read the assembled payload of a successful exchange.
    fn parse_response(&self, data: Bytes) -> Result<Self::Output>;

    /// Read every frame of a (possibly continued) response. The default joins
    /// the frames and hands them to [`Self::parse_response`].
    fn parse_frames(&self, frames: Vec<Bytes>) -> Result<Self::Output> {
        self.parse_response(assemble(&frames))
    }

    /// Map a failure status word. Commands with their own status table
    /// override this.
    fn map_status(&self, status: StatusWord) -> Error {
        Error::from_status(status)
    }
}
