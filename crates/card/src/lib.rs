//! Terminal-side protocol stack for Phonon cards.
//!
//! A phonon is a secp256k1 key held on a smart card together with a small
//! descriptor of the value it represents. The card never reveals the key
//! except to another genuine card over a channel only the two cards can read,
//! so handing over a phonon is as good as handing over the asset.
//!
//! This crate drives the card from the terminal:
//!
//! - [`tlv`] and [`apdu`] encode and decode the wire format,
//! - [`secure_channel`] implements the encrypted and MAC'd channel,
//! - [`PhononCard`] runs initialization, pairing and the phonon table
//!   operations against any [`CardTransport`],
//! - [`CardPairing`] relays card to card pairing and phonon transfers.
//!
//! [`MockCard`] is a complete in-memory card for tests and demos.
//!
//! ```no_run
//! use phonon_card::{CardConfig, MockCard, PhononCard, cert::MOCK_CA_PUBLIC_KEY};
//!
//! # fn main() -> phonon_card::Result<()> {
//! let config = CardConfig::new().with_ca_public_key(MOCK_CA_PUBLIC_KEY.to_vec());
//! let mut card = PhononCard::with_config(MockCard::new()?, config);
//! card.select()?;
//! card.init("123456")?;
//! card.pair()?;
//! card.open_secure_channel()?;
//! card.verify_pin("123456")?;
//! let (index, _) = card.create_phonon()?;
//! println!("created phonon {index}");
//! # Ok(())
//! # }
//! ```

pub mod apdu;
mod application;
mod card_pairing;
pub mod cert;
pub mod commands;
mod config;
pub mod constants;
pub mod continuation;
pub mod crypto;
mod error;
mod mock;
pub mod secure_channel;
mod session;
pub mod status;
pub mod tlv;
pub mod types;

pub use apdu::{CardTransport, Command, Response, TransportError};
pub use application::{PairingState, PhononCard};
pub use card_pairing::{CardPairing, CardPairingStage, CounterpartyCard};
pub use cert::{CardCertificate, CertificateSigner, SignerError};
pub use config::{CardConfig, DEFAULT_MAX_CONTINUATION_FRAMES};
pub use error::{Error, Result, guard};
pub use mock::{DEFAULT_CAPACITY, MockCard};
pub use secure_channel::{ChannelState, SecureChannel};
pub use status::{CardError, PairingError, StatusWord};
pub use types::{
    ApplicationInfo, AvailableMemory, CurrencyType, Denomination, KeyIndex, PairingInfo, Phonon,
    PhononFilter,
};
