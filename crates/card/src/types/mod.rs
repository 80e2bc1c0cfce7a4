mod application_info;
mod memory;
mod pairing_info;
mod phonon;
mod transfer;
mod version;

pub use application_info::{ApplicationInfo, INSTANCE_UID_LENGTH};
pub use memory::AvailableMemory;
pub use pairing_info::PairingInfo;
pub use phonon::{
    CurrencyType, CurveType, Denomination, KeyIndex, Phonon, PhononFilter,
    SUPPORTED_SCHEMA_VERSION,
};
pub use transfer::{PrivatePhonon, decode_transfer_packet, encode_transfer_packet};
pub use version::Version;
