/// Phonon applet AID
pub const PHONON_AID: &[u8] = b"\xA0\x00\x00\x08\x20\x00\x03\x01";

/// ISO 7816 interindustry class
pub const CLA_ISO7816: u8 = 0x00;
/// GlobalPlatform proprietary class used by the applet
pub const CLA_GP: u8 = 0x80;

/// Longest serialized command the card accepts (header, Lc, data and Le).
pub const MAX_APDU_LENGTH: usize = 256;

/// Number of pairing slots exposed by the mock card.
pub const PAIRING_SLOTS: usize = 5;

/// Instruction codes understood by the applet.
pub mod ins {
    pub const SELECT: u8 = 0xA4;
    pub const INIT: u8 = 0xFE;
    pub const OPEN_SECURE_CHANNEL: u8 = 0x10;
    pub const MUTUALLY_AUTHENTICATE: u8 = 0x11;
    pub const PAIR: u8 = 0x12;
    pub const UNPAIR: u8 = 0x13;
    pub const IDENTIFY_CARD: u8 = 0x14;
    pub const LOAD_CERT: u8 = 0x15;
    pub const VERIFY_PIN: u8 = 0x20;
    pub const CHANGE_PIN: u8 = 0x21;
    pub const CREATE_PHONON: u8 = 0x30;
    pub const SET_DESCRIPTOR: u8 = 0x31;
    pub const LIST_PHONONS: u8 = 0x32;
    pub const GET_PHONON_PUB_KEY: u8 = 0x33;
    pub const DESTROY_PHONON: u8 = 0x34;
    pub const SEND_PHONONS: u8 = 0x35;
    pub const RECEIVE_PHONONS: u8 = 0x36;
    pub const INIT_CARD_PAIRING: u8 = 0x50;
    pub const CARD_PAIR: u8 = 0x51;
    pub const CARD_PAIR_2: u8 = 0x52;
    pub const FINALIZE_CARD_PAIR: u8 = 0x53;
    pub const GET_AVAILABLE_MEMORY: u8 = 0x99;
}

/// Status words. The mapping from these values to typed errors lives in
/// [`crate::status`].
pub mod status {
    pub const SW_NO_ERROR: u16 = 0x9000;
    /// Highest status word still read as "more data follows".
    pub const SW_CONTINUATION_MAX: u16 = 0x9100;
    /// `63Cx`: wrong PIN, `x` tries remaining
    pub const SW_PIN_TRIES_BASE: u16 = 0x63C0;

    pub const SW_WRONG_LENGTH: u16 = 0x6700;
    pub const SW_CERTIFICATE_NOT_LOADED: u16 = 0x6882;
    pub const SW_SECURITY_STATUS_NOT_SATISFIED: u16 = 0x6982;
    pub const SW_INVALID_FILE: u16 = 0x6983;
    pub const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
    pub const SW_WRONG_DATA: u16 = 0x6A80;
    pub const SW_FILE_NOT_FOUND: u16 = 0x6A82;
    pub const SW_RECORD_NOT_FOUND: u16 = 0x6A83;
    pub const SW_NOT_ENOUGH_MEMORY: u16 = 0x6A84;
    pub const SW_INCORRECT_P1P2: u16 = 0x6A86;
    pub const SW_INS_NOT_SUPPORTED: u16 = 0x6D00;
    pub const SW_CLA_NOT_SUPPORTED: u16 = 0x6E00;
    pub const SW_UNKNOWN: u16 = 0x6F00;
}

/// One-byte TLV tag registry shared with the card applet.
pub mod tags {
    /// Number of free pairing slots
    pub const PAIRING_SLOTS: u8 = 0x03;
    /// Applet capability flags
    pub const APP_CAPABILITY: u8 = 0x8D;

    /// Template returned by CREATE_PHONON:
    /// - KEY_INDEX
    /// - PHONON_PUB_KEY
    pub const PHONON_KEY_COLLECTION: u8 = 0x40;
    /// Phonon key index (2 bytes, big endian)
    pub const KEY_INDEX: u8 = 0x41;
    /// Concatenated key indices for SEND_PHONONS
    pub const KEY_INDEX_LIST: u8 = 0x42;
    /// Encrypted or plain phonon transfer packet
    pub const TRANSFER_PHONON_PACKET: u8 = 0x43;
    /// Private phonon description (private key plus descriptor fields)
    pub const PRIVATE_DESCRIPTION: u8 = 0x44;
    /// Phonon public key (65 bytes, uncompressed)
    pub const PHONON_PUB_KEY: u8 = 0x80;
    /// Phonon private key (32 bytes)
    pub const PHONON_PRIV_KEY: u8 = 0x81;
    /// List of phonon public keys
    pub const PUB_KEY_LIST: u8 = 0x7F;

    /// LIST_PHONONS filter template:
    /// - CURRENCY_TYPE
    /// - VALUE_FILTER_LESS_THAN
    /// - VALUE_FILTER_MORE_THAN
    pub const PHONON_FILTER: u8 = 0x60;
    pub const VALUE_FILTER_LESS_THAN: u8 = 0x84;
    pub const VALUE_FILTER_MORE_THAN: u8 = 0x85;

    /// List of PHONON_DESCRIPTOR entries
    pub const PHONON_COLLECTION: u8 = 0x52;
    pub const PHONON_DESCRIPTOR: u8 = 0x50;
    pub const DENOM_BASE: u8 = 0x83;
    pub const DENOM_EXP: u8 = 0x86;
    pub const CURRENCY_TYPE: u8 = 0x82;
    pub const CURVE_TYPE: u8 = 0x87;
    pub const SCHEMA_VERSION: u8 = 0x88;
    pub const EXTENDED_SCHEMA_VERSION: u8 = 0x89;
    pub const CHAIN_ID: u8 = 0x20;

    pub const CARD_CERTIFICATE: u8 = 0x90;
    /// ECC public key in the SELECT response
    pub const ECC_PUBLIC_KEY: u8 = 0x80;
    pub const SALT: u8 = 0x91;
    pub const AES_IV: u8 = 0x92;
    pub const ECDSA_SIGNATURE: u8 = 0x93;
    pub const PAIRING_INDEX: u8 = 0x94;
    pub const AES_KEY: u8 = 0x95;
    pub const INVOICE_ID: u8 = 0x96;

    /// Instance UID in the SELECT response
    pub const INSTANCE_UID: u8 = 0x8F;
    /// Application info template in the SELECT response
    pub const TEMPLATE_APPLICATION_INFO: u8 = 0xA4;
    /// Application version
    pub const APPLICATION_VERSION: u8 = 0x02;
}
