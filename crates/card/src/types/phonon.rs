//! Phonon descriptors and the LIST filter.
//!
//! A phonon is a card-held secp256k1 key plus a descriptor saying what the
//! key is worth. Descriptors travel as flat TLV lists: a fixed set of standard
//! fields followed by whatever extension records the issuer attached.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_more::{Display, From, Into};
use tracing::trace;

use crate::apdu::HexSlice;
use crate::constants::tags;
use crate::tlv::{self, Tlv, TlvCollection};
use crate::{Error, Result};

/// The only standard schema version understood here
pub const SUPPORTED_SCHEMA_VERSION: u8 = 0;

/// Records consumed by [`Phonon::decode`]. Anything else is an extension.
const STANDARD_TAGS: [u8; 11] = [
    tags::KEY_INDEX,
    tags::PHONON_PUB_KEY,
    tags::PHONON_PRIV_KEY,
    tags::CURVE_TYPE,
    tags::SCHEMA_VERSION,
    tags::EXTENDED_SCHEMA_VERSION,
    tags::DENOM_BASE,
    tags::DENOM_EXP,
    tags::CURRENCY_TYPE,
    tags::CHAIN_ID,
    tags::PRIVATE_DESCRIPTION,
];

/// Slot of a phonon in the card's table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
pub struct KeyIndex(u16);

impl KeyIndex {
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    pub const fn value(&self) -> u16 {
        self.0
    }

    pub const fn to_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        match data {
            [hi, lo] => Ok(Self(u16::from_be_bytes([*hi, *lo]))),
            _ => Err(Error::InvalidData("key index must be two bytes")),
        }
    }
}

/// Asset a phonon is denominated in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, From, Into)]
#[display("{_0:#06x}")]
pub struct CurrencyType(u16);

impl CurrencyType {
    /// Matches every currency in a LIST filter
    pub const UNSPECIFIED: Self = Self(0x0000);
    pub const BITCOIN: Self = Self(0x0001);
    pub const ETHEREUM: Self = Self(0x0002);
    pub const NATIVE: Self = Self(0x0003);

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u16 {
        self.0
    }
}

/// Curve of the phonon key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CurveType {
    #[default]
    Secp256k1,
    Native,
    Other(u8),
}

impl From<u8> for CurveType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Secp256k1,
            0x01 => Self::Native,
            other => Self::Other(other),
        }
    }
}

impl From<CurveType> for u8 {
    fn from(value: CurveType) -> Self {
        match value {
            CurveType::Secp256k1 => 0x00,
            CurveType::Native => 0x01,
            CurveType::Other(other) => other,
        }
    }
}

/// Compressed amount: `base * 10^exponent` base units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Denomination {
    pub base: u8,
    pub exponent: u8,
}

impl Denomination {
    pub const fn new(base: u8, exponent: u8) -> Self {
        Self { base, exponent }
    }

    /// Compress `value`, moving trailing zeros into the exponent.
    ///
    /// Fails when the significant digits do not fit in one byte.
    pub fn from_value(mut value: u128) -> Result<Self> {
        let mut exponent = 0u8;
        while value > u128::from(u8::MAX) {
            if value % 10 != 0 {
                return Err(Error::InvalidData(
                    "value cannot be represented as a denomination",
                ));
            }
            value /= 10;
            exponent += 1;
        }
        Ok(Self {
            base: value as u8,
            exponent,
        })
    }

    /// Amount in base units, `None` when it does not fit a `u128`.
    pub fn value(&self) -> Option<u128> {
        10u128
            .checked_pow(u32::from(self.exponent))
            .and_then(|scale| scale.checked_mul(u128::from(self.base)))
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(value) => write!(f, "{value}"),
            None => write!(f, "{}e{}", self.base, self.exponent),
        }
    }
}

/// A phonon as described by the card
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Phonon {
    /// Table slot. Absent in transfer packets.
    pub key_index: Option<KeyIndex>,
    pub pub_key: Option<Bytes>,
    pub curve_type: CurveType,
    pub schema_version: u8,
    pub extended_schema_version: u8,
    pub denomination: Denomination,
    pub currency_type: CurrencyType,
    pub chain_id: u8,
    /// Issuer specific records carried through untouched
    pub extended_tlv: Vec<Tlv>,
}

impl Phonon {
    pub fn new(currency_type: CurrencyType, denomination: Denomination) -> Self {
        Self {
            currency_type,
            denomination,
            ..Self::default()
        }
    }

    /// Value in base units, `None` on overflow.
    pub fn value(&self) -> Option<u128> {
        self.denomination.value()
    }

    /// Fields written by SET_DESCRIPTOR.
    ///
    /// Key index, public key and curve are owned by the card and are left out.
    pub fn encode_descriptor(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        buf.put(tlv::encode(tags::SCHEMA_VERSION, &[self.schema_version])?);
        buf.put(tlv::encode(
            tags::EXTENDED_SCHEMA_VERSION,
            &[self.extended_schema_version],
        )?);
        buf.put(tlv::encode(tags::DENOM_BASE, &[self.denomination.base])?);
        buf.put(tlv::encode(tags::DENOM_EXP, &[self.denomination.exponent])?);
        buf.put(tlv::encode(
            tags::CURRENCY_TYPE,
            &self.currency_type.value().to_be_bytes(),
        )?);
        buf.put(tlv::encode(tags::CHAIN_ID, &[self.chain_id])?);
        for record in &self.extended_tlv {
            record.encode_into(&mut buf);
        }
        Ok(buf.freeze())
    }

    /// Descriptor as the card reports it in LIST: key index and curve first,
    /// then the SET_DESCRIPTOR fields.
    pub fn encode_public(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        if let Some(index) = self.key_index {
            buf.put(tlv::encode(tags::KEY_INDEX, &index.to_bytes())?);
        }
        buf.put(tlv::encode(tags::CURVE_TYPE, &[u8::from(self.curve_type)])?);
        buf.put(self.encode_descriptor()?);
        Ok(buf.freeze())
    }

    /// Decode a flat descriptor record list.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::from_collection(&TlvCollection::parse(data, &[])?)
    }

    pub(crate) fn from_collection(records: &TlvCollection) -> Result<Self> {
        let key_index = match records.find_first(tags::KEY_INDEX) {
            Ok(raw) => Some(KeyIndex::from_bytes(raw)?),
            Err(_) => {
                trace!("descriptor without key index");
                None
            }
        };

        let curve_type = single_byte(records, tags::CURVE_TYPE)?.into();
        let schema_version = single_byte(records, tags::SCHEMA_VERSION)?;
        if schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(Error::InvalidData("unsupported phonon schema version"));
        }
        let extended_schema_version = single_byte(records, tags::EXTENDED_SCHEMA_VERSION)?;
        let denomination = Denomination {
            base: single_byte(records, tags::DENOM_BASE)?,
            exponent: single_byte(records, tags::DENOM_EXP)?,
        };

        let currency = records.find_first(tags::CURRENCY_TYPE)?;
        if currency.len() != 2 {
            return Err(Error::InvalidData("currency type must be two bytes"));
        }
        let currency_type = CurrencyType(currency.clone().get_u16());

        let chain_id = match records.find_first(tags::CHAIN_ID) {
            Ok(raw) if raw.len() == 1 => raw[0],
            _ => 0,
        };

        Ok(Self {
            key_index,
            pub_key: records.find_first(tags::PHONON_PUB_KEY).ok().cloned(),
            curve_type,
            schema_version,
            extended_schema_version,
            denomination,
            currency_type,
            chain_id,
            extended_tlv: records.remaining(&STANDARD_TAGS),
        })
    }
}

impl fmt::Display for Phonon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key_index {
            Some(index) => write!(f, "#{index}")?,
            None => write!(f, "#-")?,
        }
        write!(
            f,
            " {} of currency {} (chain {})",
            self.denomination, self.currency_type, self.chain_id
        )?;
        if let Some(key) = &self.pub_key {
            write!(f, " key {}", HexSlice(key))?;
        }
        Ok(())
    }
}

fn single_byte(records: &TlvCollection, tag: u8) -> Result<u8> {
    match records.find_first(tag)?.as_ref() {
        [value] => Ok(*value),
        _ => Err(Error::InvalidData("descriptor field must be one byte")),
    }
}

/// LIST_PHONONS selection.
///
/// A zero currency matches everything. A zero bound is not applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhononFilter {
    pub currency_type: CurrencyType,
    pub less_than: u64,
    pub greater_than: u64,
}

impl PhononFilter {
    const LESS_THAN_BIT: u8 = 0x01;
    const GREATER_THAN_BIT: u8 = 0x02;

    /// Which bounds the card should apply
    pub const fn p2(&self) -> u8 {
        let mut p2 = 0;
        if self.less_than > 0 {
            p2 |= Self::LESS_THAN_BIT;
        }
        if self.greater_than > 0 {
            p2 |= Self::GREATER_THAN_BIT;
        }
        p2
    }

    pub fn encode(&self) -> Result<Bytes> {
        let body = tlv::encode_list(&[
            Tlv::new(tags::CURRENCY_TYPE, self.currency_type.value().to_be_bytes().to_vec())?,
            Tlv::new(tags::VALUE_FILTER_LESS_THAN, self.less_than.to_be_bytes().to_vec())?,
            Tlv::new(tags::VALUE_FILTER_MORE_THAN, self.greater_than.to_be_bytes().to_vec())?,
        ]);
        Ok(tlv::encode(tags::PHONON_FILTER, &body)?)
    }

    /// Card side of [`Self::encode`]. Bounds not flagged in `p2` are dropped.
    pub fn decode(p2: u8, data: &[u8]) -> Result<Self> {
        let records = TlvCollection::parse(data, &[tags::PHONON_FILTER])?;
        let currency = records.find_first(tags::CURRENCY_TYPE)?;
        let less_than = records.find_first(tags::VALUE_FILTER_LESS_THAN)?;
        let greater_than = records.find_first(tags::VALUE_FILTER_MORE_THAN)?;
        if currency.len() != 2 || less_than.len() != 8 || greater_than.len() != 8 {
            return Err(Error::InvalidData("malformed phonon filter"));
        }

        Ok(Self {
            currency_type: CurrencyType(currency.clone().get_u16()),
            less_than: if p2 & Self::LESS_THAN_BIT != 0 {
                less_than.clone().get_u64()
            } else {
                0
            },
            greater_than: if p2 & Self::GREATER_THAN_BIT != 0 {
                greater_than.clone().get_u64()
            } else {
                0
            },
        })
    }

    pub fn matches(&self, phonon: &Phonon) -> bool {
        if self.currency_type != CurrencyType::UNSPECIFIED
            && phonon.currency_type != self.currency_type
        {
            return false;
        }
        // Values too large for the filter width compare as u64::MAX.
        let value = phonon
            .value()
            .map_or(u64::MAX, |v| u64::try_from(v).unwrap_or(u64::MAX));
        (self.greater_than == 0 || value > self.greater_than)
            && (self.less_than == 0 || value < self.less_than)
    }
}
