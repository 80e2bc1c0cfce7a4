//! Simple TLV codec used by the phonon applet.
//!
//! Every record is `tag(1) | length(1) | value(length)`. There is no length
//! extension, so values are limited to 255 bytes. Parsed records are collected
//! into a [`TlvCollection`], a multi-map keyed by tag that preserves the order
//! in which values of the same tag were seen.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Longest value a single record can carry.
pub const MAX_VALUE_LENGTH: usize = u8::MAX as usize;

/// Errors that can occur while encoding or decoding TLV data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TlvError {
    #[error("value of {0} bytes exceeds the 255 byte TLV limit")]
    ValueTooLong(usize),

    #[error("TLV data truncated: needed {needed} bytes at offset {offset}, {available} available")]
    TruncatedData {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("tag {0:#04X} not found in TLV collection")]
    TagNotFound(u8),

    #[error("tag {0:#04X} contained no parsed data")]
    TagEmpty(u8),
}

/// A single tag-length-value record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    tag: u8,
    value: Bytes,
}

impl Tlv {
    /// Create a record, rejecting values that do not fit a one byte length.
    pub fn new(tag: u8, value: impl Into<Bytes>) -> Result<Self, TlvError> {
        let value = value.into();
        if value.len() > MAX_VALUE_LENGTH {
            return Err(TlvError::ValueTooLong(value.len()));
        }
        Ok(Self { tag, value })
    }

    pub const fn tag(&self) -> u8 {
        self.tag
    }

    pub const fn value(&self) -> &Bytes {
        &self.value
    }

    /// Serialize as `tag || length || value`
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.value.len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tag);
        buf.put_u8(self.value.len() as u8);
        buf.put_slice(&self.value);
    }
}

/// Encode a single record.
pub fn encode(tag: u8, value: &[u8]) -> Result<Bytes, TlvError> {
    Ok(Tlv::new(tag, Bytes::copy_from_slice(value))?.encode())
}

/// Encode a list of records back to back.
pub fn encode_list<'a>(records: impl IntoIterator<Item = &'a Tlv>) -> Bytes {
    let mut buf = BytesMut::new();
    for record in records {
        record.encode_into(&mut buf);
    }
    buf.freeze()
}

/// Parse a TLV stream, recursing into any tag listed in `constructed`.
pub fn parse(data: &[u8], constructed: &[u8]) -> Result<TlvCollection, TlvError> {
    let mut collection = TlvCollection::default();
    parse_into(&mut collection, data, constructed)?;
    Ok(collection)
}

fn parse_into(
    collection: &mut TlvCollection,
    data: &[u8],
    constructed: &[u8],
) -> Result<(), TlvError> {
    let mut offset = 0;

    while offset < data.len() {
        let tag = data[offset];

        let Some(&length) = data.get(offset + 1) else {
            return Err(TlvError::TruncatedData {
                offset: offset + 1,
                needed: 1,
                available: 0,
            });
        };
        let length = length as usize;

        let start = offset + 2;
        let end = start + length;
        let Some(value) = data.get(start..end) else {
            return Err(TlvError::TruncatedData {
                offset: start,
                needed: length,
                available: data.len().saturating_sub(start),
            });
        };

        collection.push(tag, Bytes::copy_from_slice(value));
        if constructed.contains(&tag) {
            parse_into(collection, value, constructed)?;
        }

        offset = end;
    }

    Ok(())
}

/// Flattened multi-map of parsed TLV records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvCollection {
    entries: BTreeMap<u8, Vec<Bytes>>,
}

impl TlvCollection {
    /// Parse `data`, see [`parse`].
    pub fn parse(data: &[u8], constructed: &[u8]) -> Result<Self, TlvError> {
        parse(data, constructed)
    }

    /// Append a value for `tag`, keeping earlier values.
    pub fn push(&mut self, tag: u8, value: Bytes) {
        self.entries.entry(tag).or_default().push(value);
    }

    /// First value recorded for `tag`.
    pub fn find_first(&self, tag: u8) -> Result<&Bytes, TlvError> {
        self.find_all(tag)?
            .first()
            .ok_or(TlvError::TagEmpty(tag))
    }

    /// Every value recorded for `tag`, in the order they were parsed.
    pub fn find_all(&self, tag: u8) -> Result<&[Bytes], TlvError> {
        let values = self.entries.get(&tag).ok_or(TlvError::TagNotFound(tag))?;
        if values.is_empty() {
            return Err(TlvError::TagEmpty(tag));
        }
        Ok(values)
    }

    /// Like [`Self::find_all`] but treats a missing tag as an empty list.
    pub fn get_all(&self, tag: u8) -> &[Bytes] {
        self.entries.get(&tag).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, tag: u8) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Number of distinct tags
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every record whose tag is not in `exclude`, ordered by tag.
    pub fn remaining(&self, exclude: &[u8]) -> Vec<Tlv> {
        self.iter()
            .filter(|record| !exclude.contains(&record.tag))
            .collect()
    }

    /// Iterate over all records, ordered by tag and then by parse order.
    pub fn iter(&self) -> impl Iterator<Item = Tlv> + '_ {
        self.entries.iter().flat_map(|(tag, values)| {
            values.iter().map(|value| Tlv {
                tag: *tag,
                value: value.clone(),
            })
        })
    }
}
