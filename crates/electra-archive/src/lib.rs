//! Electra Archive
//!
//! The TransportableObject envelope wraps a serialized value together with its
//! human-readable form so either part can be read without decoding the other.
//!
//! # Layout
//!
//! All offsets are big-endian `u64`.
//!
//! ```text
//! [string_offset:8][data_offset:8][header][string][data]
//!                                 ^16     ^string_offset ^data_offset
//! ```
//!
//! `header` is a JSON blob carrying the producer version, display attributes
//! and the payload length. Reading the first [`PREFIX_LEN`] bytes is enough
//! to know how many bytes a header-only or string-only read needs, which lets
//! a caller fetch the preview of a huge stored value with a single range read.

mod error;

pub use error::ArchiveError;

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Length of the fixed offset prefix.
pub const PREFIX_LEN: usize = 16;

/// Version tag written into every header produced by this crate.
pub const PRODUCER_VERSION: &str = concat!("electra/", env!("CARGO_PKG_VERSION"));

/// Structured header of a transportable object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHeader {
  /// Producer version tag.
  pub version: String,
  /// Display attributes (type name, doc string, ...).
  #[serde(default)]
  pub attrs: BTreeMap<String, String>,
  /// Length of the data section in bytes.
  pub data_len: u64,
}

/// Byte offsets of the string and data sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offsets {
  pub string_offset: u64,
  pub data_offset: u64,
}

impl Offsets {
  /// Parse the fixed prefix. Only the first [`PREFIX_LEN`] bytes are read.
  pub fn read(buf: &[u8]) -> Result<Self, ArchiveError> {
    let prefix = buf.get(..PREFIX_LEN).ok_or(ArchiveError::Truncated {
      needed: PREFIX_LEN as u64,
      available: buf.len() as u64,
    })?;
    let mut string_offset = [0u8; 8];
    let mut data_offset = [0u8; 8];
    string_offset.copy_from_slice(&prefix[..8]);
    data_offset.copy_from_slice(&prefix[8..]);

    let offsets = Self {
      string_offset: u64::from_be_bytes(string_offset),
      data_offset: u64::from_be_bytes(data_offset),
    };
    if offsets.string_offset < PREFIX_LEN as u64 || offsets.data_offset < offsets.string_offset {
      return Err(ArchiveError::InvalidOffsets {
        string_offset: offsets.string_offset,
        data_offset: offsets.data_offset,
      });
    }
    Ok(offsets)
  }

  /// Number of leading bytes needed for a read in `mode`, if bounded.
  pub fn prefix_needed(&self, mode: ReadMode) -> Option<u64> {
    match mode {
      ReadMode::HeaderOnly => Some(self.string_offset),
      ReadMode::StringOnly => Some(self.data_offset),
      ReadMode::Full => None,
    }
  }
}

/// How much of an envelope to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
  Full,
  HeaderOnly,
  StringOnly,
}

/// The parts of an envelope recovered by [`decode`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
  pub header: ObjectHeader,
  pub object_string: Option<String>,
  pub data: Option<Bytes>,
}

/// A serialized value plus its human-readable representation.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportableObject {
  header: ObjectHeader,
  object_string: String,
  data: Bytes,
}

impl TransportableObject {
  pub fn new(object_string: impl Into<String>, data: impl Into<Bytes>) -> Self {
    let data = data.into();
    Self {
      header: ObjectHeader {
        version: PRODUCER_VERSION.to_string(),
        attrs: BTreeMap::new(),
        data_len: data.len() as u64,
      },
      object_string: object_string.into(),
      data,
    }
  }

  /// Attach a display attribute.
  pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.header.attrs.insert(key.into(), value.into());
    self
  }

  pub fn header(&self) -> &ObjectHeader {
    &self.header
  }

  pub fn object_string(&self) -> &str {
    &self.object_string
  }

  pub fn data(&self) -> &Bytes {
    &self.data
  }

  /// Encode into the envelope layout.
  pub fn serialize(&self) -> Result<Bytes, ArchiveError> {
    let header = serde_json::to_vec(&self.header)?;
    let string = self.object_string.as_bytes();

    let string_offset = (PREFIX_LEN + header.len()) as u64;
    let data_offset = string_offset + string.len() as u64;

    let mut buf = BytesMut::with_capacity(data_offset as usize + self.data.len());
    buf.put_u64(string_offset);
    buf.put_u64(data_offset);
    buf.put_slice(&header);
    buf.put_slice(string);
    buf.put_slice(&self.data);
    Ok(buf.freeze())
  }

  /// Decode a complete envelope.
  pub fn deserialize(buf: &[u8]) -> Result<Self, ArchiveError> {
    let decoded = decode(buf, ReadMode::Full)?;
    Ok(Self {
      header: decoded.header,
      object_string: decoded.object_string.unwrap_or_default(),
      data: decoded.data.unwrap_or_default(),
    })
  }
}

/// Decode an envelope, reading no further than `mode` requires.
///
/// `HeaderOnly` touches `buf[..string_offset]`, `StringOnly` touches
/// `buf[..data_offset]`. Only `Full` requires the complete data section.
pub fn decode(buf: &[u8], mode: ReadMode) -> Result<Decoded, ArchiveError> {
  let offsets = Offsets::read(buf)?;
  let header_bytes = section(buf, PREFIX_LEN as u64, offsets.string_offset)?;
  let header: ObjectHeader = serde_json::from_slice(header_bytes)?;

  if mode == ReadMode::HeaderOnly {
    return Ok(Decoded {
      header,
      object_string: None,
      data: None,
    });
  }

  let string_bytes = section(buf, offsets.string_offset, offsets.data_offset)?;
  let object_string = String::from_utf8(string_bytes.to_vec())?;

  if mode == ReadMode::StringOnly {
    return Ok(Decoded {
      header,
      object_string: Some(object_string),
      data: None,
    });
  }

  let data_end = offsets
    .data_offset
    .checked_add(header.data_len)
    .ok_or(ArchiveError::InvalidOffsets {
      string_offset: offsets.string_offset,
      data_offset: offsets.data_offset,
    })?;
  let data = section(buf, offsets.data_offset, data_end)?;
  if buf.len() as u64 != data_end {
    return Err(ArchiveError::TrailingBytes {
      expected: data_end,
      actual: buf.len() as u64,
    });
  }

  Ok(Decoded {
    header,
    object_string: Some(object_string),
    data: Some(Bytes::copy_from_slice(data)),
  })
}

fn section(buf: &[u8], start: u64, end: u64) -> Result<&[u8], ArchiveError> {
  if start > end {
    return Err(ArchiveError::InvalidOffsets {
      string_offset: start,
      data_offset: end,
    });
  }
  if (buf.len() as u64) < end {
    return Err(ArchiveError::Truncated {
      needed: end,
      available: buf.len() as u64,
    });
  }
  Ok(&buf[start as usize..end as usize])
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> TransportableObject {
    TransportableObject::new("add(x=1, y=2)", vec![7u8; 4096])
      .with_attr("name", "add")
      .with_attr("type", "function")
  }

  #[test]
  fn test_round_trip_recovers_all_parts() {
    let object = sample();
    let bytes = object.serialize().unwrap();
    let decoded = TransportableObject::deserialize(&bytes).unwrap();

    assert_eq!(decoded, object);
    assert_eq!(decoded.header().attrs.get("name").map(String::as_str), Some("add"));
    assert_eq!(decoded.header().version, PRODUCER_VERSION);
  }

  #[test]
  fn test_offsets_follow_layout() {
    let object = sample();
    let bytes = object.serialize().unwrap();
    let offsets = Offsets::read(&bytes).unwrap();
    let header_len = serde_json::to_vec(object.header()).unwrap().len() as u64;

    assert_eq!(offsets.string_offset, 16 + header_len);
    assert_eq!(
      offsets.data_offset,
      offsets.string_offset + object.object_string().len() as u64
    );
    assert_eq!(bytes.len() as u64, offsets.data_offset + 4096);
  }

  #[test]
  fn test_string_only_read_stops_at_data_offset() {
    let bytes = sample().serialize().unwrap();
    let offsets = Offsets::read(&bytes).unwrap();
    let truncated = &bytes[..offsets.data_offset as usize];

    let preview = decode(truncated, ReadMode::StringOnly).unwrap();
    assert_eq!(preview.object_string.as_deref(), Some("add(x=1, y=2)"));
    assert!(preview.data.is_none());

    assert!(matches!(
      decode(truncated, ReadMode::Full),
      Err(ArchiveError::Truncated { .. })
    ));
  }

  #[test]
  fn test_header_only_read_stops_at_string_offset() {
    let bytes = sample().serialize().unwrap();
    let offsets = Offsets::read(&bytes).unwrap();
    assert_eq!(offsets.prefix_needed(ReadMode::HeaderOnly), Some(offsets.string_offset));

    let truncated = &bytes[..offsets.string_offset as usize];
    let decoded = decode(truncated, ReadMode::HeaderOnly).unwrap();
    assert_eq!(decoded.header.data_len, 4096);
    assert!(decoded.object_string.is_none());

    assert!(decode(truncated, ReadMode::StringOnly).is_err());
  }

  #[test]
  fn test_short_prefix_is_truncated() {
    assert!(matches!(
      Offsets::read(&[0u8; 10]),
      Err(ArchiveError::Truncated { needed: 16, available: 10 })
    ));
  }

  #[test]
  fn test_inconsistent_offsets_are_rejected() {
    let mut buf = vec![0u8; 32];
    buf[..8].copy_from_slice(&20u64.to_be_bytes());
    buf[8..16].copy_from_slice(&18u64.to_be_bytes());
    assert!(matches!(
      Offsets::read(&buf),
      Err(ArchiveError::InvalidOffsets { .. })
    ));
  }

  /// Envelope with `header` and `string` but no data section.
  fn envelope(header: &ObjectHeader, string: &str) -> Vec<u8> {
    let header = serde_json::to_vec(header).unwrap();
    let string_offset = (PREFIX_LEN + header.len()) as u64;
    let data_offset = string_offset + string.len() as u64;
    let mut buf = Vec::new();
    buf.extend_from_slice(&string_offset.to_be_bytes());
    buf.extend_from_slice(&data_offset.to_be_bytes());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(string.as_bytes());
    buf
  }

  #[test]
  fn test_oversized_data_len_is_an_error() {
    let mut header = sample().header().clone();
    header.data_len = u64::MAX;
    let buf = envelope(&header, "add(x=1, y=2)");

    assert!(matches!(
      decode(&buf, ReadMode::Full),
      Err(ArchiveError::InvalidOffsets { .. })
    ));
    assert!(TransportableObject::deserialize(&buf).is_err());
    assert!(decode(&buf, ReadMode::StringOnly).is_ok());
  }

  #[test]
  fn test_section_rejects_reversed_bounds() {
    let buf = [0u8; 8];
    assert!(matches!(
      section(&buf, 6, 2),
      Err(ArchiveError::InvalidOffsets { string_offset: 6, data_offset: 2 })
    ));
  }

  #[test]
  fn test_trailing_bytes_are_rejected() {
    let mut bytes = sample().serialize().unwrap().to_vec();
    bytes.push(0);
    assert!(matches!(
      TransportableObject::deserialize(&bytes),
      Err(ArchiveError::TrailingBytes { .. })
    ));
  }
}
