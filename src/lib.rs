//! A Rust implementation of the AMF3 (Action Message Format, version 3) codec.
//!
//! AMF3 is the compact, tag-prefixed binary serialization format used by
//! Adobe Flash Player and Flex to exchange structured values between a
//! client runtime and a server. This crate decodes an AMF3 byte stream into
//! a tree of [`amf3::Value`]s and encodes such a tree back into the wire
//! format, preserving the reference-table sharing (strings, objects,
//! traits) and cyclic structure that the format allows.
//!
//! # Examples
//! ```
//! use amf3::Value;
//!
//! let integer = Value::Integer(123);
//! let mut buf = Vec::new();
//! integer.write_to(&mut buf).unwrap();
//!
//! let decoded = Value::read_from(&buf[..]).unwrap();
//! assert!(matches!(decoded, Value::Integer(123)));
//! ```
//!
//! AMF0 is out of scope: this crate implements AMF3 only.
//!
//! # References
//! - [AMF3 Specification](https://www.adobe.com/content/dam/acom/en/devnet/pdf/amf-file-format-spec.pdf)
#![warn(missing_docs)]

pub mod amf3;
pub mod error;

pub use amf3::Value;
pub use error::{DecodeError, DecodeResult, EncodeError, EncodeResult};

/// An ordered key-value pair, used for object fields, array entries and
/// dictionary entries wherever AMF3 requires insertion order to be
/// preserved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pair<K, V> {
    /// The key of the pair.
    pub key: K,

    /// The value of the pair.
    pub value: V,
}

impl<K, V> Pair<K, V> {
    /// Creates a new pair.
    pub fn new(key: K, value: V) -> Self {
        Pair { key, value }
    }
}
