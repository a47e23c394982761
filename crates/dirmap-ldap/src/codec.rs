//! Translation between wire attribute lists and [`Entry`] values.
//!
//! Whether an attribute decodes to text or bytes is decided once per attribute name from the
//! caller's [`ByteValued`] set; the bytes themselves are never inspected.

use dirmap_core::entry::{AttributeName, AttributeValue, Entry, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One attribute as exchanged with the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireAttribute {
    /// Attribute description as sent by the server.
    pub name: String,
    /// Raw values in server order.
    #[serde(default)]
    pub values: Vec<Vec<u8>>,
}

impl WireAttribute {
    /// Creates a wire attribute from any byte-like values.
    #[must_use]
    pub fn new<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// An entry as returned by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Attributes in server order.
    #[serde(default)]
    pub attributes: Vec<WireAttribute>,
}

impl WireEntry {
    /// Creates a wire entry without attributes.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    /// Appends an attribute, builder style.
    #[must_use]
    pub fn with_attribute<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        self.attributes.push(WireAttribute::new(name, values));
        self
    }
}

/// How the values of one attribute are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// UTF-8 text; invalid sequences are replaced.
    Text,
    /// Raw bytes.
    Binary,
}

impl Representation {
    fn decode(self, raw: &[u8]) -> Value {
        match self {
            Self::Text => Value::Text(String::from_utf8_lossy(raw).into_owned()),
            Self::Binary => Value::Binary(raw.to_vec()),
        }
    }
}

/// Names of the attributes whose values are decoded as raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteValued(BTreeSet<AttributeName>);

impl ByteValued {
    /// Creates an empty set: every attribute decodes as text.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute name.
    pub fn insert(&mut self, name: impl Into<AttributeName>) {
        self.0.insert(name.into());
    }

    /// Adds every name of `other`.
    pub fn extend(&mut self, other: &ByteValued) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Returns true if the attribute decodes to bytes.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(&AttributeName::from(name))
    }

    /// Returns true if no attribute is byte-valued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Representation used for the named attribute.
    #[must_use]
    pub fn representation(&self, name: &str) -> Representation {
        if self.contains(name) {
            Representation::Binary
        } else {
            Representation::Text
        }
    }
}

impl<N: Into<AttributeName>> FromIterator<N> for ByteValued {
    fn from_iter<I: IntoIterator<Item = N>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Encodes an entry into wire attributes, one per attribute name.
///
/// The DN is not part of the attribute list and is ignored.
#[must_use]
pub fn encode(entry: &Entry) -> Vec<WireAttribute> {
    entry
        .iter()
        .map(|(name, value)| WireAttribute {
            name: name.as_str().to_string(),
            values: value.to_values().into_iter().map(Value::into_bytes).collect(),
        })
        .collect()
}

/// Decodes a wire entry.
///
/// A single value decodes to [`AttributeValue::Single`], any other count to
/// [`AttributeValue::Multi`] (empty for types-only results). `objectClass` always decodes to a set.
/// The DN is carried on the entry only when `include_dn` is true.
#[must_use]
pub fn decode(wire: &WireEntry, byte_valued: &ByteValued, include_dn: bool) -> Entry {
    let mut entry = decode_attributes(&wire.attributes, byte_valued);
    if include_dn {
        entry.set_dn(Some(wire.dn.clone()));
    }
    entry
}

/// Decodes a bare attribute list into a DN-less entry.
#[must_use]
pub fn decode_attributes(attributes: &[WireAttribute], byte_valued: &ByteValued) -> Entry {
    let mut entry = Entry::new();
    for attribute in attributes {
        let representation = byte_valued.representation(&attribute.name);
        let mut values: Vec<Value> = attribute
            .values
            .iter()
            .map(|raw| representation.decode(raw))
            .collect();

        let value = match values.len() {
            1 => AttributeValue::Single(values.remove(0)),
            _ => AttributeValue::Multi(values),
        };
        entry.insert(attribute.name.as_str(), value);
    }
    entry
}
