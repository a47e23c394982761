//! Directory entries as plain associative data.
//!
//! An [`Entry`] maps case-insensitive [`AttributeName`]s to [`AttributeValue`]s. Values are either
//! text or raw bytes ([`Value`]); which one an attribute uses is decided by the caller, never by
//! inspecting the bytes. `objectClass` is always kept as a set of class names.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Name of the attribute that is always represented as a set.
pub const OBJECT_CLASS: &str = "objectClass";

/// Reserved key the entry DN is serialized under.
pub const DN_KEY: &str = "dn";

/// Attribute name that compares, orders, and hashes ASCII case-insensitively.
///
/// The spelling the name was created with is preserved for display and for requests sent to the
/// server.
#[derive(Debug, Clone)]
pub struct AttributeName(String);

impl AttributeName {
    /// Creates an attribute name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrows the name as originally spelled.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this name matches `other` ignoring ASCII case.
    #[must_use]
    pub fn is(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }

    /// Returns true for `objectClass` in any casing.
    #[must_use]
    pub fn is_object_class(&self) -> bool {
        self.is(OBJECT_CLASS)
    }

    fn folded(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.bytes().map(|b| b.to_ascii_lowercase())
    }
}

impl PartialEq for AttributeName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for AttributeName {}

impl Ord for AttributeName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(other.folded())
    }
}

impl PartialOrd for AttributeName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for AttributeName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.folded() {
            state.write_u8(byte);
        }
        state.write_u8(0xff);
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttributeName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AttributeName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&String> for AttributeName {
    fn from(value: &String) -> Self {
        Self(value.clone())
    }
}

impl Serialize for AttributeName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AttributeName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}

/// A single attribute value: text or raw bytes, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes, passed through untransformed.
    Binary(Vec<u8>),
}

impl Value {
    /// Returns the text if this is a textual value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the raw bytes of either representation.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Returns true for binary values.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Consumes the value and returns its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Renders the value as text, replacing invalid UTF-8 sequences.
    #[must_use]
    pub fn to_text_lossy(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Self::Binary(value.to_vec())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Text(value.to_string())
    }
}

/// Booleans use the LDAP Boolean syntax.
impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Text(if value { "TRUE" } else { "FALSE" }.to_string())
    }
}

/// The value set of one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Exactly one value.
    Single(Value),
    /// An ordered collection of values.
    Multi(Vec<Value>),
    /// The class names of `objectClass`.
    ObjectClasses(BTreeSet<String>),
}

impl AttributeValue {
    /// Returns all values in order, object classes rendered as text.
    #[must_use]
    pub fn to_values(&self) -> Vec<Value> {
        match self {
            Self::Single(value) => vec![value.clone()],
            Self::Multi(values) => values.clone(),
            Self::ObjectClasses(classes) => classes.iter().cloned().map(Value::Text).collect(),
        }
    }

    /// Number of values held.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Multi(values) => values.len(),
            Self::ObjectClasses(classes) => classes.len(),
        }
    }

    /// Returns true if no values are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the first value as text, if it is textual.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        match self {
            Self::Single(value) => value.as_text(),
            Self::Multi(values) => values.first().and_then(Value::as_text),
            Self::ObjectClasses(classes) => classes.iter().next().map(String::as_str),
        }
    }

    /// Converts any shape into the object class set representation.
    #[must_use]
    pub fn into_object_classes(self) -> BTreeSet<String> {
        match self {
            Self::Single(value) => std::iter::once(value.to_text_lossy()).collect(),
            Self::Multi(values) => values.iter().map(Value::to_text_lossy).collect(),
            Self::ObjectClasses(classes) => classes,
        }
    }
}

impl From<Value> for AttributeValue {
    fn from(value: Value) -> Self {
        Self::Single(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Single(value.into())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Single(value.into())
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Single(Value::Binary(value))
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Single(value.into())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Single(value.into())
    }
}

impl From<Vec<Value>> for AttributeValue {
    fn from(values: Vec<Value>) -> Self {
        Self::Multi(values)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multi(values.into_iter().map(Value::Text).collect())
    }
}

impl From<Vec<&str>> for AttributeValue {
    fn from(values: Vec<&str>) -> Self {
        Self::Multi(values.into_iter().map(Value::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for AttributeValue {
    fn from(values: [&str; N]) -> Self {
        Self::Multi(values.into_iter().map(Value::from).collect())
    }
}

impl From<Vec<Vec<u8>>> for AttributeValue {
    fn from(values: Vec<Vec<u8>>) -> Self {
        Self::Multi(values.into_iter().map(Value::Binary).collect())
    }
}

impl From<BTreeSet<String>> for AttributeValue {
    fn from(classes: BTreeSet<String>) -> Self {
        Self::ObjectClasses(classes)
    }
}

/// A directory entry: an optional DN plus its attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    dn: Option<String>,
    attributes: BTreeMap<AttributeName, AttributeValue>,
}

impl Entry {
    /// Creates an empty entry without a DN.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the DN, builder style.
    #[must_use]
    pub fn with_dn(mut self, dn: impl Into<String>) -> Self {
        self.dn = Some(dn.into());
        self
    }

    /// Adds an attribute, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<AttributeName>, value: impl Into<AttributeValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Returns the DN when the entry carries one.
    #[must_use]
    pub fn dn(&self) -> Option<&str> {
        self.dn.as_deref()
    }

    /// Replaces the DN.
    pub fn set_dn(&mut self, dn: Option<String>) {
        self.dn = dn;
    }

    /// Inserts an attribute, returning the previous value set.
    ///
    /// `objectClass` is normalized to a set whatever shape it is given in.
    pub fn insert(
        &mut self,
        name: impl Into<AttributeName>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        let name = name.into();
        let value = value.into();
        let value = if name.is_object_class() {
            AttributeValue::ObjectClasses(value.into_object_classes())
        } else {
            value
        };
        self.attributes.insert(name, value)
    }

    /// Looks up an attribute ignoring ASCII case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(&AttributeName::from(name))
    }

    /// Returns true if the attribute is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Removes an attribute.
    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(&AttributeName::from(name))
    }

    /// Object classes of the entry, if present.
    #[must_use]
    pub fn object_classes(&self) -> Option<&BTreeSet<String>> {
        match self.get(OBJECT_CLASS) {
            Some(AttributeValue::ObjectClasses(classes)) => Some(classes),
            _ => None,
        }
    }

    /// Number of attributes; the DN is not counted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns true when the entry has no attributes, whether or not it has a DN.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterates over attributes in case-insensitive name order.
    pub fn iter(&self) -> impl Iterator<Item = (&AttributeName, &AttributeValue)> + '_ {
        self.attributes.iter()
    }

    /// Merges `other` into this entry.
    ///
    /// Attributes present in `other` replace those of the same name; the DN of `self` wins when
    /// both carry one.
    pub fn merge(&mut self, other: Entry) {
        if self.dn.is_none() {
            self.dn = other.dn;
        }
        self.attributes.extend(other.attributes);
    }
}

impl<K, V> FromIterator<(K, V)> for Entry
where
    K: Into<AttributeName>,
    V: Into<AttributeValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut entry = Self::new();
        for (name, value) in iter {
            entry.insert(name, value);
        }
        entry
    }
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.attributes.len() + usize::from(self.dn.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(dn) = &self.dn {
            map.serialize_entry(DN_KEY, dn)?;
        }
        for (name, value) in &self.attributes {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
