//! Modification requests built from categorized change-sets.

use dirmap_core::entry::{AttributeName, Value};
use dirmap_core::error::Error;
use dirmap_core::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a single modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModKind {
    /// Add values.
    Add,
    /// Delete values, or the whole attribute.
    Delete,
    /// Replace all values.
    Replace,
    /// Increment a numeric value.
    Increment,
}

impl fmt::Display for ModKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Replace => "replace",
            Self::Increment => "increment",
        };
        f.write_str(name)
    }
}

/// A value supplied by the caller for one attribute of a change-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModValue {
    /// One scalar value.
    One(Value),
    /// A collection of values.
    Many(Vec<Value>),
    /// Every value of the attribute; only meaningful for deletions.
    AllValues,
}

impl From<Value> for ModValue {
    fn from(value: Value) -> Self {
        Self::One(value)
    }
}

impl From<&str> for ModValue {
    fn from(value: &str) -> Self {
        Self::One(value.into())
    }
}

impl From<String> for ModValue {
    fn from(value: String) -> Self {
        Self::One(value.into())
    }
}

impl From<Vec<u8>> for ModValue {
    fn from(value: Vec<u8>) -> Self {
        Self::One(Value::Binary(value))
    }
}

impl From<i64> for ModValue {
    fn from(value: i64) -> Self {
        Self::One(value.into())
    }
}

impl From<bool> for ModValue {
    fn from(value: bool) -> Self {
        Self::One(value.into())
    }
}

impl From<Vec<Value>> for ModValue {
    fn from(values: Vec<Value>) -> Self {
        Self::Many(values)
    }
}

impl From<Vec<&str>> for ModValue {
    fn from(values: Vec<&str>) -> Self {
        Self::Many(values.into_iter().map(Value::from).collect())
    }
}

impl From<Vec<String>> for ModValue {
    fn from(values: Vec<String>) -> Self {
        Self::Many(values.into_iter().map(Value::from).collect())
    }
}

impl From<Vec<Vec<u8>>> for ModValue {
    fn from(values: Vec<Vec<u8>>) -> Self {
        Self::Many(values.into_iter().map(Value::Binary).collect())
    }
}

/// Payload carried by a [`Modification`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModPayload {
    /// One textual value.
    Text(String),
    /// Several textual values.
    TextMulti(Vec<String>),
    /// One binary value.
    Binary(Vec<u8>),
    /// Several binary values.
    BinaryMulti(Vec<Vec<u8>>),
    /// No payload: every value of the attribute is removed.
    AllValues,
}

impl ModPayload {
    /// Raw value bytes as sent on the wire; empty for [`ModPayload::AllValues`].
    #[must_use]
    pub fn to_wire_values(&self) -> Vec<Vec<u8>> {
        match self {
            Self::Text(text) => vec![text.as_bytes().to_vec()],
            Self::TextMulti(texts) => texts.iter().map(|text| text.as_bytes().to_vec()).collect(),
            Self::Binary(bytes) => vec![bytes.clone()],
            Self::BinaryMulti(values) => values.clone(),
            Self::AllValues => Vec::new(),
        }
    }
}

/// One atomic modification of one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    /// Operation kind.
    pub kind: ModKind,
    /// Target attribute.
    pub attribute: AttributeName,
    /// Values to apply.
    pub payload: ModPayload,
}

impl Modification {
    /// Classifies a caller value into a modification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when "all values" is used with anything but
    /// [`ModKind::Delete`], or when an increment does not carry exactly one textual value.
    pub fn new(
        kind: ModKind,
        attribute: impl Into<AttributeName>,
        value: impl Into<ModValue>,
    ) -> Result<Self> {
        let attribute = attribute.into();
        let payload = match value.into() {
            ModValue::Many(values) if !values.is_empty() && values.iter().all(Value::is_binary) => {
                ModPayload::BinaryMulti(values.into_iter().map(Value::into_bytes).collect())
            }
            ModValue::Many(values) => {
                ModPayload::TextMulti(values.iter().map(Value::to_text_lossy).collect())
            }
            ModValue::AllValues if kind == ModKind::Delete => ModPayload::AllValues,
            ModValue::AllValues => {
                return Err(Error::InvalidArgument(format!(
                    "\"all values\" is only valid for delete, not {kind} of `{attribute}`"
                )));
            }
            ModValue::One(Value::Binary(bytes)) => ModPayload::Binary(bytes),
            ModValue::One(Value::Text(text)) => ModPayload::Text(text),
        };

        if kind == ModKind::Increment && !matches!(payload, ModPayload::Text(_)) {
            return Err(Error::InvalidArgument(format!(
                "increment of `{attribute}` requires exactly one textual value"
            )));
        }

        Ok(Self {
            kind,
            attribute,
            payload,
        })
    }

    /// Shorthand for a delete of every value of `attribute`.
    #[must_use]
    pub fn delete_all(attribute: impl Into<AttributeName>) -> Self {
        Self {
            kind: ModKind::Delete,
            attribute: attribute.into(),
            payload: ModPayload::AllValues,
        }
    }
}

/// Categorized change-set: each category keeps its own insertion order.
///
/// ```
/// use dirmap_ldap::ChangeSet;
///
/// let changes = ChangeSet::new()
///     .replace("mail", "jdoe@example.com")
///     .add("memberOf", vec!["cn=staff,ou=Groups,dc=example,dc=com"])
///     .delete_all("description");
/// let mods = changes.build().unwrap();
/// assert_eq!(mods.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    add: Vec<(AttributeName, ModValue)>,
    delete: Vec<(AttributeName, ModValue)>,
    replace: Vec<(AttributeName, ModValue)>,
    increment: Vec<(AttributeName, ModValue)>,
}

impl ChangeSet {
    /// Creates an empty change-set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues values to add.
    #[must_use]
    pub fn add(mut self, attribute: impl Into<AttributeName>, value: impl Into<ModValue>) -> Self {
        self.add.push((attribute.into(), value.into()));
        self
    }

    /// Queues values to delete.
    #[must_use]
    pub fn delete(mut self, attribute: impl Into<AttributeName>, value: impl Into<ModValue>) -> Self {
        self.delete.push((attribute.into(), value.into()));
        self
    }

    /// Queues removal of the whole attribute.
    #[must_use]
    pub fn delete_all(mut self, attribute: impl Into<AttributeName>) -> Self {
        self.delete.push((attribute.into(), ModValue::AllValues));
        self
    }

    /// Queues a replacement.
    #[must_use]
    pub fn replace(
        mut self,
        attribute: impl Into<AttributeName>,
        value: impl Into<ModValue>,
    ) -> Self {
        self.replace.push((attribute.into(), value.into()));
        self
    }

    /// Queues an increment by `delta`.
    #[must_use]
    pub fn increment(
        mut self,
        attribute: impl Into<AttributeName>,
        delta: impl Into<ModValue>,
    ) -> Self {
        self.increment.push((attribute.into(), delta.into()));
        self
    }

    /// Returns true if nothing was queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty()
            && self.delete.is_empty()
            && self.replace.is_empty()
            && self.increment.is_empty()
    }

    /// Emits the modifications: adds, then deletes, then replaces, then increments.
    ///
    /// # Errors
    ///
    /// Propagates classification failures from [`Modification::new`].
    pub fn build(self) -> Result<Vec<Modification>> {
        let categories = [
            (ModKind::Add, self.add),
            (ModKind::Delete, self.delete),
            (ModKind::Replace, self.replace),
            (ModKind::Increment, self.increment),
        ];

        categories
            .into_iter()
            .flat_map(|(kind, pairs)| pairs.into_iter().map(move |(name, value)| (kind, name, value)))
            .map(|(kind, name, value)| Modification::new(kind, name, value))
            .collect()
    }
}

/// Changes accepted by modify: a categorized change-set or an explicit ordered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Changes {
    /// Emitted in the fixed category order.
    Categorized(ChangeSet),
    /// Emitted exactly as given.
    Ordered(Vec<Modification>),
}

impl Changes {
    /// Resolves the changes into the modification list sent to the server.
    ///
    /// # Errors
    ///
    /// Propagates [`ChangeSet::build`] failures.
    pub fn into_modifications(self) -> Result<Vec<Modification>> {
        match self {
            Self::Categorized(set) => set.build(),
            Self::Ordered(mods) => Ok(mods),
        }
    }
}

impl From<ChangeSet> for Changes {
    fn from(set: ChangeSet) -> Self {
        Self::Categorized(set)
    }
}

impl From<Vec<Modification>> for Changes {
    fn from(mods: Vec<Modification>) -> Self {
        Self::Ordered(mods)
    }
}

impl From<Modification> for Changes {
    fn from(modification: Modification) -> Self {
        Self::Ordered(vec![modification])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_emitted_in_fixed_order() {
        let mods = ChangeSet::new()
            .increment("uidNumber", 1_i64)
            .replace("sn", "Doe")
            .delete("mail", "old@example.com")
            .add("mail", "new@example.com")
            .add("cn", "Jane")
            .build()
            .unwrap();

        let order: Vec<_> = mods
            .iter()
            .map(|m| (m.kind, m.attribute.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (ModKind::Add, "mail"),
                (ModKind::Add, "cn"),
                (ModKind::Delete, "mail"),
                (ModKind::Replace, "sn"),
                (ModKind::Increment, "uidNumber"),
            ]
        );
    }

    #[test]
    fn values_are_classified_by_shape() {
        let mods = ChangeSet::new()
            .add("certs", vec![vec![0x30_u8], vec![0x31_u8]])
            .add("mail", vec!["a@example.com", "b@example.com"])
            .add("photo", vec![0xff_u8, 0xd8])
            .add("active", true)
            .add("uidNumber", 1000_i64)
            .build()
            .unwrap();

        assert_eq!(
            mods[0].payload,
            ModPayload::BinaryMulti(vec![vec![0x30], vec![0x31]])
        );
        assert_eq!(
            mods[1].payload,
            ModPayload::TextMulti(vec!["a@example.com".into(), "b@example.com".into()])
        );
        assert_eq!(mods[2].payload, ModPayload::Binary(vec![0xff, 0xd8]));
        assert_eq!(mods[3].payload, ModPayload::Text("TRUE".into()));
        assert_eq!(mods[4].payload, ModPayload::Text("1000".into()));
    }

    #[test]
    fn mixed_collections_are_stringified() {
        let modification = Modification::new(
            ModKind::Replace,
            "description",
            vec![Value::from("a"), Value::Binary(b"b".to_vec())],
        )
        .unwrap();
        assert_eq!(
            modification.payload,
            ModPayload::TextMulti(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn all_values_is_only_valid_for_delete() {
        let mods = ChangeSet::new().delete_all("description").build().unwrap();
        assert_eq!(mods[0].payload, ModPayload::AllValues);
        assert!(mods[0].payload.to_wire_values().is_empty());

        let err = Modification::new(ModKind::Replace, "description", ModValue::AllValues)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn increment_requires_one_textual_value() {
        assert!(Modification::new(ModKind::Increment, "uidNumber", "5").is_ok());
        assert!(matches!(
            Modification::new(ModKind::Increment, "uidNumber", vec!["1", "2"]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Modification::new(ModKind::Increment, "uidNumber", vec![0x01_u8]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn ordered_lists_are_kept_verbatim() {
        let ordered = vec![
            Modification::new(ModKind::Replace, "sn", "Doe").unwrap(),
            Modification::new(ModKind::Add, "cn", "Jane").unwrap(),
        ];
        let mods = Changes::from(ordered.clone()).into_modifications().unwrap();
        assert_eq!(mods, ordered);
    }
}
