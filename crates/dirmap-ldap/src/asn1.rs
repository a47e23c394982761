//! Checked access to `ldap3`'s ASN.1 structures.
//!
//! `ldap3` parses response values with `expect`, so a malformed control or entry would abort the
//! task. Values here are parsed with [`parse_tag`] and walked through the `Option`-returning
//! accessors of [`StructureTag`]; anything unexpected becomes [`Error::Decode`].

use crate::codec::{WireAttribute, WireEntry};
use bytes::BytesMut;
use dirmap_core::error::Error;
use dirmap_core::Result;
use ldap3::asn1::{
    parse_tag, parse_uint, write, ASNTag, OctetString, Sequence, Set, StructureTag, Tag, TagClass,
    Types,
};

/// `[APPLICATION 4]` SearchResultEntry.
const SEARCH_RESULT_ENTRY: u64 = 4;

/// BER-encodes a tag.
pub(crate) fn encode(tag: Tag) -> Vec<u8> {
    let mut buf = BytesMut::new();
    // lber writes into an in-memory buffer; the io::Result is never an error.
    let _ = write::encode_into(&mut buf, tag.into_structure());
    buf.to_vec()
}

/// Parses one BER element.
pub(crate) fn parse(value: &[u8], what: &str) -> Result<StructureTag> {
    parse_tag(value)
        .map(|(_, tag)| tag)
        .map_err(|_| Error::Decode(format!("malformed {what}")))
}

fn universal(tag: StructureTag, id: Types) -> Option<StructureTag> {
    tag.match_class(TagClass::Universal)
        .and_then(|tag| tag.match_id(id as u64))
}

pub(crate) fn context(tag: StructureTag, id: u64) -> Option<StructureTag> {
    tag.match_class(TagClass::Context).and_then(|tag| tag.match_id(id))
}

/// Children of a SEQUENCE.
pub(crate) fn sequence(tag: StructureTag, what: &str) -> Result<Vec<StructureTag>> {
    universal(tag, Types::Sequence)
        .and_then(StructureTag::expect_constructed)
        .ok_or_else(|| Error::Decode(format!("{what} is not a sequence")))
}

/// Contents of an OCTET STRING.
pub(crate) fn octet_string(tag: Option<StructureTag>, what: &str) -> Result<Vec<u8>> {
    tag.and_then(|tag| universal(tag, Types::OctetString))
        .and_then(StructureTag::expect_primitive)
        .ok_or_else(|| Error::Decode(format!("{what} is not an octet string")))
}

/// Non-negative INTEGER or ENUMERATED value.
pub(crate) fn unsigned(tag: Option<StructureTag>, id: Types, what: &str) -> Result<u64> {
    let raw = tag
        .and_then(|tag| universal(tag, id))
        .and_then(StructureTag::expect_primitive)
        .filter(|raw| !raw.is_empty() && raw.len() <= 8)
        .ok_or_else(|| Error::Decode(format!("{what} is not a small integer")))?;
    parse_uint(&raw)
        .map(|(_, value)| value)
        .map_err(|_| Error::Decode(format!("malformed {what}")))
}

pub(crate) fn octets(inner: impl Into<Vec<u8>>) -> Tag {
    Tag::OctetString(OctetString {
        inner: inner.into(),
        ..Default::default()
    })
}

pub(crate) fn sequence_of(inner: Vec<Tag>) -> Tag {
    Tag::Sequence(Sequence {
        inner,
        ..Default::default()
    })
}

/// Encodes an entry as a SearchResultEntry.
pub(crate) fn search_result_entry(dn: &str, attributes: &[WireAttribute]) -> Tag {
    let attributes = attributes
        .iter()
        .map(|attribute| {
            sequence_of(vec![
                octets(attribute.name.as_bytes()),
                Tag::Set(Set {
                    inner: attribute.values.iter().map(|value| octets(value.as_slice())).collect(),
                    ..Default::default()
                }),
            ])
        })
        .collect();

    Tag::Sequence(Sequence {
        id: SEARCH_RESULT_ENTRY,
        class: TagClass::Application,
        inner: vec![octets(dn.as_bytes()), sequence_of(attributes)],
    })
}

/// Decodes a SearchResultEntry, keeping values as raw bytes in server order.
pub(crate) fn parse_search_result_entry(tag: StructureTag) -> Result<WireEntry> {
    let mut parts = tag
        .match_class(TagClass::Application)
        .and_then(|tag| tag.match_id(SEARCH_RESULT_ENTRY))
        .and_then(StructureTag::expect_constructed)
        .ok_or_else(|| Error::Decode("expected a search result entry".to_string()))?
        .into_iter();

    let dn = octet_string(parts.next(), "entry DN")?;
    let list = parts
        .next()
        .ok_or_else(|| Error::Decode("entry has no attribute list".to_string()))?;

    let mut attributes = Vec::new();
    for attribute in sequence(list, "attribute list")? {
        let mut attribute = sequence(attribute, "attribute")?.into_iter();
        let name = octet_string(attribute.next(), "attribute description")?;
        let values = attribute
            .next()
            .and_then(|tag| universal(tag, Types::Set))
            .and_then(StructureTag::expect_constructed)
            .ok_or_else(|| Error::Decode("attribute values are not a set".to_string()))?
            .into_iter()
            .map(|value| octet_string(Some(value), "attribute value"))
            .collect::<Result<Vec<_>>>()?;
        attributes.push(WireAttribute {
            name: String::from_utf8_lossy(&name).into_owned(),
            values,
        });
    }

    Ok(WireEntry {
        dn: String::from_utf8_lossy(&dn).into_owned(),
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldap3::asn1::{Enumerated, Integer};

    #[test]
    fn entries_keep_raw_values_in_order() {
        let photo = vec![0xff, 0xd8, 0x00, 0x10];
        let attributes = vec![
            WireAttribute::new("uid", ["jdoe"]),
            WireAttribute::new("jpegPhoto", [photo.clone()]),
            WireAttribute::new("cn", ["Jane", "J. Doe"]),
        ];
        let encoded = encode(search_result_entry("uid=jdoe,dc=example,dc=com", &attributes));

        let entry = parse_search_result_entry(parse(&encoded, "entry").unwrap()).unwrap();
        assert_eq!(entry.dn, "uid=jdoe,dc=example,dc=com");
        assert_eq!(entry.attributes, attributes);
        assert_eq!(entry.attributes[1].values[0], photo);
    }

    #[test]
    fn malformed_entries_are_decode_errors() {
        let not_an_entry = encode(sequence_of(vec![octets("dn")]));
        assert!(matches!(
            parse_search_result_entry(parse(&not_an_entry, "entry").unwrap()),
            Err(Error::Decode(_))
        ));

        let missing_attributes = encode(Tag::Sequence(Sequence {
            id: SEARCH_RESULT_ENTRY,
            class: TagClass::Application,
            inner: vec![octets("dn")],
        }));
        assert!(matches!(
            parse_search_result_entry(parse(&missing_attributes, "entry").unwrap()),
            Err(Error::Decode(_))
        ));

        assert!(matches!(parse(&[0x30, 0x05, 0x04], "value"), Err(Error::Decode(_))));
    }

    #[test]
    fn integers_and_enumerations_decode() {
        let value = encode(sequence_of(vec![
            Tag::Integer(Integer {
                inner: 1200,
                ..Default::default()
            }),
            Tag::Enumerated(Enumerated {
                inner: 16,
                ..Default::default()
            }),
        ]));
        let mut parts = sequence(parse(&value, "value").unwrap(), "value")
            .unwrap()
            .into_iter();
        assert_eq!(unsigned(parts.next(), Types::Integer, "size").unwrap(), 1200);
        assert_eq!(unsigned(parts.next(), Types::Enumerated, "code").unwrap(), 16);
        assert!(unsigned(parts.next(), Types::Integer, "missing").is_err());
    }
}
