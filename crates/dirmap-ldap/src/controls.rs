//! Request and response controls.
//!
//! Request controls are built from [`OperationOptions`] by [`attach`] and encoded with
//! [`Control::to_wire`]. Response controls are decoded by [`parse_response`] and folded into an
//! [`Outcome`] by [`merge_response`].

use crate::asn1;
use crate::codec::{self, ByteValued};
use crate::outcome::Outcome;
use dirmap_core::entry::Entry;
use dirmap_core::error::Error;
use dirmap_core::{ResultCode, Result};
use ldap3::asn1::{Boolean, Enumerated, OctetString, StructureTag, Tag, TagClass, Types};
use ldap3::controls::{PagedResults, PostRead, PreRead, ProxyAuth, RawControl};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Pre-read control (RFC 4527).
pub const PRE_READ_OID: &str = "1.3.6.1.1.13.1";
/// Post-read control (RFC 4527).
pub const POST_READ_OID: &str = "1.3.6.1.1.13.2";
/// Proxied authorization v2 control (RFC 4370).
pub const PROXIED_AUTHORIZATION_OID: &str = "2.16.840.1.113730.3.4.18";
/// Subtree delete control.
pub const SUBTREE_DELETE_OID: &str = "1.2.840.113556.1.4.805";
/// Server-side sort request control (RFC 2891).
pub const SORT_REQUEST_OID: &str = "1.2.840.113556.1.4.473";
/// Server-side sort response control (RFC 2891).
pub const SORT_RESPONSE_OID: &str = "1.2.840.113556.1.4.474";
/// Simple paged results control (RFC 2696).
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// A control as carried on the wire: OID, criticality, and an optional encoded value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireControl {
    /// Control type.
    pub oid: String,
    /// Whether the server must reject the operation if it does not support the control.
    #[serde(default)]
    pub critical: bool,
    /// BER-encoded control value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
}

impl WireControl {
    /// Creates a control.
    #[must_use]
    pub fn new(oid: impl Into<String>, critical: bool, value: Option<Vec<u8>>) -> Self {
        Self {
            oid: oid.into(),
            critical,
            value,
        }
    }
}

impl From<RawControl> for WireControl {
    fn from(raw: RawControl) -> Self {
        Self::new(raw.ctype, raw.crit, raw.val)
    }
}

impl From<WireControl> for RawControl {
    fn from(control: WireControl) -> Self {
        RawControl {
            ctype: control.oid,
            crit: control.critical,
            val: control.value,
        }
    }
}

/// Authorization identity for proxied authorization: `dn:<DN>` or `u:<user id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AuthzId(String);

impl AuthzId {
    /// Parses an authorization identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] unless the identity starts with `dn:` or `u:`.
    pub fn parse(identity: impl Into<String>) -> Result<Self> {
        let identity = identity.into();
        if identity.starts_with("dn:") || identity.starts_with("u:") {
            Ok(Self(identity))
        } else {
            Err(Error::InvalidArgument(format!(
                "authorization identity `{identity}` must start with `dn:` or `u:`"
            )))
        }
    }

    /// Borrows the identity.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AuthzId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<AuthzId> for String {
    fn from(value: AuthzId) -> Self {
        value.0
    }
}

impl fmt::Display for AuthzId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction of one sort key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

impl SortDirection {
    /// Parses a direction keyword; anything unrecognized is ascending.
    #[must_use]
    pub fn parse_lenient(keyword: Option<&str>) -> Self {
        match keyword {
            Some(word) if word.eq_ignore_ascii_case("descending") => Self::Descending,
            _ => Self::Ascending,
        }
    }
}

/// One server-side sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Attribute to sort on.
    pub attribute: String,
    /// Sort direction.
    pub direction: SortDirection,
}

/// Server-side sort request as supplied by callers.
///
/// `sort_keys` alternates attribute names and directions: `["sn", "descending", "cn",
/// "ascending"]`. A trailing name without a direction sorts ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SortSpec {
    /// Criticality of the control; non-critical when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_critical: Option<bool>,
    /// Flattened `name, direction` pairs.
    pub sort_keys: Vec<String>,
}

impl SortSpec {
    /// Creates a sort specification from flattened pairs.
    #[must_use]
    pub fn new<I, S>(sort_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            is_critical: None,
            sort_keys: sort_keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Sets the criticality, builder style.
    #[must_use]
    pub const fn critical(mut self, critical: bool) -> Self {
        self.is_critical = Some(critical);
        self
    }
}

/// A request control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Return the named attributes of the entry as it was before the operation.
    PreRead(Vec<String>),
    /// Return the named attributes of the entry as it is after the operation.
    PostRead(Vec<String>),
    /// Perform the operation as another identity.
    ProxiedAuthorization(AuthzId),
    /// Delete the target entry together with its subordinates.
    SubtreeDelete,
    /// Ask the server to sort search results.
    ServerSideSort {
        /// Ordered, non-empty key list.
        keys: Vec<SortKey>,
        /// Criticality of the control.
        critical: bool,
    },
    /// Forwarded verbatim.
    Passthrough(WireControl),
}

impl Control {
    /// Encodes the control for the transport.
    #[must_use]
    pub fn to_wire(&self) -> WireControl {
        match self {
            Self::PreRead(attributes) => PreRead::new(attributes.clone()).into(),
            Self::PostRead(attributes) => PostRead::new(attributes.clone()).into(),
            Self::ProxiedAuthorization(identity) => RawControl::from(ProxyAuth {
                authzid: identity.to_string(),
            })
            .into(),
            Self::SubtreeDelete => WireControl::new(SUBTREE_DELETE_OID, true, None),
            Self::ServerSideSort { keys, critical } => WireControl::new(
                SORT_REQUEST_OID,
                *critical,
                Some(asn1::encode(sort_key_list(keys))),
            ),
            Self::Passthrough(control) => control.clone(),
        }
    }
}

/// `SortKeyList` of RFC 2891; ascending keys omit `reverseOrder`.
fn sort_key_list(keys: &[SortKey]) -> Tag {
    asn1::sequence_of(
        keys.iter()
            .map(|key| {
                let mut parts = vec![asn1::octets(key.attribute.as_bytes())];
                if key.direction == SortDirection::Descending {
                    parts.push(Tag::Boolean(Boolean {
                        id: 1,
                        class: TagClass::Context,
                        inner: true,
                    }));
                }
                asn1::sequence_of(parts)
            })
            .collect(),
    )
}

/// Builds a server-side sort control.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] when no sort key is given.
pub fn build_sort_control(spec: &SortSpec) -> Result<Control> {
    let keys: Vec<SortKey> = spec
        .sort_keys
        .chunks(2)
        .filter(|pair| !pair[0].is_empty())
        .map(|pair| SortKey {
            attribute: pair[0].clone(),
            direction: SortDirection::parse_lenient(pair.get(1).map(String::as_str)),
        })
        .collect();

    if keys.is_empty() {
        return Err(Error::InvalidArgument(
            "server-side sort requires at least one sort key".to_string(),
        ));
    }

    Ok(Control::ServerSideSort {
        keys,
        critical: spec.is_critical.unwrap_or(false),
    })
}

/// Builds a paged-results request control for one page.
pub(crate) fn paged_results_control(page_size: u32, cookie: &[u8]) -> WireControl {
    RawControl::from(PagedResults {
        size: i32::try_from(page_size).unwrap_or(i32::MAX),
        cookie: cookie.to_vec(),
    })
    .into()
}

/// Operation a set of controls is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Add request.
    Add,
    /// Modify request.
    Modify,
    /// Modify DN request.
    ModifyDn,
    /// Delete request.
    Delete,
    /// Compare request.
    Compare,
    /// Search request.
    Search,
    /// Extended request.
    Extended,
}

/// Per-operation options recognized by the control pipeline.
///
/// Unknown keys are ignored when deserializing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OperationOptions {
    /// Attributes to read before the change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_read: Option<Vec<String>>,
    /// Attributes to read after the change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_read: Option<Vec<String>>,
    /// Identity to act as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxied_auth: Option<AuthzId>,
    /// Delete the whole subtree; only honoured by delete.
    pub delete_subtree: bool,
    /// Attributes decoded as raw bytes in pre/post-read entries.
    pub byte_valued: ByteValued,
    /// Extra controls forwarded verbatim.
    pub controls: Vec<WireControl>,
}

impl OperationOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for malformed JSON or an invalid authorization identity.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Requests a pre-read of `attributes`.
    #[must_use]
    pub fn with_pre_read<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pre_read = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    /// Requests a post-read of `attributes`.
    #[must_use]
    pub fn with_post_read<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.post_read = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    /// Runs the operation as `identity`.
    #[must_use]
    pub fn with_proxied_auth(mut self, identity: AuthzId) -> Self {
        self.proxied_auth = Some(identity);
        self
    }

    /// Deletes the target together with its subordinates.
    #[must_use]
    pub const fn with_delete_subtree(mut self) -> Self {
        self.delete_subtree = true;
        self
    }

    /// Decodes the named attributes as raw bytes.
    #[must_use]
    pub fn with_byte_valued(mut self, byte_valued: ByteValued) -> Self {
        self.byte_valued = byte_valued;
        self
    }

    /// Forwards an extra control verbatim.
    #[must_use]
    pub fn with_control(mut self, control: WireControl) -> Self {
        self.controls.push(control);
        self
    }
}

/// Builds the request controls for an operation.
#[must_use]
pub fn attach(kind: OperationKind, options: &OperationOptions) -> Vec<Control> {
    let mut controls = Vec::new();
    if let Some(attributes) = &options.pre_read {
        controls.push(Control::PreRead(attributes.clone()));
    }
    if let Some(attributes) = &options.post_read {
        controls.push(Control::PostRead(attributes.clone()));
    }
    if let Some(identity) = &options.proxied_auth {
        controls.push(Control::ProxiedAuthorization(identity.clone()));
    }
    if options.delete_subtree && kind == OperationKind::Delete {
        controls.push(Control::SubtreeDelete);
    }
    controls.extend(options.controls.iter().cloned().map(Control::Passthrough));
    controls
}

/// Encodes a list of request controls.
#[must_use]
pub fn to_wire_controls(controls: &[Control]) -> Vec<WireControl> {
    controls.iter().map(Control::to_wire).collect()
}

/// A decoded response control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseControl {
    /// Entry state before the operation.
    PreRead(Entry),
    /// Entry state after the operation.
    PostRead(Entry),
    /// Paged-results state.
    PagedResults {
        /// Server estimate of the result size (0 if unknown).
        size: i64,
        /// Continuation cookie; empty when the search is complete.
        cookie: Vec<u8>,
    },
    /// Server-side sort outcome.
    SortResult {
        /// Sort result code.
        code: ResultCode,
        /// Attribute that caused a failure, if reported.
        attribute: Option<String>,
    },
    /// Any control this layer does not interpret.
    Other(WireControl),
}

impl ResponseControl {
    /// Encodes the control as a server would send it.
    ///
    /// Used by in-memory providers; pre/post-read entries are encoded without a DN.
    #[must_use]
    pub fn to_wire(&self) -> WireControl {
        match self {
            Self::PreRead(entry) => WireControl::new(PRE_READ_OID, false, Some(encode_read_entry(entry))),
            Self::PostRead(entry) => {
                WireControl::new(POST_READ_OID, false, Some(encode_read_entry(entry)))
            }
            Self::PagedResults { size, cookie } => RawControl::from(PagedResults {
                size: i32::try_from(*size).unwrap_or(i32::MAX),
                cookie: cookie.clone(),
            })
            .into(),
            Self::SortResult { code, attribute } => {
                let mut parts = vec![Tag::Enumerated(Enumerated {
                    inner: i64::from(code.value()),
                    ..Default::default()
                })];
                if let Some(attribute) = attribute {
                    parts.push(Tag::OctetString(OctetString {
                        id: 0,
                        class: TagClass::Context,
                        inner: attribute.as_bytes().to_vec(),
                    }));
                }
                WireControl::new(
                    SORT_RESPONSE_OID,
                    false,
                    Some(asn1::encode(asn1::sequence_of(parts))),
                )
            }
            Self::Other(control) => control.clone(),
        }
    }
}

fn encode_read_entry(entry: &Entry) -> Vec<u8> {
    let attributes = codec::encode(entry);
    asn1::encode(asn1::search_result_entry(
        entry.dn().unwrap_or_default(),
        &attributes,
    ))
}

fn decode_read_entry(value: &[u8], byte_valued: &ByteValued) -> Result<Entry> {
    let entry = asn1::parse_search_result_entry(asn1::parse(value, "read entry control")?)?;
    Ok(codec::decode_attributes(&entry.attributes, byte_valued))
}

fn decode_paged_results(value: &[u8]) -> Result<ResponseControl> {
    let value = asn1::parse(value, "paged results control")?;
    let mut parts = asn1::sequence(value, "paged results control")?.into_iter();
    let size = asn1::unsigned(parts.next(), Types::Integer, "result size estimate")?;
    let cookie = asn1::octet_string(parts.next(), "paging cookie")?;
    Ok(ResponseControl::PagedResults {
        size: i64::try_from(size)
            .map_err(|_| Error::Decode(format!("result size estimate {size} out of range")))?,
        cookie,
    })
}

fn decode_sort_result(value: &[u8]) -> Result<ResponseControl> {
    let value = asn1::parse(value, "sort result control")?;
    let mut parts = asn1::sequence(value, "sort result control")?.into_iter();
    let code = asn1::unsigned(parts.next(), Types::Enumerated, "sort result code")?;
    let code = u32::try_from(code)
        .map_err(|_| Error::Decode(format!("sort result code {code} out of range")))?;
    let attribute = parts
        .next()
        .and_then(|tag| asn1::context(tag, 0))
        .and_then(StructureTag::expect_primitive)
        .map(|raw| String::from_utf8_lossy(&raw).into_owned());
    Ok(ResponseControl::SortResult {
        code: ResultCode::new(code),
        attribute,
    })
}

/// Decodes one response control.
///
/// # Errors
///
/// Returns [`Error::Decode`] when a recognized control carries a missing or malformed value.
pub fn parse_response(control: &WireControl, byte_valued: &ByteValued) -> Result<ResponseControl> {
    let known = [PRE_READ_OID, POST_READ_OID, PAGED_RESULTS_OID, SORT_RESPONSE_OID];
    if !known.contains(&control.oid.as_str()) {
        return Ok(ResponseControl::Other(control.clone()));
    }

    let value = control
        .value
        .as_deref()
        .ok_or_else(|| Error::Decode(format!("response control {} has no value", control.oid)))?;

    match control.oid.as_str() {
        PRE_READ_OID => decode_read_entry(value, byte_valued).map(ResponseControl::PreRead),
        POST_READ_OID => decode_read_entry(value, byte_valued).map(ResponseControl::PostRead),
        PAGED_RESULTS_OID => decode_paged_results(value),
        _ => decode_sort_result(value),
    }
}

/// Decodes every response control of a reply.
///
/// A sort result that cannot be decoded is informational only; it is logged and kept as
/// [`ResponseControl::Other`].
///
/// # Errors
///
/// Propagates the first failure to decode a pre-read, post-read, or paged-results control.
pub fn parse_responses(
    controls: &[WireControl],
    byte_valued: &ByteValued,
) -> Result<Vec<ResponseControl>> {
    controls
        .iter()
        .map(|control| match parse_response(control, byte_valued) {
            Err(err) if control.oid == SORT_RESPONSE_OID => {
                warn!(oid = %control.oid, "ignoring undecodable sort result: {err}");
                Ok(ResponseControl::Other(control.clone()))
            }
            parsed => parsed,
        })
        .collect()
}

/// Merges pre/post-read entries into `outcome`; other controls are ignored.
pub fn merge_response(outcome: &mut Outcome, controls: Vec<ResponseControl>) {
    for control in controls {
        match control {
            ResponseControl::PreRead(entry) => merge_into(&mut outcome.pre_read, entry),
            ResponseControl::PostRead(entry) => merge_into(&mut outcome.post_read, entry),
            _ => {}
        }
    }
}

fn merge_into(slot: &mut Option<Entry>, entry: Entry) {
    match slot {
        Some(existing) => existing.merge(entry),
        None => *slot = Some(entry),
    }
}

/// Returns the paging cookie carried by `controls`, if any.
pub(crate) fn paging_cookie(controls: &[ResponseControl]) -> Option<&[u8]> {
    controls.iter().find_map(|control| match control {
        ResponseControl::PagedResults { cookie, .. } => Some(cookie.as_slice()),
        _ => None,
    })
}
