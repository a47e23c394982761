//! Search options and their resolution into canonical search criteria.

use crate::codec::ByteValued;
use crate::controls::{self, build_sort_control, AuthzId, Control, ResponseControl, SortSpec, WireControl};
use crate::transport::SearchRequest;
use dirmap_core::error::Error;
use dirmap_core::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Filter used when none is given.
pub const DEFAULT_FILTER: &str = "(objectclass=*)";

/// Attribute selector meaning "all user attributes".
pub const ALL_USER_ATTRIBUTES: &str = "*";

/// Breadth of a search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// The base entry only.
    Base,
    /// Immediate children of the base.
    One,
    /// The base and everything below it.
    #[default]
    Sub,
    /// Everything below the base, excluding the base itself.
    Subordinate,
}

impl Scope {
    /// Protocol enumeration value of the scope.
    #[must_use]
    pub const fn protocol_value(self) -> u8 {
        match self {
            Self::Base => 0,
            Self::One => 1,
            Self::Sub => 2,
            Self::Subordinate => 3,
        }
    }

    /// Keyword accepted in search options.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::One => "one",
            Self::Sub => "sub",
            Self::Subordinate => "subordinate",
        }
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(keyword: &str) -> Result<Self> {
        [Self::Base, Self::One, Self::Sub, Self::Subordinate]
            .into_iter()
            .find(|scope| scope.as_str().eq_ignore_ascii_case(keyword))
            .ok_or_else(|| Error::InvalidArgument(format!("unknown search scope `{keyword}`")))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes requested from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeSelection {
    /// Every user attribute.
    AllUser,
    /// Exactly the named attributes.
    Named(Vec<String>),
}

impl AttributeSelection {
    /// Attribute list as sent to the server.
    #[must_use]
    pub fn to_request_list(&self) -> Vec<String> {
        match self {
            Self::AllUser => vec![ALL_USER_ATTRIBUTES.to_string()],
            Self::Named(names) => names.clone(),
        }
    }
}

/// Callback receiving the response controls of a search.
pub type ResponseCallback = Arc<dyn Fn(&[ResponseControl]) + Send + Sync>;

/// Caller-facing search options; every field is optional.
///
/// Deserializes from kebab-case keys (`size-limit`, `server-sort`, ...). Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SearchOptions {
    /// Search scope; subtree when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    /// Search filter; `(objectclass=*)` when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Requested attributes; all user attributes when empty.
    pub attributes: Vec<String>,
    /// Entry limit; 0 when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_limit: Option<u32>,
    /// Time limit in seconds; 0 when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u32>,
    /// Return attribute names only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub types_only: Option<bool>,
    /// Attributes decoded as raw bytes.
    pub byte_valued: ByteValued,
    /// Server-side sort request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_sort: Option<SortSpec>,
    /// Identity to search as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxied_auth: Option<AuthzId>,
    /// Extra controls forwarded verbatim.
    pub controls: Vec<WireControl>,
}

impl SearchOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for malformed JSON, unknown scope keywords, or an
    /// invalid authorization identity.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the scope.
    #[must_use]
    pub const fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Sets the filter.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Sets the requested attributes.
    #[must_use]
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the entry limit.
    #[must_use]
    pub const fn with_size_limit(mut self, limit: u32) -> Self {
        self.size_limit = Some(limit);
        self
    }

    /// Sets the time limit in seconds.
    #[must_use]
    pub const fn with_time_limit(mut self, seconds: u32) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    /// Requests attribute names only.
    #[must_use]
    pub const fn with_types_only(mut self, types_only: bool) -> Self {
        self.types_only = Some(types_only);
        self
    }

    /// Decodes the named attributes as raw bytes.
    #[must_use]
    pub fn with_byte_valued(mut self, byte_valued: ByteValued) -> Self {
        self.byte_valued = byte_valued;
        self
    }

    /// Requests server-side sorting.
    #[must_use]
    pub fn with_server_sort(mut self, spec: SortSpec) -> Self {
        self.server_sort = Some(spec);
        self
    }

    /// Searches as `identity`.
    #[must_use]
    pub fn with_proxied_auth(mut self, identity: AuthzId) -> Self {
        self.proxied_auth = Some(identity);
        self
    }

    /// Forwards an extra control verbatim.
    #[must_use]
    pub fn with_control(mut self, control: WireControl) -> Self {
        self.controls.push(control);
        self
    }
}

/// Canonical search descriptor with every default applied.
#[derive(Clone)]
pub struct SearchCriteria {
    /// Search base DN.
    pub base: String,
    /// Search scope.
    pub scope: Scope,
    /// Search filter.
    pub filter: String,
    /// Requested attributes.
    pub attributes: AttributeSelection,
    /// Entry limit (0 means none).
    pub size_limit: u32,
    /// Time limit in seconds (0 means none).
    pub time_limit: u32,
    /// Return attribute names only.
    pub types_only: bool,
    /// Attributes decoded as raw bytes.
    pub byte_valued: ByteValued,
    /// Request controls.
    pub controls: Vec<Control>,
    /// Receives the response controls of the search.
    pub response_callback: Option<ResponseCallback>,
}

impl fmt::Debug for SearchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchCriteria")
            .field("base", &self.base)
            .field("scope", &self.scope)
            .field("filter", &self.filter)
            .field("attributes", &self.attributes)
            .field("size_limit", &self.size_limit)
            .field("time_limit", &self.time_limit)
            .field("types_only", &self.types_only)
            .field("byte_valued", &self.byte_valued)
            .field("controls", &self.controls)
            .field("response_callback", &self.response_callback.is_some())
            .finish()
    }
}

impl SearchCriteria {
    /// Registers a callback for the response controls of the search.
    #[must_use]
    pub fn with_response_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&[ResponseControl]) + Send + Sync + 'static,
    {
        self.response_callback = Some(Arc::new(callback));
        self
    }

    /// Builds the transport request, encoding every control.
    #[must_use]
    pub fn to_request(&self) -> SearchRequest {
        SearchRequest {
            base: self.base.clone(),
            scope: self.scope,
            filter: self.filter.clone(),
            attributes: self.attributes.to_request_list(),
            size_limit: self.size_limit,
            time_limit: self.time_limit,
            types_only: self.types_only,
            controls: controls::to_wire_controls(&self.controls),
        }
    }

    pub(crate) fn notify(&self, controls: &[ResponseControl]) {
        if let Some(callback) = &self.response_callback {
            callback(controls);
        }
    }
}

/// Resolves options into search criteria rooted at `base`.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] when the server-side sort request has no keys.
pub fn resolve(base: impl Into<String>, options: &SearchOptions) -> Result<SearchCriteria> {
    let mut request_controls = Vec::new();
    if let Some(spec) = &options.server_sort {
        request_controls.push(build_sort_control(spec)?);
    }
    if let Some(identity) = &options.proxied_auth {
        request_controls.push(Control::ProxiedAuthorization(identity.clone()));
    }
    request_controls.extend(options.controls.iter().cloned().map(Control::Passthrough));

    let attributes = if options.attributes.is_empty() {
        AttributeSelection::AllUser
    } else {
        AttributeSelection::Named(options.attributes.clone())
    };

    Ok(SearchCriteria {
        base: base.into(),
        scope: options.scope.unwrap_or_default(),
        filter: options
            .filter
            .clone()
            .filter(|filter| !filter.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
        attributes,
        size_limit: options.size_limit.unwrap_or(0),
        time_limit: options.time_limit.unwrap_or(0),
        types_only: options.types_only.unwrap_or(false),
        byte_valued: options.byte_valued.clone(),
        controls: request_controls,
        response_callback: None,
    })
}
