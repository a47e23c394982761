//! Contract between the mapping layer and a directory transport provider.
//!
//! A provider hands out [`DirectorySession`]s from a [`ConnectionPool`]. Everything above this
//! module is written against these traits, so it can be exercised with mocks or an in-memory
//! provider as well as the `ldap3` one in [`crate::LdapPool`].

use crate::codec::{WireAttribute, WireEntry};
use crate::controls::WireControl;
use crate::criteria::Scope;
use crate::modification::Modification;
use async_trait::async_trait;
use dirmap_core::error::Error;
use dirmap_core::{ResultCode, Result};
use secrecy::SecretString;

/// A fully resolved search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Search base DN.
    pub base: String,
    /// Search scope.
    pub scope: Scope,
    /// Filter in string form.
    pub filter: String,
    /// Attributes to return; `*` selects all user attributes.
    pub attributes: Vec<String>,
    /// Maximum number of entries (0 means no limit).
    pub size_limit: u32,
    /// Maximum duration in seconds (0 means no limit).
    pub time_limit: u32,
    /// Return attribute names only.
    pub types_only: bool,
    /// Request controls.
    pub controls: Vec<WireControl>,
}

/// Reply to a one-shot search.
///
/// A size-limit-exceeded code still carries the entries returned before the limit was hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReply {
    /// Returned entries.
    pub entries: Vec<WireEntry>,
    /// Result code.
    pub code: ResultCode,
    /// Diagnostic message.
    pub message: String,
    /// Response controls.
    pub controls: Vec<WireControl>,
}

impl SearchReply {
    /// A successful reply carrying `entries`.
    #[must_use]
    pub fn success(entries: Vec<WireEntry>) -> Self {
        Self {
            entries,
            code: ResultCode::SUCCESS,
            message: String::new(),
            controls: Vec::new(),
        }
    }

    /// Overrides the result code, builder style.
    #[must_use]
    pub fn with_code(mut self, code: ResultCode, message: impl Into<String>) -> Self {
        self.code = code;
        self.message = message.into();
        self
    }

    /// Attaches response controls, builder style.
    #[must_use]
    pub fn with_controls(mut self, controls: Vec<WireControl>) -> Self {
        self.controls = controls;
        self
    }
}

/// Reply to add, modify, modify-DN, delete, compare, and bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReply {
    /// Result code.
    pub code: ResultCode,
    /// Diagnostic message.
    pub message: String,
    /// Response controls.
    pub controls: Vec<WireControl>,
}

impl OperationReply {
    /// Creates a reply without controls.
    #[must_use]
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            controls: Vec::new(),
        }
    }

    /// A successful reply.
    #[must_use]
    pub fn success() -> Self {
        Self::new(ResultCode::SUCCESS, "")
    }

    /// Attaches response controls, builder style.
    #[must_use]
    pub fn with_controls(mut self, controls: Vec<WireControl>) -> Self {
        self.controls = controls;
        self
    }
}

/// Modify-DN request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyDnRequest {
    /// Entry to rename.
    pub dn: String,
    /// New relative DN.
    pub new_rdn: String,
    /// Remove the old RDN values from the entry.
    pub delete_old_rdn: bool,
    /// New parent, when moving the entry.
    pub new_superior: Option<String>,
    /// Request controls.
    pub controls: Vec<WireControl>,
}

/// Extended operation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedRequest {
    /// Request name.
    pub oid: String,
    /// BER-encoded request value.
    pub value: Option<Vec<u8>>,
    /// Request controls.
    pub controls: Vec<WireControl>,
}

/// Extended operation reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedReply {
    /// Result code.
    pub code: ResultCode,
    /// Diagnostic message.
    pub message: String,
    /// Response name, if the server sent one.
    pub oid: Option<String>,
    /// Response value, if the server sent one.
    pub value: Option<Vec<u8>>,
}

/// A fault raised while reading the next streamed entry.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFault {
    /// The entry could not be read but the stream is still usable.
    Continuable(String),
    /// The stream is unusable; the connection must be discarded.
    Fatal(Error),
}

/// One checked-out directory connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectorySession: Send {
    /// Simple bind; an empty DN and password bind anonymously.
    async fn bind(&mut self, dn: &str, password: &SecretString) -> Result<OperationReply>;

    /// One-shot search returning every entry at once.
    async fn search(&mut self, request: &SearchRequest) -> Result<SearchReply>;

    /// Adds an entry.
    async fn add(
        &mut self,
        dn: &str,
        attributes: &[WireAttribute],
        controls: &[WireControl],
    ) -> Result<OperationReply>;

    /// Applies modifications to an entry, in order.
    async fn modify(
        &mut self,
        dn: &str,
        modifications: &[Modification],
        controls: &[WireControl],
    ) -> Result<OperationReply>;

    /// Renames or moves an entry.
    async fn modify_dn(&mut self, request: &ModifyDnRequest) -> Result<OperationReply>;

    /// Deletes an entry.
    async fn delete(&mut self, dn: &str, controls: &[WireControl]) -> Result<OperationReply>;

    /// Compares an attribute value assertion; the reply code is compare true/false.
    async fn compare(
        &mut self,
        dn: &str,
        attribute: &str,
        value: &[u8],
        controls: &[WireControl],
    ) -> Result<OperationReply>;

    /// Runs an extended operation.
    async fn extended(&mut self, request: &ExtendedRequest) -> Result<ExtendedReply>;

    /// Starts a streamed search and returns the response controls known up front.
    async fn begin_stream(&mut self, request: &SearchRequest) -> Result<Vec<WireControl>>;

    /// Reads the next streamed entry; `Ok(None)` marks the end of the stream.
    async fn next_entry(&mut self) -> std::result::Result<Option<WireEntry>, StreamFault>;

    /// Finishes a fully consumed stream and returns its final result.
    async fn end_stream(&mut self) -> Result<OperationReply>;

    /// Closes the connection.
    async fn unbind(&mut self) -> Result<()>;
}

/// Source of [`DirectorySession`]s.
#[cfg_attr(test, mockall::automock(type Session = MockDirectorySession;))]
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Session type handed out by the pool.
    type Session: DirectorySession + 'static;

    /// Checks out a session bound as the pool identity.
    async fn acquire(&self) -> Result<Self::Session>;

    /// Returns a session to the pool.
    async fn release(&self, session: Self::Session);

    /// Re-binds the session as the pool identity, then returns it.
    ///
    /// A session that cannot be re-bound is discarded and the error returned.
    async fn release_and_reauthenticate(&self, session: Self::Session) -> Result<()>;

    /// Discards a session that must not be reused.
    async fn invalidate(&self, session: Self::Session);
}

/// Returns a session after a failed operation: connection faults discard it, anything else
/// releases it.
pub(crate) async fn check_in<P>(pool: &P, session: P::Session, failure: &Error)
where
    P: ConnectionPool + ?Sized,
{
    if failure.is_connection_fault() {
        pool.invalidate(session).await;
    } else {
        pool.release(session).await;
    }
}
