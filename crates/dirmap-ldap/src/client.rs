//! Pooled directory client.

use crate::config::ConnectionConfig;
use crate::controls::OperationOptions;
use crate::criteria::{SearchCriteria, SearchOptions};
use crate::extended::PasswordModify;
use crate::modification::Changes;
use crate::operations;
use crate::outcome::Outcome;
use crate::paginator::SearchPaginator;
use crate::pool::LdapPool;
use crate::streaming::{self, StreamSummary};
use crate::transport::{self, ConnectionPool};
use dirmap_core::entry::{Entry, Value};
use dirmap_core::Result;
use secrecy::SecretString;
use std::future::Future;
use std::ops::ControlFlow;
use tracing::{debug, info_span, warn, Instrument, Span};

/// Directory client that checks a pooled connection out for every operation.
///
/// Connection faults discard the connection; every other outcome returns it to the pool.
pub struct DirectoryClient<P: ConnectionPool = LdapPool> {
    pool: P,
    span: Span,
    debug: bool,
}

impl<P: ConnectionPool> std::fmt::Debug for DirectoryClient<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl DirectoryClient<LdapPool> {
    /// Opens an `ldap3` pool for `config` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns configuration errors and failures opening the initial connections.
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        let debug = config.debug;
        let span = info_span!("directory", hosts = ?config.hosts);
        let pool = LdapPool::connect(config).instrument(span.clone()).await?;
        Ok(Self { pool, span, debug })
    }
}

impl<P: ConnectionPool> DirectoryClient<P> {
    /// Wraps an existing pool.
    #[must_use]
    pub fn with_pool(pool: P) -> Self {
        Self {
            pool,
            span: info_span!("directory"),
            debug: false,
        }
    }

    /// Records operations under `span`.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Logs every request at debug level.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &P {
        &self.pool
    }

    fn trace(&self, operation: &'static str, dn: &str) {
        if self.debug {
            debug!(parent: &self.span, operation, dn, "directory request");
        }
    }

    /// Checks out a connection for one operation.
    async fn session(&self, operation: &'static str, dn: &str) -> Result<P::Session> {
        self.trace(operation, dn);
        self.run(self.pool.acquire()).await
    }

    /// Runs `operation` inside the client span.
    async fn run<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        operation.instrument(self.span.clone()).await
    }

    /// Returns the connection to the pool, or discards it after a connection fault.
    async fn finish<T>(&self, operation: &'static str, session: P::Session, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.pool.release(session).await,
            Err(err) => {
                if err.should_log() {
                    warn!(parent: &self.span, operation, error = %err, "directory operation failed");
                }
                transport::check_in(&self.pool, session, err).await;
            }
        }
        result
    }

    /// Adds `entry` at `dn`.
    ///
    /// # Errors
    ///
    /// Returns [`dirmap_core::Error::Protocol`] for non-success result codes and transport faults.
    pub async fn add(&self, dn: &str, entry: &Entry, options: &OperationOptions) -> Result<Outcome> {
        let mut session = self.session("add", dn).await?;
        let result = self.run(operations::add(&mut session, dn, entry, options)).await;
        self.finish("add", session, result).await
    }

    /// Applies `changes` to the entry at `dn`.
    ///
    /// # Errors
    ///
    /// Returns [`dirmap_core::Error::InvalidArgument`] for change-sets that cannot be sent,
    /// [`dirmap_core::Error::Protocol`] for non-success result codes, and transport faults.
    pub async fn modify(
        &self,
        dn: &str,
        changes: impl Into<Changes>,
        options: &OperationOptions,
    ) -> Result<Outcome> {
        let changes = changes.into();
        let mut session = self.session("modify", dn).await?;
        let result = self
            .run(operations::modify(&mut session, dn, changes, options))
            .await;
        self.finish("modify", session, result).await
    }

    /// Renames the entry at `dn`, optionally moving it under `new_superior`.
    ///
    /// # Errors
    ///
    /// Returns [`dirmap_core::Error::Protocol`] for non-success result codes and transport faults.
    pub async fn modify_rdn(
        &self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
        options: &OperationOptions,
    ) -> Result<Outcome> {
        let mut session = self.session("modify DN", dn).await?;
        let result = self
            .run(operations::modify_rdn(
                &mut session,
                dn,
                new_rdn,
                delete_old_rdn,
                new_superior,
                options,
            ))
            .await;
        self.finish("modify DN", session, result).await
    }

    /// Deletes the entry at `dn`.
    ///
    /// # Errors
    ///
    /// Returns [`dirmap_core::Error::Protocol`] for non-success result codes and transport faults.
    pub async fn delete(&self, dn: &str, options: &OperationOptions) -> Result<Outcome> {
        let mut session = self.session("delete", dn).await?;
        let result = self.run(operations::delete(&mut session, dn, options)).await;
        self.finish("delete", session, result).await
    }

    /// Tests whether the entry at `dn` holds `value` for `attribute`.
    ///
    /// # Errors
    ///
    /// Returns [`dirmap_core::Error::Protocol`] for codes other than compare true/false.
    pub async fn compare(
        &self,
        dn: &str,
        attribute: &str,
        value: &Value,
        options: &OperationOptions,
    ) -> Result<bool> {
        let mut session = self.session("compare", dn).await?;
        let result = self
            .run(operations::compare(&mut session, dn, attribute, value, options))
            .await;
        self.finish("compare", session, result).await
    }

    /// Reads the entry at `dn`; `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns option resolution errors, protocol faults other than no-such-object, and
    /// transport faults.
    pub async fn get(&self, dn: &str, options: &SearchOptions) -> Result<Option<Entry>> {
        let mut session = self.session("get", dn).await?;
        let result = self.run(operations::get(&mut session, dn, options)).await;
        self.finish("get", session, result).await
    }

    /// One-shot search.
    ///
    /// # Errors
    ///
    /// Returns [`dirmap_core::Error::Protocol`] for codes other than success and
    /// size-limit-exceeded, and transport faults.
    pub async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<Entry>> {
        let mut session = self.session("search", &criteria.base).await?;
        let result = self.run(operations::search(&mut session, criteria)).await;
        self.finish("search", session, result).await
    }

    /// Paged search over one connection.
    ///
    /// # Errors
    ///
    /// See [`SearchPaginator::run`].
    pub async fn search_all(
        &self,
        criteria: &SearchCriteria,
        paginator: SearchPaginator,
    ) -> Result<Vec<Entry>> {
        let mut session = self.session("paged search", &criteria.base).await?;
        let result = self.run(paginator.run(&mut session, criteria)).await;
        self.finish("paged search", session, result).await
    }

    /// Streams search results into `on_entry`.
    ///
    /// # Errors
    ///
    /// See [`streaming::stream_search`].
    pub async fn search_streaming<F>(&self, criteria: &SearchCriteria, on_entry: F) -> Result<StreamSummary>
    where
        F: FnMut(Entry) -> ControlFlow<()> + Send,
    {
        self.trace("streaming search", &criteria.base);
        self.run(streaming::stream_search(&self.pool, criteria, on_entry))
            .await
    }

    /// Verifies a DN and password by binding on a pooled connection.
    ///
    /// The connection is re-bound as the pool identity before it is returned, so the pool never
    /// hands out a connection bound as someone else.
    ///
    /// # Errors
    ///
    /// Returns [`dirmap_core::Error::Protocol`] with invalid-credentials for a rejected bind, and
    /// any failure restoring the pool identity.
    pub async fn bind(&self, dn: &str, password: &SecretString) -> Result<()> {
        let mut session = self.session("bind", dn).await?;
        match self.run(operations::bind(&mut session, dn, password)).await {
            Err(err) if err.is_connection_fault() => {
                self.pool.invalidate(session).await;
                Err(err)
            }
            result => {
                self.run(self.pool.release_and_reauthenticate(session)).await?;
                result
            }
        }
    }

    /// Returns the identity of the pool's connections.
    ///
    /// # Errors
    ///
    /// Returns [`dirmap_core::Error::Protocol`] when the server rejects the operation.
    pub async fn who_am_i(&self, options: &OperationOptions) -> Result<String> {
        let mut session = self.session("who am i", "").await?;
        let result = self.run(operations::who_am_i(&mut session, options)).await;
        self.finish("who am i", session, result).await
    }

    /// Changes a password; returns the server-generated one when no new password was supplied.
    ///
    /// # Errors
    ///
    /// Returns [`dirmap_core::Error::Protocol`] when the server rejects the change.
    pub async fn password_modify(
        &self,
        request: &PasswordModify,
        options: &OperationOptions,
    ) -> Result<Option<SecretString>> {
        let dn = request.user().unwrap_or_default();
        let mut session = self.session("password modify", dn).await?;
        let result = self
            .run(operations::password_modify(&mut session, request, options))
            .await;
        self.finish("password modify", session, result).await
    }

    /// Checks a connection out for exclusive use.
    ///
    /// # Errors
    ///
    /// Returns pool checkout failures.
    pub async fn checkout(&self) -> Result<Connection<'_, P>> {
        let session = self.run(self.pool.acquire()).await?;
        Ok(Connection {
            pool: &self.pool,
            session,
            span: self.span.clone(),
            faulted: false,
        })
    }
}

/// A connection checked out of a [`DirectoryClient`] pool.
///
/// Binds on a checked-out connection are permanent until it is handed back with
/// [`Connection::release_and_reauthenticate`]. Dropping it without handing it back discards the
/// connection.
pub struct Connection<'a, P: ConnectionPool> {
    pool: &'a P,
    session: P::Session,
    span: Span,
    faulted: bool,
}

impl<P: ConnectionPool> std::fmt::Debug for Connection<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("faulted", &self.faulted)
            .finish_non_exhaustive()
    }
}

impl<P: ConnectionPool> Connection<'_, P> {
    fn note<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.faulted |= err.is_connection_fault();
        }
        result
    }

    /// Binds this connection as `dn`.
    ///
    /// # Errors
    ///
    /// Returns [`dirmap_core::Error::Protocol`] for a rejected bind.
    pub async fn bind(&mut self, dn: &str, password: &SecretString) -> Result<()> {
        let result = operations::bind(&mut self.session, dn, password)
            .instrument(self.span.clone())
            .await;
        self.note(result)
    }

    /// See [`DirectoryClient::add`].
    ///
    /// # Errors
    ///
    /// Returns protocol and transport faults.
    pub async fn add(&mut self, dn: &str, entry: &Entry, options: &OperationOptions) -> Result<Outcome> {
        let result = operations::add(&mut self.session, dn, entry, options)
            .instrument(self.span.clone())
            .await;
        self.note(result)
    }

    /// See [`DirectoryClient::modify`].
    ///
    /// # Errors
    ///
    /// Returns invalid change-sets, protocol and transport faults.
    pub async fn modify(
        &mut self,
        dn: &str,
        changes: impl Into<Changes>,
        options: &OperationOptions,
    ) -> Result<Outcome> {
        let result = operations::modify(&mut self.session, dn, changes.into(), options)
            .instrument(self.span.clone())
            .await;
        self.note(result)
    }

    /// See [`DirectoryClient::modify_rdn`].
    ///
    /// # Errors
    ///
    /// Returns protocol and transport faults.
    pub async fn modify_rdn(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
        options: &OperationOptions,
    ) -> Result<Outcome> {
        let result = operations::modify_rdn(
            &mut self.session,
            dn,
            new_rdn,
            delete_old_rdn,
            new_superior,
            options,
        )
        .instrument(self.span.clone())
        .await;
        self.note(result)
    }

    /// See [`DirectoryClient::delete`].
    ///
    /// # Errors
    ///
    /// Returns protocol and transport faults.
    pub async fn delete(&mut self, dn: &str, options: &OperationOptions) -> Result<Outcome> {
        let result = operations::delete(&mut self.session, dn, options)
            .instrument(self.span.clone())
            .await;
        self.note(result)
    }

    /// See [`DirectoryClient::compare`].
    ///
    /// # Errors
    ///
    /// Returns protocol and transport faults.
    pub async fn compare(
        &mut self,
        dn: &str,
        attribute: &str,
        value: &Value,
        options: &OperationOptions,
    ) -> Result<bool> {
        let result = operations::compare(&mut self.session, dn, attribute, value, options)
            .instrument(self.span.clone())
            .await;
        self.note(result)
    }

    /// See [`DirectoryClient::get`].
    ///
    /// # Errors
    ///
    /// Returns protocol and transport faults.
    pub async fn get(&mut self, dn: &str, options: &SearchOptions) -> Result<Option<Entry>> {
        let result = operations::get(&mut self.session, dn, options)
            .instrument(self.span.clone())
            .await;
        self.note(result)
    }

    /// See [`DirectoryClient::search`].
    ///
    /// # Errors
    ///
    /// Returns protocol and transport faults.
    pub async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<Entry>> {
        let result = operations::search(&mut self.session, criteria)
            .instrument(self.span.clone())
            .await;
        self.note(result)
    }

    /// See [`DirectoryClient::search_all`].
    ///
    /// # Errors
    ///
    /// Returns protocol and transport faults.
    pub async fn search_all(
        &mut self,
        criteria: &SearchCriteria,
        paginator: SearchPaginator,
    ) -> Result<Vec<Entry>> {
        let result = paginator
            .run(&mut self.session, criteria)
            .instrument(self.span.clone())
            .await;
        self.note(result)
    }

    /// See [`DirectoryClient::who_am_i`].
    ///
    /// # Errors
    ///
    /// Returns protocol and transport faults.
    pub async fn who_am_i(&mut self, options: &OperationOptions) -> Result<String> {
        let result = operations::who_am_i(&mut self.session, options)
            .instrument(self.span.clone())
            .await;
        self.note(result)
    }

    /// See [`DirectoryClient::password_modify`].
    ///
    /// # Errors
    ///
    /// Returns protocol and transport faults.
    pub async fn password_modify(
        &mut self,
        request: &PasswordModify,
        options: &OperationOptions,
    ) -> Result<Option<SecretString>> {
        let result = operations::password_modify(&mut self.session, request, options)
            .instrument(self.span.clone())
            .await;
        self.note(result)
    }

    /// Returns the connection to the pool, or discards it after a connection fault.
    pub async fn release(self) {
        if self.faulted {
            self.pool.invalidate(self.session).await;
        } else {
            self.pool.release(self.session).await;
        }
    }

    /// Re-binds the connection as the pool identity and returns it to the pool.
    ///
    /// # Errors
    ///
    /// Returns the re-bind failure; the connection is discarded in that case.
    pub async fn release_and_reauthenticate(self) -> Result<()> {
        if self.faulted {
            self.pool.invalidate(self.session).await;
            return Ok(());
        }
        self.pool.release_and_reauthenticate(self.session).await
    }

    /// Discards the connection.
    pub async fn invalidate(self) {
        self.pool.invalidate(self.session).await;
    }
}
