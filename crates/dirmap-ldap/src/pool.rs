//! Connection pool and session backed by `ldap3`.

use crate::asn1;
use crate::codec::{WireAttribute, WireEntry};
use crate::config::ConnectionConfig;
use crate::controls::WireControl;
use crate::criteria::Scope;
use crate::modification::{ModKind, Modification};
use crate::transport::{
    ConnectionPool, DirectorySession, ExtendedReply, ExtendedRequest, ModifyDnRequest,
    OperationReply, SearchReply, SearchRequest, StreamFault,
};
use async_trait::async_trait;
use dirmap_core::error::Error;
use dirmap_core::{ResultCode, Result};
use ldap3::controls::{Control as LdapControl, RawControl};
use ldap3::exop::Exop;
use ldap3::{
    Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Mod, ResultEntry,
    SearchOptions as LdapSearchOptions, SearchResult, SearchStream,
};
use native_tls::{Certificate, TlsConnector};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashSet;
use std::fs;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

type EntryStream = SearchStream<'static, String, Vec<String>>;

/// Pool of authenticated `ldap3` connections.
///
/// Hosts are tried in order when a connection is opened. The pool binds every connection as the
/// configured identity, or leaves it anonymous when none is configured.
pub struct LdapPool {
    config: Arc<ConnectionConfig>,
    endpoints: Vec<Url>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Ldap>>,
}

impl std::fmt::Debug for LdapPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapPool")
            .field("endpoints", &self.endpoints)
            .field("available", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl LdapPool {
    /// Creates the pool and eagerly opens its minimum number of connections.
    ///
    /// # Errors
    ///
    /// Returns configuration errors, [`Error::Connection`] when no host is reachable, and
    /// [`Error::Protocol`] when the pool identity cannot bind.
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        config.check()?;
        let endpoints = config.endpoints()?;
        let max = usize::try_from(config.pool.max_connections)
            .map_err(|_| Error::ConfigError("max_connections out of range".to_string()))?;

        let pool = Self {
            permits: Arc::new(Semaphore::new(max)),
            idle: Mutex::new(Vec::with_capacity(max)),
            config: Arc::new(config),
            endpoints,
        };

        for _ in 0..pool.config.pool.min_connections {
            let ldap = pool.open().await?;
            pool.idle.lock().await.push(ldap);
        }
        info!(
            hosts = pool.endpoints.len(),
            connections = pool.config.pool.min_connections,
            "directory pool ready"
        );
        Ok(pool)
    }

    /// Returns the pool configuration.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns the resolved host URLs in failover order.
    #[must_use]
    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }

    async fn open(&self) -> Result<Ldap> {
        let mut last_error = None;
        for url in &self.endpoints {
            match self.open_at(url).await {
                Ok(ldap) => return Ok(ldap),
                Err(err) if err.is_connection_fault() => {
                    warn!(%url, "directory host unavailable: {err}");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Connection("no directory hosts configured".to_string())))
    }

    async fn open_at(&self, url: &Url) -> Result<Ldap> {
        let settings = build_ldap_settings(&self.config)?;
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, url.as_str())
            .await
            .map_err(map_ldap_error)?;

        tokio::spawn(async move {
            if let Err(err) = conn.drive().await {
                warn!(error = %err, "directory connection driver error");
            }
        });

        self.authenticate(&mut ldap, false).await?;
        debug!(%url, "directory connection opened");
        Ok(ldap)
    }

    async fn authenticate(&self, ldap: &mut Ldap, rebind_anonymous: bool) -> Result<()> {
        let limit = self.config.response_timeout();
        let result = match (&self.config.bind_dn, &self.config.password) {
            (Some(dn), password) => {
                let password = password.as_ref().map_or("", |secret| secret.expose_secret());
                timed(limit, "bind", ldap.simple_bind(dn, password)).await?
            }
            (None, _) if rebind_anonymous => timed(limit, "bind", ldap.simple_bind("", "")).await?,
            (None, _) => return Ok(()),
        };
        ensure_success(result)
    }
}

#[async_trait]
impl ConnectionPool for LdapPool {
    type Session = LdapSession;

    async fn acquire(&self) -> Result<LdapSession> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("directory pool closed".to_string()))?;

        let idle = self.idle.lock().await.pop();
        let ldap = match idle {
            Some(ldap) => ldap,
            None => self.open().await?,
        };

        Ok(LdapSession {
            ldap,
            response_timeout: self.config.response_timeout(),
            stream: None,
            _permit: permit,
        })
    }

    async fn release(&self, session: LdapSession) {
        if session.stream.is_some() {
            debug!("discarding connection with an unfinished streamed search");
            return;
        }
        self.idle.lock().await.push(session.ldap);
    }

    async fn release_and_reauthenticate(&self, mut session: LdapSession) -> Result<()> {
        if let Err(err) = self.authenticate(&mut session.ldap, true).await {
            self.invalidate(session).await;
            return Err(err);
        }
        self.release(session).await;
        Ok(())
    }

    async fn invalidate(&self, mut session: LdapSession) {
        session.stream = None;
        let limit = session.response_timeout;
        if let Err(err) = timed(limit, "unbind", session.ldap.unbind()).await {
            debug!("unbind of discarded connection failed: {err}");
        }
    }
}

/// A checked-out `ldap3` connection.
///
/// Holds one pool slot until it is released or invalidated.
pub struct LdapSession {
    ldap: Ldap,
    response_timeout: Duration,
    stream: Option<EntryStream>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for LdapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapSession")
            .field("response_timeout", &self.response_timeout)
            .field("streaming", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DirectorySession for LdapSession {
    async fn bind(&mut self, dn: &str, password: &SecretString) -> Result<OperationReply> {
        let limit = self.response_timeout;
        let result = timed(limit, "bind", self.ldap.simple_bind(dn, password.expose_secret())).await?;
        Ok(operation_reply(result))
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<SearchReply> {
        let scope = ldap_scope(request.scope)?;
        let limit = self.response_timeout;
        let SearchResult(entries, result) = timed(
            limit,
            "search",
            self.ldap
                .with_search_options(search_options(request))
                .with_controls(raw_controls(&request.controls))
                .search(&request.base, scope, &request.filter, request.attributes.clone()),
        )
        .await?;

        let entries = entries
            .into_iter()
            .filter(|entry| !entry.is_ref() && !entry.is_intermediate())
            .map(wire_entry)
            .collect::<Result<Vec<_>>>()?;
        let reply = operation_reply(result);
        Ok(SearchReply {
            entries,
            code: reply.code,
            message: reply.message,
            controls: reply.controls,
        })
    }

    async fn add(
        &mut self,
        dn: &str,
        attributes: &[WireAttribute],
        controls: &[WireControl],
    ) -> Result<OperationReply> {
        let attributes = attributes
            .iter()
            .map(|attribute| {
                (
                    attribute.name.as_bytes().to_vec(),
                    attribute.values.iter().cloned().collect::<HashSet<_>>(),
                )
            })
            .collect::<Vec<_>>();
        let limit = self.response_timeout;
        let result = timed(
            limit,
            "add",
            self.ldap.with_controls(raw_controls(controls)).add(dn, attributes),
        )
        .await?;
        Ok(operation_reply(result))
    }

    async fn modify(
        &mut self,
        dn: &str,
        modifications: &[Modification],
        controls: &[WireControl],
    ) -> Result<OperationReply> {
        let mods = modifications.iter().map(ldap_mod).collect::<Vec<_>>();
        let limit = self.response_timeout;
        let result = timed(
            limit,
            "modify",
            self.ldap.with_controls(raw_controls(controls)).modify(dn, mods),
        )
        .await?;
        Ok(operation_reply(result))
    }

    async fn modify_dn(&mut self, request: &ModifyDnRequest) -> Result<OperationReply> {
        let limit = self.response_timeout;
        let result = timed(
            limit,
            "modify DN",
            self.ldap.with_controls(raw_controls(&request.controls)).modifydn(
                &request.dn,
                &request.new_rdn,
                request.delete_old_rdn,
                request.new_superior.as_deref(),
            ),
        )
        .await?;
        Ok(operation_reply(result))
    }

    async fn delete(&mut self, dn: &str, controls: &[WireControl]) -> Result<OperationReply> {
        let limit = self.response_timeout;
        let result = timed(
            limit,
            "delete",
            self.ldap.with_controls(raw_controls(controls)).delete(dn),
        )
        .await?;
        Ok(operation_reply(result))
    }

    async fn compare(
        &mut self,
        dn: &str,
        attribute: &str,
        value: &[u8],
        controls: &[WireControl],
    ) -> Result<OperationReply> {
        let limit = self.response_timeout;
        let result = timed(
            limit,
            "compare",
            self.ldap
                .with_controls(raw_controls(controls))
                .compare(dn, attribute, value),
        )
        .await?;
        Ok(operation_reply(result.0))
    }

    async fn extended(&mut self, request: &ExtendedRequest) -> Result<ExtendedReply> {
        let exop = Exop {
            name: Some(request.oid.clone()),
            val: request.value.clone(),
        };
        let limit = self.response_timeout;
        let result = timed(
            limit,
            "extended operation",
            self.ldap.with_controls(raw_controls(&request.controls)).extended(exop),
        )
        .await?;

        let (exop, result) = (result.0, result.1);
        Ok(ExtendedReply {
            code: ResultCode::new(result.rc),
            message: result.text,
            oid: exop.name,
            value: exop.val,
        })
    }

    async fn begin_stream(&mut self, request: &SearchRequest) -> Result<Vec<WireControl>> {
        if self.stream.is_some() {
            return Err(Error::Internal(
                "a streamed search is already running on this connection".to_string(),
            ));
        }
        let scope = ldap_scope(request.scope)?;
        let limit = self.response_timeout;
        let stream = timed(
            limit,
            "search",
            self.ldap
                .with_search_options(search_options(request))
                .with_controls(raw_controls(&request.controls))
                .with_timeout(limit)
                .streaming_search(&request.base, scope, &request.filter, request.attributes.clone()),
        )
        .await?;
        self.stream = Some(stream);
        // ldap3 surfaces response controls only with the final result.
        Ok(Vec::new())
    }

    async fn next_entry(&mut self) -> std::result::Result<Option<WireEntry>, StreamFault> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(StreamFault::Fatal(Error::Internal(
                "no streamed search is running".to_string(),
            )));
        };
        loop {
            match stream.next().await {
                Ok(Some(entry)) if entry.is_ref() || entry.is_intermediate() => continue,
                Ok(Some(entry)) => return streamed_entry(Ok(entry)).map(Some),
                Ok(None) => return Ok(None),
                Err(err) => return streamed_entry(Err(err)).map(Some),
            }
        }
    }

    async fn end_stream(&mut self) -> Result<OperationReply> {
        let Some(mut stream) = self.stream.take() else {
            return Err(Error::Internal("no streamed search is running".to_string()));
        };
        let result = timeout(self.response_timeout, stream.finish())
            .await
            .map_err(|_| Error::Timeout("search completion timed out".to_string()))?;
        Ok(operation_reply(result))
    }

    async fn unbind(&mut self) -> Result<()> {
        self.stream = None;
        let limit = self.response_timeout;
        timed(limit, "unbind", self.ldap.unbind()).await
    }
}

async fn timed<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = ldap3::result::Result<T>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(format!("{operation} timed out after {}s", limit.as_secs())))?
        .map_err(map_ldap_error)
}

fn build_ldap_settings(config: &ConnectionConfig) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new()
        .set_conn_timeout(config.connect_timeout())
        .set_starttls(config.start_tls);

    if !config.tls_verify {
        warn!("TLS verification disabled for directory connections");
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to construct TLS connector: {err}"))
            })?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    } else if let Some(cert_path) = &config.tls_ca_cert {
        let pem = fs::read(cert_path).map_err(|err| {
            Error::ConfigError(format!(
                "failed to read CA certificate {}: {err}",
                cert_path.display()
            ))
        })?;
        let certificate = Certificate::from_pem(&pem)
            .map_err(|err| Error::ConfigError(format!("invalid CA certificate: {err}")))?;
        let connector = TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|err| Error::ConfigError(format!("failed to load CA certificate: {err}")))?;
        settings = settings.set_connector(connector);
    }

    Ok(settings)
}

fn map_ldap_error(err: LdapError) -> Error {
    match err {
        elapsed @ LdapError::Timeout { .. } => Error::Timeout(elapsed.to_string()),
        LdapError::LdapResult { result } => Error::protocol(ResultCode::new(result.rc), result.text),
        LdapError::FilterParsing => Error::InvalidArgument("invalid search filter".to_string()),
        other => Error::Connection(other.to_string()),
    }
}

fn ensure_success(result: LdapResult) -> Result<()> {
    if result.rc == 0 {
        Ok(())
    } else {
        Err(Error::protocol(ResultCode::new(result.rc), result.text))
    }
}

fn ldap_scope(scope: Scope) -> Result<ldap3::Scope> {
    match scope {
        Scope::Base => Ok(ldap3::Scope::Base),
        Scope::One => Ok(ldap3::Scope::OneLevel),
        Scope::Sub => Ok(ldap3::Scope::Subtree),
        Scope::Subordinate => Err(Error::InvalidArgument(
            "subordinate scope is not supported by this transport".to_string(),
        )),
    }
}

fn search_options(request: &SearchRequest) -> LdapSearchOptions {
    LdapSearchOptions::new()
        .sizelimit(i32::try_from(request.size_limit).unwrap_or(i32::MAX))
        .timelimit(i32::try_from(request.time_limit).unwrap_or(i32::MAX))
        .typesonly(request.types_only)
}

fn raw_controls(controls: &[WireControl]) -> Vec<RawControl> {
    controls.iter().cloned().map(RawControl::from).collect()
}

fn wire_controls(controls: Vec<LdapControl>) -> Vec<WireControl> {
    controls
        .into_iter()
        .map(|LdapControl(_, raw)| WireControl::from(raw))
        .collect()
}

fn operation_reply(result: LdapResult) -> OperationReply {
    OperationReply::new(ResultCode::new(result.rc), result.text)
        .with_controls(wire_controls(result.ctrls))
}

fn ldap_mod(modification: &Modification) -> Mod<Vec<u8>> {
    let attribute = modification.attribute.as_str().as_bytes().to_vec();
    let mut values = modification.payload.to_wire_values();
    match modification.kind {
        ModKind::Add => Mod::Add(attribute, values.into_iter().collect()),
        ModKind::Delete => Mod::Delete(attribute, values.into_iter().collect()),
        ModKind::Replace => Mod::Replace(attribute, values.into_iter().collect()),
        ModKind::Increment => Mod::Increment(attribute, values.pop().unwrap_or_default()),
    }
}

fn wire_entry(entry: ResultEntry) -> Result<WireEntry> {
    asn1::parse_search_result_entry(entry.0)
}

/// Classifies one read from a streamed search.
///
/// `ldap3` closes the stream after any read error, timeouts included, so those are fatal. An entry
/// that fails to decode leaves the stream readable and is skipped.
fn streamed_entry(
    read: ldap3::result::Result<ResultEntry>,
) -> std::result::Result<WireEntry, StreamFault> {
    match read {
        Ok(entry) => wire_entry(entry).map_err(|err| StreamFault::Continuable(err.to_string())),
        Err(err) => Err(StreamFault::Fatal(map_ldap_error(err))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DirectoryClient;
    use crate::criteria::{resolve, SearchOptions};
    use crate::modification::ModValue;
    use dirmap_core::Value;
    use std::ops::ControlFlow;
    use tokio::net::TcpListener;

    fn result_entry(dn: &str, attributes: &[WireAttribute]) -> ResultEntry {
        let encoded = asn1::encode(asn1::search_result_entry(dn, attributes));
        ResultEntry::new(asn1::parse(&encoded, "entry").unwrap())
    }

    async fn elapsed() -> LdapError {
        let elapsed = timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        LdapError::from(elapsed)
    }

    fn ldap_result(rc: u32, text: &str, ctrls: Vec<LdapControl>) -> LdapResult {
        LdapResult {
            rc,
            matched: String::new(),
            text: text.to_string(),
            refs: Vec::new(),
            ctrls,
        }
    }

    #[test]
    fn scopes_map_to_ldap3() {
        assert!(matches!(ldap_scope(Scope::Base), Ok(ldap3::Scope::Base)));
        assert!(matches!(ldap_scope(Scope::One), Ok(ldap3::Scope::OneLevel)));
        assert!(matches!(ldap_scope(Scope::Sub), Ok(ldap3::Scope::Subtree)));
        assert!(matches!(ldap_scope(Scope::Subordinate), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn result_codes_and_controls_are_carried_over() {
        let reply = operation_reply(ldap_result(
            68,
            "exists",
            vec![LdapControl(
                None,
                RawControl {
                    ctype: "1.2.3".to_string(),
                    crit: true,
                    val: Some(vec![1, 2]),
                },
            )],
        ));
        assert_eq!(reply.code, ResultCode::ENTRY_ALREADY_EXISTS);
        assert_eq!(reply.message, "exists");
        assert_eq!(reply.controls, vec![WireControl::new("1.2.3", true, Some(vec![1, 2]))]);
    }

    #[test]
    fn ldap_errors_map_to_fault_kinds() {
        let err = map_ldap_error(LdapError::LdapResult {
            result: ldap_result(50, "denied", Vec::new()),
        });
        assert_eq!(err.result_code(), Some(ResultCode::INSUFFICIENT_ACCESS_RIGHTS));
        assert!(matches!(map_ldap_error(LdapError::FilterParsing), Error::InvalidArgument(_)));
        assert!(ensure_success(ldap_result(0, "", Vec::new())).is_ok());
        assert!(ensure_success(ldap_result(49, "bad", Vec::new())).is_err());
    }

    #[test]
    fn modifications_become_ldap3_mods() {
        let replace =
            Modification::new(ModKind::Replace, "cn", ModValue::from(vec!["a", "b"])).unwrap();
        match ldap_mod(&replace) {
            Mod::Replace(attribute, values) => {
                assert_eq!(attribute, b"cn".to_vec());
                assert_eq!(values.len(), 2);
                assert!(values.contains(b"a".as_slice()));
            }
            _ => panic!("expected a different modification kind"),
        }

        match ldap_mod(&Modification::delete_all("mail")) {
            Mod::Delete(attribute, values) => {
                assert_eq!(attribute, b"mail".to_vec());
                assert!(values.is_empty());
            }
            _ => panic!("expected a different modification kind"),
        }

        let increment =
            Modification::new(ModKind::Increment, "uidNumber", ModValue::One(Value::from(5_i64))).unwrap();
        assert!(matches!(ldap_mod(&increment), Mod::Increment(_, value) if value == b"5".to_vec()));
    }

    #[test]
    fn entries_keep_binary_values_and_server_order() {
        let certificate = vec![0x30, 0x82, 0xff, 0xfe, 0x00];
        let attributes = vec![
            WireAttribute::new("userCertificate;binary", [certificate.clone()]),
            WireAttribute::new("cn", ["Jane Doe"]),
            WireAttribute::new("objectClass", ["top", "person"]),
        ];

        let entry = wire_entry(result_entry("cn=Jane Doe,dc=example,dc=com", &attributes)).unwrap();
        assert_eq!(entry.dn, "cn=Jane Doe,dc=example,dc=com");
        assert_eq!(entry.attributes, attributes);
        assert_eq!(entry.attributes[0].values, vec![certificate]);
    }

    #[tokio::test]
    async fn stream_timeouts_are_fatal() {
        match streamed_entry(Err(elapsed().await)) {
            Err(StreamFault::Fatal(Error::Timeout(_))) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            streamed_entry(Err(LdapError::EndOfStream)),
            Err(StreamFault::Fatal(Error::Connection(_)))
        ));
    }

    #[test]
    fn undecodable_streamed_entries_are_skippable() {
        let truncated = asn1::encode(asn1::sequence_of(vec![asn1::octets("uid=jdoe")]));
        let entry = ResultEntry::new(asn1::parse(&truncated, "entry").unwrap());
        assert!(matches!(streamed_entry(Ok(entry)), Err(StreamFault::Continuable(_))));

        let attributes = [WireAttribute::new("uid", ["jdoe"])];
        let decoded = streamed_entry(Ok(result_entry("uid=jdoe,dc=example,dc=com", &attributes))).unwrap();
        assert_eq!(decoded.attributes, attributes);
    }

    #[tokio::test]
    async fn silent_server_times_out_streamed_search() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let config = ConnectionConfig::new([address.to_string()])
            .unwrap()
            .with_response_timeout_secs(1);
        let client = DirectoryClient::connect(config).await.unwrap();
        let criteria = resolve("dc=example,dc=com", &SearchOptions::new()).unwrap();

        let err = client
            .search_streaming(&criteria, |_| ControlFlow::Continue(()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "unexpected {err:?}");
    }

    #[test]
    fn missing_ca_certificate_is_a_config_error() {
        let config = ConnectionConfig::new(["ldap.example.com"])
            .unwrap()
            .with_tls_ca_cert("/nonexistent/ca.pem".into());
        assert!(matches!(build_ldap_settings(&config), Err(Error::ConfigError(_))));
    }

    #[tokio::test]
    async fn unreachable_hosts_fail_pool_creation() {
        let config = ConnectionConfig::new(["127.0.0.1:1", "127.0.0.1:2"])
            .unwrap()
            .with_connect_timeout_secs(1);
        let err = LdapPool::connect(config).await.unwrap_err();
        assert!(err.is_connection_fault(), "unexpected {err:?}");
    }

    #[tokio::test]
    async fn invalid_configuration_fails_before_connecting() {
        let config = ConnectionConfig::new(["ldap.example.com"])
            .unwrap()
            .with_ssl(true)
            .with_start_tls(true);
        assert!(matches!(LdapPool::connect(config).await, Err(Error::ConfigError(_))));
    }
}
