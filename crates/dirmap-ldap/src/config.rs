//! Connection configuration for the `ldap3`-backed pool.

use dirmap_core::error::Error;
use dirmap_core::Result;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use validator::{Validate, ValidationError};

/// Default connection timeout (seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default response timeout (seconds).
pub const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 30;

const LDAP_PORT: u16 = 389;
const LDAPS_PORT: u16 = 636;

/// Pool sizing. Equal bounds give a fixed-size pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_pool_bounds"))]
pub struct PoolConfig {
    /// Connections opened and bound eagerly when the pool is created; at least one.
    #[validate(range(min = 1, max = 1024))]
    #[serde(default = "default_pool_size")]
    pub min_connections: u32,
    /// Upper bound on concurrently checked-out connections.
    #[validate(range(min = 1, max = 1024))]
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::fixed(1)
    }
}

impl PoolConfig {
    /// A pool that always holds `size` connections.
    #[must_use]
    pub const fn fixed(size: u32) -> Self {
        Self {
            min_connections: size,
            max_connections: size,
        }
    }

    /// A pool growing from `min` to `max` connections on demand.
    #[must_use]
    pub const fn bounded(min: u32, max: u32) -> Self {
        Self {
            min_connections: min,
            max_connections: max,
        }
    }
}

fn validate_pool_bounds(pool: &PoolConfig) -> std::result::Result<(), ValidationError> {
    if pool.min_connections > pool.max_connections {
        return Err(ValidationError::new("min_connections_exceeds_max"));
    }
    Ok(())
}

const fn default_pool_size() -> u32 {
    1
}

const fn default_tls_verify() -> bool {
    true
}

const fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

const fn default_response_timeout_secs() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_SECS
}

fn deserialize_password<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

fn validate_tls_mode(config: &ConnectionConfig) -> std::result::Result<(), ValidationError> {
    if config.ssl && config.start_tls {
        return Err(ValidationError::new("ssl_and_start_tls_are_exclusive"));
    }
    Ok(())
}

/// Configuration for connecting to a directory.
///
/// The password is never serialized.
#[derive(Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_tls_mode"))]
pub struct ConnectionConfig {
    /// Host specs: `host`, `host:port`, or an `ldap://` / `ldaps://` URL. Tried in order.
    pub hosts: Vec<String>,

    /// Connect with TLS from the start (`ldaps`).
    #[serde(default)]
    pub ssl: bool,

    /// Upgrade plain connections with StartTLS.
    #[serde(default)]
    pub start_tls: bool,

    /// Whether to verify TLS certificates
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,

    /// Optional path to custom CA certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_cert: Option<PathBuf>,

    /// Connection timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Response timeout in seconds
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,

    /// Pool sizing
    #[validate(nested)]
    #[serde(default)]
    pub pool: PoolConfig,

    /// DN the pool binds as; anonymous when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_dn: Option<String>,

    /// Password for `bind_dn`.
    #[serde(default, skip_serializing, deserialize_with = "deserialize_password")]
    pub password: Option<SecretString>,

    /// Log every request at debug level.
    #[serde(default)]
    pub debug: bool,
}

impl ConnectionConfig {
    /// Creates a configuration for `hosts` with every other setting at its default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty host list or a malformed host spec.
    pub fn new<I, S>(hosts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let config = Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
            ssl: false,
            start_tls: false,
            tls_verify: default_tls_verify(),
            tls_ca_cert: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            response_timeout_secs: DEFAULT_RESPONSE_TIMEOUT_SECS,
            pool: PoolConfig::default(),
            bind_dn: None,
            password: None,
            debug: false,
        };
        config.check()?;
        Ok(config)
    }

    /// Parses and checks a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for malformed JSON or host specs and
    /// [`Error::ConfigError`] for out-of-range settings.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    /// Validates every setting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] for out-of-range settings and [`Error::InvalidArgument`]
    /// for bad host specs.
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        self.endpoints()?;
        Ok(())
    }

    /// Resolves the host specs into connection URLs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty list or a malformed spec.
    pub fn endpoints(&self) -> Result<Vec<Url>> {
        if self.hosts.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one directory host is required".to_string(),
            ));
        }
        self.hosts.iter().map(|spec| self.endpoint(spec)).collect()
    }

    fn endpoint(&self, spec: &str) -> Result<Url> {
        let spec = spec.trim();
        let invalid = |reason: &str| Error::InvalidArgument(format!("invalid host spec `{spec}`: {reason}"));

        let mut url = if spec.contains("://") {
            Url::parse(spec)?
        } else {
            let scheme = if self.ssl { "ldaps" } else { "ldap" };
            Url::parse(&format!("{scheme}://{spec}"))?
        };

        let default_port = match url.scheme() {
            "ldap" => LDAP_PORT,
            "ldaps" => LDAPS_PORT,
            other => return Err(invalid(&format!("unsupported scheme `{other}`"))),
        };
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host"));
        }
        if !matches!(url.path(), "" | "/") || url.query().is_some() {
            return Err(invalid("unexpected path or query"));
        }
        if url.port().is_none() {
            url.set_port(Some(default_port))
                .map_err(|()| invalid("cannot set port"))?;
        }
        Ok(url)
    }

    /// Connects with TLS from the start.
    #[must_use]
    pub const fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Upgrades plain connections with StartTLS.
    #[must_use]
    pub const fn with_start_tls(mut self, start_tls: bool) -> Self {
        self.start_tls = start_tls;
        self
    }

    /// Enables or disables TLS certificate verification.
    #[must_use]
    pub const fn with_tls_verification(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Sets the custom CA certificate path for TLS verification.
    #[must_use]
    pub fn with_tls_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Overrides the connection timeout in seconds.
    #[must_use]
    pub const fn with_connect_timeout_secs(mut self, seconds: u64) -> Self {
        self.connect_timeout_secs = seconds;
        self
    }

    /// Overrides the response timeout in seconds.
    #[must_use]
    pub const fn with_response_timeout_secs(mut self, seconds: u64) -> Self {
        self.response_timeout_secs = seconds;
        self
    }

    /// Overrides pool sizing.
    #[must_use]
    pub const fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the identity the pool binds as.
    #[must_use]
    pub fn with_credentials(mut self, bind_dn: impl Into<String>, password: SecretString) -> Self {
        self.bind_dn = Some(bind_dn.into());
        self.password = Some(password);
        self
    }

    /// Enables request-level debug logging.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Returns the response timeout duration.
    #[must_use]
    pub const fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn defaults() {
        let config = ConnectionConfig::new(["ldap.example.com"]).unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.response_timeout(), Duration::from_secs(30));
        assert_eq!(config.pool, PoolConfig::fixed(1));
        assert!(config.tls_verify);
        assert!(!config.debug);
        assert!(config.bind_dn.is_none());
    }

    #[test]
    fn host_specs_resolve_to_urls() {
        let config = ConnectionConfig::new([
            "ldap.example.com",
            "ldap2.example.com:1389",
            "ldaps://ldap3.example.com",
            "[::1]:3389",
        ])
        .unwrap();

        let urls: Vec<String> = config
            .endpoints()
            .unwrap()
            .iter()
            .map(|url| url.as_str().trim_end_matches('/').to_string())
            .collect();
        assert_eq!(
            urls,
            vec![
                "ldap://ldap.example.com:389",
                "ldap://ldap2.example.com:1389",
                "ldaps://ldap3.example.com:636",
                "ldap://[::1]:3389",
            ]
        );
    }

    #[test]
    fn ssl_switches_default_scheme() {
        let config = ConnectionConfig::new(["ldap.example.com"]).unwrap().with_ssl(true);
        let urls = config.endpoints().unwrap();
        assert_eq!(urls[0].scheme(), "ldaps");
        assert_eq!(urls[0].port(), Some(636));
    }

    #[test]
    fn malformed_host_specs_are_rejected() {
        for spec in ["http://ldap.example.com", "ldap.example.com:notaport", "ldap://host/dc=x", ""] {
            assert!(
                matches!(ConnectionConfig::new([spec]), Err(Error::InvalidArgument(_))),
                "{spec} should be rejected"
            );
        }
        assert!(matches!(
            ConnectionConfig::new(Vec::<String>::new()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn ssl_and_start_tls_conflict() {
        let config = ConnectionConfig::new(["ldap.example.com"])
            .unwrap()
            .with_ssl(true)
            .with_start_tls(true);
        assert!(matches!(config.check(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn pool_bounds_are_validated() {
        let config = ConnectionConfig::new(["ldap.example.com"])
            .unwrap()
            .with_pool(PoolConfig::bounded(4, 2));
        assert!(matches!(config.check(), Err(Error::ConfigError(_))));

        let config = ConnectionConfig::new(["ldap.example.com"])
            .unwrap()
            .with_pool(PoolConfig::fixed(0));
        assert!(matches!(config.check(), Err(Error::ConfigError(_))));

        let config = ConnectionConfig::new(["ldap.example.com"])
            .unwrap()
            .with_pool(PoolConfig::bounded(0, 4));
        assert!(matches!(config.check(), Err(Error::ConfigError(_))));

        let config = ConnectionConfig::new(["ldap.example.com"])
            .unwrap()
            .with_pool(PoolConfig::bounded(1, 4));
        assert!(config.check().is_ok());
    }

    #[test]
    fn timeouts_are_range_checked() {
        let config = ConnectionConfig::new(["ldap.example.com"])
            .unwrap()
            .with_connect_timeout_secs(0);
        assert!(matches!(config.check(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn json_loads_password_but_never_writes_it() {
        let config = ConnectionConfig::from_json(
            r#"{
                "hosts": ["ldap.example.com"],
                "bind_dn": "cn=admin,dc=example,dc=com",
                "password": "secret",
                "pool": {"min_connections": 2, "max_connections": 8},
                "debug": true
            }"#,
        )
        .unwrap();

        assert_eq!(config.password.as_ref().unwrap().expose_secret(), "secret");
        assert_eq!(config.pool, PoolConfig::bounded(2, 8));
        assert!(config.debug);

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("cn=admin,dc=example,dc=com"));
    }
}
