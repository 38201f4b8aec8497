//! Search client configuration.

use crate::error::Result;
use std::fmt;
use std::time::Duration;
use trawler_config::{ConfigValidator, Settings, Validate};

/// Environment variable prefix read by [`SearchConfig::from_env`].
pub const ENV_PREFIX: &str = "TRAWLER";

/// Cluster connection and index topology settings.
#[derive(Clone)]
pub struct SearchConfig {
    /// Cluster URL, or a comma-separated list of URLs.
    pub url: String,
    /// Basic auth username.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
    /// Concrete index documents are stored in.
    pub index_name: String,
    /// Alias bound to the index; defaults to the index name.
    pub alias_name: Option<String>,
    /// Talk to the first host only instead of balancing across all of them.
    pub single_node: bool,
    /// Primary shards for a newly created index.
    pub number_of_shards: u32,
    /// Replicas for a newly created index.
    pub number_of_replicas: u32,
    /// Per-request timeout enforced by the transport.
    pub request_timeout: Duration,
    /// Certificate handling for `https://` hosts.
    pub tls: TlsConfig,
}

impl SearchConfig {
    /// Create a configuration for `url` storing documents in `index_name`.
    pub fn new(url: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            index_name: index_name.into(),
            alias_name: None,
            single_node: false,
            number_of_shards: 1,
            number_of_replicas: 0,
            request_timeout: Duration::from_secs(30),
            tls: TlsConfig::default(),
        }
    }

    /// Read settings with the `TRAWLER_` prefix from `.env` and the environment.
    pub fn from_env() -> Result<Self> {
        let settings = Settings::builder()
            .with_prefix(ENV_PREFIX)
            .load_dotenv(None)
            .build()?;
        Self::from_settings(&settings)
    }

    /// Build from a loaded settings store and validate the result.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let defaults = Self::new("", "");
        let config = Self {
            url: settings.get("url")?,
            username: settings.get_opt("username")?,
            password: settings.get_opt("password")?,
            index_name: settings.get("index_name")?,
            alias_name: settings.get_opt("alias_name")?,
            single_node: settings.get_or("single_node", defaults.single_node)?,
            number_of_shards: settings.get_or("number_of_shards", defaults.number_of_shards)?,
            number_of_replicas: settings
                .get_or("number_of_replicas", defaults.number_of_replicas)?,
            request_timeout: settings
                .get_opt::<u64>("request_timeout_secs")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            tls: TlsConfig {
                ca_cert: settings.get_opt("ca_cert")?,
                danger_accept_invalid_certs: settings.get_or("danger_accept_invalid_certs", false)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Set basic authentication credentials.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Bind documents to `alias` instead of addressing the index directly.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias_name = Some(alias.into());
        self
    }

    /// Talk to exactly one host.
    pub fn with_single_node(mut self, single_node: bool) -> Self {
        self.single_node = single_node;
        self
    }

    /// Set shard and replica counts used when the index is created.
    pub fn with_topology(mut self, shards: u32, replicas: u32) -> Self {
        self.number_of_shards = shards;
        self.number_of_replicas = replicas;
        self
    }

    /// Set request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set TLS configuration.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Alias name, falling back to the index name.
    pub fn alias(&self) -> &str {
        self.alias_name.as_deref().unwrap_or(&self.index_name)
    }

    /// Individual host URLs parsed from [`SearchConfig::url`].
    pub fn hosts(&self) -> Vec<String> {
        self.url
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Validate for SearchConfig {
    fn validate(&self) -> trawler_config::Result<()> {
        ConfigValidator::is_url_list(&self.url, "url")?;
        ConfigValidator::not_empty(&self.index_name, "index_name")?;
        ConfigValidator::is_lowercase(&self.index_name, "index_name")?;
        if let Some(alias) = &self.alias_name {
            ConfigValidator::not_empty(alias, "alias_name")?;
            ConfigValidator::is_lowercase(alias, "alias_name")?;
        }
        ConfigValidator::at_least(self.number_of_shards, 1, "number_of_shards")?;
        Ok(())
    }
}

impl fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("index_name", &self.index_name)
            .field("alias_name", &self.alias_name)
            .field("single_node", &self.single_node)
            .field("number_of_shards", &self.number_of_shards)
            .field("number_of_replicas", &self.number_of_replicas)
            .field("request_timeout", &self.request_timeout)
            .field("tls", &self.tls)
            .finish()
    }
}

/// TLS configuration.
///
/// Certificates are always verified unless
/// [`TlsConfig::danger_accept_invalid_certs`] is set.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Path to a PEM CA certificate to trust in addition to the system roots.
    pub ca_cert: Option<String>,
    /// Skip certificate verification entirely.
    pub danger_accept_invalid_certs: bool,
}

impl TlsConfig {
    /// Trust the CA certificate at `path`.
    pub fn with_ca_cert(path: impl Into<String>) -> Self {
        Self {
            ca_cert: Some(path.into()),
            ..Default::default()
        }
    }

    /// Skip certificate verification (development clusters with self-signed certs only).
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.danger_accept_invalid_certs = true;
        self
    }
}
