//! Depot configuration.
//!
//! Layered: built-in defaults, then an optional YAML file, then environment
//! overrides. Every field has a default, so a YAML file only needs the
//! fields it changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use depot_store::{HttpRemoteConfig, RemoteStoreConfig, WriteBehindConfig};

const THIRTY_DAYS_SECS: u64 = 30 * 24 * 60 * 60;

/// How to reach remote depot hosts.
///
/// Custom `Debug` implementation redacts the `token` field.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub https: bool,
    pub port: Option<u16>,
    /// Path prefix of the remote store.
    pub path: String,
    /// Bearer token.
    pub token: Option<String>,
    pub timeout_secs: u64,
    /// Extra attempts after a transport failure or a 5xx answer.
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        let http = HttpRemoteConfig::default();
        Self {
            https: http.https,
            port: http.port,
            path: http.path,
            token: http.token,
            timeout_secs: http.timeout_secs,
            retries: http.retries,
            retry_backoff_ms: http.retry_backoff_ms,
        }
    }
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("https", &self.https)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("retries", &self.retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

impl From<&RemoteConfig> for HttpRemoteConfig {
    fn from(cfg: &RemoteConfig) -> Self {
        HttpRemoteConfig {
            https: cfg.https,
            port: cfg.port,
            path: cfg.path.clone(),
            token: cfg.token.clone(),
            timeout_secs: cfg.timeout_secs,
            retries: cfg.retries,
            retry_backoff_ms: cfg.retry_backoff_ms,
        }
    }
}

/// What `get` does with stored bytes that no longer decode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadErrorPolicy {
    /// Return the codec error to the caller.
    Propagate,
    /// Move the bytes under the `error` tag, drop the record and report
    /// the artifact as absent.
    #[default]
    Quarantine,
}

impl std::str::FromStr for LoadErrorPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim() {
            "propagate" => Ok(Self::Propagate),
            "quarantine" => Ok(Self::Quarantine),
            _ => Err(()),
        }
    }
}

/// Configuration for [`Depot::open`](crate::Depot::open).
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepotConfig {
    /// Root directory of the local store.
    pub dir: PathBuf,
    /// This machine's name; `Host` hints naming it are served locally.
    pub host: String,
    /// Host that `central` and `any` server hints resolve to.
    pub default_remote_host: Option<String>,
    /// Remote replication. `None` keeps the depot purely local.
    pub remote: Option<RemoteConfig>,
    pub write_delay_ms: u64,
    /// Relative spread applied to the write delay, in `[0, 1]`.
    pub write_jitter: f64,
    pub write_workers: usize,
    pub write_retries: u32,
    pub retry_backoff_ms: u64,
    /// Age after which a local copy of a remote artifact is refreshed.
    pub max_age_secs: Option<u64>,
    pub replication_workers: usize,
    /// Log module persistence failures instead of failing the `put`.
    pub allow_module_errors: bool,
    pub load_errors: LoadErrorPolicy,
}

impl Default for DepotConfig {
    fn default() -> Self {
        let base = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let write = WriteBehindConfig::default();
        Self {
            dir: base.join(".depot"),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            default_remote_host: None,
            remote: None,
            write_delay_ms: write.delay.as_millis() as u64,
            write_jitter: write.jitter,
            write_workers: write.workers,
            write_retries: write.retries,
            retry_backoff_ms: write.backoff.as_millis() as u64,
            max_age_secs: Some(THIRTY_DAYS_SECS),
            replication_workers: 2,
            allow_module_errors: false,
            load_errors: LoadErrorPolicy::default(),
        }
    }
}

impl std::fmt::Debug for DepotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepotConfig")
            .field("dir", &self.dir)
            .field("host", &self.host)
            .field("default_remote_host", &self.default_remote_host)
            .field("remote", &self.remote)
            .field("write_delay_ms", &self.write_delay_ms)
            .field("write_jitter", &self.write_jitter)
            .field("write_workers", &self.write_workers)
            .field("write_retries", &self.write_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_age_secs", &self.max_age_secs)
            .field("replication_workers", &self.replication_workers)
            .field("allow_module_errors", &self.allow_module_errors)
            .field("load_errors", &self.load_errors)
            .finish()
    }
}

impl DepotConfig {
    /// A purely local depot rooted at `dir`, with default everything else.
    pub fn local(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with the fields present in a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides.
    ///
    /// Variables:
    /// - `DEPOT_DIR`
    /// - `DEPOT_HOST`
    /// - `DEPOT_REMOTE_HOST` (also enables remote replication)
    /// - `DEPOT_REMOTE_TOKEN`
    /// - `DEPOT_WRITE_DELAY_MS`
    /// - `DEPOT_LOAD_ERRORS` (`propagate` or `quarantine`)
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_env_from(|var| std::env::var(var).ok())
    }

    /// [`with_env`](Self::with_env) with an explicit variable lookup.
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(dir) = lookup("DEPOT_DIR") {
            self.dir = PathBuf::from(dir);
        }
        if let Some(host) = lookup("DEPOT_HOST") {
            self.host = host;
        }
        if let Some(host) = lookup("DEPOT_REMOTE_HOST") {
            self.default_remote_host = Some(host);
            self.remote.get_or_insert_with(RemoteConfig::default);
        }
        if let Some(token) = lookup("DEPOT_REMOTE_TOKEN") {
            self.remote.get_or_insert_with(RemoteConfig::default).token = Some(token);
        }
        if let Some(raw) = lookup("DEPOT_WRITE_DELAY_MS") {
            self.write_delay_ms = raw.trim().parse().map_err(|_| ConfigError::Env {
                var: "DEPOT_WRITE_DELAY_MS",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup("DEPOT_LOAD_ERRORS") {
            self.load_errors = raw.parse().map_err(|_| ConfigError::Env {
                var: "DEPOT_LOAD_ERRORS",
                value: raw.clone(),
            })?;
        }
        Ok(self)
    }

    /// Reject configurations the depot cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("dir must not be empty".into()));
        }
        if self.write_workers == 0 {
            return Err(ConfigError::Invalid("write_workers must be at least 1".into()));
        }
        if self.replication_workers == 0 {
            return Err(ConfigError::Invalid("replication_workers must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.write_jitter) {
            return Err(ConfigError::Invalid(format!(
                "write_jitter must be within [0, 1], got {}",
                self.write_jitter
            )));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        Ok(())
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }

    pub fn write_behind(&self) -> WriteBehindConfig {
        WriteBehindConfig {
            workers: self.write_workers,
            delay: Duration::from_millis(self.write_delay_ms),
            jitter: self.write_jitter,
            retries: self.write_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn remote_store(&self) -> RemoteStoreConfig {
        RemoteStoreConfig {
            my_host: self.host.clone(),
            default_host: self.default_remote_host.clone(),
            default_max_age: self.max_age(),
            replication_workers: self.replication_workers,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
