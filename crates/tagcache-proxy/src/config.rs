use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub resp: RespConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_status_header")]
    pub status_header: HeaderSetting,
    #[serde(default = "default_tag_header")]
    pub tag_header: HeaderSetting,
    #[serde(default = "default_invalidate_param")]
    pub invalidate_param: String,
    #[serde(default = "default_admin_mount")]
    pub admin_mount: String,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default = "default_log_enabled")]
    pub log_enabled: bool,
    #[serde(default = "default_log_scope")]
    pub log_scope: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RespConfig {
    #[serde(default = "default_resp_addr")]
    pub addr: String,
    #[serde(default = "default_resp_namespace")]
    pub namespace: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Resp,
}

/// A header name, or `false` to turn the feature off.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HeaderSetting {
    Name(String),
    Enabled(bool),
}

impl HeaderSetting {
    /// The configured name, `default` for `true`, nothing for `false`.
    pub fn name<'a>(&'a self, default: &'a str) -> Option<&'a str> {
        match self {
            HeaderSetting::Name(name) => Some(name),
            HeaderSetting::Enabled(true) => Some(default),
            HeaderSetting::Enabled(false) => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let config = Self::load(path)?;
            tracing::info!(path = %path.display(), "loaded config");
            Ok(config)
        } else {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            Ok(Self::default())
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            status_header: default_status_header(),
            tag_header: default_tag_header(),
            invalidate_param: default_invalidate_param(),
            admin_mount: default_admin_mount(),
            methods: default_methods(),
            store: StoreKind::default(),
            log_enabled: default_log_enabled(),
            log_scope: default_log_scope(),
        }
    }
}

impl Default for RespConfig {
    fn default() -> Self {
        Self {
            addr: default_resp_addr(),
            namespace: default_resp_namespace(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_upstream_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_status_header() -> HeaderSetting {
    HeaderSetting::Name(tagcache::DEFAULT_STATUS_HEADER.to_string())
}
fn default_tag_header() -> HeaderSetting {
    HeaderSetting::Name(tagcache::tags::DEFAULT_TAG_HEADER.to_string())
}
fn default_invalidate_param() -> String {
    tagcache::tags::DEFAULT_INVALIDATE_PARAM.to_string()
}
fn default_admin_mount() -> String {
    tagcache::DEFAULT_ADMIN_MOUNT.to_string()
}
fn default_methods() -> Vec<String> {
    vec!["GET".to_string(), "HEAD".to_string()]
}
fn default_log_enabled() -> bool {
    true
}
fn default_log_scope() -> String {
    "CACHE".to_string()
}
fn default_resp_addr() -> String {
    "127.0.0.1:6379".to_string()
}
fn default_resp_namespace() -> String {
    tagcache::store::resp::DEFAULT_NAMESPACE.to_string()
}
