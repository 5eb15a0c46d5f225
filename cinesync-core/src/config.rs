use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Error, Result};

/// Application configuration, layered from defaults, an optional file, and
/// `CINESYNC_`-prefixed environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    pub logging: LoggingConfig,
    pub proxy: ProxyConfig,
    pub live: LiveConfig,
    pub vendor: VendorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    pub rtmp_port: u16,
    /// Hostname advertised in publish URLs.
    pub public_host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            rtmp_port: 1935,
            public_host: "localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    pub token_ttl_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            token_ttl_hours: crate::service::DEFAULT_TOKEN_TTL_HOURS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "pretty".
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub cache_enabled: bool,
    pub cache_max_entries: u64,
    /// Largest response body the byte-range cache will hold, in MiB.
    pub cache_max_body_mib: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_max_entries: 1024,
            cache_max_body_mib: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Serve HLS segments with a PNG header so restrictive CDNs treat them
    /// as images.
    pub ts_disguised_as_png: bool,
    pub segment_seconds: u64,
    /// Segments kept in the rolling playlist.
    pub playlist_window: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            ts_disguised_as_png: false,
            segment_seconds: 4,
            playlist_window: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    /// Extra named backends; the default in-process backend always exists.
    pub backends: Vec<BackendConfig>,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub name: String,
}

impl Config {
    /// Load configuration, layering an optional file under env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()));
        }
        builder = builder.add_source(Environment::with_prefix("CINESYNC").separator("__"));
        builder
            .build()
            .and_then(|raw| raw.try_deserialize())
            .map_err(|e| Error::InvalidInput(format!("configuration error: {e}")))
    }

    /// Fail fast on configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.jwt.secret.is_empty() {
            return Err(Error::InvalidInput(
                "jwt.secret must be set (CINESYNC__JWT__SECRET)".to_string(),
            ));
        }
        if self.live.segment_seconds == 0 || self.live.playlist_window == 0 {
            return Err(Error::InvalidInput(
                "live.segment_seconds and live.playlist_window must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    #[must_use]
    pub fn rtmp_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.rtmp_port)
    }
}
