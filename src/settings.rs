use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};

/// Largest document size the proxy is willing to cache.
pub const DEFAULT_MAX_DOCUMENT_SIZE: u32 = 9999;

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8888))
}

fn default_origin_host() -> String {
    "localhost".to_string()
}

fn default_origin_port() -> u16 {
    8080
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_max_document_size() -> u32 {
    DEFAULT_MAX_DOCUMENT_SIZE
}

fn default_request_buffer_size() -> usize {
    1024
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_origin_host")]
    pub origin_host: String,
    #[serde(default = "default_origin_port")]
    pub origin_port: u16,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub max_cache_size: u64,
    #[serde(default = "default_max_document_size")]
    pub max_document_size: u32,
    #[serde(default = "default_request_buffer_size")]
    pub request_buffer_size: usize,
    /// Upper bound on connections served at once. Unbounded when absent.
    #[serde(default)]
    pub max_connections: Option<usize>,
    #[serde(default)]
    pub client_timeout: Option<u64>,
    #[serde(default)]
    pub upstream_connect_timeout: Option<u64>,
    #[serde(default)]
    pub upstream_timeout: Option<u64>,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            origin_host: default_origin_host(),
            origin_port: default_origin_port(),
            cache_dir: default_cache_dir(),
            max_cache_size: 0,
            max_document_size: default_max_document_size(),
            request_buffer_size: default_request_buffer_size(),
            max_connections: None,
            client_timeout: None,
            upstream_connect_timeout: None,
            upstream_timeout: None,
            log: default_log_format(),
            metrics_listen: None,
        }
    }
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        let config_path = resolve_config_path(cli);

        if let Some(path) = &config_path {
            builder = builder.add_source(File::from(path.clone()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("SIZEPROXY")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(listen) = cli.listen {
            builder = builder
                .set_override("listen", listen.to_string())
                .map_err(to_anyhow)?;
        }
        if let Some(log) = cli.log {
            builder = builder
                .set_override("log", log.as_str())
                .map_err(to_anyhow)?;
        }
        if let Some(size) = cli.max_cache_size {
            builder = builder
                .set_override("max_cache_size", size.to_string())
                .map_err(to_anyhow)?;
        }

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        if let Some(path) = &config_path {
            settings.apply_base_dir(path);
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn client_timeout(&self) -> Option<Duration> {
        self.client_timeout.map(Duration::from_secs)
    }

    pub fn upstream_connect_timeout(&self) -> Option<Duration> {
        self.upstream_connect_timeout.map(Duration::from_secs)
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        self.upstream_timeout.map(Duration::from_secs)
    }

    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        self.cache_dir = absolutize(&self.cache_dir, base_dir);
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.origin_host.trim().is_empty(),
            "origin_host must not be empty"
        );
        ensure!(self.origin_port > 0, "origin_port must be greater than 0");
        ensure!(
            self.request_buffer_size > 0,
            "request_buffer_size must be greater than 0 (got {})",
            self.request_buffer_size
        );
        ensure!(
            self.max_connections != Some(0),
            "max_connections must be at least 1 when set"
        );
        for (name, value) in [
            ("client_timeout", self.client_timeout),
            ("upstream_connect_timeout", self.upstream_connect_timeout),
            ("upstream_timeout", self.upstream_timeout),
        ] {
            ensure!(
                value != Some(0),
                "{name} must be greater than 0 seconds when set"
            );
        }
        Ok(())
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = cli.config_path() {
        return Some(path.to_path_buf());
    }
    let candidate = PathBuf::from("sizeproxy.toml");
    candidate.exists().then_some(candidate)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
