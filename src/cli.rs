use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "sizeproxy", about = "Caching forward proxy for size-addressed documents")]
pub struct Cli {
    /// Path to the configuration file (defaults to ./sizeproxy.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration file.
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Log output format, overriding the configuration file.
    #[arg(long, value_enum)]
    pub log: Option<LogFormat>,

    /// Maximum total size of the cache directory in bytes. 0 keeps nothing.
    pub max_cache_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Text => "text",
        }
    }
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}
