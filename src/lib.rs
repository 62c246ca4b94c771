pub mod cli;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod settings;
pub mod util;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::{proxy::cache::DiskCache, settings::Settings};

pub async fn run(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    if let Some(addr) = settings.metrics_listen {
        tokio::spawn(async move {
            info!(address = %addr, "metrics endpoint starting");
            if let Err(err) = crate::metrics::serve(addr, "/metrics".to_string()).await {
                tracing::error!(error = %err, "metrics endpoint failed");
            }
        });
    }

    let cache = Arc::new(DiskCache::open(settings.cache_dir.clone(), settings.max_cache_size).await?);
    let app = proxy::AppContext::new(settings, cache);
    proxy::run(app).await
}
