pub mod cache;
pub mod forward;
pub mod handler;
pub mod listener;
pub mod request;
pub mod response;
pub mod routing;

use anyhow::Result;
use std::sync::Arc;

use crate::settings::Settings;
use cache::CacheStore;
use routing::RoutePolicy;

#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub routes: Arc<RoutePolicy>,
    pub cache: Arc<dyn CacheStore>,
}

impl AppContext {
    pub fn new(settings: Arc<Settings>, cache: Arc<dyn CacheStore>) -> Self {
        let routes = Arc::new(RoutePolicy::from_settings(&settings));
        Self {
            settings,
            routes,
            cache,
        }
    }
}

pub async fn run(app: AppContext) -> Result<()> {
    listener::start_listener(app).await
}
