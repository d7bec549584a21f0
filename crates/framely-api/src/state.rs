//! Application state.

use std::sync::Arc;

use framely_models::AnalysisConfig;
use framely_queue::{JobQueue, StatusCache};
use framely_store::Store;
use framely_vl_client::VlClient;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<Store>,
    pub queue: Arc<JobQueue>,
    pub status: Arc<StatusCache>,
    pub vl: Arc<VlClient>,
    pub analysis: AnalysisConfig,
}

impl AppState {
    /// Create new application state.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = Store::from_env();
        let queue = JobQueue::from_env()?;
        let status = StatusCache::new(queue.redis_url())?;
        let vl = VlClient::from_env()?;
        let analysis = AnalysisConfig::from_env();

        Ok(Self {
            config,
            store: Arc::new(store),
            queue: Arc::new(queue),
            status: Arc::new(status),
            vl: Arc::new(vl),
            analysis,
        })
    }
}
