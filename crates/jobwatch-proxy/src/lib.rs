//! Jobwatch Image Proxy
//!
//! Serves `GET /proxy?url=<encoded-url>`: fetches allow-listed images on behalf
//! of the browser and returns them with long-lived cache headers.

pub mod error;
pub mod fetcher;
pub mod router;

use std::sync::Arc;

use axum::Router;
use jobwatch_orchestrator::Config;

pub use error::ProxyError;
pub use fetcher::{ImageFetcher, ReqwestImageFetcher, UpstreamImage};
pub use router::{create_proxy_router, ProxyState, DEFAULT_CONTENT_TYPE};

impl ProxyState {
    /// Builds the proxy state from server configuration with a `reqwest` fetcher.
    pub fn from_config(config: &Config) -> Result<Self, ProxyError> {
        let allow_list = config.allow_list();
        Ok(Self {
            fetcher: Arc::new(ReqwestImageFetcher::new(&config.proxy, allow_list.clone())?),
            allow_list,
            cache_max_age_secs: config.proxy.cache_max_age_secs,
        })
    }
}

/// Creates the proxy router for `config`.
pub fn router_from_config(config: &Config) -> Result<Router, ProxyError> {
    Ok(create_proxy_router(ProxyState::from_config(config)?))
}
