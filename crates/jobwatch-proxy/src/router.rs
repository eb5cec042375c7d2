//! `GET /proxy?url=` route.

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use jobwatch_orchestrator::{AllowList, UrlRejection, PROXY_ROUTE};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::ProxyError;
use crate::fetcher::ImageFetcher;

/// Content type sent when upstream does not name one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Shared state of the proxy route.
#[derive(Clone)]
pub struct ProxyState {
    /// Hosts that may be fetched.
    pub allow_list: AllowList,
    /// Upstream access.
    pub fetcher: Arc<dyn ImageFetcher>,
    /// `max-age` for successful responses.
    pub cache_max_age_secs: u64,
}

impl std::fmt::Debug for ProxyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyState")
            .field("allow_list", &self.allow_list)
            .field("cache_max_age_secs", &self.cache_max_age_secs)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ProxyQuery {
    url: Option<String>,
}

/// Creates the router serving the image proxy.
pub fn create_proxy_router(state: ProxyState) -> Router {
    Router::new()
        .route(PROXY_ROUTE, get(handle_proxy))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Checks the requested URL without any network access.
fn authorize(allow_list: &AllowList, raw: &str) -> Result<reqwest::Url, ProxyError> {
    allow_list.check(raw).map_err(|rejection| match rejection {
        UrlRejection::Empty => ProxyError::MissingUrl,
        UrlRejection::Malformed(_) | UrlRejection::UnsupportedScheme(_) => ProxyError::InvalidUrl,
        UrlRejection::HostNotAllowed(host) => ProxyError::DomainNotAllowed { host },
    })
}

/// Handler for `GET /proxy`.
async fn handle_proxy(
    State(state): State<Arc<ProxyState>>,
    query: Result<Query<ProxyQuery>, QueryRejection>,
) -> Result<Response, ProxyError> {
    let raw = query
        .ok()
        .and_then(|Query(q)| q.url)
        .ok_or(ProxyError::MissingUrl)?;

    let url = authorize(&state.allow_list, &raw).map_err(|e| {
        match &e {
            ProxyError::DomainNotAllowed { host } => {
                warn!(%host, "Blocked proxy request for disallowed domain");
            }
            _ => debug!(url = %raw, error = %e, "Rejected proxy request"),
        }
        e
    })?;

    let image = state.fetcher.fetch(&url).await?;
    info!(%url, len = image.bytes.len(), "Proxied image");

    let content_type = image
        .content_type
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
    let cache_control = format!("public, max-age={}, immutable", state.cache_max_age_secs);

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, cache_control),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*".to_string()),
        ],
        image.bytes,
    )
        .into_response())
}
