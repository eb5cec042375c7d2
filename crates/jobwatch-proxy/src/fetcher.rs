//! Upstream image retrieval.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use jobwatch_orchestrator::{AllowList, ProxyConfig};
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::Url;
use tracing::{debug, error, warn};

use crate::error::ProxyError;

/// An image fetched from upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamImage {
    /// Upstream `Content-Type`, if it sent one.
    pub content_type: Option<String>,
    /// Raw body.
    pub bytes: Bytes,
}

/// Fetches an already-authorised URL.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Retrieves `url`.
    ///
    /// Non-success upstream statuses map to [`ProxyError::UpstreamStatus`] and
    /// a redirect off the allow-list maps to [`ProxyError::DomainNotAllowed`].
    /// Everything else that goes wrong maps to [`ProxyError::Internal`].
    async fn fetch(&self, url: &Url) -> Result<UpstreamImage, ProxyError>;
}

/// A redirect hop pointed outside the allow-list.
#[derive(Debug, thiserror::Error)]
#[error("redirect to '{host}' is not allowed")]
struct DisallowedRedirect {
    host: String,
}

/// [`ImageFetcher`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestImageFetcher {
    client: reqwest::Client,
    max_image_bytes: u64,
}

impl ReqwestImageFetcher {
    /// Builds a client with the configured timeouts and limits.
    ///
    /// Redirects are followed only while every hop passes `allow_list`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Internal`] if the client cannot be built.
    pub fn new(config: &ProxyConfig, allow_list: AllowList) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .redirect(redirect_policy(allow_list, config.max_redirects))
            .build()
            .map_err(ProxyError::internal)?;
        Ok(Self {
            client,
            max_image_bytes: config.max_image_bytes,
        })
    }

    fn exceeds_limit(&self, len: usize) -> bool {
        u64::try_from(len).map_or(true, |len| len > self.max_image_bytes)
    }
}

fn redirect_policy(allow_list: AllowList, max_redirects: usize) -> Policy {
    Policy::custom(move |attempt| {
        // `previous` holds the original URL plus every hop already followed.
        if attempt.previous().len() > max_redirects {
            return attempt.error("redirect limit exceeded");
        }
        if allow_list.check(attempt.url().as_str()).is_ok() {
            return attempt.follow();
        }
        let host = attempt.url().host_str().unwrap_or_default().to_string();
        attempt.error(DisallowedRedirect { host })
    })
}

#[async_trait]
impl ImageFetcher for ReqwestImageFetcher {
    async fn fetch(&self, url: &Url) -> Result<UpstreamImage, ProxyError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%url, status = status.as_u16(), body = %body, "Upstream image fetch failed");
            return Err(ProxyError::UpstreamStatus {
                status: status.as_u16(),
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_image_bytes {
                error!(%url, len, limit = self.max_image_bytes, "Upstream image too large");
                return Err(too_large(self.max_image_bytes));
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| map_reqwest_error(url, &e))?
        {
            if self.exceeds_limit(body.len().saturating_add(chunk.len())) {
                error!(%url, limit = self.max_image_bytes, "Upstream image body exceeded limit");
                return Err(too_large(self.max_image_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        debug!(%url, len = body.len(), content_type = ?content_type, "Fetched upstream image");

        Ok(UpstreamImage {
            content_type,
            bytes: Bytes::from(body),
        })
    }
}

fn too_large(limit: u64) -> ProxyError {
    ProxyError::internal(format!("upstream image exceeds {limit} bytes"))
}

fn map_reqwest_error(url: &Url, err: &reqwest::Error) -> ProxyError {
    if let Some(blocked) = disallowed_redirect(err) {
        warn!(%url, host = %blocked.host, "Blocked redirect off the allow-list");
        return ProxyError::DomainNotAllowed {
            host: blocked.host.clone(),
        };
    }
    if err.is_timeout() {
        error!(%url, error = %err, "Upstream image fetch timed out");
    } else {
        error!(%url, error = %err, "Upstream image fetch error");
    }
    ProxyError::internal(err)
}

fn disallowed_redirect(err: &reqwest::Error) -> Option<&DisallowedRedirect> {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(blocked) = inner.downcast_ref::<DisallowedRedirect>() {
            return Some(blocked);
        }
        source = inner.source();
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fetcher() -> ReqwestImageFetcher {
        fetcher_with(ProxyConfig::default())
    }

    fn fetcher_with(config: ProxyConfig) -> ReqwestImageFetcher {
        ReqwestImageFetcher::new(&config, AllowList::new(["127.0.0.1"])).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_returns_bytes_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(vec![0xff, 0xd8, 0xff]),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/img.jpg", server.uri())).unwrap();
        let image = fetcher().fetch(&url).await.unwrap();

        assert_eq!(image.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(image.bytes.as_ref(), &[0xff_u8, 0xd8, 0xff]);
    }

    #[tokio::test]
    async fn test_fetch_without_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/raw"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/raw", server.uri())).unwrap();
        let image = fetcher().fetch(&url).await.unwrap();
        assert!(image.content_type.is_none());
    }

    #[tokio::test]
    async fn test_fetch_non_success_is_upstream_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.jpg"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/gone.jpg", server.uri())).unwrap();
        let err = fetcher().fetch(&url).await.unwrap_err();
        assert_eq!(err, ProxyError::UpstreamStatus { status: 404 });
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_internal() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = Url::parse(&format!("http://127.0.0.1:{port}/x.jpg")).unwrap();
        let err = fetcher().fetch(&url).await.unwrap_err();
        assert!(matches!(err, ProxyError::Internal { .. }));
    }

    #[tokio::test]
    async fn test_redirect_off_allow_list_is_refused() {
        let server = MockServer::start().await;
        let port = server.address().port();
        Mock::given(method("GET"))
            .and(path("/avatar.jpg"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("http://localhost:{port}/secret")),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("INTERNAL-SECRET"))
            .expect(0)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/avatar.jpg", server.uri())).unwrap();
        let err = fetcher().fetch(&url).await.unwrap_err();

        assert_eq!(
            err,
            ProxyError::DomainNotAllowed {
                host: "localhost".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_redirect_within_allow_list_is_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old.png"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("location", format!("{}/new.png", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(b"PNG".to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/old.png", server.uri())).unwrap();
        let image = fetcher().fetch(&url).await.unwrap();

        assert_eq!(image.content_type.as_deref(), Some("image/png"));
        assert_eq!(image.bytes.as_ref(), b"PNG");
    }

    #[tokio::test]
    async fn test_redirect_chain_longer_than_limit_is_internal() {
        let server = MockServer::start().await;
        for (from, to) in [("/a", "/b"), ("/b", "/c")] {
            Mock::given(method("GET"))
                .and(path(from))
                .respond_with(
                    ResponseTemplate::new(302)
                        .insert_header("location", format!("{}{to}", server.uri())),
                )
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/c"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let config = ProxyConfig {
            max_redirects: 1,
            ..ProxyConfig::default()
        };
        let url = Url::parse(&format!("{}/a", server.uri())).unwrap();
        let err = fetcher_with(config).fetch(&url).await.unwrap_err();

        assert!(matches!(err, ProxyError::Internal { .. }));
    }

    #[tokio::test]
    async fn test_fetch_body_over_limit_is_internal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/huge.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0_u8; 64]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/small.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1_u8; 16]))
            .mount(&server)
            .await;

        let config = ProxyConfig {
            max_image_bytes: 16,
            ..ProxyConfig::default()
        };
        let fetcher = fetcher_with(config);

        let url = Url::parse(&format!("{}/huge.jpg", server.uri())).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, ProxyError::Internal { .. }));

        let url = Url::parse(&format!("{}/small.jpg", server.uri())).unwrap();
        let image = fetcher.fetch(&url).await.unwrap();
        assert_eq!(image.bytes.len(), 16);
    }
}
