//! URL validation against the fixed allow-list of accepted domains.
//!
//! The same [`AllowList`] gates job submission and image proxying. Checks are
//! pure and synchronous.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{JobwatchError, Result};

/// Domain accepted when no allow-list is configured.
pub const DEFAULT_ALLOWED_DOMAIN: &str = "media.licdn.com";

/// Shown when the submitted URL is empty or whitespace.
pub const EMPTY_URL_MESSAGE: &str = "URL cannot be empty.";

/// Shown when the submitted URL is malformed or points at a foreign host.
pub const INVALID_URL_MESSAGE: &str =
    "Please enter a valid LinkedIn media URL (e.g., https://media.licdn.com/...).";

/// Why a URL was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlRejection {
    /// Nothing but whitespace was supplied.
    Empty,
    /// The text does not parse as an absolute URL.
    Malformed(String),
    /// Only `http` and `https` are fetchable.
    UnsupportedScheme(String),
    /// The host is not in the allow-list.
    HostNotAllowed(String),
}

impl std::fmt::Display for UrlRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty url"),
            Self::Malformed(reason) => write!(f, "malformed url: {reason}"),
            Self::UnsupportedScheme(scheme) => write!(f, "unsupported scheme '{scheme}'"),
            Self::HostNotAllowed(host) => write!(f, "host '{host}' is not allowed"),
        }
    }
}

/// Fixed set of hostnames accepted for submission and proxy fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowList {
    domains: Vec<String>,
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new([DEFAULT_ALLOWED_DOMAIN])
    }
}

impl AllowList {
    /// Creates an allow-list from hostnames. Entries are trimmed and lowercased.
    #[must_use]
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Returns the accepted hostnames.
    #[must_use]
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Returns `true` if `host` is accepted. Comparison is exact and case-insensitive.
    #[must_use]
    pub fn allows_host(&self, host: &str) -> bool {
        self.domains.iter().any(|d| d.eq_ignore_ascii_case(host))
    }

    /// Parses `raw` and checks its scheme and host.
    pub fn check(&self, raw: &str) -> std::result::Result<Url, UrlRejection> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(UrlRejection::Empty);
        }

        let url = Url::parse(trimmed).map_err(|e| UrlRejection::Malformed(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UrlRejection::UnsupportedScheme(url.scheme().to_string()));
        }

        let host = url
            .host_str()
            .ok_or_else(|| UrlRejection::Malformed("missing host".to_string()))?;
        if !self.allows_host(host) {
            return Err(UrlRejection::HostNotAllowed(host.to_string()));
        }

        Ok(url)
    }
}

/// Validates a URL for submission.
///
/// Fails with [`JobwatchError::Validation`] when the URL is empty, cannot be
/// parsed, or its host is not allow-listed.
///
/// # Examples
///
/// ```
/// use jobwatch_orchestrator::{validate_url, AllowList};
///
/// let allow = AllowList::default();
/// assert!(validate_url("https://media.licdn.com/x.jpg", &allow).is_ok());
/// assert!(validate_url("https://example.com/x.jpg", &allow).is_err());
/// ```
pub fn validate_url(raw: &str, allow_list: &AllowList) -> Result<()> {
    allow_list
        .check(raw)
        .map(|_| ())
        .map_err(|rejection| match rejection {
            UrlRejection::Empty => JobwatchError::validation(EMPTY_URL_MESSAGE),
            UrlRejection::Malformed(_)
            | UrlRejection::UnsupportedScheme(_)
            | UrlRejection::HostNotAllowed(_) => JobwatchError::validation(INVALID_URL_MESSAGE),
        })
}
