//! Configuration types for the Jobwatch server.
//!
//! Configuration lives in `jobwatch.json`. Every field has a default, unknown
//! fields are ignored, and values are validated after parsing.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{JobwatchError, Result};
use crate::validation::{AllowList, DEFAULT_ALLOWED_DOMAIN};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "jobwatch.json";

fn default_allowed_domains() -> Vec<String> {
    vec![DEFAULT_ALLOWED_DOMAIN.to_string()]
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3000
}

/// Default capacity of the WebSocket broadcast buffer.
const fn default_event_buffer_capacity() -> usize {
    100
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_request_timeout_secs() -> u64 {
    30
}

/// One week, matching the immutable media the proxy serves.
const fn default_cache_max_age_secs() -> u64 {
    604_800
}

/// 10 MiB.
const fn default_max_image_bytes() -> u64 {
    10 * 1024 * 1024
}

const fn default_max_redirects() -> usize {
    5
}

/// Main configuration for the Jobwatch server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Hostnames accepted for submission and proxy fetches.
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,

    /// Address the HTTP server binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the HTTP server binds to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of state events buffered for slow WebSocket clients.
    #[serde(default = "default_event_buffer_capacity")]
    pub event_buffer_capacity: usize,

    /// Image proxy settings.
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allowed_domains: default_allowed_domains(),
            host: default_host(),
            port: default_port(),
            event_buffer_capacity: default_event_buffer_capacity(),
            proxy: ProxyConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `jobwatch.json` exists but is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from_dir(&std::env::current_dir()?)
    }

    /// Loads `jobwatch.json` from `dir`, or defaults if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `JobwatchError::Io` if the file exists but cannot be read,
    /// `JobwatchError::ConfigParseError` if it is not valid JSON, and
    /// `JobwatchError::ConfigValidationError` if a value is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => return Err(e.into()),
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| JobwatchError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `JobwatchError::ConfigValidationError` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.allowed_domains.is_empty() {
            return Err(JobwatchError::config_validation(
                "allowedDomains must not be empty",
                "List at least one hostname, e.g. \"allowedDomains\": [\"media.licdn.com\"]",
            ));
        }

        if self.allowed_domains.iter().any(|d| d.trim().is_empty()) {
            return Err(JobwatchError::config_validation(
                "allowedDomains must not contain blank entries",
                "Remove empty strings from allowedDomains in your jobwatch.json",
            ));
        }

        if self.host.trim().is_empty() {
            return Err(JobwatchError::config_validation(
                "host must not be empty",
                "Set host to an address such as \"127.0.0.1\" in your jobwatch.json",
            ));
        }

        if self.port == 0 {
            return Err(JobwatchError::config_validation(
                "port must be greater than 0",
                "Set port to a free TCP port (default 3000) in your jobwatch.json",
            ));
        }

        if self.event_buffer_capacity == 0 {
            return Err(JobwatchError::config_validation(
                "eventBufferCapacity must be greater than 0",
                "Set eventBufferCapacity to at least 1 in your jobwatch.json",
            ));
        }

        self.proxy.validate()
    }

    /// The allow-list built from `allowed_domains`.
    #[must_use]
    pub fn allow_list(&self) -> AllowList {
        AllowList::new(&self.allowed_domains)
    }

    /// `host:port` for binding the listener.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings for the image proxy's upstream fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Upstream connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Whole-request upstream timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// `max-age` sent with proxied images.
    #[serde(default = "default_cache_max_age_secs")]
    pub cache_max_age_secs: u64,

    /// Largest upstream body the proxy will buffer.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,

    /// Redirect hops followed per fetch. Every hop must stay on the allow-list.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            cache_max_age_secs: default_cache_max_age_secs(),
            max_image_bytes: default_max_image_bytes(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl ProxyConfig {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("proxy.connectTimeoutSecs", self.connect_timeout_secs),
            ("proxy.requestTimeoutSecs", self.request_timeout_secs),
            ("proxy.cacheMaxAgeSecs", self.cache_max_age_secs),
            ("proxy.maxImageBytes", self.max_image_bytes),
        ] {
            if value == 0 {
                return Err(JobwatchError::config_validation(
                    format!("{field} must be greater than 0"),
                    format!("Set {field} to at least 1 in your jobwatch.json"),
                ));
            }
        }
        Ok(())
    }
}
