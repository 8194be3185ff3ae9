//! Centralized configuration for the transport.
//!
//! `TransportDefaults` holds the reference constants; `TransportConfig` is the
//! caller-overridable set actually used by a transport instance.

use crate::{Result, TransportError};
use std::time::Duration;
use url::Url;

/// Default values for transport configuration.
pub struct TransportDefaults;

impl TransportDefaults {
    pub const BASE_URL: &'static str = "http://127.0.0.1:8081/sse";
    pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const SUBMISSION_TIMEOUT: Duration = Duration::from_secs(15);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
    pub const STREAM_PATH: &'static str = "/sse";
    pub const SUBMISSION_PATH: &'static str = "/messages/";
    pub const SESSION_QUERY_PARAM: &'static str = "session_id";
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
    pub const MAX_EVENT_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const USER_AGENT: &'static str = concat!("pushrpc/", env!("CARGO_PKG_VERSION"));
}

/// Caller-overridable transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Stream endpoint, e.g. `http://127.0.0.1:8081/sse`.
    pub base_url: Url,
    /// How long `connect` waits for the session endpoint event.
    pub handshake_timeout: Duration,
    /// How long a request waits for its response before resolving as timed out.
    pub request_timeout: Duration,
    /// HTTP timeout for a single submission POST.
    pub submission_timeout: Duration,
    /// TCP/TLS connect timeout for both the stream and submissions.
    pub connect_timeout: Duration,
    /// How often the dispatcher sweeps expired pending requests.
    pub sweep_interval: Duration,
    /// Path suffix of `base_url` that identifies the stream endpoint.
    pub stream_path: String,
    /// Path segment that replaces `stream_path` to form the submission endpoint.
    pub submission_path: String,
    /// Query parameter carrying the session token.
    pub session_query_param: String,
    /// Largest single line or event accepted from the stream.
    pub max_event_size: usize,
}

impl TransportConfig {
    /// Create a config for the given connect target with default timeouts.
    ///
    /// The target is normalized: a missing scheme becomes `http://` and
    /// trailing slashes are removed from the path.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            handshake_timeout: TransportDefaults::HANDSHAKE_TIMEOUT,
            request_timeout: TransportDefaults::REQUEST_TIMEOUT,
            submission_timeout: TransportDefaults::SUBMISSION_TIMEOUT,
            connect_timeout: TransportDefaults::CONNECT_TIMEOUT,
            sweep_interval: TransportDefaults::SWEEP_INTERVAL,
            stream_path: TransportDefaults::STREAM_PATH.to_string(),
            submission_path: TransportDefaults::SUBMISSION_PATH.to_string(),
            session_query_param: TransportDefaults::SESSION_QUERY_PARAM.to_string(),
            max_event_size: TransportDefaults::MAX_EVENT_SIZE,
        })
    }

    /// Set the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the default per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the HTTP timeout for submission POSTs.
    pub fn with_submission_timeout(mut self, timeout: Duration) -> Self {
        self.submission_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the pending-request sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the stream path suffix stripped when deriving the submission endpoint.
    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    /// Set the submission path segment.
    pub fn with_submission_path(mut self, path: impl Into<String>) -> Self {
        self.submission_path = path.into();
        self
    }

    /// Set the maximum accepted event size.
    pub fn with_max_event_size(mut self, size: usize) -> Self {
        self.max_event_size = size;
        self
    }

    /// Check that the settings are usable.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("handshake_timeout", self.handshake_timeout),
            ("request_timeout", self.request_timeout),
            ("submission_timeout", self.submission_timeout),
            ("connect_timeout", self.connect_timeout),
            ("sweep_interval", self.sweep_interval),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(TransportError::Config {
                    message: format!("{} must be greater than zero", name),
                });
            }
        }

        if self.session_query_param.is_empty() {
            return Err(TransportError::Config {
                message: "session_query_param must not be empty".to_string(),
            });
        }

        if self.max_event_size == 0 {
            return Err(TransportError::Config {
                message: "max_event_size must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new(TransportDefaults::BASE_URL).expect("default base URL is valid")
    }
}

/// Normalize a user-supplied connect target into an http(s) URL.
pub fn normalize_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TransportError::InvalidUrl {
            url: raw.to_string(),
            message: "URL is empty".to_string(),
        });
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| TransportError::InvalidUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(TransportError::InvalidUrl {
            url: raw.to_string(),
            message: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);

    Ok(url)
}
