//! Session handshake.
//!
//! The first `endpoint` event on a fresh stream announces the session token:
//!
//! ```text
//! event: endpoint
//! data: /messages/?session_id=abc123
//! ```
//!
//! The token binds later submissions to this stream. The submission endpoint
//! is derived from the base URL: the stream path suffix is replaced with the
//! submission path (`http://host/sse` -> `http://host/messages/`).

use crate::config::TransportConfig;
use crate::{Result, TransportError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

/// Server-issued session binding one stream connection to its submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    session_id: String,
    submission_endpoint: Url,
    query_param: String,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        submission_endpoint: Url,
        query_param: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            submission_endpoint,
            query_param: query_param.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Submission endpoint without the session query parameter.
    pub fn submission_endpoint(&self) -> &Url {
        &self.submission_endpoint
    }

    /// Full submission URL including `?session_id=<token>`.
    ///
    /// The token is sent exactly as the server announced it, already
    /// percent-encoded, so it is not encoded a second time.
    pub fn submission_url(&self) -> Url {
        let mut url = self.submission_endpoint.clone();
        let pair = format!("{}={}", self.query_param, self.session_id);
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{}&{}", existing, pair),
            _ => pair,
        };
        url.set_query(Some(&query));
        url
    }
}

/// Extract the session token from an endpoint event payload.
///
/// Returns `Ok(None)` when the payload carries no `<param>=` query parameter,
/// and an error when the parameter is present but empty.
pub fn parse_session_id(payload: &str, param: &str) -> Result<Option<String>> {
    let payload = payload.trim();
    let without_fragment = payload.split('#').next().unwrap_or_default();

    let Some((_, query)) = without_fragment.split_once('?') else {
        return Ok(None);
    };

    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key != param {
            continue;
        }

        if value.is_empty() {
            return Err(TransportError::Handshake {
                message: format!("endpoint event {:?} has an empty {}", payload, param),
            });
        }
        if value.chars().any(char::is_whitespace) {
            return Err(TransportError::Handshake {
                message: format!("endpoint event {:?} has a malformed {}", payload, param),
            });
        }

        return Ok(Some(value.to_string()));
    }

    Ok(None)
}

/// Derive the submission endpoint from the stream base URL.
pub fn derive_submission_endpoint(
    base: &Url,
    stream_path: &str,
    submission_path: &str,
) -> Result<Url> {
    if base.cannot_be_a_base() {
        return Err(TransportError::InvalidUrl {
            url: base.to_string(),
            message: "URL cannot be a base".to_string(),
        });
    }

    let path = base.path().trim_end_matches('/');
    let suffix = stream_path.trim_end_matches('/');
    let prefix = if suffix.is_empty() {
        path
    } else {
        path.strip_suffix(suffix).unwrap_or(path)
    };

    let mut endpoint = base.clone();
    endpoint.set_query(None);
    endpoint.set_fragment(None);
    endpoint.set_path(&format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        submission_path.trim_start_matches('/')
    ));

    Ok(endpoint)
}

/// Wait for a qualifying endpoint announcement and build the session.
///
/// `endpoints` carries endpoint event payloads forwarded by the dispatcher;
/// an `Err` item or a closed channel means the stream failed first.
pub async fn await_session(
    endpoints: &mut mpsc::UnboundedReceiver<Result<String>>,
    config: &TransportConfig,
) -> Result<Session> {
    match tokio::time::timeout(config.handshake_timeout, next_session(endpoints, config)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                "No session endpoint event within {:?}",
                config.handshake_timeout
            );
            Err(TransportError::HandshakeTimeout(config.handshake_timeout))
        }
    }
}

async fn next_session(
    endpoints: &mut mpsc::UnboundedReceiver<Result<String>>,
    config: &TransportConfig,
) -> Result<Session> {
    loop {
        match endpoints.recv().await {
            Some(Ok(payload)) => match parse_session_id(&payload, &config.session_query_param)? {
                Some(session_id) => {
                    let endpoint = derive_submission_endpoint(
                        &config.base_url,
                        &config.stream_path,
                        &config.submission_path,
                    )?;
                    info!("Session {} established via {}", session_id, endpoint);
                    return Ok(Session::new(
                        session_id,
                        endpoint,
                        config.session_query_param.clone(),
                    ));
                }
                None => {
                    debug!("Ignoring endpoint event without session id: {}", payload);
                }
            },
            Some(Err(e)) => {
                return Err(TransportError::Handshake {
                    message: format!("stream failed before session was announced: {}", e),
                });
            }
            None => {
                return Err(TransportError::Handshake {
                    message: "stream ended before session was announced".to_string(),
                });
            }
        }
    }
}
