//! The push-channel transport.
//!
//! `SseTransport` ties the pieces together: it opens the event stream, runs
//! the dispatcher on a background task, waits for the session handshake, and
//! then turns `request` calls into submissions whose answers are correlated
//! back from whichever channel delivers them first.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Connected { session_id }
//!                     |               |
//!                     v               v
//!              Failed { reason }  Failed / Disconnected
//! ```
//!
//! Any transition out of `Connected` cancels every pending request. A new
//! `connect` replaces whatever connection existed before.

use crate::config::TransportConfig;
use crate::correlator::RequestCorrelator;
use crate::dispatcher::{Dispatcher, NotificationObserver};
use crate::protocol::{RpcNotification, RpcOutcome, RpcRequest};
use crate::session::{await_session, Session};
use crate::stream::StreamReader;
use crate::submission::{SubmissionClient, SubmissionReply};
use crate::{Result, TransportError};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Observable connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    Disconnected,
    Connecting,
    Connected { session_id: String },
    Failed { reason: String },
}

impl TransportStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, TransportStatus::Connected { .. })
    }
}

#[derive(Debug, Default)]
struct ConnectionState {
    session: Option<Session>,
    /// Generation of the stream currently owned by the transport.
    live: Option<u64>,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<ConnectionState>,
    correlator: RequestCorrelator,
    status_tx: watch::Sender<TransportStatus>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().expect("connection state lock poisoned")
    }

    /// Drop the current connection and cancel everything pending on it.
    ///
    /// With `Some(generation)` only that connection is torn down; a stale
    /// generation is a no-op. Returns the reader task so external callers can
    /// abort it.
    fn teardown(&self, generation: Option<u64>, status: TransportStatus) -> Option<JoinHandle<()>> {
        let mut state = self.lock();
        if generation.is_some() && state.live != generation {
            return None;
        }

        let was_live = state.live.take().is_some();
        state.session = None;
        let cancelled = self.correlator.cancel_all();
        let task = state.task.take();
        self.status_tx.send_replace(status);
        drop(state);

        if was_live {
            info!("Connection closed, {} pending request(s) cancelled", cancelled);
        }

        task
    }
}

/// Client transport over a server-push stream plus HTTP submissions.
pub struct SseTransport {
    config: TransportConfig,
    http: reqwest::Client,
    submission: SubmissionClient,
    shared: Arc<Shared>,
    connect_lock: tokio::sync::Mutex<()>,
    observer: Option<Arc<dyn NotificationObserver>>,
}

impl SseTransport {
    /// Create a disconnected transport.
    pub fn new(config: TransportConfig) -> Result<Self> {
        config.validate()?;

        // No overall timeout: the stream response stays open for the whole session
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(crate::config::TransportDefaults::USER_AGENT)
            .build()?;

        let submission = SubmissionClient::new(http.clone(), config.submission_timeout);
        let (status_tx, _) = watch::channel(TransportStatus::Disconnected);

        Ok(Self {
            config,
            http,
            submission,
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::default()),
                correlator: RequestCorrelator::new(),
                status_tx,
            }),
            connect_lock: tokio::sync::Mutex::new(()),
            observer: None,
        })
    }

    /// Deliver server-initiated messages to `observer`. Takes effect on the
    /// next `connect`.
    pub fn with_observer(mut self, observer: Arc<dyn NotificationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Open the stream and complete the session handshake.
    ///
    /// Any existing connection is torn down first. On failure the transport
    /// is left disconnected with status `Failed`.
    pub async fn connect(&self) -> Result<Session> {
        let _guard = self.connect_lock.lock().await;

        if let Some(task) = self.shared.teardown(None, TransportStatus::Disconnected) {
            task.abort();
        }
        self.shared.status_tx.send_replace(TransportStatus::Connecting);
        info!("Connecting to {}", self.config.base_url);

        let events = match StreamReader::open(&self.http, &self.config).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Failed to open event stream: {}", e);
                self.shared.status_tx.send_replace(TransportStatus::Failed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let (endpoint_tx, mut endpoint_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(self.shared.correlator.clone(), self.config.sweep_interval)
            .with_endpoint_sink(endpoint_tx)
            .with_observer(self.observer.clone());

        let generation = {
            let mut state = self.shared.lock();
            state.generation += 1;
            let generation = state.generation;
            state.live = Some(generation);

            let shared = Arc::clone(&self.shared);
            state.task = Some(tokio::spawn(async move {
                let mut events = events;
                let reason = match dispatcher.run(&mut events).await {
                    Ok(()) => "server closed the stream".to_string(),
                    Err(e) => e.to_string(),
                };
                warn!("Connection lost: {}", reason);
                shared.teardown(Some(generation), TransportStatus::Failed { reason });
            }));

            generation
        };

        match await_session(&mut endpoint_rx, &self.config).await {
            Ok(session) => {
                let mut state = self.shared.lock();
                if state.live != Some(generation) {
                    return Err(TransportError::Handshake {
                        message: "connection closed during handshake".to_string(),
                    });
                }
                state.session = Some(session.clone());
                self.shared.status_tx.send_replace(TransportStatus::Connected {
                    session_id: session.session_id().to_string(),
                });
                Ok(session)
            }
            Err(e) => {
                warn!("Handshake failed: {}", e);
                let status = TransportStatus::Failed {
                    reason: e.to_string(),
                };
                if let Some(task) = self.shared.teardown(Some(generation), status) {
                    task.abort();
                }
                Err(e)
            }
        }
    }

    /// Close the stream and cancel every pending request.
    pub fn disconnect(&self) {
        if let Some(task) = self.shared.teardown(None, TransportStatus::Disconnected) {
            task.abort();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().session.is_some()
    }

    /// The current session, if connected.
    pub fn session(&self) -> Option<Session> {
        self.shared.lock().session.clone()
    }

    /// Subscribe to connection status changes.
    pub fn status(&self) -> watch::Receiver<TransportStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Number of requests still awaiting an outcome.
    pub fn pending_requests(&self) -> usize {
        self.shared.correlator.len()
    }

    /// Send a request using the configured request timeout.
    ///
    /// Returns `Err` only when the request could not be submitted. Remote
    /// errors, timeouts, and cancellation come back as `RpcOutcome` values.
    pub async fn request(&self, method: &str, params: Value) -> Result<RpcOutcome> {
        self.request_with_timeout(method, params, self.config.request_timeout)
            .await
    }

    /// Send a request with its own timeout.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<RpcOutcome> {
        self.submit(method, params, timeout)
            .await
            .map(|(_, outcome)| outcome)
    }

    /// Send a request and flatten the outcome into a `Result`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let (id, outcome) = self
            .submit(method, params, self.config.request_timeout)
            .await?;
        outcome.into_result(id)
    }

    /// Send a notification. Delivery failures are logged, not returned.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let session = self.session().ok_or(TransportError::NotConnected)?;
        let notification = RpcNotification::new(method, params);

        if let Err(e) = self
            .submission
            .post_notification(&session, &notification)
            .await
        {
            warn!("Notification {} was not delivered: {}", method, e);
        }

        Ok(())
    }

    async fn submit(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<(u64, RpcOutcome)> {
        let correlator = &self.shared.correlator;

        // Registered under the state lock so teardown cannot slip in between
        let (session, pending) = {
            let state = self.shared.lock();
            let session = state.session.clone().ok_or(TransportError::NotConnected)?;
            let pending = correlator.register(correlator.next_id(), method, timeout)?;
            (session, pending)
        };

        let id = pending.id();
        let request = RpcRequest::new(id, method, params);
        debug!("Submitting request {} ({})", id, method);

        match self.submission.post_request(&session, &request).await? {
            SubmissionReply::Accepted => {}
            SubmissionReply::Answered(message) => {
                if message.is_server_initiated() {
                    warn!("Ignoring server message in reply to request {}", id);
                } else {
                    // The HTTP reply answers this request whatever id it echoes
                    if let Some(echoed) = message.request_id().filter(|echoed| *echoed != id) {
                        warn!("Reply to request {} carries id {}", id, echoed);
                    }
                    correlator.resolve(id, message.into_outcome());
                }
            }
        }

        Ok((id, pending.wait().await))
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Some(task) = self.shared.teardown(None, TransportStatus::Disconnected) {
            task.abort();
        }
    }
}
