//! Stream dispatcher.
//!
//! Consumes decoded stream events and routes each one:
//! endpoint announcements go to the handshake, responses go to the
//! correlator, and server-initiated messages go to an optional observer.
//! Also drives the periodic sweep that expires overdue requests.

use crate::correlator::RequestCorrelator;
use crate::protocol::RpcMessage;
use crate::stream::{EventKind, EventStream, StreamEvent};
use crate::{Result, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Receives server-initiated messages (those carrying a `method`).
pub trait NotificationObserver: Send + Sync {
    fn on_notification(&self, message: RpcMessage);
}

impl NotificationObserver for mpsc::UnboundedSender<RpcMessage> {
    fn on_notification(&self, message: RpcMessage) {
        if self.send(message).is_err() {
            debug!("Notification receiver dropped");
        }
    }
}

/// What `Dispatcher::dispatch` did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Forwarded to the handshake.
    Endpoint,
    /// Resolved the pending request with this id.
    Resolved(u64),
    /// A response for an id that is not pending.
    Unmatched,
    /// Handed to the notification observer.
    Notification,
    /// Dropped: malformed, unknown kind, or nobody listening.
    Discarded,
}

pub struct Dispatcher {
    correlator: RequestCorrelator,
    endpoint_tx: Option<mpsc::UnboundedSender<Result<String>>>,
    observer: Option<Arc<dyn NotificationObserver>>,
    sweep_interval: Duration,
}

impl Dispatcher {
    pub fn new(correlator: RequestCorrelator, sweep_interval: Duration) -> Self {
        Self {
            correlator,
            endpoint_tx: None,
            observer: None,
            sweep_interval,
        }
    }

    /// Forward endpoint event payloads to `tx`.
    pub fn with_endpoint_sink(mut self, tx: mpsc::UnboundedSender<Result<String>>) -> Self {
        self.endpoint_tx = Some(tx);
        self
    }

    pub fn with_observer(mut self, observer: Option<Arc<dyn NotificationObserver>>) -> Self {
        self.observer = observer;
        self
    }

    /// Route a single event.
    pub fn dispatch(&mut self, event: StreamEvent) -> Routed {
        match event.kind {
            EventKind::Endpoint => self.forward_endpoint(event.data),
            EventKind::Message => self.route_message(&event.data),
            EventKind::Other(name) => {
                debug!("Ignoring stream event of kind {}", name);
                Routed::Discarded
            }
        }
    }

    fn forward_endpoint(&mut self, payload: String) -> Routed {
        match &self.endpoint_tx {
            Some(tx) => {
                if tx.send(Ok(payload)).is_err() {
                    // Handshake already finished; later announcements are ignored
                    self.endpoint_tx = None;
                    return Routed::Discarded;
                }
                Routed::Endpoint
            }
            None => {
                debug!("Ignoring endpoint event after handshake: {}", payload);
                Routed::Discarded
            }
        }
    }

    fn route_message(&self, data: &str) -> Routed {
        let message = match RpcMessage::parse(data) {
            Ok(message) => message,
            Err(e) => {
                warn!("Discarding stream message: {}", e);
                return Routed::Discarded;
            }
        };

        if message.is_server_initiated() {
            return match &self.observer {
                Some(observer) => {
                    observer.on_notification(message);
                    Routed::Notification
                }
                None => {
                    debug!(
                        "No observer for server message {}",
                        message.method.as_deref().unwrap_or_default()
                    );
                    Routed::Discarded
                }
            };
        }

        let Some(id) = message.request_id() else {
            warn!("Discarding stream message without usable id: {}", data);
            return Routed::Discarded;
        };

        if self.correlator.resolve(id, message.into_outcome()) {
            Routed::Resolved(id)
        } else {
            Routed::Unmatched
        }
    }

    /// Consume `events` until the stream ends or fails.
    ///
    /// Returns `Ok(())` when the server closed the stream cleanly and the
    /// terminal error otherwise. A handshake still waiting on the endpoint
    /// sink is told about the failure.
    pub async fn run(mut self, events: &mut EventStream) -> Result<()> {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(Ok(event)) => {
                        self.dispatch(event);
                    }
                    Some(Err(e)) => {
                        warn!("Event stream failed: {}", e);
                        self.notify_handshake(TransportError::StreamClosed {
                            message: e.to_string(),
                        });
                        return Err(e);
                    }
                    None => {
                        debug!("Event stream ended");
                        self.notify_handshake(TransportError::StreamClosed {
                            message: "server closed the stream".to_string(),
                        });
                        return Ok(());
                    }
                },
                _ = sweep.tick() => {
                    let expired = self.correlator.timeout_check();
                    if expired > 0 {
                        debug!("Expired {} overdue request(s)", expired);
                    }
                }
            }
        }
    }

    fn notify_handshake(&mut self, err: TransportError) {
        if let Some(tx) = self.endpoint_tx.take() {
            let _ = tx.send(Err(err));
        }
    }
}
