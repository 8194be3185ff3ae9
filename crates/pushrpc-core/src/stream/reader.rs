//! Stream reader: opens the push connection and pumps decoded events into a
//! channel.

use super::decoder::{SseDecoder, StreamEvent};
use crate::config::{TransportConfig, TransportDefaults};
use crate::{Result, TransportError};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Response};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receiving end of an open event stream.
///
/// Yields decoded events until the server closes the connection (`None`) or
/// a read fails (a final `Err`). Dropping it closes the connection.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Result<StreamEvent>>,
    task: Option<JoinHandle<()>>,
}

impl EventStream {
    /// Wrap an existing channel. Used to drive a dispatcher without a network
    /// connection.
    pub fn from_receiver(rx: mpsc::Receiver<Result<StreamEvent>>) -> Self {
        Self { rx, task: None }
    }

    /// Receive the next event.
    pub async fn recv(&mut self) -> Option<Result<StreamEvent>> {
        self.rx.recv().await
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens server-push connections.
pub struct StreamReader;

impl StreamReader {
    /// Connect to `config.base_url` and start reading events.
    ///
    /// Fails with `Connection` when the server cannot be reached or answers
    /// with a non-success status.
    pub async fn open(client: &Client, config: &TransportConfig) -> Result<EventStream> {
        let url = config.base_url.clone();

        let request = client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        let response = tokio::time::timeout(config.connect_timeout, request.send())
            .await
            .map_err(|_| TransportError::Connection {
                url: url.to_string(),
                status: None,
                message: format!("no response within {:?}", config.connect_timeout),
            })?
            .map_err(|e| TransportError::Connection {
                url: url.to_string(),
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Connection {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message: format!("server answered {}", status),
            });
        }

        info!("Event stream connected to {}", url);

        let (tx, rx) = mpsc::channel(TransportDefaults::EVENT_CHANNEL_CAPACITY);
        let decoder = SseDecoder::new(config.max_event_size);
        let task = tokio::spawn(pump(response, decoder, tx));

        Ok(EventStream {
            rx,
            task: Some(task),
        })
    }
}

async fn pump(
    response: Response,
    mut decoder: SseDecoder,
    tx: mpsc::Sender<Result<StreamEvent>>,
) {
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Event stream read failed: {}", e);
                let _ = tx
                    .send(Err(TransportError::StreamClosed {
                        message: format!("read error: {}", e),
                    }))
                    .await;
                return;
            }
        };

        match decoder.feed(&chunk) {
            Ok(events) => {
                for event in events {
                    if tx.send(Ok(event)).await.is_err() {
                        debug!("Event consumer gone, stopping stream reader");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Event stream decode failed: {}", e);
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }

    debug!("Event stream reached end of body");
}
