//! Incremental decoder for `text/event-stream` framing.
//!
//! Bytes are buffered until a full line is available, so events may be split
//! across arbitrary read boundaries (including inside a UTF-8 sequence).

use crate::{Result, TransportError};

/// Kind of a stream event, taken from its `event:` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Session announcement carrying the submission path and token.
    Endpoint,
    /// Default kind; carries a JSON-RPC message.
    Message,
    Other(String),
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "endpoint" => EventKind::Endpoint,
            "" | "message" => EventKind::Message,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Endpoint => "endpoint",
            EventKind::Message => "message",
            EventKind::Other(name) => name,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub data: String,
}

impl StreamEvent {
    pub fn new(kind: EventKind, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }
}

/// Stateful line decoder.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to contain no newline.
    scanned: usize,
    kind: Option<String>,
    data: Option<String>,
    max_event_size: usize,
}

impl SseDecoder {
    /// Create a decoder that rejects lines or events larger than `max_event_size`.
    pub fn new(max_event_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            kind: None,
            data: None,
            max_event_size,
        }
    }

    /// Feed a chunk of bytes and return every event it completed.
    ///
    /// Only the new bytes are searched for line ends, and consumed lines are
    /// removed once per call, so a long line costs linear time however it is
    /// chunked.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut line_start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let line_end = self.scanned + offset;
            let mut line = &self.buffer[line_start..line_end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let text = String::from_utf8_lossy(line).into_owned();

            line_start = line_end + 1;
            self.scanned = line_start;

            if let Some(event) = self.process_line(&text)? {
                events.push(event);
            }
        }

        if line_start > 0 {
            self.buffer.drain(..line_start);
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_event_size {
            return Err(TransportError::EventTooLarge {
                size: self.buffer.len(),
                limit: self.max_event_size,
            });
        }

        Ok(events)
    }

    /// Bytes received but not yet terminated by a newline.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str) -> Result<Option<StreamEvent>> {
        if line.is_empty() {
            return Ok(self.take_event());
        }

        // Comment / keep-alive
        if line.starts_with(':') {
            return Ok(None);
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.trim()),
            None => (line, ""),
        };

        match field {
            "event" => self.kind = Some(value.to_string()),
            "data" => {
                match &mut self.data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => self.data = Some(value.to_string()),
                }

                let size = self.data.as_ref().map_or(0, String::len);
                if size > self.max_event_size {
                    return Err(TransportError::EventTooLarge {
                        size,
                        limit: self.max_event_size,
                    });
                }
            }
            // id, retry and unknown fields carry nothing we use
            _ => {}
        }

        Ok(None)
    }

    fn take_event(&mut self) -> Option<StreamEvent> {
        let kind = self.kind.take();
        let data = self.data.take()?;

        Some(StreamEvent {
            kind: EventKind::from_name(kind.as_deref().unwrap_or("message")),
            data,
        })
    }
}
