//! Server push event protocol
//!
//! The server streams collection changes as Server-Sent Events. This module
//! holds the two boundary pieces of that protocol:
//!
//! - [`SseDecoder`] turns raw response bytes into [`SseFrame`]s (`event:`,
//!   `data:`, `id:` fields separated by blank lines).
//! - [`StreamEvent`] is the closed set of events the reconciler understands.
//!   Frames are parsed into it once, here, so nothing downstream switches on
//!   raw event names.
//!
//! # Wire Format
//!
//! ```text
//! event: snapshot
//! data: {"items":[{"id":"p1"},{"id":"p2"}]}
//!
//! data: {"type":"added","item":{"id":"p3"}}
//!
//! event: removed
//! data: {"item":{"id":"p1"}}
//!
//! : keep-alive comment
//! event: keepalive
//! ```

use crate::shared::error::SharedError;
use crate::shared::models::ItemRef;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// One dispatched Server-Sent Event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name from the `event:` field
    pub event: Option<String>,
    /// Joined `data:` lines
    pub data: String,
    /// Event id from the `id:` field
    pub id: Option<String>,
}

impl SseFrame {
    /// Build a frame with a name and payload
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
            id: None,
        }
    }

    /// Build an unnamed frame carrying only data
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
            id: None,
        }
    }
}

/// Upper bound for a single line and for the joined data of one frame
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Incremental SSE parser.
///
/// Bytes may be split anywhere, including inside a UTF-8 sequence: lines are
/// only decoded once their terminating newline has arrived. A line or frame
/// larger than the decoder's limit is discarded along with the frame it
/// belongs to; decoding resumes after the next blank line.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    id: Option<String>,
    limit: usize,
    skipping_line: bool,
    dropping_frame: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
            data_len: 0,
            id: None,
            limit,
            skipping_line: false,
            dropping_frame: false,
        }
    }

    /// Bytes held back waiting for a newline
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Feed a chunk of bytes and return every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let chunk = if self.skipping_line {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.skipping_line = false;
                    &chunk[pos + 1..]
                }
                None => return Vec::new(),
            }
        } else {
            chunk
        };
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        if self.buffer.len() > self.limit {
            tracing::warn!("[STREAM] Discarding event with a line over {} bytes", self.limit);
            self.buffer = Vec::new();
            self.skipping_line = true;
            self.drop_frame();
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment lines are liveness pings from proxies or the server.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" if !self.dropping_frame => {
                self.data_len += value.len() + 1;
                if self.data_len > self.limit {
                    tracing::warn!("[STREAM] Discarding event with over {} bytes of data", self.limit);
                    self.drop_frame();
                } else {
                    self.data.push(value.to_string());
                }
            }
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn drop_frame(&mut self) {
        self.dropping_frame = true;
        self.data = Vec::new();
        self.data_len = 0;
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let id = self.id.take();
        self.data_len = 0;
        if std::mem::take(&mut self.dropping_frame) {
            self.data.clear();
            return None;
        }
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data, id })
    }
}

/// Kind of incremental change carried by a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    #[serde(alias = "Added", alias = "ADDED", alias = "add", alias = "created")]
    Added,
    #[serde(alias = "Modified", alias = "MODIFIED", alias = "modify", alias = "updated")]
    Modified,
    #[serde(alias = "Removed", alias = "REMOVED", alias = "remove", alias = "deleted")]
    Removed,
}

/// A decoded event for one channel
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T> {
    /// Full current state of the subscribed collection
    Snapshot(Vec<T>),
    /// An item was created
    Added(T),
    /// An item changed
    Modified(T),
    /// An item was deleted
    Removed { id: String },
    /// Liveness signal without data
    Keepalive,
}

#[derive(Deserialize)]
struct SnapshotPayload<T> {
    items: Vec<T>,
}

#[derive(Deserialize)]
struct ChangeEnvelope {
    #[serde(rename = "type")]
    kind: ChangeKind,
    item: Value,
}

impl<T: DeserializeOwned> StreamEvent<T> {
    /// Parse a frame into an event.
    ///
    /// Named frames (`snapshot`, `added`, `modified`, `removed`, `keepalive`)
    /// select the variant directly; unnamed or `message`/`change` frames carry
    /// a `{type, item}` envelope or a `{items}` snapshot.
    pub fn decode(frame: &SseFrame) -> Result<Self, SharedError> {
        let name = frame.event.as_deref().map(|name| name.trim().to_ascii_lowercase());

        match name.as_deref() {
            Some("keepalive" | "ping" | "heartbeat") => Ok(StreamEvent::Keepalive),
            Some("snapshot" | "initial" | "init") => Self::decode_snapshot(&frame.data),
            Some("added") => Self::decode_change(ChangeKind::Added, parse_data(&frame.data)?),
            Some("modified") => Self::decode_change(ChangeKind::Modified, parse_data(&frame.data)?),
            Some("removed") => Self::decode_change(ChangeKind::Removed, parse_data(&frame.data)?),
            None | Some("" | "message" | "change" | "update") => Self::decode_envelope(&frame.data),
            Some(other) => Err(SharedError::validation(
                "event",
                format!("unknown event type '{}'", other),
            )),
        }
    }

    fn decode_snapshot(data: &str) -> Result<Self, SharedError> {
        let payload: SnapshotPayload<T> = serde_json::from_str(data)?;
        Ok(StreamEvent::Snapshot(payload.items))
    }

    fn decode_envelope(data: &str) -> Result<Self, SharedError> {
        if data.trim().is_empty() {
            return Ok(StreamEvent::Keepalive);
        }

        let value = parse_data(data)?;
        if value.get("items").is_some() {
            let payload: SnapshotPayload<T> = serde_json::from_value(value)?;
            return Ok(StreamEvent::Snapshot(payload.items));
        }

        let envelope: ChangeEnvelope = serde_json::from_value(value)?;
        Self::decode_change(envelope.kind, envelope.item)
    }

    fn decode_change(kind: ChangeKind, value: Value) -> Result<Self, SharedError> {
        // Named events may wrap the record in `item` or send it bare.
        let item = match value {
            Value::Object(mut map) if map.contains_key("item") => {
                map.remove("item").unwrap_or(Value::Null)
            }
            other => other,
        };

        match kind {
            ChangeKind::Added => Ok(StreamEvent::Added(serde_json::from_value(item)?)),
            ChangeKind::Modified => Ok(StreamEvent::Modified(serde_json::from_value(item)?)),
            ChangeKind::Removed => {
                let item: ItemRef = serde_json::from_value(item)?;
                Ok(StreamEvent::Removed { id: item.id })
            }
        }
    }
}

fn parse_data(data: &str) -> Result<Value, SharedError> {
    Ok(serde_json::from_str(data)?)
}
