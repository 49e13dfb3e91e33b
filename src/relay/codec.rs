//! Wire format between the device and the desktop peer
//!
//! Payloads are JSON objects. Outbound notifications look like
//! `{"appName", "sender"?, "content", "iconBase64"?, "key"}` and inbound replies
//! like `{"key", "reply"}`. Each payload is wrapped in a frame so that a single
//! read may carry a fragment of a message, or several messages, without loss.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{RelayError, Result};
use super::event::{NotificationEvent, ReplyMessage};

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound for an inbound frame
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// How payloads are delimited on the byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WireFraming {
    /// 4-byte big-endian length followed by the payload
    #[default]
    LengthPrefixed,
    /// Bare concatenated JSON values (what the first desktop client speaks)
    Json,
}

/// Outbound notification as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireNotification {
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_base64: Option<String>,
    pub key: String,
}

/// Result of decoding an inbound payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Reply(ReplyMessage),
    /// Anything that is not a well-formed reply; the reason is meant for logs
    NotAReply(String),
}

/// Serializes notification events and parses reply messages
#[derive(Debug, Clone)]
pub struct NotificationCodec {
    framing: WireFraming,
    max_frame_len: usize,
}

impl Default for NotificationCodec {
    fn default() -> Self {
        Self::new(WireFraming::default(), DEFAULT_MAX_FRAME_LEN)
    }
}

impl NotificationCodec {
    pub fn new(framing: WireFraming, max_frame_len: usize) -> Self {
        Self {
            framing,
            max_frame_len,
        }
    }

    pub fn framing(&self) -> WireFraming {
        self.framing
    }

    /// Serialize an event to its JSON payload (unframed)
    pub fn encode(&self, event: &NotificationEvent) -> Result<Vec<u8>> {
        self.encode_with_icon(event, true)
    }

    fn encode_with_icon(&self, event: &NotificationEvent, include_icon: bool) -> Result<Vec<u8>> {
        let wire = WireNotification {
            app_name: event.app_name.clone(),
            sender: event.sender.clone(),
            content: event.body.clone(),
            icon_base64: event
                .icon
                .as_ref()
                .filter(|icon| include_icon && !icon.is_empty())
                .map(|icon| base64::engine::general_purpose::STANDARD.encode(icon)),
            key: event.key.clone(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Serialize a reply to its JSON payload (peer side)
    pub fn encode_reply(&self, reply: &ReplyMessage) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(reply)?)
    }

    /// Encode and frame an event in one step.
    ///
    /// An event over the frame limit is sent without its icon; if it still does
    /// not fit, `FrameTooLarge` is returned.
    pub fn encode_frame(&self, event: &NotificationEvent) -> Result<Vec<u8>> {
        match self.frame(&self.encode(event)?) {
            Err(RelayError::FrameTooLarge { len, limit }) if event.icon.is_some() => {
                tracing::warn!(key = %event.key, len, limit, "Notification too large, dropping icon");
                self.frame(&self.encode_with_icon(event, false)?)
            }
            framed => framed,
        }
    }

    /// Wrap a payload according to the configured framing
    pub fn frame(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let too_large = || RelayError::FrameTooLarge {
            len: payload.len(),
            limit: self.max_frame_len,
        };
        if payload.len() > self.max_frame_len {
            return Err(too_large());
        }
        match self.framing {
            WireFraming::LengthPrefixed => {
                let len = u32::try_from(payload.len()).map_err(|_| too_large())?;
                let mut framed = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
                framed.extend_from_slice(&len.to_be_bytes());
                framed.extend_from_slice(payload);
                Ok(framed)
            }
            WireFraming::Json => Ok(payload.to_vec()),
        }
    }

    /// Parse an inbound payload as a reply.
    ///
    /// Never fails: malformed or unrelated payloads come back as `NotAReply`.
    pub fn decode(&self, bytes: &[u8]) -> DecodeOutcome {
        let value: Value = match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(e) => return DecodeOutcome::NotAReply(format!("payload is not JSON: {}", e)),
        };
        let Some(object) = value.as_object() else {
            return DecodeOutcome::NotAReply("payload is not a JSON object".to_string());
        };

        let key = object.get("key").and_then(Value::as_str);
        let reply = object.get("reply").and_then(Value::as_str);
        match (key, reply) {
            (Some(key), Some(reply)) => DecodeOutcome::Reply(ReplyMessage::new(key, reply)),
            _ => {
                let mut missing = Vec::new();
                if key.is_none() {
                    missing.push("key");
                }
                if reply.is_none() {
                    missing.push("reply");
                }
                DecodeOutcome::NotAReply(format!("missing field(s): {}", missing.join(", ")))
            }
        }
    }

    /// Parse an outbound notification payload (peer side)
    pub fn decode_notification(&self, bytes: &[u8]) -> Result<WireNotification> {
        serde_json::from_slice(bytes)
            .map_err(|e| RelayError::Decode(format!("not a notification payload: {}", e)))
    }

    /// Create a stateful decoder for one connection
    pub fn frame_decoder(&self) -> FrameDecoder {
        FrameDecoder::new(self.framing, self.max_frame_len)
    }
}

/// Reassembles frames from arbitrarily chunked reads
#[derive(Debug)]
pub struct FrameDecoder {
    framing: WireFraming,
    max_frame_len: usize,
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(framing: WireFraming, max_frame_len: usize) -> Self {
        Self {
            framing,
            max_frame_len,
            buffer: Vec::new(),
        }
    }

    /// Append bytes from one read
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete payload, if any.
    ///
    /// An error means the stream can no longer be trusted and the connection
    /// should be dropped.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match self.framing {
            WireFraming::LengthPrefixed => self.next_length_prefixed(),
            WireFraming::Json => Ok(self.next_json_value()),
        }
    }

    fn next_length_prefixed(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buffer.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }
        let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
        len_buf.copy_from_slice(&self.buffer[..LENGTH_PREFIX_LEN]);
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_frame_len {
            return Err(RelayError::Decode(format!(
                "frame of {} bytes exceeds limit of {} bytes",
                len, self.max_frame_len
            )));
        }

        let end = LENGTH_PREFIX_LEN + len;
        if self.buffer.len() < end {
            return Ok(None);
        }
        let frame = self.buffer[LENGTH_PREFIX_LEN..end].to_vec();
        self.buffer.drain(..end);
        Ok(Some(frame))
    }

    fn next_json_value(&mut self) -> Option<Vec<u8>> {
        let start = match self.buffer.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(start) => start,
            None => {
                self.buffer.clear();
                return None;
            }
        };
        self.buffer.drain(..start);

        // Ok(end) for a complete value, Err(true) when more bytes are needed
        let scanned: std::result::Result<usize, bool> = {
            let mut values = serde_json::Deserializer::from_slice(&self.buffer)
                .into_iter::<serde::de::IgnoredAny>();
            match values.next() {
                Some(Ok(_)) => Ok(values.byte_offset()),
                Some(Err(e)) => Err(e.is_eof()),
                None => Err(true),
            }
        };

        match scanned {
            Ok(end) => {
                let frame = self.buffer[..end].to_vec();
                self.buffer.drain(..end);
                Some(frame)
            }
            Err(true) if self.buffer.len() <= self.max_frame_len => None,
            // Garbage or runaway value: hand over everything up to the next `{`
            // so it gets logged and dropped, and resume scanning there
            Err(_) => {
                let resume = self.buffer[1..]
                    .iter()
                    .position(|&b| b == b'{')
                    .map_or(self.buffer.len(), |pos| pos + 1);
                Some(self.buffer.drain(..resume).collect())
            }
        }
    }
}
