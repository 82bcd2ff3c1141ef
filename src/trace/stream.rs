//! Per-connection HTTP object reconstruction
//!
//! Every request seen on a TCP stream becomes a [`TracedObject`] that expects
//! the server's next bytes at the request's ack number. Server segments are
//! attributed to the object expecting their sequence number and drive its
//! [`ObjectState`] until it is either completed (header and body lengths known)
//! or invalidated. Invalidated objects are never reported with sizes.

use super::packet::Packet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Server side of the traced connections
pub const HTTP_PORT: u16 = 80;

const CRLFCRLF: &[u8] = b"\r\n\r\n";
const LFLF: &[u8] = b"\n\n";
const STATUS_LINE_PREFIXES: [&[u8]; 2] = [b"HTTP/1.1 ", b"HTTP/1.0 "];

/// Byte counts of a completed response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSizes {
    pub status: u16,
    /// Length of the segment carrying the status code
    pub tcp_len: usize,
    pub header_len: usize,
    pub body_len: usize,
}

impl ObjectSizes {
    /// Split a response at the end of its header block
    ///
    /// Returns `None` for LF-only framing, which is not tracked.
    fn split(status: u16, tcp_len: usize, response: &[u8]) -> Option<Self> {
        match find(response, CRLFCRLF) {
            Some(end) => Some(Self {
                status,
                tcp_len,
                header_len: end + CRLFCRLF.len(),
                body_len: response.len() - end - CRLFCRLF.len(),
            }),
            None if find(response, LFLF).is_some() => None,
            None => Some(Self {
                status,
                tcp_len,
                header_len: response.len(),
                body_len: 0,
            }),
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// Another request expected the same bytes before this one got its response
    PipelineCollision,
    /// Payload length disagrees with the TCP segment length
    LengthMismatch,
    /// Header block terminated by a bare LF LF
    LfLfFraming,
    /// Server bytes that do not start a response
    UnexpectedPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectState {
    AwaitingResponse { next_seq: u64 },
    /// A response the dissector did not recognize, collected until one that it does
    BufferingUndissectedResponse { next_seq: u64, buffered: Vec<u8> },
    Completed(ObjectSizes),
    Invalidated(InvalidReason),
}

impl ObjectState {
    /// Sequence number this object expects next, if any
    pub fn expected_seq(&self) -> Option<u64> {
        match self {
            ObjectState::AwaitingResponse { next_seq }
            | ObjectState::BufferingUndissectedResponse { next_seq, .. } => Some(*next_seq),
            ObjectState::Completed(_) | ObjectState::Invalidated(_) => None,
        }
    }

    /// Transition on a server segment that was expected by this object
    pub fn on_segment(self, packet: &Packet) -> ObjectState {
        let fields = &packet.fields;
        let Some(payload) = packet.checked_payload() else {
            return ObjectState::Invalidated(InvalidReason::LengthMismatch);
        };
        let next_seq = fields.seq + fields.tcp_len as u64;

        match (self, fields.response_code) {
            (ObjectState::BufferingUndissectedResponse { mut buffered, .. }, Some(status)) => {
                buffered.extend_from_slice(&payload);
                complete(status, fields.tcp_len, &buffered)
            }
            (_, Some(status)) => complete(status, fields.tcp_len, &payload),
            (ObjectState::BufferingUndissectedResponse { mut buffered, .. }, None) => {
                buffered.extend_from_slice(&payload);
                ObjectState::BufferingUndissectedResponse { next_seq, buffered }
            }
            (_, None) if STATUS_LINE_PREFIXES.iter().any(|p| payload.starts_with(p)) => {
                ObjectState::BufferingUndissectedResponse {
                    next_seq,
                    buffered: payload,
                }
            }
            (_, None) => ObjectState::Invalidated(InvalidReason::UnexpectedPayload),
        }
    }
}

fn complete(status: u16, tcp_len: usize, response: &[u8]) -> ObjectState {
    match ObjectSizes::split(status, tcp_len, response) {
        Some(sizes) => ObjectState::Completed(sizes),
        None => ObjectState::Invalidated(InvalidReason::LfLfFraming),
    }
}

/// One HTTP request seen in the trace
#[derive(Debug, Clone, PartialEq)]
pub struct TracedObject {
    pub host: String,
    pub uri: String,
    /// Request timestamp as printed by the dissector
    pub request_timestamp: String,
    pub request_epoch: f64,
    pub state: ObjectState,
}

impl TracedObject {
    pub fn url(&self) -> String {
        format!("http://{}{}", self.host, self.uri)
    }

    pub fn sizes(&self) -> Option<&ObjectSizes> {
        match &self.state {
            ObjectState::Completed(sizes) => Some(sizes),
            _ => None,
        }
    }
}

/// Objects of one TCP stream, in request order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamObjects {
    pub objects: Vec<TracedObject>,
}

impl StreamObjects {
    fn expecting(&mut self, seq: u64) -> Option<&mut TracedObject> {
        self.objects
            .iter_mut()
            .find(|o| o.state.expected_seq() == Some(seq))
    }

    fn on_request(&mut self, packet: &Packet) {
        let fields = &packet.fields;
        if let Some(pending) = self.expecting(fields.ack) {
            debug!(uri = %pending.uri, "request while a response is still expected, invalidating");
            pending.state = ObjectState::Invalidated(InvalidReason::PipelineCollision);
        }
        let request_epoch = match fields.epoch_secs() {
            Ok(epoch) => epoch,
            Err(e) => {
                debug!(error = %e, "request without timestamp");
                return;
            }
        };
        self.objects.push(TracedObject {
            host: fields.host.clone().unwrap_or_default(),
            uri: fields.request_uri.clone().unwrap_or_default(),
            request_timestamp: fields.timestamp.clone(),
            request_epoch,
            state: ObjectState::AwaitingResponse {
                next_seq: fields.ack,
            },
        });
    }

    fn on_server_segment(&mut self, packet: &Packet) {
        let Some(object) = self.expecting(packet.fields.seq) else {
            return;
        };
        let state = std::mem::replace(
            &mut object.state,
            ObjectState::Invalidated(InvalidReason::UnexpectedPayload),
        );
        object.state = state.on_segment(packet);
        if let ObjectState::Invalidated(reason) = &object.state {
            debug!(uri = %object.uri, ?reason, "invalidated");
        }
    }
}

/// Replays packets into per-stream object lists
#[derive(Debug, Clone, Default)]
pub struct TraceReconstructor {
    streams: BTreeMap<u64, StreamObjects>,
}

impl TraceReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, packet: &Packet) {
        let fields = &packet.fields;
        if fields.is_request() {
            self.streams
                .entry(fields.stream)
                .or_default()
                .on_request(packet);
        } else if fields.src_port == HTTP_PORT {
            if let Some(stream) = self.streams.get_mut(&fields.stream) {
                stream.on_server_segment(packet);
            }
        }
    }

    pub fn feed_all<'a, I: IntoIterator<Item = &'a Packet>>(&mut self, packets: I) {
        for packet in packets {
            self.feed(packet);
        }
    }

    /// Streams with at least one request, by stream index
    pub fn into_streams(self) -> BTreeMap<u64, StreamObjects> {
        self.streams
    }
}
