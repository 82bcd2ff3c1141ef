//! Packet-trace object reconstruction
//!
//! Re-derives per-object HTTP header and body sizes from the TCP byte stream
//! of a capture and compares them with the HAR and Resource Timing sizes.

pub mod packet;
pub mod stream;
pub mod validate;

pub use packet::{parse_packets, Packet, PacketFields};
pub use stream::{
    InvalidReason, ObjectSizes, ObjectState, StreamObjects, TraceReconstructor, TracedObject,
};
pub use validate::{group_by_page, local_time, validate_page, PageObjects, TraceExtractor, Tshark};
