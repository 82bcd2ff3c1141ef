//! Dissected packets
//!
//! The dissector prints two aligned line streams for the same capture: one
//! `#`-separated field line per packet and one hex-encoded TCP payload per
//! packet (dissected without the HTTP dissector, so the raw bytes survive).

use crate::error::TimingsError;

/// Fields printed for every packet, in order
pub const PACKET_FIELDS: [&str; 9] = [
    "frame.time_epoch",
    "tcp.stream",
    "tcp.srcport",
    "tcp.seq",
    "tcp.ack",
    "http.host",
    "http.request.uri",
    "http.response.code",
    "tcp.len",
];

/// Dissected header fields of one packet
#[derive(Debug, Clone, PartialEq)]
pub struct PacketFields {
    /// Epoch timestamp as printed, kept verbatim for the output log
    pub timestamp: String,
    pub stream: u64,
    pub src_port: u16,
    pub seq: u64,
    pub ack: u64,
    pub host: Option<String>,
    pub request_uri: Option<String>,
    pub response_code: Option<u16>,
    pub tcp_len: usize,
}

fn number<T: std::str::FromStr>(value: &str, name: &str, line: &str) -> Result<T, TimingsError> {
    value
        .trim()
        .parse()
        .map_err(|_| TimingsError::MalformedRecord(format!("{name} {value:?} in packet {line:?}")))
}

fn text(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl PacketFields {
    pub fn parse(line: &str) -> Result<Self, TimingsError> {
        let fields: Vec<&str> = line.split('#').collect();
        if fields.len() < PACKET_FIELDS.len() {
            return Err(TimingsError::MalformedRecord(format!(
                "expected {} fields in packet {line:?}",
                PACKET_FIELDS.len()
            )));
        }
        // Responses split over several segments carry one code per segment
        let response_code = match fields[7].split(',').next().map(str::trim) {
            Some(code) if !code.is_empty() => Some(number(code, "http.response.code", line)?),
            _ => None,
        };
        Ok(Self {
            timestamp: fields[0].trim().to_string(),
            stream: number(fields[1], "tcp.stream", line)?,
            src_port: number(fields[2], "tcp.srcport", line)?,
            seq: number(fields[3], "tcp.seq", line)?,
            ack: number(fields[4], "tcp.ack", line)?,
            host: text(fields[5]),
            request_uri: text(fields[6]),
            response_code,
            tcp_len: number(fields[8], "tcp.len", line)?,
        })
    }

    pub fn epoch_secs(&self) -> Result<f64, TimingsError> {
        number(&self.timestamp, "frame.time_epoch", &self.timestamp)
    }

    pub fn is_request(&self) -> bool {
        self.request_uri.is_some()
    }
}

/// One packet: dissected fields plus its raw TCP payload
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub fields: PacketFields,
    pub payload_hex: String,
}

impl Packet {
    pub fn new(fields: PacketFields, payload_hex: impl Into<String>) -> Self {
        Self {
            fields,
            payload_hex: payload_hex.into(),
        }
    }

    pub fn payload(&self) -> Result<Vec<u8>, TimingsError> {
        Ok(hex::decode(self.payload_hex.trim())?)
    }

    /// Decoded payload, only if it is exactly as long as the TCP segment says
    pub fn checked_payload(&self) -> Option<Vec<u8>> {
        self.payload()
            .ok()
            .filter(|payload| payload.len() == self.fields.tcp_len)
    }
}

/// Pair field lines with payload lines; unparseable packets are skipped
pub fn parse_packets<F, D>(field_lines: F, data_lines: D) -> Vec<Packet>
where
    F: IntoIterator,
    F::Item: AsRef<str>,
    D: IntoIterator,
    D::Item: AsRef<str>,
{
    field_lines
        .into_iter()
        .zip(data_lines)
        .filter_map(|(fields, data)| match PacketFields::parse(fields.as_ref()) {
            Ok(parsed) => Some(Packet::new(parsed, data.as_ref())),
            Err(e) => {
                tracing::debug!(error = %e, "skipping packet");
                None
            }
        })
        .collect()
}
