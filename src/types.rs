//! Core types for page load reconciliation
//!
//! This module defines the records that flow through the engine: the page load
//! label, one Navigation Timing per page load, and the per-object HAR and
//! Resource Timing records. Absent measurements are `None` everywhere; the
//! literal "NA" only exists at the file boundary (see [`crate::store::fields`]).

use crate::error::TimingsError;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status code logged when there was no reply at all
pub const STATUS_NO_REPLY: i32 = 0;
/// A reply occurred but its status code could not be recovered
pub const STATUS_UNRECOVERABLE: i32 = -1;
/// HTTP/2 server push, status legitimately absent in the HAR
pub const STATUS_SERVER_PUSH: i32 = -2;
/// Placeholder status for objects only seen in Resource Timing
pub const STATUS_RES_ONLY: i32 = -123;

/// Timestamp format used in page labels and HAR timing logs
pub const LABEL_TIME_FORMAT: &str = "%Y-%m-%d+%H-%M-%S%.6f";
/// Lenient variant of [`LABEL_TIME_FORMAT`] for parsing
pub const LABEL_TIME_PARSE_FORMAT: &str = "%Y-%m-%d+%H-%M-%S%.f";

/// Identity of one page load: host plus formatted start time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageLabel {
    pub host: String,
    pub starttime: String,
}

impl PageLabel {
    pub fn new(host: impl Into<String>, starttime: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            starttime: starttime.into(),
        }
    }

    /// Build a label from a full page URL ("http://host/...") and a start time
    pub fn from_page_url(page: &str, starttime: &str) -> Result<Self, TimingsError> {
        let host = page
            .split('/')
            .nth(2)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TimingsError::MalformedRecord(format!("no host in page URL {page}")))?;
        Ok(Self::new(host, starttime))
    }

    /// Parse "host+starttime"
    pub fn parse(label: &str) -> Result<Self, TimingsError> {
        label
            .split_once('+')
            .map(|(host, start)| Self::new(host, start))
            .ok_or_else(|| TimingsError::MalformedRecord(format!("invalid page label {label}")))
    }

    /// Page URL as logged in comparison outputs
    pub fn page_url(&self) -> String {
        format!("http://{}", self.host)
    }
}

impl fmt::Display for PageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.host, self.starttime)
    }
}

/// Navigation Timing events, in the browser's defined order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NavEvent {
    RedirectStart,
    RedirectEnd,
    FetchStart,
    DomainLookupStart,
    DomainLookupEnd,
    ConnectStart,
    SecureConnectionStart,
    ConnectEnd,
    RequestStart,
    ResponseStart,
    ResponseEnd,
    DomLoading,
    DomInteractive,
    DomContentLoadedEventStart,
    DomContentLoadedEventEnd,
    DomComplete,
    LoadEventStart,
    LoadEventEnd,
}

impl NavEvent {
    pub const COUNT: usize = 18;

    pub const ALL: [NavEvent; NavEvent::COUNT] = [
        NavEvent::RedirectStart,
        NavEvent::RedirectEnd,
        NavEvent::FetchStart,
        NavEvent::DomainLookupStart,
        NavEvent::DomainLookupEnd,
        NavEvent::ConnectStart,
        NavEvent::SecureConnectionStart,
        NavEvent::ConnectEnd,
        NavEvent::RequestStart,
        NavEvent::ResponseStart,
        NavEvent::ResponseEnd,
        NavEvent::DomLoading,
        NavEvent::DomInteractive,
        NavEvent::DomContentLoadedEventStart,
        NavEvent::DomContentLoadedEventEnd,
        NavEvent::DomComplete,
        NavEvent::LoadEventStart,
        NavEvent::LoadEventEnd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NavEvent::RedirectStart => "redirectStart",
            NavEvent::RedirectEnd => "redirectEnd",
            NavEvent::FetchStart => "fetchStart",
            NavEvent::DomainLookupStart => "domainLookupStart",
            NavEvent::DomainLookupEnd => "domainLookupEnd",
            NavEvent::ConnectStart => "connectStart",
            NavEvent::SecureConnectionStart => "secureConnectionStart",
            NavEvent::ConnectEnd => "connectEnd",
            NavEvent::RequestStart => "requestStart",
            NavEvent::ResponseStart => "responseStart",
            NavEvent::ResponseEnd => "responseEnd",
            NavEvent::DomLoading => "domLoading",
            NavEvent::DomInteractive => "domInteractive",
            NavEvent::DomContentLoadedEventStart => "domContentLoadedEventStart",
            NavEvent::DomContentLoadedEventEnd => "domContentLoadedEventEnd",
            NavEvent::DomComplete => "domComplete",
            NavEvent::LoadEventStart => "loadEventStart",
            NavEvent::LoadEventEnd => "loadEventEnd",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// One Navigation Timing record per page load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationTiming {
    /// Full page URL
    pub page: String,
    pub scenario: String,
    /// Start time in label form ("YYYY-MM-DD+HH-MM-SS.ffffff")
    pub starttime: String,
    pub start_unix_timestamp: Option<String>,
    /// Navigation start as Unix epoch seconds
    pub navigation_start: Option<f64>,
    /// Millisecond offsets from navigation start, indexed by [`NavEvent`]
    pub events: [Option<f64>; NavEvent::COUNT],
    pub first_paint: Option<f64>,
}

impl NavigationTiming {
    pub fn label(&self) -> Result<PageLabel, TimingsError> {
        PageLabel::from_page_url(&self.page, &self.starttime)
    }

    pub fn event(&self, event: NavEvent) -> Option<f64> {
        self.events[event.index()]
    }

    pub fn set_event(&mut self, event: NavEvent, value: Option<f64>) {
        self.events[event.index()] = value;
    }

    /// An event fired if it was logged with a positive offset
    pub fn fired(&self, event: NavEvent) -> Option<f64> {
        self.event(event).filter(|v| *v > 0.0)
    }

    /// Latest event that fired, scanning from redirectEnd up to loadEventEnd
    pub fn latest_fired_event(&self) -> Option<NavEvent> {
        NavEvent::ALL[1..]
            .iter()
            .copied()
            .filter(|e| self.fired(*e).is_some())
            .last()
    }
}

/// Proxy annotation "ip (port)" from an x-mahttpp-source header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyHop {
    pub ip: String,
    pub port: String,
}

impl ProxyHop {
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split(' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ip), Some(port), None) if !ip.is_empty() => Some(Self {
                ip: ip.to_string(),
                port: port.replace(['(', ')'], ""),
            }),
            _ => None,
        }
    }
}

/// HAR elapsed-time breakdown in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarPhases {
    pub blocked: Option<f64>,
    pub dns: Option<f64>,
    pub connect: Option<f64>,
    pub ssl: Option<f64>,
    pub send: Option<f64>,
    pub wait: Option<f64>,
    pub receive: Option<f64>,
}

impl HarPhases {
    /// Time spent before the request was sent
    pub fn pre_send_ms(&self) -> f64 {
        sum_positive([self.blocked, self.dns, self.connect, self.ssl])
    }

    /// Time until the request was completely sent
    pub fn post_send_ms(&self) -> f64 {
        sum_positive([self.blocked, self.dns, self.connect, self.ssl, self.send])
    }

    /// Time from start until the response was received, blocking excluded
    pub fn transaction_ms(&self) -> f64 {
        sum_positive([
            self.dns,
            self.connect,
            self.ssl,
            self.send,
            self.wait,
            self.receive,
        ])
    }
}

/// One HTTP transaction as normalized from a HAR entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarTiming {
    pub url: String,
    pub method: String,
    pub http_version: Option<String>,
    /// HTTP status, or one of the `STATUS_*` sentinels
    pub status: i32,
    pub mime_type: Option<String>,
    pub scenario: String,
    pub proxy_source: Option<ProxyHop>,
    pub proxy_source2: Option<ProxyHop>,
    /// Header plus body bytes on the wire
    pub transfer_size: Option<i64>,
    pub header_size: Option<i64>,
    /// Response body size as logged, possibly compressed
    pub body_size: Option<i64>,
    /// Value of the Content-Length response header
    pub content_length: Option<i64>,
    /// Decoded content size
    pub content_size: Option<i64>,
    pub started: NaiveDateTime,
    /// Milliseconds since the HAR page started
    pub start_delta_ms: f64,
    pub phases: HarPhases,
}

impl HarTiming {
    /// Finish time in milliseconds relative to the page start
    pub fn finish_ms(&self) -> f64 {
        let p = &self.phases;
        sum_positive([
            Some(self.start_delta_ms),
            p.blocked,
            p.dns,
            p.connect,
            p.send,
            p.wait,
            p.receive,
        ])
    }

    pub fn status_class(&self) -> Result<StatusClass, TimingsError> {
        StatusClass::from_code(self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Status in [100, 400): neither a hard failure nor unknown
    pub fn is_non_failed(&self) -> bool {
        (100..400).contains(&self.status)
    }
}

/// Resource Timing phase offsets in milliseconds since navigation start
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResPhases {
    pub redirect_start: Option<f64>,
    pub redirect_end: Option<f64>,
    pub fetch_start: Option<f64>,
    pub domain_lookup_start: Option<f64>,
    pub domain_lookup_end: Option<f64>,
    pub connect_start: Option<f64>,
    pub secure_connection_start: Option<f64>,
    pub connect_end: Option<f64>,
    pub request_start: Option<f64>,
    pub response_start: Option<f64>,
}

/// One resource load as exposed by the Resource Timing API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResTiming {
    pub url: String,
    pub scenario: String,
    pub initiator_type: Option<String>,
    pub next_hop_protocol: Option<String>,
    pub encoded_body_size: Option<i64>,
    pub decoded_body_size: Option<i64>,
    pub start_ms: f64,
    pub phases: ResPhases,
    pub response_end_ms: f64,
    pub duration_ms: f64,
}

impl ResTiming {
    /// Protocol as spelled in HAR logs
    pub fn http_version(&self) -> String {
        match self.next_hop_protocol.as_deref() {
            Some("h2") => "http/2.0".to_string(),
            Some(p) => p.to_string(),
            None => "NA".to_string(),
        }
    }
}

/// Closed histogram bands for HTTP status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    NoReply,
    Informational,
    Ok,
    OtherSuccess,
    Redirect,
    ClientError,
    ServerError,
    Unknown,
}

impl StatusClass {
    pub fn from_code(status: i32) -> Result<Self, TimingsError> {
        match status {
            0 => Ok(StatusClass::NoReply),
            100..=199 => Ok(StatusClass::Informational),
            200 => Ok(StatusClass::Ok),
            201..=299 => Ok(StatusClass::OtherSuccess),
            300..=399 => Ok(StatusClass::Redirect),
            400..=499 => Ok(StatusClass::ClientError),
            500..=599 => Ok(StatusClass::ServerError),
            s if s < 0 => Ok(StatusClass::Unknown),
            s => Err(TimingsError::InvalidStatus(s)),
        }
    }
}

/// Sum of the positive values, ignoring absent ones
pub fn sum_positive<I>(values: I) -> f64
where
    I: IntoIterator<Item = Option<f64>>,
{
    values.into_iter().flatten().filter(|v| *v > 0.0).sum()
}

/// Convert fractional milliseconds to a chrono duration (microsecond precision)
pub fn millis(ms: f64) -> Duration {
    Duration::microseconds((ms * 1000.0).round() as i64)
}

/// Parse a label-form timestamp ("YYYY-MM-DD+HH-MM-SS.ffffff")
pub fn parse_label_time(value: &str) -> Result<NaiveDateTime, TimingsError> {
    NaiveDateTime::parse_from_str(value, LABEL_TIME_PARSE_FORMAT)
        .map_err(|e| TimingsError::DateParseError(format!("{value}: {e}")))
}
