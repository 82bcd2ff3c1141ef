//! HAR normalization
//!
//! Flattens every HAR entry into one [`HarTiming`]:
//! - method, declared body size and status are required; their absence is fatal
//! - optional size fields are recovered as absent, never as zero
//! - a status of 0 with evidence of a reply is reclassified (server push or unrecoverable)
//! - missing send/wait/receive are only tolerated when there was no reply

use super::document::{HarDocument, HarEntry, HarTimings, WEB_INSPECTOR};
use crate::error::TimingsError;
use crate::types::{
    HarPhases, HarTiming, ProxyHop, STATUS_NO_REPLY, STATUS_SERVER_PUSH, STATUS_UNRECOVERABLE,
};
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

const HAR_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Tool that exported the HAR, which decides how timestamps are suffixed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarProducer {
    /// Trailing "Z"
    WebInspector,
    /// Trailing "+HH:MM" offset
    Other,
}

impl HarProducer {
    pub fn of(doc: &HarDocument) -> Self {
        match doc.creator_name() {
            Some(WEB_INSPECTOR) => HarProducer::WebInspector,
            _ => HarProducer::Other,
        }
    }

    fn suffix_len(self) -> usize {
        match self {
            HarProducer::WebInspector => 1,
            HarProducer::Other => 6,
        }
    }

    /// Parse an ISO-8601 timestamp, dropping the zone suffix as logged
    pub fn parse_time(self, value: &str) -> Result<NaiveDateTime, TimingsError> {
        let local = value
            .len()
            .checked_sub(self.suffix_len())
            .and_then(|end| value.get(..end))
            .ok_or_else(|| TimingsError::DateParseError(format!("timestamp too short: {value}")))?;
        NaiveDateTime::parse_from_str(local, HAR_TIME_FORMAT)
            .map_err(|e| TimingsError::DateParseError(format!("{value}: {e}")))
    }
}

/// Normalizer for converting a HAR document to flat HAR timings
pub struct HarNormalizer {
    scenario: String,
}

impl HarNormalizer {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
        }
    }

    /// Normalize all entries, in document order
    pub fn normalize(&self, doc: &HarDocument) -> Result<Vec<HarTiming>, TimingsError> {
        let producer = HarProducer::of(doc);
        let page_started = doc
            .log
            .pages
            .first()
            .and_then(|p| p.started_date_time.as_deref())
            .ok_or_else(|| TimingsError::MissingField("pages[0].startedDateTime".to_string()))?;
        let page_started = producer.parse_time(page_started)?;

        doc.log
            .entries
            .iter()
            .map(|entry| self.normalize_entry(entry, producer, page_started))
            .collect()
    }

    fn normalize_entry(
        &self,
        entry: &HarEntry,
        producer: HarProducer,
        page_started: NaiveDateTime,
    ) -> Result<HarTiming, TimingsError> {
        let url = &entry.request.url;
        let response = &entry.response;

        let started = producer.parse_time(&entry.started_date_time)?;
        let start_delta_ms = (started - page_started)
            .num_microseconds()
            .map(|us| us as f64 / 1000.0)
            .ok_or_else(|| TimingsError::DateParseError(format!("start delta overflow for {url}")))?;

        let method = entry
            .request
            .method
            .clone()
            .ok_or_else(|| missing("request.method", url))?;
        // null is logged for "invalid", which is the same as -1
        let raw_body_size = match response.body_size {
            None => return Err(missing("response.bodySize", url)),
            Some(size) => size.unwrap_or(-1.0),
        };
        let mut status = response
            .status
            .ok_or_else(|| missing("response.status", url))? as i32;

        let content_size = match response.content.as_ref().and_then(|c| c.size) {
            None => {
                info!(url = %url, "no response content size, treating as absent");
                None
            }
            Some(size) if size <= 0.0 => None,
            Some(size) => Some(size as i64),
        };
        let headers = match response.headers.as_deref() {
            Some(headers) => headers,
            None => {
                info!(url = %url, "no response headers, treating as empty");
                &[]
            }
        };
        let header_size = response
            .headers_size
            .filter(|size| *size >= 0.0)
            .map(|size| size as i64);
        let content_length = response
            .header("Content-Length")
            .and_then(|v| v.trim().parse::<i64>().ok());
        let transfer_size = response
            .transfer_size
            .filter(|size| *size >= 0.0)
            .map(|size| size as i64);
        let body_size = (raw_body_size != -1.0).then_some(raw_body_size as i64);

        if status == STATUS_NO_REPLY {
            let reply_evidence = body_size.is_some()
                || content_size.is_some()
                || content_length.is_some()
                || header_size.is_some()
                || !headers.is_empty();
            if reply_evidence {
                status = if response.has_push_header() {
                    STATUS_SERVER_PUSH
                } else {
                    STATUS_UNRECOVERABLE
                };
                warn!(
                    url = %url,
                    started = %entry.started_date_time,
                    status,
                    "inconsistent HAR: status 0 logged although a reply occurred"
                );
            }
        }

        let mime_type = response
            .content
            .as_ref()
            .and_then(|c| c.mime_type.clone())
            .or_else(|| response.header("mimeType").map(str::to_string))
            .filter(|m| !m.is_empty());

        Ok(HarTiming {
            url: url.clone(),
            method,
            http_version: entry
                .request
                .http_version
                .clone()
                .filter(|v| !v.is_empty()),
            status,
            mime_type,
            scenario: self.scenario.clone(),
            proxy_source: proxy_hop(entry, "x-mahttpp-source"),
            proxy_source2: proxy_hop(entry, "x-mahttpp-source2"),
            transfer_size,
            header_size,
            body_size,
            content_length,
            content_size,
            started,
            start_delta_ms,
            phases: phases(entry.timings.as_ref(), status, url)?,
        })
    }
}

fn missing(field: &str, url: &str) -> TimingsError {
    TimingsError::MissingField(format!("{field} for {url}"))
}

fn proxy_hop(entry: &HarEntry, header: &str) -> Option<ProxyHop> {
    let value = entry.response.header(header).filter(|v| !v.is_empty())?;
    let hop = ProxyHop::parse(value);
    if hop.is_none() {
        debug!(header, value, "could not split proxy annotation");
    }
    hop
}

fn phases(
    timings: Option<&HarTimings>,
    status: i32,
    url: &str,
) -> Result<HarPhases, TimingsError> {
    let field = |f: fn(&HarTimings) -> Option<f64>| timings.and_then(f);

    let mut phases = HarPhases::default();
    match (
        field(|t| t.send),
        field(|t| t.wait),
        field(|t| t.receive),
    ) {
        (Some(send), Some(wait), Some(receive)) => {
            phases.send = Some(send);
            phases.wait = Some(wait);
            phases.receive = Some(receive);
        }
        (send, wait, _) => {
            let absent = if send.is_none() {
                "send"
            } else if wait.is_none() {
                "wait"
            } else {
                "receive"
            };
            if status > STATUS_NO_REPLY {
                return Err(TimingsError::MissingTiming {
                    field: absent.to_string(),
                    url: url.to_string(),
                });
            }
            debug!(url, timing = absent, "no timing for an object without reply");
        }
    }

    match (
        field(|t| t.blocked),
        field(|t| t.dns),
        field(|t| t.connect),
        field(|t| t.ssl),
    ) {
        (Some(blocked), Some(dns), Some(connect), Some(ssl)) => {
            phases.blocked = Some(blocked);
            phases.dns = Some(dns);
            phases.connect = Some(connect);
            phases.ssl = Some(ssl);
        }
        _ => {
            debug!(url, "optional connection timings missing, using 0");
            phases.blocked = Some(0.0);
            phases.dns = Some(0.0);
            phases.connect = Some(0.0);
            phases.ssl = Some(0.0);
        }
    }

    Ok(phases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn document(creator: &str, page_started: &str, entries: &str) -> HarDocument {
        let json = format!(
            r#"{{"log": {{
                "creator": {{"name": "{creator}"}},
                "pages": [{{"startedDateTime": "{page_started}", "pageTimings": {{"onLoad": 1500}}}}],
                "entries": [{entries}]
            }}}}"#
        );
        HarDocument::from_json(&json).unwrap()
    }

    const FULL_TIMINGS: &str = r#""timings": {"blocked": 1, "dns": 2, "connect": 3, "ssl": -1, "send": 1, "wait": 20, "receive": 5}"#;

    fn entry(started: &str, response: &str, timings: &str) -> String {
        format!(
            r#"{{"startedDateTime": "{started}",
                "request": {{"url": "http://example.com/a.png", "method": "GET", "httpVersion": "HTTP/1.1"}},
                "response": {response},
                {timings}}}"#
        )
    }

    #[test]
    fn test_normalize_complete_entry() {
        let doc = document(
            "Firefox",
            "2018-09-20T12:00:00.000+02:00",
            &entry(
                "2018-09-20T12:00:00.250+02:00",
                r#"{"status": 200, "bodySize": 1000, "headersSize": 200, "_transferSize": 1200,
                    "headers": [{"name": "Content-Length", "value": "1000"},
                                {"name": "x-mahttpp-source", "value": "10.0.0.1 (3128)"}],
                    "content": {"size": 4000, "mimeType": "image/png"}}"#,
                FULL_TIMINGS,
            ),
        );
        let timings = HarNormalizer::new("default").normalize(&doc).unwrap();
        assert_eq!(timings.len(), 1);
        let t = &timings[0];
        assert_eq!(t.status, 200);
        assert_eq!(t.start_delta_ms, 250.0);
        assert_eq!(t.body_size, Some(1000));
        assert_eq!(t.content_length, Some(1000));
        assert_eq!(t.content_size, Some(4000));
        assert_eq!(t.header_size, Some(200));
        assert_eq!(t.transfer_size, Some(1200));
        assert_eq!(t.mime_type.as_deref(), Some("image/png"));
        assert_eq!(t.scenario, "default");
        assert_eq!(
            t.proxy_source,
            Some(ProxyHop {
                ip: "10.0.0.1".to_string(),
                port: "3128".to_string()
            })
        );
        assert_eq!(t.proxy_source2, None);
        assert_eq!(t.phases.ssl, Some(-1.0));
        assert_eq!(t.phases.wait, Some(20.0));
    }

    #[test]
    fn test_web_inspector_timestamps_drop_one_char() {
        let doc = document(
            WEB_INSPECTOR,
            "2018-09-20T12:00:00.000Z",
            &entry(
                "2018-09-20T12:00:01.500Z",
                r#"{"status": 200, "bodySize": 10}"#,
                FULL_TIMINGS,
            ),
        );
        let timings = HarNormalizer::new("s").normalize(&doc).unwrap();
        assert_eq!(timings[0].start_delta_ms, 1500.0);
        // absent optional sizes stay absent
        assert_eq!(timings[0].content_size, None);
        assert_eq!(timings[0].header_size, None);
        assert_eq!(timings[0].content_length, None);
    }

    #[test]
    fn test_status_zero_with_content_length_is_unrecoverable() {
        let doc = document(
            "Firefox",
            "2018-09-20T12:00:00.000+02:00",
            &entry(
                "2018-09-20T12:00:00.100+02:00",
                r#"{"status": 0, "bodySize": -1, "headersSize": -1,
                    "headers": [{"name": "Content-Length", "value": "512"}],
                    "content": {"size": 0}}"#,
                r#""timings": {}"#,
            ),
        );
        let timings = HarNormalizer::new("s").normalize(&doc).unwrap();
        assert_eq!(timings[0].status, STATUS_UNRECOVERABLE);
        assert_eq!(timings[0].phases.send, None);
    }

    #[test]
    fn test_status_zero_with_push_header_is_server_push() {
        let doc = document(
            "Firefox",
            "2018-09-20T12:00:00.000+02:00",
            &entry(
                "2018-09-20T12:00:00.100+02:00",
                r#"{"status": 0, "bodySize": -1,
                    "headers": [{"name": "Content-Length", "value": "512"},
                                {"name": "X-Firefox-Http2-Push", "value": "1"}]}"#,
                r#""timings": {}"#,
            ),
        );
        let timings = HarNormalizer::new("s").normalize(&doc).unwrap();
        assert_eq!(timings[0].status, STATUS_SERVER_PUSH);
    }

    #[test]
    fn test_status_zero_without_reply_stays_zero() {
        let doc = document(
            "Firefox",
            "2018-09-20T12:00:00.000+02:00",
            &entry(
                "2018-09-20T12:00:00.100+02:00",
                r#"{"status": 0, "bodySize": null, "headersSize": -1, "headers": []}"#,
                r#""timings": {"blocked": 0}"#,
            ),
        );
        let timings = HarNormalizer::new("s").normalize(&doc).unwrap();
        let t = &timings[0];
        assert_eq!(t.status, STATUS_NO_REPLY);
        assert_eq!(t.body_size, None);
        assert_eq!(t.phases.send, None);
        assert_eq!(t.phases.receive, None);
        assert_eq!(t.phases.dns, Some(0.0));
    }

    #[test]
    fn test_status_zero_with_invalid_content_size_stays_zero() {
        let doc = document(
            "Firefox",
            "2018-09-20T12:00:00.000+02:00",
            &entry(
                "2018-09-20T12:00:00.100+02:00",
                r#"{"status": 0, "bodySize": -1, "headersSize": -1, "headers": [],
                    "content": {"size": -1}}"#,
                r#""timings": {}"#,
            ),
        );
        let timings = HarNormalizer::new("s").normalize(&doc).unwrap();
        assert_eq!(timings[0].status, STATUS_NO_REPLY);
        assert_eq!(timings[0].content_size, None);
    }

    #[test]
    fn test_missing_required_field_is_fatal() {
        let doc = document(
            "Firefox",
            "2018-09-20T12:00:00.000+02:00",
            &entry(
                "2018-09-20T12:00:00.100+02:00",
                r#"{"status": 200}"#,
                FULL_TIMINGS,
            ),
        );
        let result = HarNormalizer::new("s").normalize(&doc);
        assert!(matches!(result, Err(TimingsError::MissingField(_))));
    }

    #[test]
    fn test_missing_send_with_reply_is_fatal() {
        let doc = document(
            "Firefox",
            "2018-09-20T12:00:00.000+02:00",
            &entry(
                "2018-09-20T12:00:00.100+02:00",
                r#"{"status": 200, "bodySize": 10}"#,
                r#""timings": {"wait": 10, "receive": 1}"#,
            ),
        );
        let result = HarNormalizer::new("s").normalize(&doc);
        match result {
            Err(TimingsError::MissingTiming { field, .. }) => assert_eq!(field, "send"),
            other => panic!("expected MissingTiming, got {other:?}"),
        }
    }

    #[test]
    fn test_partial_optional_timings_default_to_zero() {
        let doc = document(
            "Firefox",
            "2018-09-20T12:00:00.000+02:00",
            &entry(
                "2018-09-20T12:00:00.100+02:00",
                r#"{"status": 200, "bodySize": 10}"#,
                r#""timings": {"dns": 7, "send": 1, "wait": 10, "receive": 1}"#,
            ),
        );
        let timings = HarNormalizer::new("s").normalize(&doc).unwrap();
        assert_eq!(timings[0].phases.dns, Some(0.0));
        assert_eq!(timings[0].phases.blocked, Some(0.0));
    }

    #[test]
    fn test_producer_time_parsing() {
        let t = HarProducer::Other
            .parse_time("2018-09-20T12:00:00.123+02:00")
            .unwrap();
        assert_eq!(t.format("%H:%M:%S%.3f").to_string(), "12:00:00.123");
        assert!(HarProducer::Other.parse_time("short").is_err());
    }
}
