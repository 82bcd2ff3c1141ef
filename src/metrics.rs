//! Page load metrics
//!
//! Object Index and Byte Index are time integrals over object finish times:
//!
//! ```text
//! ObjectIndex = Σ (finish_i − start) / N
//! ByteIndex   = Σ (finish_i − start) · size_i / Σ size
//! ```
//!
//! Both are undefined (`None`) without qualifying objects, for a negative
//! anchor, and (Byte Index) when all sizes are zero.

use crate::error::TimingsError;
use crate::types::{HarTiming, NavEvent, NavigationTiming, ResTiming, StatusClass};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Mean excess finish time over `start`
pub fn object_index(finish_times: &[f64], start: f64) -> Option<f64> {
    if finish_times.is_empty() || start < 0.0 {
        return None;
    }
    let n = finish_times.len() as f64;
    Some(finish_times.iter().map(|f| (f - start) / n).sum())
}

/// Size-weighted excess finish time over `start`; objects are `(finish, size)`
pub fn byte_index(objects: &[(f64, i64)], start: f64) -> Option<f64> {
    let total: i64 = objects.iter().map(|(_, size)| size).sum();
    if objects.is_empty() || start < 0.0 || total <= 0 {
        return None;
    }
    let total = total as f64;
    Some(
        objects
            .iter()
            .map(|(finish, size)| (finish - start) * (*size as f64 / total))
            .sum(),
    )
}

/// Closed histogram of HTTP status codes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistogram {
    pub no_reply: u32,
    pub informational: u32,
    pub ok: u32,
    pub other_success: u32,
    pub redirect: u32,
    pub client_error: u32,
    pub server_error: u32,
    pub unknown: u32,
}

impl StatusHistogram {
    /// Count one status; statuses outside the known bands are an error
    pub fn record(&mut self, status: i32) -> Result<StatusClass, TimingsError> {
        let class = StatusClass::from_code(status)?;
        let bucket = match class {
            StatusClass::NoReply => &mut self.no_reply,
            StatusClass::Informational => &mut self.informational,
            StatusClass::Ok => &mut self.ok,
            StatusClass::OtherSuccess => &mut self.other_success,
            StatusClass::Redirect => &mut self.redirect,
            StatusClass::ClientError => &mut self.client_error,
            StatusClass::ServerError => &mut self.server_error,
            StatusClass::Unknown => &mut self.unknown,
        };
        *bucket += 1;
        Ok(class)
    }

    /// Requests with status in [100, 400)
    pub fn non_failed(&self) -> u32 {
        self.informational + self.ok + self.other_success + self.redirect
    }
}

/// Page statistics derived from the HAR timings of one page load
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarSummary {
    pub number_of_requests: usize,
    pub finished_after_onload: usize,
    pub statuses: StatusHistogram,
    /// Start delta of the first 200 response
    pub first200_start: Option<f64>,
    pub redirects_before_first200: u32,
    pub last_request_start_before_onload: f64,
    pub last_resource_end_before_onload: f64,
    pub object_index: Option<f64>,
    pub byte_index_body: Option<f64>,
    pub byte_index_body_or_content: Option<f64>,
    pub byte_index_transfer: Option<f64>,
    pub sum_body_size: i64,
    pub sum_content_length: i64,
    pub sum_content_size: i64,
    pub sum_body_or_content_length: i64,
    pub sum_transfer_size: i64,
    pub body_sizes_counted: usize,
    pub content_sizes_counted: usize,
}

/// Content-Length if positive, else the logged body size if positive
fn body_or_content_length(har: &HarTiming) -> Option<i64> {
    har.content_length
        .filter(|cl| *cl > 0)
        .or_else(|| har.body_size.filter(|b| *b > 0))
}

impl HarSummary {
    /// Walk HAR timings in log order
    ///
    /// Records finishing after `on_load` (milliseconds since page start) are
    /// only counted; everything else is returned as the before-onLoad set.
    /// Objects qualify for the indices once a first 200 has been seen and
    /// their status is in [100, 400).
    pub fn compute<'a>(
        records: &'a [HarTiming],
        on_load: Option<f64>,
    ) -> Result<(Self, Vec<&'a HarTiming>), TimingsError> {
        let mut summary = HarSummary {
            number_of_requests: records.len(),
            ..Default::default()
        };
        let mut before_onload = Vec::with_capacity(records.len());

        let mut finishes = Vec::new();
        let mut by_body = Vec::new();
        let mut by_body_or_content = Vec::new();
        let mut by_transfer = Vec::new();

        for har in records {
            let finish = har.finish_ms();
            if on_load.is_some_and(|on_load| finish > on_load) {
                summary.finished_after_onload += 1;
                debug!(url = %har.url, finish, "finished after onLoad, skipping");
                continue;
            }
            before_onload.push(har);

            let class = summary.statuses.record(har.status)?;
            if class == StatusClass::Ok && summary.first200_start.is_none() {
                summary.first200_start = Some(har.start_delta_ms);
                summary.redirects_before_first200 = summary.statuses.redirect;
            }

            if har.status != 0 {
                summary.last_request_start_before_onload =
                    summary.last_request_start_before_onload.max(har.start_delta_ms);
                summary.last_resource_end_before_onload =
                    summary.last_resource_end_before_onload.max(finish);
            }

            let qualifies = summary.first200_start.is_some() && har.is_non_failed();
            if qualifies {
                finishes.push(finish);
            }

            let body = har.body_size.filter(|b| *b > 0);
            if let Some(body) = body {
                summary.sum_body_size += body;
                summary.body_sizes_counted += 1;
                if qualifies {
                    by_body.push((finish, body));
                }
            }
            if let Some(cl) = har.content_length.filter(|cl| *cl > 0) {
                summary.sum_content_length += cl;
            }
            if let Some(size) = har.content_size {
                summary.sum_content_size += size;
                summary.content_sizes_counted += 1;
            }
            if let Some(transfer) = har.transfer_size.filter(|t| *t > 0) {
                summary.sum_transfer_size += transfer;
                if qualifies {
                    by_transfer.push((finish, transfer));
                }
            }
            if let Some(size) = body_or_content_length(har) {
                summary.sum_body_or_content_length += size;
                if qualifies {
                    by_body_or_content.push((finish, size));
                }
            }
        }

        if let Some(start) = summary.first200_start {
            summary.object_index = object_index(&finishes, start);
            summary.byte_index_body = byte_index(&by_body, start);
            summary.byte_index_body_or_content = byte_index(&by_body_or_content, start);
            summary.byte_index_transfer = byte_index(&by_transfer, start);
        }

        Ok((summary, before_onload))
    }
}

/// Page statistics derived from the Resource Timings of one page load
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResSummary {
    pub number_of_resources: usize,
    pub finished_after_onload: usize,
    pub finished_before_onload: usize,
    pub last_resource_end_before_onload: f64,
    pub sum_encoded_size: i64,
    pub sum_decoded_size: i64,
    pub object_index: Option<f64>,
    pub byte_index: Option<f64>,
}

impl ResSummary {
    /// Resources ending after `loadEventStart` (when it fired) are only
    /// counted; the indices are anchored at `fetchStart` and weighted by
    /// encoded body size.
    pub fn compute<'a>(
        records: &'a [ResTiming],
        navt: &NavigationTiming,
    ) -> (Self, Vec<&'a ResTiming>) {
        let load_event_start = navt.fired(NavEvent::LoadEventStart);
        let mut summary = ResSummary {
            number_of_resources: records.len(),
            ..Default::default()
        };
        let mut before_onload = Vec::with_capacity(records.len());
        let mut finishes = Vec::new();
        let mut sized = Vec::new();

        for res in records {
            let end = res.response_end_ms;
            if load_event_start.is_some_and(|onload| end > onload) {
                summary.finished_after_onload += 1;
                debug!(url = %res.url, end, "resource ended after load event, skipping");
                continue;
            }
            before_onload.push(res);

            summary.last_resource_end_before_onload =
                summary.last_resource_end_before_onload.max(end);
            let encoded = res.encoded_body_size.unwrap_or(0);
            summary.sum_encoded_size += encoded;
            summary.sum_decoded_size += res.decoded_body_size.unwrap_or(0);
            finishes.push(end);
            sized.push((end, encoded));
        }
        summary.finished_before_onload = summary.number_of_resources - summary.finished_after_onload;

        if let Some(fetch_start) = navt.event(NavEvent::FetchStart) {
            summary.object_index = object_index(&finishes, fetch_start);
            summary.byte_index = byte_index(&sized, fetch_start);
        }

        (summary, before_onload)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{har, navt, res};
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_object_index_undefined_cases() {
        assert_eq!(object_index(&[], 0.0), None);
        assert_eq!(object_index(&[10.0], -1.0), None);
        assert_eq!(object_index(&[10.0, 30.0], 0.0), Some(20.0));
    }

    #[test]
    fn test_byte_index_zero_sizes_is_undefined() {
        assert_eq!(byte_index(&[(10.0, 0), (20.0, 0)], 0.0), None);
        assert_eq!(byte_index(&[], 0.0), None);
        assert_eq!(byte_index(&[(10.0, 1), (30.0, 3)], 0.0), Some(25.0));
    }

    #[test]
    fn test_histogram_rejects_unknown_band() {
        let mut hist = StatusHistogram::default();
        hist.record(200).unwrap();
        hist.record(302).unwrap();
        hist.record(-1).unwrap();
        hist.record(0).unwrap();
        assert_eq!(hist.non_failed(), 2);
        assert_eq!(hist.unknown, 1);
        assert_eq!(hist.no_reply, 1);
        assert!(matches!(hist.record(700), Err(TimingsError::InvalidStatus(700))));
    }

    #[test]
    fn test_har_summary_end_to_end_scenario() {
        let records = vec![
            har("http://example.com/", 200, 100.0, 50.0, Some(1000)),
            har("http://example.com/a.js", 200, 200.0, 50.0, Some(2000)),
            har("http://example.com/b.png", 304, 5000.0, 50.0, None),
        ];
        let (summary, before) = HarSummary::compute(&records, Some(1500.0)).unwrap();

        assert_eq!(summary.number_of_requests, 3);
        assert_eq!(summary.finished_after_onload, 1);
        assert_eq!(before.len(), 2);
        assert_eq!(summary.statuses.ok, 2);
        assert_eq!(summary.statuses.non_failed(), 2);
        assert_eq!(summary.first200_start, Some(100.0));
        // (150 - 100 + 250 - 100) / 2
        assert_eq!(summary.object_index, Some(100.0));
        let byte_index = summary.byte_index_body.unwrap();
        assert!((byte_index - 350_000.0 / 3000.0).abs() < 1e-9);
        assert_eq!(summary.sum_body_size, 3000);
        assert_eq!(summary.last_resource_end_before_onload, 250.0);
        assert_eq!(summary.last_request_start_before_onload, 200.0);
    }

    #[test]
    fn test_har_summary_without_onload_keeps_everything() {
        let records = vec![
            har("http://example.com/", 301, 0.0, 10.0, Some(0)),
            har("http://example.com/", 200, 20.0, 50.0, Some(1000)),
            har("http://example.com/late.js", 200, 9000.0, 50.0, Some(10)),
        ];
        let (summary, before) = HarSummary::compute(&records, None).unwrap();
        assert_eq!(summary.finished_after_onload, 0);
        assert_eq!(before.len(), 3);
        assert_eq!(summary.redirects_before_first200, 1);
        assert_eq!(summary.first200_start, Some(20.0));
    }

    #[test]
    fn test_har_summary_invalid_status_is_fatal() {
        let records = vec![har("http://example.com/", 42, 0.0, 10.0, None)];
        assert!(HarSummary::compute(&records, None).is_err());
    }

    #[test]
    fn test_res_summary_skips_after_load_event() {
        let navt = navt("http://example.com/", 1500.0);
        let records = vec![
            res("http://example.com/a.js", 100.0, 50.0, Some(100)),
            res("http://example.com/b.js", 200.0, 100.0, Some(300)),
            res("http://example.com/late.js", 1600.0, 10.0, Some(999)),
        ];
        let (summary, before) = ResSummary::compute(&records, &navt);
        assert_eq!(summary.number_of_resources, 3);
        assert_eq!(summary.finished_after_onload, 1);
        assert_eq!(summary.finished_before_onload, 2);
        assert_eq!(before.len(), 2);
        assert_eq!(summary.sum_encoded_size, 400);
        assert_eq!(summary.last_resource_end_before_onload, 300.0);
        // fetchStart = 5: (145 + 295) / 2
        assert_eq!(summary.object_index, Some(220.0));
    }

    proptest! {
        #[test]
        fn prop_object_index_monotonic(
            finishes in prop::collection::vec(0.0..10_000.0f64, 1..20),
            start in 0.0..100.0f64,
            extra in 0.0..1000.0f64,
        ) {
            let before = object_index(&finishes, start).unwrap();
            let latest = finishes.iter().cloned().fold(f64::MIN, f64::max);
            let mut more = finishes.clone();
            more.push(latest + extra + 1.0);
            let after = object_index(&more, start).unwrap();
            prop_assert!(after >= before - 1e-9);
        }
    }
}
