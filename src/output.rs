//! Output logs of a run
//!
//! Every output is a headerless CSV file (except the success log, which starts
//! with a header line), created with truncation so repeated runs over the same
//! data directory never append to stale output. Unavailable values are `NA`.

use crate::diagnose::Diagnosis;
use crate::error::TimingsError;
use crate::har::HarPageInfo;
use crate::metrics::{HarSummary, ResSummary};
use crate::reconcile::ObjectPresence;
use crate::store::csv_writer;
use crate::store::fields::{na, sanitize, NA};
use crate::types::{HarTiming, NavEvent, NavigationTiming, PageLabel, ResTiming};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Anything written as one CSV row
pub trait ToRecord {
    fn to_record(&self) -> Vec<String>;
}

/// Columns of `final_timings.log`
pub const FINAL_TIMINGS_FIELDS: [&str; 48] = [
    "page",
    "scenario",
    "starttime",
    "fetchStart",
    "responseStart",
    "domInteractive",
    "domContentLoadedEventStart",
    "domContentLoadedEventEnd",
    "domComplete",
    "loadEventStart",
    "loadEventEnd",
    "firstPaint",
    "harNumberOfRequests",
    "harFinishedAfterOnLoad",
    "harNoReply",
    "harStatus1xx",
    "harStatus200",
    "harStatusOther2xx",
    "harStatus3xx",
    "harStatus4xx",
    "harStatus5xx",
    "harUnknownStatus",
    "harNonFailedRequests",
    "harStartTime",
    "harFirst200Starttime",
    "harRedirectsBeforeFirst200",
    "harLastRequestStartBeforeOnLoad",
    "harLastResourceEndBeforeOnLoad",
    "harOnLoadTime",
    "harContentLoadTime",
    "harObjectIndex",
    "harByteIndexBodysize",
    "harByteIndexBodyorcontent",
    "harByteIndexTransfersize",
    "sum_of_respbodysize",
    "sum_of_contentlength",
    "sum_of_contentsize",
    "sum_of_bodyorcontent",
    "sum_of_transfersize",
    "resNumberOfResources",
    "resFinishedAfterOnLoad",
    "resNumberOfResourcesFinishedBeforeOnLoad",
    "resLastResourceEndBeforeOnLoad",
    "sum_of_resource_encoded",
    "sum_of_resource_decoded",
    "resObjectIndex",
    "resByteIndex",
    "smart_total_page_size",
];

const NAVTIMING_SUBSET: [NavEvent; 8] = [
    NavEvent::FetchStart,
    NavEvent::ResponseStart,
    NavEvent::DomInteractive,
    NavEvent::DomContentLoadedEventStart,
    NavEvent::DomContentLoadedEventEnd,
    NavEvent::DomComplete,
    NavEvent::LoadEventStart,
    NavEvent::LoadEventEnd,
];

/// One row of `final_timings.log`
#[derive(Debug, Clone, PartialEq)]
pub struct FinalTimingsRow {
    pub navt: NavigationTiming,
    pub page_info: HarPageInfo,
    /// `None` when the page load has no HAR timings
    pub har: Option<HarSummary>,
    /// `None` when the page load has no Resource Timings
    pub res: Option<ResSummary>,
    pub smart_total_page_size: Option<i64>,
}

impl FinalTimingsRow {
    fn har_columns(&self) -> Vec<String> {
        let info = &self.page_info;
        let Some(har) = &self.har else {
            let mut columns = vec![NA.to_string(); 11];
            columns.push(na(&info.started));
            columns.extend([NA.to_string(), NA.to_string(), NA.to_string(), NA.to_string()]);
            columns.push(na(&info.on_load));
            columns.push(na(&info.on_content_load));
            columns.extend(std::iter::repeat(NA.to_string()).take(9));
            return columns;
        };
        let s = &har.statuses;
        vec![
            har.number_of_requests.to_string(),
            har.finished_after_onload.to_string(),
            s.no_reply.to_string(),
            s.informational.to_string(),
            s.ok.to_string(),
            s.other_success.to_string(),
            s.redirect.to_string(),
            s.client_error.to_string(),
            s.server_error.to_string(),
            s.unknown.to_string(),
            s.non_failed().to_string(),
            na(&info.started),
            na(&har.first200_start),
            har.redirects_before_first200.to_string(),
            har.last_request_start_before_onload.to_string(),
            har.last_resource_end_before_onload.to_string(),
            na(&info.on_load),
            na(&info.on_content_load),
            na(&har.object_index),
            na(&har.byte_index_body),
            na(&har.byte_index_body_or_content),
            na(&har.byte_index_transfer),
            har.sum_body_size.to_string(),
            har.sum_content_length.to_string(),
            har.sum_content_size.to_string(),
            har.sum_body_or_content_length.to_string(),
            har.sum_transfer_size.to_string(),
        ]
    }

    fn res_columns(&self) -> Vec<String> {
        match &self.res {
            Some(res) => vec![
                res.number_of_resources.to_string(),
                res.finished_after_onload.to_string(),
                res.finished_before_onload.to_string(),
                res.last_resource_end_before_onload.to_string(),
                res.sum_encoded_size.to_string(),
                res.sum_decoded_size.to_string(),
                na(&res.object_index),
                na(&res.byte_index),
            ],
            None => vec![NA.to_string(); 8],
        }
    }
}

impl ToRecord for FinalTimingsRow {
    fn to_record(&self) -> Vec<String> {
        let navt = &self.navt;
        let mut record = vec![
            sanitize(&navt.page),
            navt.scenario.clone(),
            navt.starttime.clone(),
        ];
        record.extend(NAVTIMING_SUBSET.iter().map(|e| na(&navt.event(*e))));
        record.push(na(&navt.first_paint));
        record.extend(self.har_columns());
        record.extend(self.res_columns());
        record.push(na(&self.smart_total_page_size));
        record
    }
}

/// One row of `compare_har_res.log`
#[derive(Debug, Clone, PartialEq)]
pub struct CompareRow {
    pub page_url: String,
    pub starttime: String,
    pub status: i32,
    pub http_version: Option<String>,
    pub presence: ObjectPresence,
    pub transfer_size: Option<i64>,
    pub body_size: Option<i64>,
    pub header_size: Option<i64>,
    pub content_length: Option<i64>,
    pub content_size: Option<i64>,
    pub encoded_body_size: Option<i64>,
    pub decoded_body_size: Option<i64>,
    pub url: String,
}

impl CompareRow {
    pub fn from_har(
        label: &PageLabel,
        page_url: &str,
        har: &HarTiming,
        res: Option<&ResTiming>,
        presence: ObjectPresence,
    ) -> Self {
        Self {
            page_url: page_url.to_string(),
            starttime: label.starttime.clone(),
            status: har.status,
            http_version: har.http_version.clone(),
            presence,
            transfer_size: har.transfer_size,
            body_size: har.body_size,
            header_size: har.header_size,
            content_length: har.content_length,
            content_size: har.content_size,
            encoded_body_size: res.and_then(|r| r.encoded_body_size),
            decoded_body_size: res.and_then(|r| r.decoded_body_size),
            url: har.url.clone(),
        }
    }

    pub fn from_res(label: &PageLabel, page_url: &str, res: &ResTiming, status: i32) -> Self {
        Self {
            page_url: page_url.to_string(),
            starttime: label.starttime.clone(),
            status,
            http_version: Some(res.http_version()),
            presence: ObjectPresence::InResNotInHar,
            transfer_size: None,
            body_size: None,
            header_size: None,
            content_length: None,
            content_size: None,
            encoded_body_size: res.encoded_body_size,
            decoded_body_size: res.decoded_body_size,
            url: res.url.clone(),
        }
    }
}

impl ToRecord for CompareRow {
    fn to_record(&self) -> Vec<String> {
        vec![
            self.page_url.clone(),
            self.starttime.clone(),
            self.status.to_string(),
            na(&self.http_version),
            self.presence.as_str().to_string(),
            na(&self.transfer_size),
            na(&self.body_size),
            na(&self.header_size),
            na(&self.content_length),
            na(&self.content_size),
            na(&self.encoded_body_size),
            na(&self.decoded_body_size),
            sanitize(&self.url),
        ]
    }
}

/// Header line of `success_or_fail.log`
pub const SUCCESS_LOG_FIELDS: [&str; 13] = [
    "page",
    "starttime",
    "does_navtiming_exist",
    "does_restiming_exist",
    "does_harfile_exist",
    "last_event_in_failed_navtiming",
    "num_dnsreplies",
    "num_ssl",
    "num_http",
    "num_https",
    "num_httpGET",
    "num_http301or302",
    "num_http200",
];

/// Navigation timing availability of an attempted page load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavtimingPresence {
    Complete,
    NoOnload,
    Missing,
}

impl NavtimingPresence {
    pub fn of(navt: Option<&NavigationTiming>) -> Self {
        match navt {
            Some(n) if n.fired(NavEvent::LoadEventEnd).is_some() => NavtimingPresence::Complete,
            Some(_) => NavtimingPresence::NoOnload,
            None => NavtimingPresence::Missing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NavtimingPresence::Complete => "navtiming",
            NavtimingPresence::NoOnload => "navtiming_but_no_onload",
            NavtimingPresence::Missing => "no_navtiming",
        }
    }
}

/// One row of `success_or_fail.log`
#[derive(Debug, Clone, PartialEq)]
pub struct SuccessRow {
    pub page: String,
    /// Label-form start time
    pub starttime: String,
    pub navtiming: NavtimingPresence,
    pub restiming: bool,
    pub harfile: bool,
    pub diagnosis: Option<Diagnosis>,
}

impl SuccessRow {
    pub fn is_success(&self) -> bool {
        self.navtiming == NavtimingPresence::Complete
            && self.restiming
            && self.harfile
            && self.diagnosis.is_none()
    }
}

impl ToRecord for SuccessRow {
    fn to_record(&self) -> Vec<String> {
        let mut record = vec![
            self.page.clone(),
            self.starttime.clone(),
            self.navtiming.as_str().to_string(),
            if self.restiming { "restiming" } else { "no_restiming" }.to_string(),
            if self.harfile { "harfile" } else { "no_harfile" }.to_string(),
        ];
        if let Some(diagnosis) = &self.diagnosis {
            record.extend(diagnosis.columns());
        }
        record
    }
}

/// One row of `object_sizes_trace.log`
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSizeRow {
    pub page_url: String,
    pub starttime: String,
    /// Request timestamp as printed by the dissector (epoch seconds)
    pub request_timestamp: String,
    pub url: String,
    pub status: u16,
    pub tcp_len: usize,
    pub header_len: usize,
    pub body_len: usize,
    pub har_transfer_size: Option<i64>,
    pub har_header_size: Option<i64>,
    pub har_body_size: Option<i64>,
    pub har_content_length: Option<i64>,
    pub res_body_size: Option<i64>,
}

impl ToRecord for TraceSizeRow {
    fn to_record(&self) -> Vec<String> {
        vec![
            self.page_url.clone(),
            self.starttime.clone(),
            self.request_timestamp.clone(),
            sanitize(&self.url),
            self.status.to_string(),
            self.tcp_len.to_string(),
            self.header_len.to_string(),
            self.body_len.to_string(),
            na(&self.har_transfer_size),
            na(&self.har_header_size),
            na(&self.har_body_size),
            na(&self.har_content_length),
            na(&self.res_body_size),
        ]
    }
}

/// Output CSV file, truncated on creation
pub struct OutputLog {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl OutputLog {
    pub fn create(path: &Path) -> Result<Self, TimingsError> {
        if path.exists() {
            debug!(path = %path.display(), "replacing old log");
        }
        Ok(Self {
            path: path.to_path_buf(),
            writer: csv_writer(File::create(path)?),
            rows: 0,
        })
    }

    pub fn with_header(path: &Path, header: &[&str]) -> Result<Self, TimingsError> {
        let mut log = Self::create(path)?;
        log.writer.write_record(header)?;
        Ok(log)
    }

    pub fn write<R: ToRecord>(&mut self, row: &R) -> Result<(), TimingsError> {
        self.writer.write_record(row.to_record())?;
        self.rows += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn finish(mut self) -> Result<usize, TimingsError> {
        self.writer.flush()?;
        Ok(self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnose::PacketCounts;
    use crate::metrics::fixtures::{har, navt, res, PAGE_START};
    use crate::store::fields::Row;
    use crate::store::parse_rows;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn test_final_timings_row_is_padded_without_sources() {
        let row = FinalTimingsRow {
            navt: navt("http://example.com/", 1500.0),
            page_info: HarPageInfo::default(),
            har: None,
            res: None,
            smart_total_page_size: None,
        };
        let record = row.to_record();
        assert_eq!(record.len(), FINAL_TIMINGS_FIELDS.len());
        assert_eq!(record[0], "http://example.com/");
        assert_eq!(record[10], "1500");
        assert!(record[12..].iter().all(|c| c == "NA"));
    }

    #[test]
    fn test_final_timings_row_with_summaries() {
        let records = vec![har("http://example.com/", 200, 100.0, 50.0, Some(1000))];
        let (har_summary, _) = HarSummary::compute(&records, None).unwrap();
        let row = FinalTimingsRow {
            navt: navt("http://example.com/", 1500.0),
            page_info: HarPageInfo {
                started: Some("2018-09-20T12:00:00.000Z".to_string()),
                on_content_load: Some(800.0),
                on_load: None,
            },
            har: Some(har_summary),
            res: Some(ResSummary::default()),
            smart_total_page_size: Some(1000),
        };
        let record = row.to_record();
        assert_eq!(record.len(), 48);
        assert_eq!(record[12], "1");
        assert_eq!(record[23], "2018-09-20T12:00:00.000Z");
        assert_eq!(record[24], "100");
        assert_eq!(record[28], "NA");
        assert_eq!(record[29], "800");
        assert_eq!(record[30], "50");
        assert_eq!(record[47], "1000");
    }

    #[test]
    fn test_compare_row_na_round_trip() {
        let label = PageLabel::new("example.com", PAGE_START);
        let r = res("http://example.com/a,b.js", 0.0, 10.0, None);
        let row = CompareRow::from_res(&label, "http://example.com", &r, -123);

        let mut out = Vec::new();
        {
            let mut writer = csv_writer(&mut out);
            writer.write_record(row.to_record()).unwrap();
            writer.flush().unwrap();
        }
        let rows = parse_rows(out.as_slice(), |row: &Row<'_>| {
            Ok((
                row.string(2, "status")?,
                row.size(5, "transfersize")?,
                row.size(10, "encoded")?,
                row.string(12, "url")?,
            ))
        })
        .unwrap();
        assert_eq!(
            rows,
            vec![("-123".to_string(), None, None, "http://example.com/ab.js".to_string())]
        );
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(",in_res_not_in_har,NA,NA,NA,NA,NA,NA,NA,"));
    }

    #[test]
    fn test_success_rows() {
        let ok = SuccessRow {
            page: "http://example.com/".to_string(),
            starttime: PAGE_START.to_string(),
            navtiming: NavtimingPresence::Complete,
            restiming: true,
            harfile: true,
            diagnosis: None,
        };
        assert!(ok.is_success());
        assert_eq!(ok.to_record().len(), 5);

        let failed = SuccessRow {
            navtiming: NavtimingPresence::Missing,
            restiming: false,
            harfile: false,
            diagnosis: Some(Diagnosis::MissingSource {
                latest_event: Some(NavEvent::ResponseEnd),
                packets: Some(PacketCounts::default()),
            }),
            ..ok
        };
        assert!(!failed.is_success());
        let record = failed.to_record();
        assert_eq!(record.len(), SUCCESS_LOG_FIELDS.len());
        assert_eq!(
            &record[2..6],
            &["no_navtiming", "no_restiming", "no_harfile", "responseEnd"]
        );
    }

    #[test]
    fn test_output_log_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("success_or_fail.log");
        fs::write(&path, "stale\nstale\nstale\n").unwrap();

        let mut log = OutputLog::with_header(&path, &SUCCESS_LOG_FIELDS).unwrap();
        log.write(&SuccessRow {
            page: "http://example.com/".to_string(),
            starttime: PAGE_START.to_string(),
            navtiming: NavtimingPresence::NoOnload,
            restiming: true,
            harfile: true,
            diagnosis: Some(Diagnosis::NoOnload { latest_event: None }),
        })
        .unwrap();
        assert_eq!(log.finish().unwrap(), 1);

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("page,starttime,does_navtiming_exist"));
        assert_eq!(
            lines[1],
            format!("http://example.com/,{PAGE_START},navtiming_but_no_onload,restiming,harfile,NA")
        );
    }
}
