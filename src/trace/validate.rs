//! Three-way object size validation
//!
//! Objects reconstructed from the packet trace are attributed to page loads
//! and matched (strictly) against the HAR and Resource Timing records of the
//! same page load, yielding one size comparison row per completed object.

use super::packet::{parse_packets, Packet, PACKET_FIELDS};
use super::stream::{StreamObjects, TracedObject};
use crate::config::ExternalTools;
use crate::diagnose::find_navtiming;
use crate::error::TimingsError;
use crate::matcher::{CandidatePool, MatchMode, MatchQuery, MatchWindow};
use crate::output::TraceSizeRow;
use crate::store::{RunDir, StartTiming};
use crate::types::{NavigationTiming, PageLabel};
use chrono::{DateTime, Local, NaiveDateTime};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

/// Display filter selecting plain HTTP segments with payload
pub const HTTP_ONLY_FILTER: &str =
    "(tcp.srcport == 80 or tcp.dstport == 80 and not ssl) and tcp.len > 0";

/// Epoch seconds as local wall-clock time, the clock the browser logs use
pub fn local_time(epoch_secs: f64) -> Option<NaiveDateTime> {
    let micros = (epoch_secs * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros).map(|utc| utc.with_timezone(&Local).naive_local())
}

/// Source of dissected packets for a run
pub trait TraceExtractor {
    fn extract(&self, run: &RunDir) -> Result<Vec<Packet>, TimingsError>;
}

/// Extracts packets with `tshark` from the run's capture
#[derive(Debug, Clone)]
pub struct Tshark {
    binary: PathBuf,
    capture_file: String,
}

impl Tshark {
    pub fn new(binary: impl Into<PathBuf>, capture_file: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            capture_file: capture_file.into(),
        }
    }

    pub fn from_tools(tools: &ExternalTools) -> Self {
        Self::new(tools.tshark.clone(), tools.capture_file.clone())
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    fn run(&self, mut command: Command) -> Result<String, TimingsError> {
        let output = command
            .output()
            .map_err(|e| TimingsError::ExternalTool(format!("{}: {e}", self.binary.display())))?;
        if !output.status.success() {
            return Err(TimingsError::ExternalTool(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TraceExtractor for Tshark {
    fn extract(&self, run: &RunDir) -> Result<Vec<Packet>, TimingsError> {
        let http_pcap = run.http_pcap();
        if !http_pcap.exists() {
            info!(run = %run.name(), "filtering capture for HTTP traffic");
            let mut filter = self.command();
            filter
                .arg("-r")
                .arg(run.pcap_dir().join(&self.capture_file))
                .arg("-w")
                .arg(&http_pcap)
                .arg("-Y")
                .arg(HTTP_ONLY_FILTER);
            self.run(filter)?;
        }

        let mut fields = self.command();
        fields
            .arg("-r")
            .arg(&http_pcap)
            .args(["-T", "fields", "-E", "separator=#"]);
        for field in PACKET_FIELDS {
            fields.arg("-e").arg(field);
        }
        let field_lines = self.run(fields)?;

        let mut data = self.command();
        data.arg("-r")
            .arg(&http_pcap)
            .args(["--disable-protocol", "http", "-T", "fields", "-e", "data"]);
        let data_lines = self.run(data)?;

        let packets = parse_packets(field_lines.lines(), data_lines.lines());
        debug!(run = %run.name(), packets = packets.len(), "extracted packets");
        Ok(packets)
    }
}

/// Traced objects of one page load
#[derive(Debug, Clone, PartialEq)]
pub struct PageObjects {
    pub start: StartTiming,
    pub label: PageLabel,
    pub objects: Vec<TracedObject>,
}

/// Attribute every stream to the page load that was started last before its
/// first request
pub fn group_by_page(
    streams: BTreeMap<u64, StreamObjects>,
    starttimings: &[StartTiming],
) -> Vec<PageObjects> {
    let mut starts: Vec<(NaiveDateTime, usize)> = starttimings
        .iter()
        .enumerate()
        .filter_map(|(i, st)| st.timestamp().ok().map(|t| (t, i)))
        .collect();
    starts.sort();

    let mut pages: BTreeMap<usize, PageObjects> = BTreeMap::new();
    for (stream, objects) in streams {
        let Some(first) = objects.objects.first() else {
            continue;
        };
        let Some(requested) = local_time(first.request_epoch) else {
            continue;
        };
        let Some(&(_, index)) = starts.iter().rev().find(|(t, _)| *t <= requested) else {
            debug!(stream, "stream started before any page load");
            continue;
        };
        let start = &starttimings[index];
        let label = match start.label() {
            Ok(label) => label,
            Err(e) => {
                debug!(stream, error = %e, "no page label");
                continue;
            }
        };
        pages
            .entry(index)
            .or_insert_with(|| PageObjects {
                start: start.clone(),
                label,
                objects: Vec::new(),
            })
            .objects
            .extend(objects.objects);
    }
    pages.into_values().collect()
}

/// Match the completed objects of one page load against its HAR and Resource
/// Timing records
pub fn validate_page(
    run: &RunDir,
    page: &PageObjects,
    navtimings: &[NavigationTiming],
) -> Vec<TraceSizeRow> {
    let label = &page.label;
    let Some(navt) = find_navtiming(navtimings, &page.start.url, &label.starttime) else {
        info!(label = %label, "no navigation timing, skipping trace objects");
        return Vec::new();
    };

    let mut har_pool = CandidatePool::new(run.hartimings(label, &navt.scenario).unwrap_or_default());
    let mut res_pool = CandidatePool::new(run.restimings(label).unwrap_or_default());
    let page_start = navt.navigation_start.and_then(local_time);

    let mut objects: Vec<&TracedObject> = page.objects.iter().collect();
    objects.sort_by(|a, b| a.request_epoch.total_cmp(&b.request_epoch));

    let mut rows = Vec::new();
    for object in objects {
        let Some(sizes) = object.sizes() else {
            debug!(uri = %object.uri, state = ?object.state, "no usable reply");
            continue;
        };
        let Some(requested) = local_time(object.request_epoch) else {
            continue;
        };
        let url = object.url();
        let query = MatchQuery::new(&url, requested, MatchMode::Strict);

        let har = har_pool
            .take(&query.with_status(i32::from(sizes.status)), MatchWindow::har_send)
            .map(|found| har_pool.get(found.id));
        let res = match page_start {
            Some(page_start) => res_pool
                .take(&query, |r| MatchWindow::restiming(r, page_start))
                .map(|found| res_pool.get(found.id)),
            None => None,
        };

        rows.push(TraceSizeRow {
            page_url: page.start.url.clone(),
            starttime: label.starttime.clone(),
            request_timestamp: object.request_timestamp.clone(),
            url,
            status: sizes.status,
            tcp_len: sizes.tcp_len,
            header_len: sizes.header_len,
            body_len: sizes.body_len,
            har_transfer_size: har.and_then(|h| h.transfer_size),
            har_header_size: har.and_then(|h| h.header_size),
            har_body_size: har.and_then(|h| h.body_size),
            har_content_length: har.and_then(|h| h.content_length),
            res_body_size: res.and_then(|r| r.encoded_body_size),
        });
    }
    rows
}
