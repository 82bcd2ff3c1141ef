//! Diagnosis of page loads that did not produce every source
//!
//! A page load is successful when it has a Navigation Timing with a fired
//! `loadEventEnd`, Resource Timings and HAR timings. For the others, the
//! latest Navigation Timing event that fired and a handful of packet counts
//! from the page's packet log hint at where the load got stuck.

use crate::error::TimingsError;
use crate::store::run::START_TIME_FORMAT;
use crate::store::{RunDir, StartTiming};
use crate::types::{NavEvent, NavigationTiming, PageLabel};
use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info, warn};

/// Packet dump window for the last page of a run
pub const LAST_PAGE_WINDOW_SECS: i64 = 33;

const DNS: &str = "eth:ethertype:ip:udp:dns";
const HTTP: &str = "eth:ethertype:ip:tcp:http,";
const HTTPS: &str = "eth:ethertype:ip:tcp:ssl:http,";
const SSL: &str = "eth:ethertype:ip:tcp:ssl";
/// DNS answers start after the fixed-width packet summary
const DNS_ANSWER_OFFSET: usize = 75;

/// Packet counts of one page load's packet log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketCounts {
    pub dns_replies: usize,
    pub ssl: usize,
    pub http: usize,
    pub https: usize,
    pub http_get: usize,
    pub http_301_or_302: usize,
    pub http_200: usize,
}

impl PacketCounts {
    pub fn columns(&self) -> Vec<String> {
        [
            self.dns_replies,
            self.ssl,
            self.http,
            self.https,
            self.http_get,
            self.http_301_or_302,
            self.http_200,
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }
}

/// Classifies packet log lines (one dissector summary per line)
#[derive(Debug, Clone)]
pub struct PacketClassifier {
    ipv4: Regex,
    ipv6: Regex,
}

impl PacketClassifier {
    pub fn new() -> Result<Self, TimingsError> {
        Ok(Self {
            ipv4: Regex::new(r"[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}")?,
            ipv6: Regex::new(r"[0-9a-e]{1,4}:[0-9a-e]{1,4}")?,
        })
    }

    /// DNS reply carrying an address, excluding the browser's own lookups
    pub fn is_dns_reply(&self, line: &str) -> bool {
        if !line.contains(DNS) || line.contains("search.services.mozilla.com") {
            return false;
        }
        let answers = line
            .char_indices()
            .nth(DNS_ANSWER_OFFSET)
            .map_or("", |(i, _)| &line[i..]);
        self.ipv4.is_match(answers) || self.ipv6.is_match(answers)
    }

    pub fn is_http(&self, line: &str) -> bool {
        (line.contains(HTTP) || line.contains(HTTPS)) && !line.contains("firefox")
    }

    pub fn count<I, S>(&self, lines: I) -> PacketCounts
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts = PacketCounts::default();
        for line in lines {
            let line = line.as_ref();
            if self.is_dns_reply(line) {
                counts.dns_replies += 1;
            }
            if line.contains(SSL) {
                counts.ssl += 1;
            }
            if !self.is_http(line) {
                continue;
            }
            counts.http += 1;
            if line.contains(HTTPS) {
                counts.https += 1;
            }
            if line.contains(",GET,") {
                counts.http_get += 1;
            }
            if line.contains(",301,") || line.contains(",302,") {
                counts.http_301_or_302 += 1;
            }
            if line.contains(",200,") {
                counts.http_200 += 1;
            }
        }
        counts
    }
}

/// Why a page load was not fully successful
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnosis {
    /// All sources exist but `loadEventEnd` never fired
    NoOnload { latest_event: Option<NavEvent> },
    /// At least one source is missing; counts are absent without a packet log
    MissingSource {
        latest_event: Option<NavEvent>,
        packets: Option<PacketCounts>,
    },
}

impl Diagnosis {
    pub fn columns(&self) -> Vec<String> {
        let event = |e: &Option<NavEvent>| e.map_or("NA", |e| e.as_str()).to_string();
        match self {
            Diagnosis::NoOnload { latest_event } => vec![event(latest_event)],
            Diagnosis::MissingSource {
                latest_event,
                packets,
            } => {
                let mut columns = vec![event(latest_event)];
                match packets {
                    Some(counts) => columns.extend(counts.columns()),
                    None => columns.extend(std::iter::repeat("NA".to_string()).take(7)),
                }
                columns
            }
        }
    }
}

/// Navigation timing of a page load, by page URL and label-form start time
pub fn find_navtiming<'a>(
    navtimings: &'a [NavigationTiming],
    page: &str,
    starttime: &str,
) -> Option<&'a NavigationTiming> {
    navtimings
        .iter()
        .find(|n| n.page == page && n.starttime == starttime)
}

/// Latest fired event of a page load, consulting the failed navigation
/// timings when the regular one is missing
pub fn latest_event(
    run: &RunDir,
    page: &str,
    starttime: &str,
    navt: Option<&NavigationTiming>,
) -> Option<NavEvent> {
    if let Some(navt) = navt {
        return navt.latest_fired_event();
    }
    let failed = run.read_failed_navtimings()?;
    let navt = find_navtiming(&failed, page, starttime);
    debug!(page, starttime, found = navt.is_some(), "looked up failed navigation timing");
    navt.and_then(NavigationTiming::latest_fired_event)
}

/// Time window `[from, to]` (start-timings format) of the packets of one page load:
/// up to the next page's start, or a fixed window for the last page
pub fn packet_window(
    starttimings: &[StartTiming],
    index: usize,
) -> Result<(String, String), TimingsError> {
    let current = starttimings.get(index).ok_or_else(|| {
        TimingsError::MalformedRecord(format!("no start timing at index {index}"))
    })?;
    let to = match starttimings.get(index + 1) {
        Some(next) => next.starttime.clone(),
        None => (current.timestamp()? + Duration::seconds(LAST_PAGE_WINDOW_SECS))
            .format(START_TIME_FORMAT)
            .to_string(),
    };
    Ok((current.starttime.clone(), to))
}

/// Producer of per-page packet logs
pub trait PacketDumper {
    fn dump(&self, run: &RunDir, host: &str, from: &str, to: &str) -> Result<(), TimingsError>;
}

/// Dumps packets by calling `<script> <run>/ <host> <from> <to>`
#[derive(Debug, Clone)]
pub struct ScriptDumper {
    script: PathBuf,
}

impl ScriptDumper {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl PacketDumper for ScriptDumper {
    fn dump(&self, run: &RunDir, host: &str, from: &str, to: &str) -> Result<(), TimingsError> {
        info!(script = %self.script.display(), run = %run.name(), host, from, to, "dumping packets");
        let status = Command::new(&self.script)
            .arg(run.script_arg())
            .arg(host)
            .arg(from)
            .arg(to)
            .status()
            .map_err(|e| TimingsError::ExternalTool(format!("{}: {e}", self.script.display())))?;
        if !status.success() {
            return Err(TimingsError::ExternalTool(format!(
                "{} exited with {status}",
                self.script.display()
            )));
        }
        Ok(())
    }
}

/// Lines of a page load's packet log, dumping it first when missing
pub fn read_packets(
    run: &RunDir,
    label: &PageLabel,
    dumper: Option<&dyn PacketDumper>,
    window: Option<(String, String)>,
) -> Option<Vec<String>> {
    let path = run.packets_log(label);
    if !path.exists() {
        if let (Some(dumper), Some((from, to))) = (dumper, window) {
            if let Err(e) = dumper.dump(run, &label.host, &from, &to) {
                warn!(label = %label, error = %e, "could not dump packets");
            }
        }
    }
    match fs::read_to_string(&path) {
        Ok(contents) => Some(contents.lines().map(|l| l.trim_end().to_string()).collect()),
        Err(e) => {
            info!(path = %path.display(), error = %e, "could not read packets");
            None
        }
    }
}
