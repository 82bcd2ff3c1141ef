//! Run directory layout
//!
//! A run directory holds one batch of page loads:
//!
//! ```text
//! run-*/navtimings.log            failed_navtimings.log
//! run-*/starttimings.log          urlfile-*
//! run-*/har/<label>.har           run-*/har/<label>.har.log
//! run-*/res/<label>.res.log
//! run-*/pcap/<label>_packets.log  run-*/pcap/http_and_not_ssl.pcap
//! ```
//!
//! Outputs (`final_timings.log`, `compare_har_res.log`, `success_or_fail.log`,
//! `object_sizes_trace.log`) are written at the top of the run directory.

use super::fields::Row;
use super::{hartiming, navtiming, parse_rows, read_rows, restiming};
use crate::config::ExternalTools;
use crate::error::TimingsError;
use crate::har::{normalize_har_file, HarDocument, HarPageInfo};
use crate::types::{HarTiming, NavigationTiming, PageLabel, ResTiming};
use chrono::NaiveDateTime;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Format of start times in `starttimings.log`
pub const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const START_TIME_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// When one page load was started, as logged by the workload driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTiming {
    pub url: String,
    /// "YYYY-MM-DD HH:MM:SS.ffffff", empty when only the URL is known
    pub starttime: String,
}

impl StartTiming {
    pub fn new(url: impl Into<String>, starttime: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            starttime: starttime.into(),
        }
    }

    /// Start time as used in page labels
    pub fn label_starttime(&self) -> String {
        self.starttime.replace(' ', "+").replace(':', "-")
    }

    pub fn label(&self) -> Result<PageLabel, TimingsError> {
        PageLabel::from_page_url(&self.url, &self.label_starttime())
    }

    pub fn timestamp(&self) -> Result<NaiveDateTime, TimingsError> {
        NaiveDateTime::parse_from_str(&self.starttime, START_TIME_PARSE_FORMAT)
            .map_err(|e| TimingsError::DateParseError(format!("{}: {e}", self.starttime)))
    }
}

/// One run directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RunDir {
    path: PathBuf,
}

impl RunDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Run path as passed to the helper scripts, with a trailing slash
    pub fn script_arg(&self) -> String {
        let path = self.path.display().to_string();
        if path.ends_with('/') {
            path
        } else {
            format!("{path}/")
        }
    }

    pub fn navtimings_log(&self) -> PathBuf {
        self.path.join("navtimings.log")
    }

    pub fn failed_navtimings_log(&self) -> PathBuf {
        self.path.join("failed_navtimings.log")
    }

    pub fn starttimings_log(&self) -> PathBuf {
        self.path.join("starttimings.log")
    }

    pub fn har_file(&self, label: &PageLabel) -> PathBuf {
        self.path.join("har").join(format!("{label}.har"))
    }

    pub fn har_log(&self, label: &PageLabel) -> PathBuf {
        self.path.join("har").join(format!("{label}.har.log"))
    }

    pub fn res_log(&self, label: &PageLabel) -> PathBuf {
        self.path.join("res").join(format!("{label}.res.log"))
    }

    pub fn pcap_dir(&self) -> PathBuf {
        self.path.join("pcap")
    }

    pub fn packets_log(&self, label: &PageLabel) -> PathBuf {
        self.pcap_dir().join(format!("{label}_packets.log"))
    }

    pub fn http_pcap(&self) -> PathBuf {
        self.pcap_dir().join("http_and_not_ssl.pcap")
    }

    pub fn final_timings_log(&self) -> PathBuf {
        self.path.join("final_timings.log")
    }

    pub fn compare_log(&self) -> PathBuf {
        self.path.join("compare_har_res.log")
    }

    pub fn success_log(&self) -> PathBuf {
        self.path.join("success_or_fail.log")
    }

    pub fn trace_sizes_log(&self) -> PathBuf {
        self.path.join("object_sizes_trace.log")
    }

    /// First original workload file (`urlfile-*`), if any
    pub fn workload_file(&self) -> Result<Option<PathBuf>, TimingsError> {
        let mut candidates = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with("urlfile-") {
                candidates.push(entry.path());
            }
        }
        candidates.sort();
        Ok(candidates.into_iter().next())
    }

    pub fn read_navtimings(&self) -> Result<Vec<NavigationTiming>, TimingsError> {
        navtiming::read_navtimings(&self.navtimings_log())
    }

    /// Navigation timings of page loads the driver gave up on
    pub fn read_failed_navtimings(&self) -> Option<Vec<NavigationTiming>> {
        let path = self.failed_navtimings_log();
        match navtiming::read_navtimings(&path) {
            Ok(navts) => Some(navts),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no failed navigation timings");
                None
            }
        }
    }

    /// Resource timings of one page load; `None` when the log is missing or unreadable
    pub fn restimings(&self, label: &PageLabel) -> Option<Vec<ResTiming>> {
        let path = self.res_log(label);
        match restiming::read_restimings(&path) {
            Ok(res) => Some(res),
            Err(e) => {
                debug!(label = %label, error = %e, "no resource timings");
                None
            }
        }
    }

    /// HAR timings of one page load, normalizing the HAR into the cache first
    /// if needed; `None` when neither can be read
    pub fn hartimings(&self, label: &PageLabel, scenario: &str) -> Option<Vec<HarTiming>> {
        let log = self.har_log(label);
        if log.exists() {
            match hartiming::read_hartimings(&log) {
                Ok(timings) => return Some(timings),
                Err(e) => {
                    warn!(label = %label, error = %e, "unreadable HAR timing log, regenerating")
                }
            }
        }

        let har = self.har_file(label);
        debug!(har = %har.display(), "creating HAR timing log");
        let regenerated =
            normalize_har_file(&har, &log, scenario).and_then(|_| hartiming::read_hartimings(&log));
        match regenerated {
            Ok(timings) => Some(timings),
            Err(e) => {
                warn!(label = %label, error = %e, "could not get HAR timings");
                None
            }
        }
    }

    /// Page-level HAR fields, all absent when the HAR cannot be read
    pub fn har_page_info(&self, label: &PageLabel) -> HarPageInfo {
        let har = self.har_file(label);
        match HarDocument::from_path(&har) {
            Ok(doc) => doc.page_info(),
            Err(e) => {
                info!(har = %har.display(), error = %e, "could not read HAR page timings");
                HarPageInfo::default()
            }
        }
    }

    /// Start timings of the run
    ///
    /// `starttimings.log` is generated by the start-times script when missing.
    /// Without it, the URLs of the original workload file are returned with
    /// empty start times.
    pub fn starttimings(&self, tools: &ExternalTools) -> Result<Vec<StartTiming>, TimingsError> {
        let path = self.starttimings_log();
        if !path.exists() && tools.enabled {
            info!(run = %self.name(), "getting start timings");
            match Command::new(&tools.start_times_script)
                .arg(self.script_arg())
                .status()
            {
                Ok(status) if status.success() => {}
                Ok(status) => warn!(%status, "start-times script failed"),
                Err(e) => warn!(
                    script = %tools.start_times_script.display(),
                    error = %e,
                    "could not run start-times script"
                ),
            }
        }

        let mut starttimings = Vec::new();
        if path.exists() {
            starttimings = read_rows(&path, parse_starttiming)?;
        }

        if starttimings.is_empty() {
            if let Some(workload) = self.workload_file()? {
                starttimings = read_workload_file(&workload)?;
                info!(
                    workload = %workload.display(),
                    urls = starttimings.len(),
                    "using URLs without start timestamps from workload file"
                );
            }
        }
        Ok(starttimings)
    }
}

fn read_workload_file(path: &Path) -> Result<Vec<StartTiming>, TimingsError> {
    let reader = BufReader::new(File::open(path)?);
    let mut starttimings = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let url = line.trim_end();
        if !url.is_empty() {
            starttimings.push(StartTiming::new(url, ""));
        }
    }
    Ok(starttimings)
}

fn parse_starttiming(row: &Row<'_>) -> Result<StartTiming, TimingsError> {
    Ok(StartTiming::new(
        row.string(0, "url")?,
        row.string(1, "starttime")?,
    ))
}

/// Parse a `starttimings.log` body
pub fn parse_starttimings(source: &str) -> Result<Vec<StartTiming>, TimingsError> {
    parse_rows(source.as_bytes(), parse_starttiming)
}

/// All `run-*` directories under `root`, optionally filtered by a path substring
pub fn discover_runs(root: &Path, filter: Option<&str>) -> Result<Vec<RunDir>, TimingsError> {
    let mut runs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let is_run = entry.file_name().to_string_lossy().starts_with("run-") && path.is_dir();
        let selected = filter.map_or(true, |f| path.to_string_lossy().contains(f));
        if is_run && selected {
            runs.push(RunDir::new(path));
        }
    }
    runs.sort();
    Ok(runs)
}
