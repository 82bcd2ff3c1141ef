//! Run configuration
//!
//! Where runs live, which of them (and which pages) to process, and how the
//! optional external tools are invoked.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default directory holding the `run-*` directories
pub const DEFAULT_DATA_DIR: &str = "../testdata/";

/// External tools used to fill in missing inputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTools {
    /// Disabled tools are never spawned; their outputs count as missing
    pub enabled: bool,
    /// Called as `<script> <run> <host> "<from>" "<to>"` to dump a page's packets
    pub packet_dump_script: PathBuf,
    /// Called as `<script> <run>` to produce `starttimings.log`
    pub start_times_script: PathBuf,
    pub tshark: PathBuf,
    /// Capture file inside `<run>/pcap/`
    pub capture_file: String,
}

impl Default for ExternalTools {
    fn default() -> Self {
        Self {
            enabled: true,
            packet_dump_script: PathBuf::from("./get_trace_for_timestamps.sh"),
            start_times_script: PathBuf::from("./get_starttimestamp_from_workload_output.sh"),
            tshark: PathBuf::from("tshark"),
            capture_file: "local:any.pcap".to_string(),
        }
    }
}

impl ExternalTools {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Configuration for processing runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub data_dir: PathBuf,
    /// Only process runs whose path contains this substring
    pub run_filter: Option<String>,
    /// Only process pages whose URL contains one of these substrings
    pub workloads: Vec<String>,
    /// Recorded with the run, not interpreted
    pub policies: Vec<String>,
    pub tools: ExternalTools,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            run_filter: None,
            workloads: Vec::new(),
            policies: Vec::new(),
            tools: ExternalTools::default(),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_run_filter(mut self, filter: Option<String>) -> Self {
        self.run_filter = filter.filter(|f| !f.is_empty());
        self
    }

    /// Workload filter; "all" and "None" mean no filter
    pub fn with_workloads<I, S>(mut self, workloads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.workloads = workloads
            .into_iter()
            .map(Into::into)
            .filter(|w| !w.is_empty() && w != "all" && w != "None")
            .collect();
        self
    }

    pub fn with_policies(mut self, policies: Vec<String>) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_tools(mut self, tools: ExternalTools) -> Self {
        self.tools = tools;
        self
    }

    pub fn matches_workload(&self, page: &str) -> bool {
        self.workloads.is_empty() || self.workloads.iter().any(|w| page.contains(w.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("../testdata/"));
        assert!(config.tools.enabled);
        assert_eq!(config.tools.capture_file, "local:any.pcap");
        assert!(!ExternalTools::disabled().enabled);
    }

    #[test]
    fn test_workload_filter() {
        let config = RunConfig::new().with_workloads(["example", "test.org"]);
        assert!(config.matches_workload("http://example.com/"));
        assert!(config.matches_workload("http://www.test.org/"));
        assert!(!config.matches_workload("http://other.net/"));

        let all = RunConfig::new().with_workloads(["all"]);
        assert!(all.workloads.is_empty());
        assert!(all.matches_workload("http://other.net/"));
    }

    #[test]
    fn test_empty_run_filter_is_none() {
        let config = RunConfig::new().with_run_filter(Some(String::new()));
        assert_eq!(config.run_filter, None);
    }
}
