//! Run orchestration
//!
//! [`RunProcessor`] drives the whole engine over the runs of a data directory:
//!
//! 1. classify every attempted page load (`success_or_fail.log`)
//! 2. for the successful ones, compute page statistics and reconcile HAR with
//!    Resource Timing (`final_timings.log`, `compare_har_res.log`)
//! 3. optionally, validate object sizes against the packet trace
//!    (`object_sizes_trace.log`)
//!
//! Page loads are processed one at a time. An error in one page load is logged
//! and turned into an `NA`-padded row; it never aborts the run.

use crate::config::RunConfig;
use crate::diagnose::{
    find_navtiming, latest_event, packet_window, read_packets, Diagnosis, PacketClassifier,
    PacketCounts, PacketDumper, ScriptDumper,
};
use crate::error::TimingsError;
use crate::metrics::{HarSummary, ResSummary};
use crate::output::{
    CompareRow, FinalTimingsRow, NavtimingPresence, OutputLog, SuccessRow, SUCCESS_LOG_FIELDS,
};
use crate::reconcile::reconcile;
use crate::store::run::discover_runs;
use crate::store::{RunDir, StartTiming};
use crate::trace::{group_by_page, validate_page, TraceExtractor, TraceReconstructor, Tshark};
use crate::types::{NavEvent, NavigationTiming};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{error, info, warn};

/// What happened to one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run: String,
    pub attempted: usize,
    pub successful: usize,
    pub computed: usize,
    pub failed_pages: usize,
    pub compared_objects: usize,
}

/// Processes runs according to a [`RunConfig`]
pub struct RunProcessor {
    config: RunConfig,
    classifier: PacketClassifier,
    dumper: Option<Box<dyn PacketDumper>>,
    extractor: Option<Box<dyn TraceExtractor>>,
}

impl RunProcessor {
    /// Create a processor; external tools come from the config unless disabled
    pub fn new(config: RunConfig) -> Result<Self, TimingsError> {
        let (dumper, extractor): (Option<Box<dyn PacketDumper>>, Option<Box<dyn TraceExtractor>>) =
            if config.tools.enabled {
                (
                    Some(Box::new(ScriptDumper::new(
                        config.tools.packet_dump_script.clone(),
                    ))),
                    Some(Box::new(Tshark::from_tools(&config.tools))),
                )
            } else {
                (None, None)
            };
        Ok(Self {
            classifier: PacketClassifier::new()?,
            config,
            dumper,
            extractor,
        })
    }

    pub fn with_dumper(mut self, dumper: Box<dyn PacketDumper>) -> Self {
        self.dumper = Some(dumper);
        self
    }

    pub fn with_extractor(mut self, extractor: Box<dyn TraceExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs selected by the config
    pub fn runs(&self) -> Result<Vec<RunDir>, TimingsError> {
        discover_runs(&self.config.data_dir, self.config.run_filter.as_deref())
    }

    /// Compute timings for every selected run
    pub fn process_all(&self) -> Result<Vec<RunReport>, TimingsError> {
        let runs = self.runs()?;
        info!(data_dir = %self.config.data_dir.display(), runs = runs.len(), "processing runs");
        runs.iter().map(|run| self.process_run(run)).collect()
    }

    /// Success log, final timings and comparison log of one run
    pub fn process_run(&self, run: &RunDir) -> Result<RunReport, TimingsError> {
        let mut navtimings = run.read_navtimings().unwrap_or_else(|e| {
            warn!(run = %run.name(), error = %e, "could not get navigation timings");
            Vec::new()
        });
        navtimings.retain(|n| self.config.matches_workload(&n.page));

        let success = self.check_success(run, &navtimings)?;
        let successful: HashSet<(&str, &str)> = success
            .iter()
            .filter(|r| r.is_success())
            .map(|r| (r.page.as_str(), r.starttime.as_str()))
            .collect();

        let mut report = RunReport {
            run: run.name(),
            attempted: success.len(),
            successful: success.iter().filter(|r| r.is_success()).count(),
            ..Default::default()
        };

        let mut final_log = OutputLog::create(&run.final_timings_log())?;
        let mut compare_log = OutputLog::create(&run.compare_log())?;
        for navt in navtimings
            .iter()
            .filter(|n| successful.contains(&(n.page.as_str(), n.starttime.as_str())))
        {
            let row = match self.compute_page(run, navt) {
                Ok((row, compare_rows)) => {
                    for compare in &compare_rows {
                        compare_log.write(compare)?;
                    }
                    report.compared_objects += compare_rows.len();
                    row
                }
                Err(e) => {
                    error!(page = %navt.page, starttime = %navt.starttime, error = %e, "could not compute timings");
                    report.failed_pages += 1;
                    FinalTimingsRow {
                        navt: navt.clone(),
                        page_info: Default::default(),
                        har: None,
                        res: None,
                        smart_total_page_size: None,
                    }
                }
            };
            final_log.write(&row)?;
            report.computed += 1;
        }
        final_log.finish()?;
        compare_log.finish()?;

        info!(
            run = %report.run,
            attempted = report.attempted,
            successful = report.successful,
            failed = report.failed_pages,
            "logged run"
        );
        Ok(report)
    }

    /// Classify every attempted page load of a run and write the success log
    pub fn check_success(
        &self,
        run: &RunDir,
        navtimings: &[NavigationTiming],
    ) -> Result<Vec<SuccessRow>, TimingsError> {
        let starttimings = run.starttimings(&self.config.tools)?;
        let mut log = OutputLog::with_header(&run.success_log(), &SUCCESS_LOG_FIELDS)?;
        let mut rows = Vec::new();
        for (index, st) in starttimings.iter().enumerate() {
            if !self.config.matches_workload(&st.url) {
                continue;
            }
            let row = self.success_row(run, navtimings, &starttimings, index);
            log.write(&row)?;
            rows.push(row);
        }
        log.finish()?;

        let count = |p: NavtimingPresence| rows.iter().filter(|r| r.navtiming == p).count();
        info!(
            run = %run.name(),
            no_navtiming = count(NavtimingPresence::Missing),
            no_onload = count(NavtimingPresence::NoOnload),
            no_restiming = rows.iter().filter(|r| r.navtiming != NavtimingPresence::Missing && !r.restiming).count(),
            no_har = rows.iter().filter(|r| r.navtiming != NavtimingPresence::Missing && !r.harfile).count(),
            successful = rows.iter().filter(|r| r.is_success()).count(),
            attempted = rows.len(),
            "checked page loads"
        );
        Ok(rows)
    }

    fn success_row(
        &self,
        run: &RunDir,
        navtimings: &[NavigationTiming],
        starttimings: &[StartTiming],
        index: usize,
    ) -> SuccessRow {
        let st = &starttimings[index];
        let starttime = st.label_starttime();
        let navt = find_navtiming(navtimings, &st.url, &starttime);

        let (restiming, harfile) = match navt.map(|n| (n, n.label())) {
            Some((n, Ok(label))) => (
                run.restimings(&label).is_some_and(|r| !r.is_empty()),
                run.hartimings(&label, &n.scenario)
                    .is_some_and(|h| !h.is_empty()),
            ),
            Some((_, Err(e))) => {
                warn!(url = %st.url, error = %e, "no page label");
                (false, false)
            }
            None => (false, false),
        };
        let navtiming = NavtimingPresence::of(navt);

        let diagnosis = if navt.is_none() || !restiming || !harfile {
            info!(url = %st.url, starttime = %starttime, "failed page load");
            Some(Diagnosis::MissingSource {
                latest_event: latest_event(run, &st.url, &starttime, navt),
                packets: self.packet_counts(run, starttimings, index),
            })
        } else if navtiming == NavtimingPresence::NoOnload {
            let latest_event = navt.and_then(NavigationTiming::latest_fired_event);
            info!(url = %st.url, latest_event = ?latest_event, "no onLoad");
            Some(Diagnosis::NoOnload { latest_event })
        } else {
            None
        };

        SuccessRow {
            page: st.url.clone(),
            starttime,
            navtiming,
            restiming,
            harfile,
            diagnosis,
        }
    }

    fn packet_counts(
        &self,
        run: &RunDir,
        starttimings: &[StartTiming],
        index: usize,
    ) -> Option<PacketCounts> {
        let label = starttimings.get(index)?.label().ok()?;
        let window = match packet_window(starttimings, index) {
            Ok(window) => Some(window),
            Err(e) => {
                info!(label = %label, error = %e, "no packet window");
                None
            }
        };
        let packets = read_packets(run, &label, self.dumper.as_deref(), window)?;
        let counts = self.classifier.count(&packets);
        info!(label = %label, packets = packets.len(), ?counts, "counted packets");
        Some(counts)
    }

    /// Page statistics and comparison rows of one successful page load
    pub fn compute_page(
        &self,
        run: &RunDir,
        navt: &NavigationTiming,
    ) -> Result<(FinalTimingsRow, Vec<CompareRow>), TimingsError> {
        let label = navt.label()?;
        info!(run = %run.name(), label = %label, "logging timings");

        let page_info = run.har_page_info(&label);
        let on_load = page_info
            .on_load
            .or_else(|| navt.fired(NavEvent::LoadEventEnd));

        let hars = run.hartimings(&label, &navt.scenario).unwrap_or_default();
        let (har, har_before) = if hars.is_empty() {
            (None, Vec::new())
        } else {
            let (summary, before) = HarSummary::compute(&hars, on_load)?;
            info!(
                label = %label,
                requests = summary.number_of_requests,
                after_onload = summary.finished_after_onload,
                non_failed = summary.statuses.non_failed(),
                first200 = ?summary.first200_start,
                object_index = ?summary.object_index,
                byte_index = ?summary.byte_index_body,
                "HAR summary"
            );
            (Some(summary), before)
        };

        let ress = run.restimings(&label).unwrap_or_default();
        let (res, res_before) = if ress.is_empty() {
            (None, Vec::new())
        } else {
            let (summary, before) = ResSummary::compute(&ress, navt);
            info!(
                label = %label,
                resources = summary.number_of_resources,
                after_onload = summary.finished_after_onload,
                object_index = ?summary.object_index,
                byte_index = ?summary.byte_index,
                "Resource Timing summary"
            );
            (Some(summary), before)
        };

        let reconciliation = reconcile(&label, &har_before, &res_before);
        let smart_total_page_size = (har.is_some() || res.is_some())
            .then_some(reconciliation.smart_total_page_size);
        info!(label = %label, smart_total_page_size = ?smart_total_page_size, "smart total page size");

        let row = FinalTimingsRow {
            navt: navt.clone(),
            page_info,
            har,
            res,
            smart_total_page_size,
        };
        Ok((row, reconciliation.rows))
    }

    /// Write `object_sizes_trace.log` of one run; returns the number of rows
    pub fn validate_run(&self, run: &RunDir) -> Result<usize, TimingsError> {
        let Some(extractor) = &self.extractor else {
            info!(run = %run.name(), "no packet extractor, skipping validation");
            return Ok(0);
        };
        let packets = match extractor.extract(run) {
            Ok(packets) => packets,
            Err(e) => {
                warn!(run = %run.name(), error = %e, "could not extract packets");
                return Ok(0);
            }
        };

        let mut reconstructor = TraceReconstructor::new();
        reconstructor.feed_all(&packets);
        let starttimings = run.starttimings(&self.config.tools)?;
        let navtimings = run.read_navtimings().unwrap_or_else(|e| {
            warn!(run = %run.name(), error = %e, "could not get navigation timings");
            Vec::new()
        });

        let mut log = OutputLog::create(&run.trace_sizes_log())?;
        for page in group_by_page(reconstructor.into_streams(), &starttimings) {
            if !self.config.matches_workload(&page.start.url) {
                continue;
            }
            for row in validate_page(run, &page, &navtimings) {
                log.write(&row)?;
            }
        }
        let rows = log.finish()?;
        info!(run = %run.name(), rows, "logged object size validation");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExternalTools;
    use crate::metrics::fixtures::{har, navt, res, PAGE_START};
    use crate::store::navtiming::navtiming_record;
    use crate::store::restiming::restiming_record;
    use crate::store::{csv_writer, write_hartimings};
    use crate::trace::{Packet, PacketFields};
    use crate::types::{HarTiming, PageLabel, ResTiming};
    use pretty_assertions::assert_eq;
    use std::fs::{self, File};
    use std::path::Path;

    const OTHER_START: &str = "2018-09-20+12-00-30.000000";

    fn write_records(path: &Path, records: Vec<Vec<String>>) {
        let mut writer = csv_writer(File::create(path).unwrap());
        for record in records {
            writer.write_record(record).unwrap();
        }
        writer.flush().unwrap();
    }

    fn write_res(run: &RunDir, label: &PageLabel, res: &[ResTiming]) {
        write_records(&run.res_log(label), res.iter().map(restiming_record).collect());
    }

    fn write_har(run: &RunDir, label: &PageLabel, har: &[HarTiming]) {
        write_hartimings(&run.har_log(label), har).unwrap();
    }

    fn setup(root: &Path) -> RunDir {
        let run = RunDir::new(root.join("run-1"));
        fs::create_dir_all(run.path().join("har")).unwrap();
        fs::create_dir_all(run.path().join("res")).unwrap();

        let example = navt("http://example.com/", 1500.0);
        let mut other = navt("http://other.org/", 1500.0);
        other.starttime = OTHER_START.to_string();
        other.set_event(NavEvent::LoadEventStart, Some(0.0));
        other.set_event(NavEvent::LoadEventEnd, Some(0.0));
        write_records(
            &run.navtimings_log(),
            vec![navtiming_record(&example), navtiming_record(&other)],
        );

        fs::write(
            run.starttimings_log(),
            "http://example.com/,2018-09-20 12:00:00.000000\n\
             http://other.org/,2018-09-20 12:00:30.000000\n\
             http://gone.net/,2018-09-20 12:01:00.000000\n",
        )
        .unwrap();

        let example_label = PageLabel::new("example.com", PAGE_START);
        write_har(
            &run,
            &example_label,
            &[
                har("http://example.com/", 200, 100.0, 50.0, Some(1000)),
                har("http://example.com/a.js", 200, 200.0, 50.0, Some(2000)),
                har("http://example.com/b.png", 304, 5000.0, 50.0, None),
            ],
        );
        write_res(
            &run,
            &example_label,
            &[res("http://example.com/a.js", 200.0, 50.0, Some(1800))],
        );

        let other_label = PageLabel::new("other.org", OTHER_START);
        write_har(&run, &other_label, &[har("http://other.org/", 200, 0.0, 10.0, Some(1))]);
        write_res(&run, &other_label, &[res("http://other.org/x.js", 5.0, 1.0, Some(1))]);
        run
    }

    fn processor(root: &Path) -> RunProcessor {
        let config = RunConfig::new()
            .with_data_dir(root)
            .with_tools(ExternalTools::disabled());
        RunProcessor::new(config).unwrap()
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_process_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let run = setup(dir.path());
        let processor = processor(dir.path());

        let reports = processor.process_all().unwrap();
        assert_eq!(
            reports,
            vec![RunReport {
                run: "run-1".to_string(),
                attempted: 3,
                successful: 1,
                computed: 1,
                failed_pages: 0,
                compared_objects: 2,
            }]
        );

        let success = lines(&run.success_log());
        assert_eq!(success.len(), 4);
        assert_eq!(
            success[1],
            format!("http://example.com/,{PAGE_START},navtiming,restiming,harfile")
        );
        assert_eq!(
            success[2],
            format!("http://other.org/,{OTHER_START},navtiming_but_no_onload,restiming,harfile,responseStart")
        );
        assert_eq!(
            success[3],
            "http://gone.net/,2018-09-20+12-01-00.000000,no_navtiming,no_restiming,no_harfile,NA,NA,NA,NA,NA,NA,NA,NA"
        );

        let finals = lines(&run.final_timings_log());
        assert_eq!(finals.len(), 1);
        let columns: Vec<&str> = finals[0].split(',').collect();
        assert_eq!(columns.len(), 48);
        assert_eq!(columns[12], "3");
        assert_eq!(columns[13], "1");
        assert_eq!(columns[47], "2800");

        let compare = lines(&run.compare_log());
        assert_eq!(compare.len(), 2);
        assert!(compare[0].contains(",in_har_not_in_res,"));
        assert!(compare[1].contains(",in_both,"));
    }

    #[test]
    fn test_broken_page_gets_padded_row() {
        let dir = tempfile::tempdir().unwrap();
        let run = setup(dir.path());
        let label = PageLabel::new("example.com", PAGE_START);
        write_har(
            &run,
            &label,
            &[har("http://example.com/", 42, 100.0, 50.0, Some(1000))],
        );

        let report = processor(dir.path()).process_run(&run).unwrap();
        assert_eq!(report.failed_pages, 1);
        assert_eq!(report.computed, 1);

        let finals = lines(&run.final_timings_log());
        let columns: Vec<&str> = finals[0].split(',').collect();
        assert_eq!(columns.len(), 48);
        assert!(columns[12..].iter().all(|c| *c == "NA"));
    }

    #[test]
    fn test_workload_filter_limits_attempted_pages() {
        let dir = tempfile::tempdir().unwrap();
        let run = setup(dir.path());
        let config = RunConfig::new()
            .with_data_dir(dir.path())
            .with_workloads(["example"])
            .with_tools(ExternalTools::disabled());
        let report = RunProcessor::new(config).unwrap().process_run(&run).unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.successful, 1);
    }

    struct CannedTrace(Vec<Packet>);

    impl TraceExtractor for CannedTrace {
        fn extract(&self, _run: &RunDir) -> Result<Vec<Packet>, TimingsError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_validate_run_without_extractor_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let run = setup(dir.path());
        assert_eq!(processor(dir.path()).validate_run(&run).unwrap(), 0);
        assert!(!run.trace_sizes_log().exists());
    }

    #[test]
    fn test_validate_run_writes_one_row_per_completed_object() {
        let dir = tempfile::tempdir().unwrap();
        let run = setup(dir.path());

        // The page load starts one second before its first request
        let epoch = 1537444800.0;
        let start = StartTiming::new(
            "http://example.com/",
            crate::trace::local_time(epoch - 1.0)
                .unwrap()
                .format(crate::store::run::START_TIME_FORMAT)
                .to_string(),
        );
        fs::write(
            run.starttimings_log(),
            format!("{},{}\n", start.url, start.starttime),
        )
        .unwrap();
        let mut page = navt("http://example.com/", 1500.0);
        page.starttime = start.label_starttime();
        write_records(&run.navtimings_log(), vec![navtiming_record(&page)]);

        let request = PacketFields::parse(&format!("{epoch}#0#50000#1#1#example.com#/##60")).unwrap();
        let response =
            PacketFields::parse(&format!("{}#0#80#1#61###200#19", epoch + 0.1)).unwrap();
        let trace = CannedTrace(vec![
            Packet::new(request, ""),
            Packet::new(response, hex::encode(b"HTTP/1.1 200 OK\r\n\r\n")),
        ]);

        let rows = processor(dir.path())
            .with_extractor(Box::new(trace))
            .validate_run(&run)
            .unwrap();
        assert_eq!(rows, 1);

        let logged = lines(&run.trace_sizes_log());
        let columns: Vec<&str> = logged[0].split(',').collect();
        assert_eq!(columns.len(), 13);
        assert_eq!(columns[0], "http://example.com/");
        assert_eq!(columns[1], start.label_starttime());
        assert_eq!(columns[3], "http://example.com/");
        assert_eq!(&columns[4..8], &["200", "19", "19", "0"]);
        assert!(columns[8..].iter().all(|c| *c == "NA"));
    }
}
