//! HAR and Resource Timing reconciliation
//!
//! Both directions are matched over their own shrinking pools: every HAR
//! record looks for the closest Resource Timing (at its start time), then every
//! Resource Timing looks for the closest HAR transaction. Each record ends up in
//! exactly one of three classes, and each object counts once towards the smart
//! total page size.

use crate::matcher::{CandidatePool, MatchMode, MatchQuery, MatchWindow};
use crate::output::CompareRow;
use crate::types::{millis, HarTiming, PageLabel, ResTiming, STATUS_RES_ONLY};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Which sources observed an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectPresence {
    InHarNotInRes,
    InResNotInHar,
    InBoth,
}

impl ObjectPresence {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectPresence::InHarNotInRes => "in_har_not_in_res",
            ObjectPresence::InResNotInHar => "in_res_not_in_har",
            ObjectPresence::InBoth => "in_both",
        }
    }
}

/// Best size of a HAR object without a Resource Timing counterpart
pub fn har_only_size(har: &HarTiming) -> i64 {
    if let Some(cl) = har.content_length.filter(|cl| *cl > 0) {
        return cl;
    }
    match har.body_size {
        Some(body) if body > 0 && !har.is_redirect() => body,
        _ => 0,
    }
}

/// Best size of an object seen by both sources
///
/// Content-Length wins; logged body sizes of redirects are not trusted.
pub fn matched_size(har: &HarTiming, res: &ResTiming) -> i64 {
    if let Some(cl) = har.content_length.filter(|cl| *cl > 0) {
        return cl;
    }
    if har.is_redirect() {
        return 0;
    }
    res.encoded_body_size
        .filter(|e| *e > 0)
        .or_else(|| har.body_size.filter(|b| *b > 0))
        .unwrap_or(0)
}

/// Outcome of reconciling one page load
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub rows: Vec<CompareRow>,
    pub smart_total_page_size: i64,
    pub in_both: usize,
    pub har_only: usize,
    pub res_only: usize,
    /// Matches decided by pool order between equidistant candidates
    pub ambiguous: usize,
}

/// Reconcile the before-onLoad HAR and Resource Timing records of a page load
///
/// The page start is the start of the first HAR record; without HAR records
/// every Resource Timing is reported as Resource-only.
pub fn reconcile(label: &PageLabel, har: &[&HarTiming], res: &[&ResTiming]) -> Reconciliation {
    let mut out = Reconciliation::default();
    let page_url = label.page_url();

    let Some(page_start) = har.first().map(|h| h.started) else {
        for r in res {
            out.add_res_only(label, &page_url, r);
        }
        return out;
    };

    let mut res_pool = CandidatePool::new(res.to_vec());
    for h in har {
        let query = MatchQuery::new(&h.url, h.started, MatchMode::Closest);
        match res_pool.take(&query, |r| MatchWindow::restiming(r, page_start)) {
            Some(found) => {
                let r = *res_pool.get(found.id);
                if found.tied {
                    out.ambiguous += 1;
                }
                debug!(
                    url = %h.url,
                    har_body = ?h.body_size,
                    res_encoded = ?r.encoded_body_size,
                    distance_secs = found.distance_secs,
                    "in both"
                );
                out.in_both += 1;
                out.smart_total_page_size += matched_size(h, r);
                out.rows.push(CompareRow::from_har(
                    label,
                    &page_url,
                    h,
                    Some(r),
                    ObjectPresence::InBoth,
                ));
            }
            None => {
                info!(url = %h.url, status = h.status, "in HAR, but not in Resource Timing");
                out.har_only += 1;
                out.smart_total_page_size += har_only_size(h);
                out.rows.push(CompareRow::from_har(
                    label,
                    &page_url,
                    h,
                    None,
                    ObjectPresence::InHarNotInRes,
                ));
            }
        }
    }

    let mut har_pool = CandidatePool::new(har.to_vec());
    for r in res {
        let at = page_start + millis(r.start_ms);
        let query = MatchQuery::new(&r.url, at, MatchMode::Closest);
        match har_pool.take(&query, |h| MatchWindow::har_transaction(h)) {
            Some(found) => {
                if found.tied {
                    out.ambiguous += 1;
                }
            }
            None => out.add_res_only(label, &page_url, r),
        }
    }

    if out.ambiguous > 0 {
        warn!(
            label = %label,
            ambiguous = out.ambiguous,
            "matches decided between equidistant candidates"
        );
    }
    out
}

impl Reconciliation {
    fn add_res_only(&mut self, label: &PageLabel, page_url: &str, res: &ResTiming) {
        info!(url = %res.url, "in Resource Timing, but not in HAR");
        self.res_only += 1;
        self.smart_total_page_size += res.encoded_body_size.unwrap_or(0);
        self.rows.push(CompareRow::from_res(label, page_url, res, STATUS_RES_ONLY));
    }
}
