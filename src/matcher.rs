//! Cross-source matching
//!
//! Pairs one record (identified by URL and a reference timestamp) with the best
//! candidate of another source. Candidates live in a [`CandidatePool`] whose
//! claimed bitset enforces that every candidate is matched at most once.
//!
//! Selection: candidates with the same URL (and status, if requested) are
//! scored by the distance of the timestamp to their time window, 0 for a
//! direct hit. [`MatchMode::Strict`] only accepts a single direct hit;
//! [`MatchMode::Closest`] takes the minimum distance, first candidate in pool
//! order winning ties.

use crate::types::{millis, HarTiming, ResTiming};
use chrono::NaiveDateTime;
use tracing::debug;

/// Stable index of a candidate in its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateId(usize);

impl CandidateId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Anything that can be looked up by URL
pub trait MatchCandidate {
    fn url(&self) -> &str;

    /// Status code, for sources that log one
    fn status(&self) -> Option<i32> {
        None
    }
}

impl<T: MatchCandidate + ?Sized> MatchCandidate for &T {
    fn url(&self) -> &str {
        (**self).url()
    }

    fn status(&self) -> Option<i32> {
        (**self).status()
    }
}

impl MatchCandidate for HarTiming {
    fn url(&self) -> &str {
        &self.url
    }

    fn status(&self) -> Option<i32> {
        Some(self.status)
    }
}

impl MatchCandidate for ResTiming {
    fn url(&self) -> &str {
        &self.url
    }
}

/// Valid time interval of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl MatchWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// Around the moment a HAR request was sent, with 1 ms of rounding slack
    pub fn har_send(har: &HarTiming) -> Self {
        Self {
            start: har.started + millis(har.phases.pre_send_ms() - 1.0),
            end: har.started + millis(har.phases.post_send_ms() + 1.0),
        }
    }

    /// From the HAR start until the response was received
    pub fn har_transaction(har: &HarTiming) -> Self {
        Self {
            start: har.started - millis(1.0),
            end: har.started + millis(har.phases.transaction_ms()),
        }
    }

    /// Resource Timing interval, anchored at the page start
    pub fn restiming(res: &ResTiming, page_start: NaiveDateTime) -> Self {
        let start = page_start + millis(res.start_ms);
        Self {
            start,
            end: start + millis(res.duration_ms),
        }
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        at >= self.start && at <= self.end
    }

    /// Distance in seconds to the nearer window edge, 0 inside the window
    pub fn distance_secs(&self, at: NaiveDateTime) -> f64 {
        if self.contains(at) {
            return 0.0;
        }
        let to_start = seconds(at - self.start).abs();
        let to_end = seconds(self.end - at).abs();
        to_start.min(to_end)
    }
}

fn seconds(delta: chrono::Duration) -> f64 {
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Exactly one candidate window must contain the timestamp
    Strict,
    /// Fall back to the nearest candidate
    Closest,
}

/// What to look for
#[derive(Debug, Clone, Copy)]
pub struct MatchQuery<'a> {
    pub url: &'a str,
    pub at: NaiveDateTime,
    pub status: Option<i32>,
    pub mode: MatchMode,
}

impl<'a> MatchQuery<'a> {
    pub fn new(url: &'a str, at: NaiveDateTime, mode: MatchMode) -> Self {
        Self {
            url,
            at,
            status: None,
            mode,
        }
    }

    pub fn with_status(mut self, status: i32) -> Self {
        self.status = Some(status);
        self
    }
}

/// A selected candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub id: CandidateId,
    pub distance_secs: f64,
    pub direct_hit: bool,
    /// Another candidate was just as close; pool order decided
    pub tied: bool,
}

/// Arena of candidates with a claimed bitset
#[derive(Debug, Clone)]
pub struct CandidatePool<T> {
    items: Vec<T>,
    claimed: Vec<bool>,
}

impl<T> Default for CandidatePool<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T> CandidatePool<T> {
    pub fn new(items: Vec<T>) -> Self {
        let claimed = vec![false; items.len()];
        Self { items, claimed }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: CandidateId) -> &T {
        &self.items[id.0]
    }

    pub fn is_claimed(&self, id: CandidateId) -> bool {
        self.claimed[id.0]
    }

    /// Mark a candidate as matched; returns false if it already was
    pub fn claim(&mut self, id: CandidateId) -> bool {
        !std::mem::replace(&mut self.claimed[id.0], true)
    }

    pub fn unclaimed(&self) -> impl Iterator<Item = (CandidateId, &T)> {
        self.items
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.claimed[*i])
            .map(|(i, item)| (CandidateId(i), item))
    }

    pub fn remaining(&self) -> usize {
        self.claimed.iter().filter(|c| !**c).count()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }
}

impl<T: MatchCandidate> CandidatePool<T> {
    /// Select the best unclaimed candidate without claiming it
    pub fn find<W>(&self, query: &MatchQuery<'_>, window: W) -> Option<Match>
    where
        W: Fn(&T) -> MatchWindow,
    {
        let scored: Vec<(CandidateId, f64)> = self
            .unclaimed()
            .filter(|(_, c)| c.url() == query.url)
            .filter(|(_, c)| query.status.is_none() || c.status() == query.status)
            .map(|(id, c)| (id, window(c).distance_secs(query.at)))
            .collect();

        match query.mode {
            MatchMode::Strict => {
                let mut hits = scored.iter().filter(|(_, d)| *d == 0.0);
                match (hits.next(), hits.next()) {
                    (Some((id, _)), None) => Some(Match {
                        id: *id,
                        distance_secs: 0.0,
                        direct_hit: true,
                        tied: false,
                    }),
                    (Some(_), Some(_)) => {
                        debug!(url = query.url, "several direct hits, no strict match");
                        None
                    }
                    _ => None,
                }
            }
            MatchMode::Closest => {
                let (best_id, best) = scored.iter().fold(None, |best, (id, d)| match best {
                    Some((_, bd)) if *d >= bd => best,
                    _ => Some((*id, *d)),
                })?;
                let tied = scored.iter().filter(|(_, d)| *d == best).count() > 1;
                if tied {
                    debug!(
                        url = query.url,
                        distance_secs = best,
                        "equidistant candidates, keeping the first"
                    );
                }
                Some(Match {
                    id: best_id,
                    distance_secs: best,
                    direct_hit: best == 0.0,
                    tied,
                })
            }
        }
    }

    /// Select the best unclaimed candidate and claim it
    pub fn take<W>(&mut self, query: &MatchQuery<'_>, window: W) -> Option<Match>
    where
        W: Fn(&T) -> MatchWindow,
    {
        let found = self.find(query, window)?;
        self.claim(found.id);
        Some(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{parse_label_time, HarPhases, ResPhases};
    use proptest::prelude::*;

    fn t0() -> NaiveDateTime {
        parse_label_time("2018-09-20+12-00-00.000000").unwrap()
    }

    fn at(ms: f64) -> NaiveDateTime {
        t0() + millis(ms)
    }

    #[derive(Debug, Clone)]
    struct Probe {
        url: String,
        start_ms: f64,
        end_ms: f64,
    }

    impl MatchCandidate for Probe {
        fn url(&self) -> &str {
            &self.url
        }
    }

    fn probe(url: &str, start_ms: f64, end_ms: f64) -> Probe {
        Probe {
            url: url.to_string(),
            start_ms,
            end_ms,
        }
    }

    fn probe_window(p: &Probe) -> MatchWindow {
        MatchWindow::new(at(p.start_ms), at(p.end_ms))
    }

    #[test]
    fn test_overlapping_windows_are_a_direct_hit() {
        // HAR window [10, 20], resource window [12, 18]
        let pool = CandidatePool::new(vec![probe("http://a.com/x", 10.0, 20.0)]);
        let query = MatchQuery::new("http://a.com/x", at(12.0), MatchMode::Strict);
        let found = pool.find(&query, probe_window).unwrap();
        assert!(found.direct_hit);
        assert_eq!(found.distance_secs, 0.0);
    }

    #[test]
    fn test_disjoint_windows_only_match_when_closest() {
        // HAR window [10, 20], resource window [25, 30]
        let pool = CandidatePool::new(vec![probe("http://a.com/x", 10.0, 20.0)]);
        let strict = MatchQuery::new("http://a.com/x", at(25.0), MatchMode::Strict);
        assert!(pool.find(&strict, probe_window).is_none());

        let closest = MatchQuery::new("http://a.com/x", at(25.0), MatchMode::Closest);
        let found = pool.find(&closest, probe_window).unwrap();
        assert!(!found.direct_hit);
        assert!((found.distance_secs - 0.005).abs() < 1e-9);
    }

    #[test]
    fn test_url_must_match_exactly() {
        let pool = CandidatePool::new(vec![probe("http://a.com/X", 10.0, 20.0)]);
        let query = MatchQuery::new("http://a.com/x", at(12.0), MatchMode::Closest);
        assert!(pool.find(&query, probe_window).is_none());
    }

    #[test]
    fn test_strict_rejects_multiple_direct_hits() {
        let pool = CandidatePool::new(vec![
            probe("http://a.com/x", 10.0, 20.0),
            probe("http://a.com/x", 11.0, 30.0),
        ]);
        let query = MatchQuery::new("http://a.com/x", at(15.0), MatchMode::Strict);
        assert!(pool.find(&query, probe_window).is_none());
    }

    #[test]
    fn test_closest_tie_keeps_first_and_is_flagged() {
        let pool = CandidatePool::new(vec![
            probe("http://a.com/x", 0.0, 10.0),
            probe("http://a.com/x", 30.0, 40.0),
        ]);
        let query = MatchQuery::new("http://a.com/x", at(20.0), MatchMode::Closest);
        let found = pool.find(&query, probe_window).unwrap();
        assert_eq!(found.id.index(), 0);
        assert!(found.tied);
    }

    #[test]
    fn test_claimed_candidates_are_skipped() {
        let mut pool = CandidatePool::new(vec![
            probe("http://a.com/x", 10.0, 20.0),
            probe("http://a.com/x", 100.0, 120.0),
        ]);
        let query = MatchQuery::new("http://a.com/x", at(15.0), MatchMode::Closest);
        assert_eq!(pool.take(&query, probe_window).unwrap().id.index(), 0);
        assert_eq!(pool.take(&query, probe_window).unwrap().id.index(), 1);
        assert!(pool.take(&query, probe_window).is_none());
        assert_eq!(pool.remaining(), 0);
    }

    #[test]
    fn test_status_filter() {
        let har = HarTiming {
            url: "http://a.com/".to_string(),
            method: "GET".to_string(),
            http_version: None,
            status: 301,
            mime_type: None,
            scenario: "s".to_string(),
            proxy_source: None,
            proxy_source2: None,
            transfer_size: None,
            header_size: None,
            body_size: None,
            content_length: None,
            content_size: None,
            started: at(100.0),
            start_delta_ms: 100.0,
            phases: HarPhases {
                blocked: Some(2.0),
                dns: Some(0.0),
                connect: Some(0.0),
                ssl: Some(0.0),
                send: Some(1.0),
                wait: Some(10.0),
                receive: Some(1.0),
            },
        };
        let window = MatchWindow::har_send(&har);
        assert_eq!(window.start, at(101.0));
        assert_eq!(window.end, at(104.0));

        let pool = CandidatePool::new(vec![har]);
        let query = MatchQuery::new("http://a.com/", at(102.0), MatchMode::Strict);
        assert!(pool
            .find(&query.with_status(200), MatchWindow::har_send)
            .is_none());
        assert!(pool
            .find(&query.with_status(301), MatchWindow::har_send)
            .is_some());
    }

    #[test]
    fn test_restiming_window() {
        let res = ResTiming {
            url: "http://a.com/x.js".to_string(),
            scenario: "s".to_string(),
            initiator_type: None,
            next_hop_protocol: None,
            encoded_body_size: None,
            decoded_body_size: None,
            start_ms: 12.0,
            phases: ResPhases::default(),
            response_end_ms: 18.0,
            duration_ms: 6.0,
        };
        let window = MatchWindow::restiming(&res, t0());
        assert_eq!(window, MatchWindow::new(at(12.0), at(18.0)));
    }

    fn probes() -> impl Strategy<Value = Vec<Probe>> {
        prop::collection::vec(
            (0..3usize, 0.0..1000.0f64, 0.0..200.0f64).prop_map(|(u, start, dur)| {
                probe(&format!("http://a.com/{u}"), start, start + dur)
            }),
            0..12,
        )
    }

    proptest! {
        #[test]
        fn prop_matching_is_a_bijection(left in probes(), right in probes()) {
            let mut pool = CandidatePool::new(right.clone());
            let mut matched_left = 0usize;
            let mut seen = std::collections::HashSet::new();
            for p in &left {
                let query = MatchQuery::new(&p.url, at(p.start_ms), MatchMode::Closest);
                if let Some(found) = pool.take(&query, probe_window) {
                    prop_assert!(seen.insert(found.id));
                    matched_left += 1;
                }
            }
            prop_assert!(matched_left <= left.len().min(right.len()));
            prop_assert_eq!(pool.remaining(), right.len() - matched_left);
        }
    }
}
