//! Navigation Timing log (`navtimings.log`)

use super::fields::{na, Row};
use super::read_rows;
use crate::error::TimingsError;
use crate::types::{NavEvent, NavigationTiming};
use std::path::Path;

/// Column names of the Navigation Timing log, in order
pub const NAVTIMING_FIELDS: [&str; 24] = [
    "page",
    "scenario",
    "starttime",
    "startunixtimestamp",
    "navigationStart",
    "redirectStart",
    "redirectEnd",
    "fetchStart",
    "domainLookupStart",
    "domainLookupEnd",
    "connectStart",
    "secureConnectionStart",
    "connectEnd",
    "requestStart",
    "responseStart",
    "responseEnd",
    "domLoading",
    "domInteractive",
    "domContentLoadedEventStart",
    "domContentLoadedEventEnd",
    "domComplete",
    "loadEventStart",
    "loadEventEnd",
    "firstPaint",
];

const FIRST_EVENT_COLUMN: usize = 5;
const FIRST_PAINT_COLUMN: usize = FIRST_EVENT_COLUMN + NavEvent::COUNT;

pub fn parse_navtiming(row: &Row<'_>) -> Result<NavigationTiming, TimingsError> {
    let mut events = [None; NavEvent::COUNT];
    for (offset, event) in NavEvent::ALL.iter().enumerate() {
        events[offset] = row.opt_f64(FIRST_EVENT_COLUMN + offset, event.as_str())?;
    }

    Ok(NavigationTiming {
        page: row.string(0, "page")?,
        scenario: row.string(1, "scenario")?,
        starttime: row.string(2, "starttime")?,
        start_unix_timestamp: row.opt_string(3, "startunixtimestamp")?,
        navigation_start: row.opt_f64(4, "navigationStart")?,
        events,
        first_paint: row.opt_f64(FIRST_PAINT_COLUMN, "firstPaint")?,
    })
}

pub fn navtiming_record(navt: &NavigationTiming) -> Vec<String> {
    let mut record = vec![
        navt.page.clone(),
        navt.scenario.clone(),
        navt.starttime.clone(),
        na(&navt.start_unix_timestamp),
        na(&navt.navigation_start),
    ];
    record.extend(navt.events.iter().map(na));
    record.push(na(&navt.first_paint));
    record
}

/// Read all Navigation Timings of a run
pub fn read_navtimings(path: &Path) -> Result<Vec<NavigationTiming>, TimingsError> {
    read_rows(path, parse_navtiming)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::parse_rows;

    const LINE: &str = "http://example.com/,default,2018-09-20+12-00-00.123456,1537444800.123,1537444800.123,0,0,2,3,4,5,NA,6,7,90,120,95,300,310,320,1400,1450,1500,250\n";

    #[test]
    fn test_parse_navtiming_line() {
        let navts = parse_rows(LINE.as_bytes(), parse_navtiming).unwrap();
        assert_eq!(navts.len(), 1);
        let navt = &navts[0];
        assert_eq!(navt.page, "http://example.com/");
        assert_eq!(navt.navigation_start, Some(1537444800.123));
        assert_eq!(navt.event(NavEvent::FetchStart), Some(2.0));
        assert_eq!(navt.event(NavEvent::SecureConnectionStart), None);
        assert_eq!(navt.event(NavEvent::LoadEventEnd), Some(1500.0));
        assert_eq!(navt.first_paint, Some(250.0));
        assert_eq!(navt.label().unwrap().host, "example.com");
    }

    #[test]
    fn test_record_has_fixed_width() {
        let navts = parse_rows(LINE.as_bytes(), parse_navtiming).unwrap();
        let record = navtiming_record(&navts[0]);
        assert_eq!(record.len(), NAVTIMING_FIELDS.len());
        assert_eq!(record[11], "NA");
    }

    #[test]
    fn test_short_row_is_rejected() {
        let result = parse_rows("http://example.com/,default\n".as_bytes(), parse_navtiming);
        assert!(result.is_err());
    }
}
