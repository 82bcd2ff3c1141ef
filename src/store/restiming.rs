//! Resource Timing log (`res/<label>.res.log`)

use super::fields::{na, sanitize, Row};
use super::read_rows;
use crate::error::TimingsError;
use crate::types::{ResPhases, ResTiming};
use std::path::Path;

/// Column names of the Resource Timing log, in order
pub const RESTIMING_FIELDS: [&str; 19] = [
    "name",
    "scenario",
    "initiatorType",
    "nextHopProtocol",
    "encodedBodySize",
    "decodedBodySize",
    "starttime",
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
    "duration",
];

pub fn parse_restiming(row: &Row<'_>) -> Result<ResTiming, TimingsError> {
    Ok(ResTiming {
        url: row.string(0, "name")?,
        scenario: row.string(1, "scenario")?,
        initiator_type: row.opt_string(2, "initiatorType")?,
        next_hop_protocol: row.opt_string(3, "nextHopProtocol")?,
        encoded_body_size: row.size(4, "encodedBodySize")?,
        decoded_body_size: row.size(5, "decodedBodySize")?,
        start_ms: row.f64(6, "starttime")?,
        phases: ResPhases {
            redirect_start: row.opt_f64(7, "redirectStart")?,
            redirect_end: row.opt_f64(8, "redirectEnd")?,
            fetch_start: row.opt_f64(9, "fetchStart")?,
            domain_lookup_start: row.opt_f64(10, "domainLookupStart")?,
            domain_lookup_end: row.opt_f64(11, "domainLookupEnd")?,
            connect_start: row.opt_f64(12, "connectStart")?,
            secure_connection_start: row.opt_f64(13, "secureConnectionStart")?,
            connect_end: row.opt_f64(14, "connectEnd")?,
            request_start: row.opt_f64(15, "requestStart")?,
            response_start: row.opt_f64(16, "responseStart")?,
        },
        response_end_ms: row.f64(17, "responseEnd")?,
        duration_ms: row.f64(18, "duration")?,
    })
}

pub fn restiming_record(res: &ResTiming) -> Vec<String> {
    let p = &res.phases;
    vec![
        sanitize(&res.url),
        res.scenario.clone(),
        na(&res.initiator_type),
        na(&res.next_hop_protocol),
        na(&res.encoded_body_size),
        na(&res.decoded_body_size),
        res.start_ms.to_string(),
        na(&p.redirect_start),
        na(&p.redirect_end),
        na(&p.fetch_start),
        na(&p.domain_lookup_start),
        na(&p.domain_lookup_end),
        na(&p.connect_start),
        na(&p.secure_connection_start),
        na(&p.connect_end),
        na(&p.request_start),
        na(&p.response_start),
        res.response_end_ms.to_string(),
        res.duration_ms.to_string(),
    ]
}

/// Read the Resource Timings of one page load
pub fn read_restimings(path: &Path) -> Result<Vec<ResTiming>, TimingsError> {
    read_rows(path, parse_restiming)
}
