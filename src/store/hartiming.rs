//! Normalized HAR timing log (`har/<label>.har.log`)

use super::fields::{na, sanitize, Row, NA};
use super::{csv_writer, read_rows};
use crate::error::TimingsError;
use crate::types::{parse_label_time, HarPhases, HarTiming, ProxyHop, LABEL_TIME_FORMAT};
use std::fs::File;
use std::path::Path;

/// Column names of the HAR timing log, in order
pub const HARTIMING_FIELDS: [&str; 24] = [
    "name",
    "method",
    "httpVersion",
    "status",
    "mimeType",
    "scenario",
    "mahttpp_ip1",
    "mahttpp_port1",
    "mahttpp_ip2",
    "mahttpp_port2",
    "resptransfersize",
    "respheadersize",
    "respbodysize",
    "contentlengthheader",
    "contentsize",
    "startedDateTime",
    "start_delta",
    "blocked",
    "dns",
    "connect",
    "ssl",
    "send",
    "wait",
    "receive",
];

fn parse_hop(row: &Row<'_>, ip: usize, port: usize) -> Result<Option<ProxyHop>, TimingsError> {
    let ip = row.opt_string(ip, "mahttpp_ip")?;
    let port = row.opt_string(port, "mahttpp_port")?;
    Ok(match (ip, port) {
        (Some(ip), Some(port)) => Some(ProxyHop { ip, port }),
        _ => None,
    })
}

pub fn parse_hartiming(row: &Row<'_>) -> Result<HarTiming, TimingsError> {
    Ok(HarTiming {
        url: row.string(0, "name")?,
        method: row.string(1, "method")?,
        http_version: row.opt_string(2, "httpVersion")?,
        status: row.i32(3, "status")?,
        mime_type: row.opt_string(4, "mimeType")?,
        scenario: row.string(5, "scenario")?,
        proxy_source: parse_hop(row, 6, 7)?,
        proxy_source2: parse_hop(row, 8, 9)?,
        transfer_size: row.size(10, "resptransfersize")?,
        header_size: row.size(11, "respheadersize")?,
        body_size: row.size(12, "respbodysize")?,
        content_length: row.size(13, "contentlengthheader")?,
        content_size: row.size(14, "contentsize")?,
        started: parse_label_time(row.raw(15, "startedDateTime")?)?,
        start_delta_ms: row.f64(16, "start_delta")?,
        phases: HarPhases {
            blocked: row.opt_f64(17, "blocked")?,
            dns: row.opt_f64(18, "dns")?,
            connect: row.opt_f64(19, "connect")?,
            ssl: row.opt_f64(20, "ssl")?,
            send: row.opt_f64(21, "send")?,
            wait: row.opt_f64(22, "wait")?,
            receive: row.opt_f64(23, "receive")?,
        },
    })
}

pub fn hartiming_record(har: &HarTiming) -> Vec<String> {
    let hop = |h: &Option<ProxyHop>| match h {
        Some(h) => [h.ip.clone(), h.port.clone()],
        None => [NA.to_string(), NA.to_string()],
    };
    let [ip1, port1] = hop(&har.proxy_source);
    let [ip2, port2] = hop(&har.proxy_source2);
    let p = &har.phases;

    vec![
        sanitize(&har.url),
        har.method.clone(),
        na(&har.http_version),
        har.status.to_string(),
        na(&har.mime_type.as_deref().map(sanitize)),
        har.scenario.clone(),
        ip1,
        port1,
        ip2,
        port2,
        na(&har.transfer_size),
        na(&har.header_size),
        na(&har.body_size),
        na(&har.content_length),
        na(&har.content_size),
        har.started.format(LABEL_TIME_FORMAT).to_string(),
        har.start_delta_ms.to_string(),
        na(&p.blocked),
        na(&p.dns),
        na(&p.connect),
        na(&p.ssl),
        na(&p.send),
        na(&p.wait),
        na(&p.receive),
    ]
}

/// Read the normalized HAR timings of one page load
pub fn read_hartimings(path: &Path) -> Result<Vec<HarTiming>, TimingsError> {
    read_rows(path, parse_hartiming)
}

/// Write normalized HAR timings, replacing any previous file
pub fn write_hartimings(path: &Path, timings: &[HarTiming]) -> Result<(), TimingsError> {
    let mut writer = csv_writer(File::create(path)?);
    for timing in timings {
        writer.write_record(hartiming_record(timing))?;
    }
    writer.flush()?;
    Ok(())
}
