//! Record store
//!
//! Typed readers and writers for the three per-run logs (Navigation Timing,
//! Resource Timing, normalized HAR timing), plus the run directory layout that
//! locates them by page label.

pub mod fields;
pub mod hartiming;
pub mod navtiming;
pub mod restiming;
pub mod run;

pub use hartiming::{read_hartimings, write_hartimings, HARTIMING_FIELDS};
pub use navtiming::{read_navtimings, NAVTIMING_FIELDS};
pub use restiming::{read_restimings, RESTIMING_FIELDS};
pub use run::{RunDir, StartTiming};

use crate::error::TimingsError;
use fields::Row;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub(crate) fn csv_reader<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(source)
}

pub(crate) fn csv_writer<W: Write>(sink: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(sink)
}

/// Parse every row of a headerless CSV source
pub(crate) fn parse_rows<R, T, F>(source: R, parse: F) -> Result<Vec<T>, TimingsError>
where
    R: Read,
    F: Fn(&Row<'_>) -> Result<T, TimingsError>,
{
    let mut reader = csv_reader(source);
    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        records.push(parse(&Row::new(&record))?);
    }
    Ok(records)
}

pub(crate) fn read_rows<T, F>(path: &Path, parse: F) -> Result<Vec<T>, TimingsError>
where
    F: Fn(&Row<'_>) -> Result<T, TimingsError>,
{
    parse_rows(File::open(path)?, parse)
}
