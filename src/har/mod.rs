//! HAR documents and their normalization into flat HAR timings

mod document;
mod normalizer;

pub use document::{
    HarContent, HarCreator, HarDocument, HarEntry, HarHeader, HarLog, HarPage, HarPageInfo,
    HarPageTimings, HarRequest, HarResponse, HarTimings, WEB_INSPECTOR,
};
pub use normalizer::{HarNormalizer, HarProducer};

use crate::error::TimingsError;
use crate::store::write_hartimings;
use crate::types::HarTiming;
use std::path::Path;
use tracing::info;

/// Normalize a HAR file and write the result as a HAR timing log
pub fn normalize_har_file(
    har_path: &Path,
    log_path: &Path,
    scenario: &str,
) -> Result<Vec<HarTiming>, TimingsError> {
    let doc = HarDocument::from_path(har_path)?;
    let timings = HarNormalizer::new(scenario).normalize(&doc)?;
    write_hartimings(log_path, &timings)?;
    info!(
        har = %har_path.display(),
        log = %log_path.display(),
        entries = timings.len(),
        "normalized HAR timings"
    );
    Ok(timings)
}
