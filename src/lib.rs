//! Page load timings - reconciles browser-side and network-side views of page loads
//!
//! For every page load of a measurement run, the engine joins three records:
//! Navigation Timing, Resource Timing and the HAR file. Optionally it also
//! joins the packet trace of the run. From these it derives per-page
//! statistics: object counts, status histograms, the Object Index, the Byte
//! Index and a page size that picks the best size estimate per object.
//!
//! ## Modules
//!
//! - **Record Store**: typed readers and writers for the per-run logs
//! - **HAR Normalizer**: flattens HAR entries into HAR timings
//! - **Cross-Source Matcher**: pairs objects across sources by URL and time
//! - **Metric Engine**: page statistics, Object Index and Byte Index
//! - **Trace Reconstructor**: object sizes re-derived from the TCP byte stream

pub mod config;
pub mod diagnose;
pub mod error;
pub mod har;
pub mod matcher;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod reconcile;
pub mod store;
pub mod trace;
pub mod types;

pub use config::{ExternalTools, RunConfig};
pub use error::TimingsError;
pub use har::{normalize_har_file, HarDocument, HarNormalizer};
pub use matcher::{CandidatePool, MatchMode, MatchQuery, MatchWindow};
pub use metrics::{byte_index, object_index, HarSummary, ResSummary};
pub use pipeline::{RunProcessor, RunReport};
pub use reconcile::{reconcile, ObjectPresence, Reconciliation};
pub use store::{RunDir, StartTiming};
pub use types::{HarTiming, NavEvent, NavigationTiming, PageLabel, ResTiming};

/// Version reported by the command-line tool
pub const TIMINGS_VERSION: &str = env!("CARGO_PKG_VERSION");
