//! HAR 1.2 document model
//!
//! Only the fields the normalizer reads are modelled. Everything the HAR
//! producers are known to omit is optional here; deciding which omissions are
//! fatal is left to the normalizer.

use crate::error::TimingsError;
use serde::{Deserialize, Deserializer};
use std::path::Path;

/// Creator name of HARs exported by the Chrome DevTools protocol
pub const WEB_INSPECTOR: &str = "WebInspector";

/// Distinguish a field that is absent from one that is explicitly `null`
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarDocument {
    pub log: HarLog,
}

impl HarDocument {
    pub fn from_json(json: &str) -> Result<Self, TimingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, TimingsError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn creator_name(&self) -> Option<&str> {
        self.log.creator.as_ref().and_then(|c| c.name.as_deref())
    }

    /// Page-level timings of the first page, each absent when not numeric
    pub fn page_info(&self) -> HarPageInfo {
        let page = self.log.pages.first();
        let timings = page.and_then(|p| p.page_timings.as_ref());
        HarPageInfo {
            started: page.and_then(|p| p.started_date_time.clone()),
            on_content_load: timings
                .and_then(|t| t.on_content_load.as_ref())
                .and_then(serde_json::Value::as_f64),
            on_load: timings
                .and_then(|t| t.on_load.as_ref())
                .and_then(serde_json::Value::as_f64),
        }
    }

    /// Number of entries and the sum of their logged response body sizes
    pub fn object_count_and_body_size(&self) -> (usize, i64) {
        let total = self
            .log
            .entries
            .iter()
            .filter_map(|e| e.response.body_size.flatten())
            .filter(|size| *size >= 0.0)
            .map(|size| size as i64)
            .sum();
        (self.log.entries.len(), total)
    }
}

/// Page start and page-level load events as logged in the HAR
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarPageInfo {
    pub started: Option<String>,
    pub on_content_load: Option<f64>,
    pub on_load: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarLog {
    pub creator: Option<HarCreator>,
    #[serde(default)]
    pub pages: Vec<HarPage>,
    #[serde(default)]
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarCreator {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPage {
    pub started_date_time: Option<String>,
    pub page_timings: Option<HarPageTimings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPageTimings {
    pub on_content_load: Option<serde_json::Value>,
    pub on_load: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    pub started_date_time: String,
    pub request: HarRequest,
    pub response: HarResponse,
    pub timings: Option<HarTimings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub url: String,
    pub method: Option<String>,
    pub http_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: Option<f64>,
    /// `None` when the field is missing, `Some(None)` when logged as null
    #[serde(default, deserialize_with = "present")]
    pub body_size: Option<Option<f64>>,
    pub headers_size: Option<f64>,
    pub headers: Option<Vec<HarHeader>>,
    pub content: Option<HarContent>,
    #[serde(rename = "_transferSize")]
    pub transfer_size: Option<f64>,
}

impl HarResponse {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Whether any header name carries the HTTP/2 server push marker
    pub fn has_push_header(&self) -> bool {
        self.headers
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|h| h.name.to_ascii_lowercase().contains("http2-push"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarHeader {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    pub size: Option<f64>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarTimings {
    pub blocked: Option<f64>,
    pub dns: Option<f64>,
    pub connect: Option<f64>,
    pub ssl: Option<f64>,
    pub send: Option<f64>,
    pub wait: Option<f64>,
    pub receive: Option<f64>,
}
