//! Field codec for the flat CSV logs
//!
//! Unavailable values are written as the literal `NA` and read back as `None`,
//! never coerced to zero. Older logs also contain `None` (and `-1` for invalid
//! sizes); both are accepted as absent when reading.

use crate::error::TimingsError;
use csv::StringRecord;
use std::fmt::Display;

/// Literal written for every unavailable value
pub const NA: &str = "NA";

/// Format an optional value, `NA` when absent
pub fn na<T: Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => NA.to_string(),
    }
}

/// Strip commas so a value can never split a row
pub fn sanitize(value: &str) -> String {
    value.replace(',', "")
}

fn is_absent(raw: &str) -> bool {
    matches!(raw, "" | "NA" | "None" | "null" | "undefined")
}

/// Positional accessor over one CSV row
pub struct Row<'a> {
    record: &'a StringRecord,
    line: u64,
}

impl<'a> Row<'a> {
    pub fn new(record: &'a StringRecord) -> Self {
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        Self { record, line }
    }

    pub fn len(&self) -> usize {
        self.record.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }

    /// Raw trimmed value of a column that must exist
    pub fn raw(&self, index: usize, name: &str) -> Result<&'a str, TimingsError> {
        self.record.get(index).map(str::trim).ok_or_else(|| {
            TimingsError::MalformedRecord(format!("line {}: missing column {name}", self.line))
        })
    }

    pub fn string(&self, index: usize, name: &str) -> Result<String, TimingsError> {
        self.raw(index, name).map(str::to_string)
    }

    pub fn opt_string(&self, index: usize, name: &str) -> Result<Option<String>, TimingsError> {
        let raw = self.raw(index, name)?;
        Ok((!is_absent(raw)).then(|| raw.to_string()))
    }

    pub fn opt_f64(&self, index: usize, name: &str) -> Result<Option<f64>, TimingsError> {
        let raw = self.raw(index, name)?;
        if is_absent(raw) {
            return Ok(None);
        }
        raw.parse::<f64>().map(Some).map_err(|_| {
            TimingsError::MalformedRecord(format!(
                "line {}: {name} is not a number: {raw}",
                self.line
            ))
        })
    }

    pub fn f64(&self, index: usize, name: &str) -> Result<f64, TimingsError> {
        self.opt_f64(index, name)?.ok_or_else(|| {
            TimingsError::MalformedRecord(format!("line {}: {name} is not available", self.line))
        })
    }

    pub fn i32(&self, index: usize, name: &str) -> Result<i32, TimingsError> {
        let raw = self.raw(index, name)?;
        raw.parse::<i32>().map_err(|_| {
            TimingsError::MalformedRecord(format!(
                "line {}: {name} is not an integer: {raw}",
                self.line
            ))
        })
    }

    /// Byte count; negative values mark an invalid measurement
    pub fn size(&self, index: usize, name: &str) -> Result<Option<i64>, TimingsError> {
        Ok(self
            .opt_f64(index, name)?
            .filter(|v| *v >= 0.0)
            .map(|v| v as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_na_round_trip() {
        let absent: Option<i64> = None;
        let written = na(&absent);
        assert_eq!(written, "NA");

        let record = StringRecord::from(vec![written.as_str(), "12", "-1", "None"]);
        let row = Row::new(&record);
        assert_eq!(row.size(0, "a").unwrap(), None);
        assert_eq!(row.size(1, "b").unwrap(), Some(12));
        assert_eq!(row.size(2, "c").unwrap(), None);
        assert_eq!(row.opt_f64(3, "d").unwrap(), None);
        assert_eq!(row.opt_string(0, "a").unwrap(), None);
    }

    #[test]
    fn test_zero_is_not_absent() {
        let record = StringRecord::from(vec!["0", "0.0"]);
        let row = Row::new(&record);
        assert_eq!(row.size(0, "a").unwrap(), Some(0));
        assert_eq!(row.opt_f64(1, "b").unwrap(), Some(0.0));
    }

    #[test]
    fn test_missing_column_is_malformed() {
        let record = StringRecord::from(vec!["only"]);
        let row = Row::new(&record);
        assert!(matches!(
            row.raw(3, "status"),
            Err(TimingsError::MalformedRecord(_))
        ));
        assert!(row.f64(0, "only").is_err());
    }

    #[test]
    fn test_sanitize_strips_commas() {
        assert_eq!(sanitize("http://a.com/x?a=1,2"), "http://a.com/x?a=12");
    }
}
