//! Structural file formats and the delimiter-detection heuristic.
//!
//! The authoritative format of a cached file is derived from its suffix,
//! which was set at download time from the catalog's declared format. A
//! mismatch between declared format and true byte content is not corrected
//! here; it surfaces later as a schema read error.

use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Supported structural formats for cached tabular resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabularFormat {
    Csv,
    Tsv,
    Xlsx,
    Json,
}

impl TabularFormat {
    pub const ALL: [TabularFormat; 4] =
        [TabularFormat::Csv, TabularFormat::Tsv, TabularFormat::Xlsx, TabularFormat::Json];

    /// Parse a catalog-declared format string. `xls` maps onto the
    /// spreadsheet reader as well since the workbook opener auto-detects.
    pub fn from_declared(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Some(TabularFormat::Csv),
            "tsv" => Some(TabularFormat::Tsv),
            "xlsx" | "xls" => Some(TabularFormat::Xlsx),
            "json" => Some(TabularFormat::Json),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TabularFormat::Csv => "csv",
            TabularFormat::Tsv => "tsv",
            TabularFormat::Xlsx => "xlsx",
            TabularFormat::Json => "json",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension().and_then(|e| e.to_str())?;
        TabularFormat::from_declared(ext)
    }

    /// True for separator-delimited text formats.
    pub fn is_delimited(&self) -> bool {
        matches!(self, TabularFormat::Csv | TabularFormat::Tsv)
    }
}

impl std::fmt::Display for TabularFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Determine the authoritative format of a cached file. The suffix wins;
/// the declared format is only a fallback for suffix-less paths.
pub fn sniff(local_path: &Path, declared: TabularFormat) -> TabularFormat {
    TabularFormat::from_path(local_path).unwrap_or(declared)
}

/// Candidate separators in priority order.
pub const SEPARATOR_CANDIDATES: [u8; 4] = [b',', b';', b'|', b'\t'];

/// Detect the column separator of a delimited text file from its first
/// non-empty line: the first candidate producing more than one column wins,
/// comma otherwise. Known limitation: a single-column semicolon file is
/// reported as comma-delimited.
pub fn detect_separator(path: &Path) -> std::io::Result<u8> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(b',');
        }
        if !line.trim().is_empty() {
            break;
        }
    }
    for sep in SEPARATOR_CANDIDATES {
        if field_count(&line, sep) > 1 {
            tracing::debug!(target: "tabq::format", "detect_separator: '{}' chosen for {}", sep as char, path.display());
            return Ok(sep);
        }
    }
    tracing::debug!(target: "tabq::format", "detect_separator: no candidate split {}, falling back to comma", path.display());
    Ok(b',')
}

/// Minimal structural read of a single row: count fields for the given
/// separator, honoring double-quoted sections so quoted separators do not
/// inflate the count.
fn field_count(line: &str, sep: u8) -> usize {
    let mut count = 1usize;
    let mut in_quotes = false;
    for b in line.bytes() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'\n' | b'\r' => {}
            _ if b == sep && !in_quotes => count += 1,
            _ => {}
        }
    }
    count
}
