use std::fmt;

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};

/// Delimiter between report fields. Fields are written verbatim, without quoting.
pub const DELIMITER: &str = ",";

/// Report columns preceding the two endpoint version columns.
pub const HEADER_COLUMNS: [&str; 6] = [
    "calc_timestamp",
    "original_date",
    "company",
    "invoice",
    "nr_lines",
    "state",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Fields that identify a recorded invoice. They are carried into the report unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixMetadata {
    /// When the record was read for this run.
    pub captured_at: NaiveDateTime,
    /// Transaction date of the original invoice.
    pub original_date: NaiveDate,
    pub company: String,
    pub invoice: String,
}

/// A recorded invoice request to be replayed against both endpoints.
#[derive(Debug, Clone)]
pub struct InputRecord {
    /// The gzip compressed request document.
    pub document: Bytes,
    pub prefix: PrefixMetadata,
}

/// The outcome of replaying one record against both endpoints.
///
/// Jurisdictions are only read from endpoint A.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonRow {
    pub prefix: PrefixMetadata,
    pub line_count: usize,
    pub jurisdictions: String,
    pub total_tax_a: Option<String>,
    pub total_tax_b: Option<String>,
}

impl ComparisonRow {
    /// The row's fields in report column order.
    pub fn fields(&self) -> [String; 8] {
        [
            self.prefix.captured_at.format(TIMESTAMP_FORMAT).to_string(),
            self.prefix.original_date.format(DATE_FORMAT).to_string(),
            self.prefix.company.clone(),
            self.prefix.invoice.clone(),
            self.line_count.to_string(),
            self.jurisdictions.clone(),
            self.total_tax_a.clone().unwrap_or_default(),
            self.total_tax_b.clone().unwrap_or_default(),
        ]
    }

    /// Serialize as a single report line, including the line break.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for ComparisonRow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.fields().join(DELIMITER))
    }
}

/// Produce the report header line, naming the version of each endpoint.
pub fn header_line(version_a: &str, version_b: &str) -> String {
    let columns: Vec<&str> = HEADER_COLUMNS
        .iter()
        .copied()
        .chain([version_a, version_b])
        .collect();

    format!("{}\n", columns.join(DELIMITER))
}
