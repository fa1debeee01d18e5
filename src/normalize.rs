use thiserror::Error;

use crate::dataset::RawTable;
use crate::error::SchemaError;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Known url column names, highest priority first.
pub const URL_ALIASES: &[&str] = &[
    "domain",
    "URLs",
    "url",
    "urls",
    "URL",
    "Website",
    "Link",
    "홈페이지주소",
];

pub const LABEL_ALIASES: &[&str] = &["label", "Label", "classification", "Category"];

/// Label given to every row of a dataset without a label column.
pub const UNKNOWN_LABEL: &str = "unknown";

const BENIGN_LABELS: &[&str] = &["benign"];

#[derive(Debug, Clone)]
pub struct SchemaHints {
    pub url_aliases: Vec<String>,
    pub label_aliases: Vec<String>,
}

impl Default for SchemaHints {
    fn default() -> Self {
        Self {
            url_aliases: URL_ALIASES.iter().map(|s| s.to_string()).collect(),
            label_aliases: LABEL_ALIASES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Whether rows labeled benign are kept. Some datasets are meant to be
/// phishing-only, so this is chosen per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BenignPolicy {
    #[default]
    Keep,
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRecord {
    pub url: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("empty url")]
    EmptyUrl,
    #[error("empty label")]
    EmptyLabel,
    #[error("benign label excluded")]
    ExcludedBenign,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectCounts {
    pub empty_url: usize,
    pub empty_label: usize,
    pub excluded_benign: usize,
}

impl RejectCounts {
    fn add(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::EmptyUrl => self.empty_url += 1,
            RejectReason::EmptyLabel => self.empty_label += 1,
            RejectReason::ExcludedBenign => self.excluded_benign += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.empty_url + self.empty_label + self.excluded_benign
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumns {
    pub url: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Normalized {
    pub columns: ResolvedColumns,
    pub records: Vec<CanonicalRecord>,
    pub rejected: RejectCounts,
}

/// Pick the first alias present among `columns` for url and label.
pub fn resolve_columns(
    columns: &[String],
    hints: &SchemaHints,
) -> Result<ResolvedColumns, SchemaError> {
    let find = |aliases: &[String]| {
        aliases
            .iter()
            .find(|alias| columns.iter().any(|c| c == *alias))
            .cloned()
    };

    let url = find(&hints.url_aliases).ok_or_else(|| SchemaError {
        columns: columns.to_vec(),
    })?;
    let label = find(&hints.label_aliases);
    Ok(ResolvedColumns { url, label })
}

/// Map a raw table onto canonical records, in input order. Rejected rows are
/// counted, never fatal; only a missing url column fails the dataset.
pub fn normalize(
    table: &RawTable,
    hints: &SchemaHints,
    policy: BenignPolicy,
) -> Result<Normalized, SchemaError> {
    let columns = resolve_columns(&table.columns, hints)?;
    let url_idx = table
        .column_index(&columns.url)
        .ok_or_else(|| SchemaError {
            columns: table.columns.clone(),
        })?;
    let label_idx = columns
        .label
        .as_deref()
        .and_then(|name| table.column_index(name));

    let outcomes = validate_rows(&table.rows, url_idx, label_idx, policy);

    let mut records = Vec::with_capacity(outcomes.len());
    let mut rejected = RejectCounts::default();
    for outcome in outcomes {
        match outcome {
            Ok(record) => records.push(record),
            Err(reason) => rejected.add(reason),
        }
    }

    Ok(Normalized {
        columns,
        records,
        rejected,
    })
}

fn check_row(
    row: &[String],
    url_idx: usize,
    label_idx: Option<usize>,
    policy: BenignPolicy,
) -> Result<CanonicalRecord, RejectReason> {
    let url = row.get(url_idx).map(String::as_str);
    let label = match label_idx {
        Some(i) => row.get(i).map(String::as_str),
        None => Some(UNKNOWN_LABEL),
    };
    validate_row(url, label, policy)
}

#[cfg(feature = "rayon")]
fn validate_rows(
    rows: &[Vec<String>],
    url_idx: usize,
    label_idx: Option<usize>,
    policy: BenignPolicy,
) -> Vec<Result<CanonicalRecord, RejectReason>> {
    rows.par_iter()
        .map(|row| check_row(row, url_idx, label_idx, policy))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn validate_rows(
    rows: &[Vec<String>],
    url_idx: usize,
    label_idx: Option<usize>,
    policy: BenignPolicy,
) -> Vec<Result<CanonicalRecord, RejectReason>> {
    rows.iter()
        .map(|row| check_row(row, url_idx, label_idx, policy))
        .collect()
}

/// Validate one row. Checks run in order and the first failure wins.
pub fn validate_row(
    url: Option<&str>,
    label: Option<&str>,
    policy: BenignPolicy,
) -> Result<CanonicalRecord, RejectReason> {
    let url = url.map(str::trim).unwrap_or_default();
    let label = label.map(str::trim).unwrap_or_default();
    if url.is_empty() {
        return Err(RejectReason::EmptyUrl);
    }
    if label.is_empty() {
        return Err(RejectReason::EmptyLabel);
    }

    if policy == BenignPolicy::Exclude && is_benign(label) {
        return Err(RejectReason::ExcludedBenign);
    }

    Ok(CanonicalRecord {
        url: with_scheme(url),
        label: label.to_string(),
    })
}

fn is_benign(label: &str) -> bool {
    BENIGN_LABELS.iter().any(|b| label.eq_ignore_ascii_case(b))
}

/// Prefix `http://` unless the url already carries an http(s) scheme.
pub fn with_scheme(url: &str) -> String {
    let lower = url
        .get(..8)
        .unwrap_or(url)
        .to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}
