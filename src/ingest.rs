use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::dataset;
use crate::db::Store;
use crate::error::{Error, Result};
use crate::normalize::{self, BenignPolicy, CanonicalRecord, RejectCounts, ResolvedColumns, SchemaHints};

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub hints: SchemaHints,
    pub policy: BenignPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounts {
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Insert canonical records, first-seen-wins. A failing record is logged and
/// counted; the rest of the batch still goes in. If the failure took the
/// whole transaction with it, the batch stops and nothing from it is kept.
pub fn ingest(store: &Store, records: &[CanonicalRecord]) -> Result<IngestCounts> {
    let tx = store.begin()?;
    let mut counts = IngestCounts::default();

    for record in records {
        match store.insert_if_absent(&record.url, Some(&record.label)) {
            Ok(true) => counts.inserted += 1,
            Ok(false) => counts.duplicates += 1,
            Err(e) if store.is_autocommit() => {
                warn!("insert for {} rolled back the batch: {}", record.url, e);
                return Err(e);
            }
            Err(e) => {
                warn!("insert failed for {}: {}", record.url, e);
                counts.failed += 1;
            }
        }
    }

    tx.commit()?;
    Ok(counts)
}

#[derive(Debug)]
pub struct DatasetReport {
    pub path: PathBuf,
    pub outcome: DatasetOutcome,
}

#[derive(Debug)]
pub enum DatasetOutcome {
    Ingested {
        columns: ResolvedColumns,
        rows: usize,
        malformed: usize,
        rejected: RejectCounts,
        counts: IngestCounts,
    },
    /// No url column; nothing from this file was stored.
    Skipped(Error),
    /// The file could not be read or its batch failed to commit.
    Failed(Error),
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub datasets: Vec<DatasetReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestTotals {
    pub datasets: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rows: usize,
    pub malformed: usize,
    pub rejected: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub insert_failures: usize,
}

impl IngestReport {
    /// At least one dataset was read and had a usable url column.
    pub fn any_resolved(&self) -> bool {
        self.datasets
            .iter()
            .any(|d| matches!(d.outcome, DatasetOutcome::Ingested { .. }))
    }

    pub fn totals(&self) -> IngestTotals {
        let mut t = IngestTotals {
            datasets: self.datasets.len(),
            ..Default::default()
        };
        for d in &self.datasets {
            match &d.outcome {
                DatasetOutcome::Ingested {
                    rows,
                    malformed,
                    rejected,
                    counts,
                    ..
                } => {
                    t.rows += rows;
                    t.malformed += malformed;
                    t.rejected += rejected.total();
                    t.inserted += counts.inserted;
                    t.duplicates += counts.duplicates;
                    t.insert_failures += counts.failed;
                }
                DatasetOutcome::Skipped(_) => t.skipped += 1,
                DatasetOutcome::Failed(_) => t.failed += 1,
            }
        }
        t
    }
}

/// Ingest datasets one file at a time, in the given order. Earlier files win
/// for urls that appear more than once.
pub fn ingest_datasets(store: &Store, paths: &[PathBuf], opts: &IngestOptions) -> IngestReport {
    let mut report = IngestReport::default();
    for path in paths {
        let _span = info_span!("dataset", path = %path.display()).entered();
        let outcome = ingest_dataset(store, path, opts);
        report.datasets.push(DatasetReport {
            path: path.clone(),
            outcome,
        });
    }
    report
}

fn ingest_dataset(store: &Store, path: &Path, opts: &IngestOptions) -> DatasetOutcome {
    info!("Loading dataset from {}", path.display());
    let table = match dataset::read_csv(path) {
        Ok(t) => t,
        Err(e) => {
            warn!("could not read {}: {}", path.display(), e);
            return DatasetOutcome::Failed(e);
        }
    };

    let normalized = match normalize::normalize(&table, &opts.hints, opts.policy) {
        Ok(n) => n,
        Err(e) => {
            warn!("skipping {}: {}", path.display(), e);
            return DatasetOutcome::Skipped(e.into());
        }
    };
    info!(
        "Using URL column: {}, Label column: {}",
        normalized.columns.url,
        normalized.columns.label.as_deref().unwrap_or("-")
    );

    let counts = match ingest(store, &normalized.records) {
        Ok(c) => c,
        Err(e) => {
            warn!("batch for {} failed: {}", path.display(), e);
            return DatasetOutcome::Failed(e);
        }
    };

    info!(
        "{} rows: {} accepted, {} rejected, {} malformed; {} inserted, {} duplicates, {} failed",
        table.rows.len(),
        normalized.records.len(),
        normalized.rejected.total(),
        table.malformed,
        counts.inserted,
        counts.duplicates,
        counts.failed,
    );

    DatasetOutcome::Ingested {
        columns: normalized.columns,
        rows: table.rows.len(),
        malformed: table.malformed,
        rejected: normalized.rejected,
        counts,
    }
}
