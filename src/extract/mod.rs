//! Release extraction: load the dictionary archive, pick one release table,
//! make sure it is fully realized, flatten it and write it as CSV.

pub mod capabilities;
pub mod flatten;
pub mod format;
pub mod frame;
pub mod lookup;
pub mod strategy;
pub mod table;
pub mod write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing::{info, warn};

use crate::rdata::{load_archive, ArchiveError, LoadOptions};

pub use capabilities::Capabilities;
pub use flatten::{flatten, FlattenOptions, LIST_DELIMITER, NULL_MARKER};
pub use frame::{Column, Frame};
pub use strategy::{materialize, Attempt, Context, MaterializeReport, Outcome, StrategyError};
pub use table::Table;
pub use write::{verify_output, write_frame, Verification, WriteSummary};

pub const DEFAULT_DATASET: &str = "hbcd";
pub const DEFAULT_ID_COLUMN: &str = "name";

/// Column names that only carry a row index and are never written.
pub const ROW_INDEX_COLUMNS: &[&str] = &["", "...1", "row.names"];

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("usage: {0}")]
    Usage(String),
    #[error("dataset {dataset:?} not found in archive; available: {}", .available.join(", "))]
    DatasetNotFound {
        dataset: String,
        available: Vec<String>,
    },
    #[error(
        "release {version:?} of {dataset:?} not found (tried {}); available: {}",
        .tried.join(", "),
        .available.join(", ")
    )]
    ReleaseNotFound {
        dataset: String,
        version: String,
        tried: Vec<String>,
        available: Vec<String>,
    },
    #[error(
        "table declares {declared_rows} rows but none could be materialized ({}); the archive \
         was likely written by an incompatible serialization version, re-save it with a \
         compatible R version (e.g. save(..., version = 2))",
        summarize(.attempts)
    )]
    Materialization {
        declared_rows: usize,
        attempts: Vec<Attempt>,
    },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("malformed table: {0}")]
    MalformedTable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ExtractError {
    /// Every extraction failure is fatal for the calling process.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

fn summarize(attempts: &[Attempt]) -> String {
    attempts
        .iter()
        .map(|a| match &a.outcome {
            Outcome::Materialized { realized } => format!("{}: realized {realized}", a.strategy),
            Outcome::Mismatch { realized } => format!("{}: {realized} rows", a.strategy),
            Outcome::Failed { cause } => format!("{}: {cause}", a.strategy),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub dataset: String,
    /// Workspace object holding the dataset mapping; the first one when unset.
    pub object: Option<String>,
    pub capabilities: Capabilities,
    /// Capability list replacing `capabilities`, as read from
    /// `HBCD_CAPABILITIES` by the binaries.
    pub capabilities_override: Option<String>,
    pub chunk_rows: usize,
    pub flatten: FlattenOptions,
    /// Column sampled by the verification pass.
    pub id_column: String,
    pub scratch_dir: Option<PathBuf>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            object: None,
            capabilities: Capabilities::default(),
            capabilities_override: None,
            chunk_rows: strategy::DEFAULT_CHUNK_ROWS,
            flatten: FlattenOptions::default(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            scratch_dir: None,
        }
    }
}

/// Outcome of one extraction run, serializable as a JSON report.
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    pub archive: PathBuf,
    pub dataset: String,
    pub version: String,
    pub release_key: String,
    pub column_names: Vec<String>,
    pub excluded_columns: Vec<String>,
    pub materialize: MaterializeReport,
    pub output: WriteSummary,
    pub verification: Option<Verification>,
    pub extracted_at: DateTime<Utc>,
}

fn log_memory(stage: &str) {
    let mut sys = System::new();
    sys.refresh_memory();
    info!(
        stage,
        available_mb = sys.available_memory() / 1_048_576,
        total_mb = sys.total_memory() / 1_048_576,
        "memory"
    );
}

/// Remove row-index columns from a frame, returning their names.
fn drop_row_index(frame: &mut Frame) -> Vec<String> {
    let mut dropped = Vec::new();
    let mut i = 0;
    while i < frame.headers.len() {
        if ROW_INDEX_COLUMNS.contains(&frame.headers[i].as_str()) {
            dropped.push(frame.headers.remove(i));
            frame.columns.remove(i);
        } else {
            i += 1;
        }
    }
    dropped
}

/// Extract release `version` of the configured dataset from `archive` and
/// write it to `output` as CSV.
#[tracing::instrument(
    level = "info",
    skip(archive, output, opts),
    fields(archive = %archive.display(), dataset = %opts.dataset)
)]
pub fn extract_release(
    archive: &Path,
    version: &str,
    output: &Path,
    opts: &ExtractOptions,
) -> Result<Extraction, ExtractError> {
    if version.trim().is_empty() {
        return Err(ExtractError::Usage("release version must not be empty".into()));
    }

    // 1) Capabilities are fixed before the archive is read
    let caps = Capabilities::detect_with(opts.capabilities_override.as_deref(), opts.capabilities);
    let loaded = load_archive(
        archive,
        LoadOptions {
            expand_altrep: caps.altrep,
        },
    )?;
    log_memory("archive loaded");

    // 2) Dataset, then release
    let root = loaded.root(opts.object.as_deref())?;
    let releases = lookup::dataset(root, &opts.dataset)?;
    let (release_key, object) = lookup::release(releases, &opts.dataset, version)?;
    info!(release_key = %release_key, "resolved release");

    // 3) Declared shape, before any conversion
    let table = Table::from_object(object.clone())
        .map_err(|e| ExtractError::MalformedTable(e.to_string()))?;
    info!(
        rows = table.declared_rows,
        cols = table.declared_cols(),
        columns = ?table.names,
        "declared table shape"
    );

    // 4) Materialize
    let ctx = Context {
        capabilities: caps,
        chunk_rows: opts.chunk_rows,
        scratch_dir: opts.scratch_dir.clone(),
    };
    let (mut frame, report) = materialize(&table, &ctx)?;
    if report.used_fallback() {
        info!(strategy = %report.strategy, "table materialized by fallback");
    }

    // 5) Flatten and write
    let excluded_columns = drop_row_index(&mut frame);
    let frame = flatten(frame, &opts.flatten);
    let summary = write_frame(&frame, output, &opts.flatten.null_marker)?;

    // 6) Verify; diagnostic only
    let expected = table
        .names
        .iter()
        .filter(|n| !ROW_INDEX_COLUMNS.contains(&n.as_str()))
        .count();
    let verification =
        match verify_output(output, expected, &opts.id_column, &opts.flatten.null_marker) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "verification pass failed");
                None
            }
        };

    Ok(Extraction {
        archive: archive.to_path_buf(),
        dataset: opts.dataset.clone(),
        version: version.to_string(),
        release_key,
        column_names: frame.headers,
        excluded_columns,
        materialize: report,
        output: summary,
        verification,
        extracted_at: Utc::now(),
    })
}

/// Release keys of `dataset`, as stored.
pub fn list_releases(archive: &Path, opts: &ExtractOptions) -> Result<Vec<String>, ExtractError> {
    let loaded = load_archive(archive, LoadOptions::default())?;
    let root = loaded.root(opts.object.as_deref())?;
    Ok(lookup::release_keys(lookup::dataset(root, &opts.dataset)?))
}

/// Highest numbered release of `dataset` in the archive.
pub fn latest_release(archive: &Path, opts: &ExtractOptions) -> Result<Option<String>, ExtractError> {
    let keys = list_releases(archive, opts)?;
    Ok(lookup::latest_release(&keys, &opts.dataset))
}
