use csv::{ReaderBuilder, WriterBuilder};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use super::frame::{Column, Frame};
use super::ExtractError;

/// Rows read back by the verification pass.
pub const VERIFY_ROWS: usize = 10;
const SAMPLE_VALUES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub columns: usize,
}

/// Write a flattened frame as CSV with a header row.
///
/// The file is written next to `path` under a temporary name and renamed into
/// place, so an error leaves no partial output behind.
pub fn write_frame(frame: &Frame, path: &Path, null_marker: &str) -> Result<WriteSummary, ExtractError> {
    // 1) Make sure the parent exists
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(d) => {
            fs::create_dir_all(d)?;
            d.to_path_buf()
        }
        None => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ExtractError::Usage(format!("{} is not a file path", path.display())))?;
    let tmp_path = dir.join(format!(".{file_name}.tmp"));

    // 2) Write every row to the temporary sibling
    let rows = frame.row_count();
    let result = (|| -> Result<(), ExtractError> {
        let mut wtr = WriterBuilder::new().from_path(&tmp_path)?;
        wtr.write_record(&frame.headers)?;
        let mut record: Vec<&str> = Vec::with_capacity(frame.columns.len());
        for row in 0..rows {
            record.clear();
            for (name, col) in frame.headers.iter().zip(&frame.columns) {
                match col {
                    Column::Scalar(cells) => {
                        record.push(cells.get(row).and_then(|c| c.as_deref()).unwrap_or(null_marker))
                    }
                    Column::Nested(_) => {
                        return Err(ExtractError::MalformedTable(format!(
                            "column {name} was not flattened"
                        )))
                    }
                }
            }
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    // 3) Rename over the destination
    fs::rename(&tmp_path, path)?;
    info!(path = %path.display(), rows, columns = frame.columns.len(), "wrote table");
    Ok(WriteSummary {
        path: path.to_path_buf(),
        rows,
        columns: frame.columns.len(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    pub columns: usize,
    pub expected_columns: usize,
    pub rows_read: usize,
    pub sample: Vec<String>,
    pub ok: bool,
}

/// Re-open the written file, read a few rows and compare the header width to
/// the expected column count. `id_column` values are logged as a sample.
pub fn verify_output(
    path: &Path,
    expected_columns: usize,
    id_column: &str,
    null_marker: &str,
) -> Result<Verification, ExtractError> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = rdr.headers()?.clone();
    let id_idx = headers.iter().position(|h| h == id_column);
    if id_idx.is_none() {
        warn!(column = id_column, "identifier column not in output");
    }

    let mut rows_read = 0;
    let mut sample = Vec::new();
    for record in rdr.records().take(VERIFY_ROWS) {
        let record = record?;
        rows_read += 1;
        if let Some(v) = id_idx.and_then(|i| record.get(i)) {
            if v != null_marker && sample.len() < SAMPLE_VALUES {
                sample.push(v.to_string());
            }
        }
    }

    let ok = headers.len() == expected_columns;
    if ok {
        info!(columns = headers.len(), rows_read, ?sample, "verified output");
    } else {
        warn!(
            columns = headers.len(),
            expected = expected_columns,
            "output column count differs from declared"
        );
    }
    debug!(headers = ?headers.iter().collect::<Vec<_>>(), "output headers");
    Ok(Verification {
        columns: headers.len(),
        expected_columns,
        rows_read,
        sample,
        ok,
    })
}
