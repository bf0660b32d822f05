//! Materialization of tables whose columns were loaded lazily.
//!
//! The fallback chain is an ordered list of strategies. Each one is a plain
//! function from the loaded table to a realized [`Frame`]; the chain stops at
//! the first result whose first column holds the declared number of rows.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::capabilities::Capabilities;
use super::format::{nested_cell, ColumnFormat};
use super::frame::{column_from_object, Column, Frame};
use super::table::Table;
use super::ExtractError;
use crate::rdata::altrep;
use crate::rdata::types::NA_LOGICAL;
use crate::rdata::{
    load_archive, save_stream, ArchiveError, Compression, Element, FormatVersion, LoadOptions,
    RObject, RValue,
};

pub const DEFAULT_CHUNK_ROWS: usize = 10_000;

const SCRATCH_COLUMN: &str = ".materialize_scratch";

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("requires the {0} capability")]
    Unavailable(&'static str),
    #[error("column {column}: {reason}")]
    Column { column: String, reason: String },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("first column realized {realized} of {declared} rows")]
    LengthMismatch { realized: usize, declared: usize },
    #[error("print output could not be parsed: {0}")]
    Unparseable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a strategy may use besides the table itself.
#[derive(Debug, Clone)]
pub struct Context {
    pub capabilities: Capabilities,
    pub chunk_rows: usize,
    /// Directory for round-trip files; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::default(),
            chunk_rows: DEFAULT_CHUNK_ROWS,
            scratch_dir: None,
        }
    }
}

pub type StrategyFn = fn(&Table, &Context) -> Result<Frame, StrategyError>;

#[derive(Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub run: StrategyFn,
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Strategies in priority order. `collect` is only present when the
/// capability was detected.
pub fn fallback_chain(capabilities: Capabilities) -> Vec<Strategy> {
    let mut chain = vec![Strategy {
        name: "direct",
        run: direct,
    }];
    if capabilities.collect {
        chain.push(Strategy {
            name: "collect",
            run: collect,
        });
    }
    chain.extend([
        Strategy {
            name: "round_trip",
            run: round_trip,
        },
        Strategy {
            name: "copy_on_modify",
            run: copy_on_modify,
        },
        Strategy {
            name: "raw_elements",
            run: raw_elements,
        },
        Strategy {
            name: "chunked",
            run: chunked,
        },
        Strategy {
            name: "unclass",
            run: unclass,
        },
        Strategy {
            name: "formatted",
            run: formatted,
        },
        Strategy {
            name: "print_capture",
            run: print_capture,
        },
    ]);
    chain
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Materialized { realized: usize },
    Mismatch { realized: usize },
    Failed { cause: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attempt {
    pub strategy: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterializeReport {
    pub declared_rows: usize,
    pub declared_cols: usize,
    /// First-column length as loaded.
    pub realized_rows: Option<usize>,
    /// Name of the strategy that produced the frame; `standard` when the
    /// table was already materialized.
    pub strategy: String,
    pub attempts: Vec<Attempt>,
}

impl MaterializeReport {
    pub fn used_fallback(&self) -> bool {
        self.strategy != "standard"
    }
}

/// Produce a fully realized frame for `table`, running the fallback chain
/// when the first column does not hold the declared rows.
pub fn materialize(table: &Table, ctx: &Context) -> Result<(Frame, MaterializeReport), ExtractError> {
    let declared = table.declared_rows;
    let mut report = MaterializeReport {
        declared_rows: declared,
        declared_cols: table.declared_cols(),
        realized_rows: table.first_realized_len(),
        strategy: String::new(),
        attempts: Vec::new(),
    };

    let mut skip_direct = false;
    if table.is_materialized() {
        match Frame::from_table(table).and_then(|f| f.check_rectangular(declared).map(|_| f)) {
            Ok(frame) => {
                report.strategy = "standard".into();
                return Ok((frame, report));
            }
            Err(e) => {
                warn!(cause = %e, "standard conversion failed; trying fallbacks");
                report.attempts.push(Attempt {
                    strategy: "standard".into(),
                    outcome: Outcome::Failed {
                        cause: e.to_string(),
                    },
                });
                skip_direct = true;
            }
        }
    } else {
        warn!(
            declared_rows = declared,
            realized = report.realized_rows.unwrap_or(0),
            lazy_columns = ?table.lazy_columns(),
            "table is not materialized"
        );
    }

    for strategy in fallback_chain(ctx.capabilities) {
        if skip_direct && strategy.name == "direct" {
            continue;
        }
        let result = (strategy.run)(table, ctx).and_then(|frame| {
            frame.check_rectangular(declared)?;
            Ok(frame)
        });
        match result {
            Ok(frame) => {
                let realized = frame.first_len();
                info!(strategy = strategy.name, realized, "strategy materialized table");
                report.attempts.push(Attempt {
                    strategy: strategy.name.into(),
                    outcome: Outcome::Materialized { realized },
                });
                report.strategy = strategy.name.into();
                return Ok((frame, report));
            }
            Err(StrategyError::LengthMismatch { realized, .. }) => {
                warn!(strategy = strategy.name, realized, declared, "strategy left table short");
                report.attempts.push(Attempt {
                    strategy: strategy.name.into(),
                    outcome: Outcome::Mismatch { realized },
                });
            }
            Err(e) => {
                warn!(strategy = strategy.name, cause = %e, "strategy failed");
                report.attempts.push(Attempt {
                    strategy: strategy.name.into(),
                    outcome: Outcome::Failed {
                        cause: e.to_string(),
                    },
                });
            }
        }
    }

    Err(ExtractError::Materialization {
        declared_rows: declared,
        attempts: report.attempts,
    })
}

fn column_error(column: &str, reason: impl ToString) -> StrategyError {
    StrategyError::Column {
        column: column.to_string(),
        reason: reason.to_string(),
    }
}

/// Replace the value of a lazy column, keeping its attributes.
fn with_value(col: &RObject, value: RValue) -> RObject {
    RObject {
        value,
        attributes: col.attributes.clone(),
    }
}

/// Lazy columns must not claim more elements than the table declares; a
/// corrupt length would otherwise be allocated in full.
fn check_lazy_lengths(table: &Table) -> Result<(), StrategyError> {
    for (name, col) in table.names.iter().zip(table.columns()) {
        if let RValue::Altrep(node) = &col.value {
            let n = altrep::base_length(node)?;
            if n > table.declared_rows {
                return Err(column_error(
                    name,
                    format!("{} claims {n} elements, table declares {}", node.class, table.declared_rows),
                ));
            }
        }
    }
    Ok(())
}

fn direct(table: &Table, _ctx: &Context) -> Result<Frame, StrategyError> {
    Frame::from_table(table)
}

fn collect(table: &Table, ctx: &Context) -> Result<Frame, StrategyError> {
    if !ctx.capabilities.collect {
        return Err(StrategyError::Unavailable("collect"));
    }
    check_lazy_lengths(table)?;
    let forced = table.map_columns(|_, col| match &col.value {
        RValue::Altrep(node) => Ok::<_, StrategyError>(with_value(col, altrep::expand(node)?)),
        _ => Ok(col.clone()),
    })?;
    Frame::from_table(&forced)
}

/// Version 2 streams cannot carry lazy vectors, so writing one expands them.
fn round_trip(table: &Table, ctx: &Context) -> Result<Frame, StrategyError> {
    check_lazy_lengths(table)?;
    let tmp = match &ctx.scratch_dir {
        Some(dir) => NamedTempFile::new_in(dir)?,
        None => NamedTempFile::new()?,
    };
    save_stream(tmp.path(), &table.object, FormatVersion::V2, Compression::None)?;
    let archive = load_archive(
        tmp.path(),
        LoadOptions {
            expand_altrep: ctx.capabilities.altrep,
        },
    )?;
    let reloaded = Table::from_object(archive.root(None)?.clone())?;
    Frame::from_table(&reloaded)
}

fn duplicate_column(col: &RObject) -> RObject {
    match &col.value {
        RValue::Altrep(node) => match altrep::duplicate(node) {
            Some(value) => with_value(col, value),
            None => col.clone(),
        },
        _ => col.clone(),
    }
}

fn copy_on_modify(table: &Table, _ctx: &Context) -> Result<Frame, StrategyError> {
    check_lazy_lengths(table)?;
    // sized like the realized data, not the declared row count
    let scratch_rows = table.first_realized_len().unwrap_or(0);
    let mut modified = table.clone();
    modified.push_column(
        SCRATCH_COLUMN,
        RObject::new(RValue::Logical(vec![NA_LOGICAL; scratch_rows])),
    );
    let mut copied = modified.map_columns(|_, col| Ok::<_, StrategyError>(duplicate_column(col)))?;
    copied.remove_column(SCRATCH_COLUMN);
    Frame::from_table(&copied)
}

fn element(name: &str, col: &RObject, i: usize) -> Result<Element, StrategyError> {
    match &col.value {
        RValue::Altrep(node) => Ok(altrep::element_at(node, i)?),
        _ => col
            .element(i)
            .ok_or_else(|| column_error(name, format!("element {i} is not addressable"))),
    }
}

fn rebuild(name: &str, col: &RObject, elements: Vec<Element>) -> Result<RObject, StrategyError> {
    let kind = col
        .vector_kind()
        .ok_or_else(|| column_error(name, "column is not a vector"))?;
    let value = RValue::from_elements(kind, elements)
        .ok_or_else(|| column_error(name, "elements do not match the column type"))?;
    Ok(with_value(col, value))
}

fn raw_elements(table: &Table, _ctx: &Context) -> Result<Frame, StrategyError> {
    let n = table.declared_rows;
    let rebuilt = table.map_columns(|name, col| {
        let elements = (0..n)
            .map(|i| element(name, col, i))
            .collect::<Result<Vec<_>, _>>()?;
        rebuild(name, col, elements)
    })?;
    Frame::from_table(&rebuilt)
}

/// Elements `start..end` of a column, extracted as one window.
fn window(name: &str, col: &RObject, start: usize, end: usize) -> Result<Vec<Element>, StrategyError> {
    match &col.value {
        RValue::Altrep(node) => {
            let part = RObject::new(altrep::extract_range(node, start, end)?);
            Ok((0..part.len()).filter_map(|i| part.element(i)).collect())
        }
        _ => (start..end.min(col.len()))
            .map(|i| element(name, col, i))
            .collect(),
    }
}

fn chunked(table: &Table, ctx: &Context) -> Result<Frame, StrategyError> {
    let n = table.declared_rows;
    let step = ctx.chunk_rows.max(1);
    let rebuilt = table.map_columns(|name, col| {
        let mut elements = Vec::with_capacity(n.min(step));
        let mut start = 0;
        while start < n {
            let end = (start + step).min(n);
            elements.extend(window(name, col, start, end)?);
            start = end;
        }
        rebuild(name, col, elements)
    })?;
    Frame::from_table(&rebuilt)
}

fn unclass(table: &Table, _ctx: &Context) -> Result<Frame, StrategyError> {
    let mut plain = table.clone();
    plain.object.remove_attr("class");
    let rebuilt = plain.map_columns(|name, col| {
        let mut value = col.value.clone();
        while let RValue::Altrep(node) = &value {
            value = altrep::payload(node)
                .ok_or_else(|| column_error(name, format!("{} has no primitive payload", node.class)))?
                .value;
        }
        Ok::<_, StrategyError>(with_value(col, value))
    })?;
    Frame::from_table(&rebuilt)
}

fn is_list_column(col: &RObject) -> bool {
    col.vector_kind() == Some(crate::rdata::VectorKind::List)
}

/// Cells of one column through per-element formatting.
fn formatted_column(name: &str, col: &RObject, n: usize) -> Result<Column, StrategyError> {
    if is_list_column(col) {
        let cells = (0..n)
            .map(|i| match element(name, col, i)? {
                Element::Object(item) => nested_cell(&item).map_err(|e| column_error(name, e)),
                _ => Err(column_error(name, "list element is not an object")),
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Column::Nested(cells));
    }
    let fmt = ColumnFormat::of(col);
    (0..n)
        .map(|i| {
            let e = element(name, col, i)?;
            fmt.cell(&e).map_err(|e| column_error(name, e))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Column::Scalar)
}

fn formatted(table: &Table, _ctx: &Context) -> Result<Frame, StrategyError> {
    let n = table.declared_rows;
    let columns = table
        .names
        .iter()
        .zip(table.columns())
        .map(|(name, col)| formatted_column(name, col, n))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Frame {
        headers: table.names.clone(),
        columns,
    })
}

/// Text cells as a console print would show them: `NA` for missing values,
/// list cells as comma-separated values.
fn print_cells(column: &Column) -> Vec<String> {
    let na = || "NA".to_string();
    match column {
        Column::Scalar(cells) => cells.iter().map(|c| c.clone().unwrap_or_else(na)).collect(),
        Column::Nested(cells) => cells
            .iter()
            .map(|c| match c {
                None => "NULL".to_string(),
                Some(values) => values
                    .iter()
                    .map(|v| v.clone().unwrap_or_else(na))
                    .collect::<Vec<_>>()
                    .join(", "),
            })
            .collect(),
    }
}

fn render_print(headers: &[String], columns: &[Column]) -> String {
    let cells: Vec<Vec<String>> = columns.iter().map(print_cells).collect();
    let rows = cells.first().map(Vec::len).unwrap_or(0);
    let index_width = rows.to_string().len();
    let widths: Vec<usize> = headers
        .iter()
        .zip(&cells)
        .map(|(h, c)| c.iter().map(String::len).chain([h.len()]).max().unwrap_or(0))
        .collect();

    let mut out = String::new();
    let _ = write!(out, "{:index_width$}", "");
    for (h, w) in headers.iter().zip(widths.iter().copied()) {
        let _ = write!(out, " {h:>w$}");
    }
    out.push('\n');
    for row in 0..rows {
        let _ = write!(out, "{:>index_width$}", row + 1);
        for (col, w) in cells.iter().zip(widths.iter().copied()) {
            let cell = col.get(row).map(String::as_str).unwrap_or("");
            let _ = write!(out, " {cell:>w$}");
        }
        out.push('\n');
    }
    out
}

fn parse_print(text: &str, n_cols: usize) -> Result<Frame, StrategyError> {
    let mut lines = text.lines();
    let headers: Vec<String> = lines
        .next()
        .unwrap_or("")
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if headers.len() != n_cols {
        return Err(StrategyError::Unparseable(format!(
            "header has {} fields, expected {}",
            headers.len(),
            n_cols
        )));
    }
    let mut columns = vec![Vec::new(); n_cols];
    for (lineno, line) in lines.enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != n_cols + 1 {
            return Err(StrategyError::Unparseable(format!(
                "row {} has {} fields, expected {}",
                lineno + 1,
                fields.len().saturating_sub(1),
                n_cols
            )));
        }
        for (col, field) in columns.iter_mut().zip(&fields[1..]) {
            col.push((*field != "NA").then(|| field.to_string()));
        }
    }
    Ok(Frame {
        headers,
        columns: columns.into_iter().map(Column::Scalar).collect(),
    })
}

/// Print the table as text, with lazy columns expanded by the display
/// routine, and read the text back. Cells containing whitespace break it.
fn print_capture(table: &Table, _ctx: &Context) -> Result<Frame, StrategyError> {
    check_lazy_lengths(table)?;
    let columns = table
        .names
        .iter()
        .zip(table.columns())
        .map(|(name, col)| match &col.value {
            RValue::Altrep(node) => column_from_object(name, &with_value(col, altrep::expand(node)?)),
            _ => column_from_object(name, col),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let text = render_print(&table.names, &columns);
    parse_print(&text, table.declared_cols())
}
