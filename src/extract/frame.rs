// src/extract/frame.rs

use super::format::{format_vector, nested_cell};
use super::strategy::StrategyError;
use super::table::Table;
use crate::rdata::{RObject, RValue};

/// A rectangular column of text cells. `None` is a missing value.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Scalar(Vec<Option<String>>),
    /// List-valued column: `None` is a `NULL` cell, otherwise the cell's
    /// sub-values.
    Nested(Vec<Option<Vec<Option<String>>>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Scalar(v) => v.len(),
            Self::Nested(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, Self::Nested(_))
    }
}

/// The realized, addressable form of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub headers: Vec<String>,
    pub columns: Vec<Column>,
}

impl Frame {
    /// Coerce a table using whole-vector access only. Lazy columns come out
    /// with whatever they have realized, which is nothing.
    pub fn from_table(table: &Table) -> Result<Self, StrategyError> {
        let columns = table
            .names
            .iter()
            .zip(table.columns())
            .map(|(name, col)| column_from_object(name, col))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            headers: table.names.clone(),
            columns,
        })
    }

    /// Length of the first column, 0 for a frame without columns.
    pub fn first_len(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn row_count(&self) -> usize {
        self.first_len()
    }

    /// The first column must hold exactly `declared` rows and every other
    /// column must agree with it.
    pub fn check_rectangular(&self, declared: usize) -> Result<(), StrategyError> {
        if self.columns.is_empty() {
            return Ok(());
        }
        let realized = self.first_len();
        if realized != declared {
            return Err(StrategyError::LengthMismatch { realized, declared });
        }
        for (name, col) in self.headers.iter().zip(&self.columns) {
            if col.len() != declared {
                return Err(StrategyError::Column {
                    column: name.clone(),
                    reason: format!("{} values for {} rows", col.len(), declared),
                });
            }
        }
        Ok(())
    }
}

pub fn column_from_object(name: &str, col: &RObject) -> Result<Column, StrategyError> {
    let fail = |reason: String| StrategyError::Column {
        column: name.to_string(),
        reason,
    };
    match &col.value {
        RValue::Altrep(_) => Ok(Column::Scalar(Vec::new())),
        RValue::List(items) | RValue::Expression(items) => items
            .iter()
            .map(nested_cell)
            .collect::<Result<Vec<_>, _>>()
            .map(Column::Nested)
            .map_err(fail),
        _ if col.vector_kind().is_some() => format_vector(col).map(Column::Scalar).map_err(fail),
        RValue::Null => Ok(Column::Scalar(Vec::new())),
        _ => Err(fail("column is not a vector".into())),
    }
}
