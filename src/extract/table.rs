// src/extract/table.rs

use crate::rdata::altrep;
use crate::rdata::types::NA_INTEGER;
use crate::rdata::{ArchiveError, RObject, RValue};

/// A data frame as loaded from the archive, with its declared shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub object: RObject,
    pub names: Vec<String>,
    /// Row count from the `row.names` attribute, independent of how many
    /// values the columns actually hold.
    pub declared_rows: usize,
}

impl Table {
    pub fn from_object(object: RObject) -> Result<Self, ArchiveError> {
        let n_cols = match &object.value {
            RValue::List(cols) => cols.len(),
            RValue::Altrep(_) => {
                return Err(ArchiveError::Malformed(
                    "table is itself a lazy vector".into(),
                ))
            }
            _ => {
                return Err(ArchiveError::Malformed(format!(
                    "expected a data frame, found {:?}",
                    object.vector_kind()
                )))
            }
        };
        let names = object
            .names()
            .unwrap_or_else(|| (1..=n_cols).map(|i| format!("V{i}")).collect());
        if names.len() != n_cols {
            return Err(ArchiveError::Malformed(format!(
                "{} column names for {} columns",
                names.len(),
                n_cols
            )));
        }
        let declared_rows = declared_rows(&object);
        Ok(Self {
            object,
            names,
            declared_rows,
        })
    }

    pub fn columns(&self) -> &[RObject] {
        match &self.object.value {
            RValue::List(cols) => cols,
            _ => &[],
        }
    }

    fn columns_mut(&mut self) -> Option<&mut Vec<RObject>> {
        match &mut self.object.value {
            RValue::List(cols) => Some(cols),
            _ => None,
        }
    }

    pub fn declared_cols(&self) -> usize {
        self.names.len()
    }

    /// Realized length of the first column; `None` for a table without
    /// columns.
    pub fn first_realized_len(&self) -> Option<usize> {
        self.columns().first().map(RObject::len)
    }

    pub fn is_materialized(&self) -> bool {
        match self.first_realized_len() {
            None => true,
            Some(n) => n == self.declared_rows,
        }
    }

    /// Columns whose values are still lazy nodes.
    pub fn lazy_columns(&self) -> Vec<&str> {
        self.names
            .iter()
            .zip(self.columns())
            .filter(|(_, c)| c.is_altrep())
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// A copy of the table with every column passed through `f`.
    pub fn map_columns<F, E>(&self, mut f: F) -> Result<Table, E>
    where
        F: FnMut(&str, &RObject) -> Result<RObject, E>,
    {
        let mut out = self.clone();
        if let Some(cols) = out.columns_mut() {
            for (name, col) in self.names.iter().zip(cols.iter_mut()) {
                *col = f(name, col)?;
            }
        }
        Ok(out)
    }

    pub fn push_column(&mut self, name: &str, column: RObject) {
        if let Some(cols) = self.columns_mut() {
            cols.push(column);
            self.names.push(name.to_string());
            self.sync_names();
        }
    }

    pub fn remove_column(&mut self, name: &str) -> Option<RObject> {
        let idx = self.names.iter().position(|n| n == name)?;
        let removed = self.columns_mut()?.remove(idx);
        self.names.remove(idx);
        self.sync_names();
        Some(removed)
    }

    fn sync_names(&mut self) {
        let names = RObject::strings(self.names.clone());
        self.object.set_attr("names", names);
    }
}

/// Row count declared by `row.names`: the compact `c(NA, -n)` form, an
/// explicit vector, or a lazy sequence. Without `row.names` the longest
/// realized column decides.
fn declared_rows(object: &RObject) -> usize {
    match object.attr("row.names") {
        Some(rn) => match &rn.value {
            RValue::Integer(v) if v.len() == 2 && v[0] == NA_INTEGER => v[1].unsigned_abs() as usize,
            RValue::Altrep(node) => altrep::base_length(node).unwrap_or(0),
            _ => rn.len(),
        },
        None => match &object.value {
            RValue::List(cols) => cols.iter().map(RObject::len).max().unwrap_or(0),
            _ => 0,
        },
    }
}
