// src/extract/flatten.rs

use super::frame::{Column, Frame};

pub const LIST_DELIMITER: &str = "; ";
pub const NULL_MARKER: &str = "NA";

/// Separator and missing-value text used when flattening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenOptions {
    pub delimiter: String,
    pub null_marker: String,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            delimiter: LIST_DELIMITER.to_string(),
            null_marker: NULL_MARKER.to_string(),
        }
    }
}

/// Text for one nested cell. `NULL` and zero-length cells become the null
/// marker, missing sub-values are written as the null marker too.
pub fn flatten_cell(cell: Option<&[Option<String>]>, opts: &FlattenOptions) -> String {
    match cell {
        None | Some([]) => opts.null_marker.clone(),
        Some(values) => values
            .iter()
            .map(|v| v.as_deref().unwrap_or(&opts.null_marker))
            .collect::<Vec<_>>()
            .join(&opts.delimiter),
    }
}

/// A frame in which every column is scalar. Plain columns pass through.
pub fn flatten(frame: Frame, opts: &FlattenOptions) -> Frame {
    let columns = frame
        .columns
        .into_iter()
        .map(|col| match col {
            Column::Scalar(cells) => Column::Scalar(cells),
            Column::Nested(cells) => Column::Scalar(
                cells
                    .iter()
                    .map(|c| Some(flatten_cell(c.as_deref(), opts)))
                    .collect(),
            ),
        })
        .collect();
    Frame {
        headers: frame.headers,
        columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn nested_cells_are_joined() {
        let opts = FlattenOptions::default();
        assert_eq!(flatten_cell(Some(&[s("a"), s("b")]), &opts), "a; b");
        assert_eq!(flatten_cell(Some(&[s("a"), None]), &opts), "a; NA");
        assert_eq!(flatten_cell(Some(&[]), &opts), "NA");
        assert_eq!(flatten_cell(None, &opts), "NA");
    }

    #[test]
    fn flattening_is_idempotent_on_plain_columns() {
        let frame = Frame {
            headers: vec!["name".into(), "aliases".into()],
            columns: vec![
                Column::Scalar(vec![s("x"), None]),
                Column::Nested(vec![Some(vec![s("p"), s("q")]), None]),
            ],
        };
        let opts = FlattenOptions::default();
        let once = flatten(frame, &opts);
        assert_eq!(
            once.columns[1],
            Column::Scalar(vec![s("p; q"), s("NA")])
        );
        let twice = flatten(once.clone(), &opts);
        assert_eq!(once, twice);
    }

    #[test]
    fn custom_delimiter() {
        let opts = FlattenOptions {
            delimiter: "|".into(),
            null_marker: "".into(),
        };
        assert_eq!(flatten_cell(Some(&[s("a"), s("b")]), &opts), "a|b");
        assert_eq!(flatten_cell(None, &opts), "");
    }
}
