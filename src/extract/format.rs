//! Cell rendering for table columns.

use chrono::{DateTime, NaiveDate, TimeDelta};

use crate::rdata::altrep::format_real;
use crate::rdata::types::{is_na_real, NA_INTEGER, NA_LOGICAL};
use crate::rdata::{Element, RObject, RValue};

/// How the elements of a column are turned into text, derived from its
/// class attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnFormat {
    Plain,
    Factor(Vec<Option<String>>),
    Date,
    DateTime,
}

impl ColumnFormat {
    pub fn of(column: &RObject) -> Self {
        if column.inherits("factor") {
            if let Some(RValue::Str(levels)) = column.attr("levels").map(|l| &l.value) {
                return Self::Factor(levels.clone());
            }
        }
        if column.inherits("Date") {
            Self::Date
        } else if column.inherits("POSIXct") {
            Self::DateTime
        } else {
            Self::Plain
        }
    }

    /// Text for one element; `None` is a missing value. Nested objects are
    /// not scalar cells and yield an error.
    pub fn cell(&self, element: &Element) -> Result<Option<String>, String> {
        let text = match element {
            Element::Logical(x) if *x == NA_LOGICAL => None,
            Element::Logical(x) => Some(if *x != 0 { "TRUE" } else { "FALSE" }.to_string()),
            Element::Integer(x) if *x == NA_INTEGER => None,
            Element::Integer(x) => match self {
                Self::Factor(levels) => {
                    let idx = usize::try_from(*x - 1)
                        .map_err(|_| format!("factor code {x} out of range"))?;
                    levels
                        .get(idx)
                        .cloned()
                        .ok_or_else(|| format!("factor code {x} has no level"))?
                }
                Self::Date => format_date(*x as f64),
                Self::DateTime => format_datetime(*x as f64),
                Self::Plain => Some(x.to_string()),
            },
            Element::Real(x) if is_na_real(*x) => None,
            Element::Real(x) => match self {
                Self::Date => format_date(*x),
                Self::DateTime => format_datetime(*x),
                _ => Some(format_real(*x)),
            },
            Element::Complex(re, im) if is_na_real(*re) || is_na_real(*im) => None,
            Element::Complex(re, im) => {
                let sign = if *im < 0.0 { "-" } else { "+" };
                Some(format!("{}{}{}i", format_real(*re), sign, format_real(im.abs())))
            }
            Element::Str(s) => s.clone(),
            Element::Raw(b) => Some(format!("{b:02x}")),
            Element::Object(_) => return Err("nested value in a scalar column".into()),
        };
        Ok(text)
    }
}

fn format_date(days: f64) -> Option<String> {
    if !days.is_finite() {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    let date = epoch.checked_add_signed(TimeDelta::try_days(days.floor() as i64)?)?;
    Some(date.format("%Y-%m-%d").to_string())
}

fn format_datetime(secs: f64) -> Option<String> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9) as u32;
    let ts = DateTime::from_timestamp(whole as i64, nanos)?;
    Some(ts.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Every element of a realized vector as text. Lazy nodes contribute their
/// realized length, which is zero.
pub fn format_vector(obj: &RObject) -> Result<Vec<Option<String>>, String> {
    let fmt = ColumnFormat::of(obj);
    (0..obj.len())
        .map(|i| match obj.element(i) {
            Some(e) => fmt.cell(&e),
            None => Err(format!("element {i} is not addressable")),
        })
        .collect()
}

/// Sub-values of one list cell: `None` for `NULL`, otherwise the rendered
/// elements (possibly none).
pub fn nested_cell(obj: &RObject) -> Result<Option<Vec<Option<String>>>, String> {
    match &obj.value {
        RValue::Null => Ok(None),
        RValue::List(items) => {
            // a list inside a list cell renders each item's first value
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let values = format_vector(item)?;
                out.push(values.into_iter().next().flatten());
            }
            Ok(Some(out))
        }
        _ if obj.vector_kind().is_some() => format_vector(obj).map(Some),
        _ => Err("list cell is not a vector".into()),
    }
}
