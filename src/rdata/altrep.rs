//! Realization of ALTREP vectors.
//!
//! R 3.5+ may serialize some vectors in a compact or deferred form instead of
//! writing their elements. A reader that does not know a class keeps the node
//! lazy; the functions here give the different ways of turning such a node
//! into ordinary data: whole-vector expansion, element access, windowed
//! extraction, duplication and payload inspection.

use super::types::{is_na_real, Altrep, Element, RObject, RValue, VectorKind, NA_INTEGER};
use super::ArchiveError;

pub const COMPACT_INTSEQ: &str = "compact_intseq";
pub const COMPACT_REALSEQ: &str = "compact_realseq";
pub const DEFERRED_STRING: &str = "deferred_string";

/// Longest compact sequence accepted, `R_LEN_T_MAX`.
pub const MAX_SEQ_LENGTH: usize = i32::MAX as usize;

const WRAPPER_CLASSES: &[&str] = &[
    "wrap_integer",
    "wrap_real",
    "wrap_logical",
    "wrap_string",
    "wrap_complex",
    "wrap_raw",
    "wrap_list",
];

pub fn is_known(class: &str) -> bool {
    class == COMPACT_INTSEQ
        || class == COMPACT_REALSEQ
        || class == DEFERRED_STRING
        || is_wrapper(class)
}

fn is_wrapper(class: &str) -> bool {
    WRAPPER_CLASSES.contains(&class)
}

fn unsupported(alt: &Altrep, reason: impl Into<String>) -> ArchiveError {
    ArchiveError::Altrep {
        class: alt.class.clone(),
        reason: reason.into(),
    }
}

/// Values of a pairlist or list state, in order.
fn state_parts(state: &RObject) -> Vec<&RObject> {
    match &state.value {
        RValue::Pairlist(entries) => entries.iter().map(|e| &e.value).collect(),
        RValue::List(items) => items.iter().collect(),
        _ => Vec::new(),
    }
}

fn first_part<'a>(alt: &'a Altrep) -> Result<&'a RObject, ArchiveError> {
    state_parts(&alt.state)
        .into_iter()
        .next()
        .ok_or_else(|| unsupported(alt, "state has no payload"))
}

/// `(length, first, increment)` of a compact sequence.
fn seq_info(alt: &Altrep) -> Result<(usize, f64, f64), ArchiveError> {
    let info: Vec<f64> = match &alt.state.value {
        RValue::Real(v) => v.clone(),
        RValue::Integer(v) => v.iter().map(|x| *x as f64).collect(),
        _ => return Err(unsupported(alt, "sequence state is not numeric")),
    };
    if info.len() < 3 || !info[0].is_finite() || info[0] < 0.0 {
        return Err(unsupported(alt, "sequence state is malformed"));
    }
    if info[0] > MAX_SEQ_LENGTH as f64 {
        return Err(unsupported(
            alt,
            format!("sequence length {} exceeds {}", info[0], MAX_SEQ_LENGTH),
        ));
    }
    Ok((info[0] as usize, info[1], info[2]))
}

/// An empty vector with room for `n` elements, or an error when the
/// allocator refuses.
fn reserve<T>(alt: &Altrep, n: usize) -> Result<Vec<T>, ArchiveError> {
    let mut out = Vec::new();
    out.try_reserve_exact(n)
        .map_err(|_| unsupported(alt, format!("cannot allocate {n} elements")))?;
    Ok(out)
}

fn source_length(obj: &RObject) -> Result<usize, ArchiveError> {
    match &obj.value {
        RValue::Altrep(inner) => base_length(inner),
        _ => Ok(obj.len()),
    }
}

fn source_element(obj: &RObject, i: usize) -> Result<Element, ArchiveError> {
    match &obj.value {
        RValue::Altrep(inner) => element_at(inner, i),
        _ => obj
            .element(i)
            .ok_or_else(|| ArchiveError::Malformed(format!("element {i} out of range"))),
    }
}

/// Length the vector has once realized.
pub fn base_length(alt: &Altrep) -> Result<usize, ArchiveError> {
    match alt.class.as_str() {
        COMPACT_INTSEQ | COMPACT_REALSEQ => Ok(seq_info(alt)?.0),
        DEFERRED_STRING => source_length(first_part(alt)?),
        c if is_wrapper(c) => source_length(first_part(alt)?),
        _ => Err(unsupported(alt, "unknown ALTREP class")),
    }
}

/// Element `i`, computed without realizing the rest of the vector.
pub fn element_at(alt: &Altrep, i: usize) -> Result<Element, ArchiveError> {
    match alt.class.as_str() {
        COMPACT_INTSEQ => {
            let (n, first, inc) = seq_info(alt)?;
            if i >= n {
                return Err(unsupported(alt, format!("index {i} beyond length {n}")));
            }
            Ok(Element::Integer((first + inc * i as f64) as i32))
        }
        COMPACT_REALSEQ => {
            let (n, first, inc) = seq_info(alt)?;
            if i >= n {
                return Err(unsupported(alt, format!("index {i} beyond length {n}")));
            }
            Ok(Element::Real(first + inc * i as f64))
        }
        DEFERRED_STRING => {
            let arg = first_part(alt)?;
            Ok(Element::Str(number_to_string(&source_element(arg, i)?)))
        }
        c if is_wrapper(c) => source_element(first_part(alt)?, i),
        _ => Err(unsupported(alt, "unknown ALTREP class")),
    }
}

fn kind_of(alt: &Altrep) -> Result<VectorKind, ArchiveError> {
    VectorKind::from_sexp(alt.base_type)
        .ok_or_else(|| unsupported(alt, format!("base type {} is not a vector", alt.base_type)))
}

/// Elements `start..end` as a vector of the node's base type.
pub fn extract_range(alt: &Altrep, start: usize, end: usize) -> Result<RValue, ArchiveError> {
    match alt.class.as_str() {
        COMPACT_INTSEQ => {
            let (n, first, inc) = seq_info(alt)?;
            let end = end.min(n);
            let mut out = reserve(alt, end.saturating_sub(start))?;
            out.extend((start..end).map(|i| (first + inc * i as f64) as i32));
            Ok(RValue::Integer(out))
        }
        COMPACT_REALSEQ => {
            let (n, first, inc) = seq_info(alt)?;
            let end = end.min(n);
            let mut out = reserve(alt, end.saturating_sub(start))?;
            out.extend((start..end).map(|i| first + inc * i as f64));
            Ok(RValue::Real(out))
        }
        _ => {
            let kind = kind_of(alt)?;
            let elements = (start..end)
                .map(|i| element_at(alt, i))
                .collect::<Result<Vec<_>, _>>()?;
            RValue::from_elements(kind, elements)
                .ok_or_else(|| unsupported(alt, "payload does not match declared type"))
        }
    }
}

/// Fully realize the node.
pub fn expand(alt: &Altrep) -> Result<RValue, ArchiveError> {
    match alt.class.as_str() {
        COMPACT_INTSEQ | COMPACT_REALSEQ => {
            let n = base_length(alt)?;
            extract_range(alt, 0, n)
        }
        DEFERRED_STRING => {
            let n = base_length(alt)?;
            extract_range(alt, 0, n)
        }
        c if is_wrapper(c) => {
            let wrapped = first_part(alt)?;
            match &wrapped.value {
                RValue::Altrep(inner) => expand(inner),
                other => Ok(other.clone()),
            }
        }
        _ => Err(unsupported(alt, "unknown ALTREP class")),
    }
}

/// What duplicating the vector yields: compact sequences expand, wrappers
/// hand back their payload, deferred strings stay deferred.
pub fn duplicate(alt: &Altrep) -> Option<RValue> {
    match alt.class.as_str() {
        COMPACT_INTSEQ | COMPACT_REALSEQ => expand(alt).ok(),
        c if is_wrapper(c) => {
            let wrapped = first_part(alt).ok()?;
            match &wrapped.value {
                RValue::Altrep(inner) => duplicate(inner),
                other => Some(other.clone()),
            }
        }
        _ => None,
    }
}

/// The primitive payload underneath the class wrapper, when the node carries
/// one. Compact sequences only store metadata and have none.
pub fn payload(alt: &Altrep) -> Option<RObject> {
    match alt.class.as_str() {
        DEFERRED_STRING => first_part(alt).ok().cloned(),
        c if is_wrapper(c) => first_part(alt).ok().cloned(),
        _ => None,
    }
}

fn number_to_string(element: &Element) -> Option<String> {
    match element {
        Element::Integer(x) if *x == NA_INTEGER => None,
        Element::Integer(x) => Some(x.to_string()),
        Element::Real(x) if is_na_real(*x) => None,
        Element::Real(x) => Some(format_real(*x)),
        Element::Str(s) => s.clone(),
        _ => None,
    }
}

/// Render a double the way `as.character()` does: 15 significant digits,
/// integral values without a decimal point, scientific notation outside
/// `[1e-4, 1e15)`.
pub fn format_real(x: f64) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    let rounded: f64 = format!("{:.14e}", x).parse().unwrap_or(x);
    let abs = rounded.abs();
    if abs != 0.0 && !(1e-4..1e15).contains(&abs) {
        let sci = format!("{:e}", rounded);
        match sci.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(d) => ('-', d),
                    None => ('+', exp),
                };
                format!("{mantissa}e{sign}{digits:0>2}")
            }
            None => sci,
        }
    } else if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdata::sexp;
    use crate::rdata::types::PairlistEntry;

    fn intseq(n: usize, first: i32) -> Altrep {
        Altrep {
            class: COMPACT_INTSEQ.into(),
            package: "base".into(),
            base_type: sexp::INTSXP,
            state: RObject::new(RValue::Real(vec![n as f64, first as f64, 1.0])),
        }
    }

    fn pair(values: Vec<RObject>) -> RObject {
        RObject::new(RValue::Pairlist(
            values
                .into_iter()
                .map(|value| PairlistEntry { tag: None, value })
                .collect(),
        ))
    }

    #[test]
    fn compact_sequence_expands() {
        let alt = intseq(4, 10);
        assert_eq!(expand(&alt).unwrap(), RValue::Integer(vec![10, 11, 12, 13]));
        assert_eq!(base_length(&alt).unwrap(), 4);
        assert_eq!(element_at(&alt, 2).unwrap(), Element::Integer(12));
        assert!(element_at(&alt, 4).is_err());
    }

    #[test]
    fn corrupt_sequence_length_is_an_error() {
        let alt = Altrep {
            state: RObject::new(RValue::Real(vec![(1u64 << 40) as f64, 1.0, 1.0])),
            ..intseq(0, 1)
        };
        assert!(matches!(
            expand(&alt),
            Err(ArchiveError::Altrep { ref class, .. }) if class == COMPACT_INTSEQ
        ));
        assert!(base_length(&alt).is_err());
        assert!(element_at(&alt, 0).is_err());
        assert!(extract_range(&alt, 0, 10).is_err());
        assert!(duplicate(&alt).is_none());

        let nan = Altrep {
            state: RObject::new(RValue::Real(vec![f64::NAN, 1.0, 1.0])),
            ..intseq(0, 1)
        };
        assert!(expand(&nan).is_err());
    }

    #[test]
    fn deferred_string_over_compact_sequence() {
        let inner = RObject::new(RValue::Altrep(Box::new(intseq(3, 1))));
        let alt = Altrep {
            class: DEFERRED_STRING.into(),
            package: "base".into(),
            base_type: sexp::STRSXP,
            state: pair(vec![inner, RObject::new(RValue::Integer(vec![0]))]),
        };
        assert_eq!(
            expand(&alt).unwrap(),
            RValue::Str(vec![Some("1".into()), Some("2".into()), Some("3".into())])
        );
        assert!(duplicate(&alt).is_none());
    }

    #[test]
    fn wrapper_duplicates_to_payload() {
        let alt = Altrep {
            class: "wrap_string".into(),
            package: "base".into(),
            base_type: sexp::STRSXP,
            state: pair(vec![
                RObject::strings(["a", "b"]),
                RObject::new(RValue::Integer(vec![0, 0])),
            ]),
        };
        assert_eq!(
            duplicate(&alt),
            Some(RValue::Str(vec![Some("a".into()), Some("b".into())]))
        );
        assert_eq!(
            extract_range(&alt, 1, 2).unwrap(),
            RValue::Str(vec![Some("b".into())])
        );
    }

    #[test]
    fn unknown_class_is_rejected() {
        let alt = Altrep {
            class: "vroom_chr".into(),
            package: "vroom".into(),
            base_type: sexp::STRSXP,
            state: RObject::null(),
        };
        assert!(!is_known(&alt.class));
        assert!(expand(&alt).is_err());
        assert!(payload(&alt).is_none());
    }

    #[test]
    fn real_formatting_follows_r() {
        assert_eq!(format_real(1.0), "1");
        assert_eq!(format_real(0.1 + 0.2), "0.3");
        assert_eq!(format_real(2.5), "2.5");
        assert_eq!(format_real(1e20), "1e+20");
        assert_eq!(format_real(1.5e-5), "1.5e-05");
        assert_eq!(format_real(f64::NEG_INFINITY), "-Inf");
    }
}
