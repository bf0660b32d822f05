// src/rdata/types.rs

use super::sexp;

pub const NA_INTEGER: i32 = i32::MIN;
pub const NA_LOGICAL: i32 = i32::MIN;

/// Bit pattern of R's `NA_real_`: a NaN whose low word is 1954.
const NA_REAL_BITS: u64 = 0x7FF0_0000_0000_07A2;

pub fn na_real() -> f64 {
    f64::from_bits(NA_REAL_BITS)
}

/// True only for R's `NA_real_`, not for an ordinary NaN.
pub fn is_na_real(x: f64) -> bool {
    x.is_nan() && (x.to_bits() & 0xFFFF_FFFF) == 1954
}

/// A deserialized R object together with its attribute list.
#[derive(Debug, Clone, PartialEq)]
pub struct RObject {
    pub value: RValue,
    /// Attributes in stream order (`names`, `class`, `row.names`, ...).
    pub attributes: Vec<(String, RObject)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairlistEntry {
    pub tag: Option<String>,
    pub value: RObject,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RValue {
    Null,
    Symbol(String),
    Pairlist(Vec<PairlistEntry>),
    Language(Vec<PairlistEntry>),
    Environment,
    Logical(Vec<i32>),
    Integer(Vec<i32>),
    Real(Vec<f64>),
    Complex(Vec<(f64, f64)>),
    Str(Vec<Option<String>>),
    List(Vec<RObject>),
    Expression(Vec<RObject>),
    Raw(Vec<u8>),
    /// A vector still in its compact/deferred wire representation.
    Altrep(Box<Altrep>),
    /// Closures, promises, builtins and other objects kept only by type.
    Opaque(u8),
}

/// An ALTREP node as it appears on the wire: class identity plus the state
/// needed to realize the vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Altrep {
    pub class: String,
    pub package: String,
    /// SEXPTYPE of the vector this node stands for.
    pub base_type: u8,
    pub state: RObject,
}

/// The vector families a column can be made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorKind {
    Logical,
    Integer,
    Real,
    Complex,
    Str,
    List,
    Raw,
}

impl VectorKind {
    pub fn from_sexp(t: u8) -> Option<Self> {
        match t {
            sexp::LGLSXP => Some(Self::Logical),
            sexp::INTSXP => Some(Self::Integer),
            sexp::REALSXP => Some(Self::Real),
            sexp::CPLXSXP => Some(Self::Complex),
            sexp::STRSXP => Some(Self::Str),
            sexp::VECSXP | sexp::EXPRSXP => Some(Self::List),
            sexp::RAWSXP => Some(Self::Raw),
            _ => None,
        }
    }

    pub fn sexp_type(self) -> u8 {
        match self {
            Self::Logical => sexp::LGLSXP,
            Self::Integer => sexp::INTSXP,
            Self::Real => sexp::REALSXP,
            Self::Complex => sexp::CPLXSXP,
            Self::Str => sexp::STRSXP,
            Self::List => sexp::VECSXP,
            Self::Raw => sexp::RAWSXP,
        }
    }
}

/// A single vector element, detached from its container.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Logical(i32),
    Integer(i32),
    Real(f64),
    Complex(f64, f64),
    Str(Option<String>),
    Raw(u8),
    Object(RObject),
}

impl RObject {
    pub fn new(value: RValue) -> Self {
        Self {
            value,
            attributes: Vec::new(),
        }
    }

    pub fn null() -> Self {
        Self::new(RValue::Null)
    }

    pub fn with_attr(mut self, name: &str, value: RObject) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&RObject> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn set_attr(&mut self, name: &str, value: RObject) {
        match self.attributes.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<RObject> {
        let idx = self.attributes.iter().position(|(n, _)| n == name)?;
        Some(self.attributes.remove(idx).1)
    }

    /// Values of the `class` attribute, empty when unclassed.
    pub fn class(&self) -> Vec<&str> {
        match self.attr("class").map(|c| &c.value) {
            Some(RValue::Str(v)) => v.iter().filter_map(|s| s.as_deref()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn inherits(&self, class: &str) -> bool {
        self.class().contains(&class)
    }

    /// Strings of the `names` attribute; NA names become empty strings.
    pub fn names(&self) -> Option<Vec<String>> {
        match self.attr("names").map(|n| &n.value) {
            Some(RValue::Str(v)) => Some(
                v.iter()
                    .map(|s| s.clone().unwrap_or_default())
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Realized length. Lazy ALTREP nodes report 0 until materialized.
    pub fn len(&self) -> usize {
        match &self.value {
            RValue::Null | RValue::Altrep(_) => 0,
            RValue::Symbol(_) | RValue::Environment | RValue::Opaque(_) => 1,
            RValue::Pairlist(e) | RValue::Language(e) => e.len(),
            RValue::Logical(v) | RValue::Integer(v) => v.len(),
            RValue::Real(v) => v.len(),
            RValue::Complex(v) => v.len(),
            RValue::Str(v) => v.len(),
            RValue::List(v) | RValue::Expression(v) => v.len(),
            RValue::Raw(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_altrep(&self) -> bool {
        matches!(self.value, RValue::Altrep(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, RValue::Null)
    }

    /// Element `i` of a realized vector.
    pub fn element(&self, i: usize) -> Option<Element> {
        match &self.value {
            RValue::Logical(v) => v.get(i).map(|x| Element::Logical(*x)),
            RValue::Integer(v) => v.get(i).map(|x| Element::Integer(*x)),
            RValue::Real(v) => v.get(i).map(|x| Element::Real(*x)),
            RValue::Complex(v) => v.get(i).map(|(re, im)| Element::Complex(*re, *im)),
            RValue::Str(v) => v.get(i).map(|s| Element::Str(s.clone())),
            RValue::Raw(v) => v.get(i).map(|b| Element::Raw(*b)),
            RValue::List(v) | RValue::Expression(v) => v.get(i).map(|o| Element::Object(o.clone())),
            _ => None,
        }
    }

    /// Convenience constructor for a character vector.
    pub fn strings<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(RValue::Str(
            values.into_iter().map(|s| Some(s.into())).collect(),
        ))
    }

    /// A named generic vector (`list(a = ..., b = ...)`).
    pub fn named_list(entries: Vec<(String, RObject)>) -> Self {
        let (names, values): (Vec<String>, Vec<RObject>) = entries.into_iter().unzip();
        Self::new(RValue::List(values)).with_attr("names", Self::strings(names))
    }

    /// The element type of a vector value, if it is one.
    pub fn vector_kind(&self) -> Option<VectorKind> {
        match &self.value {
            RValue::Logical(_) => Some(VectorKind::Logical),
            RValue::Integer(_) => Some(VectorKind::Integer),
            RValue::Real(_) => Some(VectorKind::Real),
            RValue::Complex(_) => Some(VectorKind::Complex),
            RValue::Str(_) => Some(VectorKind::Str),
            RValue::List(_) | RValue::Expression(_) => Some(VectorKind::List),
            RValue::Raw(_) => Some(VectorKind::Raw),
            RValue::Altrep(a) => VectorKind::from_sexp(a.base_type),
            _ => None,
        }
    }
}

impl RValue {
    /// Rebuild a vector of `kind` from detached elements. Elements of the
    /// wrong family are rejected.
    pub fn from_elements(kind: VectorKind, elements: Vec<Element>) -> Option<RValue> {
        match kind {
            VectorKind::Logical => elements
                .into_iter()
                .map(|e| match e {
                    Element::Logical(x) => Some(x),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(RValue::Logical),
            VectorKind::Integer => elements
                .into_iter()
                .map(|e| match e {
                    Element::Integer(x) => Some(x),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(RValue::Integer),
            VectorKind::Real => elements
                .into_iter()
                .map(|e| match e {
                    Element::Real(x) => Some(x),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(RValue::Real),
            VectorKind::Complex => elements
                .into_iter()
                .map(|e| match e {
                    Element::Complex(re, im) => Some((re, im)),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(RValue::Complex),
            VectorKind::Str => elements
                .into_iter()
                .map(|e| match e {
                    Element::Str(s) => Some(s),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(RValue::Str),
            VectorKind::Raw => elements
                .into_iter()
                .map(|e| match e {
                    Element::Raw(b) => Some(b),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(RValue::Raw),
            VectorKind::List => elements
                .into_iter()
                .map(|e| match e {
                    Element::Object(o) => Some(o),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(RValue::List),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn na_real_is_distinct_from_nan() {
        assert!(is_na_real(na_real()));
        assert!(!is_na_real(f64::NAN));
        assert!(!is_na_real(1.0));
    }

    #[test]
    fn lazy_nodes_report_zero_length() {
        let lazy = RObject::new(RValue::Altrep(Box::new(Altrep {
            class: "compact_intseq".into(),
            package: "base".into(),
            base_type: sexp::INTSXP,
            state: RObject::new(RValue::Real(vec![5.0, 1.0, 1.0])),
        })));
        assert_eq!(lazy.len(), 0);
        assert_eq!(lazy.vector_kind(), Some(VectorKind::Integer));
    }

    #[test]
    fn attributes_replace_in_place() {
        let mut obj = RObject::strings(["a", "b"]).with_attr("class", RObject::strings(["x"]));
        obj.set_attr("class", RObject::strings(["factor"]));
        assert_eq!(obj.attributes.len(), 1);
        assert!(obj.inherits("factor"));
        assert!(obj.remove_attr("class").is_some());
        assert!(obj.class().is_empty());
    }

    #[test]
    fn from_elements_rejects_mixed_families() {
        let mixed = vec![Element::Integer(1), Element::Str(Some("x".into()))];
        assert!(RValue::from_elements(VectorKind::Integer, mixed).is_none());
    }
}
