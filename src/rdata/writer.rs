// src/rdata/writer.rs

use std::{collections::HashMap, io::Write};

use super::altrep;
use super::sexp::{self, r_version, Flags};
use super::types::{Altrep, PairlistEntry, RObject, RValue};
use super::ArchiveError;

/// Serialization format version.
///
/// Version 2 has no ALTREP representation, so lazy nodes are realized on
/// write; version 3 keeps them as they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V2,
    V3,
}

impl FormatVersion {
    fn number(self) -> i32 {
        match self {
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    fn min_reader(self) -> i32 {
        match self {
            Self::V2 => r_version(2, 3, 0),
            Self::V3 => r_version(3, 5, 0),
        }
    }
}

/// R version recorded as the writer of streams produced here.
const WRITER_VERSION: i32 = r_version(4, 3, 1);

pub struct Writer<W: Write> {
    out: W,
    version: FormatVersion,
    /// symbol name → 1-based reference index
    symbols: HashMap<String, usize>,
}

impl<W: Write> Writer<W> {
    pub fn new(out: W, version: FormatVersion) -> Self {
        Self {
            out,
            version,
            symbols: HashMap::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_i32(&mut self, v: i32) -> Result<(), ArchiveError> {
        self.out.write_all(&v.to_be_bytes())?;
        Ok(())
    }

    fn write_f64(&mut self, v: f64) -> Result<(), ArchiveError> {
        self.out.write_all(&v.to_be_bytes())?;
        Ok(())
    }

    fn write_length(&mut self, n: usize) -> Result<(), ArchiveError> {
        if n > i32::MAX as usize {
            self.write_i32(-1)?;
            self.write_i32((n >> 32) as i32)?;
            self.write_i32((n & 0xFFFF_FFFF) as u32 as i32)
        } else {
            self.write_i32(n as i32)
        }
    }

    pub fn write_header(&mut self) -> Result<(), ArchiveError> {
        self.out.write_all(b"X\n")?;
        self.write_i32(self.version.number())?;
        self.write_i32(WRITER_VERSION)?;
        self.write_i32(self.version.min_reader())?;
        if self.version == FormatVersion::V3 {
            let enc = b"UTF-8";
            self.write_i32(enc.len() as i32)?;
            self.out.write_all(enc)?;
        }
        Ok(())
    }

    fn write_symbol(&mut self, name: &str) -> Result<(), ArchiveError> {
        if let Some(&idx) = self.symbols.get(name) {
            if idx > sexp::MAX_PACKED_INDEX {
                self.write_i32(sexp::REFSXP as i32)?;
                return self.write_i32(idx as i32);
            }
            return self.write_i32(((idx as i32) << 8) | sexp::REFSXP as i32);
        }
        self.write_i32(sexp::SYMSXP as i32)?;
        self.write_charsxp(Some(name))?;
        let idx = self.symbols.len() + 1;
        self.symbols.insert(name.to_string(), idx);
        Ok(())
    }

    fn write_charsxp(&mut self, s: Option<&str>) -> Result<(), ArchiveError> {
        match s {
            None => {
                self.write_i32(sexp::CHARSXP as i32)?;
                self.write_i32(-1)
            }
            Some(s) => {
                let levels = if s.is_ascii() {
                    sexp::ASCII_MASK
                } else {
                    sexp::UTF8_MASK
                };
                self.write_i32(Flags::pack(sexp::CHARSXP, levels, false, false, false))?;
                self.write_i32(s.len() as i32)?;
                self.out.write_all(s.as_bytes())?;
                Ok(())
            }
        }
    }

    fn write_attributes(&mut self, attrs: &[(String, RObject)]) -> Result<(), ArchiveError> {
        for (name, value) in attrs {
            self.write_i32(Flags::pack(sexp::LISTSXP, 0, false, false, true))?;
            self.write_symbol(name)?;
            self.write_item(value)?;
        }
        self.write_i32(sexp::NILVALUE_SXP as i32)
    }

    fn write_pairlist(
        &mut self,
        kind: u8,
        entries: &[PairlistEntry],
        attrs: &[(String, RObject)],
    ) -> Result<(), ArchiveError> {
        if entries.is_empty() {
            return self.write_i32(sexp::NILVALUE_SXP as i32);
        }
        for (i, entry) in entries.iter().enumerate() {
            let with_attr = i == 0 && !attrs.is_empty();
            self.write_i32(Flags::pack(
                kind,
                0,
                false,
                with_attr,
                entry.tag.is_some(),
            ))?;
            if with_attr {
                self.write_attributes(attrs)?;
            }
            if let Some(tag) = &entry.tag {
                self.write_symbol(tag)?;
            }
            self.write_item(&entry.value)?;
        }
        self.write_i32(sexp::NILVALUE_SXP as i32)
    }

    pub fn write_item(&mut self, obj: &RObject) -> Result<(), ArchiveError> {
        let attrs = &obj.attributes;
        let is_object = obj.attr("class").is_some();
        let has_attr = !attrs.is_empty();
        let vector_flags =
            |t: u8| Flags::pack(t, 0, is_object, has_attr, false);

        match &obj.value {
            RValue::Null => return self.write_i32(sexp::NILVALUE_SXP as i32),
            RValue::Symbol(name) => return self.write_symbol(name),
            RValue::Pairlist(entries) => return self.write_pairlist(sexp::LISTSXP, entries, attrs),
            RValue::Language(entries) => return self.write_pairlist(sexp::LANGSXP, entries, attrs),
            RValue::Environment => return self.write_i32(sexp::GLOBALENV_SXP as i32),
            RValue::Opaque(t) => {
                return Err(ArchiveError::Unserializable(format!(
                    "{} object",
                    sexp::type_name(*t)
                )))
            }
            RValue::Altrep(node) => return self.write_altrep(node, attrs, is_object),
            RValue::Logical(v) => {
                self.write_i32(vector_flags(sexp::LGLSXP))?;
                self.write_length(v.len())?;
                for x in v {
                    self.write_i32(*x)?;
                }
            }
            RValue::Integer(v) => {
                self.write_i32(vector_flags(sexp::INTSXP))?;
                self.write_length(v.len())?;
                for x in v {
                    self.write_i32(*x)?;
                }
            }
            RValue::Real(v) => {
                self.write_i32(vector_flags(sexp::REALSXP))?;
                self.write_length(v.len())?;
                for x in v {
                    self.write_f64(*x)?;
                }
            }
            RValue::Complex(v) => {
                self.write_i32(vector_flags(sexp::CPLXSXP))?;
                self.write_length(v.len())?;
                for (re, im) in v {
                    self.write_f64(*re)?;
                    self.write_f64(*im)?;
                }
            }
            RValue::Str(v) => {
                self.write_i32(vector_flags(sexp::STRSXP))?;
                self.write_length(v.len())?;
                for s in v {
                    self.write_charsxp(s.as_deref())?;
                }
            }
            RValue::List(v) | RValue::Expression(v) => {
                let t = if matches!(obj.value, RValue::List(_)) {
                    sexp::VECSXP
                } else {
                    sexp::EXPRSXP
                };
                self.write_i32(vector_flags(t))?;
                self.write_length(v.len())?;
                for item in v {
                    self.write_item(item)?;
                }
            }
            RValue::Raw(v) => {
                self.write_i32(vector_flags(sexp::RAWSXP))?;
                self.write_length(v.len())?;
                self.out.write_all(v)?;
            }
        }
        if has_attr {
            self.write_attributes(attrs)?;
        }
        Ok(())
    }

    fn write_altrep(
        &mut self,
        node: &Altrep,
        attrs: &[(String, RObject)],
        is_object: bool,
    ) -> Result<(), ArchiveError> {
        if self.version == FormatVersion::V2 {
            let value = altrep::expand(node)?;
            return self.write_item(&RObject {
                value,
                attributes: attrs.to_vec(),
            });
        }
        self.write_i32(Flags::pack(sexp::ALTREP_SXP, 0, is_object, false, false))?;
        let info = RObject::new(RValue::Pairlist(vec![
            PairlistEntry {
                tag: None,
                value: RObject::new(RValue::Symbol(node.class.clone())),
            },
            PairlistEntry {
                tag: None,
                value: RObject::new(RValue::Symbol(node.package.clone())),
            },
            PairlistEntry {
                tag: None,
                value: RObject::new(RValue::Integer(vec![node.base_type as i32])),
            },
        ]));
        self.write_item(&info)?;
        self.write_item(&node.state)?;
        self.write_attributes(attrs)
    }

    pub fn flush(&mut self) -> Result<(), ArchiveError> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdata::reader::Reader;

    fn round_trip(obj: &RObject, version: FormatVersion, expand: bool) -> RObject {
        let mut w = Writer::new(Vec::new(), version);
        w.write_header().unwrap();
        w.write_item(obj).unwrap();
        let mut r = Reader::new(w.into_inner(), expand);
        r.read_header().unwrap();
        r.read_item().unwrap()
    }

    #[test]
    fn repeated_symbols_use_references() {
        let inner = RObject::strings(["x"]).with_attr("class", RObject::strings(["a"]));
        let obj = RObject::new(RValue::List(vec![inner.clone(), inner]));
        let back = round_trip(&obj, FormatVersion::V2, true);
        assert_eq!(back, obj);
    }

    #[test]
    fn version_two_realizes_lazy_nodes() {
        let node = Altrep {
            class: altrep::COMPACT_INTSEQ.into(),
            package: "base".into(),
            base_type: sexp::INTSXP,
            state: RObject::new(RValue::Real(vec![3.0, 5.0, 1.0])),
        };
        let obj = RObject::new(RValue::Altrep(Box::new(node)));
        let back = round_trip(&obj, FormatVersion::V2, false);
        assert_eq!(back.value, RValue::Integer(vec![5, 6, 7]));
    }

    #[test]
    fn version_three_keeps_lazy_nodes() {
        let node = Altrep {
            class: altrep::COMPACT_INTSEQ.into(),
            package: "base".into(),
            base_type: sexp::INTSXP,
            state: RObject::new(RValue::Real(vec![3.0, 5.0, 1.0])),
        };
        let obj = RObject::new(RValue::Altrep(Box::new(node)))
            .with_attr("names", RObject::strings(["a", "b", "c"]));
        let lazy = round_trip(&obj, FormatVersion::V3, false);
        assert!(lazy.is_altrep());
        assert_eq!(lazy.names().unwrap(), vec!["a", "b", "c"]);

        let eager = round_trip(&obj, FormatVersion::V3, true);
        assert_eq!(eager.value, RValue::Integer(vec![5, 6, 7]));
    }

    #[test]
    fn opaque_objects_cannot_be_written() {
        let mut w = Writer::new(Vec::new(), FormatVersion::V2);
        let err = w
            .write_item(&RObject::new(RValue::Opaque(sexp::CLOSXP)))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Unserializable(_)));
    }
}
