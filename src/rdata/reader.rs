// src/rdata/reader.rs

use tracing::{debug, trace, warn};

use super::altrep;
use super::sexp::{self, Flags};
use super::types::{Altrep, PairlistEntry, RObject, RValue};
use super::ArchiveError;

/// Stream-level header that follows the `X\n` format marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: i32,
    pub writer_version: i32,
    pub min_reader_version: i32,
    /// Native encoding recorded by format version 3.
    pub native_encoding: Option<String>,
}

/// Deserializer over a fully buffered XDR stream.
pub struct Reader {
    buf: Vec<u8>,
    pos: usize,
    refs: Vec<RObject>,
    expand_altrep: bool,
}

impl Reader {
    /// `expand_altrep` decides whether known ALTREP classes are realized while
    /// reading or kept as lazy nodes.
    pub fn new(buf: Vec<u8>, expand_altrep: bool) -> Self {
        Self {
            buf,
            pos: 0,
            refs: Vec::new(),
            expand_altrep,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> &[u8] {
        &self.buf[self.pos.min(self.buf.len())..]
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ArchiveError> {
        self.take(n).map(|_| ())
    }

    fn take(&mut self, n: usize) -> Result<&[u8], ArchiveError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(ArchiveError::Truncated(self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32, ArchiveError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f64(&mut self) -> Result<f64, ArchiveError> {
        let b = self.take(8)?;
        Ok(f64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Vector length; `-1` announces a long length split over two words.
    fn read_length(&mut self) -> Result<usize, ArchiveError> {
        let len = self.read_i32()?;
        let len = match len {
            -1 => {
                let upper = self.read_i32()? as u32 as u64;
                let lower = self.read_i32()? as u32 as u64;
                (upper << 32) + lower
            }
            n if n < 0 => return Err(ArchiveError::BadLength(n as i64)),
            n => n as u64,
        };
        // every element occupies at least one byte on the wire
        if len > self.remaining().len() as u64 {
            return Err(ArchiveError::BadLength(len as i64));
        }
        Ok(len as usize)
    }

    /// Reads `X\n` and the version words.
    pub fn read_header(&mut self) -> Result<StreamHeader, ArchiveError> {
        let format = self.take(2)?.to_vec();
        match format.as_slice() {
            b"X\n" => {}
            other => {
                return Err(ArchiveError::UnsupportedFormat(
                    String::from_utf8_lossy(other).into_owned(),
                ))
            }
        }
        let version = self.read_i32()?;
        let writer_version = self.read_i32()?;
        let min_reader_version = self.read_i32()?;
        let native_encoding = match version {
            2 => None,
            3 => {
                let n = self.read_i32()?;
                if n < 0 {
                    return Err(ArchiveError::BadLength(n as i64));
                }
                Some(String::from_utf8_lossy(self.take(n as usize)?).into_owned())
            }
            v => return Err(ArchiveError::UnsupportedVersion(v)),
        };
        debug!(version, writer_version, ?native_encoding, "stream header");
        Ok(StreamHeader {
            version,
            writer_version,
            min_reader_version,
            native_encoding,
        })
    }

    pub fn read_item(&mut self) -> Result<RObject, ArchiveError> {
        let flags = Flags::unpack(self.read_i32()?);
        self.read_item_with(flags)
    }

    fn read_item_with(&mut self, flags: Flags) -> Result<RObject, ArchiveError> {
        let at = self.pos;
        trace!(sexp = sexp::type_name(flags.sexp_type), at, "item");
        match flags.sexp_type {
            sexp::NILVALUE_SXP => Ok(RObject::null()),
            sexp::EMPTYENV_SXP
            | sexp::BASEENV_SXP
            | sexp::GLOBALENV_SXP
            | sexp::BASENAMESPACE_SXP => Ok(RObject::new(RValue::Environment)),
            sexp::UNBOUNDVALUE_SXP | sexp::MISSINGARG_SXP => {
                Ok(RObject::new(RValue::Opaque(flags.sexp_type)))
            }
            sexp::REFSXP => {
                let idx = match flags.packed_ref_index() {
                    0 => self.read_i32()? as usize,
                    i => i,
                };
                idx.checked_sub(1)
                    .and_then(|i| self.refs.get(i))
                    .cloned()
                    .ok_or(ArchiveError::BadReference(idx))
            }
            sexp::PERSISTSXP => {
                let names = self.read_string_vec()?;
                warn!(?names, "persistent reference cannot be resolved; kept opaque");
                let obj = RObject::new(RValue::Opaque(sexp::PERSISTSXP));
                self.refs.push(obj.clone());
                Ok(obj)
            }
            sexp::PACKAGESXP | sexp::NAMESPACESXP => {
                self.read_string_vec()?;
                let obj = RObject::new(RValue::Environment);
                self.refs.push(obj.clone());
                Ok(obj)
            }
            sexp::SYMSXP => {
                let name = match self.read_item()?.value {
                    RValue::Str(mut v) if v.len() == 1 => v.pop().flatten().unwrap_or_default(),
                    _ => return Err(ArchiveError::Malformed(format!("symbol name at byte {at}"))),
                };
                let obj = RObject::new(RValue::Symbol(name));
                self.refs.push(obj.clone());
                Ok(obj)
            }
            sexp::ENVSXP => {
                let _locked = self.read_i32()?;
                let obj = RObject::new(RValue::Environment);
                self.refs.push(obj.clone());
                // enclosure, frame, hash table, attributes: consumed, not kept
                for _ in 0..4 {
                    self.read_item()?;
                }
                Ok(obj)
            }
            sexp::LISTSXP | sexp::LANGSXP | sexp::CLOSXP | sexp::PROMSXP | sexp::DOTSXP => {
                self.read_pairlist(flags)
            }
            sexp::ALTREP_SXP => self.read_altrep(),
            _ => {
                let value = self.read_vector_body(flags, at)?;
                let mut obj = RObject::new(value);
                if flags.has_attr {
                    obj.attributes = self.read_attributes()?;
                }
                Ok(obj)
            }
        }
    }

    fn read_vector_body(&mut self, flags: Flags, at: usize) -> Result<RValue, ArchiveError> {
        let value = match flags.sexp_type {
            sexp::SPECIALSXP | sexp::BUILTINSXP => {
                let n = self.read_length()?;
                self.skip(n)?;
                RValue::Opaque(flags.sexp_type)
            }
            sexp::CHARSXP => RValue::Str(vec![self.read_charsxp_body(flags)?]),
            sexp::LGLSXP => {
                let n = self.read_length()?;
                RValue::Logical((0..n).map(|_| self.read_i32()).collect::<Result<_, _>>()?)
            }
            sexp::INTSXP => {
                let n = self.read_length()?;
                RValue::Integer((0..n).map(|_| self.read_i32()).collect::<Result<_, _>>()?)
            }
            sexp::REALSXP => {
                let n = self.read_length()?;
                RValue::Real((0..n).map(|_| self.read_f64()).collect::<Result<_, _>>()?)
            }
            sexp::CPLXSXP => {
                let n = self.read_length()?;
                let mut v = Vec::with_capacity(n.min(1 << 20));
                for _ in 0..n {
                    let re = self.read_f64()?;
                    let im = self.read_f64()?;
                    v.push((re, im));
                }
                RValue::Complex(v)
            }
            sexp::STRSXP => {
                let n = self.read_length()?;
                let mut v = Vec::with_capacity(n.min(1 << 20));
                for _ in 0..n {
                    let f = Flags::unpack(self.read_i32()?);
                    if f.sexp_type != sexp::CHARSXP {
                        return Err(ArchiveError::Malformed(format!(
                            "string vector element of type {} at byte {}",
                            sexp::type_name(f.sexp_type),
                            self.pos
                        )));
                    }
                    v.push(self.read_charsxp_body(f)?);
                }
                RValue::Str(v)
            }
            sexp::VECSXP | sexp::EXPRSXP => {
                let n = self.read_length()?;
                let mut v = Vec::with_capacity(n.min(1 << 20));
                for _ in 0..n {
                    v.push(self.read_item()?);
                }
                if flags.sexp_type == sexp::VECSXP {
                    RValue::List(v)
                } else {
                    RValue::Expression(v)
                }
            }
            sexp::RAWSXP => {
                let n = self.read_length()?;
                RValue::Raw(self.take(n)?.to_vec())
            }
            sexp::S4SXP => RValue::Opaque(sexp::S4SXP),
            sexp::EXTPTRSXP => {
                self.refs.push(RObject::new(RValue::Opaque(sexp::EXTPTRSXP)));
                self.read_item()?; // protected value
                self.read_item()?; // tag
                RValue::Opaque(sexp::EXTPTRSXP)
            }
            sexp::WEAKREFSXP => {
                self.refs.push(RObject::new(RValue::Opaque(sexp::WEAKREFSXP)));
                RValue::Opaque(sexp::WEAKREFSXP)
            }
            t => return Err(ArchiveError::UnsupportedType(t, at)),
        };
        Ok(value)
    }

    fn read_charsxp_body(&mut self, flags: Flags) -> Result<Option<String>, ArchiveError> {
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(ArchiveError::BadLength(len as i64));
        }
        let bytes = self.take(len as usize)?;
        let s = if flags.levels & sexp::LATIN1_MASK != 0 {
            bytes.iter().map(|b| *b as char).collect()
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        };
        Ok(Some(s))
    }

    fn read_string_vec(&mut self) -> Result<Vec<Option<String>>, ArchiveError> {
        if self.read_i32()? != 0 {
            return Err(ArchiveError::Malformed(
                "names in persistent string vector".into(),
            ));
        }
        let n = self.read_length()?;
        let mut out = Vec::with_capacity(n.min(1 << 10));
        for _ in 0..n {
            match self.read_item()?.value {
                RValue::Str(mut v) if v.len() == 1 => out.push(v.pop().flatten()),
                _ => return Err(ArchiveError::Malformed("expected CHARSXP".into())),
            }
        }
        Ok(out)
    }

    fn read_tag(&mut self) -> Result<String, ArchiveError> {
        match self.read_item()?.value {
            RValue::Symbol(name) => Ok(name),
            RValue::Null => Ok(String::new()),
            _ => Err(ArchiveError::Malformed(format!(
                "pairlist tag is not a symbol (byte {})",
                self.pos
            ))),
        }
    }

    fn read_attributes(&mut self) -> Result<Vec<(String, RObject)>, ArchiveError> {
        let attrs = self.read_item()?;
        pairlist_to_attributes(attrs)
    }

    /// Reads a chain of cons cells iteratively; a cdr of a different type
    /// ends the chain as an untagged tail entry.
    fn read_pairlist(&mut self, first: Flags) -> Result<RObject, ArchiveError> {
        let kind = first.sexp_type;
        let mut flags = first;
        let mut entries = Vec::new();
        let mut attributes = Vec::new();
        loop {
            if flags.has_attr {
                let attrs = self.read_attributes()?;
                if entries.is_empty() {
                    attributes = attrs;
                }
            }
            let tag = if flags.has_tag {
                Some(self.read_tag()?)
            } else {
                None
            };
            let value = self.read_item()?;
            entries.push(PairlistEntry { tag, value });

            let next = Flags::unpack(self.read_i32()?);
            match next.sexp_type {
                sexp::NILVALUE_SXP => break,
                t if t == kind && t != sexp::CLOSXP => flags = next,
                _ => {
                    let tail = self.read_item_with(next)?;
                    entries.push(PairlistEntry {
                        tag: None,
                        value: tail,
                    });
                    break;
                }
            }
        }
        let value = match kind {
            sexp::LISTSXP => RValue::Pairlist(entries),
            sexp::LANGSXP => RValue::Language(entries),
            other => RValue::Opaque(other),
        };
        Ok(RObject { value, attributes })
    }

    fn read_altrep(&mut self) -> Result<RObject, ArchiveError> {
        let info = self.read_item()?;
        let state = self.read_item()?;
        let attr = self.read_item()?;

        let (class, package, base_type) = altrep_info(&info)?;
        let node = Altrep {
            class,
            package,
            base_type,
            state,
        };
        let attributes = pairlist_to_attributes(attr)?;

        let value = if self.expand_altrep && altrep::is_known(&node.class) {
            match altrep::expand(&node) {
                Ok(v) => v,
                Err(e) => {
                    warn!(class = %node.class, error = %e, "ALTREP expansion failed; kept lazy");
                    RValue::Altrep(Box::new(node))
                }
            }
        } else {
            debug!(class = %node.class, "ALTREP node kept lazy");
            RValue::Altrep(Box::new(node))
        };
        Ok(RObject { value, attributes })
    }
}

pub(crate) fn pairlist_to_attributes(
    obj: RObject,
) -> Result<Vec<(String, RObject)>, ArchiveError> {
    match obj.value {
        RValue::Null => Ok(Vec::new()),
        RValue::Pairlist(entries) => Ok(entries
            .into_iter()
            .map(|e| (e.tag.unwrap_or_default(), e.value))
            .collect()),
        _ => Err(ArchiveError::Malformed(
            "attributes are not a pairlist".into(),
        )),
    }
}

/// `(class, package, base type)` from an ALTREP info pairlist.
fn altrep_info(info: &RObject) -> Result<(String, String, u8), ArchiveError> {
    let entries = match &info.value {
        RValue::Pairlist(e) if e.len() >= 3 => e,
        _ => return Err(ArchiveError::Malformed("ALTREP info is not a 3-element pairlist".into())),
    };
    let symbol = |o: &RObject| match &o.value {
        RValue::Symbol(s) => Ok(s.clone()),
        _ => Err(ArchiveError::Malformed("ALTREP class is not a symbol".into())),
    };
    let class = symbol(&entries[0].value)?;
    let package = symbol(&entries[1].value)?;
    let base_type = match &entries[2].value.value {
        RValue::Integer(v) if !v.is_empty() => v[0] as u8,
        _ => return Err(ArchiveError::Malformed("ALTREP type is not an integer".into())),
    };
    Ok((class, package, base_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xdr(words: &[i32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    #[test]
    fn reads_header_and_integer_vector() {
        let mut buf = b"X\n".to_vec();
        buf.extend(xdr(&[2, sexp::r_version(4, 3, 1), sexp::r_version(2, 3, 0)]));
        buf.extend(xdr(&[sexp::INTSXP as i32, 3, 1, 2, i32::MIN]));
        let mut r = Reader::new(buf, true);
        let header = r.read_header().unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.native_encoding, None);
        let obj = r.read_item().unwrap();
        assert_eq!(obj.value, RValue::Integer(vec![1, 2, i32::MIN]));
    }

    #[test]
    fn rejects_ascii_format() {
        let mut r = Reader::new(b"A\n".to_vec(), true);
        assert!(matches!(
            r.read_header(),
            Err(ArchiveError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut buf = xdr(&[sexp::REALSXP as i32, 2]);
        buf.extend(1.5f64.to_be_bytes());
        let mut r = Reader::new(buf, true);
        assert!(matches!(r.read_item(), Err(ArchiveError::Truncated(_))));
    }

    #[test]
    fn impossible_length_is_rejected() {
        let buf = xdr(&[sexp::INTSXP as i32, 1_000_000]);
        assert!(matches!(
            Reader::new(buf, true).read_item(),
            Err(ArchiveError::BadLength(1_000_000))
        ));
    }

    #[test]
    fn na_string_and_latin1() {
        let mut buf = xdr(&[sexp::STRSXP as i32, 2, sexp::CHARSXP as i32, -1]);
        buf.extend(xdr(&[
            sexp::Flags::pack(sexp::CHARSXP, sexp::LATIN1_MASK, false, false, false),
            1,
        ]));
        buf.push(0xE9);
        let obj = Reader::new(buf, true).read_item().unwrap();
        assert_eq!(obj.value, RValue::Str(vec![None, Some("é".into())]));
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let buf = xdr(&[((3 << 8) as i32) | sexp::REFSXP as i32]);
        assert!(matches!(
            Reader::new(buf, true).read_item(),
            Err(ArchiveError::BadReference(3))
        ));
    }
}
