//! SEXPTYPE codes and flag packing used by R's serialization format.

pub const NILSXP: u8 = 0;
pub const SYMSXP: u8 = 1;
pub const LISTSXP: u8 = 2;
pub const CLOSXP: u8 = 3;
pub const ENVSXP: u8 = 4;
pub const PROMSXP: u8 = 5;
pub const LANGSXP: u8 = 6;
pub const SPECIALSXP: u8 = 7;
pub const BUILTINSXP: u8 = 8;
pub const CHARSXP: u8 = 9;
pub const LGLSXP: u8 = 10;
pub const INTSXP: u8 = 13;
pub const REALSXP: u8 = 14;
pub const CPLXSXP: u8 = 15;
pub const STRSXP: u8 = 16;
pub const DOTSXP: u8 = 17;
pub const VECSXP: u8 = 19;
pub const EXPRSXP: u8 = 20;
pub const BCODESXP: u8 = 21;
pub const EXTPTRSXP: u8 = 22;
pub const WEAKREFSXP: u8 = 23;
pub const RAWSXP: u8 = 24;
pub const S4SXP: u8 = 25;

// pseudo-types that only exist on the wire
pub const ALTREP_SXP: u8 = 238;
pub const BASEENV_SXP: u8 = 241;
pub const EMPTYENV_SXP: u8 = 242;
pub const PERSISTSXP: u8 = 247;
pub const PACKAGESXP: u8 = 248;
pub const NAMESPACESXP: u8 = 249;
pub const BASENAMESPACE_SXP: u8 = 250;
pub const MISSINGARG_SXP: u8 = 251;
pub const UNBOUNDVALUE_SXP: u8 = 252;
pub const GLOBALENV_SXP: u8 = 253;
pub const NILVALUE_SXP: u8 = 254;
pub const REFSXP: u8 = 255;

/// CHARSXP encoding bits, stored in the `levels` field.
pub const BYTES_MASK: i32 = 1 << 1;
pub const LATIN1_MASK: i32 = 1 << 2;
pub const UTF8_MASK: i32 = 1 << 3;
pub const ASCII_MASK: i32 = 1 << 6;

const IS_OBJECT_BIT: i32 = 1 << 8;
const HAS_ATTR_BIT: i32 = 1 << 9;
const HAS_TAG_BIT: i32 = 1 << 10;

/// Largest reference index that fits in the packed flags word.
pub const MAX_PACKED_INDEX: usize = (i32::MAX >> 8) as usize;

/// Decoded item header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub sexp_type: u8,
    pub levels: i32,
    pub is_object: bool,
    pub has_attr: bool,
    pub has_tag: bool,
    pub raw: i32,
}

impl Flags {
    pub fn unpack(raw: i32) -> Self {
        Self {
            sexp_type: (raw & 0xFF) as u8,
            levels: raw >> 12,
            is_object: raw & IS_OBJECT_BIT != 0,
            has_attr: raw & HAS_ATTR_BIT != 0,
            has_tag: raw & HAS_TAG_BIT != 0,
            raw,
        }
    }

    pub fn pack(sexp_type: u8, levels: i32, is_object: bool, has_attr: bool, has_tag: bool) -> i32 {
        let mut flags = sexp_type as i32 | (levels << 12);
        if is_object {
            flags |= IS_OBJECT_BIT;
        }
        if has_attr {
            flags |= HAS_ATTR_BIT;
        }
        if has_tag {
            flags |= HAS_TAG_BIT;
        }
        flags
    }

    /// Reference index packed into the upper bits of a REFSXP word; 0 means
    /// the index follows as a separate integer.
    pub fn packed_ref_index(&self) -> usize {
        (self.raw >> 8) as usize
    }
}

/// Encodes an R version triple the way `R_Version()` does.
pub const fn r_version(major: i32, minor: i32, patch: i32) -> i32 {
    major * 65536 + minor * 256 + patch
}

/// Human-readable name for a SEXPTYPE, for diagnostics.
pub fn type_name(t: u8) -> &'static str {
    match t {
        NILSXP | NILVALUE_SXP => "NULL",
        SYMSXP => "symbol",
        LISTSXP => "pairlist",
        CLOSXP => "closure",
        ENVSXP => "environment",
        PROMSXP => "promise",
        LANGSXP => "language",
        SPECIALSXP => "special",
        BUILTINSXP => "builtin",
        CHARSXP => "char",
        LGLSXP => "logical",
        INTSXP => "integer",
        REALSXP => "double",
        CPLXSXP => "complex",
        STRSXP => "character",
        DOTSXP => "...",
        VECSXP => "list",
        EXPRSXP => "expression",
        BCODESXP => "bytecode",
        EXTPTRSXP => "externalptr",
        WEAKREFSXP => "weakref",
        RAWSXP => "raw",
        S4SXP => "S4",
        ALTREP_SXP => "altrep",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_pack_and_unpack_agree() {
        let raw = Flags::pack(VECSXP, 0, true, true, false);
        let flags = Flags::unpack(raw);
        assert_eq!(flags.sexp_type, VECSXP);
        assert!(flags.is_object);
        assert!(flags.has_attr);
        assert!(!flags.has_tag);
    }

    #[test]
    fn charsxp_levels_survive_packing() {
        let flags = Flags::unpack(Flags::pack(CHARSXP, UTF8_MASK, false, false, false));
        assert_eq!(flags.levels & UTF8_MASK, UTF8_MASK);
    }

    #[test]
    fn packed_reference_index() {
        let flags = Flags::unpack(((7 << 8) as i32) | REFSXP as i32);
        assert_eq!(flags.sexp_type, REFSXP);
        assert_eq!(flags.packed_ref_index(), 7);
    }
}
