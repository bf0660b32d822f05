//! Reader and writer for R's serialization format.
//!
//! Handles `.rda` workspaces (`save()`, magic `RDX2`/`RDX3`) and bare `.rds`
//! streams (`saveRDS()`), plain or compressed with gzip, bzip2 or xz, in XDR
//! encoding, format versions 2 and 3.

pub mod altrep;
pub mod reader;
pub mod sexp;
pub mod types;
pub mod writer;

use std::{
    fs::{self, File},
    io::{BufWriter, Read, Write},
    path::Path,
};

use bzip2::{read::BzDecoder, write::BzEncoder};
use flate2::{read::GzDecoder, write::GzEncoder};
use xz2::{read::XzDecoder, write::XzEncoder};
use tracing::{debug, info};

pub use reader::{Reader, StreamHeader};
pub use types::{Altrep, Element, PairlistEntry, RObject, RValue, VectorKind};
pub use writer::{FormatVersion, Writer};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported serialization format {0:?}; only XDR is supported")]
    UnsupportedFormat(String),
    #[error("unsupported serialization version {0}")]
    UnsupportedVersion(i32),
    #[error("unexpected end of stream at byte {0}")]
    Truncated(usize),
    #[error("unsupported SEXP type {0} at byte {1}")]
    UnsupportedType(u8, usize),
    #[error("reference index {0} is not in the reference table")]
    BadReference(usize),
    #[error("invalid vector length {0}")]
    BadLength(i64),
    #[error("malformed archive: {0}")]
    Malformed(String),
    #[error("cannot serialize {0}")]
    Unserializable(String),
    #[error("ALTREP class {class} cannot be realized: {reason}")]
    Altrep { class: String, reason: String },
    #[error("object {wanted:?} not found in workspace; available: {}", .available.join(", "))]
    MissingObject {
        wanted: String,
        available: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

/// Sniff the compression wrapper from leading magic bytes.
pub fn detect_compression(bytes: &[u8]) -> Compression {
    if bytes.starts_with(&[0x1f, 0x8b]) {
        Compression::Gzip
    } else if bytes.starts_with(b"BZh") {
        Compression::Bzip2
    } else if bytes.starts_with(&[0xFD, b'7', b'z', b'X', b'Z', 0x00]) {
        Compression::Xz
    } else {
        Compression::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// `save()` workspace: a tagged pairlist of named objects.
    Workspace,
    /// `saveRDS()` stream: a single unnamed object.
    Stream,
}

#[derive(Debug, Clone)]
pub struct Archive {
    pub kind: ArchiveKind,
    pub header: StreamHeader,
    pub objects: Vec<(String, RObject)>,
}

impl Archive {
    pub fn object_names(&self) -> Vec<String> {
        self.objects.iter().map(|(n, _)| n.clone()).collect()
    }

    /// The object holding the dataset mapping: the named workspace object
    /// when `name` is given, otherwise the first (for streams, the only) one.
    pub fn root(&self, name: Option<&str>) -> Result<&RObject, ArchiveError> {
        let found = match name {
            Some(wanted) => self.objects.iter().find(|(n, _)| n == wanted),
            None => self.objects.first(),
        };
        found.map(|(_, o)| o).ok_or_else(|| ArchiveError::MissingObject {
            wanted: name.unwrap_or("<first>").to_string(),
            available: self.object_names(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Realize known ALTREP classes while reading.
    pub expand_altrep: bool,
}

/// Load an archive file fully into memory.
#[tracing::instrument(level = "info", skip(path, opts), fields(path = %path.as_ref().display()))]
pub fn load_archive<P: AsRef<Path>>(path: P, opts: LoadOptions) -> Result<Archive, ArchiveError> {
    let bytes = fs::read(&path)?;
    info!(bytes = bytes.len(), expand_altrep = opts.expand_altrep, "read archive");
    parse_archive(bytes, opts)
}

pub fn parse_archive(bytes: Vec<u8>, opts: LoadOptions) -> Result<Archive, ArchiveError> {
    let raw = decompress(bytes)?;
    let (kind, skip) = match raw.get(..5) {
        Some(b"RDX2\n") | Some(b"RDX3\n") => (ArchiveKind::Workspace, 5),
        Some(m @ (b"RDA2\n" | b"RDA3\n" | b"RDB2\n" | b"RDB3\n")) => {
            return Err(ArchiveError::UnsupportedFormat(
                String::from_utf8_lossy(m).trim().to_string(),
            ))
        }
        _ => (ArchiveKind::Stream, 0),
    };

    let mut reader = Reader::new(raw, opts.expand_altrep);
    reader.skip(skip)?;
    let header = reader.read_header()?;
    let top = reader.read_item()?;
    debug!(?kind, consumed = reader.position(), "parsed archive");

    let objects = match kind {
        ArchiveKind::Stream => vec![(String::new(), top)],
        ArchiveKind::Workspace => match top.value {
            RValue::Pairlist(entries) => entries
                .into_iter()
                .map(|e| (e.tag.unwrap_or_default(), e.value))
                .collect(),
            RValue::Null => Vec::new(),
            _ => {
                return Err(ArchiveError::Malformed(
                    "workspace does not hold a pairlist of objects".into(),
                ))
            }
        },
    };

    Ok(Archive {
        kind,
        header,
        objects,
    })
}

fn decompress(bytes: Vec<u8>) -> Result<Vec<u8>, ArchiveError> {
    let compression = detect_compression(&bytes);
    let mut out = Vec::with_capacity(bytes.len() * 4);
    match compression {
        Compression::None => return Ok(bytes),
        Compression::Gzip => GzDecoder::new(bytes.as_slice()).read_to_end(&mut out)?,
        Compression::Bzip2 => BzDecoder::new(bytes.as_slice()).read_to_end(&mut out)?,
        Compression::Xz => XzDecoder::new(bytes.as_slice()).read_to_end(&mut out)?,
    };
    debug!(?compression, packed = bytes.len(), unpacked = out.len(), "decompressed archive");
    Ok(out)
}

/// Serialize named objects as a workspace (`save()` layout).
pub fn encode_workspace(
    objects: &[(String, RObject)],
    version: FormatVersion,
) -> Result<Vec<u8>, ArchiveError> {
    let magic: &[u8] = match version {
        FormatVersion::V2 => b"RDX2\n",
        FormatVersion::V3 => b"RDX3\n",
    };
    let mut buf = magic.to_vec();
    let mut w = Writer::new(&mut buf, version);
    w.write_header()?;
    let entries = objects
        .iter()
        .map(|(name, obj)| PairlistEntry {
            tag: Some(name.clone()),
            value: obj.clone(),
        })
        .collect();
    w.write_item(&RObject::new(RValue::Pairlist(entries)))?;
    Ok(buf)
}

/// Serialize a single object as a bare stream (`saveRDS()` layout).
pub fn encode_stream(obj: &RObject, version: FormatVersion) -> Result<Vec<u8>, ArchiveError> {
    let mut w = Writer::new(Vec::new(), version);
    w.write_header()?;
    w.write_item(obj)?;
    Ok(w.into_inner())
}

fn write_file(path: &Path, bytes: &[u8], compression: Compression) -> Result<(), ArchiveError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = BufWriter::new(File::create(path)?);
    match compression {
        Compression::None => file.write_all(bytes)?,
        Compression::Gzip => {
            let mut enc = GzEncoder::new(&mut file, flate2::Compression::default());
            enc.write_all(bytes)?;
            enc.finish()?;
        }
        Compression::Bzip2 => {
            let mut enc = BzEncoder::new(&mut file, bzip2::Compression::best());
            enc.write_all(bytes)?;
            enc.finish()?;
        }
        Compression::Xz => {
            // save() compression_level default for xz
            let mut enc = XzEncoder::new(&mut file, 9);
            enc.write_all(bytes)?;
            enc.finish()?;
        }
    }
    file.flush()?;
    Ok(())
}

pub fn save_workspace<P: AsRef<Path>>(
    path: P,
    objects: &[(String, RObject)],
    version: FormatVersion,
    compression: Compression,
) -> Result<(), ArchiveError> {
    write_file(path.as_ref(), &encode_workspace(objects, version)?, compression)
}

pub fn save_stream<P: AsRef<Path>>(
    path: P,
    obj: &RObject,
    version: FormatVersion,
    compression: Compression,
) -> Result<(), ArchiveError> {
    write_file(path.as_ref(), &encode_stream(obj, version)?, compression)
}
