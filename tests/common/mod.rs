#![allow(dead_code)]

use hbcd2reproschema::rdata::altrep::COMPACT_INTSEQ;
use hbcd2reproschema::rdata::types::NA_INTEGER;
use hbcd2reproschema::rdata::{
    save_workspace, sexp, Altrep, Compression, FormatVersion, PairlistEntry, RObject, RValue,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub const COLUMNS: usize = 20;

pub fn init_test_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hbcd2reproschema=debug")),
        )
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

pub fn item_name(i: usize) -> String {
    format!("item_{i:04}")
}

/// Aliases for row `i`: none, an empty vector, one or two values.
pub fn aliases(i: usize) -> RObject {
    match i % 4 {
        0 => RObject::null(),
        1 => RObject::new(RValue::Str(vec![])),
        2 => RObject::strings([format!("alias_{i}")]),
        _ => RObject::strings([format!("alias_{i}_a"), format!("alias_{i}_b")]),
    }
}

/// Expected flattened text of `aliases(i)`.
pub fn aliases_text(i: usize) -> String {
    match i % 4 {
        0 | 1 => "NA".to_string(),
        2 => format!("alias_{i}"),
        _ => format!("alias_{i}_a; alias_{i}_b"),
    }
}

pub fn lazy(class: &str, base_type: u8, state: RObject) -> RObject {
    RObject::new(RValue::Altrep(Box::new(Altrep {
        class: class.into(),
        package: "base".into(),
        base_type,
        state,
    })))
}

/// `first` wrapped the way R wraps a vector it has not copied yet.
pub fn wrapped(first: RObject) -> RObject {
    lazy(
        "wrap_string",
        sexp::STRSXP,
        RObject::new(RValue::Pairlist(vec![
            PairlistEntry {
                tag: None,
                value: first,
            },
            PairlistEntry {
                tag: None,
                value: RObject::new(RValue::Integer(vec![0, 0])),
            },
        ])),
    )
}

pub fn compact_seq(n: usize) -> RObject {
    lazy(
        COMPACT_INTSEQ,
        sexp::INTSXP,
        RObject::new(RValue::Real(vec![n as f64, 1.0, 1.0])),
    )
}

/// A dictionary table of `rows` × `COLUMNS`: `name`, `aliases` (a list
/// column) and numbered text/number columns.
pub fn dictionary_table(rows: usize, lazy_names: bool) -> RObject {
    let names = RObject::strings((0..rows).map(item_name));
    let mut cols = vec![
        (
            "name".to_string(),
            if lazy_names { wrapped(names) } else { names },
        ),
        (
            "aliases".to_string(),
            RObject::new(RValue::List((0..rows).map(aliases).collect())),
        ),
    ];
    for c in 0..COLUMNS - 2 {
        let col = if c % 2 == 0 {
            RObject::new(RValue::Str(
                (0..rows)
                    .map(|i| (i % 7 != 0).then(|| format!("text {c}/{i}")))
                    .collect(),
            ))
        } else {
            RObject::new(RValue::Integer(
                (0..rows)
                    .map(|i| if i % 5 == 0 { NA_INTEGER } else { (i * c) as i32 })
                    .collect(),
            ))
        };
        cols.push((format!("field_{c:02}"), col));
    }
    RObject::named_list(cols)
        .with_attr("class", RObject::strings(["tbl_df", "tbl", "data.frame"]))
        .with_attr(
            "row.names",
            RObject::new(RValue::Integer(vec![NA_INTEGER, -(rows as i32)])),
        )
}

/// `lst_dds`-shaped workspace: datasets → releases → tables.
pub fn write_archive(dir: &Path, releases: Vec<(&str, RObject)>, version: FormatVersion) -> PathBuf {
    write_archive_with(dir, releases, version, Compression::Gzip)
}

pub fn write_archive_with(
    dir: &Path,
    releases: Vec<(&str, RObject)>,
    version: FormatVersion,
    compression: Compression,
) -> PathBuf {
    let releases = RObject::named_list(
        releases
            .into_iter()
            .map(|(k, t)| (k.to_string(), t))
            .collect(),
    );
    let root = RObject::named_list(vec![
        ("abcd".into(), RObject::named_list(vec![])),
        ("hbcd".into(), releases),
    ]);
    let path = dir.join("lst_dds.rda");
    save_workspace(&path, &[("lst_dds".into(), root)], version, compression).unwrap();
    path
}
