mod common;

use common::*;
use csv::ReaderBuilder;
use hbcd2reproschema::extract::{
    extract_release, Capabilities, ExtractError, ExtractOptions, Outcome,
};
use hbcd2reproschema::rdata::types::NA_INTEGER;
use hbcd2reproschema::rdata::{
    load_archive, Compression, FormatVersion, LoadOptions, RObject, RValue,
};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut rdr = ReaderBuilder::new().from_path(path).unwrap();
    let headers = rdr.headers().unwrap().iter().map(str::to_string).collect();
    let rows = rdr
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();
    (headers, rows)
}

#[test]
fn extracts_release_with_list_column() {
    init_test_logging();
    let dir = tempdir().unwrap();
    let archive = write_archive(
        dir.path(),
        vec![("hbcd_1.0", dictionary_table(500, false))],
        FormatVersion::V3,
    );
    let out = dir.path().join("data/hbcd_1.0.csv");

    let result = extract_release(&archive, "1.0", &out, &ExtractOptions::default()).unwrap();
    assert_eq!(result.release_key, "hbcd_1.0");
    assert_eq!(result.materialize.strategy, "standard");
    assert_eq!(result.output.rows, 500);
    assert!(result.verification.as_ref().unwrap().ok);

    let (headers, rows) = read_csv(&out);
    assert_eq!(headers.len(), COLUMNS);
    assert_eq!(headers[0], "name");
    assert_eq!(rows.len(), 500);
    let aliases = headers.iter().position(|h| h == "aliases").unwrap();
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row[0], item_name(i));
        assert_eq!(row[aliases], aliases_text(i), "row {i}");
        assert!(row[aliases] == "NA" || !row[aliases].is_empty());
    }
    // integer column with NA every fifth row
    assert_eq!(rows[0][3], "NA");
    assert_eq!(rows[6][3], "6");
}

#[test]
fn extracts_from_bzip2_and_xz_archives() {
    init_test_logging();
    for compression in [Compression::Bzip2, Compression::Xz] {
        let dir = tempdir().unwrap();
        let archive = write_archive_with(
            dir.path(),
            vec![("1.0", dictionary_table(5, false))],
            FormatVersion::V2,
            compression,
        );
        let out = dir.path().join("hbcd_1.0.csv");

        let run = extract_release(&archive, "1.0", &out, &ExtractOptions::default())
            .unwrap_or_else(|e| panic!("{compression:?}: {e}"));
        assert_eq!(run.output.rows, 5);
        let (headers, rows) = read_csv(&out);
        assert_eq!(headers.len(), COLUMNS);
        assert_eq!(rows[4][0], item_name(4));
    }
}

#[test]
fn unknown_release_fails_without_output() {
    init_test_logging();
    let dir = tempdir().unwrap();
    let archive = write_archive(
        dir.path(),
        vec![
            ("1.0", dictionary_table(3, false)),
            ("hbcd_1.0", dictionary_table(3, false)),
        ],
        FormatVersion::V2,
    );
    let out = dir.path().join("hbcd_9.9.csv");

    match extract_release(&archive, "9.9", &out, &ExtractOptions::default()) {
        Err(e @ ExtractError::ReleaseNotFound { .. }) => {
            assert_eq!(e.exit_code(), 1);
            let msg = e.to_string();
            assert!(msg.contains("9.9, hbcd_9.9"));
            assert!(msg.contains("1.0, hbcd_1.0"));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(!out.exists());

    let status = Command::new(env!("CARGO_BIN_EXE_extract_release"))
        .arg(&archive)
        .arg("9.9")
        .arg(&out)
        .env_remove("HBCD_CAPABILITIES")
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
    assert!(!out.exists());
}

#[test]
fn missing_arguments_exit_with_usage() {
    let output = Command::new(env!("CARGO_BIN_EXE_extract_release"))
        .arg("only-one")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("usage"));
}

#[test]
fn lazy_first_column_is_recovered_by_round_trip() {
    init_test_logging();
    let dir = tempdir().unwrap();
    let clean_dir = dir.path().join("clean");
    let lazy_dir = dir.path().join("lazy");
    fs::create_dir_all(&clean_dir).unwrap();
    fs::create_dir_all(&lazy_dir).unwrap();

    let clean = write_archive(
        &clean_dir,
        vec![("1.0", dictionary_table(1000, false))],
        FormatVersion::V3,
    );
    let defective = write_archive(
        &lazy_dir,
        vec![("1.0", dictionary_table(1000, true))],
        FormatVersion::V3,
    );

    let opts = ExtractOptions {
        capabilities: Capabilities::none(),
        scratch_dir: Some(dir.path().to_path_buf()),
        ..ExtractOptions::default()
    };
    let clean_out = dir.path().join("clean.csv");
    let lazy_out = dir.path().join("lazy.csv");
    let clean_run = extract_release(&clean, "1.0", &clean_out, &opts).unwrap();
    let lazy_run = extract_release(&defective, "1.0", &lazy_out, &opts).unwrap();

    assert_eq!(clean_run.materialize.strategy, "standard");
    assert_eq!(lazy_run.materialize.realized_rows, Some(0));
    assert_eq!(lazy_run.materialize.declared_rows, 1000);
    assert_eq!(lazy_run.materialize.strategy, "round_trip");
    let outcomes: Vec<(&str, &Outcome)> = lazy_run
        .materialize
        .attempts
        .iter()
        .map(|a| (a.strategy.as_str(), &a.outcome))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("direct", &Outcome::Mismatch { realized: 0 }),
            ("round_trip", &Outcome::Materialized { realized: 1000 }),
        ]
    );

    assert_eq!(fs::read(&clean_out).unwrap(), fs::read(&lazy_out).unwrap());
    let (_, rows) = read_csv(&lazy_out);
    assert_eq!(rows.len(), 1000);
}

#[test]
fn capability_at_load_time_avoids_the_fallbacks() {
    init_test_logging();
    let dir = tempdir().unwrap();
    let archive = write_archive(
        dir.path(),
        vec![("1.0", dictionary_table(50, true))],
        FormatVersion::V3,
    );
    let out = dir.path().join("out.csv");
    let opts = ExtractOptions {
        capabilities: Capabilities::all(),
        ..ExtractOptions::default()
    };
    let run = extract_release(&archive, "1.0", &out, &opts).unwrap();
    assert_eq!(run.materialize.strategy, "standard");
    assert!(run.materialize.attempts.is_empty());
}

#[test]
fn corrupt_sequence_length_fails_the_release() {
    init_test_logging();
    let dir = tempdir().unwrap();
    let table = RObject::named_list(vec![
        ("id".into(), compact_seq(1 << 40)),
        ("name".into(), RObject::strings((0..5).map(item_name))),
    ])
    .with_attr("class", RObject::strings(["data.frame"]))
    .with_attr("row.names", RObject::new(RValue::Integer(vec![NA_INTEGER, -5])));
    let archive = write_archive(dir.path(), vec![("1.0", table)], FormatVersion::V3);

    // expanding at load time fails and leaves the column lazy
    let loaded = load_archive(&archive, LoadOptions { expand_altrep: true }).unwrap();
    assert_eq!(loaded.object_names(), vec!["lst_dds"]);

    let out = dir.path().join("out.csv");
    let opts = ExtractOptions {
        capabilities: Capabilities::all(),
        ..ExtractOptions::default()
    };
    match extract_release(&archive, "1.0", &out, &opts) {
        Err(e @ ExtractError::Materialization { .. }) => assert_eq!(e.exit_code(), 1),
        other => panic!("unexpected: {other:?}"),
    }
    assert!(!out.exists());
}

#[test]
fn capability_override_replaces_configured_value() {
    init_test_logging();
    let dir = tempdir().unwrap();
    let archive = write_archive(
        dir.path(),
        vec![("1.0", dictionary_table(20, true))],
        FormatVersion::V3,
    );
    let out = dir.path().join("out.csv");
    let opts = ExtractOptions {
        capabilities: Capabilities::all(),
        capabilities_override: Some("none".into()),
        ..ExtractOptions::default()
    };
    let run = extract_release(&archive, "1.0", &out, &opts).unwrap();
    assert_eq!(run.materialize.strategy, "round_trip");
}

#[test]
fn report_serializes_attempts() {
    init_test_logging();
    let dir = tempdir().unwrap();
    let archive = write_archive(
        dir.path(),
        vec![("1.0", dictionary_table(10, true))],
        FormatVersion::V3,
    );
    let out = dir.path().join("out.csv");
    let opts = ExtractOptions {
        capabilities: Capabilities::none(),
        ..ExtractOptions::default()
    };
    let run = extract_release(&archive, "1.0", &out, &opts).unwrap();
    let json = serde_json::to_value(&run).unwrap();
    assert_eq!(json["materialize"]["strategy"], "round_trip");
    assert_eq!(json["materialize"]["attempts"][0]["strategy"], "direct");
    assert_eq!(json["materialize"]["attempts"][0]["outcome"], "mismatch");
    assert_eq!(json["output"]["rows"], 10);
}
