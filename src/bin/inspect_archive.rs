use hbcd2reproschema::extract::lookup::named_entries;
use hbcd2reproschema::extract::Table;
use hbcd2reproschema::rdata::{load_archive, sexp, Archive, LoadOptions, RObject, RValue};
use std::{env, path::Path, process::exit};

fn main() {
    // Expect exactly one CLI argument: path to an .rda/.rds file.
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <ARCHIVE>", args[0]);
        exit(1);
    }
    if let Err(e) = inspect_archive(Path::new(&args[1])) {
        eprintln!("Error: {}", e);
        exit(1);
    }
}

/// Load the archive without realizing lazy vectors and print every dataset,
/// release and declared table shape.
fn inspect_archive(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    // 1) Load as-is, so lazy columns show up as such
    let archive = load_archive(path, LoadOptions::default())?;
    let file_size_disk = std::fs::metadata(path)?.len();

    // 2) File-level metadata
    println!("=== Archive: {} ===", path.display());
    print_header(&archive);
    println!("File-size on disk:    {} bytes", file_size_disk);
    println!();

    // 3) Objects → datasets → releases
    for (name, obj) in &archive.objects {
        let label = if name.is_empty() { "<stream>" } else { name };
        println!("=== Object {} ({}) ===", label, describe(obj));
        match named_entries(obj) {
            Some(datasets) => {
                for (dataset, releases) in datasets {
                    println!("+ {} ({})", dataset, describe(releases));
                    for (key, table) in named_entries(releases).unwrap_or_default() {
                        print_release(&key, table);
                    }
                }
            }
            None => println!("  (not a named collection)"),
        }
        println!();
    }
    Ok(())
}

fn print_header(archive: &Archive) {
    let h = &archive.header;
    println!("Kind:                 {:?}", archive.kind);
    println!("Format version:       {}", h.version);
    println!("Written by R:         {}", r_version(h.writer_version));
    println!("Min reader R:         {}", r_version(h.min_reader_version));
    if let Some(enc) = &h.native_encoding {
        println!("Native encoding:      {}", enc);
    }
}

fn r_version(v: i32) -> String {
    format!("{}.{}.{}", v / 65536, (v / 256) % 256, v % 256)
}

fn describe(obj: &RObject) -> String {
    let class = obj.class();
    let kind = match &obj.value {
        RValue::Altrep(a) => format!("lazy {} ({})", a.class, sexp::type_name(a.base_type)),
        _ => obj
            .vector_kind()
            .map(|k| sexp::type_name(k.sexp_type()).to_string())
            .unwrap_or_else(|| "other".to_string()),
    };
    if class.is_empty() {
        kind
    } else {
        format!("{} [{}]", kind, class.join(", "))
    }
}

/// One release line plus its columns.
fn print_release(key: &str, obj: &RObject) {
    let table = match Table::from_object(obj.clone()) {
        Ok(t) => t,
        Err(e) => {
            println!("  - {:<20} | not a table: {}", key, e);
            return;
        }
    };
    let flag = if table.is_materialized() {
        ""
    } else {
        "  ** NOT MATERIALIZED **"
    };
    println!(
        "  - {:<20} | rows: {:>7} | cols: {:>4} | first column realized: {}{}",
        key,
        table.declared_rows,
        table.declared_cols(),
        table
            .first_realized_len()
            .map_or("-".to_string(), |n| n.to_string()),
        flag
    );
    for (name, col) in table.names.iter().zip(table.columns()) {
        println!("      • {:<30} {:>7}  {}", name, col.len(), describe(col));
    }
}
