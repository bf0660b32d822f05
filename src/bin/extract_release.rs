use hbcd2reproschema::config::Settings;
use hbcd2reproschema::extract::{extract_release, ExtractError};
use hbcd2reproschema::pipeline::write_report;
use std::{env, path::Path, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

const USAGE: &str = "<ARCHIVE> <VERSION> <OUTPUT_CSV> [REPORT_JSON]";

fn main() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if !(4..=5).contains(&args.len()) {
        let err = ExtractError::Usage(format!("{} {}", args[0], USAGE));
        eprintln!("{}", err);
        exit(err.exit_code());
    }
    let (archive, version, output) = (Path::new(&args[1]), &args[2], Path::new(&args[3]));

    let settings = match Settings::load(None) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit(1);
        }
    };

    match extract_release(archive, version, output, &settings.extract_options()) {
        Ok(extraction) => {
            info!(
                release_key = %extraction.release_key,
                strategy = %extraction.materialize.strategy,
                rows = extraction.output.rows,
                columns = extraction.output.columns,
                "extraction complete"
            );
            if let Some(report) = args.get(4) {
                if let Err(e) = write_report(Path::new(report), &extraction) {
                    eprintln!("Error: {:#}", e);
                    exit(1);
                }
            }
        }
        Err(e) => {
            error!(error = %e, "extraction failed");
            eprintln!("Error: {}", e);
            exit(e.exit_code());
        }
    }
}
