//! End-to-end conversion run: locate the archive, extract a release to CSV,
//! hand it to the `reproschema` tool and tidy up afterwards.

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::{
    env, fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{error, info, warn};

use crate::config::{ProtocolDescriptor, Settings};
use crate::extract::{self, Extraction};
use crate::fetch::{self, ArchiveSource};

pub const GITHUB_OUTPUT_ENV: &str = "GITHUB_OUTPUT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Release to convert; the newest one in the archive when unset.
    pub release: Option<String>,
    pub skip_extract: bool,
    pub keep_data: bool,
    pub download: bool,
    pub create_tag: bool,
    /// Where to write the JSON extraction report.
    pub report: Option<PathBuf>,
    /// CI output file receiving `version=` and `status=`.
    pub github_output: Option<PathBuf>,
}

impl RunOptions {
    /// CI output file taken from the environment.
    pub fn github_output_from_env() -> Option<PathBuf> {
        env::var_os(GITHUB_OUTPUT_ENV).map(PathBuf::from)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub version: Option<String>,
    pub status: RunStatus,
    pub output_dir: PathBuf,
    pub validated: bool,
}

/// The external `reproschema` command line tool.
#[derive(Debug, Clone)]
pub struct Reproschema {
    pub command: String,
}

impl Reproschema {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// `reproschema nbdc2reproschema --output-path <root> <csv> <yaml>`.
    pub fn convert(&self, output_root: &Path, csv: &Path, protocol_file: &Path) -> Result<()> {
        info!(csv = %csv.display(), "converting to reproschema");
        let status = Command::new(&self.command)
            .arg("nbdc2reproschema")
            .arg("--output-path")
            .arg(output_root)
            .arg(csv)
            .arg(protocol_file)
            .status()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => anyhow!(
                    "{} command not found; install reproschema-py",
                    self.command
                ),
                _ => anyhow!(e).context(format!("running {}", self.command)),
            })?;
        if !status.success() {
            bail!("{} nbdc2reproschema exited with {}", self.command, status);
        }
        Ok(())
    }

    /// `reproschema validate <dir>`. Problems are logged; the result says
    /// whether validation passed.
    pub fn validate(&self, dir: &Path) -> bool {
        info!(dir = %dir.display(), "validating reproschema output");
        match Command::new(&self.command).arg("validate").arg(dir).output() {
            Ok(out) if out.status.success() => {
                info!("validation passed");
                true
            }
            Ok(out) => {
                warn!(
                    stdout = %String::from_utf8_lossy(&out.stdout),
                    stderr = %String::from_utf8_lossy(&out.stderr),
                    "validation reported problems"
                );
                false
            }
            Err(e) => {
                warn!(error = %e, "could not run validation");
                false
            }
        }
    }
}

/// Remove output left by an earlier run.
pub fn prepare_output(output_root: &Path, protocol_name: &str, final_dir: &Path) -> Result<()> {
    for dir in [final_dir.to_path_buf(), output_root.join(protocol_name)] {
        if dir.exists() {
            info!(dir = %dir.display(), "removing previous output");
            fs::remove_dir_all(&dir).with_context(|| format!("removing {}", dir.display()))?;
        }
    }
    Ok(())
}

/// Move the directory the converter named after the protocol to its final
/// name.
pub fn promote_output(output_root: &Path, protocol_name: &str, final_dir: &Path) -> Result<PathBuf> {
    let generated = output_root.join(protocol_name);
    if !generated.is_dir() {
        bail!("expected output directory {} not found", generated.display());
    }
    fs::rename(&generated, final_dir).with_context(|| {
        format!(
            "renaming {} to {}",
            generated.display(),
            final_dir.display()
        )
    })?;
    info!(dir = %final_dir.display(), "conversion output in place");
    Ok(final_dir.to_path_buf())
}

/// Append `version=` and `status=` lines to the CI output file, if any.
pub fn write_github_outputs(path: Option<&Path>, version: Option<&str>, status: RunStatus) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let mut f = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    writeln!(f, "version={}", version.unwrap_or(""))?;
    writeln!(f, "status={}", status.as_str())?;
    Ok(())
}

/// Annotated tag `v<version>` in the current repository.
pub fn create_tag(version: &str) -> Result<()> {
    let tag = format!("v{version}");
    let message = format!("HBCD Release {version}");
    let out = Command::new("git")
        .args(["tag", "-a", tag.as_str(), "-m", message.as_str()])
        .output()
        .context("running git tag")?;
    if !out.status.success() {
        bail!(
            "failed to create tag {tag}: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    info!(tag = %tag, "created tag");
    Ok(())
}

/// Remove the intermediate CSV and a downloaded archive.
pub fn cleanup(csv: &Path, archive: Option<&ArchiveSource>) {
    let mut targets = vec![csv.to_path_buf()];
    if let Some(src) = archive.filter(|a| a.is_downloaded()) {
        targets.push(src.path().to_path_buf());
    }
    for path in targets {
        if path.exists() {
            match fs::remove_file(&path) {
                Ok(()) => info!(path = %path.display(), "removed"),
                Err(e) => warn!(path = %path.display(), error = %e, "cleanup failed"),
            }
        }
    }
}

pub fn csv_path(settings: &Settings, version: &str) -> PathBuf {
    settings
        .paths
        .data_dir
        .join(format!("{}_{}.csv", settings.dataset, version))
}

pub fn write_report(path: &Path, extraction: &Extraction) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let f = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(f, extraction).context("serializing report")?;
    Ok(())
}

/// Run the whole conversion. Cleanup and CI outputs happen whether or not
/// the conversion succeeded.
pub fn run(settings: &Settings, opts: &RunOptions) -> Result<RunSummary> {
    let final_dir = settings.paths.output_root.join(&settings.paths.output_dir);
    let mut archive: Option<ArchiveSource> = None;
    let mut version = opts.release.clone().filter(|v| !v.trim().is_empty());
    let mut csv: Option<PathBuf> = None;

    let result = convert(settings, opts, &final_dir, &mut archive, &mut version, &mut csv);

    let (status, validated) = match &result {
        Ok(validated) => (RunStatus::Complete, *validated),
        Err(e) => {
            error!(error = %format!("{e:#}"), "conversion failed");
            (RunStatus::Failed, false)
        }
    };

    if !opts.keep_data {
        if let Some(csv) = &csv {
            cleanup(csv, archive.as_ref());
        }
    }

    write_github_outputs(opts.github_output.as_deref(), version.as_deref(), status)?;

    if opts.create_tag && status == RunStatus::Complete {
        if let Some(v) = &version {
            if let Err(e) = create_tag(v) {
                warn!(error = %e, "tagging failed");
            }
        }
    }

    result.map(|_| RunSummary {
        version,
        status,
        output_dir: final_dir,
        validated,
    })
}

fn convert(
    settings: &Settings,
    opts: &RunOptions,
    final_dir: &Path,
    archive: &mut Option<ArchiveSource>,
    version: &mut Option<String>,
    csv: &mut Option<PathBuf>,
) -> Result<bool> {
    let extract_opts = settings.extract_options();

    // 1) Archive, unless an existing CSV for a known release is used
    if !opts.skip_extract || version.is_none() {
        *archive = Some(fetch::locate_or_download(settings, opts.download)?);
    }
    if version.is_none() {
        let src = archive
            .as_ref()
            .ok_or_else(|| anyhow!("no archive to detect the release from"))?;
        let latest = extract::latest_release(src.path(), &extract_opts)?
            .ok_or_else(|| anyhow!("no releases of {} in archive", settings.dataset))?;
        info!(release = %latest, "auto-detected release");
        *version = Some(latest);
    }
    let release = version.clone().unwrap_or_default();
    info!(release = %release, "converting HBCD release");

    // 2) Extract
    let csv_path = csv_path(settings, &release);
    *csv = Some(csv_path.clone());
    if opts.skip_extract {
        if !csv_path.is_file() {
            bail!("--skip-extract given but {} does not exist", csv_path.display());
        }
    } else {
        let src = archive
            .as_ref()
            .ok_or_else(|| anyhow!("archive was not located"))?;
        let extraction = extract::extract_release(src.path(), &release, &csv_path, &extract_opts)
            .with_context(|| format!("extracting release {release}"))?;
        if let Some(report) = &opts.report {
            write_report(report, &extraction)?;
        }
    }

    // 3) Convert
    let protocol = ProtocolDescriptor::load(&settings.paths.protocol_file)?;
    let output_root = &settings.paths.output_root;
    prepare_output(output_root, &protocol.protocol_name, final_dir)?;
    let tool = Reproschema::new(&settings.reproschema.command);
    tool.convert(output_root, &csv_path, &settings.paths.protocol_file)?;
    let out = promote_output(output_root, &protocol.protocol_name, final_dir)?;

    // 4) Validate; not fatal
    Ok(tool.validate(&out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn github_outputs_are_appended() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outputs");
        fs::write(&path, "other=1\n").unwrap();
        write_github_outputs(Some(&path), Some("1.0"), RunStatus::Complete).unwrap();
        write_github_outputs(Some(&path), None, RunStatus::Failed).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "other=1\nversion=1.0\nstatus=complete\nversion=\nstatus=failed\n"
        );
        assert!(write_github_outputs(None, None, RunStatus::Failed).is_ok());
    }

    #[test]
    fn output_is_prepared_and_promoted() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let final_dir = root.join("HBCD2reproschema");
        fs::create_dir_all(final_dir.join("stale")).unwrap();
        fs::create_dir_all(root.join("HBCD/activities")).unwrap();
        prepare_output(root, "HBCD", &final_dir).unwrap();
        assert!(!final_dir.exists());
        assert!(!root.join("HBCD").exists());

        assert!(promote_output(root, "HBCD", &final_dir).is_err());
        fs::create_dir_all(root.join("HBCD/activities")).unwrap();
        let out = promote_output(root, "HBCD", &final_dir).unwrap();
        assert!(out.join("activities").is_dir());
        assert!(!root.join("HBCD").exists());
    }

    #[test]
    fn cleanup_keeps_local_archives() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("hbcd_1.0.csv");
        let local = dir.path().join("local.rda");
        let downloaded = dir.path().join("downloaded.rda");
        for p in [&csv, &local, &downloaded] {
            fs::write(p, b"x").unwrap();
        }
        cleanup(&csv, Some(&ArchiveSource::Local(local.clone())));
        assert!(!csv.exists());
        assert!(local.exists());
        cleanup(&csv, Some(&ArchiveSource::Downloaded(downloaded.clone())));
        assert!(!downloaded.exists());
    }

    #[test]
    fn forced_download_leaves_local_copy_alone() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("lst_dds.rda");
        fs::write(&local, b"local").unwrap();

        let target = crate::fetch::download::unused_path(dir.path(), "lst_dds.rda");
        assert_ne!(target, local);
        fs::write(&target, b"downloaded").unwrap();

        cleanup(
            &dir.path().join("hbcd_1.0.csv"),
            Some(&ArchiveSource::Downloaded(target.clone())),
        );
        assert!(!target.exists());
        assert_eq!(fs::read(&local).unwrap(), b"local");
    }

    #[test]
    fn missing_tool_is_an_error() {
        let dir = tempdir().unwrap();
        let tool = Reproschema::new("reproschema-definitely-not-installed");
        let err = tool
            .convert(dir.path(), &dir.path().join("a.csv"), &dir.path().join("p.yaml"))
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(!tool.validate(dir.path()));
    }

    #[test]
    fn csv_path_uses_dataset_and_version() {
        let s = Settings::default();
        assert_eq!(csv_path(&s, "1.0"), PathBuf::from("data/hbcd_1.0.csv"));
    }
}
