// src/fetch/mod.rs

pub mod download;

use anyhow::Result;
use glob::glob;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Settings;

/// Where a located archive came from; downloaded copies are removed on
/// cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    Local(PathBuf),
    Downloaded(PathBuf),
}

impl ArchiveSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Local(p) | Self::Downloaded(p) => p,
        }
    }

    pub fn is_downloaded(&self) -> bool {
        matches!(self, Self::Downloaded(_))
    }
}

/// Paths checked for the archive, in order: each checkout's `data/`, then
/// the data directory.
pub fn candidate_paths(settings: &Settings) -> Vec<PathBuf> {
    let file = &settings.source.file_name;
    settings
        .paths
        .checkouts
        .iter()
        .map(|c| c.join("data").join(file))
        .chain(std::iter::once(settings.paths.data_dir.join(file)))
        .collect()
}

/// First existing candidate, or any copy of the file below the data
/// directory.
pub fn find_archive(settings: &Settings) -> Option<PathBuf> {
    for path in candidate_paths(settings) {
        debug!(path = %path.display(), "checking for archive");
        if path.is_file() {
            return Some(path);
        }
    }
    let pattern = format!(
        "{}/**/{}",
        settings.paths.data_dir.display(),
        settings.source.file_name
    );
    glob(&pattern)
        .ok()?
        .filter_map(Result::ok)
        .find(|p| p.is_file())
}

/// Use a local archive unless `force_download` is set or none exists.
pub fn locate_or_download(settings: &Settings, force_download: bool) -> Result<ArchiveSource> {
    if !force_download {
        if let Some(path) = find_archive(settings) {
            info!(path = %path.display(), "using local archive");
            return Ok(ArchiveSource::Local(path));
        }
    }
    let url = settings.archive_url();
    info!(url = %url, "downloading archive");
    let client = download::client(settings.source.timeout_secs)?;
    let path = download::download_file(&client, &url, &settings.paths.data_dir)?;
    Ok(ArchiveSource::Downloaded(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn settings(root: &Path) -> Settings {
        let mut s = Settings::default();
        s.paths.data_dir = root.join("data");
        s.paths.checkouts = vec![root.join("NBDCtoolsData")];
        s
    }

    #[test]
    fn checkout_wins_over_data_dir() {
        let dir = tempdir().unwrap();
        let s = settings(dir.path());
        let checkout = dir.path().join("NBDCtoolsData/data/lst_dds.rda");
        let local = dir.path().join("data/lst_dds.rda");
        fs::create_dir_all(checkout.parent().unwrap()).unwrap();
        fs::create_dir_all(local.parent().unwrap()).unwrap();
        fs::write(&local, b"x").unwrap();
        assert_eq!(find_archive(&s), Some(local.clone()));
        fs::write(&checkout, b"x").unwrap();
        assert_eq!(find_archive(&s), Some(checkout));
    }

    #[test]
    fn nested_copies_are_found() {
        let dir = tempdir().unwrap();
        let s = settings(dir.path());
        let nested = dir.path().join("data/cache/lst_dds.rda");
        fs::create_dir_all(nested.parent().unwrap()).unwrap();
        fs::write(&nested, b"x").unwrap();
        assert_eq!(find_archive(&s), Some(nested));
    }

    #[test]
    fn nothing_found() {
        let dir = tempdir().unwrap();
        assert_eq!(find_archive(&settings(dir.path())), None);
        assert_eq!(candidate_paths(&settings(dir.path())).len(), 2);
    }
}
