use anyhow::{Context, Result};
use reqwest::blocking::Client;
use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::info;
use url::Url;

/// Blocking client with the given request timeout.
pub fn client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("building HTTP client")
}

/// `dest_dir/filename`, or `stem.N.ext` with the first free `N` when a file
/// of that name already exists.
pub fn unused_path(dest_dir: &Path, filename: &str) -> PathBuf {
    let path = dest_dir.join(filename);
    if !path.exists() {
        return path;
    }
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (filename, None),
    };
    let mut n = 1;
    loop {
        let name = match ext {
            Some(ext) => format!("{stem}.{n}.{ext}"),
            None => format!("{stem}.{n}"),
        };
        let path = dest_dir.join(name);
        if !path.exists() {
            return path;
        }
        n += 1;
    }
}

/// Download `url_str` into `dest_dir`, keeping the URL's file name unless a
/// file of that name is already there. Returns the full path of the saved
/// file.
pub fn download_file(client: &Client, url_str: &str, dest_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dest_dir = dest_dir.as_ref();
    let url = Url::parse(url_str)?;
    let filename = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("download.rda");
    fs::create_dir_all(dest_dir)?;
    let dest_path = unused_path(dest_dir, filename);

    let start = Instant::now();
    let resp = client
        .get(url.as_str())
        .send()
        .with_context(|| format!("requesting {url}"))?
        .error_for_status()?;
    let bytes = resp.bytes()?;

    // write next to the target, then rename into place
    let tmp_path = dest_dir.join(format!(".{filename}.tmp"));
    fs::write(&tmp_path, &bytes).with_context(|| format!("writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, &dest_path)?;

    info!(
        path = %dest_path.display(),
        bytes = bytes.len(),
        elapsed = ?start.elapsed(),
        "downloaded"
    );
    Ok(dest_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn existing_files_are_not_replaced() {
        let dir = tempdir().unwrap();
        assert_eq!(unused_path(dir.path(), "lst_dds.rda"), dir.path().join("lst_dds.rda"));

        fs::write(dir.path().join("lst_dds.rda"), b"local").unwrap();
        assert_eq!(unused_path(dir.path(), "lst_dds.rda"), dir.path().join("lst_dds.1.rda"));

        fs::write(dir.path().join("lst_dds.1.rda"), b"older").unwrap();
        assert_eq!(unused_path(dir.path(), "lst_dds.rda"), dir.path().join("lst_dds.2.rda"));

        fs::write(dir.path().join("README"), b"x").unwrap();
        assert_eq!(unused_path(dir.path(), "README"), dir.path().join("README.1"));
    }
}
