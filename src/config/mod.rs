// src/config/mod.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::extract::{
    strategy::DEFAULT_CHUNK_ROWS, Capabilities, ExtractOptions, FlattenOptions, DEFAULT_DATASET,
    DEFAULT_ID_COLUMN, LIST_DELIMITER, NULL_MARKER,
};

pub const DEFAULT_CONFIG_FILE: &str = "hbcd2reproschema.yaml";

/// Run settings. Every field has a default, so an absent or partial file is
/// fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dataset: String,
    /// Workspace object holding the dataset mapping.
    pub object: Option<String>,
    pub id_column: String,
    pub null_marker: String,
    pub list_delimiter: String,
    pub chunk_rows: usize,
    pub capabilities: Capabilities,
    pub source: SourceSettings,
    pub paths: PathSettings,
    pub reproschema: ReproschemaSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            object: None,
            id_column: DEFAULT_ID_COLUMN.to_string(),
            null_marker: NULL_MARKER.to_string(),
            list_delimiter: LIST_DELIMITER.to_string(),
            chunk_rows: DEFAULT_CHUNK_ROWS,
            capabilities: Capabilities::default(),
            source: SourceSettings::default(),
            paths: PathSettings::default(),
            reproschema: ReproschemaSettings::default(),
        }
    }
}

/// Where the dictionary archive comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// `owner/name` of the repository publishing the archive.
    pub repo: String,
    pub branch: String,
    pub file_name: String,
    pub timeout_secs: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            repo: "nbdc-datahub/NBDCtoolsData".to_string(),
            branch: "main".to_string(),
            file_name: "lst_dds.rda".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub data_dir: PathBuf,
    /// Local checkouts searched for the archive before downloading.
    pub checkouts: Vec<PathBuf>,
    pub output_root: PathBuf,
    pub output_dir: String,
    pub protocol_file: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            checkouts: vec![PathBuf::from("NBDCtoolsData"), PathBuf::from("../NBDCtoolsData")],
            output_root: PathBuf::from("."),
            output_dir: "HBCD2reproschema".to_string(),
            protocol_file: PathBuf::from("hbcd_nbdc2rs.yaml"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReproschemaSettings {
    /// The `reproschema` executable.
    pub command: String,
}

impl Default for ReproschemaSettings {
    fn default() -> Self {
        Self {
            command: "reproschema".to_string(),
        }
    }
}

impl Settings {
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).context("parsing settings YAML")
    }

    /// Read `path`. A missing file is only an error when it was asked for
    /// explicitly; otherwise defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        if !path.exists() && !explicit {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading settings {}", path.display()))?;
        let settings = Self::from_yaml(&text)?;
        info!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            dataset: self.dataset.clone(),
            object: self.object.clone(),
            capabilities: self.capabilities,
            capabilities_override: Capabilities::env_override(),
            chunk_rows: self.chunk_rows,
            flatten: FlattenOptions {
                delimiter: self.list_delimiter.clone(),
                null_marker: self.null_marker.clone(),
            },
            id_column: self.id_column.clone(),
            scratch_dir: None,
        }
    }

    /// Raw URL of the archive in the source repository.
    pub fn archive_url(&self) -> String {
        format!(
            "https://raw.githubusercontent.com/{}/{}/data/{}",
            self.source.repo, self.source.branch, self.source.file_name
        )
    }
}

/// The part of the conversion descriptor this tool needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProtocolDescriptor {
    pub protocol_name: String,
}

impl ProtocolDescriptor {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading protocol descriptor {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("parsing protocol descriptor {}", path.display()))
    }
}
