// src/extract/lookup.rs

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::ExtractError;
use crate::rdata::{RObject, RValue};

static TRAILING_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)*)$").expect("version regex should be valid"));

/// `(name, value)` pairs of a named list or tagged pairlist.
pub fn named_entries(obj: &RObject) -> Option<Vec<(String, &RObject)>> {
    match &obj.value {
        RValue::List(items) => {
            let names = obj.names()?;
            Some(names.into_iter().zip(items.iter()).collect())
        }
        RValue::Pairlist(entries) => Some(
            entries
                .iter()
                .map(|e| (e.tag.clone().unwrap_or_default(), &e.value))
                .collect(),
        ),
        _ => None,
    }
}

fn keys(obj: &RObject) -> Vec<String> {
    named_entries(obj)
        .map(|entries| entries.into_iter().map(|(k, _)| k).collect())
        .unwrap_or_default()
}

/// The release mapping stored under `dataset`.
pub fn dataset<'a>(root: &'a RObject, dataset: &str) -> Result<&'a RObject, ExtractError> {
    named_entries(root)
        .and_then(|entries| {
            entries
                .into_iter()
                .find(|(k, _)| k == dataset)
                .map(|(_, v)| v)
        })
        .ok_or_else(|| ExtractError::DatasetNotFound {
            dataset: dataset.to_string(),
            available: keys(root),
        })
}

/// Keys tried for `version`, in order: the literal string, then
/// `<dataset>_<version>`.
pub fn release_candidates(dataset: &str, version: &str) -> [String; 2] {
    [version.to_string(), format!("{dataset}_{version}")]
}

pub fn release_keys(releases: &RObject) -> Vec<String> {
    keys(releases)
}

/// Resolve `version` to a release key and its table.
pub fn release<'a>(
    releases: &'a RObject,
    dataset: &str,
    version: &str,
) -> Result<(String, &'a RObject), ExtractError> {
    let entries = named_entries(releases).unwrap_or_default();
    let tried = release_candidates(dataset, version);
    for candidate in &tried {
        debug!(candidate = %candidate, "trying release key");
        if let Some((key, table)) = entries.iter().find(|(k, _)| k == candidate) {
            return Ok((key.clone(), *table));
        }
    }
    Err(ExtractError::ReleaseNotFound {
        dataset: dataset.to_string(),
        version: version.to_string(),
        tried: tried.to_vec(),
        available: entries.into_iter().map(|(k, _)| k).collect(),
    })
}

fn parse_version(v: &str) -> Vec<u64> {
    v.split('.').filter_map(|p| p.parse().ok()).collect()
}

/// Highest release version among `keys`, with any `<dataset>_` prefix
/// stripped. Keys without a trailing version number are ignored.
pub fn latest_release(keys: &[String], dataset: &str) -> Option<String> {
    let prefix = format!("{dataset}_");
    keys.iter()
        .filter_map(|k| {
            let bare = k.strip_prefix(&prefix).unwrap_or(k);
            let caps = TRAILING_VERSION.captures(bare)?;
            let version = caps.get(1)?.as_str();
            (version == bare).then(|| version.to_string())
        })
        .max_by(|a, b| parse_version(a).cmp(&parse_version(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn releases(keys: &[&str]) -> RObject {
        RObject::named_list(
            keys.iter()
                .map(|k| (k.to_string(), RObject::strings([*k])))
                .collect(),
        )
    }

    #[test]
    fn literal_key_wins_over_prefixed() {
        let r = releases(&["hbcd_1.0", "1.0"]);
        let (key, _) = release(&r, "hbcd", "1.0").unwrap();
        assert_eq!(key, "1.0");
    }

    #[test]
    fn falls_back_to_prefixed_key() {
        let r = releases(&["hbcd_1.0"]);
        let (key, table) = release(&r, "hbcd", "1.0").unwrap();
        assert_eq!(key, "hbcd_1.0");
        assert_eq!(table, &RObject::strings(["hbcd_1.0"]));
    }

    #[test]
    fn missing_release_lists_what_exists() {
        let r = releases(&["1.0", "hbcd_1.0"]);
        match release(&r, "hbcd", "9.9") {
            Err(ExtractError::ReleaseNotFound {
                tried, available, ..
            }) => {
                assert_eq!(tried, vec!["9.9", "hbcd_9.9"]);
                assert_eq!(available, vec!["1.0", "hbcd_1.0"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_dataset_lists_what_exists() {
        let root = RObject::named_list(vec![
            ("abcd".into(), releases(&["6.0"])),
            ("hbcd".into(), releases(&["1.0"])),
        ]);
        assert!(dataset(&root, "hbcd").is_ok());
        match dataset(&root, "nope") {
            Err(ExtractError::DatasetNotFound { available, .. }) => {
                assert_eq!(available, vec!["abcd", "hbcd"])
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn latest_release_compares_numerically() {
        let keys: Vec<String> = ["hbcd_1.0", "1.2", "hbcd_1.10", "draft"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(latest_release(&keys, "hbcd").as_deref(), Some("1.10"));
        assert_eq!(latest_release(&[], "hbcd"), None);
    }
}
