use serde::{Deserialize, Serialize};
use std::env;
use tracing::info;

/// Overrides the configured capabilities, e.g. `HBCD_CAPABILITIES=altrep`
/// or `HBCD_CAPABILITIES=none`.
pub const CAPABILITIES_ENV: &str = "HBCD_CAPABILITIES";

/// Optional helpers available to the current environment.
///
/// Detected once, before the archive is loaded: `altrep` changes how the
/// archive is read, so turning it on afterwards does not repair an object that
/// was already loaded lazily.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// The ALTREP class registry is loaded; known lazy vectors are realized
    /// while reading.
    pub altrep: bool,
    /// The lazy-collect helper is available to the fallback chain.
    pub collect: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::all()
    }
}

impl Capabilities {
    pub const fn all() -> Self {
        Self {
            altrep: true,
            collect: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            altrep: false,
            collect: false,
        }
    }

    /// Parse a comma-separated list such as `altrep,collect`, `all` or `none`.
    /// Unknown names are ignored.
    pub fn parse_list(list: &str) -> Self {
        let mut caps = Self::none();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match name.to_ascii_lowercase().as_str() {
                "all" => caps = Self::all(),
                "none" => caps = Self::none(),
                "altrep" => caps.altrep = true,
                "collect" => caps.collect = true,
                _ => {}
            }
        }
        caps
    }

    /// Value of `HBCD_CAPABILITIES`, if set.
    pub fn env_override() -> Option<String> {
        env::var(CAPABILITIES_ENV).ok()
    }

    /// The override list when given, otherwise the configured value.
    pub fn detect_with(override_list: Option<&str>, configured: Capabilities) -> Self {
        let caps = match override_list {
            Some(list) => Self::parse_list(list),
            None => configured,
        };
        info!(
            altrep = caps.altrep,
            collect = caps.collect,
            overridden = override_list.is_some(),
            "detected capabilities"
        );
        caps
    }
}
