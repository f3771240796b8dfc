use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Background mode entry that declares the location capability
const LOCATION_BACKGROUND_MODE: &str = "location";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
/// The location related keys of the app's metadata, named after their Info.plist keys
pub struct UsageConfig {
    /// Message shown when asking for always (foreground + background) access
    #[serde(
        rename = "NSLocationAlwaysUsageDescription",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub always_usage_description: Option<String>,
    /// Message shown when asking for foreground only access
    #[serde(
        rename = "NSLocationWhenInUseUsageDescription",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub when_in_use_usage_description: Option<String>,
    /// Declared background capabilities
    #[serde(rename = "UIBackgroundModes", default)]
    pub background_modes: Vec<String>,
}

fn present(desc: &Option<String>) -> bool {
    desc.as_deref().is_some_and(|s| !s.trim().is_empty())
}

impl UsageConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse location usage config")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn has_always_usage(&self) -> bool {
        present(&self.always_usage_description)
    }

    pub fn has_when_in_use_usage(&self) -> bool {
        present(&self.when_in_use_usage_description)
    }

    pub fn has_background_location(&self) -> bool {
        self.background_modes
            .iter()
            .any(|m| m == LOCATION_BACKGROUND_MODE)
    }
}
