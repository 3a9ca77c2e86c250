//! Core plugin types: ids, strategies and resolved descriptors.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};
use crate::options::PluginOptions;

/// Stable logical plugin identifier, e.g. `"naive-plugin"`.
///
/// Ids must be non-empty and contain only lowercase ASCII letters, digits,
/// `-`, `_` and `.`. They may not start with `-` or `.`, which keeps them
/// usable as file names in the staging directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PluginId(String);

impl<'de> Deserialize<'de> for PluginId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl PluginId {
    /// Create a new `PluginId`, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidId`] if the id is empty or malformed.
    pub fn new(id: impl Into<String>) -> PluginResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create a `PluginId` without validation (for tests and constants).
    #[must_use]
    pub fn from_static(id: &str) -> Self {
        Self(id.to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> PluginResult<()> {
        if id.is_empty() {
            return Err(PluginError::InvalidId("plugin id must not be empty".into()));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
        {
            return Err(PluginError::InvalidId(format!(
                "plugin id may only contain lowercase letters, digits, '-', '_' and '.', got: {id}"
            )));
        }
        if id.starts_with(['-', '.']) {
            return Err(PluginError::InvalidId(format!(
                "plugin id must not start with '-' or '.', got: {id}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PluginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// How an executable was located, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Metadata path under the package's native library directory.
    Direct,
    /// Path returned by a call into the owning package.
    Delegated,
    /// Entries copied into the staging directory.
    Streamed,
}

impl ResolutionStrategy {
    /// All strategies in the order they are attempted.
    pub const ORDERED: [Self; 3] = [Self::Direct, Self::Delegated, Self::Streamed];
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Delegated => "delegated",
            Self::Streamed => "streamed",
        })
    }
}

/// A resolved, verified plugin executable. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    /// Logical plugin id.
    pub id: PluginId,
    /// Capability version advertised by the provider.
    pub version: u32,
    /// Absolute executable path.
    pub path: PathBuf,
    /// Strategy that produced `path`.
    pub strategy: ResolutionStrategy,
    /// Options the plugin was resolved with.
    pub options: PluginOptions,
}

/// Alias kept for callers that think of a descriptor as "executable info".
pub type ExecutableInfo = PluginDescriptor;

impl PluginDescriptor {
    /// Whether the provider speaks the second plugin protocol revision.
    #[must_use]
    pub fn is_v2(&self) -> bool {
        self.version >= 2
    }
}

/// Capability version from a metadata version string: the text before the
/// first `.`, parsed as an integer. Absent or unparsable yields 0.
#[must_use]
pub fn capability_version(raw: Option<&str>) -> u32 {
    raw.and_then(|v| v.split('.').next())
        .and_then(|major| major.trim().parse().ok())
        .unwrap_or(0)
}
