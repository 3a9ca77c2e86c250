use std::fmt::Write as _;

use crate::merge::FieldSources;
use crate::types::Config;

/// A fully loaded configuration together with where each value came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The final configuration.
    pub config: Config,
    /// Dotted field path → layer that set it.
    pub field_sources: FieldSources,
    /// Config files that were merged, in load order.
    pub loaded_files: Vec<String>,
}

impl ResolvedConfig {
    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&self.config)
    }

    /// Render the configuration as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.config)
    }

    /// One line per field: `path = layer`, sorted by path.
    #[must_use]
    pub fn sources_report(&self) -> String {
        let mut out = String::new();
        for file in &self.loaded_files {
            let _ = writeln!(out, "# loaded {file}");
        }
        for (field, layer) in &self.field_sources {
            let _ = writeln!(out, "{field} = {layer}");
        }
        out
    }
}
