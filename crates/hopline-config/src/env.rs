//! `HOPLINE_*` environment fallbacks.
//!
//! Environment variables only fill fields that no config file set. They never
//! override a value that came from a file.

use std::collections::HashMap;

use tracing::debug;

use crate::merge::{ConfigLayer, FieldSources};

/// Environment variable → dotted config field it falls back for.
const ENV_FALLBACKS: &[(&str, &str)] = &[
    ("HOPLINE_DATA_DIR", "paths.data_dir"),
    ("HOPLINE_PACKAGES_DIR", "plugins.packages_dir"),
    ("HOPLINE_LOG_LEVEL", "logging.level"),
    ("HOPLINE_ROOT_CA", "trust.root_ca_provider"),
];

/// Collect the `HOPLINE_*` variables from the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("HOPLINE_"))
        .collect()
}

/// Apply environment fallbacks to `merged`, skipping fields a file layer set.
///
/// Returns the number of fields filled from the environment.
pub fn apply_env_fallbacks(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String>,
) -> usize {
    let mut applied = 0usize;
    for (var, field) in ENV_FALLBACKS {
        let Some(value) = env_vars.get(*var) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        let set_by_file = sources
            .get(*field)
            .is_some_and(|layer| matches!(layer, ConfigLayer::User | ConfigLayer::Explicit));
        if set_by_file {
            debug!(var, field, "config file value wins over environment");
            continue;
        }
        if set_field(merged, field, toml::Value::String(value.clone())) {
            sources.insert((*field).to_owned(), ConfigLayer::Environment((*var).to_owned()));
            applied = applied.saturating_add(1);
        }
    }
    applied
}

/// Set a dotted field, creating intermediate tables. Returns `false` if a
/// non-table value is in the way.
fn set_field(root: &mut toml::Value, field: &str, value: toml::Value) -> bool {
    let mut segments: Vec<&str> = field.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return false;
    };
    let mut current = root;
    for segment in segments {
        let Some(table) = current.as_table_mut() else {
            return false;
        };
        current = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    match current.as_table_mut() {
        Some(table) => {
            table.insert(leaf.to_owned(), value);
            true
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_fills_unset_field() {
        let mut merged: toml::Value = toml::from_str("[logging]\nlevel = \"info\"\n").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("logging.level".to_owned(), ConfigLayer::Defaults);
        let env = HashMap::from([("HOPLINE_LOG_LEVEL".to_owned(), "debug".to_owned())]);

        let applied = apply_env_fallbacks(&mut merged, &mut sources, &env);

        assert_eq!(applied, 1);
        assert_eq!(merged["logging"]["level"].as_str(), Some("debug"));
        assert_eq!(
            sources.get("logging.level"),
            Some(&ConfigLayer::Environment("HOPLINE_LOG_LEVEL".to_owned()))
        );
    }

    #[test]
    fn test_file_value_wins_over_env() {
        let mut merged: toml::Value = toml::from_str("[logging]\nlevel = \"warn\"\n").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("logging.level".to_owned(), ConfigLayer::User);
        let env = HashMap::from([("HOPLINE_LOG_LEVEL".to_owned(), "debug".to_owned())]);

        let applied = apply_env_fallbacks(&mut merged, &mut sources, &env);

        assert_eq!(applied, 0);
        assert_eq!(merged["logging"]["level"].as_str(), Some("warn"));
    }

    #[test]
    fn test_env_creates_missing_tables() {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        let mut sources = FieldSources::new();
        let env = HashMap::from([("HOPLINE_DATA_DIR".to_owned(), "/srv/hopline".to_owned())]);

        apply_env_fallbacks(&mut merged, &mut sources, &env);

        assert_eq!(merged["paths"]["data_dir"].as_str(), Some("/srv/hopline"));
    }
}
