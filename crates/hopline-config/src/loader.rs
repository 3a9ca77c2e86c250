//! Config file discovery and layered loading.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Merge `<config dir>/config.toml` (user)
//! 3. Merge the explicit `--config` file, which must exist
//! 4. Apply env var fallbacks for unset fields
//! 5. Deserialize merged tree → `Config`
//! 6. Derive unset directories from the data directory
//! 7. Validate
//! 8. Return `ResolvedConfig`

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves};
use crate::show::ResolvedConfig;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Load the unified configuration with layered file precedence.
///
/// `config_dir_override` replaces the platform config directory used for
/// the user layer.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, the explicit
/// file is missing, or the final merged configuration fails validation.
pub fn load(
    explicit: Option<&Path>,
    config_dir_override: Option<&Path>,
) -> ConfigResult<ResolvedConfig> {
    let dirs = project_dirs();
    let user_dir = config_dir_override
        .map(Path::to_path_buf)
        .or_else(|| dirs.as_ref().map(|d| d.config_dir().to_path_buf()));
    let platform_data_dir = dirs.as_ref().map(|d| d.data_dir().to_path_buf());

    load_layers(
        explicit,
        user_dir.as_deref(),
        platform_data_dir.as_deref(),
        &collect_env_vars(),
    )
}

/// Layered load with every external input passed in.
pub(crate) fn load_layers(
    explicit: Option<&Path>,
    user_dir: Option<&Path>,
    platform_data_dir: Option<&Path>,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<ResolvedConfig> {
    // 1. Parse embedded defaults.
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", &ConfigLayer::Defaults, &mut field_sources);

    // 2. User config.
    if let Some(dir) = user_dir {
        let user_path = dir.join("config.toml");
        if let Some(overlay) = try_load_file(&user_path)? {
            deep_merge_tracking(
                &mut merged,
                &overlay,
                "",
                &ConfigLayer::User,
                &mut field_sources,
            );
            loaded_files.push(user_path.display().to_string());
            info!(path = %user_path.display(), "loaded user config");
        }
    }

    // 3. Explicit config. Unlike the user layer, a missing file is an error.
    if let Some(path) = explicit {
        let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        })?;
        deep_merge_tracking(
            &mut merged,
            &overlay,
            "",
            &ConfigLayer::Explicit,
            &mut field_sources,
        );
        loaded_files.push(path.display().to_string());
        info!(path = %path.display(), "loaded explicit config");
    }

    // 4. Env var fallbacks for unset fields.
    let env_count = apply_env_fallbacks(&mut merged, &mut field_sources, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    // 5. Deserialize.
    let mut config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    // 6. Derive directories.
    let data_dir = config
        .paths
        .data_dir
        .clone()
        .or_else(|| platform_data_dir.map(Path::to_path_buf))
        .ok_or(ConfigError::NoDataDir)?;
    derive_paths(&mut config, &data_dir);

    // 7. Validate.
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a config from a specific file path (no layering).
///
/// Directories are still derived, from `paths.data_dir` or the platform
/// data directory.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let value = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
    })?;
    let mut config: Config =
        value
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: path.display().to_string(),
                source: e,
            })?;

    let data_dir = config
        .paths
        .data_dir
        .clone()
        .or_else(|| project_dirs().map(|d| d.data_dir().to_path_buf()))
        .ok_or(ConfigError::NoDataDir)?;
    derive_paths(&mut config, &data_dir);

    validate::validate(&config)?;
    Ok(config)
}

/// Try to load a file, returning `None` if the file doesn't exist.
///
/// Uses a single read operation to avoid TOCTOU races (no separate
/// exists/metadata checks before reading).
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {} byte limit",
                content.len(),
                MAX_CONFIG_FILE_SIZE
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(Some(value))
}

fn derive_paths(config: &mut Config, data_dir: &Path) {
    config.paths.derive_from(data_dir);
    if config.plugins.packages_dir.is_none() {
        config.plugins.packages_dir = Some(data_dir.join("packages"));
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "hopline")
}

/// Platform config file location, if one can be determined.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RootCaProvider;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_defaults_deserialize_to_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config.plugins.host_package, "hopline");
        assert_eq!(config.engine.core_binary, "v2ray");
        assert_eq!(config.process.restart_delay_ms, 1000);
        assert_eq!(config.bridge.retry_delay_ms, 1000);
        assert_eq!(config.trust.root_ca_provider, RootCaProvider::System);
    }

    #[test]
    fn test_load_defaults_only_derives_paths() {
        let data = tempfile::tempdir().unwrap();
        let resolved = load_layers(None, None, Some(data.path()), &no_env()).unwrap();
        let paths = &resolved.config.paths;

        assert_eq!(paths.data_dir.as_deref(), Some(data.path()));
        assert_eq!(
            paths.no_backup_dir.as_deref(),
            Some(data.path().join("no_backup").as_path())
        );
        assert_eq!(
            resolved.config.plugins.packages_dir.as_deref(),
            Some(data.path().join("packages").as_path())
        );
        assert!(resolved.loaded_files.is_empty());
    }

    #[test]
    fn test_user_then_explicit_precedence() {
        let user_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            user_dir.path().join("config.toml"),
            "[process]\nrestart_delay_ms = 500\nfast_fail_ms = 200\n",
        )
        .unwrap();
        let explicit = user_dir.path().join("explicit.toml");
        std::fs::write(&explicit, "[process]\nrestart_delay_ms = 750\n").unwrap();

        let resolved = load_layers(
            Some(&explicit),
            Some(user_dir.path()),
            Some(user_dir.path()),
            &no_env(),
        )
        .unwrap();

        assert_eq!(resolved.config.process.restart_delay_ms, 750);
        assert_eq!(resolved.config.process.fast_fail_ms, 200);
        assert_eq!(
            resolved.field_sources.get("process.restart_delay_ms"),
            Some(&ConfigLayer::Explicit)
        );
        assert_eq!(
            resolved.field_sources.get("process.fast_fail_ms"),
            Some(&ConfigLayer::User)
        );
        assert_eq!(resolved.loaded_files.len(), 2);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_layers(
            Some(&dir.path().join("absent.toml")),
            None,
            Some(dir.path()),
            &no_env(),
        );
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_env_data_dir_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let env = HashMap::from([(
            "HOPLINE_DATA_DIR".to_owned(),
            dir.path().display().to_string(),
        )]);

        let resolved = load_layers(None, None, None, &env).unwrap();
        assert_eq!(resolved.config.paths.data_dir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_no_data_dir_is_error() {
        let result = load_layers(None, None, None, &no_env());
        assert!(matches!(result, Err(ConfigError::NoDataDir)));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[process\n").unwrap();
        let result = load_layers(None, Some(dir.path()), Some(dir.path()), &no_env());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_sub_engine_section_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[sub_engines.hysteria]\ncommand = \"hysteria\"\nargs = [\"client\", \"-c\", \"{config}\"]\n",
        )
        .unwrap();

        let resolved = load_layers(None, Some(dir.path()), Some(dir.path()), &no_env()).unwrap();
        let hysteria = &resolved.config.sub_engines["hysteria"];
        assert_eq!(hysteria.command, "hysteria");
        assert_eq!(hysteria.config_extension, "json");
    }
}
