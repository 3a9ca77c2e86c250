//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges and that cross-field invariants hold.

use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_paths(config)?;
    validate_engine(config)?;
    validate_sub_engines(config)?;
    validate_process(config)?;
    validate_bridge(config)?;
    validate_logging(config)?;
    Ok(())
}

fn require_absolute(field: &str, path: Option<&Path>) -> ConfigResult<()> {
    match path {
        Some(p) if !p.is_absolute() => Err(ConfigError::ValidationError {
            field: field.to_owned(),
            message: format!("path '{}' must be absolute", p.display()),
        }),
        _ => Ok(()),
    }
}

fn validate_paths(config: &Config) -> ConfigResult<()> {
    let p = &config.paths;
    require_absolute("paths.data_dir", p.data_dir.as_deref())?;
    require_absolute("paths.no_backup_dir", p.no_backup_dir.as_deref())?;
    require_absolute("paths.files_dir", p.files_dir.as_deref())?;
    require_absolute("paths.external_assets_dir", p.external_assets_dir.as_deref())?;
    require_absolute("plugins.packages_dir", config.plugins.packages_dir.as_deref())?;

    if config.plugins.host_package.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "plugins.host_package".to_owned(),
            message: "host package name must not be empty".to_owned(),
        });
    }
    Ok(())
}

fn validate_engine(config: &Config) -> ConfigResult<()> {
    if config.engine.core_binary.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "engine.core_binary".to_owned(),
            message: "core binary must not be empty".to_owned(),
        });
    }
    Ok(())
}

fn validate_sub_engines(config: &Config) -> ConfigResult<()> {
    for (name, section) in &config.sub_engines {
        if section.command.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: format!("sub_engines.{name}.command"),
                message: "command must not be empty".to_owned(),
            });
        }
        if section.config_extension.contains(['/', '.']) {
            return Err(ConfigError::ValidationError {
                field: format!("sub_engines.{name}.config_extension"),
                message: format!(
                    "extension '{}' must not contain '/' or '.'",
                    section.config_extension
                ),
            });
        }
    }
    Ok(())
}

fn validate_process(config: &Config) -> ConfigResult<()> {
    let p = &config.process;
    if p.restart_delay_ms == 0 {
        return Err(ConfigError::ValidationError {
            field: "process.restart_delay_ms".to_owned(),
            message: "restart delay must be greater than zero".to_owned(),
        });
    }
    if p.kill_timeout_ms == 0 {
        return Err(ConfigError::ValidationError {
            field: "process.kill_timeout_ms".to_owned(),
            message: "kill timeout must be greater than zero".to_owned(),
        });
    }
    Ok(())
}

fn validate_bridge(config: &Config) -> ConfigResult<()> {
    if config.bridge.retry_delay_ms == 0 {
        return Err(ConfigError::ValidationError {
            field: "bridge.retry_delay_ms".to_owned(),
            message: "retry delay must be greater than zero".to_owned(),
        });
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !matches!(
        l.level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(ConfigError::ValidationError {
            field: "logging.level".to_owned(),
            message: format!(
                "unknown level '{}'; expected one of: trace, debug, info, warn, error",
                l.level
            ),
        });
    }
    if !matches!(l.format.as_str(), "pretty" | "compact" | "json") {
        return Err(ConfigError::ValidationError {
            field: "logging.format".to_owned(),
            message: format!(
                "unknown format '{}'; expected one of: pretty, compact, json",
                l.format
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::types::SubEngineSection;

    fn field_of(result: ConfigResult<()>) -> String {
        match result {
            Err(ConfigError::ValidationError { field, .. }) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_relative_path_rejected() {
        let mut config = Config::default();
        config.paths.no_backup_dir = Some(PathBuf::from("relative/no_backup"));
        assert_eq!(field_of(validate(&config)), "paths.no_backup_dir");
    }

    #[test]
    fn test_zero_restart_delay_rejected() {
        let mut config = Config::default();
        config.process.restart_delay_ms = 0;
        assert_eq!(field_of(validate(&config)), "process.restart_delay_ms");
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let mut config = Config::default();
        config.logging.format = "xml".to_owned();
        assert_eq!(field_of(validate(&config)), "logging.format");
    }

    #[test]
    fn test_sub_engine_without_command_rejected() {
        let mut config = Config::default();
        config
            .sub_engines
            .insert("brook".to_owned(), SubEngineSection::default());
        assert_eq!(field_of(validate(&config)), "sub_engines.brook.command");
    }
}
