//! Bridge from `hopline_config::Config` to domain types.
//!
//! The config crate has no dependencies on other internal crates. Conversion
//! into plugin, instance and telemetry types happens here, exactly once.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use hopline_config::{Config, RootCaProvider as ConfigRootCaProvider};
use hopline_instance::{
    CommandSubEngineFactory, CoreEngineFactory, ProcessSettings, RootCaProvider, SubEngineTemplate,
    TrustStore,
};
use hopline_plugins::DirectoryPackageHost;
use hopline_telemetry::{LogConfig, LogFormat};

fn dir<'a>(value: Option<&'a PathBuf>, field: &str) -> Result<&'a Path> {
    value
        .map(PathBuf::as_path)
        .with_context(|| format!("{field} is not set"))
}

/// Non-backed-up directory for staging and cache files.
///
/// # Errors
///
/// Fails if the directory was not derived at load time.
pub fn no_backup_dir(cfg: &Config) -> Result<&Path> {
    dir(cfg.paths.no_backup_dir.as_ref(), "paths.no_backup_dir")
}

/// Convert config to [`LogConfig`].
#[must_use]
pub fn to_log_config(cfg: &Config) -> LogConfig {
    let format = match cfg.logging.format.as_str() {
        "pretty" => LogFormat::Pretty,
        "json" => LogFormat::Json,
        _ => LogFormat::Compact,
    };

    let mut log_config = LogConfig::new(&cfg.logging.level).with_format(format);
    for directive in &cfg.logging.directives {
        log_config = log_config.with_directive(directive);
    }
    if let Some(file) = &cfg.logging.file {
        log_config = log_config.with_file(file);
    }
    log_config
}

fn convert_root_ca_provider(provider: ConfigRootCaProvider) -> RootCaProvider {
    match provider {
        ConfigRootCaProvider::System => RootCaProvider::System,
        ConfigRootCaProvider::Mozilla => RootCaProvider::Mozilla,
        ConfigRootCaProvider::SystemAndUser => RootCaProvider::SystemAndUser,
        ConfigRootCaProvider::Custom => RootCaProvider::Custom,
    }
}

/// Convert config to a [`TrustStore`].
///
/// # Errors
///
/// Fails if the bundle directories were not derived at load time.
pub fn to_trust_store(cfg: &Config) -> Result<TrustStore> {
    Ok(TrustStore::new(
        convert_root_ca_provider(cfg.trust.root_ca_provider),
        dir(cfg.paths.files_dir.as_ref(), "paths.files_dir")?,
        dir(
            cfg.paths.external_assets_dir.as_ref(),
            "paths.external_assets_dir",
        )?,
    ))
}

/// Convert config to a [`DirectoryPackageHost`].
///
/// # Errors
///
/// Fails if the packages directory was not derived at load time.
pub fn to_package_host(cfg: &Config) -> Result<DirectoryPackageHost> {
    let packages = dir(cfg.plugins.packages_dir.as_ref(), "plugins.packages_dir")?;
    Ok(DirectoryPackageHost::new(packages, cfg.plugins.host_package.clone())
        .with_watch(cfg.plugins.watch))
}

/// Convert config to [`ProcessSettings`].
#[must_use]
pub fn to_process_settings(cfg: &Config) -> ProcessSettings {
    ProcessSettings {
        restart_delay: Duration::from_millis(cfg.process.restart_delay_ms),
        fast_fail: Duration::from_millis(cfg.process.fast_fail_ms),
        kill_timeout: Duration::from_millis(cfg.process.kill_timeout_ms),
    }
}

/// Pause between bridge retries.
#[must_use]
pub fn bridge_retry_delay(cfg: &Config) -> Duration {
    Duration::from_millis(cfg.bridge.retry_delay_ms)
}

/// Convert config to a [`CoreEngineFactory`]. A bare binary name is looked
/// up on `PATH`.
///
/// # Errors
///
/// Fails if the core binary cannot be found or the cache dir is unset.
pub fn to_engine_factory(cfg: &Config) -> Result<CoreEngineFactory> {
    let program = which::which(&cfg.engine.core_binary)
        .with_context(|| format!("core binary '{}' not found", cfg.engine.core_binary))?;
    Ok(CoreEngineFactory {
        program: program.display().to_string(),
        args: cfg.engine.core_args.clone(),
        cache_dir: no_backup_dir(cfg)?.to_path_buf(),
        kill_timeout: Duration::from_millis(cfg.process.kill_timeout_ms),
    })
}

/// Convert the `[sub_engines]` table to a [`CommandSubEngineFactory`].
///
/// # Errors
///
/// Fails if the cache dir is unset.
pub fn to_sub_engine_factory(cfg: &Config) -> Result<CommandSubEngineFactory> {
    let mut factory = CommandSubEngineFactory::new(
        no_backup_dir(cfg)?.to_path_buf(),
        Duration::from_millis(cfg.process.kill_timeout_ms),
    );
    for (kind, section) in &cfg.sub_engines {
        factory = factory.with_template(
            kind.clone(),
            SubEngineTemplate {
                command: section.command.clone(),
                args: section.args.clone(),
                config_extension: section.config_extension.clone(),
            },
        );
    }
    Ok(factory)
}

#[cfg(test)]
mod tests {
    use hopline_config::SubEngineSection;
    use hopline_telemetry::LogTarget;

    use super::*;

    fn derived() -> Config {
        let mut cfg = Config::default();
        cfg.paths.derive_from(Path::new("/var/lib/hopline"));
        cfg.plugins.packages_dir = Some(PathBuf::from("/var/lib/hopline/packages"));
        cfg
    }

    #[test]
    fn log_config_carries_format_directives_and_file() {
        let mut cfg = Config::default();
        cfg.logging.level = "debug".into();
        cfg.logging.format = "json".into();
        cfg.logging.directives = vec!["hopline_plugins=trace".into()];
        cfg.logging.file = Some(PathBuf::from("/tmp/hopline.log"));

        let log = to_log_config(&cfg);
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.directives, vec!["hopline_plugins=trace"]);
        assert_eq!(log.target, LogTarget::File(PathBuf::from("/tmp/hopline.log")));
        assert!(!log.ansi);
    }

    #[test]
    fn unknown_log_format_falls_back_to_compact() {
        let mut cfg = Config::default();
        cfg.logging.format = "fancy".into();
        assert_eq!(to_log_config(&cfg).format, LogFormat::Compact);
    }

    #[test]
    fn trust_store_uses_derived_dirs() {
        let mut cfg = derived();
        cfg.trust.root_ca_provider = ConfigRootCaProvider::Custom;
        let store = to_trust_store(&cfg).unwrap();
        assert_eq!(store.provider(), RootCaProvider::Custom);
        assert_eq!(
            store.bundle_path(),
            Some(PathBuf::from("/var/lib/hopline/assets/root_store.certs"))
        );
    }

    #[test]
    fn underived_paths_are_reported() {
        let err = to_trust_store(&Config::default()).unwrap_err();
        assert!(err.to_string().contains("paths.files_dir"));
        assert!(no_backup_dir(&Config::default()).is_err());
    }

    #[test]
    fn process_settings_from_millis() {
        let mut cfg = Config::default();
        cfg.process.restart_delay_ms = 250;
        let settings = to_process_settings(&cfg);
        assert_eq!(settings.restart_delay, Duration::from_millis(250));
        assert_eq!(settings.fast_fail, Duration::from_secs(1));
        assert_eq!(settings.kill_timeout, Duration::from_secs(5));
        assert_eq!(bridge_retry_delay(&cfg), Duration::from_secs(1));
    }

    #[test]
    fn sub_engine_templates_registered_by_type() {
        let mut cfg = derived();
        cfg.sub_engines.insert(
            "hysteria2".into(),
            SubEngineSection {
                command: "hysteria".into(),
                ..SubEngineSection::default()
            },
        );
        let factory = to_sub_engine_factory(&cfg).unwrap();
        assert_eq!(factory.kinds().collect::<Vec<_>>(), ["hysteria2"]);
    }

    #[test]
    fn engine_factory_resolves_absolute_binary() {
        let mut cfg = derived();
        cfg.engine.core_binary = "/bin/sh".into();
        let factory = to_engine_factory(&cfg).unwrap();
        assert_eq!(factory.program, "/bin/sh");
        assert_eq!(factory.cache_dir, PathBuf::from("/var/lib/hopline/no_backup"));

        cfg.engine.core_binary = "definitely-not-a-hopline-core".into();
        assert!(to_engine_factory(&cfg).is_err());
    }

    #[test]
    fn package_host_uses_configured_dir() {
        let cfg = derived();
        let host = to_package_host(&cfg).unwrap();
        assert_eq!(host.packages_dir(), Path::new("/var/lib/hopline/packages"));
    }
}
