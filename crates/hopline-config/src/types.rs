//! Configuration types for the Hopline orchestrator.
//!
//! All types in this module are self-contained with no dependencies on other
//! internal hopline crates. Domain types are mirrored here and converted at
//! the boundary. Every struct implements [`Default`] so that a bare
//! `[section]` header in TOML produces a working configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration for Hopline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Private storage directories.
    pub paths: PathsSection,
    /// Plugin package discovery.
    pub plugins: PluginsSection,
    /// Trust store handed to plugin processes.
    pub trust: TrustSection,
    /// Primary tunnelling engine command.
    pub engine: EngineSection,
    /// Command templates for external-config sub-engines, keyed by type name.
    pub sub_engines: HashMap<String, SubEngineSection>,
    /// Child process supervision.
    pub process: ProcessSection,
    /// Loopback HTTP bridge fetchers.
    pub bridge: BridgeSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// PathsSection
// ---------------------------------------------------------------------------

/// Storage directories. Unset entries are derived from `data_dir` at load time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    /// Root of all hopline state.
    pub data_dir: Option<PathBuf>,
    /// Non-backed-up scratch area: plugin staging and per-launch cache files.
    pub no_backup_dir: Option<PathBuf>,
    /// Persistent files (bundled trust stores).
    pub files_dir: Option<PathBuf>,
    /// User-supplied assets (custom root store).
    pub external_assets_dir: Option<PathBuf>,
}

impl PathsSection {
    /// Fill every unset directory from `data_dir`.
    pub fn derive_from(&mut self, data_dir: &Path) {
        if self.data_dir.is_none() {
            self.data_dir = Some(data_dir.to_path_buf());
        }
        if self.no_backup_dir.is_none() {
            self.no_backup_dir = Some(data_dir.join("no_backup"));
        }
        if self.files_dir.is_none() {
            self.files_dir = Some(data_dir.join("files"));
        }
        if self.external_assets_dir.is_none() {
            self.external_assets_dir = Some(data_dir.join("assets"));
        }
    }
}

// ---------------------------------------------------------------------------
// PluginsSection
// ---------------------------------------------------------------------------

/// Where plugin packages are installed and how they are watched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsSection {
    /// Directory whose subdirectories are installed packages.
    /// Defaults to `<data_dir>/packages`.
    pub packages_dir: Option<PathBuf>,
    /// Package name of hopline itself; its providers count as internal.
    pub host_package: String,
    /// Watch `packages_dir` and invalidate the plugin cache on change.
    pub watch: bool,
}

impl Default for PluginsSection {
    fn default() -> Self {
        Self {
            packages_dir: None,
            host_package: "hopline".to_owned(),
            watch: true,
        }
    }
}

// ---------------------------------------------------------------------------
// TrustSection
// ---------------------------------------------------------------------------

/// Which root certificate bundle plugin processes should trust.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCaProvider {
    /// The platform trust store; no override is exported.
    #[default]
    System,
    /// The bundled Mozilla store.
    Mozilla,
    /// System plus user-installed certificates, bundled at install time.
    SystemAndUser,
    /// A user-provided store in the external assets directory.
    Custom,
}

impl std::str::FromStr for RootCaProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "mozilla" => Ok(Self::Mozilla),
            "system_and_user" => Ok(Self::SystemAndUser),
            "custom" => Ok(Self::Custom),
            other => Err(format!(
                "unknown root CA provider '{other}'; expected one of: system, mozilla, system_and_user, custom"
            )),
        }
    }
}

/// Trust store selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustSection {
    /// Root CA provider.
    pub root_ca_provider: RootCaProvider,
}

// ---------------------------------------------------------------------------
// EngineSection
// ---------------------------------------------------------------------------

/// Primary tunnelling engine command.
///
/// `{config}` in `core_args` is replaced by the generated config file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Binary name (looked up on `PATH`) or absolute path.
    pub core_binary: String,
    /// Arguments passed to the binary.
    pub core_args: Vec<String>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            core_binary: "v2ray".to_owned(),
            core_args: vec!["run".to_owned(), "-c".to_owned(), "{config}".to_owned()],
        }
    }
}

// ---------------------------------------------------------------------------
// SubEngineSection
// ---------------------------------------------------------------------------

/// Command template for one external-config sub-engine type.
///
/// `{config}` and `{port}` in `args` are substituted at launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubEngineSection {
    /// Binary name or absolute path.
    pub command: String,
    /// Arguments passed to the binary.
    pub args: Vec<String>,
    /// Extension of the generated config file (without dot).
    pub config_extension: String,
}

impl Default for SubEngineSection {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: vec!["-c".to_owned(), "{config}".to_owned()],
            config_extension: "json".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessSection
// ---------------------------------------------------------------------------

/// Child process supervision knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSection {
    /// Delay before restarting a child that exited.
    pub restart_delay_ms: u64,
    /// A child exiting sooner than this after start is treated as a crash
    /// and not restarted.
    pub fast_fail_ms: u64,
    /// How long `close_all` waits for a killed child to be reaped.
    pub kill_timeout_ms: u64,
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            restart_delay_ms: 1000,
            fast_fail_ms: 1000,
            kill_timeout_ms: 5000,
        }
    }
}

// ---------------------------------------------------------------------------
// BridgeSection
// ---------------------------------------------------------------------------

/// Loopback HTTP bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    /// Pause between a failed load and the next attempt.
    pub retry_delay_ms: u64,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            retry_delay_ms: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"` or `"json"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["hopline_plugins=debug"]`).
    pub directives: Vec<String>,
    /// Log to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_paths_fills_only_unset() {
        let mut paths = PathsSection {
            files_dir: Some(PathBuf::from("/opt/hopline/files")),
            ..PathsSection::default()
        };
        paths.derive_from(Path::new("/var/lib/hopline"));

        assert_eq!(paths.data_dir, Some(PathBuf::from("/var/lib/hopline")));
        assert_eq!(
            paths.no_backup_dir,
            Some(PathBuf::from("/var/lib/hopline/no_backup"))
        );
        assert_eq!(paths.files_dir, Some(PathBuf::from("/opt/hopline/files")));
        assert_eq!(
            paths.external_assets_dir,
            Some(PathBuf::from("/var/lib/hopline/assets"))
        );
    }

    #[test]
    fn test_root_ca_provider_from_str() {
        assert_eq!("mozilla".parse(), Ok(RootCaProvider::Mozilla));
        assert_eq!("SYSTEM".parse(), Ok(RootCaProvider::System));
        assert_eq!("system_and_user".parse(), Ok(RootCaProvider::SystemAndUser));
        assert!("nope".parse::<RootCaProvider>().is_err());
    }

    #[test]
    fn test_root_ca_provider_toml_names() {
        let section: TrustSection = toml::from_str("root_ca_provider = \"custom\"").unwrap();
        assert_eq!(section.root_ca_provider, RootCaProvider::Custom);
    }
}
