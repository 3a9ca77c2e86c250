//! Package manifest types.
//!
//! Every installed plugin package carries a `Package.toml` at its root:
//!
//! ```toml
//! [package]
//! name = "org.example.naive"
//! native_library_dir = "lib"
//!
//! [[provider]]
//! authority = "org.example.naive.binary"
//! plugins = ["naive-plugin"]
//! delegate = ["bin/locate"]
//!
//! [provider.metadata]
//! executable_path = "libnaive.so"
//! version = "2.0"
//!
//! [[provider.files]]
//! path = "naive-plugin"
//! source = "bin/naive"
//! mode = "755"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};
use crate::host::EntryMode;

/// Standard package manifest file name.
pub const MANIFEST_FILE_NAME: &str = "Package.toml";

/// A package manifest loaded from `Package.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package identity.
    pub package: PackageDef,
    /// Plugin providers shipped by the package.
    #[serde(default, rename = "provider")]
    pub providers: Vec<ProviderDef>,
}

/// Package identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDef {
    /// Unique package name.
    pub name: String,
    /// Native library directory, relative to the package root.
    #[serde(default = "default_native_library_dir")]
    pub native_library_dir: String,
}

fn default_native_library_dir() -> String {
    "lib".to_owned()
}

fn default_true() -> bool {
    true
}

/// One provider declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDef {
    /// Provider authority.
    pub authority: String,
    /// Whether the provider is usable by other packages.
    #[serde(default = "default_true")]
    pub exported: bool,
    /// Display label; defaults to the authority.
    pub label: Option<String>,
    /// Logical plugin ids handled.
    #[serde(default)]
    pub plugins: Vec<String>,
    /// Advertised metadata.
    #[serde(default)]
    pub metadata: MetadataDef,
    /// Command (relative to the package root) that prints an executable
    /// path for the options id passed as its last argument.
    pub delegate: Option<Vec<String>>,
    /// Streamed entries. Absent means the provider does not stream.
    pub files: Option<Vec<FileDef>>,
}

/// Provider metadata keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataDef {
    /// Executable path relative to the native library directory.
    pub executable_path: Option<String>,
    /// Protocol version string.
    pub version: Option<String>,
    /// Default options string.
    pub default_config: Option<String>,
}

/// One streamed entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDef {
    /// Destination path relative to the staging directory.
    pub path: String,
    /// Content file relative to the package root.
    pub source: String,
    /// File mode: an integer, or an octal string.
    pub mode: Option<toml::Value>,
}

impl FileDef {
    /// Declared mode, classified.
    #[must_use]
    pub fn entry_mode(&self) -> EntryMode {
        match &self.mode {
            Some(toml::Value::Integer(m)) => match u32::try_from(*m) {
                Ok(m) => EntryMode::Int(m),
                Err(_) => EntryMode::Other(format!("integer {m}")),
            },
            Some(toml::Value::String(s)) => EntryMode::Text(s.clone()),
            Some(other) => EntryMode::Other(other.type_str().to_owned()),
            None => EntryMode::Other("missing".to_owned()),
        }
    }
}

/// Load a single package manifest from a TOML file.
///
/// # Errors
///
/// Returns [`PluginError::ManifestParseError`] if the file cannot be read or
/// parsed.
pub fn load_manifest(path: &Path) -> PluginResult<PackageManifest> {
    let content = std::fs::read_to_string(path).map_err(|e| PluginError::ManifestParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    toml::from_str(&content).map_err(|e| PluginError::ManifestParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_manifest() {
        let manifest: PackageManifest = toml::from_str(
            r#"
            [package]
            name = "org.example.naive"

            [[provider]]
            authority = "org.example.naive.binary"
            plugins = ["naive-plugin"]
            delegate = ["bin/locate", "--quiet"]

            [provider.metadata]
            executable_path = "libnaive.so"
            version = "2.0"

            [[provider.files]]
            path = "naive-plugin"
            source = "bin/naive"
            mode = "755"

            [[provider.files]]
            path = "lib/helper.so"
            source = "bin/helper.so"
            mode = 420
            "#,
        )
        .unwrap();

        assert_eq!(manifest.package.native_library_dir, "lib");
        let provider = &manifest.providers[0];
        assert!(provider.exported);
        assert_eq!(provider.metadata.version.as_deref(), Some("2.0"));
        let files = provider.files.as_ref().unwrap();
        assert_eq!(files[0].entry_mode(), EntryMode::Text("755".into()));
        assert_eq!(files[1].entry_mode(), EntryMode::Int(420));
    }

    #[test]
    fn mode_of_other_type_is_classified() {
        let file: FileDef =
            toml::from_str("path = \"x\"\nsource = \"y\"\nmode = 7.5\n").unwrap();
        assert_eq!(file.entry_mode(), EntryMode::Other("float".into()));

        let negative: FileDef =
            toml::from_str("path = \"x\"\nsource = \"y\"\nmode = -1\n").unwrap();
        assert!(matches!(negative.entry_mode(), EntryMode::Other(_)));
    }

    #[test]
    fn provider_without_files_does_not_stream() {
        let manifest: PackageManifest = toml::from_str(
            "[package]\nname = \"p\"\n[[provider]]\nauthority = \"a\"\nexported = false\n",
        )
        .unwrap();
        assert!(manifest.providers[0].files.is_none());
        assert!(!manifest.providers[0].exported);
    }

    #[test]
    fn load_manifest_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);
        std::fs::write(&path, "not toml [").unwrap();
        match load_manifest(&path) {
            Err(PluginError::ManifestParseError { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
