//! Root certificate selection for plugin processes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Variable plugin processes read their CA bundle from.
pub const SSL_CERT_FILE: &str = "SSL_CERT_FILE";

/// Which root store plugin processes trust.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RootCaProvider {
    /// The platform store; no override.
    #[default]
    System,
    /// The bundled Mozilla store.
    Mozilla,
    /// Platform plus user-installed roots, exported to a bundle.
    SystemAndUser,
    /// A user-supplied store.
    Custom,
}

/// Resolves a [`RootCaProvider`] to a bundle path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustStore {
    provider: RootCaProvider,
    files_dir: PathBuf,
    external_assets_dir: PathBuf,
}

impl TrustStore {
    /// Trust store reading bundles from `files_dir` and `external_assets_dir`.
    #[must_use]
    pub fn new(provider: RootCaProvider, files_dir: &Path, external_assets_dir: &Path) -> Self {
        Self {
            provider,
            files_dir: files_dir.to_path_buf(),
            external_assets_dir: external_assets_dir.to_path_buf(),
        }
    }

    /// Selected provider.
    #[must_use]
    pub fn provider(&self) -> RootCaProvider {
        self.provider
    }

    /// Bundle path for the selected provider; `None` for the system store.
    #[must_use]
    pub fn bundle_path(&self) -> Option<PathBuf> {
        let path = match self.provider {
            RootCaProvider::System => return None,
            RootCaProvider::Mozilla => self.files_dir.join("mozilla_included.pem"),
            // File name shared with existing plugin packages.
            RootCaProvider::SystemAndUser => self.files_dir.join("android_included.pem"),
            RootCaProvider::Custom => self.external_assets_dir.join("root_store.certs"),
        };
        Some(path.canonicalize().unwrap_or(path))
    }

    /// Environment overrides for a plugin process.
    #[must_use]
    pub fn environment(&self) -> HashMap<String, String> {
        self.bundle_path()
            .map(|path| (SSL_CERT_FILE.to_owned(), path.display().to_string()))
            .into_iter()
            .collect()
    }
}
