//! A [`PackageHost`] backed by a directory of installed packages.
//!
//! Every subdirectory of the packages directory that contains a
//! `Package.toml` is an installed package. Errors in individual manifests
//! are logged as warnings and the package is skipped. Package-set changes
//! are reported through a `notify` filesystem watcher.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use super::manifest::{MANIFEST_FILE_NAME, PackageManifest, ProviderDef, load_manifest};
use super::{
    ChangeCallback, EntryRow, HostInfo, PackageHost, ProviderInfo, ProviderMetadata, Subscription,
};
use crate::error::{PluginError, PluginResult};
use crate::paths::join_within;

/// Packages installed as subdirectories of one directory.
#[derive(Debug, Clone)]
pub struct DirectoryPackageHost {
    packages_dir: PathBuf,
    info: HostInfo,
    watch: bool,
}

impl DirectoryPackageHost {
    /// Host over `packages_dir`. Providers from `own_package` are internal.
    #[must_use]
    pub fn new(packages_dir: impl Into<PathBuf>, own_package: impl Into<String>) -> Self {
        Self {
            packages_dir: packages_dir.into(),
            info: HostInfo {
                own_package: own_package.into(),
            },
            watch: true,
        }
    }

    /// Enable or disable filesystem watching. Without it the registry cache
    /// is only invalidated explicitly.
    #[must_use]
    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// The directory scanned for packages.
    #[must_use]
    pub fn packages_dir(&self) -> &Path {
        &self.packages_dir
    }

    /// Load every valid manifest, paired with its package root.
    fn load_packages(&self) -> PluginResult<Vec<(PackageManifest, PathBuf)>> {
        let entries = match std::fs::read_dir(&self.packages_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.packages_dir.display(), "packages directory missing");
                return Ok(Vec::new());
            },
            Err(e) => return Err(PluginError::Io(e)),
        };

        let mut packages = Vec::new();
        for entry in entries {
            let root = entry?.path();
            if !root.is_dir() {
                continue;
            }
            let manifest_path = root.join(MANIFEST_FILE_NAME);
            if !manifest_path.exists() {
                continue;
            }
            match load_manifest(&manifest_path) {
                Ok(manifest) => {
                    debug!(
                        path = %manifest_path.display(),
                        package = %manifest.package.name,
                        "Loaded package manifest"
                    );
                    packages.push((manifest, root));
                },
                Err(e) => {
                    warn!(path = %manifest_path.display(), error = %e, "Failed to load package manifest");
                },
            }
        }
        packages.sort_by(|a, b| a.0.package.name.cmp(&b.0.package.name));
        Ok(packages)
    }

    /// Re-read the manifest behind `provider`.
    fn provider_def(&self, provider: &ProviderInfo) -> PluginResult<ProviderDef> {
        let manifest = load_manifest(&provider.package_root.join(MANIFEST_FILE_NAME))?;
        manifest
            .providers
            .into_iter()
            .find(|p| p.authority == provider.authority)
            .ok_or_else(|| {
                PluginError::Host(format!(
                    "provider {} no longer declared by {}",
                    provider.authority, provider.package
                ))
            })
    }
}

fn to_provider_info(
    manifest: &PackageManifest,
    root: &Path,
    def: &ProviderDef,
) -> PluginResult<ProviderInfo> {
    Ok(ProviderInfo {
        package: manifest.package.name.clone(),
        authority: def.authority.clone(),
        exported: def.exported,
        label: def.label.clone().unwrap_or_else(|| def.authority.clone()),
        plugins: def.plugins.clone(),
        package_root: root.to_path_buf(),
        native_library_dir: join_within(root, &manifest.package.native_library_dir)?,
        metadata: ProviderMetadata {
            executable_path: def.metadata.executable_path.clone(),
            version: def.metadata.version.clone(),
            default_config: def.metadata.default_config.clone(),
        },
    })
}

impl PackageHost for DirectoryPackageHost {
    fn host_info(&self) -> &HostInfo {
        &self.info
    }

    fn list_providers(&self) -> PluginResult<Vec<ProviderInfo>> {
        let mut providers = Vec::new();
        for (manifest, root) in self.load_packages()? {
            for def in &manifest.providers {
                match to_provider_info(&manifest, &root, def) {
                    Ok(info) => providers.push(info),
                    Err(e) => warn!(
                        package = %manifest.package.name,
                        authority = %def.authority,
                        error = %e,
                        "Skipping provider"
                    ),
                }
            }
        }
        Ok(providers)
    }

    fn subscribe_package_changes(&self, on_change: ChangeCallback) -> PluginResult<Subscription> {
        if !self.watch {
            return Ok(Subscription::inert());
        }

        std::fs::create_dir_all(&self.packages_dir)?;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if !matches!(event.kind, EventKind::Access(_)) => on_change(),
                Ok(_) => {},
                Err(e) => warn!(error = %e, "Package watcher error"),
            },
            notify::Config::default(),
        )
        .map_err(|e| PluginError::Host(format!("filesystem watcher: {e}")))?;

        watcher
            .watch(&self.packages_dir, RecursiveMode::Recursive)
            .map_err(|e| PluginError::Host(format!("filesystem watcher: {e}")))?;
        info!(path = %self.packages_dir.display(), "Watching packages directory");

        Ok(Subscription::new(move || drop(watcher)))
    }

    fn call_get_executable(
        &self,
        provider: &ProviderInfo,
        options_id: Option<&str>,
    ) -> PluginResult<Option<PathBuf>> {
        let Some(command) = self.provider_def(provider)?.delegate else {
            return Ok(None);
        };
        let Some((program, args)) = command.split_first() else {
            return Err(PluginError::Host(format!(
                "empty delegate command for {}",
                provider.authority
            )));
        };
        let program = join_within(&provider.package_root, program)?;

        let mut cmd = Command::new(&program);
        cmd.args(args).current_dir(&provider.package_root);
        if let Some(id) = options_id {
            cmd.arg(id);
        }
        debug!(program = %program.display(), ?options_id, "Calling delegate");

        let output = cmd.output()?;
        if !output.status.success() {
            return Err(PluginError::Host(format!(
                "delegate for {} exited with {}: {}",
                provider.authority,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let printed = stdout.trim();
        if printed.is_empty() {
            return Err(PluginError::Host(format!(
                "delegate for {} printed no path",
                provider.authority
            )));
        }
        let path = PathBuf::from(printed);
        Ok(Some(if path.is_absolute() {
            path
        } else {
            provider.package_root.join(path)
        }))
    }

    fn query_entries(&self, provider: &ProviderInfo) -> PluginResult<Option<Vec<EntryRow>>> {
        Ok(self.provider_def(provider)?.files.map(|files| {
            files
                .iter()
                .map(|f| EntryRow {
                    path: f.path.clone(),
                    mode: f.entry_mode(),
                })
                .collect()
        }))
    }

    fn open_entry(&self, provider: &ProviderInfo, path: &str) -> PluginResult<Box<dyn Read + Send>> {
        let def = self.provider_def(provider)?;
        let file = def
            .files
            .unwrap_or_default()
            .into_iter()
            .find(|f| f.path == path)
            .ok_or_else(|| {
                PluginError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} has no entry {path}", provider.authority),
                ))
            })?;
        let source = join_within(&provider.package_root, &file.source)?;
        Ok(Box::new(std::fs::File::open(source)?))
    }
}
