//! Executable resolution for logical plugin ids.
//!
//! Given a logical id, the resolver asks the [`PluginRegistry`] for the one
//! provider that handles it and then tries three strategies, cheapest first:
//!
//! 1. **Direct**: the provider's `executable_path` metadata under its native
//!    library directory.
//! 2. **Delegated**: ask the owning package for a path.
//! 3. **Streamed**: copy every entry the provider lists into a freshly wiped
//!    staging directory, validating each destination, and pick the entry
//!    named by the options `id`.
//!
//! The first success wins. A strategy the provider does not support is
//! skipped. If every attempted strategy fails, the first failure is reported
//! with the later ones attached.

use std::collections::HashSet;
use std::fs::{self, File, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::configuration::PluginConfiguration;
use crate::error::{PluginError, PluginResult, StrategyFailure};
use crate::host::{EntryMode, EntryRow, ProviderInfo};
use crate::options::PluginOptions;
use crate::paths::{ensure_within, is_executable, join_within, normalize_relative};
use crate::plugin::{PluginDescriptor, ResolutionStrategy, capability_version};
use crate::registry::PluginRegistry;

/// Name of the staging directory under the non-backed-up storage area.
pub const STAGING_DIR_NAME: &str = "plugin";

/// Resolves logical plugin ids to verified executables.
#[derive(Clone)]
pub struct PluginResolver {
    registry: Arc<PluginRegistry>,
    staging_dir: PathBuf,
    staging_lock: Arc<Mutex<()>>,
}

impl PluginResolver {
    /// Resolver staging streamed plugins under `<no_backup_dir>/plugin`.
    #[must_use]
    pub fn new(registry: Arc<PluginRegistry>, no_backup_dir: &Path) -> Self {
        Self {
            registry,
            staging_dir: no_backup_dir.join(STAGING_DIR_NAME),
            staging_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The registry consulted for providers.
    #[must_use]
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// The streamed-strategy staging directory.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Resolve `logical_id` with the given options.
    ///
    /// # Errors
    ///
    /// - [`PluginError::NotFound`] if no provider handles the id, or every
    ///   strategy was skipped.
    /// - [`PluginError::Conflict`] if several providers handle it.
    /// - [`PluginError::ResolutionFailed`] if every attempted strategy failed.
    pub fn resolve(&self, logical_id: &str, options: &PluginOptions) -> PluginResult<PluginDescriptor> {
        self.resolve_with(logical_id, |_| Ok(options.clone()))
    }

    /// Resolve the plugin selected in `configuration`, using its stored
    /// options or the provider's default config. `Ok(None)` when nothing is
    /// selected.
    ///
    /// # Errors
    ///
    /// As [`resolve`](Self::resolve), plus [`PluginError::InvalidOptions`]
    /// for an unparsable default config.
    pub fn resolve_selected(
        &self,
        configuration: &PluginConfiguration,
    ) -> PluginResult<Option<PluginDescriptor>> {
        if configuration.selected.is_empty() {
            return Ok(None);
        }
        self.resolve_with(&configuration.selected, |provider| {
            configuration.selected_options(|| provider.metadata.default_config.clone())
        })
        .map(Some)
    }

    /// [`resolve`](Self::resolve) on a blocking thread.
    ///
    /// # Errors
    ///
    /// As [`resolve`](Self::resolve), plus an I/O error if the blocking task
    /// panicked.
    pub async fn resolve_async(
        &self,
        logical_id: &str,
        options: &PluginOptions,
    ) -> PluginResult<PluginDescriptor> {
        let resolver = self.clone();
        let logical_id = logical_id.to_owned();
        let options = options.clone();
        tokio::task::spawn_blocking(move || resolver.resolve(&logical_id, &options))
            .await
            .map_err(|e| {
                PluginError::Io(std::io::Error::other(format!("resolution task failed: {e}")))
            })?
    }

    fn resolve_with(
        &self,
        logical_id: &str,
        options_for: impl FnOnce(&ProviderInfo) -> PluginResult<PluginOptions>,
    ) -> PluginResult<PluginDescriptor> {
        let mut candidates = self.registry.find(logical_id)?;
        let entry = match candidates.len() {
            0 => {
                return Err(PluginError::NotFound {
                    plugin: logical_id.to_owned(),
                });
            },
            1 => candidates.remove(0),
            _ => {
                return Err(PluginError::Conflict {
                    plugin: logical_id.to_owned(),
                    packages: candidates.into_iter().map(|c| c.package).collect(),
                });
            },
        };
        let Some(provider) = entry.provider else {
            return Err(PluginError::NotFound {
                plugin: logical_id.to_owned(),
            });
        };

        let options = options_for(&provider)?;
        let version = capability_version(provider.metadata.version.as_deref());
        let mut failures = Vec::new();

        for strategy in ResolutionStrategy::ORDERED {
            let attempt = match strategy {
                ResolutionStrategy::Direct => direct(&provider),
                ResolutionStrategy::Delegated => self.delegated(&provider, &options),
                ResolutionStrategy::Streamed => self.streamed(logical_id, &provider, &options),
            };
            match attempt {
                Ok(Some(path)) => {
                    info!(
                        plugin = %logical_id,
                        package = %provider.package,
                        %strategy,
                        path = %path.display(),
                        "Resolved plugin"
                    );
                    return Ok(PluginDescriptor {
                        id: entry.id,
                        version,
                        path,
                        strategy,
                        options,
                    });
                },
                Ok(None) => debug!(plugin = %logical_id, %strategy, "Strategy not applicable"),
                Err(cause) => {
                    warn!(plugin = %logical_id, %strategy, error = %cause, "Strategy failed");
                    failures.push(StrategyFailure { strategy, cause });
                },
            }
        }

        let mut failures = failures.into_iter();
        match failures.next() {
            Some(primary) => Err(PluginError::ResolutionFailed {
                plugin: logical_id.to_owned(),
                primary: Box::new(primary),
                suppressed: failures.collect(),
            }),
            None => Err(PluginError::NotFound {
                plugin: logical_id.to_owned(),
            }),
        }
    }

    fn delegated(
        &self,
        provider: &ProviderInfo,
        options: &PluginOptions,
    ) -> PluginResult<Option<PathBuf>> {
        let Some(path) = self
            .registry
            .host()
            .call_get_executable(provider, options.id())?
        else {
            return Ok(None);
        };
        require_executable(std::path::absolute(path)?).map(Some)
    }

    fn streamed(
        &self,
        plugin: &str,
        provider: &ProviderInfo,
        options: &PluginOptions,
    ) -> PluginResult<Option<PathBuf>> {
        let host = self.registry.host();
        let Some(rows) = host.query_entries(provider)? else {
            return Ok(None);
        };
        let entry_not_found = || PluginError::EntryNotFound {
            plugin: plugin.to_owned(),
        };
        if rows.is_empty() {
            return Err(entry_not_found());
        }

        let _staging = self
            .staging_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let staging = self.recreate_staging()?;

        let mut seen = HashSet::new();
        let mut executable = None;
        for row in &rows {
            let relative = normalize_relative(&row.path)?;
            if !seen.insert(relative.clone()) {
                return Err(PluginError::DuplicateEntry {
                    path: relative.display().to_string(),
                });
            }
            let target = staging.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            ensure_within(&staging, &target, &row.path)?;
            let mode = file_mode(row)?;

            let mut reader = host.open_entry(provider, &row.path)?;
            let mut file = File::create(&target)?;
            std::io::copy(&mut reader, &mut file)?;
            drop(file);
            fs::set_permissions(&target, Permissions::from_mode(mode))?;
            debug!(entry = %row.path, mode = format_args!("{mode:o}"), "Staged plugin entry");

            if options.id() == Some(row.path.as_str()) {
                executable = Some(target);
            }
        }

        require_executable(executable.ok_or_else(entry_not_found)?).map(Some)
    }

    /// Wipe and recreate the staging directory, returning its canonical path.
    fn recreate_staging(&self) -> PluginResult<PathBuf> {
        match fs::remove_dir_all(&self.staging_dir) {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(PluginError::Io(e)),
        }
        fs::create_dir_all(&self.staging_dir)?;
        Ok(self.staging_dir.canonicalize()?)
    }
}

fn direct(provider: &ProviderInfo) -> PluginResult<Option<PathBuf>> {
    let Some(relative) = provider.metadata.executable_path.as_deref() else {
        return Ok(None);
    };
    let path = join_within(&provider.native_library_dir, relative)?;
    require_executable(std::path::absolute(path)?).map(Some)
}

fn require_executable(path: PathBuf) -> PluginResult<PathBuf> {
    if is_executable(&path) {
        Ok(path)
    } else {
        Err(PluginError::NotExecutable { path })
    }
}

fn file_mode(row: &EntryRow) -> PluginResult<u32> {
    let mode = match &row.mode {
        EntryMode::Int(mode) => *mode,
        EntryMode::Text(text) => {
            u32::from_str_radix(text.trim(), 8).map_err(|e| PluginError::InvalidMode {
                path: row.path.clone(),
                message: format!("'{text}' is not an octal mode: {e}"),
            })?
        },
        EntryMode::Other(kind) => {
            return Err(PluginError::InvalidMode {
                path: row.path.clone(),
                message: format!("file mode should be an integer, got {kind}"),
            });
        },
    };
    Ok(mode & 0o7777)
}

impl std::fmt::Debug for PluginResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginResolver")
            .field("staging_dir", &self.staging_dir)
            .finish_non_exhaustive()
    }
}
