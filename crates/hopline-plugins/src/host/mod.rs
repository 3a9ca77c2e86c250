//! The package host: where plugin packages are installed and how to talk
//! to them.
//!
//! A host exposes installed packages as *providers*. Each provider declares
//! the logical plugin ids it handles and offers up to three ways of locating
//! an executable, which the [`PluginResolver`](crate::PluginResolver) tries
//! in order of cost.

pub mod directory;
pub mod manifest;

use std::fmt;
use std::io::Read;
use std::path::PathBuf;

use crate::error::PluginResult;

pub use directory::DirectoryPackageHost;

/// Facts about the application hosting the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Package name of the host application. Providers it ships are
    /// internal plugins.
    pub own_package: String,
}

/// Metadata a provider advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderMetadata {
    /// Executable path relative to the package's native library dir.
    pub executable_path: Option<String>,
    /// Protocol version string, e.g. `"2.0"`.
    pub version: Option<String>,
    /// Options string used when the user stored none.
    pub default_config: Option<String>,
}

/// One plugin provider inside an installed package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    /// Owning package name.
    pub package: String,
    /// Provider authority, unique per host.
    pub authority: String,
    /// Whether other packages may use the provider. Unexported providers are
    /// ignored.
    pub exported: bool,
    /// Display label.
    pub label: String,
    /// Logical plugin ids this provider handles.
    pub plugins: Vec<String>,
    /// Where the package is installed.
    pub package_root: PathBuf,
    /// Absolute native library directory of the package.
    pub native_library_dir: PathBuf,
    /// Advertised metadata.
    pub metadata: ProviderMetadata,
}

/// File mode of a streamed entry, as declared by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryMode {
    /// Numeric mode, used as is.
    Int(u32),
    /// Mode written as text, parsed as octal.
    Text(String),
    /// A value of any other type; names the type.
    Other(String),
}

/// One row of a provider's streamed manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRow {
    /// Path relative to the staging directory.
    pub path: String,
    /// Declared file mode.
    pub mode: EntryMode,
}

/// Keeps a package-change subscription alive. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Subscription that runs `cancel` when dropped.
    #[must_use]
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription with nothing to cancel, for hosts that never signal.
    #[must_use]
    pub fn inert() -> Self {
        Self { cancel: None }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Callback invoked when the installed package set changes.
pub type ChangeCallback = Box<dyn Fn() + Send + Sync>;

/// Access to installed plugin packages.
///
/// Methods are blocking; async callers go through
/// [`PluginResolver::resolve_async`](crate::PluginResolver::resolve_async).
pub trait PackageHost: Send + Sync {
    /// Facts about the host application.
    fn host_info(&self) -> &HostInfo;

    /// Every provider that declares the native-plugin extension point,
    /// exported or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the package set cannot be enumerated.
    fn list_providers(&self) -> PluginResult<Vec<ProviderInfo>>;

    /// Call `on_change` whenever the package set changes, until the returned
    /// [`Subscription`] is dropped. The callback may run on any thread but
    /// must not be invoked from inside this call.
    ///
    /// # Errors
    ///
    /// Returns an error if change notifications cannot be set up.
    fn subscribe_package_changes(&self, on_change: ChangeCallback) -> PluginResult<Subscription>;

    /// Ask the provider for an executable path for `options_id`.
    /// `Ok(None)` means the provider does not support delegation.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider was asked and failed.
    fn call_get_executable(
        &self,
        provider: &ProviderInfo,
        options_id: Option<&str>,
    ) -> PluginResult<Option<PathBuf>>;

    /// The provider's streamed manifest. `Ok(None)` means the provider has
    /// no content to stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be read.
    fn query_entries(&self, provider: &ProviderInfo) -> PluginResult<Option<Vec<EntryRow>>>;

    /// Open the byte stream for one manifest row.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be opened.
    fn open_entry(&self, provider: &ProviderInfo, path: &str) -> PluginResult<Box<dyn Read + Send>>;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn subscription_cancels_once_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
        drop(sub);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn inert_subscription_drops_quietly() {
        let sub = Subscription::inert();
        assert!(format!("{sub:?}").contains("false"));
    }
}
