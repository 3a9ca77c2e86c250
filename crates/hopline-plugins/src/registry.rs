//! Plugin registry.
//!
//! Enumerates plugin providers on the [`PackageHost`] and caches the result.
//! There are two cache slots, one per `skip_internal` value. The first
//! package-change signal after population clears both slots and drops the
//! change subscription; the next [`PluginRegistry::list`] re-subscribes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info};

use crate::error::PluginResult;
use crate::host::{PackageHost, ProviderInfo, Subscription};
use crate::plugin::PluginId;

/// Id of the built-in "no plugin" placeholder.
pub const NONE_PLUGIN_ID: &str = "none";

/// One plugin as seen by the user: a logical id handled by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEntry {
    /// Logical plugin id.
    pub id: PluginId,
    /// Display label.
    pub label: String,
    /// Owning package name.
    pub package: String,
    /// Shipped by the host application itself (or the `none` placeholder).
    pub internal: bool,
    /// Backing provider; `None` only for the `none` placeholder.
    pub provider: Option<Arc<ProviderInfo>>,
}

/// An enumeration of plugins, in package order.
#[derive(Debug, Clone, Default)]
pub struct PluginCollection {
    skip_internal: bool,
    entries: Vec<PluginEntry>,
    by_id: HashMap<String, Vec<usize>>,
}

impl PluginCollection {
    fn new(skip_internal: bool, entries: Vec<PluginEntry>) -> Self {
        let mut by_id: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            by_id
                .entry(entry.id.as_str().to_owned())
                .or_default()
                .push(index);
        }
        Self {
            skip_internal,
            entries,
            by_id,
        }
    }

    /// Whether internal plugins were left out.
    #[must_use]
    pub fn skips_internal(&self) -> bool {
        self.skip_internal
    }

    /// Every entry.
    pub fn iter(&self) -> impl Iterator<Item = &PluginEntry> {
        self.entries.iter()
    }

    /// Entries for one logical id.
    pub fn lookup<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a PluginEntry> + 'a {
        self.by_id
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|&i| self.entries.get(i))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
struct RegistryState {
    all: Option<Arc<PluginCollection>>,
    skip_internal: Option<Arc<PluginCollection>>,
    subscription: Option<Subscription>,
}

impl RegistryState {
    /// Clear both slots and hand back the subscription so the caller can drop
    /// it outside the lock.
    fn invalidate(&mut self) -> Option<Subscription> {
        self.all = None;
        self.skip_internal = None;
        self.subscription.take()
    }
}

fn lock(state: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cached view of the plugins installed on a [`PackageHost`].
///
/// Construct one per host and share it behind an `Arc`.
pub struct PluginRegistry {
    host: Arc<dyn PackageHost>,
    state: Arc<Mutex<RegistryState>>,
}

impl PluginRegistry {
    /// Registry over `host`. Nothing is enumerated until the first `list`.
    #[must_use]
    pub fn new(host: Arc<dyn PackageHost>) -> Self {
        Self {
            host,
            state: Arc::new(Mutex::new(RegistryState::default())),
        }
    }

    /// The host this registry enumerates.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn PackageHost> {
        &self.host
    }

    /// Installed plugins. With `skip_internal` the `none` placeholder and the
    /// host application's own providers are left out.
    ///
    /// # Errors
    ///
    /// Returns an error if subscribing to package changes or enumerating
    /// providers fails. Failures are not cached.
    pub fn list(&self, skip_internal: bool) -> PluginResult<Arc<PluginCollection>> {
        let mut state = lock(&self.state);

        if state.subscription.is_none() {
            let weak = Arc::downgrade(&self.state);
            state.subscription = Some(
                self.host
                    .subscribe_package_changes(Box::new(move || on_package_change(&weak)))?,
            );
        }

        let slot = if skip_internal {
            &mut state.skip_internal
        } else {
            &mut state.all
        };
        if let Some(cached) = slot {
            return Ok(Arc::clone(cached));
        }

        let collection = Arc::new(self.enumerate(skip_internal)?);
        debug!(
            skip_internal,
            count = collection.len(),
            "Enumerated plugins"
        );
        *slot = Some(Arc::clone(&collection));
        Ok(collection)
    }

    /// Providers that handle `logical_id`, taken from the full collection.
    /// The `none` placeholder is never returned.
    ///
    /// # Errors
    ///
    /// Propagates enumeration failures from [`list`](Self::list).
    pub fn find(&self, logical_id: &str) -> PluginResult<Vec<PluginEntry>> {
        let collection = self.list(false)?;
        Ok(collection
            .lookup(logical_id)
            .filter(|entry| entry.provider.is_some())
            .cloned()
            .collect())
    }

    /// Drop both cache slots and the change subscription, as if the package
    /// set had changed.
    pub fn invalidate(&self) {
        let subscription = lock(&self.state).invalidate();
        drop(subscription);
        debug!("Plugin cache invalidated");
    }

    fn enumerate(&self, skip_internal: bool) -> PluginResult<PluginCollection> {
        let own_package = &self.host.host_info().own_package;
        let mut entries = Vec::new();

        if !skip_internal {
            entries.push(PluginEntry {
                id: PluginId::from_static(NONE_PLUGIN_ID),
                label: "Disabled".to_owned(),
                package: own_package.clone(),
                internal: true,
                provider: None,
            });
        }

        for provider in self.host.list_providers()? {
            if !provider.exported {
                continue;
            }
            let internal = provider.package == *own_package;
            if internal && skip_internal {
                continue;
            }
            let provider = Arc::new(provider);
            for raw_id in &provider.plugins {
                match PluginId::new(raw_id.as_str()) {
                    Ok(id) => entries.push(PluginEntry {
                        id,
                        label: provider.label.clone(),
                        package: provider.package.clone(),
                        internal,
                        provider: Some(Arc::clone(&provider)),
                    }),
                    Err(e) => tracing::warn!(
                        package = %provider.package,
                        plugin_id = %raw_id,
                        error = %e,
                        "Ignoring invalid plugin id"
                    ),
                }
            }
        }

        Ok(PluginCollection::new(skip_internal, entries))
    }
}

fn on_package_change(state: &Weak<Mutex<RegistryState>>) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let subscription = lock(&state).invalidate();
    if subscription.is_some() {
        info!("Package set changed, plugin cache cleared");
    }
    drop(subscription);
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("PluginRegistry")
            .field("own_package", &self.host.host_info().own_package)
            .field("cached_all", &state.all.is_some())
            .field("cached_skip_internal", &state.skip_internal.is_some())
            .field("subscribed", &state.subscription.is_some())
            .finish()
    }
}
