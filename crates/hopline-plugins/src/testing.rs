//! In-memory package host for this crate's unit tests.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{PluginError, PluginResult};
use crate::host::{
    ChangeCallback, EntryMode, EntryRow, HostInfo, PackageHost, ProviderInfo, ProviderMetadata,
    Subscription,
};

type Callbacks = Arc<Mutex<HashMap<u64, Arc<ChangeCallback>>>>;

pub(crate) struct StaticHost {
    info: HostInfo,
    pub(crate) providers: Mutex<Vec<ProviderInfo>>,
    pub(crate) delegates: Mutex<HashMap<String, Result<PathBuf, String>>>,
    pub(crate) entries: Mutex<HashMap<String, Vec<(EntryRow, Vec<u8>)>>>,
    pub(crate) list_calls: AtomicUsize,
    callbacks: Callbacks,
    next_id: AtomicU64,
}

impl StaticHost {
    pub(crate) fn new(own_package: &str) -> Self {
        Self {
            info: HostInfo {
                own_package: own_package.to_owned(),
            },
            providers: Mutex::new(Vec::new()),
            delegates: Mutex::new(HashMap::new()),
            entries: Mutex::new(HashMap::new()),
            list_calls: AtomicUsize::new(0),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn add(&self, provider: ProviderInfo) {
        self.providers.lock().unwrap().push(provider);
    }

    pub(crate) fn set_delegate(&self, authority: &str, result: Result<PathBuf, String>) {
        self.delegates
            .lock()
            .unwrap()
            .insert(authority.to_owned(), result);
    }

    pub(crate) fn add_entry(&self, authority: &str, path: &str, mode: EntryMode, content: &[u8]) {
        self.entries
            .lock()
            .unwrap()
            .entry(authority.to_owned())
            .or_default()
            .push((
                EntryRow {
                    path: path.to_owned(),
                    mode,
                },
                content.to_vec(),
            ));
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    pub(crate) fn trigger_change(&self) {
        let callbacks: Vec<_> = self.callbacks.lock().unwrap().values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }
}

pub(crate) fn provider(package: &str, plugin: &str, lib_dir: &Path) -> ProviderInfo {
    ProviderInfo {
        package: package.to_owned(),
        authority: format!("{package}.binary"),
        exported: true,
        label: package.to_owned(),
        plugins: vec![plugin.to_owned()],
        package_root: lib_dir.to_path_buf(),
        native_library_dir: lib_dir.to_path_buf(),
        metadata: ProviderMetadata::default(),
    }
}

impl PackageHost for StaticHost {
    fn host_info(&self) -> &HostInfo {
        &self.info
    }

    fn list_providers(&self) -> PluginResult<Vec<ProviderInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.providers.lock().unwrap().clone())
    }

    fn subscribe_package_changes(&self, on_change: ChangeCallback) -> PluginResult<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks
            .lock()
            .unwrap()
            .insert(id, Arc::new(on_change));
        let callbacks = Arc::clone(&self.callbacks);
        Ok(Subscription::new(move || {
            callbacks.lock().unwrap().remove(&id);
        }))
    }

    fn call_get_executable(
        &self,
        provider: &ProviderInfo,
        _options_id: Option<&str>,
    ) -> PluginResult<Option<PathBuf>> {
        match self.delegates.lock().unwrap().get(&provider.authority) {
            None => Ok(None),
            Some(Ok(path)) => Ok(Some(path.clone())),
            Some(Err(message)) => Err(PluginError::Host(message.clone())),
        }
    }

    fn query_entries(&self, provider: &ProviderInfo) -> PluginResult<Option<Vec<EntryRow>>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&provider.authority)
            .map(|rows| rows.iter().map(|(row, _)| row.clone()).collect()))
    }

    fn open_entry(&self, provider: &ProviderInfo, path: &str) -> PluginResult<Box<dyn Read + Send>> {
        let entries = self.entries.lock().unwrap();
        let content = entries
            .get(&provider.authority)
            .and_then(|rows| rows.iter().find(|(row, _)| row.path == path))
            .map(|(_, content)| content.clone())
            .ok_or_else(|| PluginError::Host(format!("no entry {path}")))?;
        Ok(Box::new(Cursor::new(content)))
    }
}
