//! Mock implementations for testing.
//!
//! Every mock shares a [`Journal`] so tests can assert the order in which
//! the orchestrator touched its collaborators.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hopline_instance::{
    BridgeError, BridgeResult, BridgeView, BridgeViewFactory, EngineError, EngineResult,
    ExternalConfigBean, ProcessError, ProcessHandle, ProcessPool, ProcessPoolFactory,
    ProcessResult, SubEngine, SubEngineFactory, TunnelEngine, TunnelEngineFactory,
};
use hopline_plugins::{
    ChangeCallback, EntryMode, EntryRow, HostInfo, PackageHost, PluginError, PluginResult,
    ProviderInfo, Subscription,
};
use tracing::trace;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered log of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    /// Create an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn record(&self, event: impl Into<String>) {
        let event = event.into();
        trace!(event = %event, "Journal");
        lock(&self.events).push(event);
    }

    /// Snapshot of every event so far.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    /// Number of events starting with `prefix`.
    #[must_use]
    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// Index of the first event starting with `prefix`.
    #[must_use]
    pub fn position(&self, prefix: &str) -> Option<usize> {
        lock(&self.events).iter().position(|e| e.starts_with(prefix))
    }
}

type Callbacks = Arc<Mutex<HashMap<u64, Arc<ChangeCallback>>>>;

/// In-memory package host.
pub struct MockPackageHost {
    info: HostInfo,
    providers: Mutex<Vec<ProviderInfo>>,
    delegates: Mutex<HashMap<String, Result<PathBuf, String>>>,
    entries: Mutex<HashMap<String, Vec<(EntryRow, Vec<u8>)>>>,
    list_calls: AtomicUsize,
    delegate_calls: AtomicUsize,
    entry_queries: AtomicUsize,
    callbacks: Callbacks,
    next_id: AtomicU64,
}

impl MockPackageHost {
    /// Host whose own package is `own_package`.
    #[must_use]
    pub fn new(own_package: impl Into<String>) -> Self {
        Self {
            info: HostInfo {
                own_package: own_package.into(),
            },
            providers: Mutex::new(Vec::new()),
            delegates: Mutex::new(HashMap::new()),
            entries: Mutex::new(HashMap::new()),
            list_calls: AtomicUsize::new(0),
            delegate_calls: AtomicUsize::new(0),
            entry_queries: AtomicUsize::new(0),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Install a provider.
    #[must_use]
    pub fn with_provider(self, provider: ProviderInfo) -> Self {
        self.add_provider(provider);
        self
    }

    /// Install a provider after construction.
    pub fn add_provider(&self, provider: ProviderInfo) {
        lock(&self.providers).push(provider);
    }

    /// Remove every provider of `package`.
    pub fn remove_package(&self, package: &str) {
        lock(&self.providers).retain(|p| p.package != package);
    }

    /// Answer delegated lookups for `authority` with `result`.
    pub fn set_delegate(&self, authority: &str, result: Result<PathBuf, String>) {
        lock(&self.delegates).insert(authority.to_owned(), result);
    }

    /// Add a streamed manifest row for `authority`.
    pub fn add_entry(&self, authority: &str, path: &str, mode: EntryMode, content: &[u8]) {
        lock(&self.entries)
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

    /// Number of `list_providers` calls.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of delegated lookups.
    #[must_use]
    pub fn delegate_calls(&self) -> usize {
        self.delegate_calls.load(Ordering::SeqCst)
    }

    /// Number of manifest queries.
    #[must_use]
    pub fn entry_queries(&self) -> usize {
        self.entry_queries.load(Ordering::SeqCst)
    }

    /// Live change subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.callbacks).len()
    }

    /// Fire a package-change notification.
    pub fn trigger_change(&self) {
        let callbacks: Vec<_> = lock(&self.callbacks).values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }
}

impl std::fmt::Debug for MockPackageHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPackageHost")
            .field("info", &self.info)
            .field("providers", &lock(&self.providers).len())
            .finish_non_exhaustive()
    }
}

impl PackageHost for MockPackageHost {
    fn host_info(&self) -> &HostInfo {
        &self.info
    }

    fn list_providers(&self) -> PluginResult<Vec<ProviderInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.providers).clone())
    }

    fn subscribe_package_changes(&self, on_change: ChangeCallback) -> PluginResult<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.callbacks).insert(id, Arc::new(on_change));
        let callbacks = Arc::clone(&self.callbacks);
        Ok(Subscription::new(move || {
            lock(&callbacks).remove(&id);
        }))
    }

    fn call_get_executable(
        &self,
        provider: &ProviderInfo,
        _options_id: Option<&str>,
    ) -> PluginResult<Option<PathBuf>> {
        self.delegate_calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.delegates).get(&provider.authority) {
            None => Ok(None),
            Some(Ok(path)) => Ok(Some(path.clone())),
            Some(Err(message)) => Err(PluginError::Host(message.clone())),
        }
    }

    fn query_entries(&self, provider: &ProviderInfo) -> PluginResult<Option<Vec<EntryRow>>> {
        self.entry_queries.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.entries)
            .get(&provider.authority)
            .map(|rows| rows.iter().map(|(row, _)| row.clone()).collect()))
    }

    fn open_entry(&self, provider: &ProviderInfo, path: &str) -> PluginResult<Box<dyn Read + Send>> {
        let content = lock(&self.entries)
            .get(&provider.authority)
            .and_then(|rows| rows.iter().find(|(row, _)| row.path == path))
            .map(|(_, content)| content.clone())
            .ok_or_else(|| PluginError::Host(format!("no entry {path}")))?;
        Ok(Box::new(Cursor::new(content)))
    }
}

/// A process start seen by a [`MockProcessPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedProcess {
    /// Full argument vector.
    pub argv: Vec<String>,
    /// Extra environment.
    pub env: HashMap<String, String>,
    /// Whether the last argument named an existing file at start time.
    pub config_existed: bool,
}

impl StartedProcess {
    /// Path of the config file (the last argument).
    #[must_use]
    pub fn config_path(&self) -> Option<&Path> {
        self.argv.last().map(Path::new)
    }
}

#[derive(Debug, Default)]
struct PoolShared {
    starts: Mutex<Vec<StartedProcess>>,
    pools_created: AtomicUsize,
    close_calls: AtomicUsize,
    fail_starts: AtomicBool,
}

/// Factory for [`MockProcessPool`]s sharing one record.
#[derive(Debug, Clone, Default)]
pub struct MockPoolFactory {
    journal: Journal,
    shared: Arc<PoolShared>,
}

impl MockPoolFactory {
    /// Factory recording into `journal`.
    #[must_use]
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            shared: Arc::default(),
        }
    }

    /// Make every subsequent `start` fail.
    pub fn fail_starts(&self) {
        self.shared.fail_starts.store(true, Ordering::SeqCst);
    }

    /// Every start so far.
    #[must_use]
    pub fn starts(&self) -> Vec<StartedProcess> {
        lock(&self.shared.starts).clone()
    }

    /// Pools handed out.
    #[must_use]
    pub fn pools_created(&self) -> usize {
        self.shared.pools_created.load(Ordering::SeqCst)
    }

    /// `close_all` calls across all pools.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::SeqCst)
    }
}

impl ProcessPoolFactory for MockPoolFactory {
    fn create(&self) -> Box<dyn ProcessPool> {
        self.shared.pools_created.fetch_add(1, Ordering::SeqCst);
        self.journal.record("pool.create");
        Box::new(MockProcessPool {
            journal: self.journal.clone(),
            shared: Arc::clone(&self.shared),
            next_id: AtomicU64::new(0),
        })
    }
}

/// Process pool that records starts instead of spawning.
#[derive(Debug)]
pub struct MockProcessPool {
    journal: Journal,
    shared: Arc<PoolShared>,
    next_id: AtomicU64,
}

#[async_trait]
impl ProcessPool for MockProcessPool {
    fn start(&self, argv: Vec<String>, env: HashMap<String, String>) -> ProcessResult<ProcessHandle> {
        let program = argv.first().cloned().ok_or(ProcessError::EmptyCommand)?;
        if self.shared.fail_starts.load(Ordering::SeqCst) {
            self.journal.record(format!("process.fail {program}"));
            return Err(ProcessError::Spawn {
                program,
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "mock refusal"),
            });
        }
        let config_existed = argv.last().is_some_and(|p| Path::new(p).is_file());
        self.journal.record(format!("process.start {program}"));
        lock(&self.shared.starts).push(StartedProcess {
            argv,
            env,
            config_existed,
        });
        Ok(ProcessHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            program,
        })
    }

    async fn close_all(&self) {
        self.shared.close_calls.fetch_add(1, Ordering::SeqCst);
        self.journal.record("pool.close_all");
    }
}

#[derive(Debug, Default)]
struct EngineShared {
    loaded: Mutex<Option<String>>,
    reject: Mutex<Option<String>>,
    fail_start: AtomicBool,
    created: AtomicUsize,
    closes: AtomicUsize,
}

/// Factory for [`MockEngine`]s.
#[derive(Debug, Clone, Default)]
pub struct MockEngineFactory {
    journal: Journal,
    shared: Arc<EngineShared>,
}

impl MockEngineFactory {
    /// Factory recording into `journal`.
    #[must_use]
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            shared: Arc::default(),
        }
    }

    /// Reject every config with `message`.
    pub fn reject_config(&self, message: impl Into<String>) {
        *lock(&self.shared.reject) = Some(message.into());
    }

    /// Make `start` fail.
    pub fn fail_start(&self) {
        self.shared.fail_start.store(true, Ordering::SeqCst);
    }

    /// Config most recently accepted.
    #[must_use]
    pub fn loaded_config(&self) -> Option<String> {
        lock(&self.shared.loaded).clone()
    }

    /// Engines handed out.
    #[must_use]
    pub fn created(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    /// `close` calls.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

impl TunnelEngineFactory for MockEngineFactory {
    fn create(&self) -> EngineResult<Box<dyn TunnelEngine>> {
        self.shared.created.fetch_add(1, Ordering::SeqCst);
        self.journal.record("engine.create");
        Ok(Box::new(MockEngine {
            journal: self.journal.clone(),
            shared: Arc::clone(&self.shared),
            loaded: false,
        }))
    }
}

/// Primary engine that records calls.
#[derive(Debug)]
pub struct MockEngine {
    journal: Journal,
    shared: Arc<EngineShared>,
    loaded: bool,
}

#[async_trait]
impl TunnelEngine for MockEngine {
    async fn load_config(&mut self, config: &str) -> EngineResult<()> {
        self.journal.record("engine.load");
        if let Some(message) = lock(&self.shared.reject).clone() {
            return Err(EngineError::InvalidConfig(message));
        }
        *lock(&self.shared.loaded) = Some(config.to_owned());
        self.loaded = true;
        Ok(())
    }

    async fn start(&mut self) -> EngineResult<()> {
        if !self.loaded {
            return Err(EngineError::NotLoaded);
        }
        self.journal.record("engine.start");
        if self.shared.fail_start.load(Ordering::SeqCst) {
            return Err(EngineError::Start {
                program: "mock-engine".into(),
                message: "refused".into(),
            });
        }
        Ok(())
    }

    async fn close(&mut self) -> EngineResult<()> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        self.journal.record("engine.close");
        Ok(())
    }
}

/// Factory for [`MockSubEngine`]s supporting a fixed set of types.
#[derive(Debug, Clone, Default)]
pub struct MockSubEngineFactory {
    journal: Journal,
    kinds: HashSet<String>,
    failing_init: HashSet<String>,
    launch_delays: HashMap<String, Duration>,
}

impl MockSubEngineFactory {
    /// Factory recording into `journal`, supporting no types.
    #[must_use]
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// Support `kind`.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kinds.insert(kind.into());
        self
    }

    /// Support `kind`, failing during `init`.
    #[must_use]
    pub fn with_failing_kind(mut self, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        self.kinds.insert(kind.clone());
        self.failing_init.insert(kind);
        self
    }

    /// Support `kind`, taking `delay` to launch.
    #[must_use]
    pub fn with_slow_kind(mut self, kind: impl Into<String>, delay: Duration) -> Self {
        let kind = kind.into();
        self.kinds.insert(kind.clone());
        self.launch_delays.insert(kind, delay);
        self
    }
}

impl SubEngineFactory for MockSubEngineFactory {
    fn create(&self, port: u16, bean: &ExternalConfigBean) -> EngineResult<Box<dyn SubEngine>> {
        if !self.kinds.contains(&bean.kind) {
            return Err(EngineError::UnsupportedSubEngine {
                kind: bean.kind.clone(),
            });
        }
        Ok(Box::new(MockSubEngine {
            journal: self.journal.clone(),
            port,
            fail_init: self.failing_init.contains(&bean.kind),
            launch_delay: self.launch_delays.get(&bean.kind).copied(),
        }))
    }
}

/// Sub-engine that records its lifecycle as `sub.<step> <port>`.
/// A slow launch records `sub.launch` on entry and `sub.ready` when done.
#[derive(Debug)]
pub struct MockSubEngine {
    journal: Journal,
    port: u16,
    fail_init: bool,
    launch_delay: Option<Duration>,
}

#[async_trait]
impl SubEngine for MockSubEngine {
    async fn init(&mut self) -> EngineResult<()> {
        self.journal.record(format!("sub.init {}", self.port));
        if self.fail_init {
            return Err(EngineError::InvalidConfig(format!(
                "sub-engine on {} rejected its config",
                self.port
            )));
        }
        Ok(())
    }

    async fn launch(&mut self) -> EngineResult<()> {
        self.journal.record(format!("sub.launch {}", self.port));
        if let Some(delay) = self.launch_delay {
            tokio::time::sleep(delay).await;
            self.journal.record(format!("sub.ready {}", self.port));
        }
        Ok(())
    }

    async fn close(&mut self) -> EngineResult<()> {
        self.journal.record(format!("sub.close {}", self.port));
        Ok(())
    }
}

/// Factory for [`RecordingBridgeView`]s.
#[derive(Debug, Clone, Default)]
pub struct RecordingBridgeFactory {
    journal: Journal,
    failing: bool,
    threads: Arc<Mutex<Vec<Option<String>>>>,
}

impl RecordingBridgeFactory {
    /// Factory whose views load successfully and stay loaded.
    #[must_use]
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// Factory whose views always fail to load.
    #[must_use]
    pub fn failing(journal: Journal) -> Self {
        Self {
            journal,
            failing: true,
            ..Self::default()
        }
    }

    /// Thread names views were created on.
    #[must_use]
    pub fn creation_threads(&self) -> Vec<Option<String>> {
        lock(&self.threads).clone()
    }
}

impl BridgeViewFactory for RecordingBridgeFactory {
    fn create(&self) -> BridgeResult<Arc<dyn BridgeView>> {
        lock(&self.threads).push(std::thread::current().name().map(str::to_owned));
        self.journal.record("bridge.create");
        Ok(Arc::new(RecordingBridgeView {
            journal: self.journal.clone(),
            failing: self.failing,
            destroyed: AtomicBool::new(false),
        }))
    }
}

/// Bridge view that records loads. A successful load never finishes.
#[derive(Debug)]
pub struct RecordingBridgeView {
    journal: Journal,
    failing: bool,
    destroyed: AtomicBool,
}

#[async_trait]
impl BridgeView for RecordingBridgeView {
    async fn drive(&self, url: &str) -> BridgeResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(BridgeError::Destroyed);
        }
        self.journal.record(format!("bridge.drive {url}"));
        if self.failing {
            return Err(BridgeError::Transport("connection refused".into()));
        }
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn load_blank(&self) {
        self.journal.record("bridge.blank");
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.journal.record("bridge.destroy");
    }
}
