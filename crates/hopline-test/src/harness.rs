//! Shared test harness wiring mocks into an orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hopline_instance::{
    BuildResult, InstanceOrchestrator, InstanceServices, InstanceSettings, RootCaProvider,
    StaticChainBuilder, TrustStore, UiExecutor,
};
use hopline_plugins::{KnownPlugin, PluginRegistry, PluginResolver};
use tempfile::TempDir;
use tracing::debug;

use crate::fixtures::{TEST_HOST_PACKAGE, direct_provider, write_executable};
use crate::mocks::{
    Journal, MockEngineFactory, MockPackageHost, MockPoolFactory, MockSubEngineFactory,
    RecordingBridgeFactory,
};

/// Install a `tracing` subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Mocks and directories for one orchestrator test.
///
/// Owns a `TempDir` holding the package library, no-backup and asset
/// directories; it is removed when the harness drops. Replace a mock factory
/// field before calling [`orchestrator`](Self::orchestrator) to change its
/// behaviour.
pub struct InstanceHarness {
    /// Shared call log.
    pub journal: Journal,
    /// Package host behind the registry.
    pub host: Arc<MockPackageHost>,
    /// Resolver shared by every orchestrator built here.
    pub resolver: PluginResolver,
    /// Primary engine mock.
    pub engines: MockEngineFactory,
    /// Sub-engine mock.
    pub sub_engines: MockSubEngineFactory,
    /// Process pool mock.
    pub pools: MockPoolFactory,
    /// Bridge view mock.
    pub bridges: RecordingBridgeFactory,
    /// UI thread.
    pub ui: Arc<UiExecutor>,
    /// Root store for plugin processes.
    pub trust: TrustStore,
    dir: TempDir,
}

impl InstanceHarness {
    /// Harness with an empty package host.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory or the UI thread cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create tempdir");
        for sub in ["lib", "no_backup", "files", "assets"] {
            std::fs::create_dir_all(dir.path().join(sub)).expect("failed to create harness dir");
        }
        let journal = Journal::new();
        let host = Arc::new(MockPackageHost::new(TEST_HOST_PACKAGE));
        let registry = Arc::new(PluginRegistry::new(host.clone()));
        let resolver = PluginResolver::new(registry, &dir.path().join("no_backup"));
        let trust = TrustStore::new(
            RootCaProvider::System,
            &dir.path().join("files"),
            &dir.path().join("assets"),
        );

        Self {
            engines: MockEngineFactory::new(journal.clone()),
            sub_engines: MockSubEngineFactory::new(journal.clone()),
            pools: MockPoolFactory::new(journal.clone()),
            bridges: RecordingBridgeFactory::new(journal.clone()),
            ui: Arc::new(UiExecutor::new().expect("failed to start UI executor")),
            journal,
            host,
            resolver,
            trust,
            dir,
        }
    }

    /// Root of the temporary directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Native library directory for installed test packages.
    #[must_use]
    pub fn lib_dir(&self) -> PathBuf {
        self.dir.path().join("lib")
    }

    /// Directory cache files are written to.
    #[must_use]
    pub fn no_backup_dir(&self) -> PathBuf {
        self.dir.path().join("no_backup")
    }

    /// Install a package providing `plugin` through an executable found
    /// directly in the library directory. Returns the executable path.
    #[must_use]
    pub fn install_direct(&self, package: &str, plugin: KnownPlugin) -> PathBuf {
        let lib_dir = self.lib_dir().join(package);
        let name = format!("lib{}.so", plugin.plugin_id_str().trim_end_matches("-plugin"));
        let exe = write_executable(&lib_dir, &name);
        self.host.add_provider(direct_provider(
            package,
            plugin.plugin_id_str(),
            &lib_dir,
            &name,
            "2.0",
        ));
        debug!(package, plugin = plugin.plugin_id_str(), exe = %exe.display(), "Installed test package");
        exe
    }

    /// Orchestrator for `result` using the harness mocks.
    #[must_use]
    pub fn orchestrator(&self, result: BuildResult) -> InstanceOrchestrator {
        let services = InstanceServices {
            resolver: self.resolver.clone(),
            chain: Arc::new(StaticChainBuilder::new(result)),
            engines: Arc::new(self.engines.clone()),
            sub_engines: Arc::new(self.sub_engines.clone()),
            pools: Arc::new(self.pools.clone()),
            bridges: Arc::new(self.bridges.clone()),
            ui: Arc::clone(&self.ui),
        };
        let settings = InstanceSettings {
            no_backup_dir: self.no_backup_dir(),
            bridge_retry_delay: Duration::from_millis(10),
            trust: self.trust.clone(),
        };
        debug!(root = %self.dir.path().display(), "Harness orchestrator");
        InstanceOrchestrator::new(services, settings)
    }
}

impl Default for InstanceHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InstanceHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHarness")
            .field("root", &self.dir.path())
            .finish_non_exhaustive()
    }
}
