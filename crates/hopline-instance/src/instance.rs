//! The instance orchestrator: one running proxy profile.
//!
//! An instance moves through `Uninitialized → Built → Launched → Closed`.
//!
//! - `build` composes the chain, resolves plugins (once per logical id),
//!   generates plugin configs, initialises sub-engines and finally loads the
//!   top-level config into the primary engine.
//! - `launch` starts hops in declared order so every upstream listener is up
//!   before anything forwards into it, then the primary engine, then bridges.
//! - `close` tears everything down exactly once, in the order sub-engines,
//!   cache files, bridges, processes, primary engine. It is safe after a
//!   partial `launch`, and close-time failures are only logged.
//!
//! A failed `build` rolls back what it prepared, so it may be retried.
//! Dropping an instance without `close` stops bridges, deletes cache files
//! and kills every child process it owns.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hopline_plugins::{PluginDescriptor, PluginOptions, PluginResolver};
use tokio::net::TcpSocket;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeView, BridgeViewFactory, bridge_url, run_bridge};
use crate::cache::CacheFileFactory;
use crate::chain::{BridgeRequirement, ChainBuilder, HopDefinition};
use crate::engine::{TunnelEngine, TunnelEngineFactory};
use crate::error::{InstanceError, InstanceResult, InstanceState};
use crate::process::{ProcessPool, ProcessPoolFactory};
use crate::protocol::ProtocolBean;
use crate::sub_engine::{SubEngine, SubEngineFactory};
use crate::trust::{SSL_CERT_FILE, TrustStore};
use crate::ui::UiExecutor;

/// What one hop resolved to during build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopSpec {
    /// Local listen port.
    pub port: u16,
    /// Outbound protocol.
    pub bean: ProtocolBean,
    /// Resolved plugin for plugin-backed hops.
    pub plugin: Option<PluginDescriptor>,
    /// Generated plugin config.
    pub payload: Option<String>,
    /// Where the payload was written at launch.
    pub config_file: Option<PathBuf>,
}

struct HopRecord {
    spec: HopSpec,
    sub_engine: Option<Box<dyn SubEngine>>,
}

/// Collaborators an instance drives.
#[derive(Clone)]
pub struct InstanceServices {
    /// Plugin resolver.
    pub resolver: PluginResolver,
    /// Chain builder for this profile.
    pub chain: Arc<dyn ChainBuilder>,
    /// Primary engine factory.
    pub engines: Arc<dyn TunnelEngineFactory>,
    /// Sub-engine factory.
    pub sub_engines: Arc<dyn SubEngineFactory>,
    /// Process pool factory.
    pub pools: Arc<dyn ProcessPoolFactory>,
    /// Bridge view factory.
    pub bridges: Arc<dyn BridgeViewFactory>,
    /// UI executor for bridge views.
    pub ui: Arc<UiExecutor>,
}

impl std::fmt::Debug for InstanceServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceServices")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

/// Per-instance settings.
#[derive(Debug, Clone)]
pub struct InstanceSettings {
    /// Non-backed-up directory for cache files.
    pub no_backup_dir: PathBuf,
    /// Pause between bridge retries.
    pub bridge_retry_delay: Duration,
    /// Root store for plugin processes.
    pub trust: TrustStore,
}

struct InstanceInner {
    state: InstanceState,
    hops: Vec<HopRecord>,
    cache_files: CacheFileFactory,
    plugins: HashMap<String, PluginDescriptor>,
    bridge_requirements: Vec<BridgeRequirement>,
    bridges: Vec<Arc<dyn BridgeView>>,
    pool: Option<Box<dyn ProcessPool>>,
    engine: Option<Box<dyn TunnelEngine>>,
}

impl InstanceInner {
    fn require_state(&self, expected: InstanceState, operation: &'static str) -> InstanceResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(InstanceError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

/// Lifecycle owner for one running profile.
pub struct InstanceOrchestrator {
    services: InstanceServices,
    settings: InstanceSettings,
    inner: Mutex<InstanceInner>,
    closed: AtomicBool,
    bridge_cancel: CancellationToken,
}

fn validate_ports(hops: &[HopDefinition]) -> InstanceResult<()> {
    let mut seen = HashSet::new();
    for hop in hops {
        if hop.port == 0 {
            return Err(InstanceError::InvalidPort(hop.port));
        }
        if !seen.insert(hop.port) {
            return Err(InstanceError::DuplicatePort(hop.port));
        }
    }
    Ok(())
}

/// Bind `127.0.0.1:port` without listening. Fails while another socket
/// listens there; idle reservations with `SO_REUSEADDR` do not conflict.
fn ensure_port_free(port: u16) -> InstanceResult<()> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket
        .bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
        .map_err(|source| InstanceError::PortInUse { port, source })
}

impl InstanceOrchestrator {
    /// A new, uninitialised instance.
    #[must_use]
    pub fn new(services: InstanceServices, settings: InstanceSettings) -> Self {
        let cache_files = CacheFileFactory::new(settings.no_backup_dir.clone());
        Self {
            services,
            settings,
            inner: Mutex::new(InstanceInner {
                state: InstanceState::Uninitialized,
                hops: Vec::new(),
                cache_files,
                plugins: HashMap::new(),
                bridge_requirements: Vec::new(),
                bridges: Vec::new(),
                pool: None,
                engine: None,
            }),
            closed: AtomicBool::new(false),
            bridge_cancel: CancellationToken::new(),
        }
    }

    /// Current state.
    pub async fn state(&self) -> InstanceState {
        self.inner.lock().await.state
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Snapshot of the hop arena.
    pub async fn hops(&self) -> Vec<HopSpec> {
        self.inner
            .lock()
            .await
            .hops
            .iter()
            .map(|hop| hop.spec.clone())
            .collect()
    }

    /// Cache files currently registered for deletion.
    pub async fn cache_files(&self) -> Vec<PathBuf> {
        self.inner.lock().await.cache_files.files().to_vec()
    }

    fn ensure_open(&self) -> InstanceResult<()> {
        if self.is_closed() {
            Err(InstanceError::Closed)
        } else {
            Ok(())
        }
    }

    async fn resolve_plugin(
        &self,
        plugins: &mut HashMap<String, PluginDescriptor>,
        plugin_id: &str,
    ) -> InstanceResult<PluginDescriptor> {
        if let Some(cached) = plugins.get(plugin_id) {
            return Ok(cached.clone());
        }
        let descriptor = self
            .services
            .resolver
            .resolve_async(plugin_id, &PluginOptions::with_id(plugin_id))
            .await?;
        plugins.insert(plugin_id.to_owned(), descriptor.clone());
        Ok(descriptor)
    }

    /// Compose the chain and prepare every hop.
    ///
    /// # Errors
    ///
    /// - [`InstanceError::InvalidState`] unless uninitialised.
    /// - [`InstanceError::InvalidPort`] / [`InstanceError::DuplicatePort`]
    ///   for bad hop ports, [`InstanceError::PortInUse`] if something
    ///   already listens on one.
    /// - Plugin, sub-engine and engine failures, unchanged. The primary
    ///   engine's config rejection surfaces as
    ///   [`EngineError::InvalidConfig`](crate::EngineError::InvalidConfig).
    ///
    /// On failure everything prepared so far is released and the instance
    /// stays uninitialised, so `build` may be called again.
    pub async fn build(&self) -> InstanceResult<()> {
        self.ensure_open()?;
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.require_state(InstanceState::Uninitialized, "build")?;

        match self.prepare(inner).await {
            Ok(()) => {
                inner.state = InstanceState::Built;
                info!(hops = inner.hops.len(), "Instance built");
                Ok(())
            },
            Err(e) => {
                warn!(error = %e, "Build failed, rolling back");
                Self::roll_back(inner).await;
                Err(e)
            },
        }
    }

    async fn prepare(&self, inner: &mut InstanceInner) -> InstanceResult<()> {
        let result = self.services.chain.build()?;
        validate_ports(&result.hops)?;
        for hop in &result.hops {
            ensure_port_free(hop.port)?;
        }
        inner.engine = Some(self.services.engines.create()?);

        for definition in result.hops {
            let HopDefinition { port, bean } = definition;
            let mut record = HopRecord {
                spec: HopSpec {
                    port,
                    bean,
                    plugin: None,
                    payload: None,
                    config_file: None,
                },
                sub_engine: None,
            };

            if let Some(plugin) = record.spec.bean.plugin() {
                let descriptor = self
                    .resolve_plugin(&mut inner.plugins, plugin.plugin_id_str())
                    .await?;
                record.spec.payload = record
                    .spec
                    .bean
                    .build_config(port, &mut inner.cache_files)?;
                debug!(port, plugin = %descriptor.id, strategy = %descriptor.strategy, "Prepared plugin hop");
                record.spec.plugin = Some(descriptor);
            } else if let ProtocolBean::External(external) = &record.spec.bean {
                if record.spec.bean.sub_engine_type().is_some() {
                    let mut sub_engine = self.services.sub_engines.create(port, external)?;
                    if let Err(e) = sub_engine.init().await {
                        if let Err(close) = sub_engine.close().await {
                            warn!(port, error = %close, "Failed to close sub-engine after init failure");
                        }
                        return Err(e.into());
                    }
                    debug!(port, kind = %external.kind, "Initialised sub-engine");
                    record.sub_engine = Some(sub_engine);
                }
            }
            inner.hops.push(record);
        }

        if let Some(engine) = inner.engine.as_mut() {
            engine.load_config(&result.config).await?;
        }
        inner.bridge_requirements = result.bridges;
        Ok(())
    }

    /// Undo a partial `prepare`. Nothing has been started yet.
    async fn roll_back(inner: &mut InstanceInner) {
        Self::close_sub_engines(&mut inner.hops).await;
        inner.hops.clear();
        inner.plugins.clear();
        inner.bridge_requirements.clear();
        let deleted = inner.cache_files.delete_all().await;
        debug!(count = deleted, "Cache files removed");
        if let Some(mut engine) = inner.engine.take() {
            if let Err(e) = engine.close().await {
                warn!(error = %e, "Failed to close primary engine");
            }
        }
    }

    async fn close_sub_engines(hops: &mut [HopRecord]) {
        for hop in hops {
            if let Some(sub_engine) = hop.sub_engine.as_mut() {
                if let Err(e) = sub_engine.close().await {
                    warn!(port = hop.spec.port, error = %e, "Failed to close sub-engine");
                }
            }
        }
    }

    /// Start every hop, then the primary engine, then bridges.
    ///
    /// # Errors
    ///
    /// - [`InstanceError::InvalidState`] unless built.
    /// - [`InstanceError::Closed`] if `close` raced in.
    /// - Process start, sub-engine and engine failures, unchanged. Whatever
    ///   started stays running until [`close`](Self::close).
    pub async fn launch(&self) -> InstanceResult<()> {
        self.ensure_open()?;
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.require_state(InstanceState::Built, "launch")?;

        let base_env = self.settings.trust.environment();
        for hop in &mut inner.hops {
            self.ensure_open()?;

            if let Some(sub_engine) = hop.sub_engine.as_mut() {
                sub_engine.launch().await?;
                continue;
            }
            let (Some(launch), Some(plugin), Some(payload)) = (
                hop.spec.bean.launch(),
                hop.spec.plugin.as_ref(),
                hop.spec.payload.as_deref(),
            ) else {
                continue;
            };

            let config_file = inner
                .cache_files
                .write(launch.prefix, launch.extension, payload)?;
            let mut env = base_env.clone();
            if let Some(certificate) = hop.spec.bean.trust_material() {
                let ca_file = inner.cache_files.write(launch.prefix, "ca", certificate)?;
                env.insert(SSL_CERT_FILE.to_owned(), ca_file.display().to_string());
            }
            let argv = launch.argv(&plugin.path, &config_file);
            let plugin_id = plugin.id.clone();

            let pool = inner
                .pool
                .get_or_insert_with(|| self.services.pools.create());
            pool.start(argv, env)?;
            info!(port = hop.spec.port, plugin = %plugin_id, config = %config_file.display(), "Started plugin hop");
            hop.spec.config_file = Some(config_file);
        }

        self.ensure_open()?;
        if let Some(engine) = inner.engine.as_mut() {
            engine.start().await?;
        }

        for requirement in &inner.bridge_requirements {
            self.ensure_open()?;
            let factory = Arc::clone(&self.services.bridges);
            let view = self
                .services
                .ui
                .run(move || async move { factory.create() })
                .await??;
            inner.bridges.push(Arc::clone(&view));

            let url = bridge_url(requirement.port);
            let cancel = self.bridge_cancel.clone();
            let delay = self.settings.bridge_retry_delay;
            self.services
                .ui
                .spawn(move || run_bridge(view, url, delay, cancel))?;
            debug!(bridge = %requirement.name, port = requirement.port, "Bridge started");
        }

        inner.state = InstanceState::Launched;
        info!("Instance launched");
        Ok(())
    }

    /// Tear down everything this instance started. Only the first call does
    /// anything.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Instance already closed");
            return;
        }
        self.bridge_cancel.cancel();
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        Self::close_sub_engines(&mut inner.hops).await;

        let deleted = inner.cache_files.delete_all().await;
        debug!(count = deleted, "Cache files removed");

        for view in inner.bridges.drain(..) {
            let teardown = self
                .services
                .ui
                .run(move || async move {
                    view.load_blank().await;
                    view.destroy().await;
                })
                .await;
            if let Err(e) = teardown {
                warn!(error = %e, "Failed to tear down bridge");
            }
        }

        if let Some(pool) = inner.pool.take() {
            pool.close_all().await;
        }

        if let Some(mut engine) = inner.engine.take() {
            if let Err(e) = engine.close().await {
                warn!(error = %e, "Failed to close primary engine");
            }
        }

        inner.state = InstanceState::Closed;
        info!("Instance closed");
    }
}

impl Drop for InstanceOrchestrator {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.bridge_cancel.cancel();
        // Children are spawned kill-on-drop, and dropping the pool stops its
        // guards, so only the cache files need explicit work here.
        let removed = self.inner.get_mut().cache_files.delete_all_blocking();
        warn!(cache_files = removed, "Instance dropped without close");
    }
}

impl std::fmt::Debug for InstanceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceOrchestrator")
            .field("closed", &self.is_closed())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NativeBean;

    fn hop(port: u16) -> HopDefinition {
        HopDefinition {
            port,
            bean: ProtocolBean::Native(NativeBean {
                protocol: "vmess".into(),
            }),
        }
    }

    #[test]
    fn ports_must_be_unique_and_nonzero() {
        assert!(validate_ports(&[hop(1080), hop(1081)]).is_ok());
        assert!(matches!(
            validate_ports(&[hop(1080), hop(1080)]),
            Err(InstanceError::DuplicatePort(1080))
        ));
        assert!(matches!(
            validate_ports(&[hop(0)]),
            Err(InstanceError::InvalidPort(0))
        ));
    }

    #[test]
    fn listening_port_is_reported_in_use() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(matches!(
            ensure_port_free(port),
            Err(InstanceError::PortInUse { port: p, .. }) if p == port
        ));

        drop(listener);
        ensure_port_free(port).unwrap();
    }
}
