//! Run command: drive one instance until interrupted.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use hopline_config::Config;
use hopline_instance::{
    BuildResult, GuardedPoolFactory, HttpBridgeFactory, InstanceOrchestrator, InstanceServices,
    InstanceSettings, ProcessError, StaticChainBuilder, UiExecutor,
};
use hopline_plugins::{PluginRegistry, PluginResolver};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};

use crate::config_bridge;

/// Build and launch the instance described by `build_file`, then wait for
/// ctrl-c, SIGTERM or a plugin crash and close it.
pub(crate) async fn run_instance(cfg: &Config, build_file: &Path) -> Result<()> {
    let result = BuildResult::from_file(build_file)
        .with_context(|| format!("failed to load {}", build_file.display()))?;

    let no_backup_dir = config_bridge::no_backup_dir(cfg)?.to_path_buf();
    std::fs::create_dir_all(&no_backup_dir)
        .with_context(|| format!("failed to create {}", no_backup_dir.display()))?;

    let host = config_bridge::to_package_host(cfg)?;
    let registry = Arc::new(PluginRegistry::new(Arc::new(host)));
    let resolver = PluginResolver::new(registry, &no_backup_dir);
    let (pools, crashes) = GuardedPoolFactory::new(config_bridge::to_process_settings(cfg));
    let ui = Arc::new(UiExecutor::new()?);

    let services = InstanceServices {
        resolver,
        chain: Arc::new(StaticChainBuilder::new(result)),
        engines: Arc::new(config_bridge::to_engine_factory(cfg)?),
        sub_engines: Arc::new(config_bridge::to_sub_engine_factory(cfg)?),
        pools: Arc::new(pools),
        bridges: Arc::new(HttpBridgeFactory),
        ui: Arc::clone(&ui),
    };
    let settings = InstanceSettings {
        no_backup_dir,
        bridge_retry_delay: config_bridge::bridge_retry_delay(cfg),
        trust: config_bridge::to_trust_store(cfg)?,
    };

    let instance = InstanceOrchestrator::new(services, settings);
    let outcome = drive(&instance, crashes).await;
    instance.close().await;
    shutdown_ui(ui).await;
    info!("instance closed");
    outcome
}

/// Join the UI thread without blocking a runtime worker.
async fn shutdown_ui(ui: Arc<UiExecutor>) {
    if let Err(e) = tokio::task::spawn_blocking(move || ui.shutdown()).await {
        warn!(error = %e, "UI shutdown task failed");
    }
}

/// Resolves with the signal name on ctrl-c or SIGTERM. The SIGTERM handler
/// is installed before this returns, so a signal sent afterwards is not lost.
fn shutdown_signal() -> Result<impl Future<Output = Result<&'static str>>> {
    let mut terminate = signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
    Ok(async move {
        tokio::select! {
            interrupt = tokio::signal::ctrl_c() => {
                interrupt.context("failed to listen for ctrl-c")?;
                Ok("SIGINT")
            },
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    })
}

async fn drive(
    instance: &InstanceOrchestrator,
    mut crashes: UnboundedReceiver<ProcessError>,
) -> Result<()> {
    let shutdown = shutdown_signal()?;
    instance.build().await.context("failed to build instance")?;
    instance.launch().await.context("failed to launch instance")?;
    info!(hops = instance.hops().await.len(), "instance launched, press ctrl-c to stop");

    tokio::select! {
        received = shutdown => {
            let received = received?;
            info!(signal = received, "shutdown requested");
            Ok(())
        },
        Some(crash) = crashes.recv() => {
            error!(error = %crash, "plugin process crashed");
            bail!("plugin process crashed: {crash}")
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nix::sys::signal::{Signal, raise};

    use super::*;

    #[tokio::test]
    async fn ui_shutdown_joins_off_the_runtime() {
        let ui = Arc::new(UiExecutor::new().unwrap());
        assert_eq!(ui.run(|| async { 7 }).await.unwrap(), 7);

        tokio::time::timeout(Duration::from_secs(5), shutdown_ui(Arc::clone(&ui)))
            .await
            .unwrap();
        assert!(ui.run(|| async {}).await.is_err());
    }

    #[tokio::test]
    async fn sigterm_requests_shutdown() {
        let shutdown = shutdown_signal().unwrap();
        raise(Signal::SIGTERM).unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), shutdown)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, "SIGTERM");
    }
}
