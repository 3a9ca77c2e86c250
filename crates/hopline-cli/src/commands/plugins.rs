//! Plugins command: list installed plugins and resolve one to an executable.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use hopline_config::Config;
use hopline_plugins::{
    PluginConfiguration, PluginDescriptor, PluginOptions, PluginRegistry, PluginResolver,
};

use crate::config_bridge;

fn resolver(cfg: &Config) -> Result<PluginResolver> {
    let host = config_bridge::to_package_host(cfg)?.with_watch(false);
    let registry = Arc::new(PluginRegistry::new(Arc::new(host)));
    Ok(PluginResolver::new(
        registry,
        config_bridge::no_backup_dir(cfg)?,
    ))
}

/// List every known plugin, one per line.
pub(crate) fn list_plugins(cfg: &Config, skip_internal: bool) -> Result<()> {
    let resolver = resolver(cfg)?;
    let collection = resolver.registry().list(skip_internal)?;

    if collection.is_empty() {
        println!("No plugins installed.");
        return Ok(());
    }

    for entry in collection.iter() {
        let origin = if entry.internal { " (internal)" } else { "" };
        println!(
            "{:<24} {:<32} {}{origin}",
            entry.id.as_str(),
            entry.package,
            entry.label
        );
    }
    Ok(())
}

fn describe(descriptor: &PluginDescriptor) -> serde_json::Value {
    serde_json::json!({
        "id": descriptor.id.as_str(),
        "version": descriptor.version,
        "path": descriptor.path.display().to_string(),
        "strategy": descriptor.strategy,
        "options": descriptor.options.to_string_without_id(),
    })
}

/// Resolve `id` and print the resulting executable.
pub(crate) async fn resolve_plugin(
    cfg: &Config,
    id: &str,
    options: Option<&str>,
    json: bool,
) -> Result<()> {
    let mut options = match options {
        Some(encoded) => PluginOptions::parse(encoded)
            .with_context(|| format!("invalid plugin options '{encoded}'"))?,
        None => PluginOptions::new(),
    };
    if options.id().is_none() {
        options.set_id(id);
    }

    let descriptor = resolver(cfg)?.resolve_async(id, &options).await?;
    print_descriptor(&descriptor, json)
}

/// Resolve the plugin selected in a stored plugin configuration file, using
/// its stored options or the provider's defaults.
pub(crate) async fn resolve_configured(cfg: &Config, file: &Path, json: bool) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let configuration = PluginConfiguration::parse(&text)
        .with_context(|| format!("invalid plugin configuration in {}", file.display()))?;

    let resolver = resolver(cfg)?;
    let selected =
        tokio::task::spawn_blocking(move || resolver.resolve_selected(&configuration)).await??;
    match selected {
        Some(descriptor) => print_descriptor(&descriptor, json),
        None => {
            println!("No plugin selected.");
            Ok(())
        },
    }
}

fn print_descriptor(descriptor: &PluginDescriptor, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&describe(descriptor))?);
    } else {
        println!("{}", descriptor.path.display());
        println!("  strategy: {}", descriptor.strategy);
        println!("  version:  {}", descriptor.version);
    }
    Ok(())
}
