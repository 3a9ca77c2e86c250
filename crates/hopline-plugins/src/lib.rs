//! Native plugin discovery and executable resolution for Hopline.
//!
//! Plugins are executables shipped by installed packages. A package exposes
//! one or more *providers*, each handling a set of logical plugin ids such as
//! `naive-plugin`. The [`PluginRegistry`] enumerates providers on a
//! [`PackageHost`] and caches the result until the package set changes; the
//! [`PluginResolver`] turns a logical id plus [`PluginOptions`] into a
//! verified executable on disk.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod configuration;
pub mod error;
pub mod host;
pub mod known;
pub mod options;
mod paths;
pub mod plugin;
pub mod registry;
pub mod resolver;

#[cfg(test)]
mod testing;

pub use configuration::PluginConfiguration;
pub use error::{PluginError, PluginResult, StrategyFailure};
pub use host::{
    ChangeCallback, DirectoryPackageHost, EntryMode, EntryRow, HostInfo, PackageHost,
    ProviderInfo, ProviderMetadata, Subscription,
};
pub use known::KnownPlugin;
pub use options::PluginOptions;
pub use paths::is_executable;
pub use plugin::{ExecutableInfo, PluginDescriptor, PluginId, ResolutionStrategy};
pub use registry::{NONE_PLUGIN_ID, PluginCollection, PluginEntry, PluginRegistry};
pub use resolver::PluginResolver;
