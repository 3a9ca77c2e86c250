#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Unified configuration system for the Hopline orchestrator.
//!
//! This crate provides a single [`Config`] type covering storage paths,
//! plugin discovery, trust-store selection, the primary engine command,
//! sub-engine templates, process supervision, loopback bridges and logging.
//!
//! # Usage
//!
//! ```rust,no_run
//! use hopline_config::Config;
//!
//! // Load with full precedence chain (defaults → user → explicit file → env).
//! let resolved = Config::load(None).unwrap();
//! let config = resolved.config;
//! println!("Core binary: {}", config.engine.core_binary);
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Explicit file** (`hopline --config <path>`)
//! 2. **User** (`<platform config dir>/config.toml`)
//! 3. **Environment variables** (`HOPLINE_*`), fallback only
//! 4. **Embedded defaults** (`defaults.toml` compiled into binary)
//!
//! # Design
//!
//! This crate has **no dependencies on other internal hopline crates**.
//! Conversion from config types to domain types happens at the integration
//! boundary (the CLI's `config_bridge`).

/// Environment variable fallback resolution.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Layered configuration merging with precedence.
pub mod merge;
/// Resolved configuration display.
pub mod show;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

// Re-export primary types at the crate root.
pub use error::{ConfigError, ConfigResult};
pub use merge::{ConfigLayer, FieldSources};
pub use show::ResolvedConfig;
pub use types::*;

impl Config {
    /// Load configuration with full precedence chain.
    ///
    /// `explicit` is an optional config file given on the command line; it
    /// must exist when provided.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any config file is malformed or the final
    /// configuration fails validation.
    pub fn load(explicit: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(explicit, None)
    }

    /// Load configuration with an explicit user config directory override.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any config file is malformed or the final
    /// configuration fails validation.
    pub fn load_with_config_dir(
        explicit: Option<&std::path::Path>,
        config_dir: &std::path::Path,
    ) -> ConfigResult<ResolvedConfig> {
        loader::load(explicit, Some(config_dir))
    }

    /// Load configuration from a single file (no layering besides defaults).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }
}
