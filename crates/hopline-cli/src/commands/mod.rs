//! Subcommand implementations.

pub(crate) mod config;
pub(crate) mod plugins;
pub(crate) mod run;
