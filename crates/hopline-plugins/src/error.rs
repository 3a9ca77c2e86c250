//! Plugin error types.

use std::fmt;
use std::path::PathBuf;

use crate::plugin::ResolutionStrategy;

/// Errors from plugin discovery and resolution.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// No installed package provides the requested plugin.
    #[error("plugin not found: {plugin}")]
    NotFound {
        /// Logical plugin id.
        plugin: String,
    },

    /// More than one installed package provides the requested plugin.
    #[error("conflicting plugins found for {plugin} from: {}", .packages.join(", "))]
    Conflict {
        /// Logical plugin id.
        plugin: String,
        /// Every package that declared itself a handler.
        packages: Vec<String>,
    },

    /// The provider answered but did not list the requested entry.
    #[error("plugin entry binary not found for {plugin}")]
    EntryNotFound {
        /// Logical plugin id.
        plugin: String,
    },

    /// A streamed entry or manifest path escapes its base directory.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path.
        path: String,
    },

    /// Two streamed entries normalise to the same destination.
    #[error("duplicate plugin entry: {path}")]
    DuplicateEntry {
        /// Normalised destination path.
        path: String,
    },

    /// A resolved path is missing, not a regular file, or not executable.
    #[error("not an executable file: {}", .path.display())]
    NotExecutable {
        /// The rejected path.
        path: PathBuf,
    },

    /// A streamed entry declared a mode that is neither an integer nor an
    /// octal string.
    #[error("invalid file mode for {path}: {message}")]
    InvalidMode {
        /// Entry path.
        path: String,
        /// What was wrong with the mode.
        message: String,
    },

    /// Every applicable strategy failed. The first failure is primary.
    #[error("failed to resolve plugin {plugin}: {primary}{}", fmt_suppressed(.suppressed))]
    ResolutionFailed {
        /// Logical plugin id.
        plugin: String,
        /// First strategy failure.
        primary: Box<StrategyFailure>,
        /// Later strategy failures, in attempt order.
        suppressed: Vec<StrategyFailure>,
    },

    /// An encoded options string is malformed.
    #[error("invalid plugin options: {0}")]
    InvalidOptions(String),

    /// The plugin ID is invalid.
    #[error("invalid plugin id: {0}")]
    InvalidId(String),

    /// Failed to parse a package manifest file.
    #[error("manifest parse error in {}: {message}", .path.display())]
    ManifestParseError {
        /// Path to the manifest file.
        path: PathBuf,
        /// Parse error message.
        message: String,
    },

    /// The package host reported a failure (delegate command, watcher).
    #[error("package host error: {0}")]
    Host(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One failed resolution strategy and its cause.
#[derive(Debug)]
pub struct StrategyFailure {
    /// The strategy that failed.
    pub strategy: ResolutionStrategy,
    /// Why it failed.
    pub cause: PluginError,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} strategy: {}", self.strategy, self.cause)
    }
}

fn fmt_suppressed(suppressed: &[StrategyFailure]) -> String {
    use fmt::Write as _;

    let mut out = String::new();
    for failure in suppressed {
        let _ = write!(out, "; suppressed {failure}");
    }
    out
}

impl PluginError {
    /// Every `(strategy, cause)` pair carried by a
    /// [`PluginError::ResolutionFailed`], primary first. Empty for other
    /// variants.
    #[must_use]
    pub fn strategy_failures(&self) -> Vec<&StrategyFailure> {
        match self {
            Self::ResolutionFailed {
                primary,
                suppressed,
                ..
            } => std::iter::once(primary.as_ref())
                .chain(suppressed.iter())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
