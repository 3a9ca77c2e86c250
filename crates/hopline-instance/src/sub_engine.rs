//! Sub-engines: hops whose config is an opaque document for another engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::cache::monotonic_stamp;
use crate::engine::render_args;
use crate::error::{EngineError, EngineResult, ProcessError};
use crate::process::{forward_output, spawn_command, terminate};
use crate::protocol::ExternalConfigBean;

/// Lifecycle of an engine embedded in one hop.
#[async_trait]
pub trait SubEngine: Send + Sync {
    /// Prepare the engine. Called during build.
    async fn init(&mut self) -> EngineResult<()>;

    /// Start serving on the hop's port.
    async fn launch(&mut self) -> EngineResult<()>;

    /// Stop and release resources. Safe before `launch`.
    async fn close(&mut self) -> EngineResult<()>;
}

/// Maps external config types to sub-engines.
pub trait SubEngineFactory: Send + Sync {
    /// Sub-engine for a hop on `port`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnsupportedSubEngine`] for unknown types.
    fn create(&self, port: u16, bean: &ExternalConfigBean) -> EngineResult<Box<dyn SubEngine>>;
}

/// How to run one external config type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubEngineTemplate {
    /// Program to run.
    pub command: String,
    /// Argument template with `{config}` and `{port}` placeholders.
    pub args: Vec<String>,
    /// Config file extension.
    pub config_extension: String,
}

/// A sub-engine backed by a child process.
pub struct CommandSubEngine {
    kind: String,
    port: u16,
    config: String,
    template: SubEngineTemplate,
    cache_dir: PathBuf,
    kill_timeout: Duration,
    config_file: Option<PathBuf>,
    child: Option<Child>,
}

impl CommandSubEngine {
    fn program(&self) -> &str {
        &self.template.command
    }
}

#[async_trait]
impl SubEngine for CommandSubEngine {
    async fn init(&mut self) -> EngineResult<()> {
        if self.config.trim().is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "{} config for port {} is empty",
                self.kind, self.port
            )));
        }
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let path = self.cache_dir.join(format!(
            "{}_{}.{}",
            self.kind,
            monotonic_stamp(),
            self.template.config_extension
        ));
        self.config_file = Some(path.clone());
        tokio::fs::write(&path, &self.config).await?;
        debug!(kind = %self.kind, port = self.port, path = %path.display(), "Sub-engine initialised");
        Ok(())
    }

    async fn launch(&mut self) -> EngineResult<()> {
        let Some(config_file) = self.config_file.as_ref() else {
            return Err(EngineError::NotLoaded);
        };
        let argv: Vec<String> = std::iter::once(self.template.command.clone())
            .chain(render_args(&self.template.args, config_file, Some(self.port)))
            .collect();
        let mut child = spawn_command(&argv, &HashMap::new()).map_err(|e| EngineError::Start {
            program: self.template.command.clone(),
            message: match e {
                ProcessError::Spawn { source, .. } => source.to_string(),
                other => other.to_string(),
            },
        })?;
        forward_output(&mut child, self.program());
        info!(kind = %self.kind, port = self.port, pid = ?child.id(), "Sub-engine started");
        self.child = Some(child);
        Ok(())
    }

    async fn close(&mut self) -> EngineResult<()> {
        if let Some(mut child) = self.child.take() {
            terminate(&mut child, self.kill_timeout, &self.template.command).await;
        }
        if let Some(path) = self.config_file.take() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {},
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete sub-engine config"),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandSubEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSubEngine")
            .field("kind", &self.kind)
            .field("port", &self.port)
            .field("running", &self.child.is_some())
            .finish_non_exhaustive()
    }
}

/// Creates [`CommandSubEngine`]s from configured templates.
#[derive(Debug, Clone, Default)]
pub struct CommandSubEngineFactory {
    templates: HashMap<String, SubEngineTemplate>,
    cache_dir: PathBuf,
    kill_timeout: Duration,
}

impl CommandSubEngineFactory {
    /// Factory writing configs under `cache_dir`.
    #[must_use]
    pub fn new(cache_dir: PathBuf, kill_timeout: Duration) -> Self {
        Self {
            templates: HashMap::new(),
            cache_dir,
            kill_timeout,
        }
    }

    /// Register `template` for config type `kind`.
    #[must_use]
    pub fn with_template(mut self, kind: impl Into<String>, template: SubEngineTemplate) -> Self {
        self.templates.insert(kind.into(), template);
        self
    }

    /// Registered types.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

impl SubEngineFactory for CommandSubEngineFactory {
    fn create(&self, port: u16, bean: &ExternalConfigBean) -> EngineResult<Box<dyn SubEngine>> {
        let template = self
            .templates
            .get(&bean.kind)
            .ok_or_else(|| EngineError::UnsupportedSubEngine {
                kind: bean.kind.clone(),
            })?;
        Ok(Box::new(CommandSubEngine {
            kind: bean.kind.clone(),
            port,
            config: bean.config.clone(),
            template: template.clone(),
            cache_dir: self.cache_dir.clone(),
            kill_timeout: self.kill_timeout,
            config_file: None,
            child: None,
        }))
    }
}
