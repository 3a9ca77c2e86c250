//! Primary tunnel engine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::cache::monotonic_stamp;
use crate::error::{EngineError, EngineResult, ProcessError};
use crate::process::{forward_output, spawn_command, terminate};

/// Placeholder replaced by the config file path in argument templates.
pub const CONFIG_PLACEHOLDER: &str = "{config}";
/// Placeholder replaced by the hop's local port in argument templates.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Expand `{config}` and `{port}` in an argument template.
#[must_use]
pub fn render_args(template: &[String], config: &Path, port: Option<u16>) -> Vec<String> {
    let config = config.display().to_string();
    let port = port.map(|p| p.to_string()).unwrap_or_default();
    template
        .iter()
        .map(|arg| {
            arg.replace(CONFIG_PLACEHOLDER, &config)
                .replace(PORT_PLACEHOLDER, &port)
        })
        .collect()
}

/// The engine that carries the assembled chain.
#[async_trait]
pub trait TunnelEngine: Send + Sync {
    /// Validate and keep the top-level config.
    async fn load_config(&mut self, config: &str) -> EngineResult<()>;

    /// Start tunnelling with the loaded config.
    async fn start(&mut self) -> EngineResult<()>;

    /// Stop and release everything the engine holds.
    async fn close(&mut self) -> EngineResult<()>;
}

/// Creates primary engines.
pub trait TunnelEngineFactory: Send + Sync {
    /// A fresh engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be created.
    fn create(&self) -> EngineResult<Box<dyn TunnelEngine>>;
}

/// Require a JSON object carrying an `outbounds` array.
///
/// # Errors
///
/// Returns [`EngineError::InvalidConfig`] describing the first problem.
pub fn validate_core_config(config: &str) -> EngineResult<()> {
    let value: serde_json::Value =
        serde_json::from_str(config).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
    let Some(object) = value.as_object() else {
        return Err(EngineError::InvalidConfig(
            "top-level config must be a JSON object".into(),
        ));
    };
    if !object.get("outbounds").is_some_and(serde_json::Value::is_array) {
        return Err(EngineError::InvalidConfig(
            "config has no outbounds array".into(),
        ));
    }
    Ok(())
}

/// Runs an external core binary on the loaded config.
pub struct CoreProcessEngine {
    program: String,
    args: Vec<String>,
    cache_dir: PathBuf,
    kill_timeout: Duration,
    config: Option<String>,
    config_file: Option<PathBuf>,
    child: Option<Child>,
}

impl CoreProcessEngine {
    /// Engine running `program` with `args` (templated with `{config}`),
    /// writing its config under `cache_dir`.
    #[must_use]
    pub fn new(program: String, args: Vec<String>, cache_dir: PathBuf, kill_timeout: Duration) -> Self {
        Self {
            program,
            args,
            cache_dir,
            kill_timeout,
            config: None,
            config_file: None,
            child: None,
        }
    }
}

#[async_trait]
impl TunnelEngine for CoreProcessEngine {
    async fn load_config(&mut self, config: &str) -> EngineResult<()> {
        validate_core_config(config)?;
        self.config = Some(config.to_owned());
        debug!(program = %self.program, "Core config loaded");
        Ok(())
    }

    async fn start(&mut self) -> EngineResult<()> {
        let config = self.config.as_deref().ok_or(EngineError::NotLoaded)?;
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let path = self
            .cache_dir
            .join(format!("core_{}.json", monotonic_stamp()));
        self.config_file = Some(path.clone());
        tokio::fs::write(&path, config).await?;

        let argv: Vec<String> = std::iter::once(self.program.clone())
            .chain(render_args(&self.args, &path, None))
            .collect();
        let mut child = spawn_command(&argv, &HashMap::new()).map_err(|e| match e {
            ProcessError::Spawn { program, source } => EngineError::Start {
                program,
                message: source.to_string(),
            },
            other => EngineError::Start {
                program: self.program.clone(),
                message: other.to_string(),
            },
        })?;
        forward_output(&mut child, &self.program);
        info!(program = %self.program, pid = ?child.id(), "Core engine started");
        self.child = Some(child);
        Ok(())
    }

    async fn close(&mut self) -> EngineResult<()> {
        if let Some(mut child) = self.child.take() {
            terminate(&mut child, self.kill_timeout, &self.program).await;
        }
        if let Some(path) = self.config_file.take() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to delete core config");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CoreProcessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreProcessEngine")
            .field("program", &self.program)
            .field("loaded", &self.config.is_some())
            .field("running", &self.child.is_some())
            .finish_non_exhaustive()
    }
}

/// Factory for [`CoreProcessEngine`]s.
#[derive(Debug, Clone)]
pub struct CoreEngineFactory {
    /// Core binary.
    pub program: String,
    /// Argument template.
    pub args: Vec<String>,
    /// Where configs are written.
    pub cache_dir: PathBuf,
    /// SIGTERM grace period.
    pub kill_timeout: Duration,
}

impl TunnelEngineFactory for CoreEngineFactory {
    fn create(&self) -> EngineResult<Box<dyn TunnelEngine>> {
        Ok(Box::new(CoreProcessEngine::new(
            self.program.clone(),
            self.args.clone(),
            self.cache_dir.clone(),
            self.kill_timeout,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_placeholders() {
        let template = vec!["run".to_owned(), "-c".to_owned(), "{config}".to_owned(), "--port={port}".to_owned()];
        assert_eq!(
            render_args(&template, Path::new("/nb/core.json"), Some(1080)),
            vec!["run", "-c", "/nb/core.json", "--port=1080"]
        );
    }

    #[test]
    fn config_validation() {
        assert!(validate_core_config(r#"{"outbounds": []}"#).is_ok());
        for bad in ["[]", "{}", r#"{"outbounds": {}}"#, "not json"] {
            assert!(matches!(
                validate_core_config(bad),
                Err(EngineError::InvalidConfig(_))
            ));
        }
    }

    #[tokio::test]
    async fn start_requires_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = CoreProcessEngine::new(
            "/bin/sh".into(),
            Vec::new(),
            dir.path().to_path_buf(),
            Duration::from_secs(1),
        );
        assert!(matches!(engine.start().await, Err(EngineError::NotLoaded)));
    }

    #[tokio::test]
    async fn runs_core_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let factory = CoreEngineFactory {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "cat {config} > /dev/null; exec sleep 30".into()],
            cache_dir: dir.path().join("no_backup"),
            kill_timeout: Duration::from_secs(2),
        };
        let mut engine = factory.create().unwrap();
        engine.load_config(r#"{"outbounds": []}"#).await.unwrap();
        engine.start().await.unwrap();

        let written: Vec<_> = std::fs::read_dir(dir.path().join("no_backup"))
            .unwrap()
            .collect();
        assert_eq!(written.len(), 1);

        engine.close().await.unwrap();
        let left = std::fs::read_dir(dir.path().join("no_backup")).unwrap().count();
        assert_eq!(left, 0);
    }

    #[tokio::test]
    async fn spawn_failure_is_start_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = CoreProcessEngine::new(
            "/nonexistent/core".into(),
            vec!["{config}".into()],
            dir.path().to_path_buf(),
            Duration::from_secs(1),
        );
        engine.load_config(r#"{"outbounds": []}"#).await.unwrap();
        assert!(matches!(
            engine.start().await,
            Err(EngineError::Start { .. })
        ));
    }
}
