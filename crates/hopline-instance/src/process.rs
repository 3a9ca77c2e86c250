//! Supervised child processes for plugin hops.
//!
//! A [`ProcessPool`] owns every child it starts. [`GuardedProcessPool`] runs
//! one guard task per child that forwards its output to `tracing`, restarts
//! it when it exits, and gives up when it dies right after starting.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ProcessError, ProcessResult};

/// A child started by a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Pool-local id.
    pub id: u64,
    /// Program path.
    pub program: String,
}

/// Starts and owns child processes.
#[async_trait]
pub trait ProcessPool: Send + Sync {
    /// Spawn `argv` with `env` added to the inherited environment. Returns
    /// once the child is spawned.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be spawned or the pool is
    /// closed.
    fn start(&self, argv: Vec<String>, env: HashMap<String, String>) -> ProcessResult<ProcessHandle>;

    /// Terminate every child and wait for its supervision to end.
    async fn close_all(&self);
}

/// Creates process pools on demand.
pub trait ProcessPoolFactory: Send + Sync {
    /// A fresh, empty pool.
    fn create(&self) -> Box<dyn ProcessPool>;
}

/// Supervision timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSettings {
    /// Pause before restarting an exited child.
    pub restart_delay: Duration,
    /// A child exiting sooner than this after start is a crash.
    pub fast_fail: Duration,
    /// Grace period between SIGTERM and SIGKILL.
    pub kill_timeout: Duration,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_secs(1),
            fast_fail: Duration::from_secs(1),
            kill_timeout: Duration::from_secs(5),
        }
    }
}

pub(crate) fn spawn_command(argv: &[String], env: &HashMap<String, String>) -> ProcessResult<Child> {
    let (program, args) = argv.split_first().ok_or(ProcessError::EmptyCommand)?;
    Command::new(program)
        .args(args)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })
}

/// Log every line the child writes.
pub(crate) fn forward_output(child: &mut Child, program: &str) {
    fn pump(stream: impl AsyncRead + Unpin + Send + 'static, program: String, stream_name: &'static str) {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(program = %program, stream = stream_name, "{line}");
            }
        });
    }
    if let Some(stdout) = child.stdout.take() {
        pump(stdout, program.to_owned(), "stdout");
    }
    if let Some(stderr) = child.stderr.take() {
        pump(stderr, program.to_owned(), "stderr");
    }
}

/// SIGTERM, then SIGKILL after `grace`.
pub(crate) async fn terminate(child: &mut Child, grace: Duration, program: &str) {
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            debug!(program = %program, error = %e, "SIGTERM failed");
        }
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            debug!(program = %program, status = ?status.ok(), "Process exited");
            return;
        }
        warn!(program = %program, "Process ignored SIGTERM, killing");
    }
    if let Err(e) = child.kill().await {
        debug!(program = %program, error = %e, "Kill failed");
    }
}

fn describe(status: &std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => status.to_string(),
        Err(e) => format!("wait failed: {e}"),
    }
}

/// Process pool that restarts children until closed.
pub struct GuardedProcessPool {
    settings: ProcessSettings,
    cancel: CancellationToken,
    guards: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    errors: mpsc::UnboundedSender<ProcessError>,
}

impl GuardedProcessPool {
    /// Pool reporting crashed children on `errors`.
    #[must_use]
    pub fn new(settings: ProcessSettings, errors: mpsc::UnboundedSender<ProcessError>) -> Self {
        Self {
            settings,
            cancel: CancellationToken::new(),
            guards: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            errors,
        }
    }
}

#[async_trait]
impl ProcessPool for GuardedProcessPool {
    fn start(&self, argv: Vec<String>, env: HashMap<String, String>) -> ProcessResult<ProcessHandle> {
        if self.cancel.is_cancelled() {
            return Err(ProcessError::Closed);
        }
        let mut child = spawn_command(&argv, &env)?;
        let program = argv.first().cloned().unwrap_or_default();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(id, program = %program, pid = ?child.id(), "Started process");
        forward_output(&mut child, &program);

        let guard = Guard {
            argv: Arc::new(argv),
            env: Arc::new(env),
            program: program.clone(),
            settings: self.settings,
            cancel: self.cancel.clone(),
            errors: self.errors.clone(),
        };
        let handle = tokio::spawn(guard.run(child));
        self.guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);

        Ok(ProcessHandle { id, program })
    }

    async fn close_all(&self) {
        self.cancel.cancel();
        let guards = std::mem::take(&mut *self.guards.lock().unwrap_or_else(PoisonError::into_inner));
        let count = guards.len();
        for result in join_all(guards).await {
            if let Err(e) = result {
                warn!(error = %e, "Process guard panicked");
            }
        }
        debug!(count, "Process pool closed");
    }
}

impl Drop for GuardedProcessPool {
    fn drop(&mut self) {
        // Guards terminate their child when cancelled.
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for GuardedProcessPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedProcessPool")
            .field("settings", &self.settings)
            .field("closed", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

struct Guard {
    argv: Arc<Vec<String>>,
    env: Arc<HashMap<String, String>>,
    program: String,
    settings: ProcessSettings,
    cancel: CancellationToken,
    errors: mpsc::UnboundedSender<ProcessError>,
}

impl Guard {
    async fn run(self, mut child: Child) {
        loop {
            let started = Instant::now();
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                () = self.cancel.cancelled() => None,
            };
            let Some(status) = exited else {
                terminate(&mut child, self.settings.kill_timeout, &self.program).await;
                return;
            };
            if self.cancel.is_cancelled() {
                return;
            }

            let status = describe(&status);
            if started.elapsed() < self.settings.fast_fail {
                error!(program = %self.program, status = %status, "Process exited immediately, not restarting");
                let _ = self.errors.send(ProcessError::Crashed {
                    program: self.program.clone(),
                    status,
                });
                return;
            }
            warn!(program = %self.program, status = %status, "Process exited, restarting");

            tokio::select! {
                () = tokio::time::sleep(self.settings.restart_delay) => {},
                () = self.cancel.cancelled() => return,
            }
            child = match spawn_command(&self.argv, &self.env) {
                Ok(mut next) => {
                    forward_output(&mut next, &self.program);
                    next
                },
                Err(e) => {
                    error!(program = %self.program, error = %e, "Restart failed");
                    let _ = self.errors.send(e);
                    return;
                },
            };
        }
    }
}

/// Factory for [`GuardedProcessPool`]s sharing one crash channel.
#[derive(Debug, Clone)]
pub struct GuardedPoolFactory {
    settings: ProcessSettings,
    errors: mpsc::UnboundedSender<ProcessError>,
}

impl GuardedPoolFactory {
    /// Factory plus the receiving end of its crash channel.
    #[must_use]
    pub fn new(settings: ProcessSettings) -> (Self, mpsc::UnboundedReceiver<ProcessError>) {
        let (errors, rx) = mpsc::unbounded_channel();
        (Self { settings, errors }, rx)
    }
}

impl ProcessPoolFactory for GuardedPoolFactory {
    fn create(&self) -> Box<dyn ProcessPool> {
        Box::new(GuardedProcessPool::new(self.settings, self.errors.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".into(), "-c".into(), script.into()]
    }

    fn quick() -> ProcessSettings {
        ProcessSettings {
            restart_delay: Duration::from_millis(10),
            fast_fail: Duration::from_millis(500),
            kill_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn empty_argv_is_rejected() {
        let (factory, _rx) = GuardedPoolFactory::new(quick());
        let pool = factory.create();
        assert!(matches!(
            pool.start(Vec::new(), HashMap::new()),
            Err(ProcessError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let (factory, _rx) = GuardedPoolFactory::new(quick());
        let pool = factory.create();
        let err = pool
            .start(vec!["/nonexistent/plugin".into()], HashMap::new())
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn immediate_exit_is_reported_once() {
        let (factory, mut rx) = GuardedPoolFactory::new(quick());
        let pool = factory.create();
        pool.start(sh("exit 3"), HashMap::new()).unwrap();

        let crash = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(crash, ProcessError::Crashed { ref program, .. } if program == "/bin/sh"));
        pool.close_all().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_all_terminates_children_and_refuses_new_ones() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("env");
        let (factory, _rx) = GuardedPoolFactory::new(quick());
        let pool = factory.create();

        let mut env = HashMap::new();
        env.insert("HOPLINE_MARKER".to_owned(), "set".to_owned());
        let script = format!(
            "echo $HOPLINE_MARKER > {0}.tmp && mv {0}.tmp {0}; exec sleep 30",
            marker.display()
        );
        pool.start(sh(&script), env).unwrap();

        for _ in 0..100 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "set");

        tokio::time::timeout(Duration::from_secs(5), pool.close_all())
            .await
            .unwrap();
        assert!(matches!(
            pool.start(sh("true"), HashMap::new()),
            Err(ProcessError::Closed)
        ));
    }

    #[tokio::test]
    async fn dropping_pool_terminates_children() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let (factory, _rx) = GuardedPoolFactory::new(quick());
        let pool = factory.create();
        let script = format!(
            "echo $$ > {0}.tmp && mv {0}.tmp {0}; exec sleep 30",
            pid_file.display()
        );
        pool.start(sh(&script), HashMap::new()).unwrap();

        for _ in 0..100 {
            if pid_file.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(kill(Pid::from_raw(pid), None).is_ok());

        drop(pool);
        for _ in 0..250 {
            if kill(Pid::from_raw(pid), None).is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("child {pid} outlived its pool");
    }

    #[tokio::test]
    async fn long_running_child_is_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("runs");
        let settings = ProcessSettings {
            restart_delay: Duration::from_millis(10),
            fast_fail: Duration::from_millis(50),
            kill_timeout: Duration::from_secs(2),
        };
        let (factory, mut rx) = GuardedPoolFactory::new(settings);
        let pool = factory.create();
        let script = format!("echo run >> {}; sleep 0.2", counter.display());
        pool.start(sh(&script), HashMap::new()).unwrap();

        for _ in 0..200 {
            let runs = std::fs::read_to_string(&counter).unwrap_or_default();
            if runs.lines().count() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        pool.close_all().await;
        let runs = std::fs::read_to_string(&counter).unwrap();
        assert!(runs.lines().count() >= 2);
        assert!(rx.try_recv().is_err());
    }
}
