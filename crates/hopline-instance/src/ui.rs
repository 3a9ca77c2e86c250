//! Single-threaded executor for UI-bound work.
//!
//! Jobs run on one dedicated thread inside a `LocalSet`, so they may hold
//! non-`Send` state. Callers either await a job's result with
//! [`UiExecutor::run`] or hand it off with [`UiExecutor::spawn`].

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;
type Job = Box<dyn FnOnce() -> LocalFuture + Send>;

/// Handle to the UI thread. Dropping it stops the thread once queued jobs
/// have been handed out.
pub struct UiExecutor {
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl UiExecutor {
    /// Start the UI thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime or the thread cannot be created.
    pub fn new() -> BridgeResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let thread = std::thread::Builder::new()
            .name("hopline-ui".into())
            .spawn(move || {
                let local = tokio::task::LocalSet::new();
                local.block_on(&runtime, async move {
                    while let Some(job) = rx.recv().await {
                        tokio::task::spawn_local(job());
                    }
                });
                debug!("UI executor stopped");
            })?;
        Ok(Self {
            jobs: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    fn submit(&self, job: Job) -> BridgeResult<()> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .ok_or(BridgeError::ExecutorGone)?
            .send(job)
            .map_err(|_| BridgeError::ExecutorGone)
    }

    /// Run `job` on the UI thread and wait for its output.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ExecutorGone`] if the executor has stopped or
    /// the job was dropped before finishing.
    pub async fn run<F, Fut, T>(&self, job: F) -> BridgeResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move || -> LocalFuture {
            Box::pin(async move {
                let _ = tx.send(job().await);
            })
        }))?;
        rx.await.map_err(|_| BridgeError::ExecutorGone)
    }

    /// Queue `job` on the UI thread without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ExecutorGone`] if the executor has stopped.
    pub fn spawn<F, Fut>(&self, job: F) -> BridgeResult<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.submit(Box::new(move || -> LocalFuture { Box::pin(job()) }))
    }

    /// Stop accepting jobs and wait for the thread to exit. Tasks still
    /// running on the thread are dropped.
    pub fn shutdown(&self) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::warn!("UI thread panicked");
            }
        }
    }
}

impl Drop for UiExecutor {
    fn drop(&mut self) {
        // Closing the channel ends the thread; it is not joined here.
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl std::fmt::Debug for UiExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let running = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        f.debug_struct("UiExecutor")
            .field("running", &running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn run_returns_result_from_ui_thread() {
        let ui = UiExecutor::new().unwrap();
        let name = ui
            .run(|| async { std::thread::current().name().map(str::to_owned) })
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("hopline-ui"));
    }

    #[tokio::test]
    async fn jobs_may_hold_non_send_state() {
        let ui = UiExecutor::new().unwrap();
        let value = ui
            .run(|| async {
                let counter = Rc::new(Cell::new(1));
                tokio::task::yield_now().await;
                counter.set(counter.get() + 1);
                counter.get()
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn spawned_jobs_do_not_block_run() {
        let ui = UiExecutor::new().unwrap();
        ui.spawn(|| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
        .unwrap();
        let answer = tokio::time::timeout(Duration::from_secs(5), ui.run(|| async { 42 }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answer, 42);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_jobs() {
        let ui = UiExecutor::new().unwrap();
        ui.shutdown();
        assert!(matches!(
            ui.run(|| async {}).await,
            Err(BridgeError::ExecutorGone)
        ));
        assert!(matches!(ui.spawn(|| async {}), Err(BridgeError::ExecutorGone)));
    }
}
