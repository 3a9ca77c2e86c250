//! Loopback HTTP bridges.
//!
//! Some hops expose a local port that must be driven by a full HTTP client
//! rather than a raw socket. A [`BridgeView`] fetches from that port; the
//! retry loop keeps it fetching until the instance closes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{LOCALHOST, join_host_port};

/// URL a bridge fetches for a local port.
#[must_use]
pub fn bridge_url(port: u16) -> String {
    format!("http://{}/", join_host_port(LOCALHOST, port))
}

/// A fetcher bound to the UI executor.
#[async_trait]
pub trait BridgeView: Send + Sync {
    /// Load `url` and keep it loaded until the page ends.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure.
    async fn drive(&self, url: &str) -> BridgeResult<()>;

    /// Unload whatever is loaded.
    async fn load_blank(&self);

    /// Release the view. Further loads fail.
    async fn destroy(&self);
}

/// Creates bridge views. Called on the UI executor.
pub trait BridgeViewFactory: Send + Sync {
    /// A fresh view.
    ///
    /// # Errors
    ///
    /// Returns an error if the view cannot be created.
    fn create(&self) -> BridgeResult<Arc<dyn BridgeView>>;
}

/// Keep `view` loading `url`: after a failure, blank the view, wait
/// `retry_delay` and load again. Returns once `cancel` fires.
pub async fn run_bridge(
    view: Arc<dyn BridgeView>,
    url: String,
    retry_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            outcome = view.drive(&url) => outcome,
        };
        match outcome {
            Ok(()) => {
                debug!(url = %url, "Bridge page finished");
                cancel.cancelled().await;
                return;
            },
            Err(e) => debug!(url = %url, error = %e, "Bridge load failed, retrying"),
        }
        view.load_blank().await;
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(retry_delay) => {},
        }
    }
}

/// Bridge view streaming the response body with `reqwest`.
#[derive(Debug)]
pub struct HttpBridgeView {
    client: reqwest::Client,
    destroyed: AtomicBool,
}

impl HttpBridgeView {
    /// View using `client`.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            destroyed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BridgeView for HttpBridgeView {
    async fn drive(&self, url: &str) -> BridgeResult<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(BridgeError::Destroyed);
        }
        let transport = |e: reqwest::Error| BridgeError::Transport(e.to_string());
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(transport)?;
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            trace!(url, bytes = chunk.len(), "Bridge chunk");
            if self.destroyed.load(Ordering::Acquire) {
                return Err(BridgeError::Destroyed);
            }
        }
        Ok(())
    }

    async fn load_blank(&self) {
        trace!("Bridge blanked");
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

/// Factory for [`HttpBridgeView`]s. Loopback requests never use a proxy.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpBridgeFactory;

impl BridgeViewFactory for HttpBridgeFactory {
    fn create(&self) -> BridgeResult<Arc<dyn BridgeView>> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        Ok(Arc::new(HttpBridgeView::new(client)))
    }
}
