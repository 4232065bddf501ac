//! The aggregate relay multiplexer handle
//!
//! `RelayMux` binds a connector, an endpoint list and a quorum at
//! construction, and wraps connect/subscribe/fetch/publish/close behind one
//! object. The connect attempt is memoized on the instance (not in any
//! process-wide state): concurrent and repeated calls share one attempt, a
//! success is cached for the lifetime of the handle, a failure is not.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use relmux_core::{Event, Filter, RelayUrl, RelmuxError, RelmuxResult, StoredEvent};
use relmux_link::Connector;

use crate::publish::{publish_all, PublishReceipt};
use crate::subscription::{fetch, subscribe, SubscriptionHandle};
use crate::supervisor::{connect_all, ActiveLinks};

/// Multiplexer configuration
#[derive(Clone, Debug)]
pub struct MuxConfig {
    /// Minimum number of endpoints that must connect for the aggregate
    /// connection to be usable
    pub quorum: usize,
    /// Optional stall policy: a link that has not signaled end-of-stored
    /// within this window is dropped from the completion barrier. `None`
    /// means a silent relay blocks the barrier forever.
    pub eose_timeout: Option<Duration>,
}

impl Default for MuxConfig {
    fn default() -> Self {
        MuxConfig {
            quorum: 1,
            eose_timeout: None,
        }
    }
}

/// One logical connection over many relays
pub struct RelayMux {
    connector: Arc<dyn Connector>,
    urls: Vec<RelayUrl>,
    config: MuxConfig,
    conn: OnceCell<ActiveLinks>,
    closed: AtomicBool,
}

impl RelayMux {
    pub fn new(connector: Arc<dyn Connector>, urls: Vec<RelayUrl>, config: MuxConfig) -> Self {
        RelayMux {
            connector,
            urls,
            config,
            conn: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Connect to the configured endpoints, applying the quorum
    ///
    /// Idempotent: once a successful result exists, later calls return it
    /// without reattempting network I/O, and concurrent callers share the
    /// in-flight attempt. A failed attempt is not cached; calling again
    /// retries from scratch.
    pub async fn connect(&self) -> RelmuxResult<()> {
        self.ensure_open()?;
        let links = self
            .conn
            .get_or_try_init(|| {
                connect_all(Arc::clone(&self.connector), &self.urls, self.config.quorum)
            })
            .await?;

        // close() may have raced the in-flight attempt and found nothing to
        // tear down; the links it missed are released here.
        if self.closed.load(Ordering::SeqCst) {
            links.close_all();
            return Err(RelmuxError::Closed);
        }
        Ok(())
    }

    /// Subscribe across every active link; see `subscription::subscribe`
    pub async fn subscribe<E, C>(
        &self,
        filters: &[Filter],
        on_event: E,
        on_complete: C,
    ) -> RelmuxResult<SubscriptionHandle>
    where
        E: FnMut(Event, RelayUrl, &SubscriptionHandle) + Send + 'static,
        C: FnOnce(&SubscriptionHandle) + Send + 'static,
    {
        let links = self.active()?;
        Ok(subscribe(links, self.config.eose_timeout, filters, on_event, on_complete).await)
    }

    /// Collect the currently stored matches from every active link
    pub async fn fetch(&self, filters: &[Filter]) -> RelmuxResult<Vec<StoredEvent>> {
        let links = self.active()?;
        Ok(fetch(links, self.config.eose_timeout, filters).await)
    }

    /// Send one signed event to every active link, first acceptance wins
    pub async fn publish(&self, event: &Event) -> RelmuxResult<PublishReceipt> {
        let links = self.active()?;
        publish_all(links, event).await
    }

    /// Number of currently active links (0 before connect or after close)
    pub fn active_count(&self) -> usize {
        if self.closed.load(Ordering::SeqCst) {
            return 0;
        }
        self.conn.get().map(|links| links.len()).unwrap_or(0)
    }

    /// Tear down every active link. Fire-and-forget: closure is not
    /// confirmed, and the handle rejects further operations with `Closed`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(links) = self.conn.get() {
            links.close_all();
        }
    }

    fn ensure_open(&self) -> RelmuxResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelmuxError::Closed);
        }
        Ok(())
    }

    fn active(&self) -> RelmuxResult<&ActiveLinks> {
        self.ensure_open()?;
        self.conn.get().ok_or(RelmuxError::NotConnected)
    }
}
