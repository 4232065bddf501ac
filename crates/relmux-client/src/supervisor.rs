//! Connection supervision
//!
//! Opens every configured endpoint concurrently, absorbs individual
//! failures, and applies the minimum-success quorum. The surviving set is
//! decided exactly once; it is never re-evaluated until explicit close.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinSet;

use relmux_core::{RelayUrl, RelmuxError, RelmuxResult};
use relmux_link::{Connector, Link};

/// The links that survived the connect fan-out
///
/// Invariant: whenever non-empty, `len() >= quorum` of the connect call that
/// produced it. Read-shared by the coordinators, never mutated.
#[derive(Clone)]
pub struct ActiveLinks {
    links: Arc<Vec<Arc<dyn Link>>>,
}

impl fmt::Debug for ActiveLinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActiveLinks({})", self.links.len())
    }
}

impl ActiveLinks {
    /// Wrap a caller-assembled link set (the supervisor normally decides it)
    pub fn new(links: Vec<Arc<dyn Link>>) -> Self {
        ActiveLinks {
            links: Arc::new(links),
        }
    }

    pub fn empty() -> Self {
        ActiveLinks::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Link>> {
        self.links.iter()
    }

    pub fn urls(&self) -> Vec<RelayUrl> {
        self.links.iter().map(|l| l.url().clone()).collect()
    }

    /// Close every link. Fire-and-forget: no confirmation is awaited.
    pub fn close_all(&self) {
        for link in self.links.iter() {
            link.close();
        }
    }
}

/// Attempt every endpoint concurrently and apply the quorum
///
/// Individual failures are logged and absorbed. With `quorum` or more
/// successes, ALL successes are retained (the set is not capped at the
/// quorum). Below the quorum, every success is closed again so no
/// connection leaks, and `QuorumNotMet` is returned.
pub async fn connect_all(
    connector: Arc<dyn Connector>,
    urls: &[RelayUrl],
    quorum: usize,
) -> RelmuxResult<ActiveLinks> {
    let mut attempts = JoinSet::new();
    for url in urls {
        let connector = Arc::clone(&connector);
        let url = url.clone();
        attempts.spawn(async move {
            let outcome = connector.open(&url).await;
            (url, outcome)
        });
    }

    let mut connected: Vec<Arc<dyn Link>> = Vec::new();
    while let Some(settled) = attempts.join_next().await {
        match settled {
            Ok((_, Ok(link))) => connected.push(link),
            Ok((url, Err(err))) => {
                tracing::warn!(url = %url, error = %err, "failed to connect relay server");
            }
            Err(err) => {
                tracing::warn!(error = %err, "connect attempt aborted");
            }
        }
    }

    if connected.len() < quorum {
        for link in &connected {
            link.close();
        }
        return Err(RelmuxError::QuorumNotMet {
            connected: connected.len(),
            quorum,
        });
    }

    tracing::info!(count = connected.len(), "connected relay servers");
    Ok(ActiveLinks {
        links: Arc::new(connected),
    })
}
