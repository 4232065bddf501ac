//! Scripted connector
//!
//! `FakeConnector` decides per endpoint whether a connect attempt succeeds
//! (spawning a `FakeRelay`) or is refused, and counts every open call so
//! tests can verify connect memoization.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use relmux_core::{RelayUrl, RelmuxError, RelmuxResult};
use relmux_link::{Connector, Link};

use crate::relay::{FakeRelay, FakeRelayMonitor, RelayScript};

#[derive(Clone)]
enum Plan {
    Serve {
        delay: Duration,
        script: RelayScript,
    },
    Refuse,
}

/// Connector with scripted per-endpoint outcomes
#[derive(Default)]
pub struct FakeConnector {
    plans: HashMap<RelayUrl, Plan>,
    monitors: Mutex<HashMap<RelayUrl, FakeRelayMonitor>>,
    open_calls: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Self {
        FakeConnector::default()
    }

    /// Script a relay that connects successfully and behaves per `script`
    pub fn relay(self, url: &str, script: RelayScript) -> Self {
        self.relay_after(url, Duration::ZERO, script)
    }

    /// Like `relay`, but the connect attempt takes `delay` to resolve
    pub fn relay_after(mut self, url: &str, delay: Duration, script: RelayScript) -> Self {
        let url = RelayUrl::parse(url).expect("valid relay url");
        self.plans.insert(url, Plan::Serve { delay, script });
        self
    }

    /// Script an endpoint whose connect attempts are refused
    pub fn refuse(mut self, url: &str) -> Self {
        let url = RelayUrl::parse(url).expect("valid relay url");
        self.plans.insert(url, Plan::Refuse);
        self
    }

    /// Total open attempts, across all endpoints
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Monitor for a relay that has been opened at least once
    pub fn monitor(&self, url: &RelayUrl) -> Option<FakeRelayMonitor> {
        self.monitors.lock().get(url).cloned()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, url: &RelayUrl) -> RelmuxResult<Arc<dyn Link>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);

        match self.plans.get(url) {
            Some(Plan::Serve { delay, script }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                let (link, monitor) = FakeRelay::spawn(url.clone(), script.clone());
                self.monitors.lock().insert(url.clone(), monitor);
                Ok(link)
            }
            Some(Plan::Refuse) | None => {
                Err(RelmuxError::Transport(format!("connection refused: {url}")))
            }
        }
    }
}
