//! Scripted in-memory relay
//!
//! `FakeRelay` services the `LinkRequest` protocol of a `ChannelLink`
//! according to a `RelayScript`, so multiplexer tests can stage event
//! ordering, end-of-stored timing, publish verdicts and stalls per relay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use relmux_core::{Event, EventId, RelayUrl};
use relmux_link::{ChannelLink, LinkDriver, LinkRequest, PublishAck, QueryNotice};

/// A recognizable test event: id bytes and payload derived from `n`
pub fn scripted_event(n: u8) -> Event {
    Event::new(EventId::new([n; 32]), json!({ "n": n }))
}

/// Relay verdict on published events
#[derive(Clone, Debug)]
pub enum ScriptedVerdict {
    Accept { delay: Duration },
    Reject { delay: Duration },
    /// Never answer (the ack channel is held open forever)
    Ignore,
}

/// Behavior script for one fake relay
///
/// The default script stores nothing, signals end-of-stored immediately and
/// accepts every publish without delay.
#[derive(Clone, Debug)]
pub struct RelayScript {
    /// Events streamed in order before end-of-stored, each after its delay
    pub stored: Vec<(Duration, Event)>,
    /// When to signal end-of-stored; `None` stalls forever
    pub end_of_stored: Option<Duration>,
    /// Events streamed after end-of-stored, each after its delay
    pub live: Vec<(Duration, Event)>,
    /// Verdict on published events
    pub publish: ScriptedVerdict,
}

impl Default for RelayScript {
    fn default() -> Self {
        RelayScript {
            stored: Vec::new(),
            end_of_stored: Some(Duration::ZERO),
            live: Vec::new(),
            publish: ScriptedVerdict::Accept {
                delay: Duration::ZERO,
            },
        }
    }
}

impl RelayScript {
    pub fn new() -> Self {
        RelayScript::default()
    }

    pub fn stored(mut self, event: Event) -> Self {
        self.stored.push((Duration::ZERO, event));
        self
    }

    pub fn stored_after(mut self, delay: Duration, event: Event) -> Self {
        self.stored.push((delay, event));
        self
    }

    pub fn end_after(mut self, delay: Duration) -> Self {
        self.end_of_stored = Some(delay);
        self
    }

    /// Never signal end-of-stored
    pub fn stall(mut self) -> Self {
        self.end_of_stored = None;
        self
    }

    pub fn live_after(mut self, delay: Duration, event: Event) -> Self {
        self.live.push((delay, event));
        self
    }

    pub fn publish(mut self, verdict: ScriptedVerdict) -> Self {
        self.publish = verdict;
        self
    }
}

/// Observable state of one fake relay
pub struct RelayState {
    closed: CancellationToken,
    queries: AtomicUsize,
    publishes: AtomicUsize,
    stopped_queries: AtomicUsize,
}

/// Counter and lifecycle view on a spawned fake relay
#[derive(Clone)]
pub struct FakeRelayMonitor {
    state: Arc<RelayState>,
}

impl FakeRelayMonitor {
    pub fn is_closed(&self) -> bool {
        self.state.closed.is_cancelled()
    }

    pub async fn wait_closed(&self) {
        self.state.closed.cancelled().await;
    }

    /// Queries opened on this relay
    pub fn queries(&self) -> usize {
        self.state.queries.load(Ordering::SeqCst)
    }

    /// Publishes received by this relay
    pub fn publishes(&self) -> usize {
        self.state.publishes.load(Ordering::SeqCst)
    }

    /// Queries that observed a cancel or close while running
    pub fn stopped_queries(&self) -> usize {
        self.state.stopped_queries.load(Ordering::SeqCst)
    }
}

/// In-memory relay serving one `ChannelLink`
pub struct FakeRelay;

impl FakeRelay {
    /// Spawn a relay for `url`, returning the link and its monitor
    pub fn spawn(url: RelayUrl, script: RelayScript) -> (Arc<ChannelLink>, FakeRelayMonitor) {
        let (link, driver) = ChannelLink::new(url);
        let state = Arc::new(RelayState {
            // The link's own close token doubles as the relay's closed flag
            closed: driver.closed.clone(),
            queries: AtomicUsize::new(0),
            publishes: AtomicUsize::new(0),
            stopped_queries: AtomicUsize::new(0),
        });

        tokio::spawn(drive(script, driver, Arc::clone(&state)));

        (link, FakeRelayMonitor { state })
    }
}

async fn drive(script: RelayScript, mut driver: LinkDriver, state: Arc<RelayState>) {
    loop {
        let request = tokio::select! {
            _ = driver.closed.cancelled() => break,
            request = driver.requests.recv() => request,
        };

        match request {
            Some(LinkRequest::Query {
                notices, cancel, ..
            }) => {
                state.queries.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(run_query(
                    script.clone(),
                    notices,
                    cancel,
                    Arc::clone(&state),
                ));
            }
            Some(LinkRequest::Publish { ack, .. }) => {
                state.publishes.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(answer_publish(script.publish.clone(), ack));
            }
            None => break,
        }
    }
}

async fn run_query(
    script: RelayScript,
    notices: mpsc::Sender<QueryNotice>,
    cancel: CancellationToken,
    state: Arc<RelayState>,
) {
    for (delay, event) in script.stored {
        if !pace(delay, &cancel, &state).await {
            state.stopped_queries.fetch_add(1, Ordering::SeqCst);
            return;
        }
        if notices.send(QueryNotice::Event(event)).await.is_err() {
            return;
        }
    }

    match script.end_of_stored {
        Some(delay) => {
            if !pace(delay, &cancel, &state).await {
                state.stopped_queries.fetch_add(1, Ordering::SeqCst);
                return;
            }
            if notices.send(QueryNotice::EndOfStored).await.is_err() {
                return;
            }
        }
        None => {
            // Stall: hold the channel open until stopped
            wait_stopped(&cancel, &state).await;
            state.stopped_queries.fetch_add(1, Ordering::SeqCst);
            return;
        }
    }

    for (delay, event) in script.live {
        if !pace(delay, &cancel, &state).await {
            state.stopped_queries.fetch_add(1, Ordering::SeqCst);
            return;
        }
        if notices.send(QueryNotice::Event(event)).await.is_err() {
            return;
        }
    }

    // Live subscription: keep the notice channel open until stopped
    wait_stopped(&cancel, &state).await;
    state.stopped_queries.fetch_add(1, Ordering::SeqCst);
}

/// Sleep `delay`, returning false if the query was stopped meanwhile
async fn pace(delay: Duration, cancel: &CancellationToken, state: &RelayState) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
        _ = state.closed.cancelled() => false,
    }
}

async fn wait_stopped(cancel: &CancellationToken, state: &RelayState) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = state.closed.cancelled() => {}
    }
}

async fn answer_publish(verdict: ScriptedVerdict, ack: oneshot::Sender<PublishAck>) {
    match verdict {
        ScriptedVerdict::Accept { delay } => {
            tokio::time::sleep(delay).await;
            let _ = ack.send(PublishAck::Accepted);
        }
        ScriptedVerdict::Reject { delay } => {
            tokio::time::sleep(delay).await;
            let _ = ack.send(PublishAck::Rejected);
        }
        ScriptedVerdict::Ignore => {
            // Dropping the sender would surface as LinkClosed; hold it so the
            // publish side sees a relay that simply never answers.
            let _held = ack;
            std::future::pending::<()>().await;
        }
    }
}
