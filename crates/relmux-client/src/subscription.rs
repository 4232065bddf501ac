//! Subscription coordination
//!
//! One subscription broadcasts the same filter set to every active link.
//! Per-link notice channels are joined by a single fan-in task that owns the
//! `SubTracker`: a synchronous state machine holding the cross-link dedup
//! set and the end-of-stored completion barrier. Keeping the tracker
//! synchronous and single-writer makes the "every link must signal before
//! aggregate completion" invariant testable without any async machinery.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relmux_core::{Event, EventId, Filter, RelayUrl, StoredEvent};
use relmux_link::QueryNotice;

use crate::supervisor::ActiveLinks;

/// Fan-in buffer shared by all links of one subscription
const FAN_IN_BUFFER: usize = 256;

/// Dedup and completion-barrier state for one subscription
///
/// The seen-id set only grows for the life of the subscription. The
/// completed flag transitions exactly once.
pub struct SubTracker {
    seen: HashSet<EventId>,
    pending_end: HashSet<RelayUrl>,
    completed: bool,
}

impl SubTracker {
    pub fn new(participants: impl IntoIterator<Item = RelayUrl>) -> Self {
        SubTracker {
            seen: HashSet::new(),
            pending_end: participants.into_iter().collect(),
            completed: false,
        }
    }

    /// Record an event identity. Returns true on first sight; duplicates
    /// from any link return false and must be discarded silently.
    pub fn record(&mut self, id: EventId) -> bool {
        self.seen.insert(id)
    }

    /// Mark one link's end-of-stored signal. Returns true exactly when this
    /// signal completes the aggregate barrier.
    pub fn mark_ended(&mut self, url: &RelayUrl) -> bool {
        self.pending_end.remove(url);
        self.try_complete()
    }

    /// Drop every link still pending from the barrier (stall policy).
    /// Returns true if that completes the barrier now.
    pub fn drop_pending(&mut self) -> bool {
        self.pending_end.clear();
        self.try_complete()
    }

    /// Returns true at most once, when the barrier first becomes satisfied
    pub fn try_complete(&mut self) -> bool {
        if !self.completed && self.pending_end.is_empty() {
            self.completed = true;
            true
        } else {
            false
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_end.len()
    }
}

/// Cancellation handle for one subscription
///
/// Clonable, idempotent, safe from any context including the subscription's
/// own callbacks. Cancelling stops further delivery on every link; it never
/// retracts already-delivered events.
#[derive(Clone)]
pub struct SubscriptionHandle {
    cancel: CancellationToken,
}

impl SubscriptionHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

type EventCallback = Box<dyn FnMut(Event, RelayUrl, &SubscriptionHandle) + Send>;
type CompleteCallback = Box<dyn FnOnce(&SubscriptionHandle) + Send>;

/// Broadcast `filters` to every link and start streaming
///
/// `on_event` fires once per unique event identity, with the origin link's
/// address. `on_complete` fires exactly once, after every participating link
/// has signaled end-of-stored (live events keep flowing afterwards). A link
/// that fails to open its query is logged and excluded; it only degrades
/// capacity. Fast links may deliver post-end events before the aggregate
/// barrier fires - callers must not assume `on_complete` precedes them.
pub async fn subscribe<E, C>(
    links: &ActiveLinks,
    eose_timeout: Option<Duration>,
    filters: &[Filter],
    on_event: E,
    on_complete: C,
) -> SubscriptionHandle
where
    E: FnMut(Event, RelayUrl, &SubscriptionHandle) + Send + 'static,
    C: FnOnce(&SubscriptionHandle) + Send + 'static,
{
    let cancel = CancellationToken::new();
    let handle = SubscriptionHandle {
        cancel: cancel.clone(),
    };

    let (notices, participants) = open_fan_in(links, filters, &cancel);

    let task_handle = handle.clone();
    tokio::spawn(run_subscription(
        notices,
        participants,
        eose_timeout,
        Box::new(on_event),
        Box::new(on_complete),
        task_handle,
    ));

    handle
}

/// Collect the currently stored matches from every link
///
/// Resolves once every participating link has signaled end-of-stored (or the
/// stall timeout elapses), cancels the queries, and returns the deduplicated
/// events in first-arrival order, each with its origin relay.
pub async fn fetch(
    links: &ActiveLinks,
    eose_timeout: Option<Duration>,
    filters: &[Filter],
) -> Vec<StoredEvent> {
    let cancel = CancellationToken::new();
    let (mut notices, participants) = open_fan_in(links, filters, &cancel);

    let mut tracker = SubTracker::new(participants);
    let mut collected = Vec::new();
    let stall_deadline = eose_timeout.map(|d| tokio::time::Instant::now() + d);

    if !tracker.try_complete() {
        loop {
            tokio::select! {
                _ = stall_wait(stall_deadline) => {
                    tracker.drop_pending();
                    break;
                }
                signal = notices.recv() => match signal {
                    Some((url, LinkSignal::Notice(QueryNotice::Event(event)))) => {
                        if tracker.record(event.id) {
                            collected.push(StoredEvent::new(event, url));
                        }
                    }
                    Some((url, LinkSignal::Notice(QueryNotice::EndOfStored)))
                    | Some((url, LinkSignal::Unavailable)) => {
                        if tracker.mark_ended(&url) {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    }

    cancel.cancel();
    collected
}

/// One message on a subscription's fan-in channel
enum LinkSignal {
    Notice(QueryNotice),
    /// The query could not be opened; the link leaves the barrier.
    Unavailable,
}

/// Broadcast the query to every link and join the streams into one channel
///
/// Returns immediately: every link gets its own open-then-pump task, so a
/// slow or wedged transport never delays the others or the caller. Links are
/// barrier participants up front; one whose open fails reports `Unavailable`
/// through the channel. A pump exits (and cancels its link query) when the
/// subscription token fires, when its link closes the notice channel, or
/// when the fan-in side is gone.
fn open_fan_in(
    links: &ActiveLinks,
    filters: &[Filter],
    cancel: &CancellationToken,
) -> (mpsc::Receiver<(RelayUrl, LinkSignal)>, Vec<RelayUrl>) {
    let (tx, rx) = mpsc::channel(FAN_IN_BUFFER);
    let mut participants = Vec::with_capacity(links.len());

    for link in links.iter() {
        participants.push(link.url().clone());

        let link = Arc::clone(link);
        let filters = filters.to_vec();
        let tx = tx.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let url = link.url().clone();
            let handle = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = link.open_query(&filters) => match outcome {
                    Ok(handle) => handle,
                    Err(err) => {
                        tracing::warn!(url = %url, error = %err, "failed to open query on relay");
                        let _ = tx.send((url, LinkSignal::Unavailable)).await;
                        return;
                    }
                },
            };

            let (mut notices, query_cancel) = handle.split();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    notice = notices.recv() => match notice {
                        Some(notice) => {
                            if tx.send((url.clone(), LinkSignal::Notice(notice))).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            query_cancel.cancel();
        });
    }

    (rx, participants)
}

async fn run_subscription(
    mut notices: mpsc::Receiver<(RelayUrl, LinkSignal)>,
    participants: Vec<RelayUrl>,
    eose_timeout: Option<Duration>,
    mut on_event: EventCallback,
    on_complete: CompleteCallback,
    handle: SubscriptionHandle,
) {
    let mut tracker = SubTracker::new(participants);
    let mut on_complete = Some(on_complete);
    let mut stall_deadline = eose_timeout.map(|d| tokio::time::Instant::now() + d);

    // Zero participating links: the barrier is trivially satisfied.
    if tracker.try_complete() {
        if let Some(complete) = on_complete.take() {
            complete(&handle);
        }
        stall_deadline = None;
    }

    loop {
        tokio::select! {
            _ = handle.cancel.cancelled() => break,
            _ = stall_wait(stall_deadline) => {
                stall_deadline = None;
                if tracker.drop_pending() {
                    if let Some(complete) = on_complete.take() {
                        complete(&handle);
                    }
                    if handle.is_cancelled() {
                        break;
                    }
                }
            }
            signal = notices.recv() => match signal {
                Some((url, LinkSignal::Notice(QueryNotice::Event(event)))) => {
                    if tracker.record(event.id) {
                        on_event(event, url, &handle);
                        if handle.is_cancelled() {
                            break;
                        }
                    }
                }
                Some((url, LinkSignal::Notice(QueryNotice::EndOfStored)))
                | Some((url, LinkSignal::Unavailable)) => {
                    if tracker.mark_ended(&url) {
                        stall_deadline = None;
                        if let Some(complete) = on_complete.take() {
                            complete(&handle);
                        }
                        if handle.is_cancelled() {
                            break;
                        }
                    }
                }
                None => break,
            },
        }
    }

    // Coordinator exiting: make sure every link query stops.
    handle.cancel.cancel();
}

async fn stall_wait(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use relmux_core::RelmuxResult;
    use serde_json::json;

    fn url(s: &str) -> RelayUrl {
        RelayUrl::parse(s).unwrap()
    }

    fn id(n: u8) -> EventId {
        EventId::new([n; 32])
    }

    #[test]
    fn test_tracker_dedups_across_links() {
        let mut tracker = SubTracker::new(vec![url("wss://a.test"), url("wss://b.test")]);

        assert!(tracker.record(id(1)));
        assert!(!tracker.record(id(1)));
        assert!(tracker.record(id(2)));
        assert_eq!(tracker.seen_count(), 2);
    }

    #[test]
    fn test_tracker_completes_after_last_link_only() {
        let a = url("wss://a.test");
        let b = url("wss://b.test");
        let mut tracker = SubTracker::new(vec![a.clone(), b.clone()]);

        assert!(!tracker.mark_ended(&a));
        assert!(!tracker.is_complete());
        assert!(tracker.mark_ended(&b));
        assert!(tracker.is_complete());

        // Repeated signals never re-complete
        assert!(!tracker.mark_ended(&a));
        assert!(!tracker.mark_ended(&b));
    }

    #[test]
    fn test_tracker_empty_participants_completes_immediately() {
        let mut tracker = SubTracker::new(Vec::new());
        assert!(tracker.try_complete());
        assert!(!tracker.try_complete());
    }

    #[test]
    fn test_tracker_drop_pending_completes_once() {
        let a = url("wss://a.test");
        let b = url("wss://b.test");
        let mut tracker = SubTracker::new(vec![a.clone(), b]);

        assert!(!tracker.mark_ended(&a));
        assert!(tracker.drop_pending());
        assert!(!tracker.drop_pending());
    }

    proptest! {
        #[test]
        fn prop_each_identity_delivered_at_most_once(
            deliveries in proptest::collection::vec((0usize..3, 0u8..20), 0..200)
        ) {
            let urls = vec![url("wss://a.test"), url("wss://b.test"), url("wss://c.test")];
            let mut tracker = SubTracker::new(urls);

            let mut delivered = Vec::new();
            for (_, n) in deliveries {
                if tracker.record(id(n)) {
                    delivered.push(n);
                }
            }

            let mut unique = delivered.clone();
            unique.sort_unstable();
            unique.dedup();
            prop_assert_eq!(unique.len(), delivered.len());
        }

        #[test]
        fn prop_barrier_completes_exactly_once_after_all_links(
            ends in proptest::collection::vec(0usize..3, 1..30)
        ) {
            let urls = vec![url("wss://a.test"), url("wss://b.test"), url("wss://c.test")];
            let mut tracker = SubTracker::new(urls.clone());

            let mut completions = 0usize;
            let mut ended: HashSet<usize> = HashSet::new();
            for i in ends {
                ended.insert(i);
                if tracker.mark_ended(&urls[i]) {
                    completions += 1;
                    prop_assert_eq!(ended.len(), 3);
                }
            }

            prop_assert_eq!(completions, usize::from(ended.len() == 3));
        }
    }

    // Async scenarios, driven by the scripted fake relay

    use relmux_test::{scripted_event, FakeConnector, RelayScript};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Event(EventId, RelayUrl),
        Complete,
    }

    async fn connect(connector: FakeConnector, urls: &[RelayUrl]) -> RelmuxResult<ActiveLinks> {
        crate::supervisor::connect_all(Arc::new(connector), urls, urls.len()).await
    }

    #[tokio::test]
    async fn test_duplicate_event_delivered_once_and_complete_after_both_ends() {
        let event = scripted_event(0x11);
        let connector = FakeConnector::new()
            .relay(
                "wss://a.test",
                RelayScript::new().stored(event.clone()).end_after(Duration::from_millis(10)),
            )
            .relay(
                "wss://b.test",
                RelayScript::new().stored(event.clone()).end_after(Duration::from_millis(50)),
            );
        let urls = vec![url("wss://a.test"), url("wss://b.test")];
        let links = connect(connector, &urls).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let event_tx = tx.clone();
        subscribe(
            &links,
            None,
            &[Filter::new(json!({ "kinds": [1] }))],
            move |event, origin, _| {
                event_tx.send(Seen::Event(event.id, origin)).unwrap();
            },
            move |_| {
                tx.send(Seen::Complete).unwrap();
            },
        )
        .await;

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(first, Seen::Event(seen, _) if seen == event.id));

        // The duplicate from the other link is discarded; next is the
        // aggregate completion, after BOTH ends.
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, Seen::Complete);

        // Nothing further
        assert!(
            tokio::time::timeout(Duration::from_millis(200), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_complete_fires_once_regardless_of_end_order() {
        let connector = FakeConnector::new()
            .relay("wss://a.test", RelayScript::new().end_after(Duration::from_millis(80)))
            .relay("wss://b.test", RelayScript::new().end_after(Duration::from_millis(10)))
            .relay("wss://c.test", RelayScript::new().end_after(Duration::from_millis(40)));
        let urls = vec![url("wss://a.test"), url("wss://b.test"), url("wss://c.test")];
        let links = connect(connector, &urls).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        subscribe(
            &links,
            None,
            &[Filter::new(json!({}))],
            |_, _, _| {},
            move |_| {
                tx.send(Seen::Complete).unwrap();
            },
        )
        .await;

        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap(),
            Seen::Complete
        );

        // No second completion; the only sender went into on_complete, so
        // the channel is closed (or silent) afterwards.
        assert!(
            tokio::time::timeout(Duration::from_millis(200), rx.recv())
                .await
                .ok()
                .flatten()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_live_events_flow_after_complete() {
        let live = scripted_event(0x42);
        let connector = FakeConnector::new().relay(
            "wss://a.test",
            RelayScript::new()
                .end_after(Duration::from_millis(10))
                .live_after(Duration::from_millis(30), live.clone()),
        );
        let urls = vec![url("wss://a.test")];
        let links = connect(connector, &urls).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let event_tx = tx.clone();
        subscribe(
            &links,
            None,
            &[Filter::new(json!({}))],
            move |event, origin, _| {
                event_tx.send(Seen::Event(event.id, origin)).unwrap();
            },
            move |_| {
                tx.send(Seen::Complete).unwrap();
            },
        )
        .await;

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, Seen::Complete);

        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(second, Seen::Event(seen, _) if seen == live.id));
    }

    #[tokio::test]
    async fn test_cancel_from_inside_on_event_stops_delivery() {
        let mut script = RelayScript::new();
        for n in 0..10u8 {
            script = script.stored(scripted_event(n));
        }
        let connector =
            FakeConnector::new().relay("wss://a.test", script.end_after(Duration::from_millis(10)));
        let urls = vec![url("wss://a.test")];
        let links = connect(connector, &urls).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let event_tx = tx.clone();
        let mut count = 0u32;
        subscribe(
            &links,
            None,
            &[Filter::new(json!({}))],
            move |event, origin, handle| {
                count += 1;
                event_tx.send(Seen::Event(event.id, origin)).unwrap();
                if count == 5 {
                    handle.cancel();
                }
            },
            move |_| {
                tx.send(Seen::Complete).unwrap();
            },
        )
        .await;

        let mut seen = 0;
        while tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
            .is_some()
        {
            seen += 1;
        }

        // Exactly five deliveries, no completion afterwards
        assert_eq!(seen, 5);
    }

    #[tokio::test]
    async fn test_stalled_link_blocks_completion_without_timeout() {
        let connector = FakeConnector::new()
            .relay("wss://a.test", RelayScript::new().end_after(Duration::from_millis(10)))
            .relay("wss://b.test", RelayScript::new().stall());
        let urls = vec![url("wss://a.test"), url("wss://b.test")];
        let links = connect(connector, &urls).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        subscribe(
            &links,
            None,
            &[Filter::new(json!({}))],
            |_, _, _| {},
            move |_| {
                tx.send(Seen::Complete).unwrap();
            },
        )
        .await;

        assert!(
            tokio::time::timeout(Duration::from_millis(300), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_stall_timeout_drops_silent_link_from_barrier() {
        let connector = FakeConnector::new()
            .relay("wss://a.test", RelayScript::new().end_after(Duration::from_millis(10)))
            .relay("wss://b.test", RelayScript::new().stall());
        let urls = vec![url("wss://a.test"), url("wss://b.test")];
        let links = connect(connector, &urls).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        subscribe(
            &links,
            Some(Duration::from_millis(100)),
            &[Filter::new(json!({}))],
            |_, _, _| {},
            move |_| {
                tx.send(Seen::Complete).unwrap();
            },
        )
        .await;

        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap(),
            Seen::Complete
        );
    }

    #[tokio::test]
    async fn test_subscribe_with_no_links_completes_immediately() {
        let links = ActiveLinks::empty();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        subscribe(
            &links,
            None,
            &[Filter::new(json!({}))],
            |_, _, _| {},
            move |_| {
                tx.send(Seen::Complete).unwrap();
            },
        )
        .await;

        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap(),
            Seen::Complete
        );
    }

    use relmux_link::{ChannelLink, Link, LinkDriver, REQUEST_BUFFER};
    use relmux_test::FakeRelay;

    /// A link whose transport never services requests, with its request
    /// buffer already full so `open_query` cannot even enqueue
    async fn wedged_link(addr: &str) -> (Arc<ChannelLink>, LinkDriver) {
        let (link, driver) = ChannelLink::new(url(addr));
        for _ in 0..REQUEST_BUFFER {
            let link = Arc::clone(&link);
            tokio::spawn(async move {
                let _ = link.publish(&scripted_event(0xFF)).await;
            });
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        (link, driver)
    }

    #[tokio::test]
    async fn test_wedged_link_does_not_block_broadcast() {
        let (wedged, _driver) = wedged_link("wss://wedged.test").await;
        let stored = scripted_event(0x51);
        let (healthy, _monitor) = FakeRelay::spawn(
            url("wss://ok.test"),
            RelayScript::new().stored(stored.clone()).end_after(Duration::from_millis(10)),
        );
        let links = ActiveLinks::new(vec![wedged as Arc<dyn Link>, healthy as Arc<dyn Link>]);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let event_tx = tx.clone();
        let handle = subscribe(
            &links,
            None,
            &[Filter::new(json!({}))],
            move |event, origin, _| {
                event_tx.send(Seen::Event(event.id, origin)).unwrap();
            },
            move |_| {
                tx.send(Seen::Complete).unwrap();
            },
        )
        .await;
        assert!(!handle.is_cancelled());

        // The healthy link streams despite the wedged one
        let first = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("healthy link must deliver promptly")
            .unwrap();
        assert_eq!(first, Seen::Event(stored.id, url("wss://ok.test")));
    }

    #[tokio::test]
    async fn test_failed_query_open_leaves_barrier() {
        // Dropping the driver makes open_query fail on this link
        let (dead, driver) = ChannelLink::new(url("wss://dead.test"));
        drop(driver);
        let (healthy, _monitor) = FakeRelay::spawn(
            url("wss://ok.test"),
            RelayScript::new().end_after(Duration::from_millis(10)),
        );
        let links = ActiveLinks::new(vec![dead as Arc<dyn Link>, healthy as Arc<dyn Link>]);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        subscribe(
            &links,
            None,
            &[Filter::new(json!({}))],
            |_, _, _| {},
            move |_| {
                tx.send(Seen::Complete).unwrap();
            },
        )
        .await;

        // The unreachable link degrades capacity without blocking completion
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap(),
            Seen::Complete
        );
    }

    #[tokio::test]
    async fn test_fetch_collects_stored_events_once() {
        let shared = scripted_event(0x21);
        let only_b = scripted_event(0x22);
        let live = scripted_event(0x23);
        let connector = FakeConnector::new()
            .relay(
                "wss://a.test",
                RelayScript::new().stored(shared.clone()).end_after(Duration::from_millis(10)),
            )
            .relay(
                "wss://b.test",
                RelayScript::new()
                    .stored(shared.clone())
                    .stored(only_b.clone())
                    .end_after(Duration::from_millis(30))
                    .live_after(Duration::from_millis(100), live),
            );
        let urls = vec![url("wss://a.test"), url("wss://b.test")];
        let links = connect(connector, &urls).await.unwrap();

        let collected = fetch(&links, None, &[Filter::new(json!({}))]).await;

        // Deduplicated, stored-only (the later live event is never awaited)
        let mut ids: Vec<EventId> = collected.iter().map(|s| s.event.id).collect();
        ids.sort_unstable_by_key(|i| i.0);
        assert_eq!(ids, vec![shared.id, only_b.id]);
    }
}
