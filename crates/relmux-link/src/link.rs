//! Connector and link traits

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relmux_core::{Event, Filter, RelayUrl, RelmuxResult};

/// Per-query notification delivered by the transport
#[derive(Clone, Debug, PartialEq)]
pub enum QueryNotice {
    /// One matching event (stored backlog or live)
    Event(Event),
    /// All currently stored matches have been delivered; live matches may
    /// still follow. Emitted at most once per query.
    EndOfStored,
}

/// Relay verdict on one published event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishAck {
    Accepted,
    Rejected,
}

/// Notice receiver channel
pub type NoticeReceiver = mpsc::Receiver<QueryNotice>;

/// Notice sender channel
pub type NoticeSender = mpsc::Sender<QueryNotice>;

/// A running query on one link
///
/// The transport stops sending (and closes the notice channel) once `cancel`
/// is triggered; cancelling is idempotent and safe from any context.
pub struct QueryHandle {
    pub notices: NoticeReceiver,
    pub cancel: CancellationToken,
}

impl QueryHandle {
    /// Split into the receiving half and the cancellation half
    pub fn split(self) -> (NoticeReceiver, CancellationToken) {
        (self.notices, self.cancel)
    }
}

/// One live connection to one relay endpoint
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Endpoint this link is connected to
    fn url(&self) -> &RelayUrl;

    /// Broadcast a filter set and start streaming matches
    async fn open_query(&self, filters: &[Filter]) -> RelmuxResult<QueryHandle>;

    /// Send one signed event, awaiting the relay's verdict
    async fn publish(&self, event: &Event) -> RelmuxResult<PublishAck>;

    /// Tear the connection down. Fire-and-forget: no confirmation is awaited.
    fn close(&self);
}

/// Opens links to relay endpoints
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &RelayUrl) -> RelmuxResult<Arc<dyn Link>>;
}
