//! Channel-backed link implementation
//!
//! `ChannelLink` turns the `Link` trait into an mpsc request protocol. The
//! driver side (a wire transport, or the test fake) services `LinkRequest`s
//! and answers through the channels embedded in each request. Teardown runs
//! over a dedicated token rather than a queued request, so a full request
//! buffer can never swallow a close.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use relmux_core::{Event, Filter, RelayUrl, RelmuxError, RelmuxResult};

use crate::{Link, PublishAck, QueryHandle, QueryNotice};

/// Request buffer between a link and its driver
pub const REQUEST_BUFFER: usize = 64;

/// Notice buffer per running query
pub const NOTICE_BUFFER: usize = 256;

/// One command from the link to its driver
pub enum LinkRequest {
    /// Start streaming matches for `filters` into `notices`; stop and drop
    /// the sender once `cancel` fires or the query is exhausted server-side.
    Query {
        filters: Vec<Filter>,
        notices: mpsc::Sender<QueryNotice>,
        cancel: CancellationToken,
    },
    /// Send one signed event; answer with the relay's verdict.
    Publish {
        event: Event,
        ack: oneshot::Sender<PublishAck>,
    },
}

/// Request receiver, held by the driver
pub type RequestReceiver = mpsc::Receiver<LinkRequest>;

/// Driver side of one channel link
pub struct LinkDriver {
    /// Incoming link requests
    pub requests: RequestReceiver,
    /// Fires when the link's owner closes it. Independent of the request
    /// channel: teardown is observable even with a full request buffer.
    pub closed: CancellationToken,
}

/// A link whose transport lives behind an mpsc request channel
pub struct ChannelLink {
    url: RelayUrl,
    requests: mpsc::Sender<LinkRequest>,
    closed: CancellationToken,
}

impl ChannelLink {
    /// Create a link and the driver side of its request channel
    pub fn new(url: RelayUrl) -> (Arc<Self>, LinkDriver) {
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        let closed = CancellationToken::new();
        (
            Arc::new(ChannelLink {
                url,
                requests: tx,
                closed: closed.clone(),
            }),
            LinkDriver {
                requests: rx,
                closed,
            },
        )
    }
}

#[async_trait]
impl Link for ChannelLink {
    fn url(&self) -> &RelayUrl {
        &self.url
    }

    async fn open_query(&self, filters: &[Filter]) -> RelmuxResult<QueryHandle> {
        if self.closed.is_cancelled() {
            return Err(RelmuxError::LinkClosed);
        }

        let (tx, rx) = mpsc::channel(NOTICE_BUFFER);
        let cancel = CancellationToken::new();

        self.requests
            .send(LinkRequest::Query {
                filters: filters.to_vec(),
                notices: tx,
                cancel: cancel.clone(),
            })
            .await
            .map_err(|_| RelmuxError::LinkClosed)?;

        Ok(QueryHandle {
            notices: rx,
            cancel,
        })
    }

    async fn publish(&self, event: &Event) -> RelmuxResult<PublishAck> {
        if self.closed.is_cancelled() {
            return Err(RelmuxError::LinkClosed);
        }

        let (tx, rx) = oneshot::channel();

        self.requests
            .send(LinkRequest::Publish {
                event: event.clone(),
                ack: tx,
            })
            .await
            .map_err(|_| RelmuxError::LinkClosed)?;

        // Driver dropped the ack sender without answering
        rx.await.map_err(|_| RelmuxError::LinkClosed)
    }

    fn close(&self) {
        tracing::debug!(url = %self.url, "closing link");
        self.closed.cancel();
    }
}
