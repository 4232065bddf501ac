//! Publish fan-out
//!
//! One signed event is sent to every active link concurrently. The aggregate
//! resolves the instant any single link accepts; the losers of the race are
//! left to finish detached rather than aborted, so an in-flight send to a
//! slow relay is never torn mid-request. Only a total rejection surfaces as
//! an error, with no per-link detail.

use std::sync::Arc;

use tokio::sync::mpsc;

use relmux_core::{Event, RelayUrl, RelmuxError, RelmuxResult};
use relmux_link::PublishAck;

use crate::supervisor::ActiveLinks;

/// Aggregate publish outcome: the first relay that accepted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishReceipt {
    pub relay: RelayUrl,
}

/// Send `event` to every link, first acceptance wins
pub async fn publish_all(links: &ActiveLinks, event: &Event) -> RelmuxResult<PublishReceipt> {
    if links.is_empty() {
        return Err(RelmuxError::NoActiveLinks);
    }

    let (tx, mut rx) = mpsc::channel(links.len());
    for link in links.iter() {
        let link = Arc::clone(link);
        let tx = tx.clone();
        let event = event.clone();
        tokio::spawn(async move {
            let verdict = link.publish(&event).await;
            let _ = tx.send((link.url().clone(), verdict)).await;
        });
    }
    drop(tx);

    while let Some((url, verdict)) = rx.recv().await {
        match verdict {
            Ok(PublishAck::Accepted) => return Ok(PublishReceipt { relay: url }),
            Ok(PublishAck::Rejected) => {
                tracing::debug!(url = %url, "relay rejected event");
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "publish failed on relay");
            }
        }
    }

    Err(RelmuxError::PublishRejected)
}
