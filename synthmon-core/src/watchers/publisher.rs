//! Terminal chain step forwarding events into the aggregator's channel.

use super::{Action, Watcher};
use crate::error::{CoreError, Result};
use crate::schema::Object;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A typed cluster event.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened.
    pub action: Action,
    /// The object it happened to. For updates, the new object.
    pub object: Object,
}

/// Forwards events to a bounded channel, blocking on backpressure until the
/// channel accepts or shutdown begins. On shutdown the event is dropped and
/// the cancellation error returned.
pub struct Publisher {
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl Publisher {
    /// Publish into `tx`, giving up when `cancel` fires.
    pub fn new(tx: mpsc::Sender<Event>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    async fn publish(&self, event: Event) -> Result<()> {
        tokio::select! {
            result = self.tx.send(event) => result.map_err(|_| CoreError::Canceled),
            _ = self.cancel.cancelled() => Err(CoreError::Canceled),
        }
    }
}

#[async_trait]
impl Watcher for Publisher {
    async fn on_add(&self, obj: &mut Object) -> Result<()> {
        self.publish(Event {
            action: Action::Add,
            object: obj.clone(),
        })
        .await
    }

    async fn on_update(&self, _old_obj: &mut Object, new_obj: &mut Object) -> Result<()> {
        self.publish(Event {
            action: Action::Update,
            object: new_obj.clone(),
        })
        .await
    }

    async fn on_delete(&self, obj: &mut Object) -> Result<()> {
        self.publish(Event {
            action: Action::Delete,
            object: obj.clone(),
        })
        .await
    }
}
