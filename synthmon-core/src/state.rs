//! Debounces the cluster event stream into coarse, versioned snapshots.
//!
//! The aggregator owns an object map keyed by ID and a [`MultiTimer`]
//! pacing when snapshots are cut:
//!
//! - `minSync`: 5s of quiescence after the last event
//! - `maxSync`: at most 30s after the first event since the last snapshot
//! - `initialSync`: 30s after start with no events at all
//! - `forcedSync`: 3h with no events since the last snapshot; sets `force`

use crate::error::{CoreError, Result};
use crate::schema::{InnerObject, Object};
use crate::timer::MultiTimer;
use crate::watchers::{Action, Event};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Monotonically increasing snapshot version, starting at 1.
pub type Version = u32;

/// A consistent view of the annotated cluster objects.
#[derive(Debug, Clone, Default)]
pub struct ClusterState {
    /// Strictly increasing snapshot version.
    pub version: Version,
    /// All live Service objects.
    pub services: Vec<Arc<Service>>,
    /// All live Ingress objects.
    pub ingresses: Vec<Arc<Ingress>>,
    /// Reconcile even if the derived check set matches the remote one.
    pub force: bool,
}

/// Receives snapshots as they are cut. Must tolerate being called from the
/// aggregator task.
pub trait Publisher: Send + Sync {
    /// Deliver a snapshot.
    fn publish(&self, state: ClusterState);
}

const MIN_SYNC_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_SYNC_TIMEOUT: Duration = Duration::from_secs(30);
const INITIAL_SYNC_TIMEOUT: Duration = Duration::from_secs(30);
const FORCED_SYNC_TIMEOUT: Duration = Duration::from_secs(3 * 60 * 60);

/// Deadline witnesses for the sync policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SyncReason {
    Initial,
    Min,
    Max,
    Forced,
}

impl fmt::Display for SyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncReason::Initial => "initialSync",
            SyncReason::Min => "minSync",
            SyncReason::Max => "maxSync",
            SyncReason::Forced => "forcedSync",
        };
        f.write_str(name)
    }
}

/// The aggregator: a single task owning the object map and the deadline
/// timer.
pub struct State<P> {
    events: mpsc::Receiver<Event>,
    publisher: P,
    objects: HashMap<String, Object>,
    last_published: Version,
}

impl<P: Publisher> State<P> {
    /// Aggregate `events` and deliver snapshots to `publisher`.
    pub fn new(events: mpsc::Receiver<Event>, publisher: P) -> Self {
        Self {
            events,
            publisher,
            objects: HashMap::new(),
            last_published: 0,
        }
    }

    /// Run until canceled. Returns the cancellation cause.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut deadlines = MultiTimer::new();
        deadlines
            .set(SyncReason::Initial, Instant::now() + INITIAL_SYNC_TIMEOUT)
            .await;

        loop {
            tokio::select! {
                Some(reason) = deadlines.c().recv() => {
                    info!(reason = %reason, "sync triggered");
                    self.publish(reason == SyncReason::Forced);

                    deadlines.reset();
                    deadlines
                        .set(SyncReason::Forced, Instant::now() + FORCED_SYNC_TIMEOUT)
                        .await;
                }

                event = self.events.recv() => {
                    let Some(event) = event else {
                        info!("event channel closed");
                        return Err(CoreError::Canceled);
                    };

                    let key = event.object.id();
                    info!(action = %event.action, id = %key, "received event");
                    match event.action {
                        Action::Add | Action::Update => {
                            self.objects.insert(key, event.object);
                        }
                        Action::Delete => {
                            self.objects.remove(&key);
                        }
                        // Cast failures are routed to error handling at the
                        // informer boundary and never reach this channel.
                        Action::Cast => {}
                    }

                    if !deadlines.is_set(&SyncReason::Max) {
                        deadlines
                            .set(SyncReason::Max, Instant::now() + MAX_SYNC_TIMEOUT)
                            .await;
                    }
                    deadlines
                        .clear(&[SyncReason::Initial, SyncReason::Forced])
                        .await;
                    deadlines
                        .set(SyncReason::Min, Instant::now() + MIN_SYNC_TIMEOUT)
                        .await;
                }

                _ = cancel.cancelled() => {
                    info!("terminated");
                    return Err(CoreError::Canceled);
                }
            }
        }
    }

    /// Cut a snapshot from the object map and deliver it synchronously.
    fn publish(&mut self, forced: bool) {
        self.last_published += 1;
        let mut update = ClusterState {
            version: self.last_published,
            force: forced,
            ..Default::default()
        };

        for obj in self.objects.values() {
            match obj.inner() {
                InnerObject::Service(service) => update.services.push(Arc::clone(service)),
                InnerObject::Ingress(ingress) => update.ingresses.push(Arc::clone(ingress)),
            }
        }

        self.publisher.publish(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Resource;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<ClusterState>>>);

    impl Publisher for Recorder {
        fn publish(&self, state: ClusterState) {
            self.0.lock().push(state);
        }
    }

    impl Recorder {
        fn snapshots(&self) -> Vec<ClusterState> {
            self.0.lock().clone()
        }
    }

    fn service_event(action: Action, name: &str) -> Event {
        let mut object = Object::from_value(
            &Resource::services(),
            json!({"metadata": {"name": name, "namespace": "default"}}),
        )
        .unwrap();
        object.set_group_version_kind(Resource::services().group_version_kind());
        Event { action, object }
    }

    fn ingress_event(action: Action, name: &str) -> Event {
        let mut object = Object::from_value(
            &Resource::ingresses(),
            json!({"metadata": {"name": name, "namespace": "default"}}),
        )
        .unwrap();
        object.set_group_version_kind(Resource::ingresses().group_version_kind());
        Event { action, object }
    }

    /// Let every woken task run without advancing the (paused) clock.
    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(duration: Duration) {
        tokio::time::advance(duration).await;
        settle().await;
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_after_quiescence() {
        let (tx, rx) = mpsc::channel(1);
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(State::new(rx, recorder.clone()).run(cancel.clone()));
        settle().await;

        tx.send(service_event(Action::Add, "web")).await.unwrap();
        settle().await;

        // Inside the quiescence window nothing is published.
        advance(secs(4)).await;
        assert!(recorder.snapshots().is_empty());

        advance(secs(1)).await;
        let snapshots = recorder.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].version, 1);
        assert!(!snapshots[0].force);
        assert_eq!(snapshots[0].services.len(), 1);
        assert!(snapshots[0].ingresses.is_empty());

        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(CoreError::Canceled)));
    }

    #[tokio::test(start_paused = true)]
    async fn add_then_delete_leaves_no_entry() {
        let (tx, rx) = mpsc::channel(1);
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        tokio::spawn(State::new(rx, recorder.clone()).run(cancel.clone()));
        settle().await;

        tx.send(service_event(Action::Add, "web")).await.unwrap();
        settle().await;
        tx.send(service_event(Action::Delete, "web")).await.unwrap();
        settle().await;

        advance(secs(5)).await;
        let snapshots = recorder.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].services.is_empty());

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn initial_sync_without_events() {
        let (_tx, rx) = mpsc::channel::<Event>(1);
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        tokio::spawn(State::new(rx, recorder.clone()).run(cancel.clone()));
        settle().await;

        advance(secs(29)).await;
        assert!(recorder.snapshots().is_empty());

        advance(secs(1)).await;
        let snapshots = recorder.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].version, 1);
        assert!(!snapshots[0].force);
        assert!(snapshots[0].services.is_empty());

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn forced_sync_sets_force_flag() {
        let (tx, rx) = mpsc::channel(1);
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        tokio::spawn(State::new(rx, recorder.clone()).run(cancel.clone()));
        settle().await;

        tx.send(service_event(Action::Add, "web")).await.unwrap();
        settle().await;
        advance(secs(5)).await;
        assert_eq!(recorder.snapshots().len(), 1);

        // No events for three hours: the forced deadline fires.
        advance(secs(3 * 60 * 60)).await;
        let snapshots = recorder.snapshots();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].version, 2);
        assert!(snapshots[1].force);
        assert!(!snapshots[0].force);

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_events_bounded_by_max_sync() {
        let (tx, rx) = mpsc::channel(1);
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        tokio::spawn(State::new(rx, recorder.clone()).run(cancel.clone()));
        settle().await;

        // Events every 4s keep pushing the quiescence deadline out; the
        // max-sync deadline cuts a snapshot 30s after the first event.
        for i in 0..8 {
            tx.send(service_event(Action::Add, &format!("web-{}", i)))
                .await
                .unwrap();
            settle().await;
            advance(secs(4)).await;
        }

        let snapshots = recorder.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].version, 1);
        assert_eq!(snapshots[0].services.len(), 8);

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn versions_increase_by_one_per_snapshot() {
        let (tx, rx) = mpsc::channel(1);
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        tokio::spawn(State::new(rx, recorder.clone()).run(cancel.clone()));
        settle().await;

        for round in 0..3 {
            tx.send(service_event(Action::Add, &format!("web-{}", round)))
                .await
                .unwrap();
            settle().await;
            advance(secs(5)).await;
        }

        let versions: Vec<Version> = recorder.snapshots().iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_buckets_by_variant() {
        let (tx, rx) = mpsc::channel(1);
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        tokio::spawn(State::new(rx, recorder.clone()).run(cancel.clone()));
        settle().await;

        tx.send(service_event(Action::Add, "web")).await.unwrap();
        tx.send(ingress_event(Action::Add, "edge")).await.unwrap();
        settle().await;

        advance(secs(5)).await;
        let snapshots = recorder.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].services.len(), 1);
        assert_eq!(snapshots[0].ingresses.len(), 1);

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn update_replaces_entry_under_same_id() {
        let (tx, rx) = mpsc::channel(1);
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();
        tokio::spawn(State::new(rx, recorder.clone()).run(cancel.clone()));
        settle().await;

        tx.send(service_event(Action::Add, "web")).await.unwrap();
        tx.send(service_event(Action::Update, "web")).await.unwrap();
        settle().await;

        advance(secs(5)).await;
        assert_eq!(recorder.snapshots()[0].services.len(), 1);

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_cause() {
        let (_tx, rx) = mpsc::channel::<Event>(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(State::new(rx, Recorder::default()).run(cancel.clone()));
        settle().await;

        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(CoreError::Canceled)));
    }
}
