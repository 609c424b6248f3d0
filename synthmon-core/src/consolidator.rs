//! Reconciles cluster snapshots against the remote check set.
//!
//! [`Consolidator::publish`] may be called from any task: it stores the
//! newest snapshot in a single slot (latest wins) and starts a sync task if
//! none is running. The sync loops until it has processed the newest
//! version; a failed attempt is abandoned and retried by whichever snapshot
//! arrives next, which is safe because the reconcile is idempotent.

use crate::builder::{Builder, Options};
use crate::check::{Check, CheckSet, ProbeSet};
use crate::error::{CoreError, Result};
use crate::state::{ClusterState, Publisher, Version};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use synthmon_client::Client;
use tracing::{debug, error, info, warn};

/// Diffs snapshots against the remote API and converges it.
pub struct Consolidator {
    shared: Arc<Shared>,
}

struct Shared {
    client: Client,
    request_timeout: Duration,
    slot: Mutex<Slot>,
}

/// The only mutable state shared between the publish path and the sync task.
#[derive(Default)]
struct Slot {
    latest: ClusterState,
    syncing: bool,
}

impl Consolidator {
    /// Reconcile through `client`, bounding every remote call by
    /// `request_timeout`.
    pub fn new(client: Client, request_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                request_timeout,
                slot: Mutex::new(Slot::default()),
            }),
        }
    }
}

impl Publisher for Consolidator {
    fn publish(&self, state: ClusterState) {
        info!(version = state.version, "received cluster state");

        let mut slot = self.shared.slot.lock();
        slot.latest = state;
        if !slot.syncing {
            slot.syncing = true;
            tokio::spawn(sync(Arc::clone(&self.shared)));
        }
    }
}

/// Drain the snapshot slot: sync the latest snapshot until no newer one has
/// arrived. Exits early on failure, leaving the retry to the next publish.
async fn sync(shared: Arc<Shared>) {
    let mut last_synced: Version = 0;
    loop {
        let state = shared.latest();
        if state.version == last_synced {
            break;
        }
        debug!(version = state.version, "starting sync");
        if let Err(err) = shared.sync_state(&state).await {
            error!(version = state.version, error = %err, "sync failed");
            break;
        }
        last_synced = state.version;
        info!(version = state.version, "sync completed");
    }
    shared.slot.lock().syncing = false;
}

impl Shared {
    fn latest(&self) -> ClusterState {
        self.slot.lock().latest.clone()
    }

    async fn sync_state(&self, state: &ClusterState) -> Result<()> {
        info!(
            version = state.version,
            num_services = state.services.len(),
            num_ingresses = state.ingresses.len(),
            "starting sync"
        );

        let builder = Builder::new(Options::new());
        let (mut checks, warnings) = builder.build(&state.services, &state.ingresses);

        debug!(
            num_checks = checks.len(),
            warnings = warnings.len(),
            "check build finished"
        );
        if !warnings.is_empty() {
            warn!(count = warnings.len(), "check build resulted in warnings");
            for warning in &warnings {
                warn!(resources = ?warning.objects, "{}", warning.cause);
            }
        }

        let api = self.api_objects().await?;

        for check in &mut checks {
            check.resolve_probe_ids(&api.probes)?;
        }

        let desired = match CheckSet::new(checks) {
            Ok(set) => set,
            Err(err) => {
                if let CoreError::DuplicateCheck { job, objects } = &err {
                    warn!(
                        job = %job,
                        resources = ?objects,
                        "cluster objects produce colliding checks"
                    );
                }
                return Err(CoreError::CheckSet(Box::new(err)));
            }
        };

        if !state.force && api.checks.equals(&desired) {
            info!("skipping sync: no changes");
            return Ok(());
        }

        let mut add: Vec<Check> = Vec::new();
        let mut update: Vec<Check> = Vec::new();
        let mut del: Vec<Check> = Vec::new();

        for (job, check) in desired.iter() {
            let Some(known) = api.checks.get(job) else {
                add.push(check.clone());
                continue;
            };
            if check.equals(known) {
                continue;
            }
            let mut updated = check.clone();
            updated.raw.id = known.raw.id;
            updated.raw.tenant_id = known.raw.tenant_id;
            updated.raw.created = known.raw.created;
            updated.raw.modified = 0.0;
            updated.raw.labels = known.raw.labels.clone();
            updated.mark_managed();
            update.push(updated);
        }

        for (job, existing) in api.checks.iter() {
            // Only checks this controller owns are safe to remove.
            if !desired.contains(job) && existing.is_managed() {
                del.push(existing.clone());
            }
        }

        info!(
            added = add.len(),
            updated = update.len(),
            removed = del.len(),
            "starting reconciliation"
        );

        for check in &del {
            debug!(id = check.raw.id, job = %check.raw.job, "deleting check");
            self.with_timeout(self.client.delete_check(check.raw.id))
                .await
                .map_err(|err| CoreError::CheckSync {
                    op: "deleting",
                    job: check.raw.job.clone(),
                    id: check.raw.id,
                    source: Box::new(err),
                })?;
        }

        for check in &update {
            debug!(id = check.raw.id, job = %check.raw.job, "updating check");
            self.with_timeout(self.client.update_check(&check.raw))
                .await
                .map_err(|err| CoreError::CheckSync {
                    op: "updating",
                    job: check.raw.job.clone(),
                    id: check.raw.id,
                    source: Box::new(err),
                })?;
        }

        for check in &mut add {
            check.mark_managed();
            debug!(job = %check.raw.job, "creating check");
            self.with_timeout(self.client.add_check(&check.raw))
                .await
                .map_err(|err| CoreError::CheckSync {
                    op: "creating",
                    job: check.raw.job.clone(),
                    id: check.raw.id,
                    source: Box::new(err),
                })?;
        }

        debug!("done");

        Ok(())
    }

    /// Fetch the remote probe roster and check set.
    async fn api_objects(&self) -> Result<ApiState> {
        let probes = self
            .with_timeout(self.client.list_probes())
            .await
            .map_err(|err| CoreError::FetchState(Box::new(err)))?;

        let checks = self
            .with_timeout(self.client.list_checks())
            .await
            .map_err(|err| CoreError::FetchState(Box::new(err)))?;

        Ok(ApiState {
            probes: ProbeSet::from_probes(probes),
            checks: CheckSet::from_remote(checks),
        })
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = synthmon_client::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(CoreError::from),
            Err(_) => Err(CoreError::Timeout(self.request_timeout)),
        }
    }
}

/// The remote API's view of the world, fetched at the top of each reconcile.
struct ApiState {
    checks: CheckSet,
    probes: ProbeSet,
}
