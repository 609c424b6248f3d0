//! Generic informer layer: list+watch a resource by group/version/kind and
//! dispatch typed Add/Update/Delete events into a watcher chain.
//!
//! The watch stream only reports "apply" and "delete"; an internal cache
//! keyed by namespace/name turns applies into adds or updates (with the old
//! object) and reconstructs deletions missed across watch restarts. A
//! periodic resync re-delivers every cached object as an update, so
//! downstream state heals even if an event was dropped.

use futures::TryStreamExt;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::runtime::watcher::{self, watcher as watch_stream, Event};
use kube::runtime::WatchStreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use synthmon_core::error::CoreError;
use synthmon_core::schema::{Object, Resource};
use synthmon_core::watchers::{Action, ErrorHandler, PipelineError, Watcher};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(30);

/// Creates informers sharing a client, resync period and error handler.
pub struct Factory {
    client: kube::Client,
    resync_period: Duration,
    error_handler: ErrorHandler,
}

impl Factory {
    /// A factory with the default resync period and a log-only error handler.
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            resync_period: DEFAULT_RESYNC_PERIOD,
            error_handler: Arc::new(default_error_handler),
        }
    }

    /// Override the resync period.
    #[must_use]
    pub fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period = period;
        self
    }

    /// Override the pipeline error handler.
    #[must_use]
    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = handler;
        self
    }

    /// An informer for `resource` dispatching into `watcher`.
    pub fn informer(&self, resource: Resource, watcher: impl Watcher + 'static) -> Informer {
        Informer {
            client: self.client.clone(),
            resync_period: self.resync_period,
            dispatcher: Dispatcher::new(resource, Box::new(watcher), self.error_handler.clone()),
        }
    }
}

/// Filters the skip sentinel silently, logs everything else.
fn default_error_handler(err: &PipelineError) {
    if !err.is_skip() {
        error!(watcher = %err.watcher, "error in pipeline: {}", err);
    }
}

/// A single-resource informer. Runs until canceled.
pub struct Informer {
    client: kube::Client,
    resync_period: Duration,
    dispatcher: Dispatcher,
}

impl Informer {
    /// Watch the resource and dispatch events until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let resource = self.dispatcher.resource.clone();
        let gvk = kube::core::GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        let api_resource = ApiResource::from_gvk_with_plural(&gvk, &resource.plural);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &api_resource);

        let stream = watch_stream(api, watcher::Config::default()).default_backoff();
        futures::pin_mut!(stream);

        let mut resync = tokio::time::interval(self.resync_period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; consume it so the resync
        // cadence starts one period from now.
        resync.tick().await;

        info!(resource = %resource, "informer started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(resource = %resource, "informer stopped");
                    return;
                }

                _ = resync.tick() => {
                    debug!(resource = %resource, "resync");
                    self.dispatcher.resync().await;
                }

                event = stream.try_next() => match event {
                    Ok(Some(Event::Init)) => self.dispatcher.begin_init(),
                    Ok(Some(Event::InitApply(payload))) | Ok(Some(Event::Apply(payload))) => {
                        self.dispatcher.apply(&payload).await;
                    }
                    Ok(Some(Event::InitDone)) => self.dispatcher.finish_init().await,
                    Ok(Some(Event::Delete(payload))) => self.dispatcher.delete(&payload).await,
                    Ok(None) => {
                        warn!(resource = %resource, "watch stream ended");
                        return;
                    }
                    Err(err) => {
                        error!(resource = %resource, error = %err, "watch stream error");
                    }
                },
            }
        }
    }
}

/// Converts raw watch payloads into typed events against the cache and feeds
/// the watcher chain. Failures go to the error handler as structured
/// pipeline errors; a conversion failure is reported under the cast action.
struct Dispatcher {
    resource: Resource,
    watcher: Box<dyn Watcher>,
    error_handler: ErrorHandler,
    cache: HashMap<String, Object>,
    /// Keys seen since the current watch (re)start; used to synthesize
    /// deletes for objects that disappeared while the watch was down.
    pending_init: Option<HashSet<String>>,
}

impl Dispatcher {
    fn new(resource: Resource, watcher: Box<dyn Watcher>, error_handler: ErrorHandler) -> Self {
        Self {
            resource,
            watcher,
            error_handler,
            cache: HashMap::new(),
            pending_init: None,
        }
    }

    fn begin_init(&mut self) {
        self.pending_init = Some(HashSet::new());
    }

    async fn finish_init(&mut self) {
        let Some(seen) = self.pending_init.take() else {
            return;
        };
        let gone: Vec<String> = self
            .cache
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for key in gone {
            if let Some(mut obj) = self.cache.remove(&key) {
                if let Err(err) = self.watcher.on_delete(&mut obj).await {
                    self.report(Action::Delete, obj.id(), err);
                }
            }
        }
    }

    async fn apply(&mut self, payload: &DynamicObject) {
        let key = cache_key(payload);
        if let Some(seen) = &mut self.pending_init {
            seen.insert(key.clone());
        }

        let Some(mut obj) = self.convert(payload) else {
            return;
        };

        let old = self.cache.get(&key).cloned();
        self.cache.insert(key, obj.clone());

        match old {
            Some(mut old) => {
                if let Err(err) = self.watcher.on_update(&mut old, &mut obj).await {
                    self.report(Action::Update, obj.id(), err);
                }
            }
            None => {
                if let Err(err) = self.watcher.on_add(&mut obj).await {
                    self.report(Action::Add, obj.id(), err);
                }
            }
        }
    }

    async fn delete(&mut self, payload: &DynamicObject) {
        let key = cache_key(payload);
        self.cache.remove(&key);

        let Some(mut obj) = self.convert(payload) else {
            return;
        };
        if let Err(err) = self.watcher.on_delete(&mut obj).await {
            self.report(Action::Delete, obj.id(), err);
        }
    }

    /// Re-deliver every cached object as an update.
    async fn resync(&mut self) {
        let objects: Vec<Object> = self.cache.values().cloned().collect();
        for obj in objects {
            let mut old = obj.clone();
            let mut new = obj;
            if let Err(err) = self.watcher.on_update(&mut old, &mut new).await {
                self.report(Action::Update, new.id(), err);
            }
        }
    }

    fn convert(&self, payload: &DynamicObject) -> Option<Object> {
        let value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(err) => {
                self.report(
                    Action::Cast,
                    cache_key(payload),
                    CoreError::Decode {
                        kind: self.resource.kind.clone(),
                        source: err,
                    },
                );
                return None;
            }
        };
        match Object::from_value(&self.resource, value) {
            Ok(obj) => Some(obj),
            Err(err) => {
                self.report(Action::Cast, cache_key(payload), err);
                None
            }
        }
    }

    fn report(&self, action: Action, object: String, source: CoreError) {
        let err = PipelineError {
            action,
            object,
            watcher: self.resource.to_string(),
            source,
        };
        (self.error_handler)(&err);
    }
}

fn cache_key(payload: &DynamicObject) -> String {
    format!(
        "{}/{}",
        payload.metadata.namespace.as_deref().unwrap_or(""),
        payload.metadata.name.as_deref().unwrap_or("")
    )
}
