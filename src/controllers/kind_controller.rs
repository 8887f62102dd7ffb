//! Controller for one configured kind
//!
//! Receives informer events, queues them and hands them to a pool of
//! workers that sync the affected entities to Port.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::runtime::reflector::Store;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::{object_key, InformerHandle, ObjectEvent, ObjectKey};
use crate::entity::LiveSet;
use crate::error::{Error, Result};
use crate::reconcilers::entity_sync::{object_value, EntitySyncer};

use super::ResourceController;

/// Attempts per event before it is dropped
const MAX_ATTEMPTS: u32 = 5;

/// Delay added per failed attempt
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

struct WorkItem {
    event: ObjectEvent,
    attempt: u32,
}

type WorkQueue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkItem>>>;

/// Watches one kind and keeps its entities in Port up to date
pub struct KindController {
    syncer: Arc<EntitySyncer>,
    informer: InformerHandle,
    events: Mutex<Option<broadcast::Receiver<ObjectEvent>>>,
    stop: CancellationToken,
}

impl KindController {
    /// Create a controller; it subscribes to the informer right away so no
    /// event published before `run` is lost
    pub fn new(syncer: EntitySyncer, informer: InformerHandle) -> Self {
        let events = informer.subscribe();
        Self {
            syncer: Arc::new(syncer),
            informer,
            events: Mutex::new(Some(events)),
            stop: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl ResourceController for KindController {
    fn kind(&self) -> String {
        self.syncer.kind().to_string()
    }

    async fn wait_for_cache_sync(&self, cancel: CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::cache_sync(format!(
                "cancelled while waiting for '{}' cache to sync",
                self.syncer.kind()
            ))),
            result = self.informer.wait_until_synced() => result,
        }
    }

    fn run(&self, workers: usize, cancel: CancellationToken) {
        let Some(events) = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            warn!(kind = %self.syncer.kind(), "Controller is already running");
            return;
        };

        let kind = self.syncer.kind().to_string();
        info!(kind = %kind, workers = workers, "Starting controller");

        let stop = self.stop.clone();
        tokio::spawn({
            let stop = stop.clone();
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => stop.cancel(),
                    _ = stop.cancelled() => {}
                }
            }
        });

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let queue: WorkQueue = Arc::new(tokio::sync::Mutex::new(queue_rx));

        let store = self.informer.store().clone();
        let forwarded = Forwarded::from_store(&store);
        tokio::spawn(dispatch(
            kind,
            events,
            store,
            forwarded,
            queue_tx.clone(),
            stop.clone(),
        ));

        for _ in 0..workers.max(1) {
            tokio::spawn(work(
                self.syncer.clone(),
                queue.clone(),
                queue_tx.clone(),
                stop.clone(),
            ));
        }
    }

    fn shutdown(&self) {
        info!(kind = %self.syncer.kind(), "Shutting down controller");
        self.stop.cancel();
    }

    fn live_set(&self) -> Result<LiveSet> {
        let objects = self
            .informer
            .store()
            .state()
            .iter()
            .map(|obj| object_value(obj))
            .collect::<Result<Vec<_>>>()?;
        self.syncer.live_set(&objects)
    }
}

/// Last known state of every object handed to the workers, seeded from the
/// synced cache when the controller starts
struct Forwarded {
    objects: HashMap<ObjectKey, Arc<DynamicObject>>,
}

impl Forwarded {
    fn from_store(store: &Store<DynamicObject>) -> Self {
        Self {
            objects: store
                .state()
                .into_iter()
                .map(|obj| (object_key(&obj), obj))
                .collect(),
        }
    }

    fn record(&mut self, event: &ObjectEvent) {
        match event {
            ObjectEvent::Applied(obj) => {
                self.objects.insert(object_key(obj), obj.clone());
            }
            ObjectEvent::Deleted(obj) => {
                self.objects.remove(&object_key(obj));
            }
        }
    }

    /// Events bringing workers back in line with the store after missed
    /// events: deletions for objects no longer cached, then every cached
    /// object as applied
    fn resync(&mut self, store: &Store<DynamicObject>) -> Vec<ObjectEvent> {
        let cached = Self::from_store(store);
        let mut events: Vec<ObjectEvent> = self
            .objects
            .iter()
            .filter(|(key, _)| !cached.objects.contains_key(*key))
            .map(|(_, obj)| ObjectEvent::Deleted(obj.clone()))
            .collect();
        events.extend(cached.objects.values().cloned().map(ObjectEvent::Applied));
        *self = cached;
        events
    }
}

async fn dispatch(
    kind: String,
    mut events: broadcast::Receiver<ObjectEvent>,
    store: Store<DynamicObject>,
    mut forwarded: Forwarded,
    queue: mpsc::UnboundedSender<WorkItem>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    forwarded.record(&event);
                    let _ = queue.send(WorkItem { event, attempt: 0 });
                }
                Err(RecvError::Lagged(missed)) => {
                    let resync = forwarded.resync(&store);
                    warn!(kind = %kind, missed = missed, requeued = resync.len(), "Event stream lagged, requeueing from cache");
                    for event in resync {
                        let _ = queue.send(WorkItem { event, attempt: 0 });
                    }
                }
                Err(RecvError::Closed) => {
                    debug!(kind = %kind, "Event stream closed");
                    break;
                }
            }
        }
    }
}

async fn work(
    syncer: Arc<EntitySyncer>,
    queue: WorkQueue,
    retry: mpsc::UnboundedSender<WorkItem>,
    stop: CancellationToken,
) {
    loop {
        let item = {
            let mut queue = queue.lock().await;
            tokio::select! {
                _ = stop.cancelled() => None,
                item = queue.recv() => item,
            }
        };
        let Some(item) = item else {
            break;
        };

        let Err(e) = syncer.handle(&item.event).await else {
            continue;
        };

        let name = item.event.object().metadata.name.clone().unwrap_or_default();
        let attempt = item.attempt + 1;
        if is_retryable(&e) && attempt < MAX_ATTEMPTS {
            warn!(kind = %syncer.kind(), name = %name, attempt = attempt, error = %e, "Sync failed, retrying");
            let retry = retry.clone();
            tokio::spawn(async move {
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                let _ = retry.send(WorkItem {
                    event: item.event,
                    attempt,
                });
            });
        } else {
            error!(kind = %syncer.kind(), name = %name, attempt = attempt, error = %e, "Sync failed, dropping event");
        }
    }
}

/// Only transport and API failures can succeed on a later attempt
fn is_retryable(error: &Error) -> bool {
    matches!(error, Error::Catalog(_) | Error::Http(_))
}
