//! Shared informers for dynamically typed resources
//!
//! One factory serves the whole process. Each resource type gets a single
//! reflector store and a broadcast channel of change events, no matter how
//! many times it is requested.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::runtime::reflector::{self, store::Writer, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tokio::sync::broadcast;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Events buffered per resource type before slow subscribers lag
const EVENT_BUFFER: usize = 4096;

/// Change notification for one object
#[derive(Clone, Debug)]
pub enum ObjectEvent {
    /// Object was created, updated, listed or resynced
    Applied(Arc<DynamicObject>),
    /// Object was deleted, carrying its last known state
    Deleted(Arc<DynamicObject>),
}

impl ObjectEvent {
    pub fn object(&self) -> &DynamicObject {
        match self {
            ObjectEvent::Applied(obj) | ObjectEvent::Deleted(obj) => obj,
        }
    }
}

/// Namespace and name of an object
pub type ObjectKey = (Option<String>, String);

pub fn object_key(obj: &DynamicObject) -> ObjectKey {
    (obj.namespace(), obj.name_any())
}

/// Shared view of one resource type: its cache and its event stream
#[derive(Clone)]
pub struct InformerHandle {
    api_resource: ApiResource,
    store: Store<DynamicObject>,
    events: broadcast::Sender<ObjectEvent>,
}

impl InformerHandle {
    /// Wrap a store with a fresh event channel
    pub(crate) fn new(api_resource: ApiResource, store: Store<DynamicObject>) -> Self {
        Self::with_capacity(api_resource, store, EVENT_BUFFER)
    }

    pub(crate) fn with_capacity(
        api_resource: ApiResource,
        store: Store<DynamicObject>,
        capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            api_resource,
            store,
            events,
        }
    }

    /// Deliver an event to every subscriber
    pub(crate) fn publish(&self, event: ObjectEvent) {
        // No subscribers is fine, the store still holds the object
        let _ = self.events.send(event);
    }

    pub fn api_resource(&self) -> &ApiResource {
        &self.api_resource
    }

    /// Read-only cache of the resource type
    pub fn store(&self) -> &Store<DynamicObject> {
        &self.store
    }

    /// Subscribe to change events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ObjectEvent> {
        self.events.subscribe()
    }

    /// Wait until the initial list has been loaded into the store
    pub async fn wait_until_synced(&self) -> Result<()> {
        self.store.wait_until_ready().await.map_err(|e| {
            Error::cache_sync(format!(
                "{} informer stopped before syncing: {}",
                self.api_resource.plural, e
            ))
        })
    }
}

/// Starts the delivery of change events for registered resource types
#[cfg_attr(test, automock)]
pub trait InformerFactory: Send + Sync {
    /// Start every registered informer that is not running yet. Does not block.
    fn start(&self, cancel: CancellationToken);
}

struct Informer {
    handle: InformerHandle,
    api: Api<DynamicObject>,
    writer: Option<Writer<DynamicObject>>,
}

/// Process-wide informer factory
pub struct SharedInformerFactory {
    client: Client,
    resync_interval: Duration,
    informers: Mutex<HashMap<String, Informer>>,
}

impl SharedInformerFactory {
    /// Create a factory; a zero resync interval disables resync
    pub fn new(client: Client, resync_interval: Duration) -> Self {
        Self {
            client,
            resync_interval,
            informers: Mutex::new(HashMap::new()),
        }
    }

    /// Get the informer for a resource type, registering it on first request
    pub fn for_resource(&self, api_resource: &ApiResource) -> InformerHandle {
        let key = format!("{}/{}", api_resource.api_version, api_resource.plural);
        let mut informers = self.informers.lock().unwrap_or_else(PoisonError::into_inner);

        informers
            .entry(key)
            .or_insert_with(|| {
                debug!(resource = %api_resource.plural, api_version = %api_resource.api_version, "Registering informer");
                let writer = Writer::new(api_resource.clone());
                Informer {
                    handle: InformerHandle::new(api_resource.clone(), writer.as_reader()),
                    api: Api::all_with(self.client.clone(), api_resource),
                    writer: Some(writer),
                }
            })
            .handle
            .clone()
    }
}

impl InformerFactory for SharedInformerFactory {
    fn start(&self, cancel: CancellationToken) {
        let mut informers = self.informers.lock().unwrap_or_else(PoisonError::into_inner);

        for informer in informers.values_mut() {
            let Some(writer) = informer.writer.take() else {
                continue;
            };
            info!(resource = %informer.handle.api_resource.plural, "Starting informer");
            tokio::spawn(run_informer(
                informer.api.clone(),
                writer,
                informer.handle.clone(),
                self.resync_interval,
                cancel.clone(),
            ));
        }
    }
}

async fn run_informer(
    api: Api<DynamicObject>,
    writer: Writer<DynamicObject>,
    handle: InformerHandle,
    resync_interval: Duration,
    cancel: CancellationToken,
) {
    let resource = handle.api_resource.plural.clone();
    let stream = reflector::reflector(
        writer,
        watcher(api, watcher::Config::default()).default_backoff(),
    );
    tokio::pin!(stream);

    let mut relist = Relist::default();
    let mut resync = (!resync_interval.is_zero())
        .then(|| tokio::time::interval_at(Instant::now() + resync_interval, resync_interval));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(resource = %resource, "Informer stopped");
                break;
            }
            _ = next_resync(&mut resync) => {
                let objects = handle.store.state();
                debug!(resource = %resource, count = objects.len(), "Resyncing informer");
                for obj in objects {
                    handle.publish(ObjectEvent::Applied(obj));
                }
            }
            event = stream.next() => match event {
                Some(Ok(event)) => publish_watch_event(&handle, &mut relist, event),
                Some(Err(e)) => {
                    warn!(resource = %resource, error = %e, "Watch error");
                }
                None => {
                    warn!(resource = %resource, "Watch stream ended");
                    break;
                }
            }
        }
    }
}

/// Objects cached before a relist that the relist has not returned yet
#[derive(Default)]
struct Relist {
    missing: HashMap<ObjectKey, Arc<DynamicObject>>,
}

impl Relist {
    fn begin(&mut self, cached: Vec<Arc<DynamicObject>>) {
        self.missing = cached
            .into_iter()
            .map(|obj| (object_key(&obj), obj))
            .collect();
    }

    fn seen(&mut self, obj: &DynamicObject) {
        self.missing.remove(&object_key(obj));
    }

    fn finish(&mut self) -> Vec<Arc<DynamicObject>> {
        std::mem::take(&mut self.missing).into_values().collect()
    }
}

/// Turn one watcher event into object events
///
/// The reflector has already applied the event, and it only swaps in the
/// relisted objects on `InitDone`, so the store still holds the old objects
/// when `Init` arrives. Objects that are gone after a relist were deleted
/// while the watch was down and are published as deleted.
fn publish_watch_event(
    handle: &InformerHandle,
    relist: &mut Relist,
    event: watcher::Event<DynamicObject>,
) {
    match event {
        watcher::Event::Apply(obj) => handle.publish(ObjectEvent::Applied(Arc::new(obj))),
        watcher::Event::Delete(obj) => handle.publish(ObjectEvent::Deleted(Arc::new(obj))),
        watcher::Event::Init => relist.begin(handle.store.state()),
        watcher::Event::InitApply(obj) => {
            relist.seen(&obj);
            handle.publish(ObjectEvent::Applied(Arc::new(obj)));
        }
        watcher::Event::InitDone => {
            let gone = relist.finish();
            if !gone.is_empty() {
                debug!(resource = %handle.api_resource.plural, count = gone.len(), "Objects deleted during relist");
            }
            for obj in gone {
                handle.publish(ObjectEvent::Deleted(obj));
            }
        }
    }
}

async fn next_resync(resync: &mut Option<Interval>) {
    match resync {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
