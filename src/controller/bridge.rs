//! Event bridge from the watched-resource cache to the work queue
//!
//! Watch notifications are reduced to `"{namespace}/{name}"` keys. The bridge
//! never carries object state: workers re-read the cache when they pick a
//! key up, so duplicated or reordered events collapse into the same pass.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use kube::Resource;
use kube::runtime::reflector::{ObjectRef, Store, store::Writer};
use kube::runtime::watcher;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{Error, Result, handle_error};
use super::queue::WorkQueue;
use crate::crd::PatroniCluster;
use crate::health::HealthState;

/// Change notification for a cached object
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Updated { old: K, new: K },
    Deleted(K),
}

impl<K> WatchEvent<K> {
    /// The object whose key is enqueued; for updates, the new one
    pub fn object(&self) -> &K {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Deleted(obj) => obj,
            WatchEvent::Updated { new, .. } => new,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Updated { .. } => "updated",
            WatchEvent::Deleted(_) => "deleted",
        }
    }
}

/// Queue key for an object: `"{namespace}/{name}"`, or `"{name}"` when
/// the object is cluster scoped
pub fn key_for<K: Resource>(obj: &K) -> Result<String> {
    let meta = obj.meta();
    let name = meta
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;

    Ok(match meta.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    })
}

/// Split a queue key back into namespace and name
pub fn split_key(key: &str) -> Result<(Option<&str>, &str)> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok((None, name)),
        (Some(ns), Some(name), None) if !name.is_empty() => {
            Ok(((!ns.is_empty()).then_some(ns), name))
        }
        _ => Err(Error::MalformedKey(key.to_string())),
    }
}

/// Turns cache notifications into queue insertions
#[derive(Clone)]
pub struct EventBridge {
    queue: WorkQueue<String>,
    health_state: Option<Arc<HealthState>>,
}

impl EventBridge {
    pub fn new(queue: WorkQueue<String>, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            queue,
            health_state,
        }
    }

    /// Enqueue the key of the event's object
    ///
    /// Objects without a usable key are reported and dropped.
    pub fn handle<K: Resource>(&self, event: &WatchEvent<K>) {
        match key_for(event.object()) {
            Ok(key) => {
                debug!(key = %key, event = event.kind(), "Enqueueing");
                self.queue.add(key);
                if let Some(ref state) = self.health_state {
                    state.metrics.set_queue_depth(self.queue.len());
                }
            }
            Err(e) => handle_error(
                "<unknown>",
                &e,
                self.health_state.as_ref().map(|s| &s.metrics),
            ),
        }
    }

    /// Feed a raw watch stream through the cache and into the queue
    ///
    /// Each event is applied to the store via `writer` before its key is
    /// enqueued, so a worker never reads a cache older than the event that
    /// woke it. Returns when `cancel` fires or the stream ends.
    pub async fn run<S>(self, stream: S, mut writer: Writer<PatroniCluster>, cancel: CancellationToken)
    where
        S: Stream<Item = Result<watcher::Event<PatroniCluster>, watcher::Error>>,
    {
        let store = writer.as_reader();
        let mut translator = EventTranslator::default();
        let mut stream = std::pin::pin!(stream);

        info!("Event bridge started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        let events = translator.translate(&store, &event);
                        writer.apply_watcher_event(&event);
                        for event in &events {
                            self.handle(event);
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "Watch error, will retry"),
                    None => {
                        warn!("Watch stream ended");
                        break;
                    }
                },
            }
        }
        info!("Event bridge stopped");
    }
}

/// Derives add/update/delete notifications from kube watcher events
///
/// The watcher reports upserts without the previous state and a relist
/// silently drops objects deleted while disconnected. The translator
/// consults the store before the event is applied to recover both.
/// Upserts seen during a relist are held back until `InitDone`, when the
/// store swaps in the relisted objects.
#[derive(Default)]
pub struct EventTranslator {
    relist: Option<Relist>,
}

struct Relist {
    /// Objects cached before the relist started and not yet seen in it
    pending: HashMap<ObjectRef<PatroniCluster>, Arc<PatroniCluster>>,
    upserts: Vec<WatchEvent<PatroniCluster>>,
}

impl EventTranslator {
    pub fn translate(
        &mut self,
        store: &Store<PatroniCluster>,
        event: &watcher::Event<PatroniCluster>,
    ) -> Vec<WatchEvent<PatroniCluster>> {
        match event {
            watcher::Event::Init => {
                let pending = store
                    .state()
                    .into_iter()
                    .map(|obj| (ObjectRef::from_obj(obj.as_ref()), obj))
                    .collect();
                self.relist = Some(Relist {
                    pending,
                    upserts: Vec::new(),
                });
                Vec::new()
            }
            watcher::Event::InitApply(obj) => match self.relist.as_mut() {
                Some(relist) => {
                    relist.pending.remove(&ObjectRef::from_obj(obj));
                    relist.upserts.push(upsert(store, obj));
                    Vec::new()
                }
                None => vec![upsert(store, obj)],
            },
            watcher::Event::Apply(obj) => vec![upsert(store, obj)],
            watcher::Event::Delete(obj) => vec![WatchEvent::Deleted(obj.clone())],
            watcher::Event::InitDone => match self.relist.take() {
                Some(relist) => {
                    let mut events = relist.upserts;
                    events.extend(
                        relist
                            .pending
                            .into_values()
                            .map(|obj| WatchEvent::Deleted(obj.as_ref().clone())),
                    );
                    events
                }
                None => Vec::new(),
            },
        }
    }
}

fn upsert(store: &Store<PatroniCluster>, obj: &PatroniCluster) -> WatchEvent<PatroniCluster> {
    match store.get(&ObjectRef::from_obj(obj)) {
        Some(old) => WatchEvent::Updated {
            old: old.as_ref().clone(),
            new: obj.clone(),
        },
        None => WatchEvent::Added(obj.clone()),
    }
}
