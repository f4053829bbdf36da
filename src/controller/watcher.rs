use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::reflector::store::Writer;
use kube::runtime::watcher::{self, watcher};
use kube::runtime::WatchStreamExt;
use kube::{Api, ResourceExt};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::WorkQueue;
use crate::error::{Error, Result};
use crate::handler::{Dispatcher, Watched};
use crate::types::{Event, EventType};

fn to_event<K: Watched>(obj: &K, event_type: EventType) -> Event {
    Event::new(K::KIND, event_type, obj.namespace().as_deref(), &obj.name_any())
}

/// Turn a watch event into queue events, diffing against the local index.
///
/// Must be called before the event is applied to the store.
pub fn classify<K: Watched>(store: &Store<K>, event: &watcher::Event<K>) -> Vec<Event> {
    match event {
        watcher::Event::Applied(obj) => {
            let event_type = if store.get(&ObjectRef::from_obj(obj)).is_some() {
                EventType::Update
            } else {
                EventType::Create
            };
            vec![to_event(obj, event_type)]
        }
        watcher::Event::Deleted(obj) => vec![to_event(obj, EventType::Delete)],
        watcher::Event::Restarted(objs) => {
            let mut events = Vec::new();
            for obj in objs {
                match store.get(&ObjectRef::from_obj(obj)) {
                    None => events.push(to_event(obj, EventType::Create)),
                    Some(known) if known.resource_version() != obj.resource_version() => {
                        events.push(to_event(obj, EventType::Update))
                    }
                    Some(_) => {}
                }
            }
            let listed: std::collections::HashSet<ObjectRef<K>> = objs.iter().map(ObjectRef::from_obj).collect();
            for known in store.state() {
                if !listed.contains(&ObjectRef::from_obj(known.as_ref())) {
                    events.push(to_event(known.as_ref(), EventType::Delete));
                }
            }
            events
        }
    }
}

/// Feed watch events for one kind into its queue until cancelled.
pub async fn watch<K: Watched>(
    api: Api<K>,
    store: Store<K>,
    mut writer: Writer<K>,
    queue: WorkQueue<Event>,
    token: CancellationToken,
) {
    info!(kind = %K::KIND, "Starting watcher");
    let mut stream = watcher(api, watcher::Config::default()).default_backoff().boxed();
    loop {
        select! {
            _ = token.cancelled() => {
                info!(kind = %K::KIND, "Watcher shutdown requested");
                break;
            }
            next = stream.next() => {
                match next {
                    Some(Ok(event)) => {
                        for evt in classify(&store, &event) {
                            debug!(kind = %evt.resource_kind, key = %evt.key, event_type = %evt.event_type, "Queueing event");
                            queue.add(evt);
                        }
                        writer.apply_watcher_event(&event);
                    }
                    Some(Err(e)) => warn!(kind = %K::KIND, error = %e, "Watch stream error"),
                    None => break,
                }
            }
        }
    }
    queue.shut_down();
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn process<K: Watched>(event: &Event, store: &Store<K>, dispatcher: &Dispatcher) -> Result<()> {
    let Some((namespace, name)) = event.split_key() else {
        warn!(key = %event.key, "Dropping event with malformed key");
        return Ok(());
    };
    let reference = match namespace {
        Some(ns) => ObjectRef::new(name).within(ns),
        None => ObjectRef::new(name),
    };
    let object = store.get(&reference).map(|obj| obj.as_ref().clone().into_watched());
    match AssertUnwindSafe(dispatcher.dispatch(event, object)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::Panic(panic_message(payload))),
    }
}

/// Drain the queue, dispatching each event and retrying failures with backoff.
pub async fn process_queue<K: Watched>(
    queue: WorkQueue<Event>,
    store: Store<K>,
    dispatcher: Arc<Dispatcher>,
    max_retries: u32,
) {
    while let Some(event) = queue.get().await {
        match process(&event, &store, &dispatcher).await {
            Ok(()) => queue.forget(&event),
            Err(err) => {
                let attempts = queue.num_requeues(&event);
                if attempts < max_retries {
                    if err.is_transient() {
                        warn!(
                            key = %event.key,
                            attempt = attempts + 1,
                            max_retries,
                            error = %err,
                            "Error processing event, retrying"
                        );
                    } else {
                        error!(
                            key = %event.key,
                            attempt = attempts + 1,
                            max_retries,
                            error = %err,
                            "Error processing event, retrying"
                        );
                    }
                    queue.add_rate_limited(event.clone());
                } else {
                    error!(
                        key = %event.key,
                        attempts = attempts + 1,
                        error = %err,
                        "Giving up on event"
                    );
                    queue.forget(&event);
                }
            }
        }
        queue.done(&event);
    }
    debug!(kind = %K::KIND, "Queue shut down");
}
