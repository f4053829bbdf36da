//! Watches namespaces, pods, VPAs and HPAs and reconciles the namespaces they touch.

use std::sync::Arc;

use kube::runtime::reflector;
use kube::Api;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::handler::{Dispatcher, Watched};
use crate::kubernetes::ClusterHandle;
use crate::types::Event;

pub mod queue;
pub mod watcher;

pub use queue::WorkQueue;

pub struct Controller {
    handle: Arc<ClusterHandle>,
    dispatcher: Arc<Dispatcher>,
    max_retries: u32,
}

impl Controller {
    pub fn new(handle: Arc<ClusterHandle>, dispatcher: Arc<Dispatcher>, max_retries: u32) -> Self {
        Self { handle, dispatcher, max_retries }
    }

    /// Start one watcher and one queue processor per kind.
    pub async fn start(&self, token: CancellationToken) -> Result<Vec<JoinHandle<()>>> {
        let core = self.handle.core().await?;
        let vpa = self.handle.vpa().await?;

        let mut tasks = Vec::new();
        tasks.extend(self.spawn_kind(core.namespaces(), token.clone()));
        tasks.extend(self.spawn_kind(core.all_pods(), token.clone()));
        tasks.extend(self.spawn_kind(vpa.all(), token.clone()));
        tasks.extend(self.spawn_kind(core.all_hpas(), token.clone()));
        info!(tasks = tasks.len(), "Controller started");
        Ok(tasks)
    }

    fn spawn_kind<K: Watched>(&self, api: Api<K>, token: CancellationToken) -> [JoinHandle<()>; 2] {
        let (store, writer) = reflector::store::<K>();
        let queue: WorkQueue<Event> = WorkQueue::new();

        let watcher = tokio::spawn(watcher::watch(api, store.clone(), writer, queue.clone(), token));
        let processor = tokio::spawn(watcher::process_queue(
            queue,
            store,
            self.dispatcher.clone(),
            self.max_retries,
        ));
        [watcher, processor]
    }
}
