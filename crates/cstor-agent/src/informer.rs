use crate::api_client::ResourceApi;
use async_trait::async_trait;
use cstor_core::{Resource, ResourceKey};
use futures_util::StreamExt;
use kube::runtime::watcher;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives informer notifications; implementations only enqueue
#[async_trait]
pub trait EventHandler<K>: Send + Sync {
    async fn on_add(&self, obj: &K);
    async fn on_update(&self, old: &K, new: &K);
    async fn on_delete(&self, obj: &K);
}

/// Watch-driven cache over one resource kind
///
/// Live `Apply`/`Delete` events are diffed against the cache by
/// `resourceVersion`. A relist (`Init` .. `InitDone`) replaces the cache and
/// reports what changed while the watch was down. Every `resync_interval`
/// all cached objects are replayed as `on_update(obj, obj)`.
pub struct Informer<K: Resource> {
    api: Arc<dyn ResourceApi<K>>,
    namespace: Option<String>,
    label_selector: Option<String>,
    resync_interval: Duration,
    cache: RwLock<BTreeMap<ResourceKey, K>>,
    synced: watch::Sender<bool>,
}

impl<K: Resource> Informer<K> {
    pub fn new(api: Arc<dyn ResourceApi<K>>, resync_interval: Duration) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            api,
            namespace: None,
            label_selector: None,
            resync_interval,
            cache: RwLock::new(BTreeMap::new()),
            synced,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait for the first complete listing; false when cancelled first
    pub async fn wait_for_sync(&self, token: &CancellationToken) -> bool {
        let mut rx = self.synced.subscribe();
        tokio::select! {
            _ = token.cancelled() => false,
            result = rx.wait_for(|synced| *synced) => result.is_ok(),
        }
    }

    pub fn cached(&self, key: &ResourceKey) -> Option<K> {
        self.cache.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Fold one watch event into the cache and notify `handler`
    ///
    /// `relist` collects objects between `Init` and `InitDone`.
    async fn handle_event(
        &self,
        event: watcher::Event<K>,
        relist: &mut Option<BTreeMap<ResourceKey, K>>,
        handler: &dyn EventHandler<K>,
    ) {
        match event {
            watcher::Event::Init => *relist = Some(BTreeMap::new()),
            watcher::Event::InitApply(obj) => {
                relist.get_or_insert_with(BTreeMap::new).insert(obj.key(), obj);
            }
            watcher::Event::InitDone => {
                let fresh = relist.take().unwrap_or_default();
                let previous = std::mem::replace(&mut *self.cache.write(), fresh.clone());
                for (key, obj) in &fresh {
                    match previous.get(key) {
                        None => handler.on_add(obj).await,
                        Some(old) if old.resource_version() != obj.resource_version() => {
                            handler.on_update(old, obj).await
                        }
                        Some(_) => {}
                    }
                }
                for (key, obj) in &previous {
                    if !fresh.contains_key(key) {
                        handler.on_delete(obj).await;
                    }
                }
                self.synced.send_replace(true);
            }
            watcher::Event::Apply(obj) => {
                let old = self.cache.write().insert(obj.key(), obj.clone());
                match old {
                    None => handler.on_add(&obj).await,
                    Some(old) if old.resource_version() != obj.resource_version() => {
                        handler.on_update(&old, &obj).await
                    }
                    Some(_) => {}
                }
            }
            watcher::Event::Delete(obj) => {
                self.cache.write().remove(&obj.key());
                handler.on_delete(&obj).await;
            }
        }
    }

    /// Replay every cached object as an unchanged update
    pub async fn resync(&self, handler: &dyn EventHandler<K>) {
        let snapshot: Vec<K> = self.cache.read().values().cloned().collect();
        debug!("Resyncing {} {} objects", snapshot.len(), K::gvk().kind);
        for obj in &snapshot {
            handler.on_update(obj, obj).await;
        }
    }

    /// Follow the watch and resync until cancelled
    pub async fn run(self: Arc<Self>, handler: Arc<dyn EventHandler<K>>, token: CancellationToken) {
        let kind = K::gvk().kind;
        info!("Starting {} informer", kind);

        let mut events = self
            .api
            .watch(self.namespace.as_deref(), self.label_selector.as_deref());
        let mut relist = None;
        let mut resync = tokio::time::interval_at(
            tokio::time::Instant::now() + self.resync_interval,
            self.resync_interval,
        );
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("{} informer shutting down", kind);
                    break;
                }
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        self.handle_event(event, &mut relist, handler.as_ref()).await;
                    }
                    Some(Err(e)) => warn!("{} watch error: {}", kind, e),
                    None => {
                        warn!("{} watch ended", kind);
                        break;
                    }
                },
                _ = resync.tick() => {
                    if self.has_synced() {
                        self.resync(handler.as_ref()).await;
                    }
                }
            }
        }
    }
}
