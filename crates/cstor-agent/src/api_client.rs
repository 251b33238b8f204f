use crate::error::{AgentError, Result};
use async_trait::async_trait;
use cstor_core::{Resource, ResourceKey};
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Read and write access to one resource kind
#[async_trait]
pub trait ResourceApi<K: Resource>: Send + Sync {
    /// Fetch by key; `None` when the resource does not exist
    async fn get(&self, key: &ResourceKey) -> Result<Option<K>>;

    async fn list(&self, namespace: Option<&str>, label_selector: Option<&str>) -> Result<Vec<K>>;

    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace metadata and spec
    async fn update(&self, obj: &K) -> Result<K>;

    /// Replace only the status sub-object
    async fn update_status(&self, obj: &K) -> Result<K>;

    /// Apply an RFC 7386 merge patch
    async fn patch(&self, key: &ResourceKey, patch: &serde_json::Value) -> Result<K>;

    async fn delete(&self, key: &ResourceKey) -> Result<()>;

    /// Watch events: an initial listing framed by `Init`/`InitDone`, then live changes
    fn watch(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> BoxStream<'static, Result<watcher::Event<K>>>;
}

/// Map a client error, keeping conflicts and missing objects distinguishable
pub(crate) fn from_kube(err: kube::Error, what: &str, key: &str) -> AgentError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => AgentError::conflict(key),
        kube::Error::Api(ae) if ae.code == 404 => AgentError::not_found(key),
        e => AgentError::api_error(format!("{} {} failed: {}", what, key, e)),
    }
}

/// Orchestrator access through a `kube` client
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
}

impl ApiClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K: Resource>(&self, namespace: Option<&str>) -> Api<K> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait]
impl<K: Resource> ResourceApi<K> for ApiClient {
    async fn get(&self, key: &ResourceKey) -> Result<Option<K>> {
        debug!("GET {} {}", K::gvk().kind, key);
        self.api::<K>(key.namespace())
            .get_opt(&key.name)
            .await
            .map_err(|e| from_kube(e, "GET", &key.to_string()))
    }

    async fn list(&self, namespace: Option<&str>, label_selector: Option<&str>) -> Result<Vec<K>> {
        debug!("LIST {} (labelSelector={:?})", K::gvk().kind, label_selector);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self
            .api::<K>(namespace)
            .list(&params)
            .await
            .map_err(|e| from_kube(e, "LIST", &K::gvk().plural))?;
        Ok(list.items)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = obj.key();
        debug!("POST {} {}", K::gvk().kind, key);
        self.api::<K>(key.namespace())
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| from_kube(e, "POST", &key.to_string()))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let key = obj.key();
        debug!("PUT {} {}", K::gvk().kind, key);
        self.api::<K>(key.namespace())
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| from_kube(e, "PUT", &key.to_string()))
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = obj.key();
        debug!("PUT {} {} status", K::gvk().kind, key);
        let body = serde_json::to_vec(obj)
            .map_err(|e| AgentError::api_error(format!("Failed to encode {}: {}", key, e)))?;
        self.api::<K>(key.namespace())
            .replace_status(&key.name, &PostParams::default(), body)
            .await
            .map_err(|e| from_kube(e, "PUT status", &key.to_string()))
    }

    async fn patch(&self, key: &ResourceKey, patch: &serde_json::Value) -> Result<K> {
        debug!("PATCH {} {}", K::gvk().kind, key);
        self.api::<K>(key.namespace())
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| from_kube(e, "PATCH", &key.to_string()))
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        debug!("DELETE {} {}", K::gvk().kind, key);
        match self
            .api::<K>(key.namespace())
            .delete(&key.name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(from_kube(e, "DELETE", &key.to_string())),
        }
    }

    fn watch(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> BoxStream<'static, Result<watcher::Event<K>>> {
        let mut config = watcher::Config::default();
        if let Some(selector) = label_selector {
            config = config.labels(selector);
        }
        watcher(self.api::<K>(namespace), config)
            .default_backoff()
            .map_err(|e| AgentError::api_error(format!("Watch of {} failed: {}", K::gvk().plural, e)))
            .boxed()
    }
}

/// A committed write as seen by watchers of a [`MockApi`]
#[derive(Clone)]
enum Change<K> {
    Applied(K),
    Deleted(K),
}

/// In-memory resource store for tests
///
/// Every write bumps a shared `resourceVersion` counter and is counted.
/// Writes carrying a stale `resourceVersion` fail with a conflict. Deleting
/// an object with finalizers only stamps its deletion timestamp; the object
/// disappears once an update leaves it with no finalizers.
pub struct MockApi<K: Resource> {
    objects: Mutex<BTreeMap<ResourceKey, K>>,
    changes: broadcast::Sender<Change<K>>,
    version: AtomicU64,
    writes: AtomicUsize,
    status_writes: AtomicUsize,
}

impl<K: Resource> Default for MockApi<K> {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            objects: Mutex::new(BTreeMap::new()),
            changes,
            version: AtomicU64::new(0),
            writes: AtomicUsize::new(0),
            status_writes: AtomicUsize::new(0),
        }
    }
}

impl<K: Resource> MockApi<K> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Seed an object without counting a write
    pub fn insert(&self, mut obj: K) -> K {
        let meta = obj.metadata_mut();
        meta.resource_version = Some(self.next_version());
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        self.objects.lock().insert(obj.key(), obj.clone());
        let _ = self.changes.send(Change::Applied(obj.clone()));
        obj
    }

    /// Current stored copy
    pub fn object(&self, key: &ResourceKey) -> Option<K> {
        self.objects.lock().get(key).cloned()
    }

    pub fn objects(&self) -> Vec<K> {
        self.objects.lock().values().cloned().collect()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    fn check_version(stored: &K, incoming: &K) -> Result<()> {
        match incoming.resource_version() {
            Some(v) if Some(v) != stored.resource_version() => {
                Err(AgentError::conflict(incoming.key().to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Store `obj`, or drop it when deletion is pending and no finalizers remain
    fn commit(&self, objects: &mut BTreeMap<ResourceKey, K>, mut obj: K) -> K {
        self.writes.fetch_add(1, Ordering::SeqCst);
        obj.metadata_mut().resource_version = Some(self.next_version());
        let drained = obj
            .metadata()
            .finalizers
            .as_ref()
            .map_or(true, |f| f.is_empty());
        let change = if obj.is_being_deleted() && drained {
            objects.remove(&obj.key());
            Change::Deleted(obj.clone())
        } else {
            objects.insert(obj.key(), obj.clone());
            Change::Applied(obj.clone())
        };
        // No receivers simply means nobody is watching
        let _ = self.changes.send(change);
        obj
    }
}

/// Namespace and `key=value` selector match, as the orchestrator applies them
fn selected<K: Resource>(obj: &K, namespace: Option<&str>, selector: Option<(&str, &str)>) -> bool {
    namespace.map_or(true, |ns| obj.namespace() == Some(ns))
        && selector.map_or(true, |(k, v)| obj.label(k) == Some(v))
}

#[async_trait]
impl<K: Resource> ResourceApi<K> for MockApi<K> {
    async fn get(&self, key: &ResourceKey) -> Result<Option<K>> {
        Ok(self.object(key))
    }

    async fn list(&self, namespace: Option<&str>, label_selector: Option<&str>) -> Result<Vec<K>> {
        let selector = label_selector.and_then(|s| s.split_once('='));
        Ok(self
            .objects
            .lock()
            .values()
            .filter(|o| selected(*o, namespace, selector))
            .cloned()
            .collect())
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let mut objects = self.objects.lock();
        if objects.contains_key(&obj.key()) {
            return Err(AgentError::conflict(obj.key().to_string()));
        }
        let mut obj = obj.clone();
        if obj.metadata().uid.is_none() {
            obj.metadata_mut().uid = Some(uuid::Uuid::new_v4().to_string());
        }
        Ok(self.commit(&mut objects, obj))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let mut objects = self.objects.lock();
        let key = obj.key();
        let stored = objects
            .get(&key)
            .ok_or_else(|| AgentError::not_found(key.to_string()))?;
        Self::check_version(stored, obj)?;
        let mut next = obj.clone();
        *next.status_mut() = stored.status().clone();
        next.metadata_mut().deletion_timestamp = stored.metadata().deletion_timestamp.clone();
        Ok(self.commit(&mut objects, next))
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let mut objects = self.objects.lock();
        let key = obj.key();
        let stored = objects
            .get(&key)
            .ok_or_else(|| AgentError::not_found(key.to_string()))?;
        Self::check_version(stored, obj)?;
        let mut next = stored.clone();
        *next.status_mut() = obj.status().clone();
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(self.commit(&mut objects, next))
    }

    async fn patch(&self, key: &ResourceKey, patch: &serde_json::Value) -> Result<K> {
        let mut objects = self.objects.lock();
        let stored = objects
            .get(key)
            .ok_or_else(|| AgentError::not_found(key.to_string()))?;
        let mut doc = serde_json::to_value(stored)
            .map_err(|e| AgentError::api_error(format!("Failed to encode object: {}", e)))?;
        json_patch::merge(&mut doc, patch);
        let next: K = serde_json::from_value(doc)
            .map_err(|e| AgentError::api_error(format!("Patched object is invalid: {}", e)))?;
        Ok(self.commit(&mut objects, next))
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        let mut objects = self.objects.lock();
        let Some(stored) = objects.get(key).cloned() else {
            return Ok(());
        };
        let mut next = stored;
        if next.metadata().deletion_timestamp.is_none() {
            next.metadata_mut().deletion_timestamp = Some(
                k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
            );
        }
        self.commit(&mut objects, next);
        Ok(())
    }

    fn watch(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> BoxStream<'static, Result<watcher::Event<K>>> {
        // Subscribe before listing so no write falls between the two
        let receiver = self.changes.subscribe();
        let namespace = namespace.map(String::from);
        let selector = label_selector
            .and_then(|s| s.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()));
        let matches = move |obj: &K| {
            selected(
                obj,
                namespace.as_deref(),
                selector.as_ref().map(|(k, v)| (k.as_str(), v.as_str())),
            )
        };

        let mut initial = vec![watcher::Event::Init];
        initial.extend(
            self.objects
                .lock()
                .values()
                .filter(|o| matches(*o))
                .cloned()
                .map(watcher::Event::InitApply),
        );
        initial.push(watcher::Event::InitDone);

        let live = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(change) => return Some((change, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter_map(move |change| {
            let event = match change {
                Change::Applied(obj) if matches(&obj) => Some(watcher::Event::Apply(obj)),
                Change::Deleted(obj) if matches(&obj) => Some(watcher::Event::Delete(obj)),
                _ => None,
            };
            futures_util::future::ready(event)
        });

        stream::iter(initial).chain(live).map(Ok).boxed()
    }
}
