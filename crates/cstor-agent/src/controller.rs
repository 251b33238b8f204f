use crate::error::{AgentError, Result};
use crate::events::{self, EventRecorder};
use crate::informer::{EventHandler, Informer};
use crate::workqueue::RateLimitingQueue;
use async_trait::async_trait;
use cstor_core::{EventReason, Resource, ResourceKey};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a queued reconcile should do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOperation {
    Add,
    Sync,
    Modify,
    Destroy,
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueueOperation::Add => "add",
            QueueOperation::Sync => "sync",
            QueueOperation::Modify => "modify",
            QueueOperation::Destroy => "destroy",
        };
        f.write_str(s)
    }
}

/// Workqueue item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueLoad {
    pub key: ResourceKey,
    pub operation: QueueOperation,
}

impl QueueLoad {
    pub fn new(key: ResourceKey, operation: QueueOperation) -> Self {
        Self { key, operation }
    }
}

impl fmt::Display for QueueLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.key, self.operation)
    }
}

/// Per-kind reconcile logic driven by a [`Controller`]
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Object: Resource;

    fn name(&self) -> &'static str;

    /// Whether this agent is responsible for `obj`
    fn is_owned(&self, obj: &Self::Object) -> bool;

    /// Operation for an add notification; `None` drops it
    fn classify_add(&self, obj: &Self::Object) -> Option<QueueOperation>;

    /// Operation for an update notification; `None` drops it
    fn classify_update(&self, old: &Self::Object, new: &Self::Object) -> Option<QueueOperation>;

    /// Runs once after the informer has synced and before workers start
    async fn before_start(&self, _token: &CancellationToken) -> Result<()> {
        Ok(())
    }

    /// Reconcile one item; an error asks for a rate-limited retry
    async fn reconcile(&self, load: &QueueLoad) -> Result<()>;
}

/// Turns informer notifications into queue loads
struct QueueingHandler<R: Reconciler> {
    reconciler: Arc<R>,
    queue: Arc<RateLimitingQueue<QueueLoad>>,
    recorder: Arc<dyn EventRecorder>,
}

impl<R: Reconciler> QueueingHandler<R> {
    async fn enqueue(&self, obj: &R::Object, operation: QueueOperation) {
        let load = QueueLoad::new(obj.key(), operation);
        debug!(controller = self.reconciler.name(), "Enqueue {}", load);
        self.queue.add(load);
        events::emit(
            self.recorder.as_ref(),
            obj,
            EventReason::SuccessSynced,
            EventReason::SuccessSynced.message(),
        )
        .await;
    }
}

#[async_trait]
impl<R: Reconciler> EventHandler<R::Object> for QueueingHandler<R> {
    async fn on_add(&self, obj: &R::Object) {
        if !self.reconciler.is_owned(obj) {
            return;
        }
        if let Some(op) = self.reconciler.classify_add(obj) {
            self.enqueue(obj, op).await;
        }
    }

    async fn on_update(&self, old: &R::Object, new: &R::Object) {
        if !self.reconciler.is_owned(new) {
            return;
        }
        if let Some(op) = self.reconciler.classify_update(old, new) {
            self.enqueue(new, op).await;
        }
    }

    async fn on_delete(&self, obj: &R::Object) {
        debug!(
            controller = self.reconciler.name(),
            "{} {} deleted",
            R::Object::gvk().kind,
            obj.key()
        );
    }
}

/// Informer, workqueue and worker for one reconciler
pub struct Controller<R: Reconciler> {
    reconciler: Arc<R>,
    informer: Arc<Informer<R::Object>>,
    queue: Arc<RateLimitingQueue<QueueLoad>>,
    recorder: Arc<dyn EventRecorder>,
    workers: usize,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(
        reconciler: Arc<R>,
        informer: Informer<R::Object>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            reconciler,
            informer: Arc::new(informer),
            queue: RateLimitingQueue::new(),
            recorder,
            workers: 1,
        }
    }

    pub fn queue(&self) -> Arc<RateLimitingQueue<QueueLoad>> {
        Arc::clone(&self.queue)
    }

    /// Run until `token` is cancelled
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let name = self.reconciler.name();
        info!("Starting {} controller", name);

        let handler: Arc<dyn EventHandler<R::Object>> = Arc::new(QueueingHandler {
            reconciler: Arc::clone(&self.reconciler),
            queue: Arc::clone(&self.queue),
            recorder: Arc::clone(&self.recorder),
        });
        let informer_task = tokio::spawn(Arc::clone(&self.informer).run(handler, token.clone()));

        let result = self.start_workers(name, &token).await;

        self.queue.shut_down();
        if let Err(e) = informer_task.await {
            error!("{} informer task failed: {}", name, e);
        }
        info!("{} controller stopped", name);
        result
    }

    async fn start_workers(&self, name: &str, token: &CancellationToken) -> Result<()> {
        if !self.informer.wait_for_sync(token).await {
            return Ok(());
        }
        debug!("{} informer synced", name);

        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            result = self.reconciler.before_start(token) => result?,
        }

        let workers = (0..self.workers).map(|_| {
            let reconciler = Arc::clone(&self.reconciler);
            let queue = Arc::clone(&self.queue);
            let token = token.clone();
            tokio::spawn(async move { worker(reconciler, queue, token).await })
        });
        let handles: Vec<_> = workers.collect();
        info!("{} controller started {} worker(s)", name, handles.len());

        token.cancelled().await;
        self.queue.shut_down();
        for result in futures_util::future::join_all(handles).await {
            if let Err(e) = result {
                error!("{} worker task failed: {}", name, e);
            }
        }
        Ok(())
    }
}

async fn worker<R: Reconciler>(
    reconciler: Arc<R>,
    queue: Arc<RateLimitingQueue<QueueLoad>>,
    token: CancellationToken,
) {
    loop {
        let load = tokio::select! {
            _ = token.cancelled() => break,
            load = queue.get() => load,
        };
        let Some(load) = load else { break };
        process(reconciler.as_ref(), &queue, &load).await;
        queue.done(&load);
    }
}

/// Reconcile one load and decide between forget and requeue
pub async fn process<R: Reconciler>(
    reconciler: &R,
    queue: &Arc<RateLimitingQueue<QueueLoad>>,
    load: &QueueLoad,
) {
    let name = reconciler.name();
    let result = if load.key.name.is_empty() {
        Err(AgentError::invalid_queue_item(load.to_string()))
    } else {
        reconciler.reconcile(load).await
    };

    match result {
        Ok(()) => {
            debug!(controller = name, "Reconciled {}", load);
            queue.forget(load);
        }
        Err(e) if e.is_not_found() => {
            debug!(controller = name, "{} is gone: {}", load, e);
            queue.forget(load);
        }
        Err(e) if e.is_poison() => {
            error!(controller = name, "Dropping {}: {}", load, e);
            queue.forget(load);
        }
        Err(e) => {
            warn!(controller = name, "Reconcile of {} failed, retrying: {}", load, e);
            queue.add_rate_limited(load.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::MockApi;
    use crate::events::MemoryEventRecorder;
    use crate::predicates;
    use cstor_core::VolumeReplica;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Scripted {
        seen: Mutex<Vec<QueueLoad>>,
        failures_left: Mutex<u32>,
        poison: bool,
    }

    #[async_trait]
    impl Reconciler for Scripted {
        type Object = VolumeReplica;

        fn name(&self) -> &'static str {
            "scripted"
        }

        fn is_owned(&self, obj: &VolumeReplica) -> bool {
            obj.pool_uid() == "aaaa"
        }

        fn classify_add(&self, obj: &VolumeReplica) -> Option<QueueOperation> {
            Some(predicates::classify_add(obj))
        }

        fn classify_update(&self, old: &VolumeReplica, new: &VolumeReplica) -> Option<QueueOperation> {
            predicates::classify_update(old, new)
        }

        async fn reconcile(&self, load: &QueueLoad) -> Result<()> {
            self.seen.lock().push(load.clone());
            if self.poison {
                return Err(AgentError::validation("replica", "bad"));
            }
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(AgentError::structural("not yet"));
            }
            Ok(())
        }
    }

    fn scripted(failures: u32, poison: bool) -> Arc<Scripted> {
        Arc::new(Scripted {
            seen: Mutex::new(Vec::new()),
            failures_left: Mutex::new(failures),
            poison,
        })
    }

    fn owned(name: &str, uid: &str) -> VolumeReplica {
        let mut replica = VolumeReplica::new(name, "openebs");
        replica
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(cstor_core::labels::POOL_UID_LABEL.to_string(), uid.to_string());
        replica
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_requeued_then_forgotten() {
        let reconciler = scripted(2, false);
        let queue = RateLimitingQueue::new();
        let load = QueueLoad::new(ResourceKey::new("openebs", "vol1"), QueueOperation::Add);

        process(reconciler.as_ref(), &queue, &load).await;
        assert_eq!(queue.requeues(&load), 1);

        let next = queue.get().await.unwrap();
        process(reconciler.as_ref(), &queue, &next).await;
        queue.done(&next);
        let next = queue.get().await.unwrap();
        process(reconciler.as_ref(), &queue, &next).await;
        queue.done(&next);

        assert_eq!(queue.requeues(&load), 0);
        assert_eq!(reconciler.seen.lock().len(), 3);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poison_is_forgotten() {
        let reconciler = scripted(0, true);
        let queue = RateLimitingQueue::new();

        let load = QueueLoad::new(ResourceKey::new("openebs", "vol1"), QueueOperation::Add);
        process(reconciler.as_ref(), &queue, &load).await;
        assert_eq!(queue.requeues(&load), 0);

        let invalid = QueueLoad::new(ResourceKey::new("openebs", ""), QueueOperation::Add);
        process(reconciler.as_ref(), &queue, &invalid).await;
        assert_eq!(reconciler.seen.lock().len(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_reconciles_owned_objects() {
        let api = MockApi::<VolumeReplica>::new();
        api.insert(owned("vol1", "aaaa"));
        api.insert(owned("vol2", "bbbb"));

        let reconciler = scripted(0, false);
        let informer = Informer::new(api.clone(), Duration::from_secs(30));
        let recorder = Arc::new(MemoryEventRecorder::new());
        let controller = Controller::new(reconciler.clone(), informer, recorder.clone());
        let token = CancellationToken::new();
        let task = tokio::spawn(controller.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
        task.await.unwrap().unwrap();

        let seen = reconciler.seen.lock().clone();
        assert_eq!(
            seen,
            vec![QueueLoad::new(ResourceKey::new("openebs", "vol1"), QueueOperation::Add)]
        );
        assert_eq!(recorder.events().len(), 1);
        assert_eq!(recorder.events()[0].object, "vol1");
        assert_eq!(recorder.events()[0].reason, EventReason::SuccessSynced);
    }

    #[tokio::test]
    async fn test_enqueue_records_event_before_returning() {
        let recorder = Arc::new(MemoryEventRecorder::new());
        let queue = RateLimitingQueue::new();
        let handler = QueueingHandler {
            reconciler: scripted(0, false),
            queue: queue.clone(),
            recorder: recorder.clone(),
        };

        handler.on_add(&owned("vol1", "aaaa")).await;
        handler.on_add(&owned("vol2", "bbbb")).await;

        assert_eq!(queue.len(), 1);
        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].object, "vol1");
    }
}
