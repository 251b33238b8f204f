use super::set_task_status;
use crate::api_client::ResourceApi;
use crate::config::AgentConfig;
use crate::controller::{QueueLoad, QueueOperation, Reconciler};
use crate::error::{AgentError, Result};
use crate::events::{self, EventRecorder};
use crate::predicates;
use crate::transfer;
use async_trait::async_trait;
use cstor_core::labels;
use cstor_core::{EventReason, Resource, Restore, TaskStatus};
use cstor_zfs::{CommandRunner, ReceivePipeline, VolumeReceive};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receives snapshot streams into volumes on this agent's pool
pub struct RestoreReconciler {
    restores: Arc<dyn ResourceApi<Restore>>,
    runner: Arc<dyn CommandRunner>,
    recorder: Arc<dyn EventRecorder>,
    config: Arc<AgentConfig>,
}

impl RestoreReconciler {
    pub fn new(
        restores: Arc<dyn ResourceApi<Restore>>,
        runner: Arc<dyn CommandRunner>,
        recorder: Arc<dyn EventRecorder>,
        config: Arc<AgentConfig>,
    ) -> Self {
        Self {
            restores,
            runner,
            recorder,
            config,
        }
    }

    /// Fail every restore a previous run of the agent left unfinished
    pub async fn cleanup_stale(&self) -> Result<()> {
        let selector = labels::ownership_selector(&self.config.pool_uid);
        let mut errors = Vec::new();
        for restore in self.restores.list(None, Some(&selector)).await? {
            if restore.status.is_terminal() {
                continue;
            }
            info!("Marking stale restore {} as failed", restore.key());
            if let Err(e) =
                set_task_status(self.restores.as_ref(), &restore.key(), TaskStatus::Failed).await
            {
                errors.push(e);
            }
        }
        match AgentError::joined(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn receive(&self, restore: Restore) -> Result<()> {
        let key = restore.key();
        if restore.spec.volume_name.trim().is_empty() || restore.spec.restore_src.trim().is_empty()
        {
            let err = AgentError::validation(
                key.to_string(),
                "volumeName and restoreSrc are required",
            );
            events::emit(
                self.recorder.as_ref(),
                &restore,
                EventReason::FailureValidate,
                &err.to_string(),
            )
            .await;
            set_task_status(self.restores.as_ref(), &key, TaskStatus::Failed).await?;
            return Err(err);
        }
        set_task_status(self.restores.as_ref(), &key, TaskStatus::InProgress).await?;

        let dataset = format!(
            "{}/{}",
            labels::pool_name(&self.config.pool_uid),
            restore.spec.volume_name
        );
        let pipeline = ReceivePipeline::new(
            VolumeReceive::new(&dataset).with_force(true),
            &restore.spec.restore_src,
        );
        info!("Receiving {} from {}", dataset, restore.spec.restore_src);

        let (status, reason, message) = match transfer::run_with_retries(
            self.runner.as_ref(),
            &pipeline,
            self.config.transfer_attempts,
            self.config.transfer_retry_interval,
        )
        .await
        {
            Ok(_) => (
                TaskStatus::Done,
                EventReason::SuccessCreated,
                "Restore completed".to_string(),
            ),
            Err(e) => {
                warn!("Restore {} failed: {}", key, e);
                (TaskStatus::Failed, EventReason::FailureCreate, e.to_string())
            }
        };
        set_task_status(self.restores.as_ref(), &key, status).await?;
        events::emit(self.recorder.as_ref(), &restore, reason, &message).await;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for RestoreReconciler {
    type Object = Restore;

    fn name(&self) -> &'static str {
        "restore"
    }

    fn is_owned(&self, obj: &Restore) -> bool {
        predicates::is_owned(obj, &self.config.pool_uid)
    }

    fn classify_add(&self, obj: &Restore) -> Option<QueueOperation> {
        Some(predicates::classify_add(obj))
    }

    fn classify_update(&self, old: &Restore, new: &Restore) -> Option<QueueOperation> {
        predicates::classify_update(old, new)
    }

    async fn reconcile(&self, load: &QueueLoad) -> Result<()> {
        let Some(restore) = self.restores.get(&load.key).await? else {
            return Ok(());
        };
        if predicates::is_destroy(&restore) || load.operation == QueueOperation::Destroy {
            debug!("Restore {} is being deleted", load.key);
            return Ok(());
        }

        match restore.status {
            status if status.is_pending() => {
                set_task_status(self.restores.as_ref(), &load.key, TaskStatus::Init).await
            }
            TaskStatus::Init => self.receive(restore).await,
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::MockApi;
    use crate::events::MemoryEventRecorder;
    use cstor_core::labels::POOL_UID_LABEL;
    use cstor_core::{ResourceKey, RestoreSpec};
    use cstor_zfs::{MockRunner, PIPELINE_HELPER};

    fn restore(name: &str, status: TaskStatus) -> Restore {
        let mut restore = Restore::new(
            name,
            "openebs",
            RestoreSpec {
                restore_name: "r1".to_string(),
                volume_name: "vol1".to_string(),
                restore_src: "10.0.0.9:9000".to_string(),
                size: "10G".to_string(),
            },
        );
        restore
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(POOL_UID_LABEL.to_string(), "aaaa".to_string());
        restore.status = status;
        restore
    }

    fn reconciler(api: &Arc<MockApi<Restore>>, runner: &MockRunner) -> RestoreReconciler {
        RestoreReconciler::new(
            api.clone(),
            Arc::new(runner.clone()),
            Arc::new(MemoryEventRecorder::new()),
            Arc::new(AgentConfig::new("aaaa")),
        )
    }

    fn status(api: &MockApi<Restore>, name: &str) -> TaskStatus {
        api.object(&ResourceKey::new("openebs", name)).unwrap().status
    }

    #[tokio::test]
    async fn test_restore_lifecycle() {
        let api = MockApi::<Restore>::new();
        let runner = MockRunner::new();
        let reconciler = reconciler(&api, &runner);
        let key = api.insert(restore("r1-vol1", TaskStatus::Pending)).key();

        reconciler
            .reconcile(&QueueLoad::new(key.clone(), QueueOperation::Add))
            .await
            .unwrap();
        assert_eq!(status(&api, "r1-vol1"), TaskStatus::Init);
        assert!(runner.calls().is_empty());

        reconciler
            .reconcile(&QueueLoad::new(key, QueueOperation::Sync))
            .await
            .unwrap();
        assert_eq!(
            runner.calls(),
            vec![format!(
                "{} nc -w 3 10.0.0.9 9000 | zfs recv -F cstor-aaaa/vol1",
                PIPELINE_HELPER
            )]
        );
        assert_eq!(status(&api, "r1-vol1"), TaskStatus::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_receive() {
        let api = MockApi::<Restore>::new();
        let runner = MockRunner::new();
        runner.fail(PIPELINE_HELPER, "connection refused");
        let reconciler = reconciler(&api, &runner);
        let key = api.insert(restore("r1-vol1", TaskStatus::Init)).key();

        reconciler
            .reconcile(&QueueLoad::new(key, QueueOperation::Sync))
            .await
            .unwrap();

        assert_eq!(runner.calls().len(), 10);
        assert_eq!(status(&api, "r1-vol1"), TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_cleanup_fails_unfinished() {
        let api = MockApi::<Restore>::new();
        let runner = MockRunner::new();
        let reconciler = reconciler(&api, &runner);
        api.insert(restore("a", TaskStatus::InProgress));
        api.insert(restore("b", TaskStatus::Init));
        api.insert(restore("c", TaskStatus::Done));

        reconciler.cleanup_stale().await.unwrap();

        assert_eq!(status(&api, "a"), TaskStatus::Failed);
        assert_eq!(status(&api, "b"), TaskStatus::Failed);
        assert_eq!(status(&api, "c"), TaskStatus::Done);
    }
}
