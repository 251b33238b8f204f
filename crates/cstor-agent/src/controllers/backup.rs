use super::set_task_status;
use crate::api_client::ResourceApi;
use crate::config::AgentConfig;
use crate::controller::{QueueLoad, QueueOperation, Reconciler};
use crate::error::{AgentError, Result};
use crate::events::{self, EventRecorder};
use crate::predicates;
use crate::transfer;
use async_trait::async_trait;
use cstor_core::labels::{self, POOL_UID_LABEL};
use cstor_core::{
    Backup, CompletedBackup, CompletedBackupSpec, EventReason, Resource, ResourceKey, TaskStatus,
};
use cstor_zfs::{CommandRunner, SendPipeline, VolumeSend};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives snapshot sends for backups of volumes on this agent's pool
pub struct BackupReconciler {
    backups: Arc<dyn ResourceApi<Backup>>,
    completed: Arc<dyn ResourceApi<CompletedBackup>>,
    runner: Arc<dyn CommandRunner>,
    recorder: Arc<dyn EventRecorder>,
    config: Arc<AgentConfig>,
}

impl BackupReconciler {
    pub fn new(
        backups: Arc<dyn ResourceApi<Backup>>,
        completed: Arc<dyn ResourceApi<CompletedBackup>>,
        runner: Arc<dyn CommandRunner>,
        recorder: Arc<dyn EventRecorder>,
        config: Arc<AgentConfig>,
    ) -> Self {
        Self {
            backups,
            completed,
            runner,
            recorder,
            config,
        }
    }

    fn completed_key(backup: &Backup) -> ResourceKey {
        ResourceKey::new(
            backup.namespace().unwrap_or_default(),
            backup.completed_backup_name(),
        )
    }

    /// Settle backups left unfinished by a previous run of the agent
    ///
    /// An in-progress backup whose snapshot is already recorded in its
    /// CompletedBackup finished before the restart and becomes Done; every
    /// other unfinished backup becomes Failed.
    pub async fn cleanup_stale(&self) -> Result<()> {
        let selector = labels::ownership_selector(&self.config.pool_uid);
        let backups = self.backups.list(None, Some(&selector)).await?;
        let mut errors = Vec::new();

        for backup in backups {
            let next = match backup.status {
                TaskStatus::Done => continue,
                TaskStatus::InProgress => {
                    if self.finished_before_restart(&backup).await {
                        TaskStatus::Done
                    } else {
                        TaskStatus::Failed
                    }
                }
                _ => TaskStatus::Failed,
            };
            if next == backup.status {
                continue;
            }
            info!("Marking stale backup {} as {:?}", backup.key(), next);
            if let Err(e) = set_task_status(self.backups.as_ref(), &backup.key(), next).await {
                errors.push(e);
            }
        }
        match AgentError::joined(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn finished_before_restart(&self, backup: &Backup) -> bool {
        match self.completed.get(&Self::completed_key(backup)).await {
            Ok(record) => record.is_some_and(|r| r.records_snapshot(&backup.spec.snap_name)),
            Err(e) => {
                warn!("Cannot read completed backup for {}: {}", backup.key(), e);
                false
            }
        }
    }

    fn validate(backup: &Backup) -> Result<()> {
        let spec = &backup.spec;
        for (field, value) in [
            ("volumeName", &spec.volume_name),
            ("snapName", &spec.snap_name),
            ("backupDest", &spec.backup_dest),
        ] {
            if value.trim().is_empty() {
                return Err(AgentError::validation(
                    backup.key().to_string(),
                    format!("{} is empty", field),
                ));
            }
        }
        Ok(())
    }

    /// Rotate the snapshot pair of the volume's CompletedBackup, creating it on first use
    async fn record_completion(&self, backup: &Backup) -> Result<()> {
        let key = Self::completed_key(backup);
        match self.completed.get(&key).await? {
            Some(mut record) => {
                record.spec.snap_name = std::mem::take(&mut record.spec.prev_snap_name);
                record.spec.prev_snap_name = backup.spec.snap_name.clone();
                self.completed.update(&record).await?;
            }
            None => {
                let mut record = CompletedBackup::new(
                    &key.name,
                    backup.namespace().unwrap_or_default(),
                    CompletedBackupSpec {
                        backup_name: backup.spec.backup_name.clone(),
                        volume_name: backup.spec.volume_name.clone(),
                        snap_name: String::new(),
                        prev_snap_name: backup.spec.snap_name.clone(),
                    },
                );
                record
                    .metadata
                    .labels
                    .get_or_insert_with(Default::default)
                    .insert(POOL_UID_LABEL.to_string(), self.config.pool_uid.clone());
                self.completed.create(&record).await?;
            }
        }
        Ok(())
    }

    async fn send(&self, backup: Backup) -> Result<()> {
        let key = backup.key();
        if let Err(e) = Self::validate(&backup) {
            events::emit(
                self.recorder.as_ref(),
                &backup,
                EventReason::FailureValidate,
                &e.to_string(),
            )
            .await;
            set_task_status(self.backups.as_ref(), &key, TaskStatus::Failed).await?;
            return Err(e);
        }
        set_task_status(self.backups.as_ref(), &key, TaskStatus::InProgress).await?;

        let dataset = format!(
            "{}/{}",
            labels::pool_name(&self.config.pool_uid),
            backup.spec.volume_name
        );
        let send = VolumeSend::new(&dataset, &backup.spec.snap_name)
            .with_last_snapshot(Some(&backup.spec.prev_snap_name));
        let pipeline = SendPipeline::new(send, &backup.spec.backup_dest);
        info!("Sending {}@{} to {}", dataset, backup.spec.snap_name, backup.spec.backup_dest);

        let sent = transfer::run_with_retries(
            self.runner.as_ref(),
            &pipeline,
            self.config.transfer_attempts,
            self.config.transfer_retry_interval,
        )
        .await;
        if let Err(e) = sent {
            warn!("Backup {} failed: {}", key, e);
            events::emit(
                self.recorder.as_ref(),
                &backup,
                EventReason::FailureCreate,
                &e.to_string(),
            )
            .await;
            return set_task_status(self.backups.as_ref(), &key, TaskStatus::Failed).await;
        }

        if let Err(e) = self.record_completion(&backup).await {
            set_task_status(self.backups.as_ref(), &key, TaskStatus::Failed).await?;
            return Err(e);
        }
        set_task_status(self.backups.as_ref(), &key, TaskStatus::Done).await?;
        events::emit(
            self.recorder.as_ref(),
            &backup,
            EventReason::SuccessCreated,
            "Backup completed",
        )
        .await;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for BackupReconciler {
    type Object = Backup;

    fn name(&self) -> &'static str {
        "backup"
    }

    fn is_owned(&self, obj: &Backup) -> bool {
        predicates::is_owned(obj, &self.config.pool_uid)
    }

    fn classify_add(&self, obj: &Backup) -> Option<QueueOperation> {
        Some(predicates::classify_add(obj))
    }

    fn classify_update(&self, old: &Backup, new: &Backup) -> Option<QueueOperation> {
        predicates::classify_update(old, new)
    }

    async fn reconcile(&self, load: &QueueLoad) -> Result<()> {
        let Some(backup) = self.backups.get(&load.key).await? else {
            return Ok(());
        };
        if predicates::is_destroy(&backup) || load.operation == QueueOperation::Destroy {
            debug!("Backup {} is being deleted", load.key);
            return Ok(());
        }

        match backup.status {
            status if status.is_pending() => {
                events::emit(
                    self.recorder.as_ref(),
                    &backup,
                    EventReason::SuccessSynced,
                    "Backup accepted",
                )
                .await;
                set_task_status(self.backups.as_ref(), &load.key, TaskStatus::Init).await
            }
            TaskStatus::Init => self.send(backup).await,
            _ => Ok(()),
        }
    }
}
