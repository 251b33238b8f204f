use crate::api_client::ResourceApi;
use crate::config::AgentConfig;
use crate::controller::{QueueLoad, QueueOperation, Reconciler};
use crate::error::{AgentError, Result};
use crate::events::{self, EventRecorder};
use crate::gates;
use crate::predicates;
use crate::sync::PoolCoordination;
use async_trait::async_trait;
use cstor_core::labels::{self, REPLICA_FINALIZER};
use cstor_core::{normalize_capacity, EventReason, ReplicaPhase, Resource, ResourceKey, VolumeReplica};
use cstor_zfs::{CommandRunner, VolumeCreate, VolumeDestroy, VolumeGetProperty, ZfsCommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reconciles volume replicas hosted by this agent's pool
pub struct ReplicaReconciler {
    replicas: Arc<dyn ResourceApi<VolumeReplica>>,
    runner: Arc<dyn CommandRunner>,
    coordination: Arc<PoolCoordination>,
    recorder: Arc<dyn EventRecorder>,
    config: Arc<AgentConfig>,
}

impl ReplicaReconciler {
    pub fn new(
        replicas: Arc<dyn ResourceApi<VolumeReplica>>,
        runner: Arc<dyn CommandRunner>,
        coordination: Arc<PoolCoordination>,
        recorder: Arc<dyn EventRecorder>,
        config: Arc<AgentConfig>,
    ) -> Self {
        Self {
            replicas,
            runner,
            coordination,
            recorder,
            config,
        }
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    async fn event(&self, replica: &VolumeReplica, reason: EventReason, message: &str) {
        events::emit(self.recorder.as_ref(), replica, reason, message).await;
    }

    /// Write `phase` on a fresh copy when it differs
    async fn set_phase(&self, key: &ResourceKey, phase: ReplicaPhase) -> Result<Option<VolumeReplica>> {
        let Some(mut latest) = self.replicas.get(key).await? else {
            return Ok(None);
        };
        if latest.status.phase != phase {
            debug!("Replica {} {:?} -> {:?}", key, latest.status.phase, phase);
            latest.status.transition(phase);
            latest = self.replicas.update_status(&latest).await?;
        }
        Ok(Some(latest))
    }

    fn validate(replica: &VolumeReplica) -> Result<()> {
        let missing = [
            ("volume name label", replica.volume_uid()),
            ("targetIP", replica.spec.target_ip.as_str()),
            ("capacity", replica.spec.capacity.as_str()),
            ("pool uid label", replica.pool_uid()),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect::<Vec<_>>();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AgentError::validation(
                replica.key().to_string(),
                format!("missing {}", missing.join(", ")),
            ))
        }
    }

    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        let names = VolumeGetProperty::dataset_names()
            .lines(self.runner())
            .await
            .map_err(|e| AgentError::transient("list datasets", e))?;
        Ok(names.iter().any(|n| n == dataset))
    }

    /// First observation: Empty becomes Init, anything else is a restart and becomes Recreate
    async fn add(&self, replica: VolumeReplica) -> Result<()> {
        let seeded = match replica.status.phase {
            ReplicaPhase::Empty | ReplicaPhase::Init => ReplicaPhase::Init,
            _ => ReplicaPhase::Recreate,
        };
        match self.set_phase(&replica.key(), seeded).await? {
            Some(latest) => self.create(latest).await,
            None => Ok(()),
        }
    }

    async fn create(&self, replica: VolumeReplica) -> Result<()> {
        let key = replica.key();
        if let Err(e) = Self::validate(&replica) {
            self.event(&replica, EventReason::FailureValidate, &e.to_string())
                .await;
            self.set_phase(&key, ReplicaPhase::Offline).await?;
            return Err(e);
        }

        let pool = labels::pool_name(replica.pool_uid());
        if let Err(e) = gates::wait_for_pool(
            self.runner(),
            &pool,
            self.config.pool_wait_attempts,
            self.config.pool_wait_interval,
        )
        .await
        {
            warn!("Replica {} waiting on pool: {}", key, e);
            self.set_phase(&key, ReplicaPhase::Offline).await?;
            return Err(e);
        }

        let dataset = replica.dataset_name();
        if replica.status.phase != ReplicaPhase::Init && self.coordination.contains_dataset(&dataset)
        {
            info!("Replica {} was brought online by pool import", key);
            self.set_phase(&key, ReplicaPhase::Online).await?;
            return Ok(());
        }
        if self.dataset_exists(&dataset).await? {
            info!("Dataset {} already exists", dataset);
            self.event(&replica, EventReason::AlreadyPresent, "Volume already present")
                .await;
            self.set_phase(&key, ReplicaPhase::Online).await?;
            return Ok(());
        }

        let create = VolumeCreate::new(&dataset, normalize_capacity(&replica.spec.capacity))
            .with_block_size("4K")
            .with_sparse(true)
            .with_property("compression", "on")
            .with_property("io.openebs:targetip", &replica.spec.target_ip)
            .with_property("io.openebs:volname", replica.name());
        let created = {
            let _guard = self.coordination.lock().await;
            create.execute(self.runner()).await
        };
        match created {
            Ok(_) => {
                info!("Created dataset {}", dataset);
                self.event(&replica, EventReason::SuccessCreated, "Volume created")
                    .await;
                self.set_phase(&key, ReplicaPhase::Online).await?;
                Ok(())
            }
            Err(e) => {
                let err = AgentError::from_zfs(format!("create of {}", dataset), e);
                self.event(&replica, EventReason::FailureCreate, &err.to_string())
                    .await;
                self.set_phase(&key, ReplicaPhase::Offline).await?;
                Err(err)
            }
        }
    }

    async fn destroy(&self, replica: VolumeReplica) -> Result<()> {
        let key = replica.key();
        if replica.volume_uid().is_empty() {
            debug!("Replica {} never named a dataset", key);
        } else {
            let dataset = replica.dataset_name();
            let destroyed = {
                let _guard = self.coordination.lock().await;
                VolumeDestroy::new(&dataset)
                    .execute_idempotent(self.runner())
                    .await
            };
            if let Err(e) = destroyed {
                let err = AgentError::destroy_failed(&dataset, e.to_string());
                self.event(&replica, EventReason::FailureDestroy, &err.to_string())
                    .await;
                self.set_phase(&key, ReplicaPhase::DeletionFailed).await?;
                return Err(err);
            }
            info!("Destroyed dataset {}", dataset);
        }

        let Some(mut latest) = self.replicas.get(&key).await? else {
            return Ok(());
        };
        if latest.remove_finalizer(REPLICA_FINALIZER) {
            self.replicas.update(&latest).await?;
        }
        Ok(())
    }

    /// Periodic check that an Online or Offline replica's dataset still matches its phase
    async fn sync(&self, replica: VolumeReplica) -> Result<()> {
        let present = self.dataset_exists(&replica.dataset_name()).await?;
        let phase = if present {
            ReplicaPhase::Online
        } else {
            ReplicaPhase::Offline
        };
        self.set_phase(&replica.key(), phase).await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ReplicaReconciler {
    type Object = VolumeReplica;

    fn name(&self) -> &'static str {
        "replica"
    }

    fn is_owned(&self, obj: &VolumeReplica) -> bool {
        predicates::is_owned(obj, &self.config.pool_uid)
    }

    fn classify_add(&self, obj: &VolumeReplica) -> Option<QueueOperation> {
        Some(predicates::classify_add(obj))
    }

    fn classify_update(&self, old: &VolumeReplica, new: &VolumeReplica) -> Option<QueueOperation> {
        predicates::classify_update(old, new)
    }

    /// Replicas are only served once the pool is imported
    async fn before_start(&self, token: &CancellationToken) -> Result<()> {
        info!("Waiting for pool import before serving replicas");
        self.coordination.wait_imported(token).await;
        Ok(())
    }

    async fn reconcile(&self, load: &QueueLoad) -> Result<()> {
        let Some(replica) = self.replicas.get(&load.key).await? else {
            debug!("Replica {} no longer exists", load.key);
            return Ok(());
        };
        if predicates::is_destroy(&replica) {
            return self.destroy(replica).await;
        }
        if replica.status.phase.is_terminal() {
            debug!("Ignoring {} in phase {:?}", load.key, replica.status.phase);
            return Ok(());
        }

        let phase = replica.status.phase;
        match load.operation {
            QueueOperation::Add => self.add(replica).await,
            QueueOperation::Modify if phase == ReplicaPhase::Online => Ok(()),
            QueueOperation::Sync if matches!(phase, ReplicaPhase::Online | ReplicaPhase::Offline) => {
                self.sync(replica).await
            }
            QueueOperation::Modify | QueueOperation::Sync => self.add(replica).await,
            QueueOperation::Destroy => Ok(()),
        }
    }
}
