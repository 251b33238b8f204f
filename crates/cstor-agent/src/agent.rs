//! Startup sequencing of the four controllers

use crate::api_client::{ApiClient, ResourceApi};
use crate::config::AgentConfig;
use crate::controller::{Controller, Reconciler};
use crate::controllers::{BackupReconciler, PoolReconciler, ReplicaReconciler, RestoreReconciler};
use crate::error::{AgentError, Result};
use crate::events::EventRecorder;
use crate::gates;
use crate::informer::Informer;
use crate::sync::PoolCoordination;
use cstor_core::labels;
use cstor_core::{
    Backup, BlockDevice, BlockDeviceClaim, CompletedBackup, PoolInstance, Resource, Restore,
    VolumeReplica,
};
use cstor_zfs::CommandRunner;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// One API handle per resource kind the agent reads or writes
#[derive(Clone)]
pub struct ResourceApis {
    pub pools: Arc<dyn ResourceApi<PoolInstance>>,
    pub devices: Arc<dyn ResourceApi<BlockDevice>>,
    pub claims: Arc<dyn ResourceApi<BlockDeviceClaim>>,
    pub replicas: Arc<dyn ResourceApi<VolumeReplica>>,
    pub backups: Arc<dyn ResourceApi<Backup>>,
    pub completed: Arc<dyn ResourceApi<CompletedBackup>>,
    pub restores: Arc<dyn ResourceApi<Restore>>,
}

impl ResourceApis {
    pub fn from_client(client: Arc<ApiClient>) -> Self {
        Self {
            pools: client.clone(),
            devices: client.clone(),
            claims: client.clone(),
            replicas: client.clone(),
            backups: client.clone(),
            completed: client.clone(),
            restores: client,
        }
    }
}

/// The pool management agent
///
/// Startup order:
/// 1. wait until zrepl answers `zpool status`
/// 2. start the pool controller, which imports or creates the pool
/// 3. wait until the pool is present
/// 4. settle backups and restores left unfinished by a previous run
/// 5. start the replica, backup and restore controllers
pub struct Agent {
    config: Arc<AgentConfig>,
    apis: ResourceApis,
    recorder: Arc<dyn EventRecorder>,
    runner: Arc<dyn CommandRunner>,
    coordination: Arc<PoolCoordination>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        apis: ResourceApis,
        recorder: Arc<dyn EventRecorder>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            apis,
            recorder,
            runner,
            coordination: Arc::new(PoolCoordination::new()),
        }
    }

    fn informer<K: Resource>(&self, api: Arc<dyn ResourceApi<K>>, owned: bool) -> Informer<K> {
        let informer = Informer::new(api, self.config.resync_interval);
        if owned {
            informer.with_label_selector(labels::ownership_selector(&self.config.pool_uid))
        } else {
            informer
        }
    }

    fn spawn<R: Reconciler>(
        &self,
        reconciler: R,
        informer: Informer<R::Object>,
        token: &CancellationToken,
    ) -> JoinHandle<Result<()>> {
        let controller = Controller::new(Arc::new(reconciler), informer, self.recorder.clone());
        tokio::spawn(controller.run(token.clone()))
    }

    /// Run until `token` is cancelled
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let pool_name = labels::pool_name(&self.config.pool_uid);
        info!(pool = %pool_name, "Starting cStor pool agent");

        if !gates::wait_for_zrepl(
            self.runner.as_ref(),
            self.config.zrepl_check_interval,
            &token,
        )
        .await
        {
            return Ok(());
        }

        let pool_reconciler = PoolReconciler::new(
            self.apis.pools.clone(),
            self.apis.devices.clone(),
            self.apis.claims.clone(),
            self.runner.clone(),
            self.coordination.clone(),
            self.recorder.clone(),
            self.config.clone(),
        );
        let pool_informer = self
            .informer(self.apis.pools.clone(), false)
            .with_namespace(&self.config.namespace);
        let mut handles = vec![self.spawn(pool_reconciler, pool_informer, &token)];

        if gates::wait_for_pool_presence(
            self.runner.as_ref(),
            &pool_name,
            self.config.pool_wait_interval,
            &token,
        )
        .await
        {
            let backups = BackupReconciler::new(
                self.apis.backups.clone(),
                self.apis.completed.clone(),
                self.runner.clone(),
                self.recorder.clone(),
                self.config.clone(),
            );
            let restores = RestoreReconciler::new(
                self.apis.restores.clone(),
                self.runner.clone(),
                self.recorder.clone(),
                self.config.clone(),
            );
            if let Err(e) = backups.cleanup_stale().await {
                warn!("Backup cleanup failed: {}", e);
            }
            if let Err(e) = restores.cleanup_stale().await {
                warn!("Restore cleanup failed: {}", e);
            }

            let replicas = ReplicaReconciler::new(
                self.apis.replicas.clone(),
                self.runner.clone(),
                self.coordination.clone(),
                self.recorder.clone(),
                self.config.clone(),
            );
            let replica_informer = self.informer(self.apis.replicas.clone(), true);
            handles.push(self.spawn(replicas, replica_informer, &token));
            let backup_informer = self.informer(self.apis.backups.clone(), true);
            handles.push(self.spawn(backups, backup_informer, &token));
            let restore_informer = self.informer(self.apis.restores.clone(), true);
            handles.push(self.spawn(restores, restore_informer, &token));
            info!("All controllers started");
        }

        let mut first_error = None;
        for result in futures_util::future::join_all(handles).await {
            let outcome = result.map_err(|e| {
                AgentError::fatal(
                    format!("Controller task panicked: {}", e),
                    "Check the log above for the panic message",
                )
            });
            if let Err(e) = outcome.and_then(|r| r) {
                error!("Controller failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::MockApi;
    use crate::events::MemoryEventRecorder;
    use cstor_core::labels::POOL_UID_LABEL;
    use cstor_core::{BackupSpec, ResourceKey, RestoreSpec, TaskStatus};
    use cstor_zfs::MockRunner;
    use std::time::Duration;

    struct Harness {
        backups: Arc<MockApi<Backup>>,
        restores: Arc<MockApi<Restore>>,
        pools: Arc<MockApi<PoolInstance>>,
        runner: MockRunner,
        agent: Agent,
    }

    fn harness() -> Harness {
        let pools = MockApi::<PoolInstance>::new();
        let backups = MockApi::<Backup>::new();
        let restores = MockApi::<Restore>::new();
        let runner = MockRunner::new();
        let apis = ResourceApis {
            pools: pools.clone(),
            devices: MockApi::<BlockDevice>::new(),
            claims: MockApi::<BlockDeviceClaim>::new(),
            replicas: MockApi::<VolumeReplica>::new(),
            backups: backups.clone(),
            completed: MockApi::<CompletedBackup>::new(),
            restores: restores.clone(),
        };
        let agent = Agent::new(
            AgentConfig::new("aaaa"),
            apis,
            Arc::new(MemoryEventRecorder::new()),
            Arc::new(runner.clone()),
        );
        Harness {
            backups,
            restores,
            pools,
            runner,
            agent,
        }
    }

    fn owned<K: Resource>(mut obj: K) -> K {
        obj.metadata_mut()
            .labels
            .get_or_insert_with(Default::default)
            .insert(POOL_UID_LABEL.to_string(), "aaaa".to_string());
        obj
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_for_zrepl() {
        let h = harness();
        h.runner.fail("zpool status", "failed to connect to zrepl");
        let token = CancellationToken::new();
        let handle = tokio::spawn(h.agent.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(10)).await;
        token.cancel();

        handle.await.unwrap().unwrap();
        assert!(h.runner.calls().iter().all(|c| c.starts_with("zpool status")));
        assert_eq!(h.pools.writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_tasks_settled_once_pool_present() {
        let h = harness();
        h.runner.succeed("zpool get -Hp -o name name", "cstor-aaaa\n");
        let mut backup = owned(Backup::new(
            "b1-vol1",
            "openebs",
            BackupSpec {
                backup_name: "b1".to_string(),
                volume_name: "vol1".to_string(),
                snap_name: "s1".to_string(),
                prev_snap_name: String::new(),
                backup_dest: "10.0.0.9:9000".to_string(),
            },
        ));
        backup.status = TaskStatus::InProgress;
        h.backups.insert(backup);
        let mut restore = owned(Restore::new(
            "r1-vol1",
            "openebs",
            RestoreSpec {
                restore_name: "r1".to_string(),
                volume_name: "vol1".to_string(),
                restore_src: "10.0.0.9:9000".to_string(),
                size: String::new(),
            },
        ));
        restore.status = TaskStatus::InProgress;
        h.restores.insert(restore);

        let token = CancellationToken::new();
        let handle = tokio::spawn(h.agent.run(token.clone()));

        let backup_key = ResourceKey::new("openebs", "b1-vol1");
        let restore_key = ResourceKey::new("openebs", "r1-vol1");
        for _ in 0..50 {
            let backup = h.backups.object(&backup_key).unwrap();
            let restore = h.restores.object(&restore_key).unwrap();
            if backup.status == TaskStatus::Failed && restore.status == TaskStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        token.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(
            h.backups.object(&backup_key).unwrap().status,
            TaskStatus::Failed
        );
        assert_eq!(
            h.restores.object(&restore_key).unwrap().status,
            TaskStatus::Failed
        );
    }
}
