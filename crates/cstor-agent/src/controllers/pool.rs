//! Pool instance reconciler: import or create, topology changes, destroy, status

use crate::api_client::ResourceApi;
use crate::config::AgentConfig;
use crate::controller::{QueueLoad, QueueOperation, Reconciler};
use crate::error::{AgentError, Result};
use crate::events::{self, EventRecorder};
use crate::gates;
use crate::predicates;
use crate::sync::PoolCoordination;
use async_trait::async_trait;
use cstor_core::labels::{self, IMPORT_HINT_ANNOTATION, POOL_NAME_PROPERTY, PREDECESSOR_ANNOTATION};
use cstor_core::{
    BlockDevice, BlockDeviceClaim, BlockDeviceRef, EventReason, PoolConfig, PoolInstance,
    PoolPhase, RaidGroup, RaidGroupRole, Resource, ResourceKey,
};
use cstor_zfs::{
    CommandRunner, DeviceClass, PoolCreate, PoolDestroy, PoolDiskReplace, PoolDump,
    PoolExpansion, PoolGetProperty, PoolImport, PoolLabelClear, PoolRemove, PoolSetProperty,
    PoolStatus, Topology, VolumeGetProperty, ZfsCommand,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

enum ImportOutcome {
    /// Pool is imported; carries non-fatal diagnostics printed by the import
    Imported(Option<String>),
    Absent,
}

/// Outcome for one block device slot during a modify pass
enum Slot {
    InUse,
    Replaced,
    /// Not in the pool yet; carries the path to add it under
    New(String),
    Unresolved,
}

/// Reconciles the one pool instance this agent owns
pub struct PoolReconciler {
    pools: Arc<dyn ResourceApi<PoolInstance>>,
    devices: Arc<dyn ResourceApi<BlockDevice>>,
    claims: Arc<dyn ResourceApi<BlockDeviceClaim>>,
    runner: Arc<dyn CommandRunner>,
    coordination: Arc<PoolCoordination>,
    recorder: Arc<dyn EventRecorder>,
    config: Arc<AgentConfig>,
}

impl PoolReconciler {
    pub fn new(
        pools: Arc<dyn ResourceApi<PoolInstance>>,
        devices: Arc<dyn ResourceApi<BlockDevice>>,
        claims: Arc<dyn ResourceApi<BlockDeviceClaim>>,
        runner: Arc<dyn CommandRunner>,
        coordination: Arc<PoolCoordination>,
        recorder: Arc<dyn EventRecorder>,
        config: Arc<AgentConfig>,
    ) -> Self {
        Self {
            pools,
            devices,
            claims,
            runner,
            coordination,
            recorder,
            config,
        }
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    async fn event(&self, pool: &PoolInstance, reason: EventReason, message: &str) {
        events::emit(self.recorder.as_ref(), pool, reason, message).await;
    }

    /// Every equivalent path of a block device, links first
    async fn resolve_paths(&self, bd_name: &str) -> Result<Vec<String>> {
        let key = ResourceKey::new(&self.config.namespace, bd_name);
        let device = self
            .devices
            .get(&key)
            .await?
            .ok_or_else(|| AgentError::structural(format!("block device {} not found", key)))?;
        let paths = device.resolved_paths();
        if paths.is_empty() {
            return Err(AgentError::structural(format!(
                "block device {} has no device path",
                key
            )));
        }
        Ok(paths)
    }

    /// `(bdName, path)` for every device of a group, skipping removal slots
    async fn resolve_group(&self, group: &RaidGroup) -> Result<Vec<(String, String)>> {
        let mut resolved = Vec::with_capacity(group.block_devices.len());
        for bd in group.block_devices.iter().filter(|bd| !bd.is_removal()) {
            let mut paths = self.resolve_paths(&bd.bd_name).await?;
            resolved.push((bd.bd_name.clone(), paths.swap_remove(0)));
        }
        Ok(resolved)
    }

    async fn import(&self, pool: &PoolInstance) -> Result<ImportOutcome> {
        let name = pool.pool_name();
        let base = || {
            let import = PoolImport::new(&name);
            match pool.import_hint() {
                Some(hint) => import.with_old_name(labels::pool_name(hint)),
                None => import,
            }
        };

        let cache_file = pool.spec.pool_config.cache_file();
        let mut attempts = Vec::with_capacity(2);
        if cache_file.is_some() {
            attempts.push(base().with_cache_file(cache_file));
        }
        attempts.push(base());

        let mut last = None;
        for import in &attempts {
            match import.execute(self.runner()).await {
                Ok(output) => {
                    let output = output.trim();
                    return Ok(ImportOutcome::Imported(
                        (!output.is_empty()).then(|| output.to_string()),
                    ));
                }
                Err(e) => {
                    debug!("Import attempt for {} failed: {}", name, e);
                    last = Some(e);
                }
            }
        }
        match last {
            Some(e) if e.is_not_found() => Ok(ImportOutcome::Absent),
            Some(e) => Err(AgentError::transient(format!("import of {}", name), e)),
            None => Ok(ImportOutcome::Absent),
        }
    }

    /// Publish datasets found in `pool`, replacing any earlier list
    async fn publish_datasets(&self, pool: &str) -> Result<()> {
        let prefix = format!("{}/", pool);
        let datasets: Vec<String> = VolumeGetProperty::dataset_names()
            .lines(self.runner())
            .await
            .map_err(|e| AgentError::transient("list datasets", e))?
            .into_iter()
            .filter(|d| d.starts_with(&prefix))
            .collect();
        info!(pool = %pool, "Found {} dataset(s) on import", datasets.len());
        self.coordination.publish_datasets(datasets);
        Ok(())
    }

    async fn after_import(&self, pool: &PoolInstance) -> Result<()> {
        let name = pool.pool_name();
        if let Some(cache_file) = pool.spec.pool_config.cache_file() {
            PoolSetProperty::new(&name, "cachefile", cache_file)
                .execute(self.runner())
                .await
                .map_err(|e| AgentError::transient(format!("set cachefile on {}", name), e))?;
        }
        self.publish_datasets(&name).await?;
        self.coordination.set_imported();
        Ok(())
    }

    /// Withdraw the import signal and the datasets published with it
    fn mark_not_imported(&self, pool: &str) {
        if self.coordination.is_imported() {
            warn!("Pool {} is no longer imported", pool);
        }
        self.coordination.reset_imported();
        self.coordination.publish_datasets(Vec::new());
    }

    async fn add(&self, pool: PoolInstance) -> Result<()> {
        let key = pool.key();
        let name = pool.pool_name();
        let guard = self.coordination.lock().await;

        let outcome = if gates::pool_exists(self.runner(), &name).await? {
            debug!("Pool {} already imported", name);
            ImportOutcome::Imported(None)
        } else {
            match self.import(&pool).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.mark_not_imported(&name);
                    drop(guard);
                    self.event(&pool, EventReason::FailureImport, &e.to_string())
                        .await;
                    return Err(e);
                }
            }
        };

        if let ImportOutcome::Imported(warnings) = outcome {
            let published = self.after_import(&pool).await;
            drop(guard);
            published?;

            match warnings {
                Some(output) => {
                    warn!("Pool {} imported with warnings: {}", name, output);
                    let message = format!("Pool imported with warnings: {}", output);
                    self.event(&pool, EventReason::FailureImport, &message).await;
                }
                None => {
                    info!("Pool {} imported", name);
                    self.event(&pool, EventReason::SuccessImported, "Pool imported")
                        .await;
                }
            }
            if pool.import_hint().is_some() {
                self.pools
                    .patch(
                        &key,
                        &json!({"metadata": {"annotations": {IMPORT_HINT_ANNOTATION: null}}}),
                    )
                    .await?;
            }
            return self.refresh_status(&key).await;
        }

        if !pool.status.phase.is_creatable() {
            self.mark_not_imported(&name);
            drop(guard);
            let message = format!(
                "pool {} is not present on this node and phase is {:?}",
                name, pool.status.phase
            );
            self.event(&pool, EventReason::FailureImport, &message).await;
            return Err(AgentError::structural(message));
        }

        let created = self.create(&pool).await;
        drop(guard);
        match created {
            Ok(paths) => {
                info!("Pool {} created", name);
                self.event(&pool, EventReason::SuccessCreated, "Pool created")
                    .await;
                self.store_paths(&key, &paths).await?;
                self.refresh_status(&key).await
            }
            Err(e) => {
                let reason = if e.is_poison() {
                    EventReason::FailureValidate
                } else {
                    EventReason::FailureCreate
                };
                self.event(&pool, reason, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Create the pool from its first data group, then add the others.
    /// Returns the device path chosen for every block device.
    async fn create(&self, pool: &PoolInstance) -> Result<Vec<(String, String)>> {
        let name = pool.pool_name();
        let key = pool.key().to_string();
        let config = &pool.spec.pool_config;
        let groups = &pool.spec.raid_groups;

        if groups.is_empty() {
            return Err(AgentError::validation(key, "no raid groups configured"));
        }
        let Some(first) = groups.iter().position(|g| g.role() == RaidGroupRole::Data) else {
            return Err(AgentError::validation(key, "no data raid group configured"));
        };

        let mut paths = self.resolve_group(&groups[first]).await?;
        let mut create = PoolCreate::new(&name)
            .with_type(groups[first].effective_type(config))
            .with_vdevs(paths.iter().map(|(_, p)| p.clone()).collect());
        if let Some(cache_file) = config.cache_file() {
            create = create.with_property("cachefile", cache_file);
        }
        create = create.with_fs_property(POOL_NAME_PROPERTY, pool.name());
        if let Some(compression) = config.compression.as_deref().filter(|c| !c.is_empty()) {
            create = create.with_fs_property("compression", compression);
        }
        if let Err(e) = create.build() {
            return Err(AgentError::from_zfs(key, e));
        }

        info!("Creating pool {}", name);
        if let Err(e) = create.execute(self.runner()).await {
            if let Err(rollback) = PoolDestroy::new(&name).execute(self.runner()).await {
                debug!("Rollback destroy of {} failed: {}", name, rollback);
            }
            return Err(AgentError::transient(format!("create of {}", name), e));
        }
        self.coordination.publish_datasets(Vec::new());
        self.coordination.set_imported();

        let mut errors = Vec::new();
        for group in groups
            .iter()
            .enumerate()
            .filter_map(|(i, g)| (i != first).then_some(g))
        {
            match self.resolve_group(group).await {
                Ok(resolved) => match self.expand(&name, group, config, &resolved).await {
                    Ok(()) => paths.extend(resolved),
                    Err(e) => errors.push(e),
                },
                Err(e) => errors.push(e),
            }
        }
        match AgentError::joined(errors) {
            Some(e) => Err(e),
            None => Ok(paths),
        }
    }

    /// `zpool add` one raid group under its role's device class
    async fn expand(
        &self,
        pool: &str,
        group: &RaidGroup,
        config: &PoolConfig,
        resolved: &[(String, String)],
    ) -> Result<()> {
        let class = match group.role() {
            RaidGroupRole::Data => DeviceClass::Data,
            RaidGroupRole::WriteCache => DeviceClass::Log,
            RaidGroupRole::ReadCache => DeviceClass::Cache,
            RaidGroupRole::Spare => DeviceClass::Spare,
        };
        info!("Adding {:?} group of {} device(s) to {}", class, resolved.len(), pool);
        PoolExpansion::new(pool)
            .with_device_class(class)
            .with_type(group.effective_type(config))
            .with_vdevs(resolved.iter().map(|(_, p)| p.clone()).collect())
            .execute(self.runner())
            .await
            .map(|_| ())
            .map_err(|e| AgentError::from_zfs(format!("add to {}", pool), e))
    }

    /// Record the device path in use for each named block device
    async fn store_paths(&self, key: &ResourceKey, paths: &[(String, String)]) -> Result<()> {
        let Some(mut latest) = self.pools.get(key).await? else {
            return Ok(());
        };
        let mut changed = false;
        for bd in latest
            .spec
            .raid_groups
            .iter_mut()
            .flat_map(|g| g.block_devices.iter_mut())
        {
            if let Some((_, path)) = paths.iter().find(|(name, _)| *name == bd.bd_name) {
                if bd.current_path != *path {
                    bd.current_path = path.clone();
                    changed = true;
                }
            }
        }
        if changed {
            self.pools.update(&latest).await?;
        }
        Ok(())
    }

    async fn store_groups(&self, key: &ResourceKey, groups: Vec<RaidGroup>) -> Result<()> {
        let Some(mut latest) = self.pools.get(key).await? else {
            return Ok(());
        };
        latest.spec.raid_groups = groups;
        self.pools.update(&latest).await?;
        Ok(())
    }

    async fn remove_device(&self, pool: &str, path: &str) -> Result<()> {
        info!("Removing {} from {}", path, pool);
        PoolRemove::new(pool, path)
            .execute(self.runner())
            .await
            .map_err(|e| AgentError::from_zfs(format!("remove {} from {}", path, pool), e))?;
        if let Err(e) = PoolLabelClear::new(path)
            .with_force(true)
            .execute(self.runner())
            .await
        {
            warn!("Label clear of {} failed: {}", path, e);
        }
        Ok(())
    }

    /// Bring one ref in line with the live topology, replacing its disk if it moved
    async fn reconcile_slot(
        &self,
        pool: &str,
        topology: &Topology,
        bd: &mut BlockDeviceRef,
        paths: &[String],
    ) -> Result<Slot> {
        if let Some(used) = topology.first_used(paths) {
            if bd.current_path != *used {
                debug!("{} is in use at {}", bd.bd_name, used);
                bd.current_path = used.clone();
            }
            return Ok(Slot::InUse);
        }
        if bd.current_path.is_empty() {
            return Ok(Slot::New(paths[0].clone()));
        }
        if topology.contains_path(&bd.current_path) {
            let new_path = paths[0].clone();
            info!("Replacing {} with {} in {}", bd.current_path, new_path, pool);
            PoolDiskReplace::new(pool, &bd.current_path, &new_path)
                .execute(self.runner())
                .await
                .map_err(|e| AgentError::from_zfs(format!("replace in {}", pool), e))?;
            bd.current_path = new_path;
            return Ok(Slot::Replaced);
        }
        Err(AgentError::structural(format!(
            "{} was last seen at {}, which is not in {}, and none of {:?} are",
            bd.bd_name, bd.current_path, pool, paths
        )))
    }

    async fn modify(&self, pool: PoolInstance) -> Result<()> {
        let key = pool.key();
        let name = pool.pool_name();
        let config = pool.spec.pool_config.clone();
        let mut groups = pool.spec.raid_groups.clone();
        let mut errors = Vec::new();

        let guard = self.coordination.lock().await;
        let dump = PoolDump::new(&name).with_strip_vdev_path(true);
        let topology = match dump.topology(self.runner()).await {
            Ok(t) => t,
            Err(e) => {
                drop(guard);
                return Err(AgentError::transient(format!("dump of {}", name), e));
            }
        };

        for group in groups.iter_mut() {
            let mut kept = Vec::with_capacity(group.block_devices.len());
            for bd in group.block_devices.drain(..) {
                if !bd.is_removal() {
                    kept.push(bd);
                    continue;
                }
                if bd.current_path.is_empty() {
                    continue;
                }
                if let Err(e) = self.remove_device(&name, &bd.current_path).await {
                    errors.push(e);
                    kept.push(bd);
                }
            }
            group.block_devices = kept;
        }
        groups.retain(|g| !g.block_devices.is_empty());

        let mut slots = Vec::with_capacity(groups.len());
        for group in groups.iter_mut() {
            let mut states = Vec::with_capacity(group.block_devices.len());
            for bd in group.block_devices.iter_mut() {
                let state = match self.resolve_paths(&bd.bd_name).await {
                    Ok(paths) => self.reconcile_slot(&name, &topology, bd, &paths).await,
                    Err(e) => Err(e),
                };
                states.push(state.unwrap_or_else(|e| {
                    errors.push(e);
                    Slot::Unresolved
                }));
            }
            slots.push(states);
        }

        for (group, states) in groups.iter_mut().zip(&slots) {
            let new_paths: Vec<String> = states
                .iter()
                .filter_map(|s| match s {
                    Slot::New(path) => Some(path.clone()),
                    _ => None,
                })
                .collect();
            if new_paths.is_empty() {
                continue;
            }
            if new_paths.len() != states.len() {
                warn!(
                    "Skipping group with {} new and {} existing device(s) in {}",
                    new_paths.len(),
                    states.len() - new_paths.len(),
                    name
                );
                continue;
            }
            let resolved: Vec<(String, String)> = group
                .block_devices
                .iter()
                .map(|bd| bd.bd_name.clone())
                .zip(new_paths)
                .collect();
            match self.expand(&name, group, &config, &resolved).await {
                Ok(()) => {
                    for (bd, (_, path)) in group.block_devices.iter_mut().zip(resolved) {
                        bd.current_path = path;
                    }
                }
                Err(e) => errors.push(e),
            }
        }
        drop(guard);

        let replaced = slots.iter().flatten().any(|s| matches!(s, Slot::Replaced));
        if groups != pool.spec.raid_groups {
            self.store_groups(&key, groups).await?;
        }
        if replaced {
            self.event(&pool, EventReason::SuccessSynced, "Pool device replaced")
                .await;
        }
        if let Err(e) = self.cleanup_predecessors(&key).await {
            errors.push(e);
        }
        if let Err(e) = self.refresh_status(&key).await {
            errors.push(e);
        }
        match AgentError::joined(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Release claims of replaced devices once the new disk finished resilvering
    async fn cleanup_predecessors(&self, key: &ResourceKey) -> Result<()> {
        let Some(pool) = self.pools.get(key).await? else {
            return Ok(());
        };
        let names: HashSet<&str> = pool
            .block_device_refs()
            .filter(|bd| !bd.is_removal())
            .map(|bd| bd.bd_name.as_str())
            .collect();
        let claims = self
            .claims
            .list(Some(&self.config.namespace), None)
            .await?;
        let pending: Vec<&BlockDeviceClaim> = claims
            .iter()
            .filter(|c| names.contains(c.spec.block_device_name.as_str()))
            .filter(|c| c.annotation(PREDECESSOR_ANNOTATION).is_some_and(|p| !p.is_empty()))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let name = pool.pool_name();
        let topology = {
            let _guard = self.coordination.lock().await;
            let dump = PoolDump::new(&name).with_strip_vdev_path(true);
            match dump.topology(self.runner()).await {
                Ok(t) => t,
                Err(e) => {
                    debug!("Dump of {} failed, treating devices as resilvering: {}", name, e);
                    return Ok(());
                }
            }
        };

        for claim in pending {
            let bd_name = &claim.spec.block_device_name;
            let Some(bd) = pool.block_device_refs().find(|r| &r.bd_name == bd_name) else {
                continue;
            };
            if !topology.contains_path(&bd.current_path) || topology.is_resilvering(&bd.current_path)
            {
                debug!("{} is still resilvering", bd_name);
                continue;
            }

            let predecessor = claim.annotation(PREDECESSOR_ANNOTATION).unwrap_or_default();
            if let Some(old) = claims
                .iter()
                .find(|c| c.spec.block_device_name == predecessor)
            {
                info!("Releasing claim {} of replaced device {}", old.name(), predecessor);
                self.claims
                    .patch(&old.key(), &json!({"metadata": {"finalizers": null}}))
                    .await?;
                self.claims.delete(&old.key()).await?;
            }
            self.claims
                .patch(
                    &claim.key(),
                    &json!({"metadata": {"annotations": {PREDECESSOR_ANNOTATION: null}}}),
                )
                .await?;
        }
        Ok(())
    }

    /// Read health and capacity and write them if they changed
    async fn refresh_status(&self, key: &ResourceKey) -> Result<()> {
        let Some(mut latest) = self.pools.get(key).await? else {
            return Ok(());
        };
        let name = latest.pool_name();
        let mut status = latest.status.clone();
        let mut errors = Vec::new();

        for property in ["health", "free", "allocated", "size"] {
            let fetched = PoolGetProperty::value(&name, property)
                .fetch(self.runner())
                .await;
            let value = match fetched {
                Ok(v) => v,
                Err(e) if property == "health" => match PoolStatus::new(&name)
                    .state(self.runner())
                    .await
                {
                    Ok(state) => {
                        debug!("Pool {} health read from zpool status: {}", name, state);
                        state
                    }
                    Err(_) => {
                        errors.push(AgentError::transient(format!("get health of {}", name), e));
                        continue;
                    }
                },
                Err(e) => {
                    errors.push(AgentError::transient(format!("get {} of {}", property, name), e));
                    continue;
                }
            };
            match property {
                "health" => status.phase = PoolPhase::from_health(&value),
                "free" => status.capacity.free = value,
                "allocated" => status.capacity.used = value,
                _ => status.capacity.total = value,
            }
        }

        if status != latest.status {
            debug!("Pool {} status now {:?}", name, status);
            latest.status = status;
            latest = self.pools.update_status(&latest).await?;
        }
        match AgentError::joined(errors) {
            Some(e) => {
                self.event(&latest, EventReason::FailureStatusSync, &e.to_string())
                    .await;
                Err(e)
            }
            None => Ok(()),
        }
    }

    async fn set_phase(&self, key: &ResourceKey, phase: PoolPhase) -> Result<()> {
        let Some(mut latest) = self.pools.get(key).await? else {
            return Ok(());
        };
        if latest.status.phase != phase {
            latest.status.phase = phase;
            self.pools.update_status(&latest).await?;
        }
        Ok(())
    }

    /// Path to clear labels from: the one the pool used, else the device's first path
    async fn label_path(&self, bd: &BlockDeviceRef) -> Option<String> {
        if !bd.current_path.is_empty() {
            return Some(bd.current_path.clone());
        }
        match self.resolve_paths(&bd.bd_name).await {
            Ok(mut paths) => Some(paths.swap_remove(0)),
            Err(e) => {
                warn!("Cannot resolve {} for label clear: {}", bd.bd_name, e);
                None
            }
        }
    }

    async fn destroy(&self, pool: PoolInstance) -> Result<()> {
        let key = pool.key();
        let name = pool.pool_name();
        let guard = self.coordination.lock().await;

        let destroyed = match gates::pool_exists(self.runner(), &name).await {
            Ok(true) => {
                info!("Destroying pool {}", name);
                PoolDestroy::new(&name)
                    .execute(self.runner())
                    .await
                    .map(|_| ())
                    .map_err(|e| AgentError::destroy_failed(&name, e.to_string()))
            }
            Ok(false) => {
                info!("Pool {} is not present, skipping destroy", name);
                Ok(())
            }
            Err(e) => Err(e),
        };
        if let Err(e) = destroyed {
            drop(guard);
            self.event(&pool, EventReason::FailureDestroy, &e.to_string())
                .await;
            self.set_phase(&key, PoolPhase::DeletionFailed).await?;
            return Err(e);
        }

        for bd in pool.block_device_refs().filter(|bd| !bd.is_removal()) {
            let Some(path) = self.label_path(bd).await else {
                continue;
            };
            if let Err(e) = PoolLabelClear::new(&path)
                .with_force(true)
                .execute(self.runner())
                .await
            {
                warn!("Label clear of {} failed: {}", path, e);
            }
        }
        self.coordination.reset_imported();
        self.coordination.publish_datasets(Vec::new());
        drop(guard);

        self.pools
            .patch(&key, &json!({"metadata": {"finalizers": null}}))
            .await?;
        info!("Pool {} destroyed", name);
        Ok(())
    }

    async fn sync(&self, pool: PoolInstance) -> Result<()> {
        let key = pool.key();
        let mut errors = Vec::new();
        if let Err(e) = self.refresh_status(&key).await {
            errors.push(e);
        }
        if let Err(e) = self.cleanup_predecessors(&key).await {
            errors.push(e);
        }
        match AgentError::joined(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Reconciler for PoolReconciler {
    type Object = PoolInstance;

    fn name(&self) -> &'static str {
        "pool"
    }

    fn is_owned(&self, obj: &PoolInstance) -> bool {
        predicates::is_pool_owned(obj, &self.config.pool_uid)
    }

    fn classify_add(&self, obj: &PoolInstance) -> Option<QueueOperation> {
        Some(predicates::classify_add(obj))
    }

    fn classify_update(&self, old: &PoolInstance, new: &PoolInstance) -> Option<QueueOperation> {
        predicates::classify_update(old, new)
    }

    async fn reconcile(&self, load: &QueueLoad) -> Result<()> {
        let Some(pool) = self.pools.get(&load.key).await? else {
            debug!("Pool instance {} no longer exists", load.key);
            return Ok(());
        };

        if predicates::reconcile_disabled(&pool) {
            info!("Reconcile disabled for {}", load.key);
            self.event(&pool, EventReason::SuccessSynced, "Reconcile is disabled via annotation")
                .await;
            return Ok(());
        }
        if predicates::is_destroy(&pool) {
            return self.destroy(pool).await;
        }
        if pool.status.phase == PoolPhase::ErrorDuplicate {
            debug!("Ignoring {} in phase {:?}", load.key, pool.status.phase);
            return Ok(());
        }

        match load.operation {
            QueueOperation::Add => self.add(pool).await,
            QueueOperation::Modify | QueueOperation::Sync
                if predicates::is_empty_or_pending(&pool) || !self.coordination.is_imported() =>
            {
                self.add(pool).await
            }
            QueueOperation::Modify => self.modify(pool).await,
            QueueOperation::Sync => self.sync(pool).await,
            QueueOperation::Destroy => {
                debug!("{} is not being deleted", load.key);
                Ok(())
            }
        }
    }
}
