//! Reconcilers for the resource kinds the agent manages

pub mod backup;
pub mod pool;
pub mod replica;
pub mod restore;

pub use backup::BackupReconciler;
pub use pool::PoolReconciler;
pub use replica::ReplicaReconciler;
pub use restore::RestoreReconciler;

use crate::api_client::ResourceApi;
use crate::error::Result;
use cstor_core::{Resource, ResourceKey, TaskStatus};
use tracing::debug;

/// Overwrite the status of a backup or restore on a freshly fetched copy
pub(crate) async fn set_task_status<K>(
    api: &dyn ResourceApi<K>,
    key: &ResourceKey,
    status: TaskStatus,
) -> Result<()>
where
    K: Resource<Status = TaskStatus>,
{
    let Some(mut latest) = api.get(key).await? else {
        return Ok(());
    };
    if *latest.status() != status {
        debug!("{} {} {:?} -> {:?}", K::gvk().kind, key, latest.status(), status);
        *latest.status_mut() = status;
        api.update_status(&latest).await?;
    }
    Ok(())
}
