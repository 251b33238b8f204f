//! cStor Core - resource model for the node-local pool management agent
//!
//! This crate provides:
//! - Pool instance, volume replica, backup and restore resources
//! - Phase sum types with terminal-state predicates
//! - Ownership labels, annotations and finalizer names
//! - Event reason vocabulary
//! - Error types with miette diagnostics

pub mod capacity;
pub mod error;
pub mod events;
pub mod labels;
pub mod resources;
pub mod types;

pub use capacity::normalize_capacity;
pub use error::{CstorError, Result};
pub use events::{EventReason, EventType};
pub use resources::{
    object_meta, Backup, BackupSpec, BlockDevice, BlockDeviceClaim, BlockDeviceRef,
    CompletedBackup, CompletedBackupSpec, PoolCapacity, PoolConfig, PoolInstance,
    PoolInstanceStatus, PoolPhase, RaidGroup, RaidGroupRole, RaidType, ReplicaPhase, Resource,
    Restore, RestoreSpec, TaskStatus, VolumeReplica, VolumeReplicaStatus,
};
pub use types::{GroupVersionKind, ResourceKey};

pub use k8s_openapi;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Deserialize a resource from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data)
        .map_err(|e| CstorError::serialization_error(format!("Failed to parse JSON: {}", e)))
}

/// Deserialize a resource from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data)
        .map_err(|e| CstorError::serialization_error(format!("Failed to parse YAML: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_pool_instance() {
        let yaml = r#"
apiVersion: cstor.openebs.io/v1
kind: CStorPoolInstance
metadata:
  name: pool-abc
  namespace: openebs
  uid: aaaa
  labels:
    cstorpool.openebs.io/uid: aaaa
spec:
  poolConfig:
    defaultRaidGroupType: mirror
    cacheFile: /tmp/p.cache
  raidGroups:
    - type: ""
      blockDevices:
        - blockDeviceName: bd-1
        - blockDeviceName: bd-2
status:
  phase: Healthy
"#;
        let pool: PoolInstance = from_yaml(yaml).unwrap();
        assert_eq!(pool.pool_name(), "cstor-aaaa");
        assert_eq!(pool.status.phase, PoolPhase::Online);
        assert_eq!(pool.spec.raid_groups[0].group_type, None);
        assert_eq!(
            pool.spec.raid_groups[0].effective_type(&pool.spec.pool_config),
            RaidType::Mirror
        );
    }

    #[test]
    fn test_json_parse_error() {
        let err = from_json::<PoolInstance>("{not json").unwrap_err();
        assert!(matches!(err, CstorError::SerializationError { .. }));
    }
}
