use super::{object_meta, Resource};
use crate::labels::{self, POOL_UID_LABEL, VOLUME_NAME_LABEL};
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Replica phase as written to `status.phase`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReplicaPhase {
    #[default]
    #[serde(rename = "")]
    Empty,
    Init,
    Recreate,
    Online,
    Offline,
    DeletionFailed,
    Invalid,
    ErrorDuplicate,
}

impl ReplicaPhase {
    /// Phases the agent never moves out of on its own
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplicaPhase::ErrorDuplicate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeReplicaSpec {
    #[serde(rename = "targetIP", default)]
    pub target_ip: String,
    /// Human-readable size such as "10Gi"
    #[serde(default)]
    pub capacity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zvol_workers: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeReplicaStatus {
    #[serde(default)]
    pub phase: ReplicaPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl VolumeReplicaStatus {
    /// Move to `phase`, stamping the transition time only when the phase changes
    pub fn transition(&mut self, phase: ReplicaPhase) {
        if self.phase != phase {
            self.phase = phase;
            self.last_transition_time = Some(Utc::now());
        }
    }
}

/// A ZFS volume dataset `cstor-<poolUid>/<volumeUid>` hosted by this agent's pool
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeReplica {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VolumeReplicaSpec,
    #[serde(default)]
    pub status: VolumeReplicaStatus,
}

impl_resource!(
    VolumeReplica,
    VolumeReplicaStatus,
    status,
    "cstor.openebs.io",
    "v1",
    "CStorVolumeReplica",
    "cstorvolumereplicas"
);

impl VolumeReplica {
    pub fn new(name: &str, namespace: &str) -> Self {
        let gvk = Self::gvk();
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind,
            metadata: object_meta(name, namespace),
            ..Default::default()
        }
    }

    pub fn pool_uid(&self) -> &str {
        self.label(POOL_UID_LABEL).unwrap_or_default()
    }

    pub fn volume_uid(&self) -> &str {
        self.label(VOLUME_NAME_LABEL).unwrap_or_default()
    }

    /// `cstor-<poolUid>/<volumeUid>`
    pub fn dataset_name(&self) -> String {
        format!("{}/{}", labels::pool_name(self.pool_uid()), self.volume_uid())
    }
}
