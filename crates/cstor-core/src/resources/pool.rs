use super::{empty_as_none, object_meta, Resource};
use crate::error::CstorError;
use crate::labels::{self, IMPORT_HINT_ANNOTATION, RECONCILE_DISABLE_ANNOTATION};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Vdev layout of a raid group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaidType {
    #[default]
    Stripe,
    Mirror,
    Raidz,
    Raidz2,
}

impl RaidType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaidType::Stripe => "stripe",
            RaidType::Mirror => "mirror",
            RaidType::Raidz => "raidz",
            RaidType::Raidz2 => "raidz2",
        }
    }

    /// Keyword placed before the devices in a vdev spec; stripe has none
    pub fn vdev_keyword(&self) -> Option<&'static str> {
        match self {
            RaidType::Stripe => None,
            other => Some(other.as_str()),
        }
    }
}

impl fmt::Display for RaidType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RaidType {
    type Err = CstorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(RaidType::Stripe),
            "mirror" => Ok(RaidType::Mirror),
            "raidz" => Ok(RaidType::Raidz),
            "raidz2" => Ok(RaidType::Raidz2),
            other => Err(CstorError::validation_failed(
                "RaidGroup",
                format!("unknown raid group type '{}'", other),
                "Use one of stripe, mirror, raidz or raidz2",
            )),
        }
    }
}

/// Pool phase as written to `status.phase`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PoolPhase {
    #[default]
    #[serde(rename = "")]
    Empty,
    Pending,
    #[serde(rename = "Healthy")]
    Online,
    Offline,
    Degraded,
    Faulted,
    Removed,
    #[serde(rename = "Unavail")]
    Unavailable,
    Error,
    DeletionFailed,
    Invalid,
    ErrorDuplicate,
}

impl PoolPhase {
    /// Map the ZFS `health` property (or `zpool status` state) to a phase
    pub fn from_health(health: &str) -> Self {
        match health.trim() {
            "ONLINE" => PoolPhase::Online,
            "DEGRADED" => PoolPhase::Degraded,
            "FAULTED" => PoolPhase::Faulted,
            "OFFLINE" => PoolPhase::Offline,
            "REMOVED" => PoolPhase::Removed,
            "UNAVAIL" => PoolPhase::Unavailable,
            _ => PoolPhase::Error,
        }
    }

    /// Phases from which the create path may run
    pub fn is_creatable(&self) -> bool {
        matches!(self, PoolPhase::Empty | PoolPhase::Pending)
    }

    /// Phases the agent no longer reconciles on its own
    pub fn is_terminal(&self) -> bool {
        matches!(self, PoolPhase::DeletionFailed | PoolPhase::ErrorDuplicate)
    }
}

/// Role of a raid group inside the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaidGroupRole {
    Data,
    WriteCache,
    ReadCache,
    Spare,
}

/// Reference from a raid group to a block device resource
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockDeviceRef {
    #[serde(rename = "blockDeviceName", default)]
    pub bd_name: String,
    /// Device path the pool last used for this block device
    #[serde(rename = "devLink", default, skip_serializing_if = "String::is_empty")]
    pub current_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u64>,
}

impl BlockDeviceRef {
    pub fn new(bd_name: impl Into<String>) -> Self {
        Self {
            bd_name: bd_name.into(),
            ..Default::default()
        }
    }

    /// An empty name marks the slot for removal from the pool
    pub fn is_removal(&self) -> bool {
        self.bd_name.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaidGroup {
    #[serde(
        rename = "type",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub group_type: Option<RaidType>,
    #[serde(default)]
    pub is_write_cache: bool,
    #[serde(default)]
    pub is_spare: bool,
    #[serde(default)]
    pub is_read_cache: bool,
    #[serde(default)]
    pub block_devices: Vec<BlockDeviceRef>,
}

impl RaidGroup {
    pub fn new(group_type: Option<RaidType>, devices: &[&str]) -> Self {
        Self {
            group_type,
            block_devices: devices.iter().map(|d| BlockDeviceRef::new(*d)).collect(),
            ..Default::default()
        }
    }

    pub fn role(&self) -> RaidGroupRole {
        if self.is_write_cache {
            RaidGroupRole::WriteCache
        } else if self.is_read_cache {
            RaidGroupRole::ReadCache
        } else if self.is_spare {
            RaidGroupRole::Spare
        } else {
            RaidGroupRole::Data
        }
    }

    /// Group type, falling back to the pool default
    pub fn effective_type(&self, config: &PoolConfig) -> RaidType {
        self.group_type.unwrap_or(config.default_type())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_file: Option<String>,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_raid_group_type: Option<RaidType>,
    #[serde(default)]
    pub over_provisioning: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

impl PoolConfig {
    pub fn default_type(&self) -> RaidType {
        self.default_raid_group_type.unwrap_or_default()
    }

    pub fn cache_file(&self) -> Option<&str> {
        self.cache_file.as_deref().filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInstanceSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_name: String,
    #[serde(default)]
    pub pool_config: PoolConfig,
    #[serde(default)]
    pub raid_groups: Vec<RaidGroup>,
}

/// Capacity strings as reported by `zfs get -Hp`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolCapacity {
    #[serde(default)]
    pub total: String,
    #[serde(default)]
    pub free: String,
    #[serde(default)]
    pub used: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolInstanceStatus {
    #[serde(default)]
    pub phase: PoolPhase,
    #[serde(default)]
    pub capacity: PoolCapacity,
}

/// Declared intent for one ZFS pool on this node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInstance {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PoolInstanceSpec,
    #[serde(default)]
    pub status: PoolInstanceStatus,
}

impl_resource!(
    PoolInstance,
    PoolInstanceStatus,
    status,
    "cstor.openebs.io",
    "v1",
    "CStorPoolInstance",
    "cstorpoolinstances"
);

impl PoolInstance {
    pub fn new(name: &str, namespace: &str, uid: &str) -> Self {
        let gvk = Self::gvk();
        let mut metadata = object_meta(name, namespace);
        metadata.uid = Some(uid.to_string());
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind,
            metadata,
            ..Default::default()
        }
    }

    /// `cstor-<uid>`
    pub fn pool_name(&self) -> String {
        labels::pool_name(self.uid())
    }

    pub fn reconcile_disabled(&self) -> bool {
        self.annotation(RECONCILE_DISABLE_ANNOTATION)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// UID of a pre-existing pool to import under its old name
    pub fn import_hint(&self) -> Option<&str> {
        self.annotation(IMPORT_HINT_ANNOTATION)
            .filter(|h| !h.is_empty())
    }

    /// Every block device reference across all raid groups
    pub fn block_device_refs(&self) -> impl Iterator<Item = &BlockDeviceRef> {
        self.spec
            .raid_groups
            .iter()
            .flat_map(|g| g.block_devices.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::from_json;

    #[test]
    fn test_phase_wire_names() {
        assert_eq!(serde_json::to_string(&PoolPhase::Online).unwrap(), "\"Healthy\"");
        assert_eq!(serde_json::to_string(&PoolPhase::Empty).unwrap(), "\"\"");
        assert_eq!(serde_json::to_string(&PoolPhase::Unavailable).unwrap(), "\"Unavail\"");
        let phase: PoolPhase = serde_json::from_str("\"DeletionFailed\"").unwrap();
        assert_eq!(phase, PoolPhase::DeletionFailed);
    }

    #[test]
    fn test_from_health() {
        assert_eq!(PoolPhase::from_health("ONLINE\n"), PoolPhase::Online);
        assert_eq!(PoolPhase::from_health("DEGRADED"), PoolPhase::Degraded);
        assert_eq!(PoolPhase::from_health("UNAVAIL"), PoolPhase::Unavailable);
        assert_eq!(PoolPhase::from_health("SUSPENDED"), PoolPhase::Error);
    }

    #[test]
    fn test_raid_group_roles() {
        let mut group = RaidGroup::new(None, &["bd-1"]);
        assert_eq!(group.role(), RaidGroupRole::Data);
        group.is_read_cache = true;
        assert_eq!(group.role(), RaidGroupRole::ReadCache);
        group.is_read_cache = false;
        group.is_spare = true;
        assert_eq!(group.role(), RaidGroupRole::Spare);
        group.is_write_cache = true;
        assert_eq!(group.role(), RaidGroupRole::WriteCache);
    }

    #[test]
    fn test_raid_type_keyword() {
        assert_eq!(RaidType::Stripe.vdev_keyword(), None);
        assert_eq!(RaidType::Raidz2.vdev_keyword(), Some("raidz2"));
        assert!("raidz3".parse::<RaidType>().is_err());
    }

    #[test]
    fn test_annotations() {
        let json = r#"{
            "metadata": {
                "name": "p", "uid": "aaaa",
                "annotations": {"reconcile.openebs.io/disable": "true", "cspuid": "old-1"}
            },
            "spec": {"raidGroups": [{"type": "raidz", "blockDevices": [{"blockDeviceName": "bd-1", "devLink": "/dev/sdb"}]}]}
        }"#;
        let pool: PoolInstance = from_json(json).unwrap();
        assert!(pool.reconcile_disabled());
        assert_eq!(pool.import_hint(), Some("old-1"));
        assert_eq!(pool.spec.raid_groups[0].group_type, Some(RaidType::Raidz));
        assert_eq!(pool.block_device_refs().next().unwrap().current_path, "/dev/sdb");
        assert_eq!(pool.status.phase, PoolPhase::Empty);
    }
}
