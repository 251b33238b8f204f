use super::{object_meta, Resource};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Status of a backup or restore task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    #[serde(rename = "")]
    Empty,
    Pending,
    Init,
    InProgress,
    Done,
    Failed,
    Invalid,
}

impl TaskStatus {
    /// The task is not yet accepted by the agent
    pub fn is_pending(&self) -> bool {
        matches!(self, TaskStatus::Empty | TaskStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    #[serde(default)]
    pub backup_name: String,
    #[serde(default)]
    pub volume_name: String,
    #[serde(default)]
    pub snap_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prev_snap_name: String,
    /// `host:port` of the receiving end of the stream
    #[serde(default)]
    pub backup_dest: String,
}

/// A snapshot-send task
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: BackupSpec,
    #[serde(default)]
    pub status: TaskStatus,
}

impl_resource!(
    Backup,
    TaskStatus,
    status,
    "openebs.io",
    "v1alpha1",
    "CStorBackup",
    "cstorbackups"
);

impl Backup {
    pub fn new(name: &str, namespace: &str, spec: BackupSpec) -> Self {
        let gvk = Self::gvk();
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind,
            metadata: object_meta(name, namespace),
            spec,
            status: TaskStatus::default(),
        }
    }

    /// Name of the CompletedBackup record tracking this backup's volume
    pub fn completed_backup_name(&self) -> String {
        format!("{}-{}", self.spec.backup_name, self.spec.volume_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedBackupSpec {
    #[serde(default)]
    pub backup_name: String,
    #[serde(default)]
    pub volume_name: String,
    /// Snapshot of the backup before the last one
    #[serde(default)]
    pub snap_name: String,
    /// Snapshot of the last successful backup
    #[serde(default)]
    pub prev_snap_name: String,
}

/// Last successful snapshot per (backupName, volumeName)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedBackup {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: CompletedBackupSpec,
    #[serde(skip)]
    status: (),
}

impl_resource!(
    CompletedBackup,
    (),
    status,
    "openebs.io",
    "v1alpha1",
    "CStorCompletedBackup",
    "cstorcompletedbackups"
);

impl CompletedBackup {
    pub fn new(name: &str, namespace: &str, spec: CompletedBackupSpec) -> Self {
        let gvk = Self::gvk();
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind,
            metadata: object_meta(name, namespace),
            spec,
            status: (),
        }
    }

    /// Whether `snap` is one of the two snapshots this record remembers
    pub fn records_snapshot(&self, snap: &str) -> bool {
        !snap.is_empty() && (self.spec.snap_name == snap || self.spec.prev_snap_name == snap)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    #[serde(default)]
    pub restore_name: String,
    #[serde(default)]
    pub volume_name: String,
    /// `host:port` of the sending end of the stream
    #[serde(default)]
    pub restore_src: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,
}

/// A snapshot-receive task
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restore {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RestoreSpec,
    #[serde(default)]
    pub status: TaskStatus,
}

impl_resource!(
    Restore,
    TaskStatus,
    status,
    "openebs.io",
    "v1alpha1",
    "CStorRestore",
    "cstorrestores"
);

impl Restore {
    pub fn new(name: &str, namespace: &str, spec: RestoreSpec) -> Self {
        let gvk = Self::gvk();
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind,
            metadata: object_meta(name, namespace),
            spec,
            status: TaskStatus::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_predicates() {
        assert!(TaskStatus::Empty.is_pending());
        assert!(TaskStatus::Pending.is_pending());
        assert!(!TaskStatus::Init.is_pending());
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_completed_backup_name() {
        let backup = Backup::new(
            "b1-vol",
            "openebs",
            BackupSpec {
                backup_name: "b1".to_string(),
                volume_name: "vol".to_string(),
                snap_name: "s5".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(backup.completed_backup_name(), "b1-vol");
    }

    #[test]
    fn test_records_snapshot() {
        let record = CompletedBackup::new(
            "b1-vol",
            "openebs",
            CompletedBackupSpec {
                snap_name: "s4".to_string(),
                prev_snap_name: "s5".to_string(),
                ..Default::default()
            },
        );
        assert!(record.records_snapshot("s5"));
        assert!(record.records_snapshot("s4"));
        assert!(!record.records_snapshot("s6"));
        assert!(!record.records_snapshot(""));
    }

    #[test]
    fn test_status_is_top_level_string() {
        let json = r#"{"metadata":{"name":"r1"},"spec":{"restoreName":"r","volumeName":"v"},"status":"InProgress"}"#;
        let restore: Restore = serde_json::from_str(json).unwrap();
        assert_eq!(restore.status, TaskStatus::InProgress);
    }
}
