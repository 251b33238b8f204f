use crate::error::{Result, ZfsError};
use crate::runner::{mode_flags, require, CommandRunner, ZfsCommand, ZFS};

/// `zfs create [-b size] [-s] [-o k=v].. -V <size> [-o user:prop=v].. <dataset>`
///
/// Native properties are rendered before the size, user properties (keys
/// containing ':') after it.
#[derive(Debug, Clone, Default)]
pub struct VolumeCreate {
    pub dataset: String,
    pub volume_size: String,
    pub block_size: Option<String>,
    pub sparse: bool,
    pub properties: Vec<(String, String)>,
}

impl VolumeCreate {
    pub fn new(dataset: impl Into<String>, volume_size: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            volume_size: volume_size.into(),
            ..Default::default()
        }
    }

    pub fn with_block_size(mut self, size: impl Into<String>) -> Self {
        self.block_size = Some(size.into());
        self
    }

    pub fn with_sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }
}

impl ZfsCommand for VolumeCreate {
    fn program(&self) -> &'static str {
        ZFS
    }

    fn build(&self) -> Result<Vec<String>> {
        require("VolumeCreate", "dataset", &self.dataset)?;
        require("VolumeCreate", "volume_size", &self.volume_size)?;
        let mut args = vec!["create".to_string()];
        if let Some(bs) = &self.block_size {
            args.push("-b".to_string());
            args.push(bs.clone());
        }
        if self.sparse {
            args.push("-s".to_string());
        }
        let (user, native): (Vec<_>, Vec<_>) =
            self.properties.iter().partition(|(k, _)| k.contains(':'));
        for (k, v) in native {
            args.push("-o".to_string());
            args.push(format!("{}={}", k, v));
        }
        args.push("-V".to_string());
        args.push(self.volume_size.clone());
        for (k, v) in user {
            args.push("-o".to_string());
            args.push(format!("{}={}", k, v));
        }
        args.push(self.dataset.clone());
        Ok(args)
    }
}

/// `zfs destroy [-r] [-R] [-f] <dataset>`
#[derive(Debug, Clone, Default)]
pub struct VolumeDestroy {
    pub dataset: String,
    pub recursive: bool,
    pub dependents: bool,
    pub force: bool,
}

impl VolumeDestroy {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            ..Default::default()
        }
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_dependents(mut self, dependents: bool) -> Self {
        self.dependents = dependents;
        self
    }

    /// Destroy, treating an already-absent dataset as success
    pub async fn execute_idempotent(&self, runner: &dyn CommandRunner) -> Result<()> {
        match self.execute(runner).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl ZfsCommand for VolumeDestroy {
    fn program(&self) -> &'static str {
        ZFS
    }

    fn build(&self) -> Result<Vec<String>> {
        require("VolumeDestroy", "dataset", &self.dataset)?;
        let mut args = vec!["destroy".to_string()];
        if self.recursive {
            args.push("-r".to_string());
        }
        if self.dependents {
            args.push("-R".to_string());
        }
        if self.force {
            args.push("-f".to_string());
        }
        args.push(self.dataset.clone());
        Ok(args)
    }
}

/// `zfs clone [-o k=v].. <snapshot> <target>`
#[derive(Debug, Clone, Default)]
pub struct VolumeClone {
    pub snapshot: String,
    pub target: String,
    pub properties: Vec<(String, String)>,
}

impl VolumeClone {
    pub fn new(snapshot: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            snapshot: snapshot.into(),
            target: target.into(),
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }
}

impl ZfsCommand for VolumeClone {
    fn program(&self) -> &'static str {
        ZFS
    }

    fn build(&self) -> Result<Vec<String>> {
        require("VolumeClone", "snapshot", &self.snapshot)?;
        require("VolumeClone", "target", &self.target)?;
        if !self.snapshot.contains('@') {
            return Err(ZfsError::missing_field("VolumeClone", "snapshot name after '@'"));
        }
        let mut args = vec!["clone".to_string()];
        for (k, v) in &self.properties {
            args.push("-o".to_string());
            args.push(format!("{}={}", k, v));
        }
        args.push(self.snapshot.clone());
        args.push(self.target.clone());
        Ok(args)
    }
}

/// `zfs snapshot [-r] <dataset>@<snapshot>`
#[derive(Debug, Clone, Default)]
pub struct VolumeSnapshot {
    pub dataset: String,
    pub snapshot: String,
    pub recursive: bool,
}

impl VolumeSnapshot {
    pub fn new(dataset: impl Into<String>, snapshot: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            snapshot: snapshot.into(),
            recursive: false,
        }
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

impl ZfsCommand for VolumeSnapshot {
    fn program(&self) -> &'static str {
        ZFS
    }

    fn build(&self) -> Result<Vec<String>> {
        require("VolumeSnapshot", "dataset", &self.dataset)?;
        require("VolumeSnapshot", "snapshot", &self.snapshot)?;
        let mut args = vec!["snapshot".to_string()];
        if self.recursive {
            args.push("-r".to_string());
        }
        args.push(format!("{}@{}", self.dataset, self.snapshot));
        Ok(args)
    }
}

/// `zfs rollback [-r] [-R] [-f] <dataset>@<snapshot>`
#[derive(Debug, Clone, Default)]
pub struct VolumeRollback {
    pub dataset: String,
    pub snapshot: String,
    /// Destroy later snapshots (-r)
    pub destroy: bool,
    /// Destroy later snapshots and their clones (-R)
    pub destroy_snap: bool,
    pub force_unmount: bool,
}

impl VolumeRollback {
    pub fn new(dataset: impl Into<String>, snapshot: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            snapshot: snapshot.into(),
            ..Default::default()
        }
    }

    pub fn with_destroy(mut self, destroy: bool) -> Self {
        self.destroy = destroy;
        self
    }

    pub fn with_destroy_snap(mut self, destroy_snap: bool) -> Self {
        self.destroy_snap = destroy_snap;
        self
    }

    pub fn with_force_unmount(mut self, force: bool) -> Self {
        self.force_unmount = force;
        self
    }
}

impl ZfsCommand for VolumeRollback {
    fn program(&self) -> &'static str {
        ZFS
    }

    fn build(&self) -> Result<Vec<String>> {
        require("VolumeRollback", "dataset", &self.dataset)?;
        require("VolumeRollback", "snapshot", &self.snapshot)?;
        let mut args = vec!["rollback".to_string()];
        if self.destroy {
            args.push("-r".to_string());
        }
        if self.destroy_snap {
            args.push("-R".to_string());
        }
        if self.force_unmount {
            args.push("-f".to_string());
        }
        args.push(format!("{}@{}", self.dataset, self.snapshot));
        Ok(args)
    }
}

/// `zfs rename [-p] [-f] <old> <new>`
#[derive(Debug, Clone, Default)]
pub struct VolumeRename {
    pub old_name: String,
    pub new_name: String,
    pub create_parent: bool,
    pub force_unmount: bool,
}

impl VolumeRename {
    pub fn new(old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self {
            old_name: old_name.into(),
            new_name: new_name.into(),
            ..Default::default()
        }
    }

    pub fn with_create_parent(mut self, create_parent: bool) -> Self {
        self.create_parent = create_parent;
        self
    }

    pub fn with_force_unmount(mut self, force: bool) -> Self {
        self.force_unmount = force;
        self
    }
}

impl ZfsCommand for VolumeRename {
    fn program(&self) -> &'static str {
        ZFS
    }

    fn build(&self) -> Result<Vec<String>> {
        require("VolumeRename", "old_name", &self.old_name)?;
        require("VolumeRename", "new_name", &self.new_name)?;
        let mut args = vec!["rename".to_string()];
        if self.create_parent {
            args.push("-p".to_string());
        }
        if self.force_unmount {
            args.push("-f".to_string());
        }
        args.push(self.old_name.clone());
        args.push(self.new_name.clone());
        Ok(args)
    }
}

/// `zfs send [-D] [-c] [-n] [-i <dataset>@<last>] <dataset>@<snapshot>`
#[derive(Debug, Clone, Default)]
pub struct VolumeSend {
    pub dataset: String,
    pub snapshot: String,
    /// Previous snapshot for an incremental stream
    pub last_snapshot: Option<String>,
    pub dedup: bool,
    pub enable_compression: bool,
    pub dry_run: bool,
}

impl VolumeSend {
    pub fn new(dataset: impl Into<String>, snapshot: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            snapshot: snapshot.into(),
            ..Default::default()
        }
    }

    pub fn with_last_snapshot(mut self, last: Option<&str>) -> Self {
        self.last_snapshot = last.filter(|l| !l.is_empty()).map(String::from);
        self
    }

    pub fn with_dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.enable_compression = compression;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

impl ZfsCommand for VolumeSend {
    fn program(&self) -> &'static str {
        ZFS
    }

    fn build(&self) -> Result<Vec<String>> {
        require("VolumeSend", "dataset", &self.dataset)?;
        require("VolumeSend", "snapshot", &self.snapshot)?;
        let mut args = vec!["send".to_string()];
        if self.dedup {
            args.push("-D".to_string());
        }
        if self.enable_compression {
            args.push("-c".to_string());
        }
        if self.dry_run {
            args.push("-n".to_string());
        }
        if let Some(last) = &self.last_snapshot {
            args.push("-i".to_string());
            args.push(format!("{}@{}", self.dataset, last));
        }
        args.push(format!("{}@{}", self.dataset, self.snapshot));
        Ok(args)
    }
}

/// `zfs recv [-F] <dataset>`
#[derive(Debug, Clone, Default)]
pub struct VolumeReceive {
    pub dataset: String,
    /// Roll back to the most recent snapshot before receiving (-F)
    pub force: bool,
}

impl VolumeReceive {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            ..Default::default()
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl ZfsCommand for VolumeReceive {
    fn program(&self) -> &'static str {
        ZFS
    }

    fn build(&self) -> Result<Vec<String>> {
        require("VolumeReceive", "dataset", &self.dataset)?;
        let mut args = vec!["recv".to_string()];
        if self.force {
            args.push("-F".to_string());
        }
        args.push(self.dataset.clone());
        Ok(args)
    }
}

/// `zfs get [-Hp] [-o fields] <properties> [dataset]`
#[derive(Debug, Clone, Default)]
pub struct VolumeGetProperty {
    pub dataset: Option<String>,
    pub properties: Vec<String>,
    pub scripted: bool,
    pub parsable: bool,
    pub fields: Vec<String>,
}

impl VolumeGetProperty {
    /// Scripted, parsable fetch of one property's value
    pub fn value(dataset: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            dataset: Some(dataset.into()),
            properties: vec![property.into()],
            scripted: true,
            parsable: true,
            fields: vec!["value".to_string()],
        }
    }

    /// Names of every dataset: `zfs get -Hp -o name name`
    pub fn dataset_names() -> Self {
        Self {
            dataset: None,
            properties: vec!["name".to_string()],
            scripted: true,
            parsable: true,
            fields: vec!["name".to_string()],
        }
    }

    /// Non-empty output lines, trimmed
    pub async fn lines(&self, runner: &dyn CommandRunner) -> Result<Vec<String>> {
        let output = self.execute(runner).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

impl ZfsCommand for VolumeGetProperty {
    fn program(&self) -> &'static str {
        ZFS
    }

    fn build(&self) -> Result<Vec<String>> {
        if self.properties.is_empty() {
            return Err(ZfsError::missing_field("VolumeGetProperty", "properties"));
        }
        let mut args = vec!["get".to_string()];
        args.extend(mode_flags(self.scripted, self.parsable));
        if !self.fields.is_empty() {
            args.push("-o".to_string());
            args.push(self.fields.join(","));
        }
        args.push(self.properties.join(","));
        if let Some(ds) = self.dataset.as_ref().filter(|d| !d.is_empty()) {
            args.push(ds.clone());
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRunner;

    #[test]
    fn test_replica_create_argv() {
        let args = VolumeCreate::new("cstor-aaaa/bbbb", "10G")
            .with_block_size("4K")
            .with_sparse(true)
            .with_property("compression", "on")
            .with_property("io.openebs:targetip", "10.0.0.1")
            .with_property("io.openebs:volname", "vol1")
            .build()
            .unwrap();
        assert_eq!(
            args.join(" "),
            "create -b 4K -s -o compression=on -V 10G -o io.openebs:targetip=10.0.0.1 -o io.openebs:volname=vol1 cstor-aaaa/bbbb"
        );
    }

    #[test]
    fn test_create_requires_size() {
        let err = VolumeCreate::new("cstor-a/b", "").build().unwrap_err();
        assert!(matches!(err, ZfsError::MissingField { ref field, .. } if field == "volume_size"));
    }

    #[test]
    fn test_send_incremental() {
        let args = VolumeSend::new("cstor-a/v", "s2")
            .with_last_snapshot(Some("s1"))
            .build()
            .unwrap();
        assert_eq!(args.join(" "), "send -i cstor-a/v@s1 cstor-a/v@s2");
        let full = VolumeSend::new("cstor-a/v", "s2")
            .with_last_snapshot(Some(""))
            .build()
            .unwrap();
        assert_eq!(full.join(" "), "send cstor-a/v@s2");
        let flagged = VolumeSend::new("cstor-a/v", "s2")
            .with_dedup(true)
            .with_compression(true)
            .with_dry_run(true)
            .build()
            .unwrap();
        assert_eq!(flagged.join(" "), "send -D -c -n cstor-a/v@s2");
    }

    #[test]
    fn test_snapshot_rollback_rename_clone() {
        assert_eq!(
            VolumeSnapshot::new("p/v", "s1").with_recursive(true).build().unwrap().join(" "),
            "snapshot -r p/v@s1"
        );
        assert_eq!(
            VolumeRollback::new("p/v", "s1")
                .with_destroy(true)
                .with_force_unmount(true)
                .build()
                .unwrap()
                .join(" "),
            "rollback -r -f p/v@s1"
        );
        assert_eq!(
            VolumeRollback::new("p/v", "s1")
                .with_destroy_snap(true)
                .build()
                .unwrap()
                .join(" "),
            "rollback -R p/v@s1"
        );
        assert_eq!(
            VolumeDestroy::new("p/v").with_dependents(true).build().unwrap().join(" "),
            "destroy -R p/v"
        );
        assert_eq!(
            VolumeRename::new("p/a", "p/b").with_create_parent(true).build().unwrap().join(" "),
            "rename -p p/a p/b"
        );
        assert!(VolumeClone::new("p/v", "p/c").build().is_err());
        assert_eq!(
            VolumeClone::new("p/v@s1", "p/c").build().unwrap().join(" "),
            "clone p/v@s1 p/c"
        );
    }

    #[test]
    fn test_get_dataset_names() {
        assert_eq!(
            VolumeGetProperty::dataset_names().build().unwrap().join(" "),
            "get -Hp -o name name"
        );
        assert_eq!(
            VolumeGetProperty::value("cstor-a", "used").build().unwrap().join(" "),
            "get -Hp -o value used cstor-a"
        );
    }

    #[tokio::test]
    async fn test_lines_and_idempotent_destroy() {
        let mock = MockRunner::new();
        mock.succeed("zfs get", "cstor-a\ncstor-a/v1\n\n");
        let lines = VolumeGetProperty::dataset_names().lines(&mock).await.unwrap();
        assert_eq!(lines, vec!["cstor-a", "cstor-a/v1"]);

        mock.fail("zfs destroy", "cannot open 'cstor-a/v2': dataset does not exist");
        VolumeDestroy::new("cstor-a/v2")
            .execute_idempotent(&mock)
            .await
            .unwrap();

        mock.fail("zfs destroy", "dataset is busy");
        assert!(VolumeDestroy::new("cstor-a/v2")
            .execute_idempotent(&mock)
            .await
            .is_err());
    }
}
