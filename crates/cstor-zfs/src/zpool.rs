use crate::error::{Result, ZfsError};
use crate::runner::{mode_flags, require, CommandRunner, ZfsCommand, ZPOOL};
use crate::topology::Topology;
use async_trait::async_trait;
use cstor_core::RaidType;

fn property_args(flag: &str, properties: &[(String, String)]) -> Vec<String> {
    properties
        .iter()
        .flat_map(|(k, v)| [flag.to_string(), format!("{}={}", k, v)])
        .collect()
}

/// Lay out devices for one raid group: stripe devices are listed bare, mirror
/// devices in consecutive pairs each under its own `mirror` keyword, raidz groups
/// under a single keyword
pub fn vdev_args(raid_type: RaidType, vdevs: &[String]) -> Result<Vec<String>> {
    if vdevs.is_empty() {
        return Err(ZfsError::invalid_vdev_layout("at least one vdev is required"));
    }
    match raid_type {
        RaidType::Stripe => Ok(vdevs.to_vec()),
        RaidType::Mirror => {
            if vdevs.len() % 2 != 0 {
                return Err(ZfsError::invalid_vdev_layout(format!(
                    "mirror needs an even number of devices, got {}",
                    vdevs.len()
                )));
            }
            Ok(vdevs
                .chunks(2)
                .flat_map(|pair| {
                    std::iter::once("mirror".to_string()).chain(pair.iter().cloned())
                })
                .collect())
        }
        RaidType::Raidz | RaidType::Raidz2 => {
            let mut args = vec![raid_type.as_str().to_string()];
            args.extend(vdevs.iter().cloned());
            Ok(args)
        }
    }
}

/// `zpool create [-f] [-o k=v].. [-O k=v].. <pool> <vdev spec>`
#[derive(Debug, Clone, Default)]
pub struct PoolCreate {
    pub pool_name: String,
    pub raid_type: RaidType,
    pub properties: Vec<(String, String)>,
    pub fs_properties: Vec<(String, String)>,
    pub vdevs: Vec<String>,
    pub force: bool,
}

impl PoolCreate {
    pub fn new(pool_name: impl Into<String>) -> Self {
        Self {
            pool_name: pool_name.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, raid_type: RaidType) -> Self {
        self.raid_type = raid_type;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    pub fn with_fs_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fs_properties.push((key.into(), value.into()));
        self
    }

    pub fn with_vdevs(mut self, vdevs: Vec<String>) -> Self {
        self.vdevs = vdevs;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl ZfsCommand for PoolCreate {
    fn program(&self) -> &'static str {
        ZPOOL
    }

    fn build(&self) -> Result<Vec<String>> {
        require("PoolCreate", "pool_name", &self.pool_name)?;
        let mut args = vec!["create".to_string()];
        if self.force {
            args.push("-f".to_string());
        }
        args.extend(property_args("-o", &self.properties));
        args.extend(property_args("-O", &self.fs_properties));
        args.push(self.pool_name.clone());
        args.extend(vdev_args(self.raid_type, &self.vdevs)?);
        Ok(args)
    }
}

/// `zpool import [-c cachefile] [-d dir].. [-o k=v].. [oldName] <name>`
#[derive(Debug, Clone, Default)]
pub struct PoolImport {
    pub cache_file: Option<String>,
    pub directories: Vec<String>,
    pub properties: Vec<(String, String)>,
    pub old_name: Option<String>,
    pub pool_name: String,
    pub force: bool,
}

impl PoolImport {
    pub fn new(pool_name: impl Into<String>) -> Self {
        Self {
            pool_name: pool_name.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_file(mut self, cache_file: Option<&str>) -> Self {
        self.cache_file = cache_file.filter(|c| !c.is_empty()).map(String::from);
        self
    }

    pub fn with_directory(mut self, dir: impl Into<String>) -> Self {
        self.directories.push(dir.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    /// Import the pool known on disk as `old_name` under the builder's pool name
    pub fn with_old_name(mut self, old_name: impl Into<String>) -> Self {
        self.old_name = Some(old_name.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl ZfsCommand for PoolImport {
    fn program(&self) -> &'static str {
        ZPOOL
    }

    fn build(&self) -> Result<Vec<String>> {
        require("PoolImport", "pool_name", &self.pool_name)?;
        let mut args = vec!["import".to_string()];
        if self.force {
            args.push("-f".to_string());
        }
        if let Some(cache_file) = &self.cache_file {
            args.push("-c".to_string());
            args.push(cache_file.clone());
        }
        for dir in &self.directories {
            args.push("-d".to_string());
            args.push(dir.clone());
        }
        args.extend(property_args("-o", &self.properties));
        if let Some(old) = self.old_name.as_ref().filter(|o| !o.is_empty()) {
            args.push(old.clone());
        }
        args.push(self.pool_name.clone());
        Ok(args)
    }
}

/// `zpool destroy [-f] <pool>`
#[derive(Debug, Clone, Default)]
pub struct PoolDestroy {
    pub pool_name: String,
    pub force: bool,
}

impl PoolDestroy {
    pub fn new(pool_name: impl Into<String>) -> Self {
        Self {
            pool_name: pool_name.into(),
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl ZfsCommand for PoolDestroy {
    fn program(&self) -> &'static str {
        ZPOOL
    }

    fn build(&self) -> Result<Vec<String>> {
        require("PoolDestroy", "pool_name", &self.pool_name)?;
        let mut args = vec!["destroy".to_string()];
        if self.force {
            args.push("-f".to_string());
        }
        args.push(self.pool_name.clone());
        Ok(args)
    }
}

/// `zpool labelclear [-f] <vdev>`
#[derive(Debug, Clone, Default)]
pub struct PoolLabelClear {
    pub vdev: String,
    pub force: bool,
}

impl PoolLabelClear {
    pub fn new(vdev: impl Into<String>) -> Self {
        Self {
            vdev: vdev.into(),
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl ZfsCommand for PoolLabelClear {
    fn program(&self) -> &'static str {
        ZPOOL
    }

    fn build(&self) -> Result<Vec<String>> {
        require("PoolLabelClear", "vdev", &self.vdev)?;
        let mut args = vec!["labelclear".to_string()];
        if self.force {
            args.push("-f".to_string());
        }
        args.push(self.vdev.clone());
        Ok(args)
    }
}

/// Class of vdev added by `zpool add`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceClass {
    #[default]
    Data,
    Cache,
    Spare,
    Log,
}

impl DeviceClass {
    fn keyword(&self) -> Option<&'static str> {
        match self {
            DeviceClass::Data => None,
            DeviceClass::Cache => Some("cache"),
            DeviceClass::Spare => Some("spare"),
            DeviceClass::Log => Some("log"),
        }
    }
}

/// `zpool add [-f] <pool> [cache|spare|log] <vdev spec>`
#[derive(Debug, Clone, Default)]
pub struct PoolExpansion {
    pub pool_name: String,
    pub device_class: DeviceClass,
    pub raid_type: RaidType,
    pub vdevs: Vec<String>,
    pub force: bool,
}

impl PoolExpansion {
    pub fn new(pool_name: impl Into<String>) -> Self {
        Self {
            pool_name: pool_name.into(),
            ..Default::default()
        }
    }

    pub fn with_device_class(mut self, class: DeviceClass) -> Self {
        self.device_class = class;
        self
    }

    pub fn with_type(mut self, raid_type: RaidType) -> Self {
        self.raid_type = raid_type;
        self
    }

    pub fn with_vdevs(mut self, vdevs: Vec<String>) -> Self {
        self.vdevs = vdevs;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl ZfsCommand for PoolExpansion {
    fn program(&self) -> &'static str {
        ZPOOL
    }

    fn build(&self) -> Result<Vec<String>> {
        require("PoolExpansion", "pool_name", &self.pool_name)?;
        let mut args = vec!["add".to_string()];
        if self.force {
            args.push("-f".to_string());
        }
        args.push(self.pool_name.clone());
        if let Some(keyword) = self.device_class.keyword() {
            args.push(keyword.to_string());
        }
        // cache and spare devices are always standalone
        let layout = match self.device_class {
            DeviceClass::Cache | DeviceClass::Spare => RaidType::Stripe,
            DeviceClass::Data | DeviceClass::Log => self.raid_type,
        };
        args.extend(vdev_args(layout, &self.vdevs)?);
        Ok(args)
    }
}

/// `zpool replace [-f] <pool> <old> <new>`
#[derive(Debug, Clone, Default)]
pub struct PoolDiskReplace {
    pub pool_name: String,
    pub old_vdev: String,
    pub new_vdev: String,
    pub force: bool,
}

impl PoolDiskReplace {
    pub fn new(
        pool_name: impl Into<String>,
        old_vdev: impl Into<String>,
        new_vdev: impl Into<String>,
    ) -> Self {
        Self {
            pool_name: pool_name.into(),
            old_vdev: old_vdev.into(),
            new_vdev: new_vdev.into(),
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl ZfsCommand for PoolDiskReplace {
    fn program(&self) -> &'static str {
        ZPOOL
    }

    fn build(&self) -> Result<Vec<String>> {
        require("PoolDiskReplace", "pool_name", &self.pool_name)?;
        require("PoolDiskReplace", "old_vdev", &self.old_vdev)?;
        require("PoolDiskReplace", "new_vdev", &self.new_vdev)?;
        let mut args = vec!["replace".to_string()];
        if self.force {
            args.push("-f".to_string());
        }
        args.extend([
            self.pool_name.clone(),
            self.old_vdev.clone(),
            self.new_vdev.clone(),
        ]);
        Ok(args)
    }
}

/// `zpool remove <pool> <vdev>..`
#[derive(Debug, Clone, Default)]
pub struct PoolRemove {
    pub pool_name: String,
    pub vdevs: Vec<String>,
}

impl PoolRemove {
    pub fn new(pool_name: impl Into<String>, vdev: impl Into<String>) -> Self {
        Self {
            pool_name: pool_name.into(),
            vdevs: vec![vdev.into()],
        }
    }
}

impl ZfsCommand for PoolRemove {
    fn program(&self) -> &'static str {
        ZPOOL
    }

    fn build(&self) -> Result<Vec<String>> {
        require("PoolRemove", "pool_name", &self.pool_name)?;
        if self.vdevs.iter().all(|v| v.trim().is_empty()) {
            return Err(ZfsError::missing_field("PoolRemove", "vdevs"));
        }
        let mut args = vec!["remove".to_string(), self.pool_name.clone()];
        args.extend(self.vdevs.iter().filter(|v| !v.is_empty()).cloned());
        Ok(args)
    }
}

/// `zpool get [-Hp] [-o field] <property> [pool]`
#[derive(Debug, Clone)]
pub struct PoolGetProperty {
    pub pool_name: Option<String>,
    pub property: String,
    pub scripted: bool,
    pub parsable: bool,
    pub field: Option<String>,
}

impl PoolGetProperty {
    /// Scripted, parsable fetch of a property's value
    pub fn value(pool_name: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            pool_name: Some(pool_name.into()),
            property: property.into(),
            scripted: true,
            parsable: true,
            field: Some("value".to_string()),
        }
    }

    /// Names of every imported pool: `zpool get -Hp -o name name`
    pub fn pool_names() -> Self {
        Self {
            pool_name: None,
            property: "name".to_string(),
            scripted: true,
            parsable: true,
            field: Some("name".to_string()),
        }
    }

    /// Fetch and trim the single value printed by the command
    pub async fn fetch(&self, runner: &dyn CommandRunner) -> Result<String> {
        Ok(self.execute(runner).await?.trim().to_string())
    }
}

impl ZfsCommand for PoolGetProperty {
    fn program(&self) -> &'static str {
        ZPOOL
    }

    fn build(&self) -> Result<Vec<String>> {
        require("PoolGetProperty", "property", &self.property)?;
        let mut args = vec!["get".to_string()];
        args.extend(mode_flags(self.scripted, self.parsable));
        if let Some(field) = &self.field {
            args.push("-o".to_string());
            args.push(field.clone());
        }
        args.push(self.property.clone());
        if let Some(pool) = self.pool_name.as_ref().filter(|p| !p.is_empty()) {
            args.push(pool.clone());
        }
        Ok(args)
    }
}

/// `zpool set <key>=<value> <pool>`
#[derive(Debug, Clone, Default)]
pub struct PoolSetProperty {
    pub pool_name: String,
    pub key: String,
    pub value: String,
}

impl PoolSetProperty {
    pub fn new(
        pool_name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            pool_name: pool_name.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

impl ZfsCommand for PoolSetProperty {
    fn program(&self) -> &'static str {
        ZPOOL
    }

    fn build(&self) -> Result<Vec<String>> {
        require("PoolSetProperty", "pool_name", &self.pool_name)?;
        require("PoolSetProperty", "key", &self.key)?;
        Ok(vec![
            "set".to_string(),
            format!("{}={}", self.key, self.value),
            self.pool_name.clone(),
        ])
    }
}

/// `zpool dump <pool>`, parsed into a [`Topology`]
#[derive(Debug, Clone, Default)]
pub struct PoolDump {
    pub pool_name: String,
    /// Strip partition suffixes from every vdev path after parsing
    pub strip_vdev_path: bool,
}

impl PoolDump {
    pub fn new(pool_name: impl Into<String>) -> Self {
        Self {
            pool_name: pool_name.into(),
            strip_vdev_path: false,
        }
    }

    pub fn with_strip_vdev_path(mut self, strip: bool) -> Self {
        self.strip_vdev_path = strip;
        self
    }

    pub async fn topology(&self, runner: &dyn CommandRunner) -> Result<Topology> {
        let raw = self.execute(runner).await?;
        let mut topology = Topology::parse(&raw)?;
        if self.strip_vdev_path {
            topology.strip_paths();
        }
        Ok(topology)
    }
}

impl ZfsCommand for PoolDump {
    fn program(&self) -> &'static str {
        ZPOOL
    }

    fn build(&self) -> Result<Vec<String>> {
        require("PoolDump", "pool_name", &self.pool_name)?;
        Ok(vec!["dump".to_string(), self.pool_name.clone()])
    }
}

/// `zpool status <pool>`
#[derive(Debug, Clone, Default)]
pub struct PoolStatus {
    pub pool_name: String,
}

impl PoolStatus {
    pub fn new(pool_name: impl Into<String>) -> Self {
        Self {
            pool_name: pool_name.into(),
        }
    }

    /// Pool state string such as "ONLINE"
    pub async fn state(&self, runner: &dyn CommandRunner) -> Result<String> {
        let raw = self.execute(runner).await?;
        parse_pool_status(&raw)
    }
}

impl ZfsCommand for PoolStatus {
    fn program(&self) -> &'static str {
        ZPOOL
    }

    fn build(&self) -> Result<Vec<String>> {
        let mut args = vec!["status".to_string()];
        if !self.pool_name.is_empty() {
            args.push(self.pool_name.clone());
        }
        Ok(args)
    }
}

/// Extract the state from `zpool status` output.
///
/// Expects the second line to read ` state: <STATE>`; anything else is a
/// parse failure carrying the raw output.
pub fn parse_pool_status(output: &str) -> Result<String> {
    let line = output
        .lines()
        .nth(1)
        .ok_or_else(|| ZfsError::parse_failure("pool status", "fewer than two lines", output))?;
    let state = line
        .split(':')
        .nth(1)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ZfsError::parse_failure("pool status", "second line has no ':' token", output)
        })?;
    Ok(state.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRunner;

    fn devs(list: &[&str]) -> Vec<String> {
        list.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_create_mirror_with_cachefile() {
        let args = PoolCreate::new("cstor-aaaa")
            .with_type(RaidType::Mirror)
            .with_property("cachefile", "/tmp/p.cache")
            .with_fs_property("io.openebs:poolname", "pool-1")
            .with_vdevs(devs(&["/dev/sdb", "/dev/sdc"]))
            .build()
            .unwrap();
        assert_eq!(
            args.join(" "),
            "create -o cachefile=/tmp/p.cache -O io.openebs:poolname=pool-1 cstor-aaaa mirror /dev/sdb /dev/sdc"
        );
    }

    #[test]
    fn test_create_mirror_pairs_per_group_layout() {
        let args = PoolCreate::new("p")
            .with_type(RaidType::Mirror)
            .with_vdevs(devs(&["a", "b", "c", "d"]))
            .build()
            .unwrap();
        assert_eq!(args.join(" "), "create p mirror a b mirror c d");
    }

    #[test]
    fn test_stripe_keyword_never_rendered() {
        for vdevs in [devs(&["a"]), devs(&["a", "b", "c"])] {
            let args = PoolCreate::new("p").with_vdevs(vdevs).build().unwrap();
            assert!(!args.iter().any(|a| a == "stripe"));
            let args = PoolExpansion::new("p")
                .with_vdevs(devs(&["a"]))
                .build()
                .unwrap();
            assert!(!args.iter().any(|a| a == "stripe"));
        }
    }

    #[test]
    fn test_create_validation() {
        let err = PoolCreate::new("p").build().unwrap_err();
        assert!(matches!(err, ZfsError::InvalidVdevLayout { .. }));

        let err = PoolCreate::new("p")
            .with_type(RaidType::Mirror)
            .with_vdevs(devs(&["a", "b", "c"]))
            .build()
            .unwrap_err();
        assert!(err.is_validation());

        let err = PoolCreate::new("").with_vdevs(devs(&["a"])).build().unwrap_err();
        assert!(matches!(err, ZfsError::MissingField { .. }));
    }

    #[test]
    fn test_cachefile_flag_iff_set() {
        let plain = PoolImport::new("cstor-a").with_cache_file(None).build().unwrap();
        assert_eq!(plain, devs(&["import", "cstor-a"]));
        let empty = PoolImport::new("cstor-a").with_cache_file(Some("")).build().unwrap();
        assert!(!empty.contains(&"-c".to_string()));
        let with = PoolImport::new("cstor-a")
            .with_cache_file(Some("/tmp/c"))
            .with_directory("/dev/disk/by-id")
            .with_old_name("cstor-old")
            .build()
            .unwrap();
        assert_eq!(
            with.join(" "),
            "import -c /tmp/c -d /dev/disk/by-id cstor-old cstor-a"
        );
    }

    #[test]
    fn test_expansion_classes() {
        let cache = PoolExpansion::new("p")
            .with_device_class(DeviceClass::Cache)
            .with_type(RaidType::Mirror)
            .with_vdevs(devs(&["a", "b", "c"]))
            .build()
            .unwrap();
        assert_eq!(cache.join(" "), "add p cache a b c");

        let log = PoolExpansion::new("p")
            .with_device_class(DeviceClass::Log)
            .with_type(RaidType::Mirror)
            .with_vdevs(devs(&["a", "b"]))
            .build()
            .unwrap();
        assert_eq!(log.join(" "), "add p log mirror a b");

        let data = PoolExpansion::new("p")
            .with_type(RaidType::Raidz)
            .with_vdevs(devs(&["a", "b", "c"]))
            .build()
            .unwrap();
        assert_eq!(data.join(" "), "add p raidz a b c");
    }

    #[test]
    fn test_get_property_forms() {
        assert_eq!(
            PoolGetProperty::value("cstor-a", "health").build().unwrap().join(" "),
            "get -Hp -o value health cstor-a"
        );
        assert_eq!(
            PoolGetProperty::pool_names().build().unwrap().join(" "),
            "get -Hp -o name name"
        );
    }

    #[test]
    fn test_replace_and_labelclear() {
        let args = PoolDiskReplace::new("cstor-a", "/dev/sda", "/dev/sdd")
            .build()
            .unwrap();
        assert_eq!(args.join(" "), "replace cstor-a /dev/sda /dev/sdd");
        assert!(PoolDiskReplace::new("cstor-a", "", "/dev/sdd").build().is_err());

        let args = PoolLabelClear::new("/dev/sda").with_force(true).build().unwrap();
        assert_eq!(args.join(" "), "labelclear -f /dev/sda");
    }

    #[test]
    fn test_parse_pool_status() {
        let output = "  pool: cstor-a\n state: DEGRADED\nstatus: One or more devices...\n";
        assert_eq!(parse_pool_status(output).unwrap(), "DEGRADED");

        let err = parse_pool_status("no pools available").unwrap_err();
        match err {
            ZfsError::ParseFailure { raw, .. } => assert_eq!(raw, "no pools available"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_trims_value() {
        let mock = MockRunner::new();
        mock.succeed("zpool get -Hp -o value free cstor-a", "1048576\n");
        let value = PoolGetProperty::value("cstor-a", "free")
            .fetch(&mock)
            .await
            .unwrap();
        assert_eq!(value, "1048576");
    }

    #[tokio::test]
    async fn test_dump_strips_partition_suffixes_on_request() {
        let mock = MockRunner::new();
        mock.succeed(
            "zpool dump cstor-a",
            r#"{"vdev_tree":{"type":"root","children":[{"type":"disk","path":"/dev/sdb1","whole_disk":1}]}}"#,
        );
        let raw = PoolDump::new("cstor-a").topology(&mock).await.unwrap();
        assert!(raw.contains_path("/dev/sdb1"));
        let stripped = PoolDump::new("cstor-a")
            .with_strip_vdev_path(true)
            .topology(&mock)
            .await
            .unwrap();
        assert!(stripped.contains_path("/dev/sdb"));
        assert!(!stripped.contains_path("/dev/sdb1"));
    }

    #[tokio::test]
    async fn test_execute_surfaces_output_on_failure() {
        let mock = MockRunner::new();
        mock.fail("zpool destroy", "cannot open 'cstor-a': no such pool");
        let err = PoolDestroy::new("cstor-a").execute(&mock).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(mock.calls(), vec!["zpool destroy cstor-a"]);
    }
}
