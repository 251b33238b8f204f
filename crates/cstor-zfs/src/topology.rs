//! Pool topology as reported by `zpool dump`
//!
//! The dump is a JSON document whose `vdev_tree` is the root vdev. Top-level vdevs
//! sit under `children`, hot spares under `spares` and L2ARC devices under
//! `l2cache`. Each vdev carries two counter arrays: `vdev_stats` (processed bytes
//! at index 25) and `scan_stats` (scan function at index 0, scan state at 1).

use crate::error::{Result, ZfsError};
use serde::{Deserialize, Deserializer};

const VDEV_STAT_PROCESSED: usize = 25;
const SCAN_STAT_FUNC: usize = 0;
const SCAN_STAT_STATE: usize = 1;

/// Kind of scan recorded in `scan_stats[0]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFunc {
    None,
    Scrub,
    Resilver,
}

impl ScanFunc {
    fn from_stat(value: u64) -> Option<Self> {
        match value {
            0 => Some(ScanFunc::None),
            1 => Some(ScanFunc::Scrub),
            2 => Some(ScanFunc::Resilver),
            _ => None,
        }
    }
}

/// Progress of the scan recorded in `scan_stats[1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    None,
    Scanning,
    Finished,
    Canceled,
}

impl ScanState {
    fn from_stat(value: u64) -> Option<Self> {
        match value {
            0 => Some(ScanState::None),
            1 => Some(ScanState::Scanning),
            2 => Some(ScanState::Finished),
            3 => Some(ScanState::Canceled),
            _ => None,
        }
    }
}

fn int_as_bool<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Int(u64),
        Bool(bool),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Int(v) => v != 0,
        Flag::Bool(b) => b,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Vdev {
    #[serde(rename = "type", default)]
    pub vdev_type: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, deserialize_with = "int_as_bool")]
    pub is_log: bool,
    #[serde(default, deserialize_with = "int_as_bool")]
    pub is_spare: bool,
    #[serde(default, deserialize_with = "int_as_bool")]
    pub whole_disk: bool,
    #[serde(default)]
    pub vdev_stats: Vec<u64>,
    #[serde(default)]
    pub scan_stats: Vec<u64>,
    #[serde(default)]
    pub children: Vec<Vdev>,
}

impl Vdev {
    pub fn scan_func(&self) -> Option<ScanFunc> {
        self.scan_stats
            .get(SCAN_STAT_FUNC)
            .copied()
            .and_then(ScanFunc::from_stat)
    }

    pub fn scan_state(&self) -> Option<ScanState> {
        self.scan_stats
            .get(SCAN_STAT_STATE)
            .copied()
            .and_then(ScanState::from_stat)
    }

    pub fn processed_bytes(&self) -> u64 {
        self.vdev_stats
            .get(VDEV_STAT_PROCESSED)
            .copied()
            .unwrap_or(0)
    }

    /// Whether this vdev is still being rebuilt after a replacement
    pub fn is_resilvering(&self) -> bool {
        if self.scan_stats.is_empty() || self.processed_bytes() == 0 {
            return false;
        }
        let finished = self.scan_func() == Some(ScanFunc::Resilver)
            && self.scan_state() == Some(ScanState::Finished);
        !finished || !self.children.is_empty()
    }

    fn find(&self, path: &str) -> Option<&Vdev> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(path))
    }

    fn strip_paths(&mut self) {
        if !self.path.is_empty() {
            self.path = strip_partition_suffix(&self.path);
        }
        for child in &mut self.children {
            child.strip_paths();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VdevTree {
    #[serde(rename = "type", default)]
    pub vdev_type: String,
    #[serde(default)]
    pub vdev_stats: Vec<u64>,
    #[serde(default)]
    pub scan_stats: Vec<u64>,
    #[serde(rename = "children", default)]
    pub top_vdevs: Vec<Vdev>,
    #[serde(default)]
    pub spares: Vec<Vdev>,
    #[serde(rename = "l2cache", default)]
    pub read_cache: Vec<Vdev>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vdev_tree: VdevTree,
}

impl Topology {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(ZfsError::parse_failure("pool dump", "empty output", raw));
        }
        serde_json::from_str(raw)
            .map_err(|e| ZfsError::parse_failure("pool dump", e.to_string(), raw))
    }

    fn all_vdevs(&self) -> impl Iterator<Item = &Vdev> {
        self.vdev_tree
            .top_vdevs
            .iter()
            .chain(self.vdev_tree.spares.iter())
            .chain(self.vdev_tree.read_cache.iter())
    }

    /// Vdev at `path` anywhere in the tree, including spares and cache devices
    pub fn find_vdev(&self, path: &str) -> Option<&Vdev> {
        if path.is_empty() {
            return None;
        }
        self.all_vdevs().find_map(|v| v.find(path))
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.find_vdev(path).is_some()
    }

    /// First of `paths` present in the tree
    pub fn first_used<'a>(&self, paths: &'a [String]) -> Option<&'a String> {
        paths.iter().find(|p| self.contains_path(p))
    }

    /// Whether the device at `path` is still resilvering; an absent device is not
    pub fn is_resilvering(&self, path: &str) -> bool {
        self.find_vdev(path).is_some_and(Vdev::is_resilvering)
    }

    /// Replace every vdev path with its partition-stripped form
    pub fn strip_paths(&mut self) {
        let tree = &mut self.vdev_tree;
        for vdev in tree
            .top_vdevs
            .iter_mut()
            .chain(tree.spares.iter_mut())
            .chain(tree.read_cache.iter_mut())
        {
            vdev.strip_paths();
        }
    }
}

fn strip_once(path: &str) -> Option<String> {
    // -partN
    if let Some(idx) = path.rfind("-part") {
        let digits = &path[idx + 5..];
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return Some(path[..idx].to_string());
        }
    }

    let trailing = path.bytes().rev().take_while(u8::is_ascii_digit).count();
    if trailing == 0 {
        return None;
    }
    let stem = &path[..path.len() - trailing];

    // pN after a digit, as in nvme0n1p1
    if let Some(base) = stem.strip_suffix('p') {
        if base.bytes().last().is_some_and(|b| b.is_ascii_digit()) {
            return Some(base.to_string());
        }
    }

    // N after hd*, sd*, vd*, xvd* device names
    let file = stem.rsplit('/').next().unwrap_or(stem);
    let letters = ["xvd", "hd", "sd", "vd"]
        .iter()
        .find_map(|prefix| file.strip_prefix(prefix));
    if let Some(rest) = letters {
        if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_lowercase()) {
            return Some(stem.to_string());
        }
    }
    None
}

/// Strip a trailing partition suffix (`-partN`, `pN` after a digit, or `N` after a
/// hd/sd/vd/xvd device name). Paths without a recognised suffix are returned as is.
pub fn strip_partition_suffix(path: &str) -> String {
    let mut current = path.to_string();
    while let Some(next) = strip_once(&current) {
        current = next;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLACING: &str = r#"{"name":"cstor-e2a5","state":0,"pool_guid":5658042564790239978,"vdev_children":1,"vdev_tree":{"type":"root","id":0,"vdev_stats":[1,7,0,4287558656,10670309376,10670309376,0,0,0,99018,1522020,0,0,0,0,796413952,21988136448,0,0,0,0,0,0,0,0,0,0],"scan_stats":[2,1,1574834545,0,4266596352,723547136,0,723547136,0,723547136,1574834545,0,0],"children":[{"type":"replacing","id":0,"whole_disk":0,"vdev_stats":[302482414371,7,0,0,0,0,10722213888,0,0,67394,841082,0,0,0,0,668213248,11584425984,0,0,0,0,0,0,0,0,128688640,0],"scan_stats":[2,1,1574834545,0,4266596352,723547136,0,723547136,0,723547136,1574834545,0,0],"children":[{"type":"disk","id":0,"guid":12875869339379092712,"path":"/dev/disk/by-id/scsi-0Google_PersistentDisk_sai-disk1","whole_disk":1,"vdev_stats":[1394692769652,7,0,0,0,0,10726932480,0,0,67387,688754,0,0,0,0,667729920,10403712512,0,0,0,0,0,0,0,0,0,0],"scan_stats":[2,1,1574834545,0,4266596352,723547136,0,723547136,0,723547136,1574834545,0,0]},{"type":"disk","id":1,"path":"/dev/disk/by-id/scsi-0Google_PersistentDisk_sai-disk3","whole_disk":1,"vdev_stats":[302656212847,7,0,0,0,0,10726932480,0,0,7,152328,0,0,0,0,483328,1180713472,0,0,0,0,0,0,0,0,723547136,0],"scan_stats":[2,1,1574834545,0,4266596352,723547136,0,723547136,0,723547136,1574834545,0,0],"resilver_txg":243}]},{"type":"disk","id":1,"path":"/dev/disk/by-id/scsi-0Google_PersistentDisk_sai-disk4","whole_disk":1,"vdev_stats":[1394692809521,7,0,0,0,0,10726932480,0,0,31624,680938,0,0,0,0,128200704,10403710464,0,0,0,0,0,0,0,0,0,0],"scan_stats":[2,1,1574834545,0,4266596352,723547136,0,723547136,0,723547136,1574834545,0,0]}]}}"#;

    const FINISHED: &str = r#"{"vdev_children":1,"vdev_tree":{"type":"root","scan_stats":[2,2,1,0,4,7,0,7,0,7,1,0,0],"children":[{"type":"disk","path":"/dev/disk/by-id/scsi-disk4","whole_disk":1,"vdev_stats":[3,7,0,0,0,0,1,0,0,7,1,0,0,0,0,4,1,0,0,0,0,0,0,0,0,723547136,0],"scan_stats":[2,2,1,0,4,7,0,7,0,7,1,0,0]}]}}"#;

    const NO_SCAN: &str = r#"{"vdev_children":1,"vdev_tree":{"type":"root","children":[{"type":"disk","path":"/dev/sdb1","whole_disk":1,"vdev_stats":[1,7,0,0,0,0,1,0,0,3,6,0,0,0,0,1,1,0,0,0,0,0,0,0,0,0,0]}],"spares":[{"type":"disk","path":"/dev/sdx"}],"l2cache":[{"type":"disk","path":"/dev/nvme0n1p1"}]}}"#;

    #[test]
    fn test_replacing_child_is_resilvering() {
        let topology = Topology::parse(REPLACING).unwrap();
        assert!(topology.is_resilvering("/dev/disk/by-id/scsi-0Google_PersistentDisk_sai-disk3"));
        // processed bytes still zero on the outgoing disk
        assert!(!topology.is_resilvering("/dev/disk/by-id/scsi-0Google_PersistentDisk_sai-disk1"));
        let replacing = &topology.vdev_tree.top_vdevs[0];
        assert_eq!(replacing.vdev_type, "replacing");
        assert!(!replacing.whole_disk);
        assert!(replacing.children[0].whole_disk);
    }

    #[test]
    fn test_finished_resilver() {
        let topology = Topology::parse(FINISHED).unwrap();
        let vdev = topology.find_vdev("/dev/disk/by-id/scsi-disk4").unwrap();
        assert_eq!(vdev.scan_func(), Some(ScanFunc::Resilver));
        assert_eq!(vdev.scan_state(), Some(ScanState::Finished));
        assert!(!topology.is_resilvering("/dev/disk/by-id/scsi-disk4"));
    }

    #[test]
    fn test_no_scan_stats_and_missing_device() {
        let topology = Topology::parse(NO_SCAN).unwrap();
        assert!(!topology.is_resilvering("/dev/sdb1"));
        assert!(!topology.is_resilvering("/dev/absent"));
    }

    #[test]
    fn test_spares_and_cache_are_searched() {
        let mut topology = Topology::parse(NO_SCAN).unwrap();
        assert!(topology.contains_path("/dev/sdx"));
        assert!(topology.contains_path("/dev/nvme0n1p1"));
        topology.strip_paths();
        assert!(topology.contains_path("/dev/nvme0n1"));
        assert!(topology.contains_path("/dev/sdb"));
        let candidates = vec!["/dev/sdq".to_string(), "/dev/sdb".to_string()];
        assert_eq!(topology.first_used(&candidates), Some(&candidates[1]));
    }

    #[test]
    fn test_parse_failures_keep_raw_output() {
        for raw in ["", r#"{"name": "pool1","vdev_stats":{]}"#] {
            match Topology::parse(raw).unwrap_err() {
                ZfsError::ParseFailure { raw: kept, .. } => assert_eq!(kept, raw),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_strip_partition_suffix() {
        let cases = [
            ("/dev/disk/by-id/ata-QEMU_HARDDISK_QM00001-part1", "/dev/disk/by-id/ata-QEMU_HARDDISK_QM00001"),
            ("/dev/nvme0n1p1", "/dev/nvme0n1"),
            ("/dev/sda1", "/dev/sda"),
            ("/dev/xvdf12", "/dev/xvdf"),
            ("/dev/vdb3", "/dev/vdb"),
            ("/dev/hdc2", "/dev/hdc"),
            ("/dev/sda", "/dev/sda"),
            ("/dev/nvme0n1", "/dev/nvme0n1"),
            ("/dev/disk/by-id/scsi-0Google_PersistentDisk_disk1", "/dev/disk/by-id/scsi-0Google_PersistentDisk_disk1"),
            ("/dev/loop3", "/dev/loop3"),
            ("", ""),
        ];
        for (input, expected) in cases {
            assert_eq!(strip_partition_suffix(input), expected, "input {input}");
        }
    }

    #[test]
    fn test_strip_is_idempotent() {
        let inputs = [
            "/dev/sda1",
            "/dev/nvme0n1p2",
            "/dev/disk/by-id/wwn-0x5000c500a-part3",
            "/dev/disk/by-id/x1p2-part1",
            "/dev/md127",
            "/var/tmp/file-vdev-9",
        ];
        for input in inputs {
            let once = strip_partition_suffix(input);
            assert_eq!(strip_partition_suffix(&once), once, "input {input}");
        }
    }
}
