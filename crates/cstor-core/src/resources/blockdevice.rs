use super::{object_meta, Resource};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// A set of equivalent links of one kind (by-id, by-path)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DevLink {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceSpec {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub devlinks: Vec<DevLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceStatus {
    #[serde(default)]
    pub claim_state: String,
    #[serde(default)]
    pub state: String,
}

/// Disk discovered on the node by the device manager
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDevice {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: BlockDeviceSpec,
    #[serde(default)]
    pub status: BlockDeviceStatus,
}

impl_resource!(
    BlockDevice,
    BlockDeviceStatus,
    status,
    "openebs.io",
    "v1alpha1",
    "BlockDevice",
    "blockdevices"
);

impl BlockDevice {
    pub fn new(name: &str, namespace: &str, path: &str, links: &[&str]) -> Self {
        let gvk = Self::gvk();
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind,
            metadata: object_meta(name, namespace),
            spec: BlockDeviceSpec {
                path: path.to_string(),
                devlinks: if links.is_empty() {
                    Vec::new()
                } else {
                    vec![DevLink {
                        kind: "by-id".to_string(),
                        links: links.iter().map(|l| l.to_string()).collect(),
                    }]
                },
            },
            status: BlockDeviceStatus::default(),
        }
    }

    /// All equivalent paths of the device: every link, then the primary path
    pub fn resolved_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        let candidates = self
            .spec
            .devlinks
            .iter()
            .flat_map(|d| d.links.iter())
            .chain(std::iter::once(&self.spec.path));
        for path in candidates {
            if !path.is_empty() && !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        paths
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceClaimSpec {
    #[serde(default)]
    pub block_device_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockDeviceClaimStatus {
    #[serde(default)]
    pub phase: String,
}

/// Claim binding a block device to a pool
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceClaim {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: BlockDeviceClaimSpec,
    #[serde(default)]
    pub status: BlockDeviceClaimStatus,
}

impl_resource!(
    BlockDeviceClaim,
    BlockDeviceClaimStatus,
    status,
    "openebs.io",
    "v1alpha1",
    "BlockDeviceClaim",
    "blockdeviceclaims"
);

impl BlockDeviceClaim {
    pub fn new(name: &str, namespace: &str, block_device_name: &str) -> Self {
        let gvk = Self::gvk();
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind,
            metadata: object_meta(name, namespace),
            spec: BlockDeviceClaimSpec {
                block_device_name: block_device_name.to_string(),
            },
            status: BlockDeviceClaimStatus::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_paths_links_first() {
        let bd = BlockDevice::new(
            "bd-1",
            "openebs",
            "/dev/sdb",
            &["/dev/disk/by-id/ata-1", "/dev/sdb"],
        );
        assert_eq!(
            bd.resolved_paths(),
            vec!["/dev/disk/by-id/ata-1".to_string(), "/dev/sdb".to_string()]
        );
    }

    #[test]
    fn test_resolved_paths_without_links() {
        let bd = BlockDevice::new("bd-1", "openebs", "/dev/sdc", &[]);
        assert_eq!(bd.resolved_paths(), vec!["/dev/sdc".to_string()]);
    }
}
