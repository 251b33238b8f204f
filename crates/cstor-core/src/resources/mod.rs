macro_rules! impl_resource {
    ($ty:ty, $status:ty, $status_field:ident, $group:expr, $version:expr, $kind:expr, $plural:expr) => {
        impl kube::Resource for $ty {
            type DynamicType = ();
            type Scope = k8s_openapi::NamespaceResourceScope;

            fn kind(_: &()) -> std::borrow::Cow<'_, str> {
                $kind.into()
            }

            fn group(_: &()) -> std::borrow::Cow<'_, str> {
                $group.into()
            }

            fn version(_: &()) -> std::borrow::Cow<'_, str> {
                $version.into()
            }

            fn plural(_: &()) -> std::borrow::Cow<'_, str> {
                $plural.into()
            }

            fn meta(&self) -> &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                &self.metadata
            }

            fn meta_mut(
                &mut self,
            ) -> &mut k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                &mut self.metadata
            }
        }

        impl $crate::resources::Resource for $ty {
            type Status = $status;

            fn gvk() -> $crate::types::GroupVersionKind {
                $crate::types::GroupVersionKind::new($group, $version, $kind, $plural)
            }

            fn metadata(&self) -> &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(
                &mut self,
            ) -> &mut k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                &mut self.metadata
            }

            fn status(&self) -> &Self::Status {
                &self.$status_field
            }

            fn status_mut(&mut self) -> &mut Self::Status {
                &mut self.$status_field
            }

            fn same_spec(&self, other: &Self) -> bool {
                self.spec == other.spec
            }
        }
    };
}


mod backup;
mod blockdevice;
mod pool;
mod replica;

pub use backup::{
    Backup, BackupSpec, CompletedBackup, CompletedBackupSpec, Restore, RestoreSpec, TaskStatus,
};
pub use blockdevice::{
    BlockDevice, BlockDeviceClaim, BlockDeviceClaimSpec, BlockDeviceClaimStatus, BlockDeviceSpec,
    BlockDeviceStatus, DevLink,
};
pub use pool::{
    BlockDeviceRef, PoolCapacity, PoolConfig, PoolInstance, PoolInstanceSpec, PoolInstanceStatus,
    PoolPhase, RaidGroup, RaidGroupRole, RaidType,
};
pub use replica::{ReplicaPhase, VolumeReplica, VolumeReplicaSpec, VolumeReplicaStatus};

use crate::types::{GroupVersionKind, ResourceKey};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::Debug;
use std::str::FromStr;

/// Trait for the custom resources the agent reads and writes
///
/// Every kind is a namespaced custom resource, so the `kube` typing is fixed.
pub trait Resource:
    kube::Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Serialize
    + DeserializeOwned
    + Clone
    + Debug
    + Send
    + Sync
    + 'static
{
    /// Status sub-object; the only part of the resource the agent mutates besides finalizers
    type Status: Serialize + DeserializeOwned + Clone + Debug + Default + PartialEq + Send + Sync;

    /// Type identity used for object references and logging
    fn gvk() -> GroupVersionKind;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn status(&self) -> &Self::Status;

    fn status_mut(&mut self) -> &mut Self::Status;

    /// True when the desired state of both objects is equal
    fn same_spec(&self, other: &Self) -> bool;

    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    fn key(&self) -> ResourceKey {
        ResourceKey::new(self.namespace().unwrap_or_default(), self.name())
    }

    fn uid(&self) -> &str {
        self.metadata().uid.as_deref().unwrap_or_default()
    }

    fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.metadata()
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    fn remove_annotation(&mut self, key: &str) -> bool {
        self.metadata_mut()
            .annotations
            .as_mut()
            .map(|a| a.remove(key).is_some())
            .unwrap_or(false)
    }

    fn is_being_deleted(&self) -> bool {
        self.metadata().deletion_timestamp.is_some()
    }

    fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata()
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|x| x == finalizer))
    }

    /// Remove a finalizer, returning whether it was present
    fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        match self.metadata_mut().finalizers.as_mut() {
            Some(list) => {
                let before = list.len();
                list.retain(|f| f != finalizer);
                before != list.len()
            }
            None => false,
        }
    }

    fn add_finalizer(&mut self, finalizer: &str) {
        if !self.has_finalizer(finalizer) {
            self.metadata_mut()
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(finalizer.to_string());
        }
    }
}

/// Build metadata with a name and namespace set
pub fn object_meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: if namespace.is_empty() {
            None
        } else {
            Some(namespace.to_string())
        },
        ..Default::default()
    }
}

/// Treat an empty string as an absent optional value
pub(crate) fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalizer_helpers() {
        let mut replica = VolumeReplica::new("vol1", "openebs");
        assert!(!replica.has_finalizer("a"));
        replica.add_finalizer("a");
        replica.add_finalizer("a");
        assert_eq!(replica.metadata.finalizers.as_ref().unwrap().len(), 1);
        assert!(replica.remove_finalizer("a"));
        assert!(!replica.remove_finalizer("a"));
    }

    #[test]
    fn test_kube_resource_identity() {
        assert_eq!(
            <VolumeReplica as kube::Resource>::api_version(&()),
            "cstor.openebs.io/v1"
        );
        assert_eq!(
            <PoolInstance as kube::Resource>::url_path(&(), Some("openebs")),
            "/apis/cstor.openebs.io/v1/namespaces/openebs/cstorpoolinstances"
        );
        assert_eq!(
            <PoolInstance as kube::Resource>::kind(&()),
            PoolInstance::gvk().kind
        );
    }

    #[test]
    fn test_key_and_labels() {
        let mut replica = VolumeReplica::new("vol1", "openebs");
        replica
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert("k".to_string(), "v".to_string());
        assert_eq!(replica.key().to_string(), "openebs/vol1");
        assert_eq!(replica.label("k"), Some("v"));
        assert_eq!(replica.label("missing"), None);
        assert_eq!(replica.annotation("k"), None);
    }
}
