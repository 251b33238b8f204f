//! Well-known label, annotation and finalizer keys

/// Label carrying the pool UID that owns a resource; matched against `OPENEBS_IO_CSTOR_ID`
pub const POOL_UID_LABEL: &str = "cstorpool.openebs.io/uid";

/// Label carrying the volume UID on a volume replica
pub const VOLUME_NAME_LABEL: &str = "cstorvolume.openebs.io/name";

/// Annotation disabling reconciliation when set to "true"
pub const RECONCILE_DISABLE_ANNOTATION: &str = "reconcile.openebs.io/disable";

/// Annotation naming the UID of a pre-existing pool to import and rename
pub const IMPORT_HINT_ANNOTATION: &str = "cspuid";

/// Annotation on a block device claim naming the device it replaces
pub const PREDECESSOR_ANNOTATION: &str = "cstor.openebs.io/predecessor";

/// Finalizer held on pool instances until the pool is destroyed
pub const POOL_FINALIZER: &str = "openebs.io/pool-protection";

/// Finalizer held on volume replicas until the dataset is destroyed
pub const REPLICA_FINALIZER: &str = "cstorvolumereplica.openebs.io/finalizer";

/// Prefix of every pool name
pub const POOL_PREFIX: &str = "cstor-";

/// Property recording the resource name on a created pool
pub const POOL_NAME_PROPERTY: &str = "io.openebs:poolname";

/// Build the label selector matching resources owned by `pool_uid`
pub fn ownership_selector(pool_uid: &str) -> String {
    format!("{}={}", POOL_UID_LABEL, pool_uid)
}

/// `cstor-<uid>`
pub fn pool_name(uid: &str) -> String {
    format!("{}{}", POOL_PREFIX, uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_name_prefix() {
        for uid in ["aaaa", "", "0b7f-11e9"] {
            assert_eq!(pool_name(uid), format!("cstor-{}", uid));
        }
    }

    #[test]
    fn test_ownership_selector() {
        assert_eq!(ownership_selector("aaaa"), "cstorpool.openebs.io/uid=aaaa");
    }
}
