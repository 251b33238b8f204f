//! Ownership and classification predicates applied to informer callbacks

use crate::controller::QueueOperation;
use cstor_core::labels::POOL_UID_LABEL;
use cstor_core::{PoolInstance, Resource};

/// Resource carries this agent's pool UID label
pub fn is_owned<K: Resource>(obj: &K, pool_uid: &str) -> bool {
    !pool_uid.is_empty() && obj.label(POOL_UID_LABEL) == Some(pool_uid)
}

/// Pool instance is the one this agent manages
pub fn is_pool_owned(pool: &PoolInstance, pool_uid: &str) -> bool {
    !pool_uid.is_empty() && pool.uid() == pool_uid
}

pub fn is_destroy<K: Resource>(obj: &K) -> bool {
    obj.is_being_deleted()
}

/// Only the status moved; dropping these breaks status-write feedback loops
pub fn is_status_only_change<K: Resource>(old: &K, new: &K) -> bool {
    old.same_spec(new)
        && old.status() != new.status()
        && old.is_being_deleted() == new.is_being_deleted()
}

pub fn is_empty_or_pending(pool: &PoolInstance) -> bool {
    pool.status.phase.is_creatable()
}

pub fn reconcile_disabled(pool: &PoolInstance) -> bool {
    pool.reconcile_disabled()
}

pub fn classify_add<K: Resource>(obj: &K) -> QueueOperation {
    if is_destroy(obj) {
        QueueOperation::Destroy
    } else {
        QueueOperation::Add
    }
}

/// Enqueue policy for update notifications
pub fn classify_update<K: Resource>(old: &K, new: &K) -> Option<QueueOperation> {
    if old.resource_version() == new.resource_version() {
        return Some(QueueOperation::Sync);
    }
    if is_status_only_change(old, new) {
        return None;
    }
    if is_destroy(new) {
        return Some(QueueOperation::Destroy);
    }
    Some(QueueOperation::Modify)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cstor_core::k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use cstor_core::{PoolPhase, RaidGroup, RaidType};

    fn pool(version: &str) -> PoolInstance {
        let mut pool = PoolInstance::new("pool-a", "openebs", "aaaa");
        pool.metadata.resource_version = Some(version.to_string());
        pool
    }

    #[test]
    fn test_ownership() {
        let p = pool("1");
        assert!(is_pool_owned(&p, "aaaa"));
        assert!(!is_pool_owned(&p, "bbbb"));
        assert!(!is_pool_owned(&p, ""));
        assert!(!is_owned(&p, "aaaa"));
    }

    #[test]
    fn test_classify_update() {
        let old = pool("1");

        assert_eq!(classify_update(&old, &old), Some(QueueOperation::Sync));

        let mut status_only = pool("2");
        status_only.status.phase = PoolPhase::Online;
        assert_eq!(classify_update(&old, &status_only), None);

        let mut spec_change = pool("2");
        spec_change
            .spec
            .raid_groups
            .push(RaidGroup::new(Some(RaidType::Stripe), &["bd-1"]));
        assert_eq!(
            classify_update(&old, &spec_change),
            Some(QueueOperation::Modify)
        );

        let mut deleting = pool("2");
        deleting.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert_eq!(classify_update(&old, &deleting), Some(QueueOperation::Destroy));
        assert_eq!(classify_add(&deleting), QueueOperation::Destroy);
        assert_eq!(classify_add(&old), QueueOperation::Add);
    }

    #[test]
    fn test_pool_predicates() {
        let mut p = pool("1");
        assert!(is_empty_or_pending(&p));
        p.status.phase = PoolPhase::Online;
        assert!(!is_empty_or_pending(&p));

        p.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert("reconcile.openebs.io/disable".to_string(), "true".to_string());
        assert!(reconcile_disabled(&p));
    }
}
