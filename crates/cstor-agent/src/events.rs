use crate::api_client::ApiClient;
use async_trait::async_trait;
use chrono::Utc;
use cstor_core::{EventReason, Resource};
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{Api, PostParams};
use kube::Client;
use parking_lot::Mutex;
use tracing::{info, warn};

/// Sink for reconcile events; delivery is best-effort and never fails the caller
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, target: &ObjectReference, reason: EventReason, message: &str);
}

/// Reference to `obj` suitable as an event's involved object
pub fn object_reference<K: Resource>(obj: &K) -> ObjectReference {
    let gvk = K::gvk();
    ObjectReference {
        api_version: Some(gvk.api_version()),
        kind: Some(gvk.kind),
        name: Some(obj.name().to_string()),
        namespace: obj.namespace().map(String::from),
        uid: Some(obj.uid().to_string()).filter(|u| !u.is_empty()),
        resource_version: obj.resource_version().map(String::from),
        ..Default::default()
    }
}

/// Record an event against `obj` with an explicit message
pub async fn emit<K: Resource>(
    recorder: &dyn EventRecorder,
    obj: &K,
    reason: EventReason,
    message: &str,
) {
    recorder
        .record(&object_reference(obj), reason, message)
        .await;
}

/// Posts core/v1 Events to the orchestrator
pub struct ApiEventRecorder {
    client: Client,
    component: String,
    host: Option<String>,
}

impl ApiEventRecorder {
    pub fn new(api: &ApiClient, component: impl Into<String>, host: Option<String>) -> Self {
        Self {
            client: api.client().clone(),
            component: component.into(),
            host,
        }
    }

    fn build_event(&self, target: &ObjectReference, reason: EventReason, message: &str) -> Event {
        let now = Time(Utc::now());
        let object_name = target.name.clone().unwrap_or_default();
        Event {
            metadata: ObjectMeta {
                name: Some(format!("{}.{}", object_name, uuid::Uuid::new_v4().simple())),
                namespace: target.namespace.clone(),
                ..Default::default()
            },
            involved_object: target.clone(),
            reason: Some(reason.as_str().to_string()),
            message: Some(message.to_string()),
            type_: Some(reason.event_type().as_str().to_string()),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            source: Some(EventSource {
                component: Some(self.component.clone()),
                host: self.host.clone(),
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl EventRecorder for ApiEventRecorder {
    async fn record(&self, target: &ObjectReference, reason: EventReason, message: &str) {
        let object = target.name.as_deref().unwrap_or("<unknown>");
        info!(object, reason = %reason, "{}", message);

        let event = self.build_event(target, reason, message);
        let namespace = target.namespace.as_deref().unwrap_or("default");
        let events: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        if let Err(e) = events.create(&PostParams::default(), &event).await {
            warn!("Failed to record event {} for {}: {}", reason, object, e);
        }
    }
}

/// One captured event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub reason: EventReason,
    pub message: String,
}

/// Keeps events in memory for assertions
#[derive(Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn has(&self, reason: EventReason) -> bool {
        self.events.lock().iter().any(|e| e.reason == reason)
    }
}

#[async_trait]
impl EventRecorder for MemoryEventRecorder {
    async fn record(&self, target: &ObjectReference, reason: EventReason, message: &str) {
        self.events.lock().push(RecordedEvent {
            object: target.name.clone().unwrap_or_default(),
            reason,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cstor_core::PoolInstance;

    fn unreachable_client() -> ApiClient {
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        ApiClient::new(Client::try_from(config).unwrap())
    }

    #[tokio::test]
    async fn test_event_shape() {
        let pool = PoolInstance::new("pool-a", "openebs", "aaaa");
        let recorder = ApiEventRecorder::new(&unreachable_client(), "cspi-mgmt", None);
        let event = recorder.build_event(
            &object_reference(&pool),
            EventReason::FailureCreate,
            "create failed",
        );

        assert!(event.metadata.name.as_deref().unwrap().starts_with("pool-a."));
        assert_eq!(event.metadata.namespace.as_deref(), Some("openebs"));
        assert_eq!(event.type_.as_deref(), Some("Warning"));
        assert_eq!(event.reason.as_deref(), Some("FailureCreate"));
        assert_eq!(event.involved_object.kind.as_deref(), Some("CStorPoolInstance"));
        assert_eq!(event.involved_object.uid.as_deref(), Some("aaaa"));
    }

    #[tokio::test]
    async fn test_unreachable_sink_is_swallowed() {
        let pool = PoolInstance::new("pool-a", "openebs", "aaaa");
        let recorder = ApiEventRecorder::new(&unreachable_client(), "cspi-mgmt", None);
        emit(&recorder, &pool, EventReason::SuccessSynced, "synced").await;
    }

    #[tokio::test]
    async fn test_memory_recorder() {
        let pool = PoolInstance::new("pool-a", "openebs", "aaaa");
        let recorder = MemoryEventRecorder::new();
        emit(&recorder, &pool, EventReason::SuccessImported, "imported").await;
        assert!(recorder.has(EventReason::SuccessImported));
        assert_eq!(recorder.events()[0].object, "pool-a");
    }
}
