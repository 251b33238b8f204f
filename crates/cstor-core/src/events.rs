use serde::{Deserialize, Serialize};
use std::fmt;

/// Event severity as understood by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// Fixed vocabulary of reasons attached to reconcile events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventReason {
    SuccessCreated,
    SuccessImported,
    SuccessSynced,
    AlreadyPresent,
    FailureCreate,
    FailureImport,
    FailureDestroy,
    FailureValidate,
    FailureStatusSync,
}

impl EventReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventReason::SuccessCreated => "SuccessCreated",
            EventReason::SuccessImported => "SuccessImported",
            EventReason::SuccessSynced => "SuccessSynced",
            EventReason::AlreadyPresent => "AlreadyPresent",
            EventReason::FailureCreate => "FailureCreate",
            EventReason::FailureImport => "FailureImport",
            EventReason::FailureDestroy => "FailureDestroy",
            EventReason::FailureValidate => "FailureValidate",
            EventReason::FailureStatusSync => "FailureStatusSync",
        }
    }

    /// Default human-readable message for the reason
    pub fn message(&self) -> &'static str {
        match self {
            EventReason::SuccessCreated => "Resource created successfully",
            EventReason::SuccessImported => "Resource imported successfully",
            EventReason::SuccessSynced => "Received Resource sync event",
            EventReason::AlreadyPresent => "Resource already present",
            EventReason::FailureCreate => "Resource creation failed",
            EventReason::FailureImport => "Resource import failed",
            EventReason::FailureDestroy => "Resource Destroy failed",
            EventReason::FailureValidate => "Resource validation failed",
            EventReason::FailureStatusSync => "Resource status sync failed",
        }
    }

    /// Severity implied by the reason
    pub fn event_type(&self) -> EventType {
        match self {
            EventReason::SuccessCreated
            | EventReason::SuccessImported
            | EventReason::SuccessSynced
            | EventReason::AlreadyPresent => EventType::Normal,
            _ => EventType::Warning,
        }
    }
}

impl fmt::Display for EventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reasons_are_warnings() {
        assert_eq!(EventReason::FailureCreate.event_type(), EventType::Warning);
        assert_eq!(EventReason::FailureStatusSync.event_type(), EventType::Warning);
        assert_eq!(EventReason::AlreadyPresent.event_type(), EventType::Normal);
        assert_eq!(EventReason::SuccessImported.to_string(), "SuccessImported");
    }
}
