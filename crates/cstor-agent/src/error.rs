use cstor_zfs::ZfsError;
use miette::Diagnostic;
use thiserror::Error;

/// Error type for reconcile, client and startup failures
#[derive(Error, Debug, Diagnostic)]
pub enum AgentError {
    /// A required spec field is missing or malformed
    #[error("Validation failed for {resource}: {message}")]
    #[diagnostic(
        code(cstor::agent::validation),
        help("Fix the resource spec; the item is re-enqueued when the spec changes")
    )]
    Validation {
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        message: String,
    },

    /// The resource disappeared between enqueue and reconcile
    #[error("Resource not found: {resource_key}")]
    #[diagnostic(
        code(cstor::agent::not_found),
        help("The resource was deleted; nothing to reconcile")
    )]
    NotFound {
        #[allow(unused)]
        resource_key: String,
    },

    /// A ZFS command failed in a way that may succeed on retry
    #[error("{context}: {source}")]
    #[diagnostic(
        code(cstor::agent::transient),
        help("The item is retried with exponential backoff")
    )]
    Transient {
        #[allow(unused)]
        context: String,
        source: ZfsError,
    },

    /// Pool topology disagrees with the spec in a way the agent cannot order
    #[error("Structural mismatch: {message}")]
    #[diagnostic(
        code(cstor::agent::structural),
        help("Compare the raid groups with `zpool status`; device links recorded in the spec may be stale")
    )]
    Structural {
        #[allow(unused)]
        message: String,
    },

    /// The owning pool is not present on this node
    #[error("Pool {pool} is not ready")]
    #[diagnostic(
        code(cstor::agent::pool_not_ready),
        help("The pool controller has not imported or created the pool yet")
    )]
    PoolNotReady {
        #[allow(unused)]
        pool: String,
    },

    /// Destroying a pool or dataset failed
    #[error("Failed to destroy {resource}: {message}")]
    #[diagnostic(
        code(cstor::agent::destroy_failed),
        help("The finalizer stays in place and destroy is retried")
    )]
    DestroyFailed {
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        message: String,
    },

    /// Write rejected because the stored resourceVersion moved on
    #[error("Conflict writing {resource_key}")]
    #[diagnostic(
        code(cstor::agent::conflict),
        help("Another writer updated the resource; refetch and retry")
    )]
    Conflict {
        #[allow(unused)]
        resource_key: String,
    },

    /// Orchestrator API request failed
    #[error("API request failed: {message}")]
    #[diagnostic(
        code(cstor::agent::api),
        help("Check API server reachability and the agent's service account permissions")
    )]
    Api {
        #[allow(unused)]
        message: String,
    },

    /// A workqueue item that can never be processed
    #[error("Invalid workqueue item: {item}")]
    #[diagnostic(
        code(cstor::agent::invalid_queue_item),
        help("The item is dropped from the queue")
    )]
    InvalidQueueItem {
        #[allow(unused)]
        item: String,
    },

    /// Startup cannot continue
    #[error("Fatal: {message}")]
    #[diagnostic(code(cstor::agent::fatal), help("{suggestion}"))]
    Fatal {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Several independent failures from one reconcile pass
    #[error("{} errors: {}", .errors.len(), join_messages(.errors))]
    #[diagnostic(code(cstor::agent::multiple))]
    Multiple {
        #[related]
        errors: Vec<AgentError>,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] cstor_core::CstorError),

    /// ZFS driver error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Zfs(#[from] ZfsError),
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

fn join_messages(errors: &[AgentError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl AgentError {
    pub fn validation(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource_key: impl Into<String>) -> Self {
        Self::NotFound {
            resource_key: resource_key.into(),
        }
    }

    pub fn transient(context: impl Into<String>, source: ZfsError) -> Self {
        Self::Transient {
            context: context.into(),
            source,
        }
    }

    /// Wrap a command failure; builder validation errors become `Validation`
    pub fn from_zfs(context: impl Into<String>, source: ZfsError) -> Self {
        if source.is_validation() {
            Self::validation(context, source.to_string())
        } else {
            Self::transient(context, source)
        }
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural {
            message: message.into(),
        }
    }

    pub fn pool_not_ready(pool: impl Into<String>) -> Self {
        Self::PoolNotReady { pool: pool.into() }
    }

    pub fn destroy_failed(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DestroyFailed {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn conflict(resource_key: impl Into<String>) -> Self {
        Self::Conflict {
            resource_key: resource_key.into(),
        }
    }

    pub fn api_error(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    pub fn invalid_queue_item(item: impl Into<String>) -> Self {
        Self::InvalidQueueItem { item: item.into() }
    }

    pub fn fatal(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Collapse independent failures: none is `None`, one is itself
    pub fn joined(mut errors: Vec<AgentError>) -> Option<AgentError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple { errors }),
        }
    }

    /// Items failing with a poison error are forgotten instead of requeued
    pub fn is_poison(&self) -> bool {
        match self {
            AgentError::InvalidQueueItem { .. } | AgentError::Validation { .. } => true,
            AgentError::Zfs(e) => e.is_validation(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AgentError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joined() {
        assert!(AgentError::joined(vec![]).is_none());

        let single = AgentError::joined(vec![AgentError::structural("a")]).unwrap();
        assert!(matches!(single, AgentError::Structural { .. }));

        let many = AgentError::joined(vec![
            AgentError::structural("first"),
            AgentError::api_error("second"),
        ])
        .unwrap();
        let msg = many.to_string();
        assert!(msg.starts_with("2 errors"));
        assert!(msg.contains("first"));
        assert!(msg.contains("second"));
    }

    #[test]
    fn test_poison_classification() {
        assert!(AgentError::invalid_queue_item("x").is_poison());
        assert!(AgentError::validation("pool", "no raid groups").is_poison());
        assert!(AgentError::Zfs(ZfsError::invalid_vdev_layout("odd")).is_poison());
        assert!(!AgentError::structural("stale").is_poison());
        assert!(!AgentError::transient("create", ZfsError::command_failed("zfs create", 1, "busy"))
            .is_poison());
        assert!(AgentError::not_found("ns/a").is_not_found());
    }
}
