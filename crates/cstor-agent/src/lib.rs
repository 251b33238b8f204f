// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

//! Reconciliation core of the cStor pool management agent
//!
//! Informers feed rate-limited workqueues; one worker per controller pulls
//! `(key, operation)` loads and hands them to a [`Reconciler`]. The pool
//! controller and the replica controller share a [`PoolCoordination`] that
//! serialises ZFS work and publishes the import state.

pub mod agent;
pub mod api_client;
pub mod config;
pub mod controller;
pub mod controllers;
pub mod error;
pub mod events;
pub mod gates;
pub mod informer;
pub mod predicates;
pub mod sync;
pub mod transfer;
pub mod workqueue;

pub use agent::{Agent, ResourceApis};
pub use api_client::{ApiClient, MockApi, ResourceApi};
pub use config::{client_config, AgentConfig};
pub use controller::{Controller, QueueLoad, QueueOperation, Reconciler};
pub use controllers::{BackupReconciler, PoolReconciler, ReplicaReconciler, RestoreReconciler};
pub use error::{AgentError, Result};
pub use events::{ApiEventRecorder, EventRecorder, MemoryEventRecorder, RecordedEvent};
pub use informer::{EventHandler, Informer};
pub use sync::PoolCoordination;
pub use workqueue::RateLimitingQueue;
