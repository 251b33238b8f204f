// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

//! Typed drivers for the `zpool` and `zfs` command line tools
//!
//! Every builder renders an argument vector with `build()` and runs it through a
//! [`CommandRunner`] with `execute()`. Nothing outside this crate constructs argv
//! or parses command output.

pub mod error;
pub mod mock;
pub mod pipeline;
pub mod runner;
pub mod topology;
pub mod zfs;
pub mod zpool;

pub use error::{Result, ZfsError};
pub use mock::MockRunner;
pub use pipeline::{split_endpoint, ReceivePipeline, SendPipeline, PIPELINE_HELPER};
pub use runner::{exec, CommandOutput, CommandRunner, SystemRunner, ZfsCommand, ZFS, ZPOOL};
pub use topology::{strip_partition_suffix, ScanFunc, ScanState, Topology, Vdev, VdevTree};
pub use zfs::{
    VolumeClone, VolumeCreate, VolumeDestroy, VolumeGetProperty, VolumeReceive, VolumeRename,
    VolumeRollback, VolumeSend, VolumeSnapshot,
};
pub use zpool::{
    parse_pool_status, DeviceClass, PoolCreate, PoolDestroy, PoolDiskReplace, PoolDump,
    PoolExpansion, PoolGetProperty, PoolImport, PoolLabelClear, PoolRemove, PoolSetProperty,
    PoolStatus,
};
