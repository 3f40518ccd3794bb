//! Two-tier artifact cache: per-resource locking, cluster-advisory
//! coordination, dual-output streaming and the miss-path copy protocol.
//!
//! Module layout mirrors the component breakdown: [`key`] (C1),
//! [`mutex_registry`] (C2), [`file_lock`] (C3), [`lock_coordinator`] (C4+C5),
//! [`dual_stream`] (C6), [`copy_task`] (C7), [`provider`] (C8),
//! [`expiration`] (C9), [`stream_registry`] (C10). [`collaborators`] holds
//! the external contracts everything else is built against.

pub mod collaborators;
pub mod copy_task;
pub mod dual_stream;
pub mod expiration;
pub mod file_lock;
pub mod key;
pub mod lock_coordinator;
pub mod mutex_registry;
pub mod provider;
pub mod stream_registry;

pub use collaborators::{
    DefaultPathGenerator, InMemoryOwnershipMap, LocalCacheProvider, LockLevel, OwnershipMap,
    PathGenerator, Resource, TxId, TxStatus,
};
pub use provider::{CacheOutputStream, CacheProvider};
