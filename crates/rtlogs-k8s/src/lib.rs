//! Kubernetes client for helm-rtlogs
//!
//! This crate provides the cluster API the collection engine runs against:
//! workload discovery, pod lookup, log streams, and Helm release lookup.

mod api;
mod client;
mod release;

pub use api::{ClusterApi, LogStream, LogStreamParams};
pub use client::KubeClient;
pub use release::{HelmDriver, ReleaseLocator, ReleaseLookup};

// Re-export types that are used in our public API
pub use rtlogs_types::{
    ClusterError, LabelSelector, PodHandle, PodPhase, ReleaseTarget, ResourceDescriptor,
    ResourceKind,
};
