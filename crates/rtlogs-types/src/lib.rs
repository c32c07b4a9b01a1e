//! Shared types for helm-rtlogs
//!
//! This crate contains the data model used by the cluster client and the
//! collection engine. It has no dependency on a Kubernetes client so the
//! engine can be exercised against an in-memory cluster.

mod error;
mod selector;

pub use error::{BoxError, ClusterError};
pub use selector::{LabelSelector, SelectorOperator, SelectorRequirement};

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Annotation Helm puts on every resource it manages.
pub const HELM_RELEASE_NAME_ANNOTATION: &str = "meta.helm.sh/release-name";

// ============================================================================
// Release
// ============================================================================

/// The release whose pods are tailed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseTarget {
    pub name: String,
    pub namespace: String,
    pub ownership_key: String,
    pub ownership_value: String,
}

impl ReleaseTarget {
    pub fn new(
        name: String,
        namespace: String,
        ownership_key: String,
        ownership_value: String,
    ) -> Self {
        Self {
            name,
            namespace,
            ownership_key,
            ownership_value,
        }
    }

    /// A Helm release is owned through the `meta.helm.sh/release-name` annotation
    pub fn helm(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            ownership_value: name.clone(),
            name,
            namespace: namespace.into(),
            ownership_key: HELM_RELEASE_NAME_ANNOTATION.to_string(),
        }
    }
}

// ============================================================================
// Workload Resources
// ============================================================================

/// Controller kinds that own pods through a label selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl ResourceKind {
    /// Every kind, in discovery order
    pub const ALL: [ResourceKind; 3] = [Self::Deployment, Self::StatefulSet, Self::DaemonSet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::StatefulSet => "statefulset",
            Self::DaemonSet => "daemonset",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workload as seen during one discovery pass
#[derive(Clone, Debug)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    pub selector: LabelSelector,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, name: String) -> Self {
        Self {
            kind,
            name,
            annotations: BTreeMap::new(),
            selector: LabelSelector::default(),
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_selector(mut self, selector: LabelSelector) -> Self {
        self.selector = selector;
        self
    }
}

// ============================================================================
// Pods
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

impl From<&str> for PodPhase {
    fn from(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a pod's identity and status
///
/// Never updated in place: the readiness gate re-reads the pod from the
/// cluster to observe phase transitions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodHandle {
    pub name: String,
    pub namespace: String,
    pub phase: PodPhase,
    pub message: Option<String>,
    pub reason: Option<String>,
}

impl PodHandle {
    pub fn new(name: String, namespace: String, phase: PodPhase) -> Self {
        Self {
            name,
            namespace,
            phase,
            message: None,
            reason: None,
        }
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

// ============================================================================
// Collection Options
// ============================================================================

/// Default interval between readiness checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Default time a pod may take to reach Running under [`ReadinessPolicy::UntilRunning`]
pub const DEFAULT_READINESS_BUDGET: Duration = Duration::from_secs(60);

/// How long the readiness gate holds a pod back before tailing it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReadinessPolicy {
    /// Wait while the pod is Pending, then hand it off whatever its phase
    #[default]
    UntilNotPending,
    /// Wait for Running; give up once `budget` worth of checks have passed
    UntilRunning { budget: Duration },
}

/// Options for one collection run
#[derive(Clone, Debug)]
pub struct CollectionOptions {
    /// Cancel the run after this long
    pub stop_timeout: Option<Duration>,
    /// Cancel the run once any pod logs this text
    pub stop_string: Option<String>,
    /// Only stream logs newer than this
    pub since: Option<Duration>,
    /// Only tail pods that are not Running
    pub only_failed: bool,
    pub readiness: ReadinessPolicy,
    pub poll_interval: Duration,
    /// Container to stream (pod default when unset)
    pub container: Option<String>,
    pub debug: bool,
}

impl CollectionOptions {
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = non_zero(timeout);
        self
    }

    pub fn with_stop_string(mut self, stop_string: impl Into<String>) -> Self {
        let stop_string = stop_string.into();
        self.stop_string = (!stop_string.is_empty()).then_some(stop_string);
        self
    }

    pub fn with_since(mut self, since: Duration) -> Self {
        self.since = non_zero(since);
        self
    }

    pub fn with_only_failed(mut self, only_failed: bool) -> Self {
        self.only_failed = only_failed;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_container(mut self, container: Option<String>) -> Self {
        self.container = container.filter(|c| !c.is_empty());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            stop_timeout: None,
            stop_string: None,
            since: None,
            only_failed: false,
            readiness: ReadinessPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            container: None,
            debug: false,
        }
    }
}

/// Zero means "disabled" for every duration option
fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}
