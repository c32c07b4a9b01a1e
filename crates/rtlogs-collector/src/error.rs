use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use thiserror::Error;

use rtlogs_types::{ClusterError, ResourceKind};

/// Errors raised while collecting logs
///
/// Only `Discovery` ends a run; the rest are reported and confined to the
/// pod or resource they concern.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to list {kind}s in namespace '{namespace}'")]
    Discovery {
        kind: ResourceKind,
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to open log stream for pod '{pod}'")]
    StreamOpen {
        pod: String,
        #[source]
        source: ClusterError,
    },

    #[error("log stream for pod '{pod}' failed")]
    StreamRead {
        pod: String,
        #[source]
        source: io::Error,
    },

    #[error("pod '{pod}' not Running after {waited:?} (message: {message:?}, reason: {reason:?})")]
    ReadinessTimeout {
        pod: String,
        waited: Duration,
        message: String,
        reason: String,
    },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Render an error with all of its sources, `outer: inner: root`
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
