use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use rtlogs_types::{ClusterError, LabelSelector, PodHandle, ResourceDescriptor, ResourceKind};

/// Raw chunks of a pod's log, in the order the API server pushed them
///
/// The stream ends when the server closes the connection. Dropping it
/// releases the underlying connection.
pub type LogStream = BoxStream<'static, io::Result<Vec<u8>>>;

/// Options applied when a log stream is opened
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogStreamParams {
    /// Keep the stream open and receive new output as it is written
    pub follow: bool,
    /// Only return logs newer than this
    pub since: Option<Duration>,
    pub container: Option<String>,
}

/// The subset of the Kubernetes API the collector needs
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List every workload of `kind` in a namespace
    async fn list_resources(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<ResourceDescriptor>, ClusterError>;

    /// Fetch a single workload by name
    async fn get_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<ResourceDescriptor, ClusterError>;

    /// List pods matching a label selector
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<PodHandle>, ClusterError>;

    /// Re-read a pod to observe its current phase
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodHandle, ClusterError>;

    async fn open_log_stream(
        &self,
        namespace: &str,
        pod: &str,
        params: &LogStreamParams,
    ) -> Result<LogStream, ClusterError>;
}
