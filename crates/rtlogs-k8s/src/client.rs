//! Kubernetes client for helm-rtlogs

use std::fmt::Debug;
use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncReadExt};
use futures::stream::{self, StreamExt};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as meta;
use kube::api::{ListParams, LogParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::api::{ClusterApi, LogStream, LogStreamParams};
use rtlogs_types::{
    ClusterError, LabelSelector, PodHandle, PodPhase, ResourceDescriptor, ResourceKind,
    SelectorOperator, SelectorRequirement,
};

/// Bytes requested per read from a log stream
const READ_BUFFER_SIZE: usize = 2000;

/// Chunks buffered between the reader task and the consumer
const CHUNK_QUEUE: usize = 16;

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct KubeClient {
    client: kube::Client,
}

impl KubeClient {
    /// Connect using a kubeconfig file and context
    ///
    /// Without an explicit path the standard `KUBECONFIG` / `~/.kube/config`
    /// resolution applies; without a context the current one is used.
    pub async fn connect(context: Option<&str>, kubeconfig: Option<&Path>) -> Result<Self> {
        let kubeconfig = match kubeconfig {
            Some(path) => Kubeconfig::read_from(path)
                .context(format!("Failed to read kubeconfig {}", path.display()))?,
            None => Kubeconfig::read().context("Failed to read kubeconfig. Is kubectl configured?")?,
        };

        let config = kube::Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions {
                context: context.map(str::to_string),
                ..Default::default()
            },
        )
        .await
        .context(format!(
            "Failed to create config for context: {}",
            context.unwrap_or("<current>")
        ))?;

        let client = kube::Client::try_from(config).context("Failed to create Kubernetes client")?;

        Ok(Self { client })
    }

    /// The underlying client, for collaborators such as release lookup
    pub fn client(&self) -> &kube::Client {
        &self.client
    }

    async fn list_workloads<K: Workload>(
        &self,
        namespace: &str,
    ) -> Result<Vec<ResourceDescriptor>, ClusterError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| list_error(namespace, e))?;

        Ok(list.items.into_iter().map(|w| workload_to_descriptor(&w)).collect())
    }

    async fn get_workload<K: Workload>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ResourceDescriptor, ClusterError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let workload = api
            .get(name)
            .await
            .map_err(|e| map_kube_error(K::KIND.as_str(), name, e))?;

        Ok(workload_to_descriptor(&workload))
    }
}

#[async_trait]
impl ClusterApi for KubeClient {
    async fn list_resources(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<ResourceDescriptor>, ClusterError> {
        match kind {
            ResourceKind::Deployment => self.list_workloads::<Deployment>(namespace).await,
            ResourceKind::StatefulSet => self.list_workloads::<StatefulSet>(namespace).await,
            ResourceKind::DaemonSet => self.list_workloads::<DaemonSet>(namespace).await,
        }
    }

    async fn get_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<ResourceDescriptor, ClusterError> {
        match kind {
            ResourceKind::Deployment => self.get_workload::<Deployment>(namespace, name).await,
            ResourceKind::StatefulSet => self.get_workload::<StatefulSet>(namespace, name).await,
            ResourceKind::DaemonSet => self.get_workload::<DaemonSet>(namespace, name).await,
        }
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<PodHandle>, ClusterError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let label_selector = selector.to_query();
        debug!(namespace, selector = %label_selector, "Listing pods");

        let list = pods
            .list(&ListParams::default().labels(&label_selector))
            .await
            .map_err(|e| list_error(namespace, e))?;

        Ok(list
            .items
            .into_iter()
            .map(|pod| pod_to_handle(pod, namespace))
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodHandle, ClusterError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods
            .get(name)
            .await
            .map_err(|e| map_kube_error("pod", name, e))?;

        Ok(pod_to_handle(pod, namespace))
    }

    async fn open_log_stream(
        &self,
        namespace: &str,
        pod: &str,
        params: &LogStreamParams,
    ) -> Result<LogStream, ClusterError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let log_params = LogParams {
            follow: params.follow,
            container: params.container.clone(),
            since_seconds: params.since.map(since_seconds),
            ..Default::default()
        };

        let (opened_tx, opened_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE);
        let pod_name = pod.to_string();

        // The reader lives in its own task so the returned stream owns
        // nothing borrowed from this call
        tokio::spawn(async move {
            let stream = match pods.log_stream(&pod_name, &log_params).await {
                Ok(stream) => {
                    let _ = opened_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = opened_tx.send(Err(map_kube_error("pod", &pod_name, e)));
                    return;
                }
            };
            futures::pin_mut!(stream);
            forward_chunks(stream, chunk_tx).await;
        });

        match opened_rx.await {
            Ok(Ok(())) => Ok(receiver_stream(chunk_rx)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ClusterError::connectivity(format!(
                "log stream task for pod '{}' exited before opening",
                pod
            ))),
        }
    }
}

/// Pump reads from the server into the channel until EOF, a read error,
/// or the receiving side is dropped
async fn forward_chunks<R>(mut reader: R, tx: mpsc::Sender<io::Result<Vec<u8>>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = tx.closed() => break,

            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Ok(buf[..n].to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        }
    }
}

fn receiver_stream(rx: mpsc::Receiver<io::Result<Vec<u8>>>) -> LogStream {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|chunk| (chunk, rx)) }).boxed()
}

/// Workload controllers whose pods are found through `spec.selector`
trait Workload:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const KIND: ResourceKind;

    fn selector(&self) -> Option<&meta::LabelSelector>;
}

impl Workload for Deployment {
    const KIND: ResourceKind = ResourceKind::Deployment;

    fn selector(&self) -> Option<&meta::LabelSelector> {
        self.spec.as_ref().map(|s| &s.selector)
    }
}

impl Workload for StatefulSet {
    const KIND: ResourceKind = ResourceKind::StatefulSet;

    fn selector(&self) -> Option<&meta::LabelSelector> {
        self.spec.as_ref().map(|s| &s.selector)
    }
}

impl Workload for DaemonSet {
    const KIND: ResourceKind = ResourceKind::DaemonSet;

    fn selector(&self) -> Option<&meta::LabelSelector> {
        self.spec.as_ref().map(|s| &s.selector)
    }
}

fn workload_to_descriptor<K: Workload>(workload: &K) -> ResourceDescriptor {
    let mut descriptor = ResourceDescriptor::new(K::KIND, workload.name_any());
    descriptor.annotations = workload.annotations().clone();
    if let Some(selector) = workload.selector() {
        descriptor.selector = convert_selector(selector);
    }
    descriptor
}

/// An unknown operator empties the selector, so the workload is skipped
/// rather than matched too widely
fn convert_selector(selector: &meta::LabelSelector) -> LabelSelector {
    let mut converted = LabelSelector {
        match_labels: selector.match_labels.clone().unwrap_or_default(),
        match_expressions: Vec::new(),
    };

    for req in selector.match_expressions.iter().flatten() {
        match req.operator.parse::<SelectorOperator>() {
            Ok(operator) => converted.match_expressions.push(SelectorRequirement::new(
                req.key.clone(),
                operator,
                req.values.clone().unwrap_or_default(),
            )),
            Err(e) => {
                warn!(key = %req.key, error = %e, "Unsupported selector requirement");
                return LabelSelector::default();
            }
        }
    }

    converted
}

fn pod_to_handle(pod: Pod, namespace: &str) -> PodHandle {
    let name = pod.metadata.name.unwrap_or_default();
    let mut handle = PodHandle::new(name, namespace.to_string(), PodPhase::Unknown);

    if let Some(status) = pod.status {
        handle.phase = status
            .phase
            .as_deref()
            .map(PodPhase::from)
            .unwrap_or(PodPhase::Unknown);
        handle.message = status.message;
        handle.reason = status.reason;
    }

    handle
}

/// The API only takes whole seconds; sub-second windows round up
fn since_seconds(since: Duration) -> i64 {
    i64::try_from(since.as_secs().max(1)).unwrap_or(i64::MAX)
}

/// A list only 404s when its namespace is missing
fn list_error(namespace: &str, err: kube::Error) -> ClusterError {
    map_kube_error("namespace", namespace, err)
}

/// 404s become `NotFound`, everything else is a connectivity problem
pub(crate) fn map_kube_error(kind: &str, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::not_found(kind, name),
        other => ClusterError::connectivity(other),
    }
}
