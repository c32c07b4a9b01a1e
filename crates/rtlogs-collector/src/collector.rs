//! Collection orchestrator
//!
//! Discovers the release's workloads, resolves their pods, and runs one
//! task per pod (readiness gate, phase filter, tailer). The run ends only
//! when the shared cancellation signal fires.

use std::sync::Arc;

use futures::future::try_join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{CollectError, error_chain};
use crate::filter::filter_by_annotation;
use crate::readiness::{Readiness, passes_phase_filter, wait_until_ready};
use crate::resolver::get_pods_for_resource;
use crate::sink::LineSink;
use crate::state::{RunState, StopReason};
use crate::tailer::{TailTarget, tail_pod};
use rtlogs_k8s::ClusterApi;
use rtlogs_types::{CollectionOptions, PodHandle, ReleaseTarget, ResourceKind};

/// Result of a finished run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectSummary {
    pub stop_reason: Option<StopReason>,
    /// Pods handed to a tailer
    pub pods_tailed: usize,
}

/// Tails every pod of one release
pub struct Collector<C: ?Sized> {
    api: Arc<C>,
    release: ReleaseTarget,
    opts: Arc<CollectionOptions>,
    sink: Arc<dyn LineSink>,
    state: Arc<RunState>,
}

impl<C> Collector<C>
where
    C: ClusterApi + ?Sized + 'static,
{
    pub fn new(
        api: Arc<C>,
        release: ReleaseTarget,
        opts: CollectionOptions,
        sink: Arc<dyn LineSink>,
    ) -> Self {
        Self {
            api,
            release,
            opts: Arc::new(opts),
            sink,
            state: Arc::new(RunState::new()),
        }
    }

    /// Shared run state, used to stop the run from outside
    pub fn state(&self) -> Arc<RunState> {
        Arc::clone(&self.state)
    }

    /// Run until the cancellation signal fires
    ///
    /// Returns early with [`CollectError::Discovery`] if any workload kind
    /// cannot be listed. Failures confined to one workload or one pod are
    /// logged and skipped.
    pub async fn collect(&self) -> Result<CollectSummary, CollectError> {
        self.arm_stop_timeout();

        let matched = match self.discover().await {
            Ok(matched) => matched,
            Err(e) => {
                self.state.trigger(StopReason::Aborted);
                return Err(e);
            }
        };

        let mut tasks = Vec::new();
        for (kind, names) in matched {
            for name in names {
                tasks.extend(self.launch_resource(kind, &name).await);
            }
        }
        debug!(tasks = tasks.len(), "Launched pod tasks");

        for task in tasks {
            if let Err(e) = task.await
                && e.is_panic()
            {
                error!(error = %e, "Pod task panicked");
            }
        }

        if !self.state.found_any() {
            info!(
                release = %self.release.name,
                namespace = %self.release.namespace,
                "No pods found for release"
            );
            self.state.trigger(StopReason::NoPods);
        }

        self.state.cancelled().await;

        let summary = CollectSummary {
            stop_reason: self.state.stop_reason().cloned(),
            pods_tailed: self.state.tailed_count(),
        };
        if let Some(reason) = &summary.stop_reason {
            info!(%reason, pods = summary.pods_tailed, "Collection stopped");
        }
        Ok(summary)
    }

    fn arm_stop_timeout(&self) {
        let Some(timeout) = self.opts.stop_timeout else {
            return;
        };

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::select! {
                _ = state.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    info!("Stop timeout of {:?} reached", timeout);
                    state.trigger(StopReason::Timeout);
                }
            }
        });
    }

    /// List every workload kind and keep the names owned by the release
    async fn discover(&self) -> Result<Vec<(ResourceKind, Vec<String>)>, CollectError> {
        try_join_all(ResourceKind::ALL.map(|kind| self.discover_kind(kind))).await
    }

    async fn discover_kind(
        &self,
        kind: ResourceKind,
    ) -> Result<(ResourceKind, Vec<String>), CollectError> {
        let namespace = &self.release.namespace;
        let resources = self
            .api
            .list_resources(kind, namespace)
            .await
            .map_err(|source| CollectError::Discovery {
                kind,
                namespace: namespace.clone(),
                source,
            })?;

        let names = filter_by_annotation(
            &resources,
            &self.release.ownership_key,
            &self.release.ownership_value,
        );
        debug!(%kind, listed = resources.len(), matched = ?names, "Discovered workloads");

        Ok((kind, names))
    }

    /// Resolve one workload's pods and start a task for each
    async fn launch_resource(&self, kind: ResourceKind, name: &str) -> Vec<JoinHandle<()>> {
        let namespace = &self.release.namespace;
        let pods = match get_pods_for_resource(self.api.as_ref(), namespace, kind, name).await {
            Ok(pods) => pods,
            Err(e) if e.is_not_found() => {
                debug!(%kind, resource = name, "Workload disappeared before resolving, skipping");
                return Vec::new();
            }
            Err(e) => {
                warn!(%kind, resource = name, error = %error_chain(&e), "Failed to resolve pods");
                return Vec::new();
            }
        };

        pods.into_iter()
            .map(|pod| self.spawn_pod(kind, name, pod))
            .collect()
    }

    fn spawn_pod(&self, kind: ResourceKind, resource: &str, pod: PodHandle) -> JoinHandle<()> {
        let api = Arc::clone(&self.api);
        let opts = Arc::clone(&self.opts);
        let sink = Arc::clone(&self.sink);
        let state = Arc::clone(&self.state);
        let resource = resource.to_string();

        tokio::spawn(async move {
            let pod_name = pod.name.clone();

            let ready = wait_until_ready(
                api.as_ref(),
                pod,
                opts.readiness,
                opts.poll_interval,
                state.token(),
            )
            .await;
            let pod = match ready {
                Ok(Readiness::Ready(pod)) => pod,
                Ok(Readiness::Cancelled) => return,
                Err(e) => {
                    warn!(pod = %pod_name, error = %error_chain(&e), "Giving up on pod");
                    return;
                }
            };

            if !passes_phase_filter(&opts, &pod) {
                debug!(pod = %pod.name, phase = %pod.phase, "Skipping pod, only tailing failed pods");
                return;
            }

            state.record_tailed();
            let target = TailTarget {
                kind,
                resource,
                pod,
            };

            match tail_pod(api.as_ref(), &target, &opts, &state, sink.as_ref()).await {
                Ok(outcome) => debug!(pod = %pod_name, ?outcome, "Tailer finished"),
                Err(e) => warn!(pod = %pod_name, error = %error_chain(&e), "Tailer stopped"),
            }
        })
    }
}
