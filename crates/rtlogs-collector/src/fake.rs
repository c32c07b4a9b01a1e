//! In-memory cluster for exercising the collector without an API server

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use rtlogs_k8s::{ClusterApi, LogStream, LogStreamParams};
use rtlogs_types::{
    ClusterError, HELM_RELEASE_NAME_ANNOTATION, LabelSelector, PodHandle, PodPhase,
    ResourceDescriptor, ResourceKind,
};

use crate::sink::LineSink;

type Chunk = io::Result<Vec<u8>>;

struct FakePod {
    handle: PodHandle,
    labels: BTreeMap<String, String>,
    /// Phases returned by successive `get_pod` calls; the last one sticks
    script: VecDeque<PodPhase>,
    /// `get_pod` reads left before the pod is deleted
    reads_left: Option<usize>,
}

#[derive(Default)]
struct LogChannel {
    tx: Option<mpsc::UnboundedSender<Chunk>>,
    rx: Option<mpsc::UnboundedReceiver<Chunk>>,
}

impl LogChannel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Some(tx),
            rx: Some(rx),
        }
    }
}

/// Decrements the open-stream count when the stream is dropped
struct StreamGuard(Arc<AtomicUsize>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct FakeCluster {
    namespace: String,
    resources: Mutex<Vec<ResourceDescriptor>>,
    pods: Mutex<Vec<FakePod>>,
    logs: Mutex<HashMap<String, LogChannel>>,
    failing_lists: Mutex<HashSet<ResourceKind>>,
    failing_resolves: Mutex<HashSet<String>>,
    vanished: Mutex<HashSet<String>>,
    failing_opens: Mutex<HashSet<String>>,
    opened: Mutex<Vec<String>>,
    last_params: Mutex<Option<LogStreamParams>>,
    open_streams: Arc<AtomicUsize>,
}

impl FakeCluster {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            resources: Mutex::new(Vec::new()),
            pods: Mutex::new(Vec::new()),
            logs: Mutex::new(HashMap::new()),
            failing_lists: Mutex::new(HashSet::new()),
            failing_resolves: Mutex::new(HashSet::new()),
            vanished: Mutex::new(HashSet::new()),
            failing_opens: Mutex::new(HashSet::new()),
            opened: Mutex::new(Vec::new()),
            last_params: Mutex::new(None),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A workload owned by `release`, selecting pods labelled `app=<app>`
    pub fn with_workload(self, kind: ResourceKind, name: &str, release: &str, app: &str) -> Self {
        self.with_resource(
            ResourceDescriptor::new(kind, name.to_string())
                .with_annotation(HELM_RELEASE_NAME_ANNOTATION, release)
                .with_selector(LabelSelector::new().with_label("app", app)),
        )
    }

    pub fn with_resource(self, resource: ResourceDescriptor) -> Self {
        self.resources.lock().push(resource);
        self
    }

    pub fn with_pod(self, name: &str, app: &str, phase: PodPhase) -> Self {
        self.with_scripted_pod(name, app, &[phase])
    }

    /// A pod whose phase advances through `phases` on each re-read
    pub fn with_scripted_pod(self, name: &str, app: &str, phases: &[PodPhase]) -> Self {
        let mut script: VecDeque<PodPhase> = phases.iter().copied().collect();
        let first = script.pop_front().unwrap_or(PodPhase::Unknown);
        if script.is_empty() {
            script.push_back(first);
        }
        let mut handle = PodHandle::new(name.to_string(), self.namespace.clone(), first);
        handle.message = Some(format!("{} message", name));
        handle.reason = Some(format!("{} reason", name));

        self.pods.lock().push(FakePod {
            handle,
            labels: BTreeMap::from([("app".to_string(), app.to_string())]),
            script,
            reads_left: None,
        });
        self
    }

    pub fn failing_list(self, kind: ResourceKind) -> Self {
        self.failing_lists.lock().insert(kind);
        self
    }

    /// Listed, but gone by the time it is fetched
    pub fn vanished(self, resource: &str) -> Self {
        self.vanished.lock().insert(resource.to_string());
        self
    }

    /// Listed, but fetching it fails with a connectivity error
    pub fn failing_resolve(self, resource: &str) -> Self {
        self.failing_resolves.lock().insert(resource.to_string());
        self
    }

    /// The pod is deleted after `reads` successful `get_pod` calls
    pub fn deleted_after(self, pod: &str, reads: usize) -> Self {
        if let Some(p) = self.pods.lock().iter_mut().find(|p| p.handle.name == pod) {
            p.reads_left = Some(reads);
        }
        self
    }

    pub fn failing_open(self, pod: &str) -> Self {
        self.failing_opens.lock().insert(pod.to_string());
        self
    }

    /// Push a chunk onto a pod's log stream
    pub fn push_log(&self, pod: &str, text: &str) {
        self.push_bytes(pod, text.as_bytes());
    }

    pub fn push_bytes(&self, pod: &str, bytes: &[u8]) {
        self.send(pod, Ok(bytes.to_vec()));
    }

    pub fn push_error(&self, pod: &str, err: io::Error) {
        self.send(pod, Err(err));
    }

    /// End a pod's log stream once buffered chunks are read
    pub fn close_log(&self, pod: &str) {
        let mut logs = self.logs.lock();
        logs.entry(pod.to_string()).or_insert_with(LogChannel::new).tx = None;
    }

    fn send(&self, pod: &str, chunk: Chunk) {
        let mut logs = self.logs.lock();
        let channel = logs.entry(pod.to_string()).or_insert_with(LogChannel::new);
        if let Some(tx) = &channel.tx {
            let _ = tx.send(chunk);
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn last_params(&self) -> Option<LogStreamParams> {
        self.last_params.lock().clone()
    }

    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_resources(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<ResourceDescriptor>, ClusterError> {
        if self.failing_lists.lock().contains(&kind) {
            return Err(ClusterError::connectivity("connection refused"));
        }
        if namespace != self.namespace {
            return Ok(Vec::new());
        }
        Ok(self
            .resources
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect())
    }

    async fn get_resource(
        &self,
        kind: ResourceKind,
        _namespace: &str,
        name: &str,
    ) -> Result<ResourceDescriptor, ClusterError> {
        if self.failing_resolves.lock().contains(name) {
            return Err(ClusterError::connectivity("i/o timeout"));
        }
        if self.vanished.lock().contains(name) {
            return Err(ClusterError::not_found(kind.as_str(), name));
        }
        self.resources
            .lock()
            .iter()
            .find(|r| r.kind == kind && r.name == name)
            .cloned()
            .ok_or_else(|| ClusterError::not_found(kind.as_str(), name))
    }

    async fn list_pods(
        &self,
        _namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<PodHandle>, ClusterError> {
        Ok(self
            .pods
            .lock()
            .iter()
            .filter(|p| selector.matches(&p.labels))
            .map(|p| p.handle.clone())
            .collect())
    }

    async fn get_pod(&self, _namespace: &str, name: &str) -> Result<PodHandle, ClusterError> {
        let mut pods = self.pods.lock();
        let pod = pods
            .iter_mut()
            .find(|p| p.handle.name == name)
            .ok_or_else(|| ClusterError::not_found("pod", name))?;

        match pod.reads_left {
            Some(0) => return Err(ClusterError::not_found("pod", name)),
            Some(left) => pod.reads_left = Some(left - 1),
            None => {}
        }

        let next = if pod.script.len() > 1 {
            pod.script.pop_front()
        } else {
            pod.script.front().copied()
        };
        if let Some(phase) = next {
            pod.handle.phase = phase;
        }
        Ok(pod.handle.clone())
    }

    async fn open_log_stream(
        &self,
        _namespace: &str,
        pod: &str,
        params: &LogStreamParams,
    ) -> Result<LogStream, ClusterError> {
        *self.last_params.lock() = Some(params.clone());
        self.opened.lock().push(pod.to_string());

        if self.failing_opens.lock().contains(pod) {
            return Err(ClusterError::connectivity("container is waiting to start"));
        }

        let rx = self
            .logs
            .lock()
            .entry(pod.to_string())
            .or_insert_with(LogChannel::new)
            .rx
            .take()
            .ok_or_else(|| ClusterError::connectivity(format!("stream for {} already open", pod)))?;

        self.open_streams.fetch_add(1, Ordering::SeqCst);
        let guard = StreamGuard(Arc::clone(&self.open_streams));

        Ok(stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|chunk| (chunk, (rx, guard)))
        })
        .boxed())
    }
}

/// Collects written lines for assertions
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Poll until at least `count` lines were written
    pub async fn wait_for(&self, count: usize) -> Vec<String> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let lines = self.lines();
                if lines.len() >= count {
                    return lines;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for log lines")
    }
}

impl LineSink for MemorySink {
    fn write_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}
