//! Follow-mode log tailing for a single pod

use std::borrow::Cow;

use futures::{FutureExt, StreamExt};
use tracing::{debug, info, warn};

use crate::error::CollectError;
use crate::sink::{LineSink, format_line};
use crate::state::{RunState, StopReason};
use rtlogs_k8s::{ClusterApi, LogStreamParams};
use rtlogs_types::{CollectionOptions, PodHandle, PodPhase, ResourceKind};

/// A pod together with the workload it is attributed to
#[derive(Clone, Debug)]
pub struct TailTarget {
    pub kind: ResourceKind,
    pub resource: String,
    pub pod: PodHandle,
}

/// How a tailer finished
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TailOutcome {
    /// The run was cancelled
    Cancelled,
    /// This pod logged the stop string and cancelled the run
    StopStringMatched,
    /// The server closed the stream
    StreamEnded,
}

/// Stream one pod's log into the sink until the run is cancelled, the stop
/// string shows up, or the stream ends
///
/// Each chunk read is emitted as one attributed line. Chunks are decoded
/// independently, so a multi-byte character or a line split across two
/// reads comes out split across two emitted lines.
///
/// Stream errors end this tailer only; they never cancel the run and are
/// never retried. On cancellation, chunks already received from the server
/// are still written before returning. The stream is dropped, and its
/// connection released, on every return path.
pub async fn tail_pod<C>(
    api: &C,
    target: &TailTarget,
    opts: &CollectionOptions,
    state: &RunState,
    sink: &dyn LineSink,
) -> Result<TailOutcome, CollectError>
where
    C: ClusterApi + ?Sized,
{
    let pod = &target.pod;

    // Logs of terminated containers may still be retrievable, so the open is
    // attempted anyway
    if matches!(pod.phase, PodPhase::Failed | PodPhase::Unknown) {
        warn!(
            pod = %pod.name,
            phase = %pod.phase,
            message = pod.message(),
            reason = pod.reason(),
            "Pod is not healthy, trying its logs anyway"
        );
    }

    let params = LogStreamParams {
        follow: true,
        since: opts.since,
        container: opts.container.clone(),
    };

    let mut stream = tokio::select! {
        biased;
        _ = state.cancelled() => return Ok(TailOutcome::Cancelled),
        opened = api.open_log_stream(&pod.namespace, &pod.name, &params) => {
            opened.map_err(|source| CollectError::StreamOpen {
                pod: pod.name.clone(),
                source,
            })?
        }
    };
    debug!(pod = %pod.name, kind = %target.kind, resource = %target.resource, "Log stream opened");

    loop {
        tokio::select! {
            biased;

            _ = state.cancelled() => {
                // Anything already buffered was read before the cancel
                while let Some(Some(Ok(bytes))) = stream.next().now_or_never() {
                    write_chunk(target, sink, &bytes);
                }
                return Ok(TailOutcome::Cancelled);
            }

            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        if bytes.is_empty() {
                            continue;
                        }
                        let text = write_chunk(target, sink, &bytes);

                        if let Some(stop) = opts.stop_string.as_deref()
                            && text.contains(stop)
                        {
                            info!(pod = %pod.name, stop_string = stop, "Stop string found");
                            state.trigger(StopReason::StopString {
                                pod: pod.name.clone(),
                            });
                            return Ok(TailOutcome::StopStringMatched);
                        }
                    }
                    Some(Err(source)) => {
                        return Err(CollectError::StreamRead {
                            pod: pod.name.clone(),
                            source,
                        });
                    }
                    None => {
                        debug!(pod = %pod.name, "Log stream closed");
                        return Ok(TailOutcome::StreamEnded);
                    }
                }
            }
        }
    }
}

fn write_chunk<'a>(target: &TailTarget, sink: &dyn LineSink, bytes: &'a [u8]) -> Cow<'a, str> {
    let text = String::from_utf8_lossy(bytes);
    if !text.is_empty() {
        sink.write_line(&format_line(
            target.kind,
            &target.resource,
            &target.pod.name,
            target.pod.phase,
            &text,
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeCluster, MemorySink};
    use std::io;
    use std::sync::Arc;
    use std::time::Duration;

    fn target(name: &str, phase: PodPhase) -> TailTarget {
        TailTarget {
            kind: ResourceKind::Deployment,
            resource: "api".to_string(),
            pod: PodHandle::new(name.to_string(), "ns".to_string(), phase),
        }
    }

    #[tokio::test]
    async fn test_emits_attributed_chunks_until_stream_ends() {
        let cluster = FakeCluster::new("ns");
        let sink = MemorySink::default();
        let state = RunState::new();
        let opts = CollectionOptions::default().with_since(Duration::from_secs(30));

        cluster.push_log("api-1", "hello\n");
        cluster.push_log("api-1", "world\n");
        cluster.close_log("api-1");

        let outcome = tail_pod(
            &cluster,
            &target("api-1", PodPhase::Running),
            &opts,
            &state,
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(outcome, TailOutcome::StreamEnded);
        assert_eq!(
            sink.lines(),
            vec![
                "[deployment][api][api-1][Running] hello",
                "[deployment][api][api-1][Running] world",
            ]
        );
        assert!(!state.is_cancelled());
        assert_eq!(cluster.open_streams(), 0);

        let params = cluster.last_params().unwrap();
        assert!(params.follow);
        assert_eq!(params.since, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_stop_string_cancels_the_run() {
        let cluster = FakeCluster::new("ns");
        let sink = MemorySink::default();
        let state = RunState::new();
        let opts = CollectionOptions::default().with_stop_string("migration done");

        cluster.push_log("api-1", "starting\n");
        cluster.push_log("api-1", "migration done\n");
        cluster.push_log("api-1", "never read\n");

        let outcome = tail_pod(
            &cluster,
            &target("api-1", PodPhase::Running),
            &opts,
            &state,
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(outcome, TailOutcome::StopStringMatched);
        assert_eq!(sink.lines().len(), 2);
        assert_eq!(
            state.stop_reason(),
            Some(&StopReason::StopString {
                pod: "api-1".to_string()
            })
        );
        assert_eq!(cluster.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_read_error_ends_only_this_tailer() {
        let cluster = FakeCluster::new("ns");
        let sink = MemorySink::default();
        let state = RunState::new();

        cluster.push_log("api-1", "partial");
        cluster.push_error("api-1", io::Error::new(io::ErrorKind::ConnectionReset, "reset"));

        let err = tail_pod(
            &cluster,
            &target("api-1", PodPhase::Running),
            &CollectionOptions::default(),
            &state,
            &sink,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CollectError::StreamRead { ref pod, .. } if pod == "api-1"));
        assert_eq!(sink.lines(), vec!["[deployment][api][api-1][Running] partial"]);
        assert!(!state.is_cancelled());
        assert_eq!(cluster.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_failed_pod_is_still_attempted() {
        let cluster = FakeCluster::new("ns").failing_open("api-1");
        let sink = MemorySink::default();
        let state = RunState::new();

        let err = tail_pod(
            &cluster,
            &target("api-1", PodPhase::Failed),
            &CollectionOptions::default(),
            &state,
            &sink,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CollectError::StreamOpen { .. }));
        assert_eq!(cluster.opened(), vec!["api-1"]);
        assert!(!state.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancellation_releases_the_stream() {
        let cluster = Arc::new(FakeCluster::new("ns"));
        let sink = Arc::new(MemorySink::default());
        let state = Arc::new(RunState::new());

        let task = {
            let cluster = Arc::clone(&cluster);
            let sink = Arc::clone(&sink);
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                tail_pod(
                    cluster.as_ref(),
                    &target("api-1", PodPhase::Running),
                    &CollectionOptions::default(),
                    &state,
                    sink.as_ref(),
                )
                .await
            })
        };

        cluster.push_log("api-1", "line\n");
        sink.wait_for(1).await;
        assert_eq!(cluster.open_streams(), 1);

        state.trigger(StopReason::Interrupted);
        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("tailer did not observe cancellation")
            .unwrap()
            .unwrap();

        assert_eq!(outcome, TailOutcome::Cancelled);
        assert_eq!(cluster.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_buffered_chunks_written_on_cancel() {
        let cluster = Arc::new(FakeCluster::new("ns"));
        let sink = Arc::new(MemorySink::default());
        let state = Arc::new(RunState::new());

        let task = {
            let cluster = Arc::clone(&cluster);
            let sink = Arc::clone(&sink);
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                tail_pod(
                    cluster.as_ref(),
                    &target("api-1", PodPhase::Running),
                    &CollectionOptions::default(),
                    &state,
                    sink.as_ref(),
                )
                .await
            })
        };

        cluster.push_log("api-1", "first\n");
        sink.wait_for(1).await;

        // Queued and cancelled without yielding, so the tailer sees the
        // cancel before it reads either chunk
        cluster.push_log("api-1", "second\n");
        cluster.push_log("api-1", "third\n");
        state.trigger(StopReason::Interrupted);

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("tailer did not observe cancellation")
            .unwrap()
            .unwrap();

        assert_eq!(outcome, TailOutcome::Cancelled);
        assert_eq!(
            sink.lines(),
            vec![
                "[deployment][api][api-1][Running] first",
                "[deployment][api][api-1][Running] second",
                "[deployment][api][api-1][Running] third",
            ]
        );
        assert_eq!(cluster.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_opens() {
        let cluster = FakeCluster::new("ns");
        let sink = MemorySink::default();
        let state = RunState::new();
        state.trigger(StopReason::Timeout);

        let outcome = tail_pod(
            &cluster,
            &target("api-1", PodPhase::Running),
            &CollectionOptions::default(),
            &state,
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(outcome, TailOutcome::Cancelled);
        assert!(cluster.opened().is_empty());
    }

    #[tokio::test]
    async fn test_chunks_are_decoded_independently() {
        let cluster = FakeCluster::new("ns");
        let sink = MemorySink::default();
        let state = RunState::new();

        // "é" split across two reads
        let bytes = "caf\u{e9}".as_bytes();
        cluster.push_bytes("api-1", &bytes[..4]);
        cluster.push_bytes("api-1", &bytes[4..]);
        cluster.close_log("api-1");

        tail_pod(
            &cluster,
            &target("api-1", PodPhase::Running),
            &CollectionOptions::default(),
            &state,
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(
            sink.lines(),
            vec![
                "[deployment][api][api-1][Running] caf\u{fffd}",
                "[deployment][api][api-1][Running] \u{fffd}",
            ]
        );
    }
}
