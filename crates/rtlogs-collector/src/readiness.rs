//! Pod readiness gate
//!
//! Holds a pod back until it is worth tailing. The pod is re-read from the
//! cluster on every tick; the local copy is never patched.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CollectError;
use rtlogs_k8s::ClusterApi;
use rtlogs_types::{CollectionOptions, PodHandle, PodPhase, ReadinessPolicy};

#[derive(Debug, PartialEq, Eq)]
pub enum Readiness {
    /// Hand the pod, as last read, to a tailer
    Ready(PodHandle),
    /// The run was cancelled while waiting
    Cancelled,
}

/// Wait until `pod` satisfies `policy`, checking every `interval`
///
/// Under [`ReadinessPolicy::UntilRunning`] the pod is given up on after
/// `budget / interval` checks, with its last reported message and reason
/// in the returned [`CollectError::ReadinessTimeout`]. Under
/// [`ReadinessPolicy::UntilNotPending`] the wait is unbounded and only
/// cancellation ends it early.
pub async fn wait_until_ready<C>(
    api: &C,
    pod: PodHandle,
    policy: ReadinessPolicy,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<Readiness, CollectError>
where
    C: ClusterApi + ?Sized,
{
    let mut pod = pod;
    let mut checks: u32 = 0;

    loop {
        if admits(policy, pod.phase) {
            return Ok(Readiness::Ready(pod));
        }

        if let ReadinessPolicy::UntilRunning { budget } = policy
            && checks >= checks_within(budget, interval)
        {
            return Err(CollectError::ReadinessTimeout {
                waited: interval * checks,
                message: pod.message().to_string(),
                reason: pod.reason().to_string(),
                pod: pod.name,
            });
        }

        info!(
            pod = %pod.name,
            phase = %pod.phase,
            "Pod not ready, waiting {:?}",
            interval
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Readiness::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
        checks += 1;

        pod = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Readiness::Cancelled),
            refreshed = api.get_pod(&pod.namespace, &pod.name) => refreshed?,
        };
        debug!(pod = %pod.name, phase = %pod.phase, checks, "Re-read pod");
    }
}

/// The `only_failed` predicate: with it set, Running pods are skipped
pub fn passes_phase_filter(opts: &CollectionOptions, pod: &PodHandle) -> bool {
    !opts.only_failed || pod.phase != PodPhase::Running
}

fn admits(policy: ReadinessPolicy, phase: PodPhase) -> bool {
    match policy {
        ReadinessPolicy::UntilNotPending => phase != PodPhase::Pending,
        ReadinessPolicy::UntilRunning { .. } => phase == PodPhase::Running,
    }
}

/// Number of whole intervals that fit in the budget
fn checks_within(budget: Duration, interval: Duration) -> u32 {
    let checks = budget.as_nanos() / interval.as_nanos().max(1);
    u32::try_from(checks).unwrap_or(u32::MAX)
}
