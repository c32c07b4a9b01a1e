use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why a run stopped
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The configured stop timeout elapsed
    Timeout,
    /// A pod logged the stop string
    StopString { pod: String },
    /// Nothing was handed to a tailer
    NoPods,
    /// Stopped from outside the collector, e.g. Ctrl-C
    Interrupted,
    /// Discovery failed and the run was abandoned
    Aborted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("stop timeout reached"),
            Self::StopString { pod } => write!(f, "stop string seen in pod {}", pod),
            Self::NoPods => f.write_str("no pods found"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::Aborted => f.write_str("discovery failed"),
        }
    }
}

/// State shared by every task of one run
///
/// Holds the run's single cancellation signal and the count of pods handed
/// to a tailer. Both only ever move one way.
#[derive(Debug, Default)]
pub struct RunState {
    cancel: CancellationToken,
    reason: OnceLock<StopReason>,
    tailed: AtomicUsize,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the cancellation signal
    ///
    /// Returns `true` only for the call that actually stopped the run; the
    /// reason of that first call is the one kept.
    pub fn trigger(&self, reason: StopReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.cancel.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the run has been cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// The cancellation signal, for components that only need to observe it
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.reason.get()
    }

    /// Record that a pod was handed to a tailer
    pub fn record_tailed(&self) {
        self.tailed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn found_any(&self) -> bool {
        self.tailed_count() > 0
    }

    pub fn tailed_count(&self) -> usize {
        self.tailed.load(Ordering::SeqCst)
    }
}
