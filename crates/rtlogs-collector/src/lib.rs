//! Release log collection for helm-rtlogs
//!
//! This crate finds the pods owned by a release, waits for each to become
//! loggable, and tails all of them concurrently into one output sink until
//! a stop condition fires.

mod collector;
mod error;
mod filter;
mod readiness;
mod resolver;
mod sink;
mod state;
mod tailer;

#[cfg(test)]
mod fake;

pub use collector::{CollectSummary, Collector};
pub use error::{CollectError, error_chain};
pub use filter::filter_by_annotation;
pub use readiness::{Readiness, passes_phase_filter, wait_until_ready};
pub use resolver::get_pods_for_resource;
pub use sink::{LineSink, WriterSink, format_line};
pub use state::{RunState, StopReason};
pub use tailer::{TailOutcome, TailTarget, tail_pod};

// Re-export types used in our public API
pub use rtlogs_types::{CollectionOptions, ReadinessPolicy, ReleaseTarget};
