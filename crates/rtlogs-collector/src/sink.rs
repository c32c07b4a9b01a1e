//! Output sink for attributed log lines

use std::io::{self, Write};

use parking_lot::Mutex;
use tracing::warn;

use rtlogs_types::{PodPhase, ResourceKind};

/// Destination for attributed log lines, shared by every tailer
pub trait LineSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Writes each line to an `io::Write` and flushes it straight away
pub struct WriterSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl WriterSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> LineSink for WriterSink<W> {
    fn write_line(&self, line: &str) {
        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            warn!(error = %e, "Failed to write log line");
        }
    }
}

/// Format one chunk of a pod's log as `[kind][resource][pod][phase] text`
///
/// A chunk is whatever a single read returned, so it may hold several
/// lines or end in the middle of one. Only a single trailing newline is
/// stripped; the sink adds its own.
pub fn format_line(
    kind: ResourceKind,
    resource: &str,
    pod: &str,
    phase: PodPhase,
    text: &str,
) -> String {
    let text = text.strip_suffix('\n').unwrap_or(text);
    format!("[{}][{}][{}][{}] {}", kind, resource, pod, phase, text)
}
