//! Metric export seam.

use std::sync::Arc;

use parking_lot::Mutex;

/// Receives flattened metric lines: `<prefix><family>_<command> <metrics>`.
pub trait MetricsSink: Send {
    fn push(&mut self, line: &str);
}

/// Emits metric lines as `tracing` events on the `solarsis::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn push(&mut self, line: &str) {
        tracing::info!(target: "solarsis::metrics", line, "metric line");
    }
}

/// Keeps metric lines in memory; clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines pushed so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Remove and return the lines pushed so far.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }
}

impl MetricsSink for RecordingSink {
    fn push(&mut self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Metric line for `path`: slashes become `_`.
pub fn metric_line(prefix: &str, path: &str, metrics: &str) -> String {
    format!("{prefix}{} {metrics}", path.replace('/', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_uses_prefix_and_underscored_path() {
        assert_eq!(
            metric_line("mpi_", "query/QPIGS", "load=1,temp=25"),
            "mpi_query_QPIGS load=1,temp=25"
        );
        assert_eq!(metric_line("", "set/POP", "success=1"), "set_POP success=1");
    }

    #[test]
    fn recording_sink_clones_share_lines() {
        let sink = RecordingSink::new();
        let mut writer = sink.clone();
        writer.push("a x=1");
        writer.push("b y=2");

        assert_eq!(sink.lines(), ["a x=1", "b y=2"]);
        assert_eq!(sink.drain().len(), 2);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn tracing_sink_accepts_lines() {
        let mut sink = TracingSink;
        sink.push("query_QPIGS load=1");
    }
}
