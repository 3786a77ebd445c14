//! Output sinks for statistics lines and summaries

use parking_lot::Mutex;

/// Destination for formatted statistics
pub trait ReportSink: Send + Sync {
    /// A periodic statistics line
    fn periodic(&self, line: &str);

    /// The final run summary
    fn summary(&self, text: &str);
}

/// Writes everything to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl ReportSink for StdoutSink {
    fn periodic(&self, line: &str) {
        println!("{line}");
    }

    fn summary(&self, text: &str) {
        println!("{text}");
    }
}

/// Routes output through `tracing` at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn periodic(&self, line: &str) {
        tracing::info!(target: "paceharness::stats", "{line}");
    }

    fn summary(&self, text: &str) {
        for line in text.lines() {
            tracing::info!(target: "paceharness::summary", "{line}");
        }
    }
}

/// Keeps output in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    periodic: Mutex<Vec<String>>,
    summaries: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Periodic lines received so far
    pub fn periodic_lines(&self) -> Vec<String> {
        self.periodic.lock().clone()
    }

    /// Summaries received so far
    pub fn summaries(&self) -> Vec<String> {
        self.summaries.lock().clone()
    }
}

impl ReportSink for MemorySink {
    fn periodic(&self, line: &str) {
        self.periodic.lock().push(line.to_string());
    }

    fn summary(&self, text: &str) {
        self.summaries.lock().push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.periodic("rate=1.00");
        sink.periodic("rate=2.00");
        sink.summary("totalIterations=3");

        assert_eq!(sink.periodic_lines(), vec!["rate=1.00", "rate=2.00"]);
        assert_eq!(sink.summaries(), vec!["totalIterations=3"]);
    }
}
