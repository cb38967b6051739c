use std::sync::Mutex;

/// Severity of one reported line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Command renderings and trace output, shown only when verbose.
    Detail,
    /// Narrative progress lines.
    Info,
    Warning,
    Critical,
}

/// A single diagnostic captured by a `MemoryReporter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub severity: Severity,
    pub message: String,
}

/// The sink every user-facing line goes through.
///
/// The engine and resolver never print directly. They hand lines to an
/// injected reporter, which lets the CLI route them to the terminal and lets
/// tests assert on them.
pub trait Reporter: Send + Sync {
    fn report(&self, severity: Severity, message: &str);

    fn detail(&self, message: &str) {
        self.report(Severity::Detail, message);
    }

    fn info(&self, message: &str) {
        self.report(Severity::Info, message);
    }

    fn warning(&self, message: &str) {
        self.report(Severity::Warning, message);
    }

    fn critical(&self, message: &str) {
        self.report(Severity::Critical, message);
    }
}

/// Forwards to `tracing`; the subscriber installed by `utils::init_logging`
/// decides the prefix, the stream and whether the line is shown at all.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for ConsoleReporter {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Detail => tracing::debug!("{message}"),
            Severity::Info => tracing::info!("{message}"),
            Severity::Warning => tracing::warn!("{message}"),
            Severity::Critical => tracing::error!("{message}"),
        }
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    entries: Mutex<Vec<Entry>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Messages of one severity, in the order they were reported.
    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.severity == severity)
            .map(|entry| entry.message)
            .collect()
    }

    pub fn contains(&self, severity: Severity, message: &str) -> bool {
        self.messages(severity).iter().any(|m| m == message)
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, severity: Severity, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(Entry {
                severity,
                message: message.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_reporter_keeps_order_per_severity() {
        let reporter = MemoryReporter::new();
        reporter.info("Backing up source /.");
        reporter.warning("Performing dry run, no changes will be done.");
        reporter.info("Dry run done.");

        assert_eq!(
            reporter.messages(Severity::Info),
            vec!["Backing up source /.", "Dry run done."]
        );
        assert!(reporter.contains(Severity::Warning, "Performing dry run, no changes will be done."));
        assert_eq!(reporter.entries().len(), 3);
    }
}
