//! Append-only audit trail
//!
//! [`AuditLog`] keeps every entry of the process in memory and forwards each
//! one to its sinks as soon as it is recorded. Sinks flush per entry; a sink
//! that fails to write is reported through `tracing` but the entry stays in
//! the in-memory record.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Severity of an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Ok,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "info",
            Self::Ok => "ok",
            Self::Error => "error",
        };
        f.pad(label)
    }
}

/// One timestamped audit record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub severity: Severity,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:<5} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.severity,
            self.text
        )
    }
}

/// Destination for audit entries
pub trait LogSink {
    /// Persist one entry. Implementations flush before returning.
    fn write(&mut self, entry: &LogEntry) -> io::Result<()>;

    /// A step is about to run. No entry is recorded for this.
    fn step_started(&mut self, _index: usize, _total: usize, _description: &str) {}

    /// Flush anything still pending
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Appends entries to a file created with 0600 permissions
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
}

impl FileSink {
    /// Open `path` for appending, creating it if needed
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(&path)?;
        Ok(Self { path, file })
    }

    /// Path being written
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn write(&mut self, entry: &LogEntry) -> io::Result<()> {
        writeln!(self.file, "{entry}")?;
        self.file.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }
}

/// Process-wide audit log
#[derive(Default)]
pub struct AuditLog {
    entries: Vec<LogEntry>,
    sinks: Vec<Box<dyn LogSink>>,
    closed: bool,
}

impl AuditLog {
    /// Create an empty log with no sinks
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink fluently
    pub fn with_sink<S: LogSink + 'static>(mut self, sink: S) -> Self {
        self.add_sink(sink);
        self
    }

    /// Add a sink. Only entries recorded afterwards reach it.
    pub fn add_sink<S: LogSink + 'static>(&mut self, sink: S) {
        self.sinks.push(Box::new(sink));
    }

    /// Append an entry and forward it to every sink
    pub fn record(&mut self, severity: Severity, text: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            severity,
            text: text.into(),
        };

        for sink in &mut self.sinks {
            if let Err(e) = sink.write(&entry) {
                tracing::warn!("audit sink write failed: {e}");
            }
        }

        self.entries.push(entry);
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.record(Severity::Info, text);
    }

    pub fn ok(&mut self, text: impl Into<String>) {
        self.record(Severity::Ok, text);
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.record(Severity::Error, text);
    }

    /// Tell sinks a step is starting
    pub fn step_started(&mut self, index: usize, total: usize, description: &str) {
        for sink in &mut self.sinks {
            sink.step_started(index, total, description);
        }
    }

    /// All entries recorded so far, oldest first
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flush every sink. Safe to call more than once; also runs on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for sink in &mut self.sinks {
            if let Err(e) = sink.flush() {
                tracing::warn!("audit sink flush failed: {e}");
            }
        }
    }
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog")
            .field("entries", &self.entries.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// Sink that shares what it receives with the test
    #[derive(Clone, Default)]
    struct Capture {
        lines: Rc<RefCell<Vec<String>>>,
        started: Rc<RefCell<Vec<(usize, usize)>>>,
    }

    impl LogSink for Capture {
        fn write(&mut self, entry: &LogEntry) -> io::Result<()> {
            self.lines.borrow_mut().push(entry.text.clone());
            Ok(())
        }

        fn step_started(&mut self, index: usize, total: usize, _description: &str) {
            self.started.borrow_mut().push((index, total));
        }
    }

    struct Broken;

    impl LogSink for Broken {
        fn write(&mut self, _entry: &LogEntry) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }
    }

    #[test]
    fn test_entries_are_kept_in_order() {
        let mut log = AuditLog::new();
        log.info("starting");
        log.ok("step one");
        log.error("step two failed");

        let severities: Vec<Severity> = log.entries().iter().map(|e| e.severity).collect();
        assert_eq!(severities, [Severity::Info, Severity::Ok, Severity::Error]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_sinks_receive_each_entry_immediately() {
        let capture = Capture::default();
        let mut log = AuditLog::new().with_sink(capture.clone());

        log.ok("first");
        assert_eq!(capture.lines.borrow().as_slice(), ["first"]);

        log.step_started(2, 5, "second");
        log.error("second");
        assert_eq!(capture.lines.borrow().len(), 2);
        assert_eq!(capture.started.borrow().as_slice(), [(2, 5)]);
    }

    #[test]
    fn test_broken_sink_does_not_lose_entries() {
        let mut log = AuditLog::new().with_sink(Broken);
        log.ok("kept anyway");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_file_sink_appends_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");

        {
            let mut log = AuditLog::new().with_sink(FileSink::open(&path).unwrap());
            log.ok("Install prerequisites");
            log.error("Install Docker packages failed: exit status 100");
        }
        {
            let mut log = AuditLog::new().with_sink(FileSink::open(&path).unwrap());
            log.info("second run");
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("ok    Install prerequisites"));
        assert!(lines[1].contains("error Install Docker packages failed"));
        assert!(lines[2].contains("info  second run"));
    }

    #[test]
    fn test_file_sink_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = FileSink::open(&path).unwrap();

        let mode = std::fs::metadata(sink.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
