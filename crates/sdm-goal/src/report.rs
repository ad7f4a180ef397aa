// report.rs — Structured result records and the sinks that receive them.
//
// Goal state changes and fingerprint delta outcomes are emitted as
// ReportRecords for whatever displays them. Sinks may fail (disk full,
// unwritable path); the dispatcher logs that and carries on, so reporting
// never changes the outcome of a push.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ReportError;
use crate::goal::GoalState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// A goal changed state.
    Goal,
    /// A fingerprint delta was judged.
    Aspect,
    /// A push evaluation started or finished.
    Evaluation,
}

/// One displayable result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub kind: ReportKind,
    /// Goal name, fingerprint name or push label.
    pub subject: String,
    /// Goal state or delta outcome.
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_id: Option<Uuid>,
    pub timestamp_ms: i64,
}

impl ReportRecord {
    pub fn new(kind: ReportKind, subject: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            state: state.into(),
            message: None,
            evaluation_id: None,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn goal(name: &str, state: &GoalState) -> Self {
        let mut record = Self::new(ReportKind::Goal, name, state.to_string());
        record.message = state.message().map(str::to_string);
        record
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn for_evaluation(mut self, id: Uuid) -> Self {
        self.evaluation_id = Some(id);
        self
    }
}

/// Receives report records.
pub trait ReportSink: Send + Sync {
    fn send(&self, record: &ReportRecord) -> Result<(), ReportError>;
}

/// Appends records as JSON lines. Each record goes out in a single write
/// while holding the sink's lock, so concurrent goals never split a line.
pub struct JsonlReportSink {
    path: PathBuf,
    append: Mutex<()>,
}

impl JsonlReportSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            append: Mutex::new(()),
        }
    }

    /// Read back every record in the file.
    pub fn read_all(&self) -> Result<Vec<ReportRecord>, ReportError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|source| ReportError::IoError {
            path: self.path.clone(),
            source,
        })?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(ReportError::from))
            .collect()
    }
}

impl ReportSink for JsonlReportSink {
    fn send(&self, record: &ReportRecord) -> Result<(), ReportError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ReportError::IoError {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.append.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| ReportError::IoError {
                path: self.path.clone(),
                source,
            })?;

        file.write_all(line.as_bytes()).map_err(|source| ReportError::IoError {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryReportSink {
    records: Mutex<Vec<ReportRecord>>,
}

impl MemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ReportRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Records about one subject, in arrival order.
    pub fn states_of(&self, subject: &str) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|r| r.subject == subject)
            .map(|r| r.state)
            .collect()
    }
}

impl ReportSink for MemoryReportSink {
    fn send(&self, record: &ReportRecord) -> Result<(), ReportError> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
        Ok(())
    }
}

/// Fans records out to every sink.
#[derive(Default)]
pub struct ReportDispatcher {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl ReportDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Arc<dyn ReportSink>) {
        self.sinks.push(sink);
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn dispatch(&self, record: &ReportRecord) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(record) {
                tracing::warn!(subject = %record.subject, error = %e, "report sink error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct FailingSink;

    impl ReportSink for FailingSink {
        fn send(&self, _record: &ReportRecord) -> Result<(), ReportError> {
            Err(ReportError::IoError {
                path: PathBuf::from("/dev/full"),
                source: std::io::Error::other("no space"),
            })
        }
    }

    #[test]
    fn goal_record_carries_state_message() {
        let record = ReportRecord::goal("build", &GoalState::Failure { message: "exit 1".into() });
        assert_eq!(record.kind, ReportKind::Goal);
        assert_eq!(record.state, "failure");
        assert_eq!(record.message.as_deref(), Some("exit 1"));
    }

    #[test]
    fn concurrent_sends_keep_whole_lines() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(JsonlReportSink::new(dir.path().join("reports.jsonl")));
        let writers: Vec<_> = (0..8)
            .map(|w| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let record = ReportRecord::new(ReportKind::Aspect, format!("aspect-{}", w), "compliant")
                            .with_message(format!("pass {} {}", i, "x".repeat(512)));
                        sink.send(&record).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let records = sink.read_all().unwrap();
        assert_eq!(records.len(), 200);
        assert!(records.iter().all(|r| r.state == "compliant"));
    }

    #[test]
    fn jsonl_sink_appends_lines() {
        let dir = tempdir().unwrap();
        let sink = JsonlReportSink::new(dir.path().join("reports/push.jsonl"));
        sink.send(&ReportRecord::goal("version", &GoalState::success())).unwrap();
        sink.send(&ReportRecord::new(ReportKind::Aspect, "deps", "drift_detected")).unwrap();

        let records = sink.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].subject, "deps");
    }

    #[test]
    fn dispatcher_survives_failing_sink() {
        let memory = Arc::new(MemoryReportSink::new());
        let dispatcher = ReportDispatcher::new()
            .with_sink(Arc::new(FailingSink))
            .with_sink(memory.clone());

        dispatcher.dispatch(&ReportRecord::goal("build", &GoalState::InProcess));
        assert_eq!(memory.states_of("build"), vec!["in_process"]);
    }
}
