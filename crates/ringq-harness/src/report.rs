//! Leveled reporting sink.
//!
//! Text diagnostics are gated by a verbosity level; structured entries are
//! kept in memory for inspection and mirrored as JSONL to an optional
//! artifact sink, one object per line.

use std::io::Write;

use serde::{Deserialize, Serialize};

/// Severity level for diagnostics and entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Verbosity threshold at which this level becomes visible.
    #[must_use]
    pub fn threshold(self) -> u8 {
        match self {
            Self::Error => 1,
            Self::Warn => 2,
            Self::Info => 3,
            Self::Debug => 4,
            Self::Trace => 5,
        }
    }
}

/// Scored outcome of a checked step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
    Timeout,
}

/// One structured entry in the artifact stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic entry id.
    pub seq: u64,
    /// Severity level.
    pub level: LogLevel,
    /// Event name (`ih`, `sort`, `leak_check`, ...).
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Verbosity-gated reporter with an in-memory entry log and an optional
/// JSONL artifact sink.
pub struct Reporter {
    verbosity: u8,
    artifact: Option<Box<dyn Write + Send>>,
    entries: Vec<LogEntry>,
    next_seq: u64,
}

impl Reporter {
    /// Creates a reporter that prints messages at or below `verbosity`.
    #[must_use]
    pub fn new(verbosity: u8) -> Self {
        Self {
            verbosity,
            artifact: None,
            entries: Vec::new(),
            next_seq: 1,
        }
    }

    /// Attaches a JSONL artifact sink; every structured entry is mirrored
    /// to it as it is recorded.
    #[must_use]
    pub fn with_artifact(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.artifact = Some(sink);
        self
    }

    /// Prints `msg` when `level` is visible at the configured verbosity.
    pub fn report(&mut self, level: LogLevel, msg: &str) {
        if level.threshold() <= self.verbosity {
            println!("{msg}");
        }
    }

    /// Records a structured entry and mirrors it to the artifact sink.
    /// Failed outcomes are also echoed as text at Warn.
    pub fn record(&mut self, event: &str, outcome: Outcome, details: Option<String>) {
        let level = match outcome {
            Outcome::Pass => LogLevel::Debug,
            Outcome::Fail => LogLevel::Warn,
            Outcome::Error | Outcome::Timeout => LogLevel::Error,
        };
        if outcome != Outcome::Pass {
            let detail = details.as_deref().unwrap_or("");
            self.report(level, &format!("{event}: {outcome:?} {detail}"));
        }
        let entry = LogEntry {
            seq: self.next_seq,
            level,
            event: event.to_string(),
            outcome: Some(outcome),
            details,
        };
        self.next_seq += 1;
        if let Some(sink) = self.artifact.as_mut() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(sink, "{line}");
            }
        }
        self.entries.push(entry);
    }

    /// Structured entries recorded so far.
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Flushes the artifact sink, if any.
    pub fn flush(&mut self) {
        if let Some(sink) = self.artifact.as_mut() {
            let _ = sink.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_by_threshold() {
        assert!(LogLevel::Error.threshold() < LogLevel::Warn.threshold());
        assert!(LogLevel::Warn.threshold() < LogLevel::Info.threshold());
        assert!(LogLevel::Info.threshold() < LogLevel::Debug.threshold());
        assert!(LogLevel::Debug.threshold() < LogLevel::Trace.threshold());
    }

    #[test]
    fn record_accumulates_entries_in_order() {
        let mut reporter = Reporter::new(0);
        reporter.record("ih", Outcome::Pass, None);
        reporter.record("sort", Outcome::Fail, Some("not ascending".to_string()));
        let entries = reporter.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[1].seq, 2);
        assert_eq!(entries[1].outcome, Some(Outcome::Fail));
        assert_eq!(entries[1].level, LogLevel::Warn);
    }

    #[test]
    fn entries_serialize_as_single_json_lines() {
        let entry = LogEntry {
            seq: 7,
            level: LogLevel::Error,
            event: "leak_check".to_string(),
            outcome: Some(Outcome::Fail),
            details: Some("3 blocks still allocated".to_string()),
        };
        let line = serde_json::to_string(&entry).expect("serializable");
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).expect("round trip");
        assert_eq!(value["level"], "error");
        assert_eq!(value["outcome"], "fail");
    }

    #[test]
    fn pass_entries_omit_empty_optionals() {
        let entry = LogEntry {
            seq: 1,
            level: LogLevel::Debug,
            event: "rh".to_string(),
            outcome: Some(Outcome::Pass),
            details: None,
        };
        let line = serde_json::to_string(&entry).expect("serializable");
        assert!(!line.contains("details"));
    }
}
