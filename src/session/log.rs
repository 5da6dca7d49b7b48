use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Maximum number of transcript entries kept
pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// Who produced a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogSource {
    User,
    Jarvis,
    System,
    Error,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogSource::User => "USER",
            LogSource::Jarvis => "JARVIS",
            LogSource::System => "SYSTEM",
            LogSource::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// A single line of the user-facing transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub source: LogSource,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only transcript bounded to the most recent entries
#[derive(Debug)]
pub struct LogBook {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogBook {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest once full
    pub fn push(&mut self, source: LogSource, text: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            source,
            text: text.into(),
            timestamp: Utc::now(),
        };

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());

        entry
    }

    /// Entries in display order
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LogBook {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_book_keeps_most_recent() {
        let mut log = LogBook::new(3);
        for i in 0..5 {
            log.push(LogSource::System, format!("entry {}", i));
        }

        let texts: Vec<String> = log.entries().into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["entry 2", "entry 3", "entry 4"]);
    }

    #[test]
    fn test_log_source_serializes_uppercase() {
        let json = serde_json::to_string(&LogSource::Jarvis).unwrap();
        assert_eq!(json, "\"JARVIS\"");
    }
}
