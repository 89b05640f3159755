//! Bounded trade-log ring.
//!
//! Producers append, consumers read a snapshot copy. Appending to a full
//! ring drops the oldest entry.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub ts_ms: u64,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug)]
pub struct TradeLog {
    entries: VecDeque<TradeLogEntry>,
    capacity: usize,
}

impl TradeLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, ts_ms: u64, level: LogLevel, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(TradeLogEntry {
            ts_ms,
            level,
            message: message.into(),
        });
    }

    pub fn info(&mut self, ts_ms: u64, message: impl Into<String>) {
        self.push(ts_ms, LogLevel::Info, message);
    }

    pub fn warn(&mut self, ts_ms: u64, message: impl Into<String>) {
        self.push(ts_ms, LogLevel::Warn, message);
    }

    pub fn error(&mut self, ts_ms: u64, message: impl Into<String>) {
        self.push(ts_ms, LogLevel::Error, message);
    }

    /// Copy of the current ring contents, oldest first.
    pub fn snapshot(&self) -> Vec<TradeLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_drops_oldest() {
        let mut log = TradeLog::new(3);
        for i in 0..5u64 {
            log.info(i, format!("entry {i}"));
        }
        let snap = log.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].message, "entry 2");
        assert_eq!(snap[2].message, "entry 4");
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut log = TradeLog::new(3);
        log.warn(1, "first");
        let snap = log.snapshot();
        log.error(2, "second");
        assert_eq!(snap.len(), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut log = TradeLog::new(0);
        log.info(1, "only");
        assert_eq!(log.len(), 1);
        log.info(2, "replaces");
        assert_eq!(log.len(), 1);
        assert_eq!(log.snapshot()[0].message, "replaces");
    }
}
