use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// 活动日志最多保留的条数
pub const ACTIVITY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "type")]
    pub severity: Severity,
}

/// 生成周期的活动日志：最新的在前，超出容量时淘汰最旧的。
///
/// 克隆得到的是同一个缓冲区的句柄。
#[derive(Clone, Default)]
pub struct ActivityLog {
    entries: Arc<Mutex<VecDeque<CycleLogEntry>>>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条日志，同时输出到 tracing。永不失败。
    pub fn log(&self, message: impl Into<String>, severity: Severity) {
        let message = message.into();
        match severity {
            Severity::Info | Severity::Success => info!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }

        let entry = CycleLogEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            timestamp: Utc::now(),
            message,
            severity,
        };

        // 锁中毒时仍然写入，日志不能因为别处的 panic 而丢失
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push_front(entry);
        entries.truncate(ACTIVITY_CAPACITY);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(message, Severity::Info);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(message, Severity::Success);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(message, Severity::Warning);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(message, Severity::Error);
    }

    /// 最新的在前
    pub fn entries(&self) -> Vec<CycleLogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn count(&self, severity: Severity) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().filter(|e| e.severity == severity).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_entry_comes_first() {
        let log = ActivityLog::new();
        log.info("first");
        log.success("second");

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "second");
        assert_eq!(entries[0].severity, Severity::Success);
        assert_eq!(entries[1].message, "first");
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let log = ActivityLog::new();
        for i in 0..(ACTIVITY_CAPACITY + 5) {
            log.info(format!("entry {}", i));
        }

        let entries = log.entries();
        assert_eq!(entries.len(), ACTIVITY_CAPACITY);
        assert_eq!(entries[0].message, format!("entry {}", ACTIVITY_CAPACITY + 4));
        assert_eq!(entries[ACTIVITY_CAPACITY - 1].message, "entry 5");
    }

    #[test]
    fn clones_share_the_buffer() {
        let log = ActivityLog::new();
        let handle = log.clone();
        handle.error("boom");
        assert_eq!(log.count(Severity::Error), 1);
    }
}
