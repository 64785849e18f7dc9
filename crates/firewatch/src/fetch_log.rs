//! Bounded log of fetch attempts, kept for operator diagnosis.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Config, LogRetention};

/// Upper bound on kept records, whatever the retention window.
pub const MAX_RECORDS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchLogRecord {
    pub timestamp: DateTime<Utc>,
    pub region: String,
    pub success: bool,
    pub message: String,
    pub response_time_ms: u64,
    pub source_address: Option<String>,
}

impl FetchLogRecord {
    pub fn success(region: &str, address: &str, bytes: usize, elapsed_ms: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            region: region.to_string(),
            success: true,
            message: format!("Fetched {bytes} bytes"),
            response_time_ms: elapsed_ms,
            source_address: Some(address.to_string()),
        }
    }

    pub fn failure(region: &str, address: Option<&str>, message: String, elapsed_ms: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            region: region.to_string(),
            success: false,
            message,
            response_time_ms: elapsed_ms,
            source_address: address.map(str::to_string),
        }
    }
}

#[derive(Debug)]
pub struct FetchLog {
    enabled: bool,
    retention: LogRetention,
    path: Option<PathBuf>,
    records: Mutex<VecDeque<FetchLogRecord>>,
    revision: AtomicU64,
    // Revision of the last snapshot written to `path`.
    written: Mutex<u64>,
}

/// Copy of the records taken under the lock, written to disk after it is released.
struct Snapshot {
    revision: u64,
    records: VecDeque<FetchLogRecord>,
}

impl FetchLog {
    pub fn new(enabled: bool, retention: LogRetention) -> Self {
        Self {
            enabled,
            retention,
            path: None,
            records: Mutex::new(VecDeque::new()),
            revision: AtomicU64::new(0),
            written: Mutex::new(0),
        }
    }

    /// Builds the log from config, loading earlier records from `log_file`
    /// when one is configured. An unreadable file starts an empty log.
    pub fn from_config(config: &Config) -> Self {
        let mut log = Self::new(config.logging_enabled, config.log_retention);
        if let Some(path) = &config.log_file {
            log = log.with_file(path);
        }
        log
    }

    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        match load_records(&path) {
            Ok(records) => {
                log::debug!("Loaded {} fetch log records from {}", records.len(), path.display());
                self.records = Mutex::new(records);
            }
            Err(e) => log::warn!("Starting empty fetch log, could not read {}: {e}", path.display()),
        }
        self.path = Some(path);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn retention(&self) -> LogRetention {
        self.retention
    }

    /// Appends `record` when logging is enabled, then applies retention.
    pub fn record(&self, record: FetchLogRecord) {
        let now = Utc::now();
        self.record_at(record, now);
    }

    pub fn record_at(&self, record: FetchLogRecord, now: DateTime<Utc>) {
        if !self.enabled {
            return;
        }

        let snapshot = {
            let mut records = self.lock();
            records.push_back(record);
            prune(&mut records, self.retention, now);
            self.snapshot(&records)
        };
        self.persist(snapshot);
    }

    /// Up to `n` records, newest first.
    pub fn recent(&self, n: usize) -> Vec<FetchLogRecord> {
        self.lock().iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) -> usize {
        let (count, snapshot) = {
            let mut records = self.lock();
            let count = records.len();
            records.clear();
            (count, self.snapshot(&records))
        };
        self.persist(snapshot);
        log::info!("Cleared {count} fetch log records");
        count
    }

    // A panic while holding the lock leaves the deque intact, so keep using it.
    fn lock(&self) -> MutexGuard<'_, VecDeque<FetchLogRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Called with the records lock held; numbers the copy so writes can be ordered.
    fn snapshot(&self, records: &VecDeque<FetchLogRecord>) -> Option<Snapshot> {
        self.path.as_ref()?;
        Some(Snapshot {
            revision: self.revision.fetch_add(1, Ordering::SeqCst) + 1,
            records: records.clone(),
        })
    }

    /// Writes outside the records lock. A snapshot older than the one already
    /// on disk is skipped, so the file never goes backwards.
    fn persist(&self, snapshot: Option<Snapshot>) {
        let (Some(path), Some(snapshot)) = (&self.path, snapshot) else {
            return;
        };

        let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
        if snapshot.revision <= *written {
            return;
        }

        let result = serde_json::to_vec_pretty(&snapshot.records)
            .map_err(|e| e.to_string())
            .and_then(|bytes| fs::write(path, bytes).map_err(|e| e.to_string()));
        match result {
            Ok(()) => *written = snapshot.revision,
            Err(e) => log::error!("Failed to write fetch log to {}: {e}", path.display()),
        }
    }
}

impl Default for FetchLog {
    fn default() -> Self {
        Self::new(true, LogRetention::default())
    }
}

fn prune(records: &mut VecDeque<FetchLogRecord>, retention: LogRetention, now: DateTime<Utc>) {
    if let Some(max_age) = retention.max_age() {
        let cutoff = now - max_age;
        records.retain(|r| r.timestamp >= cutoff);
    }
    while records.len() > MAX_RECORDS {
        records.pop_front();
    }
}

fn load_records(path: &Path) -> Result<VecDeque<FetchLogRecord>, String> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| e.to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(VecDeque::new()),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap()
    }

    fn record_at(timestamp: DateTime<Utc>, region: &str) -> FetchLogRecord {
        FetchLogRecord {
            timestamp,
            region: region.to_string(),
            success: true,
            message: "Fetched 512 bytes".to_string(),
            response_time_ms: 120,
            source_address: None,
        }
    }

    #[test]
    fn test_seven_day_retention_prunes_old_records() {
        let log = FetchLog::new(true, LogRetention::SevenDays);
        log.record_at(record_at(now() - Duration::days(10), "old"), now() - Duration::days(10));
        log.record_at(record_at(now() - Duration::days(3), "recent"), now() - Duration::days(3));
        assert_eq!(log.len(), 2);

        log.record_at(record_at(now(), "new"), now());
        let regions: Vec<String> = log.recent(10).into_iter().map(|r| r.region).collect();
        assert_eq!(regions, vec!["new", "recent"]);
    }

    #[test]
    fn test_indefinite_retention_never_prunes() {
        let log = FetchLog::new(true, LogRetention::Indefinite);
        log.record_at(record_at(now() - Duration::days(3000), "ancient"), now());
        log.record_at(record_at(now(), "new"), now());
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_default_retention_is_28_days() {
        let log = FetchLog::default();
        log.record_at(record_at(now() - Duration::days(29), "old"), now());
        log.record_at(record_at(now() - Duration::days(27), "kept"), now());
        assert_eq!(log.recent(5)[0].region, "kept");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_disabled_log_records_nothing() {
        let log = FetchLog::new(false, LogRetention::Indefinite);
        log.record(FetchLogRecord::success("central", "https://x", 10, 5));
        assert!(log.is_empty());
    }

    #[test]
    fn test_recent_is_newest_first_and_bounded() {
        let log = FetchLog::new(true, LogRetention::Indefinite);
        for i in 0..5 {
            log.record_at(record_at(now() + Duration::minutes(i), &format!("r{i}")), now());
        }
        let recent: Vec<String> = log.recent(3).into_iter().map(|r| r.region).collect();
        assert_eq!(recent, vec!["r4", "r3", "r2"]);
        assert_eq!(log.recent(100).len(), 5);
    }

    #[test]
    fn test_record_count_is_capped() {
        let log = FetchLog::new(true, LogRetention::Indefinite);
        for _ in 0..MAX_RECORDS + 10 {
            log.record_at(record_at(now(), "central"), now());
        }
        assert_eq!(log.len(), MAX_RECORDS);
    }

    #[test]
    fn test_clear() {
        let log = FetchLog::new(true, LogRetention::Indefinite);
        log.record_at(record_at(now(), "central"), now());
        assert_eq!(log.clear(), 1);
        assert!(log.recent(10).is_empty());
    }

    #[test]
    fn test_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetch-log.json");

        let log = FetchLog::new(true, LogRetention::Indefinite).with_file(&path);
        log.record_at(record_at(now(), "central"), now());
        log.record_at(
            FetchLogRecord::failure("mallee", None, "HTTP status 503".to_string(), 40),
            now(),
        );
        drop(log);

        let reloaded = FetchLog::new(true, LogRetention::Indefinite).with_file(&path);
        let recent = reloaded.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].region, "mallee");
        assert!(!recent[0].success);
        assert_eq!(recent[1].region, "central");
    }

    #[test]
    fn test_concurrent_records_persist_latest_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetch-log.json");
        let log = FetchLog::new(true, LogRetention::Indefinite).with_file(&path);

        std::thread::scope(|scope| {
            for t in 0..4 {
                let log = &log;
                scope.spawn(move || {
                    for i in 0..10 {
                        log.record_at(record_at(now(), &format!("t{t}-{i}")), now());
                        assert_eq!(log.recent(1).len(), 1);
                    }
                });
            }
        });
        assert_eq!(log.len(), 40);

        let reloaded = FetchLog::new(true, LogRetention::Indefinite).with_file(&path);
        assert_eq!(reloaded.len(), 40);
        assert_eq!(reloaded.recent(40), log.recent(40));
    }

    #[test]
    fn test_clear_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetch-log.json");
        let log = FetchLog::new(true, LogRetention::Indefinite).with_file(&path);
        log.record_at(record_at(now(), "central"), now());
        log.clear();

        let reloaded = FetchLog::new(true, LogRetention::Indefinite).with_file(&path);
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_unreadable_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetch-log.json");
        fs::write(&path, "not json").unwrap();

        let log = FetchLog::new(true, LogRetention::Indefinite).with_file(&path);
        assert!(log.is_empty());
    }
}
