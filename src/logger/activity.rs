//! Activity logger thread: owns the [`JsonlWriter`], fed through a bounded
//! crossbeam channel.
//!
//! Callers hold a cheap [`ActivityLoggerHandle`]. `send()` uses `try_send()`,
//! so a slow disk never stalls the walk or the executor; dropped events are
//! counted and reported in the log once the backlog clears.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{HdError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, RunCounts, Severity};

const CHANNEL_CAPACITY: usize = 1024;

/// Events emitted by a run.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    ScanStarted {
        root: PathBuf,
        mode: String,
        rules: Vec<String>,
        config_hash: String,
    },
    EntryDeleted {
        path: PathBuf,
        reason: String,
        size_bytes: u64,
        duration_ms: u64,
    },
    EntryFailed {
        path: PathBuf,
        error_code: String,
        error_message: String,
    },
    BranchSkipped {
        path: PathBuf,
        cause: String,
        detail: String,
    },
    ScanCompleted {
        root: PathBuf,
        counts: RunCounts,
        duration_ms: u64,
    },
    Cancelled {
        counts: RunCounts,
    },
    Error {
        code: String,
        message: String,
    },
    /// Ends the logger thread after everything queued before it is written.
    Shutdown,
}

/// Cloneable, non-blocking sender side of the activity log.
#[derive(Debug, Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Queue an event. Drops it (and counts the drop) when the queue is full.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

/// The logger thread plus a handle to it.
#[derive(Debug)]
pub struct ActivityLogger {
    handle: ActivityLoggerHandle,
    join: thread::JoinHandle<()>,
}

impl ActivityLogger {
    pub fn spawn(config: JsonlConfig) -> Result<Self> {
        Self::spawn_with_capacity(config, CHANNEL_CAPACITY)
    }

    pub fn spawn_with_capacity(config: JsonlConfig, capacity: usize) -> Result<Self> {
        let (tx, rx) = bounded::<ActivityEvent>(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let handle = ActivityLoggerHandle {
            tx,
            dropped_events: Arc::clone(&dropped),
        };

        let join = thread::Builder::new()
            .name("hdelete-logger".to_string())
            .spawn(move || logger_thread_main(&rx, config, &dropped))
            .map_err(|e| HdError::Runtime {
                details: format!("failed to spawn logger thread: {e}"),
            })?;

        Ok(Self { handle, join })
    }

    pub fn handle(&self) -> ActivityLoggerHandle {
        self.handle.clone()
    }

    /// Flush everything queued so far and stop the thread.
    pub fn finish(self) {
        let _ = self.handle.tx.send(ActivityEvent::Shutdown);
        if self.join.join().is_err() {
            eprintln!("[HDEL-LOG] logger thread panicked");
        }
    }
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{lost} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.flush();
}

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::ScanStarted {
            root,
            mode,
            rules,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::ScanStart, Severity::Info);
            e.root = Some(root.display().to_string());
            e.mode = Some(mode.clone());
            e.details = Some(format!(
                "rules={} config_hash={config_hash}",
                rules.join(",")
            ));
            e
        }
        ActivityEvent::EntryDeleted {
            path,
            reason,
            size_bytes,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::EntryDeleted, Severity::Info);
            e.path = Some(path.display().to_string());
            e.reason = Some(reason.clone());
            e.size = Some(*size_bytes);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::EntryFailed {
            path,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::EntryFailed, Severity::Warning);
            e.path = Some(path.display().to_string());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::BranchSkipped {
            path,
            cause,
            detail,
        } => {
            let mut e = LogEntry::new(EventType::BranchSkipped, Severity::Info);
            e.path = Some(path.display().to_string());
            e.reason = Some(cause.clone());
            e.details = Some(detail.clone());
            e
        }
        ActivityEvent::ScanCompleted {
            root,
            counts,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::ScanComplete, Severity::Info);
            e.root = Some(root.display().to_string());
            e.counts = Some(*counts);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(counts.failed == 0);
            e
        }
        ActivityEvent::Cancelled { counts } => {
            let mut e = LogEntry::new(EventType::Cancelled, Severity::Warning);
            e.counts = Some(*counts);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Error);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::Error, Severity::Info),
    }
}
