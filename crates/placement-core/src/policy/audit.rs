//! Policy audit trail
//!
//! Every rule evaluation appends one immutable entry. Entries are kept in a
//! bounded in-memory queue (oldest evicted first) until an external
//! compliance collaborator drains them; an optional [`AuditSink`] also sees
//! each entry as it is appended.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::rules::{RuleKind, Severity};

/// Default maximum audit entries held in memory
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unix milliseconds
    pub timestamp: i64,
    pub rule_id: String,
    pub rule_kind: RuleKind,
    pub severity: Severity,
    pub process_id: String,
    pub target_id: String,
    pub passed: bool,
    pub detail: Option<String>,
}

/// External receiver of audit entries
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
    evicted: Mutex<u64>,
    sink: Option<Arc<dyn AuditSink>>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY))),
            capacity: capacity.max(1),
            evicted: Mutex::new(0),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn push(&self, entry: AuditEntry) {
        if let Some(sink) = &self.sink {
            sink.record(&entry);
        }

        let mut entries = self.lock_entries();
        let mut dropped = 0;
        while entries.len() >= self.capacity {
            entries.pop_front();
            dropped += 1;
        }
        entries.push_back(entry);
        drop(entries);

        if dropped > 0 {
            if let Ok(mut evicted) = self.evicted.lock() {
                *evicted += dropped;
            }
        }
    }

    /// Remove and return up to `limit` of the oldest entries
    pub fn drain_batch(&self, limit: usize) -> Vec<AuditEntry> {
        let mut entries = self.lock_entries();
        let count = limit.min(entries.len());
        entries.drain(..count).collect()
    }

    pub fn drain(&self) -> Vec<AuditEntry> {
        self.lock_entries().drain(..).collect()
    }

    /// Copy up to `limit` of the oldest entries without removing them
    pub fn peek(&self, limit: usize) -> Vec<AuditEntry> {
        self.lock_entries().iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries dropped because the queue was full
    pub fn evicted(&self) -> u64 {
        self.evicted.lock().map(|e| *e).unwrap_or(0)
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}
