//! Ring buffer of recent LLM requests for diagnostics.
//!
//! Every client writes to a process-global singleton. The buffer is bounded
//! and in-memory only; it is not shared across processes and carries no
//! durability guarantees. External telemetry is the tool for that.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use jiff::{SignedDuration, Timestamp};
use serde::Serialize;
use serde_json::Value;

use crate::messages::ToolDefinition;

/// Default capacity of the global buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Record of a single request/response pair. Immutable after creation.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub timestamp: Timestamp,
    pub request_id: String,
    pub model_id: String,
    /// Messages in their canonical JSON serialization.
    pub messages: Vec<Value>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<String>,
    pub response: Option<Value>,
    pub duration_ms: f64,
    pub error: Option<String>,
}

/// Thread-safe bounded FIFO of request records.
#[derive(Debug)]
pub struct RequestBuffer {
    max_size: usize,
    records: Mutex<VecDeque<Arc<RequestRecord>>>,
}

impl RequestBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            records: Mutex::new(VecDeque::with_capacity(max_size)),
        }
    }

    /// Append a record, evicting the oldest when full.
    pub fn add(&self, record: RequestRecord) {
        let Ok(mut records) = self.records.lock() else {
            log::debug!("Request buffer lock poisoned, dropping record");
            return;
        };

        if records.len() == self.max_size {
            records.pop_front();
        }
        records.push_back(Arc::new(record));
    }

    /// Snapshot of recent records, newest first.
    pub fn get_recent(&self, limit: usize, since_minutes: Option<i64>) -> Vec<Arc<RequestRecord>> {
        let snapshot: Vec<Arc<RequestRecord>> = {
            let Ok(records) = self.records.lock() else {
                return Vec::new();
            };
            records.iter().cloned().collect()
        };

        let now = Timestamp::now();
        snapshot
            .into_iter()
            .rev()
            .filter(|record| match since_minutes {
                Some(minutes) => now.duration_since(record.timestamp) <= SignedDuration::from_mins(minutes),
                None => true,
            })
            .take(limit)
            .collect()
    }

    /// Drop all records.
    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }

    /// Current record count.
    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static GLOBAL_BUFFER: Mutex<Option<Arc<RequestBuffer>>> = Mutex::new(None);

/// The process-global request buffer, created on first access.
pub fn get_request_buffer() -> Arc<RequestBuffer> {
    let Ok(mut guard) = GLOBAL_BUFFER.lock() else {
        return Arc::new(RequestBuffer::new(DEFAULT_BUFFER_SIZE));
    };

    guard
        .get_or_insert_with(|| Arc::new(RequestBuffer::new(DEFAULT_BUFFER_SIZE)))
        .clone()
}

/// Drop the global buffer so the next access starts fresh. Test hook.
pub fn reset_request_buffer() {
    if let Ok(mut guard) = GLOBAL_BUFFER.lock() {
        *guard = None;
    }
}
