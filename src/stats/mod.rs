//! Assignment history
//!
//! A bounded record of who the balancer directed where. Advisory only: it
//! says nothing about who is still connected (backend reports do), it exists
//! for the operator's `clients` / `recent` views.

mod formatter;

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::scheduler::Mode;

pub use formatter::{format_assignments, format_live, format_servers, server_rows, ServerRow};

/// One client→backend dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentRecord {
    pub id: String,
    pub client_name: String,
    pub mode: Mode,
    pub backend: SocketAddr,
    /// Observed client socket address.
    pub remote: SocketAddr,
    pub assigned_at: DateTime<Utc>,
}

impl AssignmentRecord {
    pub fn new(client_name: String, mode: Mode, backend: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            client_name,
            mode,
            backend,
            remote,
            assigned_at: Utc::now(),
        }
    }
}

struct LogInner {
    recent: VecDeque<AssignmentRecord>,
    per_backend: HashMap<SocketAddr, VecDeque<AssignmentRecord>>,
}

/// Bounded FIFO of recent assignments plus a per-backend view.
pub struct AssignmentLog {
    capacity: usize,
    inner: Mutex<LogInner>,
}

impl AssignmentLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(LogInner {
                recent: VecDeque::new(),
                per_backend: HashMap::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest beyond capacity. Concurrent
    /// appenders never observe more than `capacity` entries.
    pub fn push(&self, record: AssignmentRecord) {
        let mut inner = self.inner.lock().unwrap();

        let backend_ring = inner.per_backend.entry(record.backend).or_default();
        backend_ring.push_back(record.clone());
        if backend_ring.len() > self.capacity {
            backend_ring.pop_front();
        }

        inner.recent.push_back(record);
        if inner.recent.len() > self.capacity {
            inner.recent.pop_front();
        }
    }

    /// All retained records, oldest first.
    pub fn recent(&self) -> Vec<AssignmentRecord> {
        self.inner.lock().unwrap().recent.iter().cloned().collect()
    }

    /// Records dispatched to one backend, oldest first.
    pub fn for_backend(&self, backend: SocketAddr) -> Vec<AssignmentRecord> {
        self.inner
            .lock()
            .unwrap()
            .per_backend
            .get(&backend)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// How many retained assignments went to this backend.
    pub fn assigned_count(&self, backend: SocketAddr) -> usize {
        self.inner
            .lock()
            .unwrap()
            .per_backend
            .get(&backend)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty both the FIFO and the per-backend view.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.recent.clear();
        inner.per_backend.clear();
    }
}
