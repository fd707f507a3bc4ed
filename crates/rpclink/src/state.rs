//! Guarded client state shared by the caller, the workers and the coordinator.
//!
//! All fields sit behind one mutex and are only reachable through the
//! accessors below.

use std::sync::{Mutex, MutexGuard};

use tokio::time::Instant;

use crate::protocol::RequestId;

/// Where the reconnect coordinator is in its failure-to-recovery cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    /// Not supervising yet.
    #[default]
    Idle,
    /// Workers running; waiting for a failure signal.
    AwaitingFailure,
    /// Workers joined; redialing with backoff.
    Reconnecting,
    /// Redial succeeded; discarding stale failures and replaying the backlog.
    Draining,
    /// A new worker generation was spawned.
    Restarted,
    /// Shut down or gave up; no further reconnection.
    Terminated,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingFailure => "awaiting_failure",
            Self::Reconnecting => "reconnecting",
            Self::Draining => "draining",
            Self::Restarted => "restarted",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    reconnecting: bool,
    last_ping_at: Option<Instant>,
    phase: Phase,
}

#[derive(Debug, Default)]
pub(crate) struct SharedState {
    inner: Mutex<Inner>,
}

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Client state mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn next_request_id(&self) -> RequestId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        RequestId::new(id)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.lock().reconnecting
    }

    pub fn set_reconnecting(&self, reconnecting: bool) {
        self.lock().reconnecting = reconnecting;
    }

    pub fn mark_ping_sent(&self, at: Instant) {
        self.lock().last_ping_at = Some(at);
    }

    pub fn last_ping_sent(&self) -> Option<Instant> {
        self.lock().last_ping_at
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn set_phase(&self, phase: Phase) {
        let mut inner = self.lock();
        if inner.phase != phase {
            tracing::debug!(from = %inner.phase, to = %phase, "Coordinator phase");
            inner.phase = phase;
        }
    }
}
