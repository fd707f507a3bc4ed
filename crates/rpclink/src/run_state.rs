//! Start/stop lifecycle and the shutdown token every task watches.

use std::sync::{Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Starting,
    Running,
    Stopped,
}

#[derive(Debug)]
pub(crate) struct RunState {
    lifecycle: Mutex<Lifecycle>,
    shutdown: CancellationToken,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            lifecycle: Mutex::new(Lifecycle::Created),
            shutdown: CancellationToken::new(),
        }
    }
}

impl RunState {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        match self.lifecycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Lifecycle mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Claim the start. Only one caller wins; a stopped client stays stopped.
    pub fn begin_start(&self) -> Result<(), ClientError> {
        let mut lifecycle = self.lock();
        match *lifecycle {
            Lifecycle::Created => {
                *lifecycle = Lifecycle::Starting;
                Ok(())
            }
            Lifecycle::Starting | Lifecycle::Running => Err(ClientError::AlreadyStarted),
            Lifecycle::Stopped => Err(ClientError::Stopped),
        }
    }

    /// The initial dial failed; allow another `start`.
    pub fn abort_start(&self) {
        let mut lifecycle = self.lock();
        if *lifecycle == Lifecycle::Starting {
            *lifecycle = Lifecycle::Created;
        }
    }

    pub fn finish_start(&self) {
        let mut lifecycle = self.lock();
        if *lifecycle == Lifecycle::Starting {
            *lifecycle = Lifecycle::Running;
        }
    }

    /// Caller-requested stop. Fails if the client never ran or already stopped.
    pub fn stop(&self) -> Result<(), ClientError> {
        let mut lifecycle = self.lock();
        if *lifecycle != Lifecycle::Running {
            return Err(ClientError::NotRunning);
        }
        *lifecycle = Lifecycle::Stopped;
        self.shutdown.cancel();
        Ok(())
    }

    /// Internal stop after an unrecoverable failure.
    pub fn terminate(&self) {
        *self.lock() = Lifecycle::Stopped;
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        *self.lock() == Lifecycle::Running
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}
