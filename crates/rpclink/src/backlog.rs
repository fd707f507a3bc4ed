//! Single-slot holding area for the request that was being written when a
//! connection failed. The coordinator replays it as the first frame on the
//! next connection.

use std::sync::{Mutex, MutexGuard};

use crate::protocol::{Request, RequestId};

#[derive(Debug, Default)]
pub(crate) struct Backlog {
    slot: Mutex<Option<Request>>,
}

impl Backlog {
    fn lock(&self) -> MutexGuard<'_, Option<Request>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Backlog mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Park a request. Hands it back if the slot is already taken.
    pub fn push(&self, request: Request) -> Result<(), Request> {
        let mut slot = self.lock();
        if let Some(held) = slot.as_ref() {
            tracing::error!(held = %held.id, rejected = %request.id, "Backlog already occupied");
            return Err(request);
        }
        *slot = Some(request);
        Ok(())
    }

    pub fn take(&self) -> Option<Request> {
        self.lock().take()
    }

    pub fn pending_id(&self) -> Option<RequestId> {
        self.lock().as_ref().map(|request| request.id)
    }
}
