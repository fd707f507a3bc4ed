//! Plumbing shared by the write/read worker pair of one connection generation.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backlog::Backlog;
use crate::config::ClientConfig;
use crate::metrics::LatencySink;
use crate::protocol::{Request, Response};
use crate::state::SharedState;
use crate::transport::{Connection, TransportError};

/// Everything the workers, the coordinator and the caller handle share.
pub(crate) struct Shared {
    pub config: ClientConfig,
    pub state: SharedState,
    pub backlog: Backlog,
    pub latency: Arc<dyn LatencySink>,
    /// Fires once, on stop or when the coordinator gives up.
    pub shutdown: CancellationToken,
    pub failures: mpsc::Sender<Failure>,
    /// The active writer offers one [`Slot`] here each time it is ready for
    /// a request.
    pub ready: mpsc::Sender<Slot>,
}

/// Rendezvous point between a caller and the writer that offered it.
pub(crate) type Slot = oneshot::Sender<Request>;

/// Hand `request` to the next writer that offers a slot.
///
/// A slot whose writer has already exited hands the request back and the
/// next one is tried. `Err` returns the request once no writer can ever
/// offer again. The handover itself never suspends, so dropping this future
/// leaves the request with the caller.
pub(crate) async fn hand_over(
    ready: &mut mpsc::Receiver<Slot>,
    mut request: Request,
) -> Result<(), Request> {
    while let Some(slot) = ready.recv().await {
        match slot.send(request) {
            Ok(()) => return Ok(()),
            Err(returned) => {
                tracing::trace!(id = %returned.id, "Slot from an exited writer, waiting for the next");
                request = returned;
            }
        }
    }
    Err(request)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Writer,
    Reader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Writer => f.write_str("writer"),
            Self::Reader => f.write_str("reader"),
        }
    }
}

/// Why a worker generation ended early.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Failure {
    #[error("write failed: {0}")]
    Write(#[source] TransportError),

    #[error("keepalive ping failed: {0}")]
    Ping(#[source] TransportError),

    #[error("read failed: {0}")]
    Read(#[source] TransportError),

    #[error("{worker} panicked: {message}")]
    Panic { worker: Role, message: String },
}

/// Hand a failure to the coordinator without blocking. A signal that is
/// already pending covers this one.
pub(crate) fn signal_failure(shared: &Shared, failure: Failure) {
    match shared.failures.try_send(failure) {
        Ok(()) => {}
        Err(TrySendError::Full(failure)) => {
            tracing::debug!(%failure, "Failure signal already pending");
        }
        Err(TrySendError::Closed(failure)) => {
            tracing::debug!(%failure, "Coordinator gone, failure not delivered");
        }
    }
}

/// Trip this generation's quit latch and report the failure.
pub(crate) fn fail(shared: &Shared, quit: &CancellationToken, failure: Failure) {
    quit.cancel();
    signal_failure(shared, failure);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn spawn_worker<F>(
    role: Role,
    generation: u64,
    shared: Arc<Shared>,
    quit: CancellationToken,
    work: F,
) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(payload) = AssertUnwindSafe(work).catch_unwind().await {
            let message = panic_message(payload.as_ref());
            tracing::error!(worker = %role, generation, %message, "Worker panicked");
            fail(
                &shared,
                &quit,
                Failure::Panic {
                    worker: role,
                    message,
                },
            );
        }
        tracing::debug!(worker = %role, generation, "Worker exited");
    })
}

/// One write/read worker pair bound to a single connection.
pub(crate) struct Generation {
    pub number: u64,
    quit: CancellationToken,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Generation {
    pub fn spawn(
        number: u64,
        connection: Connection,
        shared: &Arc<Shared>,
        responses: mpsc::Sender<Response>,
    ) -> Self {
        let quit = shared.shutdown.child_token();
        let (frame_reader, frame_writer) = connection.into_split();

        let writer = spawn_worker(
            Role::Writer,
            number,
            Arc::clone(shared),
            quit.clone(),
            crate::writer::run_writer(frame_writer, Arc::clone(shared), quit.clone()),
        );
        let reader = spawn_worker(
            Role::Reader,
            number,
            Arc::clone(shared),
            quit.clone(),
            crate::reader::run_reader(frame_reader, Arc::clone(shared), quit.clone(), responses),
        );

        tracing::info!(generation = number, "Workers started");
        Self {
            number,
            quit,
            writer,
            reader,
        }
    }

    /// Wait until both workers have exited.
    pub async fn join(self) {
        let Self {
            number,
            writer,
            reader,
            ..
        } = self;
        for (role, handle) in [(Role::Writer, writer), (Role::Reader, reader)] {
            if let Err(e) = handle.await {
                tracing::error!(worker = %role, generation = number, error = %e, "Worker task failed");
            }
        }
    }

    /// Like [`join`](Self::join) but aborts workers still running after `timeout`.
    /// Returns false if anything had to be aborted.
    pub async fn join_within(mut self, timeout: Duration) -> bool {
        self.quit.cancel();
        let joined = tokio::time::timeout(timeout, async {
            let _ = (&mut self.writer).await;
            let _ = (&mut self.reader).await;
        })
        .await;

        if joined.is_err() {
            tracing::warn!(generation = self.number, ?timeout, "Workers did not exit in time, aborting");
            self.writer.abort();
            self.reader.abort();
            return false;
        }
        true
    }
}
