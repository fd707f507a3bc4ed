//! Reconnect coordinator.
//!
//! Owns the active worker generation. On a failure signal it joins both
//! workers, redials with exponential backoff plus jitter, discards failure
//! signals that raced in, resends the backlogged request on the new
//! connection and spawns the next generation. It gives up, stopping the
//! whole client, once the attempt budget is spent or the backlog cannot be
//! resent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::ReconnectError;
use crate::protocol::Response;
use crate::run_state::RunState;
use crate::state::Phase;
use crate::transport::{Connection, Connector, Frame, write_with_deadline};
use crate::worker::{Failure, Generation, Shared};

/// Called after every successful redial, off the coordinator task.
pub type ReconnectHook = Arc<dyn Fn() + Send + Sync>;

/// `2^attempt` seconds plus up to one second of jitter. `jitter` is clamped to `[0, 1)`.
pub fn backoff_with_jitter(attempt: u32, jitter: f64) -> Duration {
    let base = Duration::from_secs(1u64 << attempt.min(63));
    let jitter = Duration::from_nanos((jitter.clamp(0.0, 1.0) * 999_999_999.0) as u64);
    base.saturating_add(jitter)
}

pub fn backoff_delay(attempt: u32) -> Duration {
    backoff_with_jitter(attempt, rand::random::<f64>())
}

pub(crate) struct Coordinator {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    address: String,
    failures: mpsc::Receiver<Failure>,
    responses: mpsc::Sender<Response>,
    on_reconnect: Option<ReconnectHook>,
    run: Arc<RunState>,
    generation: Option<Generation>,
    generations: u64,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shared: Arc<Shared>,
        connector: Arc<dyn Connector>,
        address: String,
        failures: mpsc::Receiver<Failure>,
        responses: mpsc::Sender<Response>,
        on_reconnect: Option<ReconnectHook>,
        run: Arc<RunState>,
        connection: Connection,
    ) -> Self {
        let mut coordinator = Self {
            shared,
            connector,
            address,
            failures,
            responses,
            on_reconnect,
            run,
            generation: None,
            generations: 0,
        };
        coordinator.spawn_generation(connection);
        coordinator
    }

    fn spawn_generation(&mut self, connection: Connection) {
        self.generations += 1;
        self.generation = Some(Generation::spawn(
            self.generations,
            connection,
            &self.shared,
            self.responses.clone(),
        ));
    }

    /// Supervise until shutdown or until reconnection is abandoned.
    /// Dropping the coordinator's response sender on return lets the output
    /// stream close once the last reader is gone.
    pub async fn run(mut self) -> Result<(), ReconnectError> {
        let result = self.supervise().await;
        self.shared.state.set_phase(Phase::Terminated);

        if let Err(e) = &result {
            tracing::error!(error = %e, "Giving up on the connection, stopping client");
            self.run.terminate();
        }
        if let Some(generation) = self.generation.take() {
            generation
                .join_within(self.shared.config.shutdown_timeout)
                .await;
        }
        tracing::info!(generations = self.generations, "Coordinator stopped");
        result
    }

    async fn supervise(&mut self) -> Result<(), ReconnectError> {
        loop {
            self.shared.state.set_phase(Phase::AwaitingFailure);
            let failure = tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => return Ok(()),
                failure = self.failures.recv() => failure,
            };
            let Some(failure) = failure else {
                return Ok(());
            };

            if let Some(generation) = self.generation.take() {
                tracing::warn!(generation = generation.number, error = %failure, "Connection failed");
                generation.join().await;
            }

            self.shared.state.set_phase(Phase::Reconnecting);
            let Some(mut connection) = self.reconnect().await? else {
                return Ok(());
            };

            self.shared.state.set_phase(Phase::Draining);
            self.drain_failures();
            self.replay_backlog(&mut connection).await?;

            self.shared.state.set_phase(Phase::Restarted);
            self.spawn_generation(connection);
        }
    }

    /// Redial under the reconnecting flag. `None` means shutdown interrupted it.
    async fn reconnect(&self) -> Result<Option<Connection>, ReconnectError> {
        self.shared.state.set_reconnecting(true);
        let result = self.redial().await;
        self.shared.state.set_reconnecting(false);

        if let Ok(Some(_)) = &result {
            tracing::info!(address = %self.address, "Reconnected");
            if let Some(hook) = &self.on_reconnect {
                let hook = Arc::clone(hook);
                tokio::task::spawn_blocking(move || hook());
            }
        }
        result
    }

    async fn redial(&self) -> Result<Option<Connection>, ReconnectError> {
        let max_attempts = self.shared.config.max_reconnect_attempts;
        let mut attempt: u32 = 0;

        loop {
            let backoff = backoff_delay(attempt);
            tracing::info!(attempt, ?backoff, address = %self.address, "Reconnecting");
            tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(backoff) => {}
            }

            let dialed = tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => return Ok(None),
                dialed = self.connector.dial(&self.address) => dialed,
            };
            match dialed {
                Ok(connection) => return Ok(Some(connection)),
                Err(e) => {
                    attempt += 1;
                    tracing::error!(attempt, error = %e, "Redial failed");
                    if attempt > max_attempts {
                        return Err(ReconnectError::Exhausted {
                            attempts: attempt,
                            last: e,
                        });
                    }
                }
            }
        }
    }

    fn drain_failures(&mut self) {
        while let Ok(stale) = self.failures.try_recv() {
            tracing::debug!(error = %stale, "Discarding stale failure signal");
        }
    }

    /// Write the backlogged request, if any, as the first frame on `connection`.
    async fn replay_backlog(&self, connection: &mut Connection) -> Result<(), ReconnectError> {
        let Some(request) = self.shared.backlog.take() else {
            return Ok(());
        };
        let id = request.id;
        let payload = match request.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(%id, error = %e, "Dropping backlogged request that failed to encode");
                return Ok(());
            }
        };

        let written = tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => None,
            written = write_with_deadline(
                connection.writer_mut(),
                Frame::Payload(payload),
                self.shared.config.write_wait,
            ) => Some(written),
        };
        match written {
            Some(Ok(())) => {
                tracing::info!(%id, "Resent backlogged request");
                Ok(())
            }
            Some(Err(e)) => {
                if self.shared.backlog.push(request).is_err() {
                    tracing::error!(%id, "Backlog occupied, request dropped");
                }
                connection.writer_mut().close().await;
                Err(ReconnectError::Backlog { id, source: e })
            }
            None => {
                let _ = self.shared.backlog.push(request);
                Ok(())
            }
        }
    }
}
