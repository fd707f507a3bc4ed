//! Caller-facing client handle.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backlog::Backlog;
use crate::config::ClientConfig;
use crate::error::{ClientError, ReconnectError};
use crate::metrics::{LatencySink, LatencySnapshot, default_sink};
use crate::protocol::{Request, RequestId, Response};
use crate::reconnect::{Coordinator, ReconnectHook};
use crate::run_state::RunState;
use crate::state::{Phase, SharedState};
use crate::transport::Connector;
use crate::transport::websocket::WebSocketConnector;
use crate::worker::{Failure, Shared, Slot, hand_over};

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("Client mutex poisoned - recovering");
            poisoned.into_inner()
        }
    }
}

/// JSON-RPC client that keeps one stream to `address` alive.
///
/// Requests go through a single write worker; responses come back on the
/// receiver returned by [`start`](Self::start), in the order they were read.
/// When the stream fails the client reconnects on its own and resends the
/// request that was being written, if any.
pub struct Client {
    address: String,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    slots: tokio::sync::Mutex<mpsc::Receiver<Slot>>,
    failures: StdMutex<Option<mpsc::Receiver<Failure>>>,
    run: Arc<RunState>,
    on_reconnect: StdMutex<Option<ReconnectHook>>,
    coordinator: tokio::sync::Mutex<Option<JoinHandle<Result<(), ReconnectError>>>>,
}

impl Client {
    pub fn new(address: impl Into<String>, connector: impl Connector + 'static) -> Self {
        Self::with_config(address, connector, ClientConfig::default())
    }

    /// Client over WebSocket at the default endpoint.
    pub fn websocket(address: impl Into<String>, config: ClientConfig) -> Self {
        Self::with_config(address, WebSocketConnector::default(), config)
    }

    pub fn with_config(
        address: impl Into<String>,
        connector: impl Connector + 'static,
        config: ClientConfig,
    ) -> Self {
        let latency = default_sink(config.skip_metrics);
        Self::with_latency_sink(address, connector, config, latency)
    }

    pub fn with_latency_sink(
        address: impl Into<String>,
        connector: impl Connector + 'static,
        config: ClientConfig,
        latency: Arc<dyn LatencySink>,
    ) -> Self {
        let run = Arc::new(RunState::default());
        let (ready, slots) = mpsc::channel(1);
        let (failures_tx, failures) = mpsc::channel(1);

        let shared = Arc::new(Shared {
            config,
            state: SharedState::default(),
            backlog: Backlog::default(),
            latency,
            shutdown: run.shutdown_token().clone(),
            failures: failures_tx,
            ready,
        });

        Self {
            address: address.into(),
            connector: Arc::new(connector),
            shared,
            slots: tokio::sync::Mutex::new(slots),
            failures: StdMutex::new(Some(failures)),
            run,
            on_reconnect: StdMutex::new(None),
            coordinator: tokio::sync::Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Install a callback run after every successful reconnect. It runs on
    /// the blocking pool and never holds up the client. Install it before
    /// [`start`](Self::start).
    pub fn on_reconnect(&self, hook: impl Fn() + Send + Sync + 'static) {
        *lock(&self.on_reconnect) = Some(Arc::new(hook));
    }

    /// Dial the server and start the workers and the reconnect coordinator.
    ///
    /// A failed first dial is returned as is, without retries, and the
    /// client may be started again. The returned receiver yields `None`
    /// once the client has stopped.
    pub async fn start(&self) -> Result<mpsc::Receiver<Response>, ClientError> {
        self.shared.config.validate()?;
        self.run.begin_start()?;

        let connection = match self.connector.dial(&self.address).await {
            Ok(connection) => connection,
            Err(source) => {
                self.run.abort_start();
                tracing::error!(address = %self.address, error = %source, "Failed to dial");
                return Err(ClientError::Dial {
                    address: self.address.clone(),
                    source,
                });
            }
        };

        let Some(failures) = lock(&self.failures).take() else {
            self.run.abort_start();
            return Err(ClientError::AlreadyStarted);
        };
        let (responses_tx, responses) = mpsc::channel(1);
        let hook = lock(&self.on_reconnect).clone();

        let coordinator = Coordinator::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.connector),
            self.address.clone(),
            failures,
            responses_tx,
            hook,
            Arc::clone(&self.run),
            connection,
        );
        *self.coordinator.lock().await = Some(tokio::spawn(coordinator.run()));
        self.run.finish_start();

        tracing::info!(address = %self.address, "Client started");
        Ok(responses)
    }

    /// Stop the client and wait for its tasks to finish.
    ///
    /// A request still in the backlog is lost. Fails with
    /// [`ClientError::NotRunning`] if the client never started or has
    /// already stopped, including after giving up on reconnecting.
    pub async fn stop(&self) -> Result<(), ClientError> {
        self.run.stop()?;
        tracing::info!(address = %self.address, "Stopping client");

        let handle = self.coordinator.lock().await.take();
        if let Some(mut handle) = handle {
            let wait = self.shared.config.shutdown_timeout.saturating_mul(2);
            match tokio::time::timeout(wait, &mut handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Coordinator ended with an error"),
                Ok(Err(e)) => tracing::error!(error = %e, "Coordinator task failed"),
                Err(_) => {
                    tracing::warn!(?wait, "Coordinator did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        tracing::info!(address = %self.address, "Client stopped");
        Ok(())
    }

    /// Hand a request to the write worker, waiting until it is ready for one.
    /// While the client is reconnecting this waits for the next connection.
    pub async fn send(&self, request: Request) -> Result<(), ClientError> {
        self.send_with_cancel(request, &CancellationToken::new()).await
    }

    /// Like [`send`](Self::send) unless `cancel` fires first. On
    /// [`ClientError::Canceled`] the request was never handed over.
    pub async fn send_with_cancel(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        if !self.run.is_running() {
            return Err(ClientError::NotRunning);
        }
        let mut slots = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Canceled),
            _ = self.shared.shutdown.cancelled() => return Err(ClientError::NotRunning),
            slots = self.slots.lock() => slots,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Canceled),
            _ = self.shared.shutdown.cancelled() => Err(ClientError::NotRunning),
            sent = hand_over(&mut slots, request) => sent.map_err(|_| ClientError::NotRunning),
        }
    }

    /// Build a request with a fresh id and queue it. Returns the id so the
    /// caller can match the response.
    pub async fn call<P: Serialize + ?Sized>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<RequestId, ClientError> {
        let id = self.next_request_id();
        let request = Request::with_params(id, method, params)?;
        self.send(request).await?;
        Ok(id)
    }

    pub async fn subscribe(&self, query: &str) -> Result<RequestId, ClientError> {
        self.call("subscribe", &json!({ "query": query })).await
    }

    pub async fn unsubscribe(&self, query: &str) -> Result<RequestId, ClientError> {
        self.call("unsubscribe", &json!({ "query": query })).await
    }

    pub async fn unsubscribe_all(&self) -> Result<RequestId, ClientError> {
        self.call("unsubscribe_all", &json!({})).await
    }

    pub fn next_request_id(&self) -> RequestId {
        self.shared.state.next_request_id()
    }

    pub fn is_running(&self) -> bool {
        self.run.is_running()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.shared.state.is_reconnecting()
    }

    /// Running and not in the middle of a reconnect.
    pub fn is_active(&self) -> bool {
        self.is_running() && !self.is_reconnecting()
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.phase()
    }

    pub fn latency(&self) -> LatencySnapshot {
        self.shared.latency.snapshot()
    }
}

impl std::fmt::Display for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Client{{{}}}", self.address)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}
