//! Read worker: the only task that reads from a connection.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::Response;
use crate::transport::{Frame, FrameReader, TransportError, read_with_deadline};
use crate::worker::{Failure, Shared, fail};

fn record_pong(shared: &Shared) {
    match shared.state.last_ping_sent() {
        Some(sent) => {
            let latency = sent.elapsed();
            shared.latency.record(latency);
            tracing::debug!(?latency, "Received pong");
        }
        None => tracing::debug!("Received pong with no ping outstanding"),
    }
}

/// A graceful close ends this reader quietly; anything else is a failure.
fn read_ended(shared: &Shared, quit: &CancellationToken, error: TransportError) {
    if error.is_graceful_close() {
        tracing::info!(error = %error, "Server closed the connection");
    } else if !quit.is_cancelled() {
        tracing::error!(error = %error, "Failed to read frame");
        fail(shared, quit, Failure::Read(error));
    }
}

pub(crate) async fn run_reader(
    mut reader: Box<dyn FrameReader>,
    shared: Arc<Shared>,
    quit: CancellationToken,
    responses: mpsc::Sender<Response>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = quit.cancelled() => break,
            frame = read_with_deadline(reader.as_mut(), shared.config.read_wait) => frame,
        };

        let data = match frame {
            Ok(Frame::Payload(data)) => data,
            Ok(Frame::Pong) => {
                record_pong(&shared);
                continue;
            }
            Ok(Frame::Ping) => {
                tracing::debug!("Received ping");
                continue;
            }
            Ok(Frame::Close { code, reason }) => {
                read_ended(&shared, &quit, TransportError::Closed { code, reason });
                break;
            }
            Err(e) => {
                read_ended(&shared, &quit, e);
                break;
            }
        };

        let response = match Response::decode(&data) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping response frame");
                continue;
            }
        };
        tracing::debug!(id = ?response.id, "Received response");

        // Blocks until the caller takes it. Only shutdown abandons a response.
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            sent = responses.send(response) => {
                if sent.is_err() {
                    tracing::trace!("Response receiver dropped");
                }
            }
        }
    }

    reader.close().await;
}
