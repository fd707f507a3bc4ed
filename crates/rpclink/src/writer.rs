//! Write worker: the only task that writes to a connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::protocol::Request;
use crate::transport::{Frame, FrameWriter, TransportError, write_with_deadline};
use crate::worker::{Failure, Shared, fail};

fn keepalive(period: Option<Duration>) -> Option<Interval> {
    period.map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    })
}

async fn tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Wait for a caller to fill the slot this writer offered. Pending while
/// nothing is on offer.
async fn handed(offer: &mut Option<oneshot::Receiver<Request>>) -> Option<Request> {
    let request = match offer {
        Some(slot) => slot.await.ok(),
        None => std::future::pending().await,
    };
    *offer = None;
    request
}

/// Write one frame unless the generation is told to quit first.
/// `None` means the write was abandoned.
async fn write_or_quit(
    writer: &mut dyn FrameWriter,
    frame: Frame,
    wait: Option<Duration>,
    quit: &CancellationToken,
) -> Option<Result<(), TransportError>> {
    tokio::select! {
        biased;
        result = write_with_deadline(writer, frame, wait) => Some(result),
        _ = quit.cancelled() => None,
    }
}

fn requeue(shared: &Shared, request: Request) {
    let id = request.id;
    match shared.backlog.push(request) {
        Ok(()) => tracing::info!(%id, "Request moved to backlog"),
        Err(_) => tracing::error!(
            %id,
            held = ?shared.backlog.pending_id(),
            "Backlog occupied, request dropped"
        ),
    }
}

/// Withdraw an outstanding offer. A request that was handed over but not
/// yet written moves to the backlog.
fn withdraw(shared: &Shared, offer: Option<oneshot::Receiver<Request>>) {
    if let Some(mut slot) = offer {
        slot.close();
        if let Ok(request) = slot.try_recv() {
            requeue(shared, request);
        }
    }
}

pub(crate) async fn run_writer(
    mut writer: Box<dyn FrameWriter>,
    shared: Arc<Shared>,
    quit: CancellationToken,
) {
    let wait = shared.config.write_wait;
    let mut keepalive = keepalive(shared.config.ping_period);
    let mut offer: Option<oneshot::Receiver<Request>> = None;

    loop {
        tokio::select! {
            biased;

            _ = quit.cancelled() => break,

            permit = shared.ready.reserve(), if offer.is_none() => {
                let Ok(permit) = permit else {
                    tracing::debug!("Request intake closed");
                    quit.cancel();
                    break;
                };
                let (slot, filled) = oneshot::channel();
                permit.send(slot);
                offer = Some(filled);
            }

            request = handed(&mut offer) => {
                let Some(request) = request else {
                    continue;
                };
                let payload = match request.encode() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(id = %request.id, error = %e, "Dropping request that failed to encode");
                        continue;
                    }
                };
                match write_or_quit(writer.as_mut(), Frame::Payload(payload), wait, &quit).await {
                    Some(Ok(())) => {
                        tracing::debug!(id = %request.id, method = %request.method, "Sent request");
                    }
                    Some(Err(e)) => {
                        tracing::error!(id = %request.id, error = %e, "Failed to write request");
                        requeue(&shared, request);
                        fail(&shared, &quit, Failure::Write(e));
                        break;
                    }
                    None => {
                        requeue(&shared, request);
                        break;
                    }
                }
            }

            _ = tick(&mut keepalive) => {
                match write_or_quit(writer.as_mut(), Frame::Ping, wait, &quit).await {
                    Some(Ok(())) => {
                        shared.state.mark_ping_sent(Instant::now());
                        tracing::debug!("Sent ping");
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Failed to write ping");
                        fail(&shared, &quit, Failure::Ping(e));
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    withdraw(&shared, offer);
    if shared.shutdown.is_cancelled() {
        match write_with_deadline(writer.as_mut(), Frame::normal_close(), wait).await {
            Ok(()) => tracing::debug!("Sent close frame"),
            Err(e) => tracing::debug!(error = %e, "Failed to send close frame"),
        }
    }
    writer.close().await;
}
