//! In-process connector for driving the client without sockets.
//!
//! Every successful dial hands the test a [`MemoryPeer`], the server side of
//! the new connection. Dial refusals, write breakage and writer panics can be
//! scripted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::bytes::Bytes;

use super::{
    CLOSE_ABNORMAL, Connection, Connector, Frame, FrameReader, FrameWriter, TransportError,
};

#[derive(Default)]
struct Script {
    refuse_next: usize,
    refuse_all: bool,
    break_next: bool,
    dials: usize,
}

#[derive(Clone)]
pub(crate) struct MemoryConnector {
    script: Arc<Mutex<Script>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let connector = Self {
            script: Arc::new(Mutex::new(Script::default())),
            peers,
        };
        (connector, accepted)
    }

    pub fn refuse_next(&self, n: usize) {
        self.script.lock().unwrap().refuse_next = n;
    }

    pub fn refuse_all(&self, refuse: bool) {
        self.script.lock().unwrap().refuse_all = refuse;
    }

    /// The next accepted connection fails every write from its first frame on.
    pub fn break_writes_on_next_dial(&self) {
        self.script.lock().unwrap().break_next = true;
    }

    /// Total dial attempts, refused ones included.
    pub fn dials(&self) -> usize {
        self.script.lock().unwrap().dials
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn dial(&self, address: &str) -> Result<Connection, TransportError> {
        let broken = {
            let mut script = self.script.lock().unwrap();
            script.dials += 1;
            if script.refuse_all || script.refuse_next > 0 {
                script.refuse_next = script.refuse_next.saturating_sub(1);
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    format!("{address} refused the connection"),
                )));
            }
            std::mem::take(&mut script.break_next)
        };

        let (to_server, received) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let faults = Arc::new(Faults::default());
        faults.broken.store(broken, Ordering::SeqCst);

        let peer = MemoryPeer {
            received,
            to_client,
            faults: Arc::clone(&faults),
        };
        let _ = self.peers.send(peer);

        Ok(Connection::new(
            MemoryReader { inbound },
            MemoryWriter {
                to_server: Some(to_server),
                faults,
            },
        ))
    }
}

#[derive(Default)]
struct Faults {
    broken: AtomicBool,
    panic_on_write: AtomicBool,
}

/// Server side of one memory connection. Dropping it disconnects the client.
pub(crate) struct MemoryPeer {
    received: mpsc::UnboundedReceiver<Frame>,
    to_client: mpsc::UnboundedSender<Frame>,
    faults: Arc<Faults>,
}

impl MemoryPeer {
    /// Next frame the client wrote, or `None` once the client's write half is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.received.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.received.try_recv().ok()
    }

    pub fn send(&self, frame: Frame) {
        let _ = self.to_client.send(frame);
    }

    pub fn send_json(&self, value: Value) {
        self.send(Frame::Payload(Bytes::from(value.to_string())));
    }

    /// Every later client write fails with a broken pipe.
    pub fn break_writes(&self) {
        self.faults.broken.store(true, Ordering::SeqCst);
    }

    /// The next client write panics inside the writer.
    pub fn panic_on_next_write(&self) {
        self.faults.panic_on_write.store(true, Ordering::SeqCst);
    }
}

struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        match self.inbound.recv().await {
            Some(Frame::Close { code, reason }) => Err(TransportError::Closed { code, reason }),
            Some(frame) => Ok(frame),
            None => Err(TransportError::Closed {
                code: CLOSE_ABNORMAL,
                reason: "peer went away".to_string(),
            }),
        }
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

struct MemoryWriter {
    to_server: Option<mpsc::UnboundedSender<Frame>>,
    faults: Arc<Faults>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.faults.panic_on_write.swap(false, Ordering::SeqCst) {
            panic!("injected writer fault");
        }
        if self.faults.broken.load(Ordering::SeqCst) {
            return Err(broken_pipe());
        }
        match &self.to_server {
            Some(to_server) => to_server.send(frame).map_err(|_| broken_pipe()),
            None => Err(broken_pipe()),
        }
    }

    async fn close(&mut self) {
        self.to_server = None;
    }
}

fn broken_pipe() -> TransportError {
    TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "write half broken",
    ))
}
