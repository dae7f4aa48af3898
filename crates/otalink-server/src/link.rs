//! Connection handles for device sockets.
//!
//! A `DeviceLink` is the sending side of one device connection. Frames are
//! queued to a per-connection writer task which owns the socket sink; every
//! send waits until the writer reports the frame written, so at most one
//! frame per caller is ever outstanding.
//!
//! Closing a link flips a shared flag. Pending and future sends fail with
//! `LinkError::Closed`, and the writer stops draining the queue.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use otalink_protocol::{CodecError, ServerMessage};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

impl LinkId {
    fn next() -> Self {
        Self(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Errors returned by link sends.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The connection is closed or was superseded.
    #[error("connection closed")]
    Closed,

    /// The writer did not accept the frame in time.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    /// The socket rejected the frame.
    #[error("transport error: {0}")]
    Transport(String),

    /// A control message could not be encoded.
    #[error(transparent)]
    Encode(#[from] CodecError),
}

/// One frame on the device channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// JSON control envelope, sent as a text frame.
    Control(ServerMessage),
    /// Raw bytes, sent as a binary frame.
    Binary(Vec<u8>),
}

/// A queued frame together with the channel used to report its outcome.
#[derive(Debug)]
pub struct Outbound {
    pub frame: Frame,
    pub ack: oneshot::Sender<Result<(), LinkError>>,
}

impl Outbound {
    /// The sender stopped waiting for this frame, so it must not be written.
    pub fn is_abandoned(&self) -> bool {
        self.ack.is_closed()
    }
}

/// Sending side of a device connection.
#[derive(Debug, Clone)]
pub struct DeviceLink {
    id: LinkId,
    outbound: mpsc::Sender<Outbound>,
    closed: Arc<watch::Sender<bool>>,
}

/// Receiving side of a link, owned by the connection's writer.
///
/// Dropping the receiver closes the link.
#[derive(Debug)]
pub struct LinkReceiver {
    id: LinkId,
    rx: mpsc::Receiver<Outbound>,
    closed: Arc<watch::Sender<bool>>,
}

impl DeviceLink {
    /// Create a link and the receiver its writer drains.
    ///
    /// `capacity` bounds the number of queued frames across all senders.
    pub fn channel(capacity: usize) -> (DeviceLink, LinkReceiver) {
        let id = LinkId::next();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);

        let link = DeviceLink {
            id,
            outbound: tx,
            closed: closed.clone(),
        };
        let receiver = LinkReceiver { id, rx, closed };
        (link, receiver)
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Whether the connection can still carry frames.
    pub fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }

    /// Close the link. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Resolves once the link is closed.
    pub async fn closed(&self) {
        wait_closed(self.closed.subscribe()).await;
    }

    /// Queue a frame and wait until the writer has put it on the socket.
    pub async fn send(&self, frame: Frame) -> Result<(), LinkError> {
        if !self.is_open() {
            return Err(LinkError::Closed);
        }

        let (ack, done) = oneshot::channel();
        tokio::select! {
            biased;
            queued = self.outbound.send(Outbound { frame, ack }) => {
                queued.map_err(|_| LinkError::Closed)?;
            }
            _ = self.closed() => return Err(LinkError::Closed),
        }

        tokio::select! {
            biased;
            result = done => result.map_err(|_| LinkError::Closed)?,
            _ = self.closed() => Err(LinkError::Closed),
        }
    }

    /// Like `send`, but gives up after `timeout`.
    ///
    /// A connection that cannot take one frame in time is treated as dead.
    /// The link is closed, so a frame still waiting in the queue never
    /// reaches the socket.
    pub async fn send_timeout(&self, frame: Frame, timeout: Duration) -> Result<(), LinkError> {
        match tokio::time::timeout(timeout, self.send(frame)).await {
            Ok(result) => result,
            Err(_) => {
                self.close();
                Err(LinkError::Timeout(timeout))
            }
        }
    }

    pub async fn send_control(&self, msg: ServerMessage) -> Result<(), LinkError> {
        self.send(Frame::Control(msg)).await
    }

    pub async fn send_binary(&self, data: Vec<u8>) -> Result<(), LinkError> {
        self.send(Frame::Binary(data)).await
    }
}

impl LinkReceiver {
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Next queued frame, or `None` once the link is closed or every
    /// `DeviceLink` clone is gone.
    pub async fn recv(&mut self) -> Option<Outbound> {
        if *self.closed.borrow() {
            return None;
        }
        let closed = wait_closed(self.closed.subscribe());
        tokio::select! {
            biased;
            _ = closed => None,
            out = self.rx.recv() => out,
        }
    }

    /// Close the link from the writer side.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }
}

impl Drop for LinkReceiver {
    fn drop(&mut self) {
        self.closed.send_replace(true);
    }
}

async fn wait_closed(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
