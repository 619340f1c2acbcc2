//! Heartbeat-wrapped WebSocket connection
//!
//! Wraps one duplex WebSocket transport and adds:
//! - liveness probing (ping frames plus an application keepalive)
//! - a single-writer lock so concurrent senders never interleave frames
//! - a close notification that fires exactly once, whichever path detects it
//!
//! Inbound frames and the close notification are delivered in order on a
//! per-connection [`EventReceiver`] returned by [`HeartbeatConnection::spawn`].
//! The frame queue is bounded: once it is full the read loop stops reading
//! until the dispatcher catches up.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use switchboard_core::{ConnectionError, SignalConfig};

/// Normal closure, used when the hub closes a connection itself
pub const CLOSE_NORMAL: u16 = 1000;
/// Peer sent a close frame without a status code
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Connection lost without a close handshake (probe failure, liveness timeout)
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Any other transport-level failure
pub const CLOSE_TRANSPORT_ERROR: u16 = 1008;

/// Inbound frames buffered per connection before the read loop waits
pub const EVENT_QUEUE_CAPACITY: usize = 16;

/// Application-level keepalive sent alongside every ping frame
pub const KEEPALIVE_MESSAGE: &str = r#"{"type":"keepalive"}"#;

/// Liveness timing for a connection
#[derive(Clone, Debug)]
pub struct HeartbeatConfig {
    /// Interval between ping frames
    pub ping_period: Duration,
    /// Silence (no pong) tolerated before the connection is declared dead
    pub pong_wait: Duration,
    /// Upper bound for a single frame write
    pub write_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::from(&SignalConfig::default())
    }
}

impl From<&SignalConfig> for HeartbeatConfig {
    fn from(config: &SignalConfig) -> Self {
        Self {
            ping_period: config.ping_period(),
            pong_wait: config.pong_wait(),
            write_timeout: config.write_timeout(),
        }
    }
}

/// Notifications emitted by a connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// One inbound application frame (text or binary)
    Message(Vec<u8>),
    /// The connection is gone; always the last event
    Close { code: u16, reason: String },
}

/// Receiving side of a connection's events
///
/// Yields queued frames in arrival order, then exactly one `Close`, then
/// `None` forever.
pub struct EventReceiver {
    messages: mpsc::Receiver<Vec<u8>>,
    close: oneshot::Receiver<(u16, String)>,
    finished: bool,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        if self.finished {
            return None;
        }

        tokio::select! {
            biased;
            Some(data) = self.messages.recv() => Some(ConnectionEvent::Message(data)),
            close = &mut self.close => {
                self.finished = true;
                close.ok().map(|(code, reason)| ConnectionEvent::Close { code, reason })
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        if self.finished {
            return None;
        }
        if let Ok(data) = self.messages.try_recv() {
            return Some(ConnectionEvent::Message(data));
        }

        match self.close.try_recv() {
            Ok((code, reason)) => {
                self.finished = true;
                Some(ConnectionEvent::Close { code, reason })
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.finished = true;
                None
            }
        }
    }
}

type WsSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// A WebSocket connection with liveness detection and serialized writes
pub struct HeartbeatConnection {
    /// Human-readable name for logs (usually the remote address)
    label: String,
    writer: AsyncMutex<WsSink>,
    closed: AtomicBool,
    inbound: mpsc::Sender<Vec<u8>>,
    /// Close latch: taken exactly once when the connection dies
    close_tx: Mutex<Option<oneshot::Sender<(u16, String)>>>,
    /// Stops the read and liveness tasks
    shutdown: watch::Sender<bool>,
    config: HeartbeatConfig,
}

impl HeartbeatConnection {
    /// Wrap a transport and start its read and liveness tasks
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S>(
        transport: S,
        label: impl Into<String>,
        config: HeartbeatConfig,
    ) -> (Arc<Self>, EventReceiver)
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
    {
        let (sink, stream) = transport.split();
        let (inbound, messages) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (close_tx, close) = oneshot::channel();
        let (shutdown, _) = watch::channel(false);

        let conn = Arc::new(Self {
            label: label.into(),
            writer: AsyncMutex::new(Box::pin(sink)),
            closed: AtomicBool::new(false),
            inbound,
            close_tx: Mutex::new(Some(close_tx)),
            shutdown,
            config,
        });

        tokio::spawn(read_loop(conn.clone(), stream, conn.shutdown.subscribe()));
        tokio::spawn(liveness_loop(conn.clone(), conn.shutdown.subscribe()));

        let events = EventReceiver {
            messages,
            close,
            finished: false,
        };
        (conn, events)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one text frame
    ///
    /// A failed or timed-out write terminates the connection.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        let text = text.into();
        debug!("Send to {}: {}", self.label, text);

        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        match timeout(self.config.write_timeout, writer.send(Message::Text(text))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Write to {} failed: {}", self.label, e);
                self.emit_close(CLOSE_ABNORMAL, "write failed");
                let _ = timeout(self.config.write_timeout, writer.close()).await;
                Err(ConnectionError::Transport(e.to_string()))
            }
            Err(_) => {
                error!("Write to {} timed out", self.label);
                self.emit_close(CLOSE_ABNORMAL, "write timed out");
                Err(ConnectionError::Timeout)
            }
        }
    }

    /// Close the connection
    ///
    /// Idempotent: only the first call sends a close frame and fires the
    /// close notification.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            warn!("Transport already closed: {}", self.label);
            return;
        }

        info!("Closing connection {}", self.label);
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let _ = timeout(
            self.config.write_timeout,
            writer.send(Message::Close(Some(frame))),
        )
        .await;
        let _ = timeout(self.config.write_timeout, writer.close()).await;

        self.emit_close(CLOSE_NORMAL, "closed locally");
    }

    /// Send one ping frame
    async fn probe(&self) -> Result<(), ConnectionError> {
        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        match timeout(self.config.write_timeout, writer.send(Message::Ping(Vec::new()))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Transport(e.to_string())),
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Shut the write half down after the connection has been declared dead
    async fn release(&self) {
        let mut writer = self.writer.lock().await;
        match timeout(self.config.write_timeout, writer.close()).await {
            Ok(Err(e)) => debug!("Release of {} reported: {}", self.label, e),
            Err(_) => debug!("Release of {} timed out", self.label),
            Ok(Ok(())) => {}
        }
    }

    /// Queue one inbound frame, waiting while the queue is full
    ///
    /// Returns false once the connection is shutting down.
    async fn emit_message(&self, data: Vec<u8>, shutdown: &mut watch::Receiver<bool>) -> bool {
        if self.is_closed() {
            return false;
        }

        let queued = tokio::select! {
            _ = shutdown.changed() => return false,
            queued = self.inbound.send(data) => queued,
        };
        if queued.is_err() {
            self.emit_close(CLOSE_ABNORMAL, "event receiver dropped");
            self.release().await;
            return false;
        }
        true
    }

    /// Fire the close notification; returns false if it already fired
    fn emit_close(&self, code: u16, reason: impl Into<String>) -> bool {
        let Some(tx) = self.close_tx.lock().take() else {
            return false;
        };
        self.closed.store(true, Ordering::SeqCst);

        let reason = reason.into();
        info!("Connection {} closed [{}] {}", self.label, code, reason);
        let _ = tx.send((code, reason));
        self.shutdown.send_replace(true);
        true
    }
}

impl std::fmt::Debug for HeartbeatConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatConnection")
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Read frames until the connection dies
async fn read_loop<S>(
    conn: Arc<HeartbeatConnection>,
    mut stream: S,
    mut shutdown: watch::Receiver<bool>,
) where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    // Re-armed by every pong
    let mut deadline = Instant::now() + conn.config.pong_wait;

    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => break,
            next = timeout_at(deadline, stream.next()) => next,
        };

        match next {
            Err(_) => {
                warn!("No pong from {} within {:?}", conn.label, conn.config.pong_wait);
                conn.emit_close(CLOSE_ABNORMAL, "liveness timeout");
                conn.release().await;
                break;
            }
            Ok(None) => {
                conn.emit_close(CLOSE_ABNORMAL, "connection reset");
                break;
            }
            Ok(Some(Ok(message))) => match message {
                Message::Text(text) => {
                    debug!("Received from {}: {}", conn.label, text);
                    if !conn.emit_message(text.into_bytes(), &mut shutdown).await {
                        break;
                    }
                }
                Message::Binary(data) => {
                    if !conn.emit_message(data, &mut shutdown).await {
                        break;
                    }
                }
                Message::Pong(_) => deadline = Instant::now() + conn.config.pong_wait,
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    conn.emit_close(code, reason);
                    break;
                }
                // Pings are answered by tungstenite itself
                Message::Ping(_) | Message::Frame(_) => {}
            },
            Ok(Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed))) => {
                conn.emit_close(CLOSE_ABNORMAL, "connection closed");
                break;
            }
            Ok(Some(Err(e))) => {
                warn!("Read from {} failed: {}", conn.label, e);
                conn.emit_close(CLOSE_TRANSPORT_ERROR, e.to_string());
                conn.release().await;
                break;
            }
        }
    }

    debug!("Read loop finished: {}", conn.label);
}

/// Probe the peer every ping period until the connection dies
async fn liveness_loop(conn: Arc<HeartbeatConnection>, mut shutdown: watch::Receiver<bool>) {
    let period = conn.config.ping_period;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        if conn.is_closed() {
            break;
        }

        if let Err(e) = conn.probe().await {
            error!("Ping to {} failed: {}", conn.label, e);
            conn.emit_close(CLOSE_ABNORMAL, "ping failed");
            conn.release().await;
            break;
        }

        // Browsers hide ping frames from scripts
        if let Err(e) = conn.send(KEEPALIVE_MESSAGE).await {
            error!("Keepalive to {} failed: {}", conn.label, e);
            conn.emit_close(CLOSE_ABNORMAL, "keepalive failed");
            break;
        }
    }

    debug!("Liveness loop finished: {}", conn.label);
}
