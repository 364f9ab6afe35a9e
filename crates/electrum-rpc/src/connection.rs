//! Connection lifecycle: stream ownership, state machine, reconnection.
//!
//! A [`Connection`] exclusively owns the live TCP (or TLS) stream. A single
//! background task reads newline-delimited frames and forwards them to the
//! session; on end-of-stream or read failure it announces the state change
//! and autonomously redials at a fixed interval until it succeeds or the
//! connection is closed. State transitions are queued as discrete events for
//! one listener (the session's dispatch loop) so the read loop never blocks
//! on a consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio_rustls::{TlsConnector, rustls};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{Envelope, Request};
use crate::transport::LineCodec;

/// Raw byte stream under the codec; TCP or TLS-over-TCP.
trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawStream for T {}

type FrameSink = SplitSink<Framed<Box<dyn RawStream>, LineCodec>, Request>;
type FrameSource = SplitStream<Framed<Box<dyn RawStream>, LineCodec>>;

/// Connection lifecycle states.
///
/// `Ready` and `Reconnected` both mean the stream is usable for sending;
/// `Reconnected` additionally marks a link that has been down, and its
/// announcement is what triggers subscription resumption. `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Reconnecting = 1,
    Ready = 2,
    Reconnected = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Reconnecting,
            2 => ConnectionState::Ready,
            3 => ConnectionState::Reconnected,
            _ => ConnectionState::Closed,
        }
    }

    /// Whether frames may be written in this state
    #[must_use]
    pub fn is_usable(self) -> bool {
        matches!(self, ConnectionState::Ready | ConnectionState::Reconnected)
    }
}

struct Shared {
    address: String,
    tls: Option<Arc<rustls::ClientConfig>>,
    reconnect_interval: Duration,
    state: AtomicU8,
    sink: Mutex<Option<FrameSink>>,
    redial: Notify,
    shutdown: CancellationToken,
    events: mpsc::UnboundedSender<ConnectionState>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Record a state change and queue it as an event. Repeated stores of
    /// the current state are not announced.
    fn transition(&self, next: ConnectionState) {
        let prev = self.state.swap(next as u8, Ordering::SeqCst);
        if prev != next as u8 {
            debug!(state = ?next, "connection state changed");
            let _ = self.events.send(next);
        }
    }
}

/// Owner of the raw stream to one server.
///
/// The session talks to the stream exclusively through [`Connection::send`];
/// the connection knows nothing about ids or methods, it only moves frames
/// and reports state.
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Connect to `address` (`host:port`), optionally upgrading to TLS, and
    /// start the reader task.
    ///
    /// Returns the connection plus the incoming-frame and state-event
    /// queues, both consumed by the session's dispatch loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectFailed`] if the initial dial fails. Later
    /// disconnects never surface here; the connection redials on its own
    /// every `reconnect_interval` until it succeeds or is closed.
    pub async fn dial(
        address: impl Into<String>,
        tls: Option<Arc<rustls::ClientConfig>>,
        reconnect_interval: Duration,
    ) -> Result<(
        Self,
        mpsc::UnboundedReceiver<Envelope>,
        mpsc::UnboundedReceiver<ConnectionState>,
    )> {
        let address = address.into();
        let stream = open_stream(&address, tls.as_ref()).await?;
        let (sink, source) = Framed::new(stream, LineCodec::new()).split();

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            address,
            tls,
            reconnect_interval,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            sink: Mutex::new(Some(sink)),
            redial: Notify::new(),
            shutdown: CancellationToken::new(),
            events: events_tx,
        });
        shared.transition(ConnectionState::Ready);

        tokio::spawn(Self::run(shared.clone(), source, frames_tx));

        Ok((Self { shared }, frames_rx, events_rx))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Write one request frame.
    ///
    /// Readiness is checked and the frame written under the same lock, so a
    /// concurrent disconnect cannot slip between check and use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unreachable`] immediately when the connection is not
    /// usable; a failed write surfaces as a codec error and forces the same
    /// reconnect path as a detected disconnect.
    pub async fn send(&self, request: Request) -> Result<()> {
        let mut guard = self.shared.sink.lock().await;
        if !self.shared.state().is_usable() {
            return Err(Error::Unreachable);
        }
        let Some(sink) = guard.as_mut() else {
            return Err(Error::Unreachable);
        };

        trace!(id = request.id, method = %request.method, "sending frame");
        if let Err(e) = sink.send(request).await {
            warn!(error = %e, "write failed, reconnecting");
            *guard = None;
            self.shared.transition(ConnectionState::Disconnected);
            self.shared.redial.notify_one();
            return Err(e.into());
        }
        Ok(())
    }

    /// Terminate the connection. Idempotent; the state settles at `Closed`
    /// and any in-flight reconnection attempt is abandoned.
    pub fn close(&self) {
        self.shared.shutdown.cancel();
    }

    async fn run(
        shared: Arc<Shared>,
        mut source: FrameSource,
        frames: mpsc::UnboundedSender<Envelope>,
    ) {
        loop {
            tokio::select! {
                () = shared.shutdown.cancelled() => break,

                // A failed write noticed the outage before the reader did
                () = shared.redial.notified() => {
                    match Self::reestablish(&shared).await {
                        Some(next) => source = next,
                        None => break,
                    }
                }

                // Malformed frames never show up here; the codec skips them
                // internally, so an Err is always a stream-poisoning failure
                frame = source.next() => match frame {
                    Some(Ok(envelope)) => {
                        trace!(id = ?envelope.id, method = ?envelope.method, "frame received");
                        if frames.send(envelope).is_err() {
                            break;
                        }
                    }
                    ended => {
                        match ended {
                            Some(Err(e)) => warn!(error = %e, "read failed"),
                            _ => debug!("server closed the stream"),
                        }
                        match Self::reestablish(&shared).await {
                            Some(next) => source = next,
                            None => break,
                        }
                    }
                }
            }
        }

        shared.sink.lock().await.take();
        shared.transition(ConnectionState::Closed);
    }

    /// Redial the same address at a fixed interval until it succeeds,
    /// swapping in the new stream. Returns `None` only when the connection
    /// is closed while retrying.
    async fn reestablish(shared: &Arc<Shared>) -> Option<FrameSource> {
        shared.sink.lock().await.take();
        shared.transition(ConnectionState::Disconnected);
        shared.transition(ConnectionState::Reconnecting);

        let mut retry = tokio::time::interval(shared.reconnect_interval);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shared.shutdown.cancelled() => return None,

                _ = retry.tick() => {
                    match open_stream(&shared.address, shared.tls.as_ref()).await {
                        Ok(stream) => {
                            let (sink, source) = Framed::new(stream, LineCodec::new()).split();
                            *shared.sink.lock().await = Some(sink);
                            shared.transition(ConnectionState::Reconnected);
                            return Some(source);
                        }
                        Err(e) => debug!(error = %e, "redial failed, retrying"),
                    }
                }
            }
        }
    }
}

async fn open_stream(
    address: &str,
    tls: Option<&Arc<rustls::ClientConfig>>,
) -> Result<Box<dyn RawStream>> {
    let tcp = TcpStream::connect(address)
        .await
        .map_err(|e| Error::ConnectFailed(e.to_string()))?;

    let Some(config) = tls else {
        return Ok(Box::new(tcp));
    };

    let host = address.rsplit_once(':').map_or(address, |(host, _)| host);
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::ConnectFailed(format!("invalid server name {host}: {e}")))?;
    let connector = TlsConnector::from(config.clone());
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::ConnectFailed(e.to_string()))?;
    Ok(Box::new(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const FAST_RETRY: Duration = Duration::from_millis(50);

    async fn recv_event(
        events: &mut mpsc::UnboundedReceiver<ConnectionState>,
    ) -> ConnectionState {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for state event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_dial_failure() {
        // Port 1 is essentially never listening
        let result = Connection::dial("127.0.0.1:1", None, FAST_RETRY).await;
        assert!(matches!(result, Err(Error::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (conn, mut frames, mut events) =
            Connection::dial(&addr, None, FAST_RETRY).await.unwrap();
        assert_eq!(recv_event(&mut events).await, ConnectionState::Ready);

        let (mut socket, _) = listener.accept().await.unwrap();

        conn.send(Request::new(0, "server.banner", vec![])).await.unwrap();

        let mut buf = vec![0u8; 1024];
        let n = socket.read(&mut buf).await.unwrap();
        let line = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"server.banner\""));

        socket
            .write_all(b"{\"id\":0,\"result\":\"welcome\"}\n")
            .await
            .unwrap();
        let envelope = timeout(Duration::from_secs(5), frames.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.id, Some(0));

        conn.close();
    }

    #[tokio::test]
    async fn test_eof_triggers_reconnect_state_sequence() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (conn, _frames, mut events) =
            Connection::dial(&addr, None, FAST_RETRY).await.unwrap();
        assert_eq!(recv_event(&mut events).await, ConnectionState::Ready);

        let (first, _) = listener.accept().await.unwrap();
        drop(first);

        assert_eq!(recv_event(&mut events).await, ConnectionState::Disconnected);
        assert_eq!(recv_event(&mut events).await, ConnectionState::Reconnecting);

        // The connection redials the same address on its own
        let (_second, _) = listener.accept().await.unwrap();
        assert_eq!(recv_event(&mut events).await, ConnectionState::Reconnected);
        assert!(conn.state().is_usable());

        conn.close();
        assert_eq!(recv_event(&mut events).await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_send_unreachable_while_reconnecting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (conn, _frames, mut events) =
            Connection::dial(&addr, None, Duration::from_secs(60)).await.unwrap();
        assert_eq!(recv_event(&mut events).await, ConnectionState::Ready);

        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        drop(listener);

        assert_eq!(recv_event(&mut events).await, ConnectionState::Disconnected);
        assert_eq!(recv_event(&mut events).await, ConnectionState::Reconnecting);

        // Rejected immediately rather than queued
        let result = timeout(
            Duration::from_secs(1),
            conn.send(Request::new(1, "server.banner", vec![])),
        )
        .await
        .expect("send must not block while disconnected");
        assert!(matches!(result, Err(Error::Unreachable)));

        conn.close();
    }

    #[tokio::test]
    async fn test_malformed_frame_dropped_stream_survives() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (conn, mut frames, mut events) =
            Connection::dial(&addr, None, FAST_RETRY).await.unwrap();
        assert_eq!(recv_event(&mut events).await, ConnectionState::Ready);
        let (mut socket, _) = listener.accept().await.unwrap();

        socket.write_all(b"this is not json\n").await.unwrap();
        socket.write_all(b"{\"id\":2,\"result\":true}\n").await.unwrap();

        // The malformed line is silently dropped; the next frame arrives
        // on the same stream
        let envelope = timeout(Duration::from_secs(5), frames.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.id, Some(2));

        // And no disconnect/redial cycle happened along the way
        let quiet = timeout(Duration::from_millis(200), events.recv()).await;
        assert!(quiet.is_err(), "bad frame must not drop the connection");

        conn.close();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_terminal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (conn, _frames, mut events) =
            Connection::dial(&addr, None, FAST_RETRY).await.unwrap();
        assert_eq!(recv_event(&mut events).await, ConnectionState::Ready);

        conn.close();
        conn.close();
        assert_eq!(recv_event(&mut events).await, ConnectionState::Closed);
        assert_eq!(conn.state(), ConnectionState::Closed);

        // Closed suppresses further reconnection: no more events arrive
        let quiet = timeout(Duration::from_millis(200), events.recv()).await;
        assert!(quiet.is_err() || quiet.unwrap().is_none());
    }
}
