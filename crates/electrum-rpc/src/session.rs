//! Session layer: request correlation and frame dispatch.
//!
//! A [`Session`] owns the monotonic request-id counter, the correlation
//! table mapping ids to waiters, and the connection itself. One dispatch
//! task routes every incoming frame: pushes fan out to all subscriptions
//! registered for the method, replies go to exactly one waiter by id, and
//! anything unmatched is dropped. The connection has no knowledge of these
//! semantics; it only moves frames and reports state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionState};
use crate::error::{Error, Result};
use crate::keepalive;
use crate::options::Options;
use crate::protocol::{Envelope, Request};
use crate::subscription::{self, PushHandler, SubscriptionHandle};

/// Destination registered in the correlation table for one request id.
pub(crate) enum Waiter {
    /// One-shot reply slot for a synchronous call
    Call(oneshot::Sender<Envelope>),

    /// Standing subscription; receives its initial reply by id and every
    /// push matching its method
    Subscription(SubscriptionEntry),
}

/// Registration record for one standing subscription.
///
/// The entry is re-created under a fresh id during resumption while
/// `method`, `params`, `handler`, `cancel`, and `key` keep their identity,
/// so the caller never sees a gap in the logical subscription.
#[derive(Clone)]
pub(crate) struct SubscriptionEntry {
    pub method: String,
    pub params: Vec<String>,
    pub handler: PushHandler,
    pub frames: mpsc::UnboundedSender<Envelope>,
    pub cancel: CancellationToken,
    pub key: u64,
}

pub(crate) struct SessionInner {
    pub conn: Connection,
    pub options: Options,
    next_id: AtomicU64,
    pub table: StdMutex<HashMap<u64, Waiter>>,
    closed: AtomicBool,
    pub shutdown: CancellationToken,
    /// Token of the in-flight resumption attempt, superseded on the next
    /// reconnect
    pub resume: StdMutex<Option<CancellationToken>>,
}

/// Removes the pending entry on every exit path, including the caller's
/// future being dropped mid-await.
struct PendingGuard<'a> {
    table: &'a StdMutex<HashMap<u64, Waiter>>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.lock().unwrap().remove(&self.id);
    }
}

impl SessionInner {
    /// Allocate a fresh id; session-scoped, strictly increasing from 0,
    /// never reused while the session is alive.
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Synchronous-call primitive: register a one-shot waiter, send, and
    /// suspend until the matching reply arrives or the session closes.
    pub(crate) async fn call(&self, method: &str, params: Vec<String>) -> Result<Envelope> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.table.lock().unwrap().insert(id, Waiter::Call(tx));
        let _guard = PendingGuard {
            table: &self.table,
            id,
        };

        self.conn.send(Request::new(id, method, params)).await?;

        tokio::select! {
            reply = rx => reply.map_err(|_| Error::SessionClosed),
            () = self.shutdown.cancelled() => Err(Error::SessionClosed),
        }
    }

    /// Route one incoming frame to its destination(s).
    fn route(&self, envelope: Envelope) {
        if envelope.is_push() {
            let method = envelope.method.clone().unwrap_or_default();
            let table = self.table.lock().unwrap();
            for waiter in table.values() {
                if let Waiter::Subscription(sub) = waiter {
                    if sub.method == method {
                        let _ = sub.frames.send(envelope.clone());
                    }
                }
            }
            return;
        }

        let Some(id) = envelope.id else {
            trace!("dropping frame with neither method nor id");
            return;
        };

        let mut table = self.table.lock().unwrap();
        match table.get(&id) {
            // A reply releases its pending call; the entry must not outlive it
            Some(Waiter::Call(_)) => {
                if let Some(Waiter::Call(tx)) = table.remove(&id) {
                    let _ = tx.send(envelope);
                }
            }
            Some(Waiter::Subscription(sub)) => {
                let _ = sub.frames.send(envelope);
            }
            None => trace!(id, "dropping reply with no waiter"),
        }
    }

    fn has_subscriptions(&self) -> bool {
        self.table
            .lock()
            .unwrap()
            .values()
            .any(|w| matches!(w, Waiter::Subscription(_)))
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        self.table.lock().unwrap().len()
    }
}

/// Live client session over one server connection.
///
/// Cloning is cheap and shares the underlying session. The session is not
/// closed on drop; call [`Session::close`] to release the connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Open a session: dial the server, start the dispatch loop, and start
    /// the keep-alive timer when enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectFailed`] if the initial dial fails.
    pub async fn open(options: Options) -> Result<Self> {
        let (conn, frames_rx, events_rx) = Connection::dial(
            options.address.clone(),
            options.tls.clone(),
            options.reconnect_interval,
        )
        .await?;

        let inner = Arc::new(SessionInner {
            conn,
            options,
            next_id: AtomicU64::new(0),
            table: StdMutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            resume: StdMutex::new(None),
        });

        tokio::spawn(Self::dispatch(inner.clone(), frames_rx, events_rx));

        if inner.options.keep_alive {
            tokio::spawn(keepalive::run(inner.clone()));
        }

        Ok(Self { inner })
    }

    /// Issue a synchronous request and wait for the matching reply.
    ///
    /// There is no built-in deadline: if the server never replies and the
    /// connection never drops, this suspends until [`Session::close`].
    /// Callers wanting a deadline should wrap the future in
    /// `tokio::time::timeout`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Unreachable`] while the connection is down,
    /// [`Error::SessionClosed`] when the session closes with the call
    /// outstanding, or an I/O/codec error if the write fails.
    pub async fn call(&self, method: &str, params: Vec<String>) -> Result<Envelope> {
        self.inner.call(method, params).await
    }

    /// Register a standing subscription for `method`.
    ///
    /// `handler` is invoked, in arrival order, for the initial reply and
    /// every subsequent push routed to this subscription. The subscription
    /// survives reconnects: after the link recovers it is re-registered
    /// under a fresh id with the same method, params, and handler.
    ///
    /// # Errors
    ///
    /// Fails like [`Session::call`] if the subscribe request cannot be sent.
    pub async fn subscribe(
        &self,
        method: &str,
        params: Vec<String>,
        handler: PushHandler,
    ) -> Result<SubscriptionHandle> {
        if self.inner.is_closed() {
            return Err(Error::SessionClosed);
        }
        subscription::start(&self.inner, method.to_string(), params, handler).await
    }

    /// Remove a subscription and stop its delivery loop. Idempotent.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        subscription::stop(&self.inner, handle);
    }

    /// Current connection lifecycle state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.conn.state()
    }

    /// Close the session: stop the keep-alive timer and any resumption
    /// attempt, release every pending call and subscription, then close the
    /// connection. Safe to call more than once; later calls are no-ops.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing session");

        self.inner.shutdown.cancel();
        if let Some(token) = self.inner.resume.lock().unwrap().take() {
            token.cancel();
        }

        let drained: Vec<Waiter> = {
            let mut table = self.inner.table.lock().unwrap();
            table.drain().map(|(_, waiter)| waiter).collect()
        };
        for waiter in drained {
            match waiter {
                // Dropping the sender releases the caller with SessionClosed
                Waiter::Call(tx) => drop(tx),
                Waiter::Subscription(sub) => sub.cancel.cancel(),
            }
        }

        self.inner.conn.close();
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<SessionInner> {
        &self.inner
    }

    /// Dispatch loop: single consumer of incoming frames and connection
    /// state events. Per-destination delivery order therefore matches wire
    /// arrival order.
    async fn dispatch(
        inner: Arc<SessionInner>,
        mut frames: mpsc::UnboundedReceiver<Envelope>,
        mut events: mpsc::UnboundedReceiver<ConnectionState>,
    ) {
        loop {
            tokio::select! {
                () = inner.shutdown.cancelled() => break,

                event = events.recv() => match event {
                    Some(ConnectionState::Reconnected) => {
                        if inner.has_subscriptions() {
                            subscription::spawn_resume(&inner);
                        }
                    }
                    Some(_) => {}
                    None => break,
                },

                frame = frames.recv() => match frame {
                    Some(envelope) => inner.route(envelope),
                    None => break,
                },
            }
        }
    }
}
