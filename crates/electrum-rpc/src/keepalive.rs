//! Keep-alive timer.
//!
//! Servers may disconnect clients that send no requests for roughly ten
//! minutes. While enabled, this task dispatches a lightweight
//! `server.version` call at a fixed interval without registering a waiter;
//! the reply comes back with an id nobody is waiting on and is dropped by
//! the dispatcher. Failures are not escalated, a dead link is already
//! caught by the connection's own read-error detection.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::protocol::Request;
use crate::session::SessionInner;

pub(crate) async fn run(inner: Arc<SessionInner>) {
    let mut tick = tokio::time::interval(inner.options.keep_alive_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; the session just dialed, skip it
    tick.tick().await;

    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,

            _ = tick.tick() => {
                let request = Request::new(
                    inner.next_id(),
                    "server.version",
                    vec![inner.options.agent_id(), inner.options.protocol.clone()],
                );
                match inner.conn.send(request).await {
                    Ok(()) => trace!("keep-alive sent"),
                    Err(e) => debug!(error = %e, "keep-alive send failed"),
                }
            }
        }
    }
}
