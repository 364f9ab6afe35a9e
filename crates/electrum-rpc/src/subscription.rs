//! Subscription registration, delivery, and post-reconnect resumption.
//!
//! Every registration gets its own delivery loop fed by an unbounded
//! channel, so one slow handler never blocks delivery to other
//! subscriptions. Unregistration closes the loop's source rather than
//! stopping it externally; the cancellation scope covers the teardown race
//! where a handler could otherwise fire after its subscription is gone.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::protocol::{Envelope, Request};
use crate::session::{SessionInner, SubscriptionEntry, Waiter};

/// Callback invoked for every frame delivered to a subscription, in wire
/// arrival order.
pub type PushHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Live handle for a standing subscription.
///
/// The handle stays valid across reconnects even though the underlying
/// request id changes on every resumption.
pub struct SubscriptionHandle {
    pub(crate) key: u64,
    pub(crate) cancel: CancellationToken,
}

/// Register a new subscription and send its subscribe request.
pub(crate) async fn start(
    inner: &Arc<SessionInner>,
    method: String,
    params: Vec<String>,
    handler: PushHandler,
) -> Result<SubscriptionHandle> {
    let cancel = inner.shutdown.child_token();
    let id = register(inner, method, params, handler, cancel.clone(), None).await?;
    Ok(SubscriptionHandle { key: id, cancel })
}

/// Remove a subscription and stop its delivery loop. Idempotent.
pub(crate) fn stop(inner: &Arc<SessionInner>, handle: &SubscriptionHandle) {
    handle.cancel.cancel();
    inner
        .table
        .lock()
        .unwrap()
        .retain(|_, waiter| !matches!(waiter, Waiter::Subscription(s) if s.key == handle.key));
}

/// Insert a table entry under a fresh id, spawn its delivery loop, and send
/// the subscribe request. `key` is carried over during resumption so the
/// caller-visible handle keeps working.
async fn register(
    inner: &Arc<SessionInner>,
    method: String,
    params: Vec<String>,
    handler: PushHandler,
    cancel: CancellationToken,
    key: Option<u64>,
) -> Result<u64> {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    spawn_delivery(handler.clone(), frames_rx, cancel.clone());

    let id = inner.next_id();
    let key = key.unwrap_or(id);
    inner.table.lock().unwrap().insert(
        id,
        Waiter::Subscription(SubscriptionEntry {
            method: method.clone(),
            params: params.clone(),
            handler,
            frames: frames_tx,
            cancel,
            key,
        }),
    );

    if let Err(e) = inner.conn.send(Request::new(id, method, params)).await {
        inner.table.lock().unwrap().remove(&id);
        return Err(e);
    }
    Ok(id)
}

/// One delivery loop per registration. Exits when the cancellation scope
/// fires or when the registration is removed and its sender dropped.
fn spawn_delivery(
    handler: PushHandler,
    mut frames: mpsc::UnboundedReceiver<Envelope>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(envelope) => handler(&envelope),
                    None => break,
                },
            }
        }
    });
}

/// Kick off a resumption attempt, superseding any attempt already in
/// flight rather than stacking a second one.
pub(crate) fn spawn_resume(inner: &Arc<SessionInner>) {
    let token = {
        let mut guard = inner.resume.lock().unwrap();
        if let Some(previous) = guard.take() {
            previous.cancel();
        }
        let token = inner.shutdown.child_token();
        *guard = Some(token.clone());
        token
    };
    tokio::spawn(resume(inner.clone(), token));
}

/// Resumption protocol: probe until the reconnected link answers a cheap
/// call end-to-end, then re-register every live subscription under a fresh
/// id with its original method, params, and handler.
async fn resume(inner: Arc<SessionInner>, cancel: CancellationToken) {
    debug!("waiting for reconnected link to become responsive");

    let mut probe = tokio::time::interval(inner.options.resume_poll_interval);
    probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = probe.tick() => {
                let agent = inner.options.agent_id();
                let protocol = inner.options.protocol.clone();
                let check = tokio::select! {
                    () = cancel.cancelled() => return,
                    result = inner.call("server.version", vec![agent, protocol]) => result,
                };
                if check.is_ok() {
                    break;
                }
                trace!("server not yet responsive");
            }
        }
    }

    let entries: Vec<(u64, SubscriptionEntry)> = {
        let table = inner.table.lock().unwrap();
        table
            .iter()
            .filter_map(|(id, waiter)| match waiter {
                Waiter::Subscription(sub) => Some((*id, sub.clone())),
                Waiter::Call(_) => None,
            })
            .collect()
    };

    debug!(count = entries.len(), "resuming subscriptions");
    for (old_id, entry) in entries {
        if cancel.is_cancelled() {
            return;
        }
        // Removing the old entry closes the old delivery source
        inner.table.lock().unwrap().remove(&old_id);

        let method = entry.method.clone();
        if let Err(e) = register(
            &inner,
            entry.method,
            entry.params,
            entry.handler,
            entry.cancel,
            Some(entry.key),
        )
        .await
        {
            warn!(method = %method, error = %e, "failed to resume subscription");
        }
    }
}
