//! Balance-change event broadcasting
//!
//! This module provides the `EventBroadcaster`, a subscription registry that
//! fans `BalanceChangeEvent`s out to dashboard listeners.
//!
//! # Delivery
//!
//! Every subscription owns an unbounded queue drained by its own tokio task.
//! `publish` only pushes onto those queues, so it never waits on a listener.
//! A listener that is slow, returns an error, or panics affects nothing but
//! its own queue; the balance mutation it is hearing about is already
//! committed.
//!
//! # Ordering
//!
//! Each queue is FIFO. The orchestrator publishes from inside the account's
//! serialized section, so every listener sees one account's events in the
//! order the mutations were committed. There is no ordering across accounts.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::types::BalanceChangeEvent;

/// Receiver of balance-change events
///
/// Called from the subscription's delivery task. Implementations should be
/// quick; a listener that needs to do slow work should hand it off.
pub trait BalanceListener: Send + Sync + 'static {
    /// Handle one event; an `Err` is logged and delivery continues
    fn on_balance_change(&self, event: &BalanceChangeEvent) -> Result<(), String>;
}

impl<F> BalanceListener for F
where
    F: Fn(&BalanceChangeEvent) + Send + Sync + 'static,
{
    fn on_balance_change(&self, event: &BalanceChangeEvent) -> Result<(), String> {
        self(event);
        Ok(())
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// Subscription registry and fan-out point for balance-change events
#[derive(Debug)]
pub struct EventBroadcaster {
    subscribers: DashMap<u64, UnboundedSender<BalanceChangeEvent>>,
    next_id: AtomicU64,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener
    ///
    /// Spawns the subscription's delivery task, so this must be called from
    /// within a tokio runtime.
    pub fn subscribe<L: BalanceListener>(&self, listener: L) -> SubscriptionHandle {
        let (handle, mut events) = self.subscribe_channel();
        let listener = Arc::new(listener);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let delivered =
                    catch_unwind(AssertUnwindSafe(|| listener.on_balance_change(&event)));
                match delivered {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(
                        subscription = handle.0,
                        account = %event.fund_account_id,
                        error = %e,
                        "balance listener failed"
                    ),
                    Err(_) => warn!(
                        subscription = handle.0,
                        account = %event.fund_account_id,
                        "balance listener panicked"
                    ),
                }
            }
            debug!(subscription = handle.0, "delivery task finished");
        });

        handle
    }

    /// Register a raw event queue instead of a listener
    ///
    /// For consumers that want to `await` events themselves. Dropping the
    /// receiver ends the subscription at the next publish.
    pub fn subscribe_channel(&self) -> (SubscriptionHandle, UnboundedReceiver<BalanceChangeEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.insert(id, sender);
        (SubscriptionHandle(id), receiver)
    }

    /// Remove a subscription
    ///
    /// Events already queued are still delivered. Returns `false` if the
    /// handle was not registered.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.subscribers.remove(&handle.0).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Queue an event for every subscriber without waiting on any of them
    pub(crate) fn publish(&self, event: BalanceChangeEvent) {
        let mut closed = Vec::new();

        for subscriber in self.subscribers.iter() {
            if subscriber.value().send(event.clone()).is_err() {
                closed.push(*subscriber.key());
            }
        }

        // Removal has to wait until the iteration guards are released
        for id in closed {
            debug!(subscription = id, "dropping closed subscription");
            self.subscribers.remove(&id);
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
