//! Per-account update serialization
//!
//! This module provides the `UpdateSerializer`, which guarantees that for a
//! given account at most one balance mutation is in flight, and that queued
//! mutations run in the order they were submitted.
//!
//! # Design
//!
//! Each account gets a lane: an `Arc<tokio::sync::Mutex<()>>` held in a
//! `DashMap`. Tokio's mutex hands out the lock in FIFO order, so the order in
//! which callers start waiting is the order in which they run. Lanes are
//! created on first use and removed again as soon as nobody holds or waits
//! on them, so idle accounts cost nothing.
//!
//! # Thread Safety
//!
//! Operations for different accounts never share a lane and proceed fully
//! in parallel. The lane map is only locked for the instant it takes to
//! clone or remove a lane handle.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::types::AccountId;

type Lane = Arc<Mutex<()>>;

/// Per-account FIFO execution queue
#[derive(Debug, Default)]
pub struct UpdateSerializer {
    lanes: DashMap<AccountId, Lane>,
}

impl UpdateSerializer {
    /// Create a serializer with no lanes
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` once every earlier operation for the account has finished
    ///
    /// The operation's output is returned unchanged, so fallible operations
    /// hand their `Result` straight back to the caller.
    ///
    /// If the returned future is dropped while waiting, the operation never
    /// runs. If it is dropped while the operation runs, the operation is
    /// cancelled at its next await point; callers that must not be cancelled
    /// mid-mutation run `enqueue` inside a spawned task.
    pub async fn enqueue<F, Fut, T>(&self, account_id: &AccountId, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let ticket = self.ticket(account_id);
        let turn = ticket.lane.lock().await;
        let output = operation().await;
        drop(turn);
        output
    }

    /// Number of accounts that currently have a lane
    pub fn active_lanes(&self) -> usize {
        self.lanes.len()
    }

    fn ticket(&self, account_id: &AccountId) -> LaneTicket<'_> {
        let lane = self
            .lanes
            .entry(account_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        LaneTicket {
            lanes: &self.lanes,
            account_id: account_id.clone(),
            lane,
        }
    }
}

/// A caller's claim on a lane; reclaims the lane when it is the last one
struct LaneTicket<'a> {
    lanes: &'a DashMap<AccountId, Lane>,
    account_id: AccountId,
    lane: Lane,
}

impl Drop for LaneTicket<'_> {
    fn drop(&mut self) {
        // Map + this ticket: no other caller holds or waits on the lane.
        // New callers clone under the same shard lock, so they cannot slip in.
        self.lanes.remove_if(&self.account_id, |_, current| {
            Arc::ptr_eq(current, &self.lane) && Arc::strong_count(current) == 2
        });
    }
}
