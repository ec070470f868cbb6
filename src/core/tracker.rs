//! Bookkeeping shared by the orchestrator and the reconciler
//!
//! Tracks, per account, the transactions that are being appended and the
//! transactions that are persisted but not yet applied, and which accounts
//! need reconciliation because an apply failed after its transaction was
//! persisted.
//!
//! The reconciler uses this to avoid counting a persisted transaction twice.
//! A transaction that is in the log and still listed as unapplied will be
//! applied later through the account's lane, so the reconciler leaves it out
//! of the expected balance. Only an append that has not returned yet is
//! ambiguous, and the reconciler waits for those to finish.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::sync::watch;

use crate::types::{AccountId, TransactionId};

#[derive(Debug, Default)]
pub struct ApplyTracker {
    next_ticket: AtomicU64,
    appending: DashMap<AccountId, HashMap<u64, watch::Receiver<()>>>,
    unapplied: DashMap<AccountId, HashSet<TransactionId>>,
    pending: DashSet<AccountId>,
}

impl ApplyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track one submission from just before its append until its apply ends
    ///
    /// The guard counts as appending until [`InFlightGuard::persisted`] is
    /// called, and as unapplied from then until it is dropped.
    pub fn begin(self: &Arc<Self>, account_id: &AccountId) -> InFlightGuard {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (appended, receiver) = watch::channel(());
        self.appending
            .entry(account_id.clone())
            .or_default()
            .insert(ticket, receiver);
        InFlightGuard {
            tracker: Arc::clone(self),
            account_id: account_id.clone(),
            ticket,
            appended: Some(appended),
            transaction: None,
        }
    }

    /// Number of submissions for an account that are appending or not yet applied
    pub fn in_flight(&self, account_id: &AccountId) -> usize {
        let appending = self
            .appending
            .get(account_id)
            .map(|tickets| tickets.len())
            .unwrap_or(0);
        let unapplied = self
            .unapplied
            .get(account_id)
            .map(|ids| ids.len())
            .unwrap_or(0);
        appending + unapplied
    }

    /// Transactions of an account that are persisted and still to be applied
    ///
    /// Waits up to `limit` for appends that are running to return, so every
    /// transaction already visible in the log is classified. Returns `None`
    /// if an append is still running after that.
    pub async fn unapplied_after_appends(
        &self,
        account_id: &AccountId,
        limit: Duration,
    ) -> Option<HashSet<TransactionId>> {
        let running: Vec<watch::Receiver<()>> = self
            .appending
            .get(account_id)
            .map(|tickets| tickets.values().cloned().collect())
            .unwrap_or_default();

        let appended = tokio::time::timeout(limit, async {
            for mut receiver in running {
                // Closed when the guard persists or goes away
                let _ = receiver.changed().await;
            }
        })
        .await;
        if appended.is_err() {
            return None;
        }

        Some(
            self.unapplied
                .get(account_id)
                .map(|ids| ids.value().clone())
                .unwrap_or_default(),
        )
    }

    pub fn mark_pending(&self, account_id: &AccountId) {
        self.pending.insert(account_id.clone());
    }

    pub fn clear_pending(&self, account_id: &AccountId) {
        self.pending.remove(account_id);
    }

    pub fn is_pending(&self, account_id: &AccountId) -> bool {
        self.pending.contains(account_id)
    }

    /// Accounts awaiting reconciliation, sorted
    pub fn pending_accounts(&self) -> Vec<AccountId> {
        let mut accounts: Vec<AccountId> =
            self.pending.iter().map(|id| id.key().clone()).collect();
        accounts.sort();
        accounts
    }

    fn end_append(&self, account_id: &AccountId, ticket: u64) {
        if let Some(mut tickets) = self.appending.get_mut(account_id) {
            tickets.remove(&ticket);
        }
        self.appending
            .remove_if(account_id, |_, tickets| tickets.is_empty());
    }

    fn end_apply(&self, account_id: &AccountId, transaction: TransactionId) {
        if let Some(mut ids) = self.unapplied.get_mut(account_id) {
            ids.remove(&transaction);
        }
        self.unapplied.remove_if(account_id, |_, ids| ids.is_empty());
    }
}

/// One submission's place in the tracker; released on drop
#[derive(Debug)]
pub struct InFlightGuard {
    tracker: Arc<ApplyTracker>,
    account_id: AccountId,
    ticket: u64,
    appended: Option<watch::Sender<()>>,
    transaction: Option<TransactionId>,
}

impl InFlightGuard {
    /// Record that the append returned `transaction`, which is yet to be applied
    pub fn persisted(&mut self, transaction: TransactionId) {
        self.tracker
            .unapplied
            .entry(self.account_id.clone())
            .or_default()
            .insert(transaction);
        self.transaction = Some(transaction);

        // Listed as unapplied before waiters wake
        self.tracker.end_append(&self.account_id, self.ticket);
        self.appended = None;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.appended.take().is_some() {
            self.tracker.end_append(&self.account_id, self.ticket);
        }
        if let Some(transaction) = self.transaction {
            self.tracker.end_apply(&self.account_id, transaction);
        }
    }
}
