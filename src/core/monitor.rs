//! Low-balance threshold monitoring
//!
//! This module provides the `ThresholdMonitor`, which raises an `AlertEvent`
//! when an account's balance crosses below its low-balance threshold.
//!
//! # Edge Triggering
//!
//! The monitor remembers, per account, whether the last balance it saw was
//! below the threshold. An alert fires only on the transition from "at or
//! above" to "below". Further drops stay quiet, and a rise back to the
//! threshold or above re-arms the alert. Rises never alert.
//!
//! Below means strictly less than the threshold: a balance exactly at the
//! threshold is not low.
//!
//! # Delivery
//!
//! `check` runs inside the account's lane, so it only decides. Alerts are
//! queued to a delivery task that calls the sink, the same way the
//! broadcaster delivers events, and a slow sink never holds up the account.
//! The task is started on the first alert raised inside a tokio runtime.
//! Outside a runtime the sink is called inline.
//!
//! # State
//!
//! Alert state is in-process only. After a restart every account starts
//! unseen; `check_change` seeds an unseen account from the change's old
//! balance so a restart does not re-alert accounts that were already low.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, warn};

use crate::types::{AccountId, AlertEvent, AlertKind, BalanceChange};

/// Destination for low-balance alerts
///
/// Called from the monitor's delivery task, one alert at a time.
pub trait AlertSink: Send + Sync + 'static {
    fn send_alert(&self, alert: &AlertEvent);
}

impl<F> AlertSink for F
where
    F: Fn(&AlertEvent) + Send + Sync + 'static,
{
    fn send_alert(&self, alert: &AlertEvent) {
        self(alert)
    }
}

/// Alert sink that logs each alert at warn level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn send_alert(&self, alert: &AlertEvent) {
        warn!(
            account = %alert.fund_account_id,
            balance = %alert.balance,
            threshold = %alert.threshold,
            "low balance"
        );
    }
}

/// Alert sink that forwards alerts into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    sender: UnboundedSender<AlertEvent>,
}

impl ChannelAlertSink {
    pub fn new(sender: UnboundedSender<AlertEvent>) -> Self {
        Self { sender }
    }
}

impl AlertSink for ChannelAlertSink {
    fn send_alert(&self, alert: &AlertEvent) {
        if self.sender.send(alert.clone()).is_err() {
            debug!(account = %alert.fund_account_id, "alert receiver dropped");
        }
    }
}

/// Edge-triggered low-balance detector
pub struct ThresholdMonitor {
    threshold: Decimal,
    overrides: DashMap<AccountId, Decimal>,
    below: DashMap<AccountId, bool>,
    sink: Arc<dyn AlertSink>,
    queue: OnceLock<UnboundedSender<AlertEvent>>,
}

impl ThresholdMonitor {
    /// Create a monitor with one threshold for every account
    ///
    /// # Arguments
    ///
    /// * `threshold` - Balance below which an account is considered low
    /// * `sink` - Where alerts are delivered
    pub fn new(threshold: Decimal, sink: impl AlertSink) -> Self {
        Self {
            threshold,
            overrides: DashMap::new(),
            below: DashMap::new(),
            sink: Arc::new(sink),
            queue: OnceLock::new(),
        }
    }

    /// Use a different threshold for one account
    pub fn with_account_threshold(self, account_id: impl Into<AccountId>, threshold: Decimal) -> Self {
        self.overrides.insert(account_id.into(), threshold);
        self
    }

    /// Threshold in force for an account
    pub fn threshold_for(&self, account_id: &AccountId) -> Decimal {
        self.overrides
            .get(account_id)
            .map(|entry| *entry.value())
            .unwrap_or(self.threshold)
    }

    /// Record a balance without alerting
    pub fn observe(&self, account_id: &AccountId, balance: Decimal) {
        let below = balance < self.threshold_for(account_id);
        self.below.insert(account_id.clone(), below);
    }

    /// Record a new balance and alert if it just crossed below the threshold
    ///
    /// An account the monitor has never seen counts as previously at or above
    /// its threshold.
    ///
    /// # Returns
    ///
    /// The alert that was raised, if any. Delivery to the sink may still be
    /// queued when this returns.
    pub fn check(&self, account_id: &AccountId, new_balance: Decimal) -> Option<AlertEvent> {
        let threshold = self.threshold_for(account_id);
        let below = new_balance < threshold;
        let was_below = self
            .below
            .insert(account_id.clone(), below)
            .unwrap_or(false);

        if !below || was_below {
            return None;
        }

        let alert = AlertEvent {
            kind: AlertKind::LowBalance,
            fund_account_id: account_id.clone(),
            balance: new_balance,
            threshold,
            timestamp: Utc::now(),
        };
        self.deliver(alert.clone());
        Some(alert)
    }

    fn deliver(&self, alert: AlertEvent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.sink.send_alert(&alert);
            return;
        };

        let queue = self.queue.get_or_init(|| {
            let (sender, mut alerts) = mpsc::unbounded_channel::<AlertEvent>();
            let sink = Arc::clone(&self.sink);
            runtime.spawn(async move {
                while let Some(alert) = alerts.recv().await {
                    let delivered = catch_unwind(AssertUnwindSafe(|| sink.send_alert(&alert)));
                    if delivered.is_err() {
                        warn!(account = %alert.fund_account_id, "alert sink panicked");
                    }
                }
            });
            sender
        });

        // The delivery task went down with its runtime
        if let Err(unsent) = queue.send(alert) {
            self.sink.send_alert(&unsent.0);
        }
    }

    /// Check a committed change, seeding unseen accounts from its old balance
    pub fn check_change(&self, change: &BalanceChange) -> Option<AlertEvent> {
        if !self.below.contains_key(&change.account_id) {
            self.observe(&change.account_id, change.old_balance);
        }
        self.check(&change.account_id, change.new_balance)
    }
}

impl std::fmt::Debug for ThresholdMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThresholdMonitor")
            .field("threshold", &self.threshold)
            .field("overrides", &self.overrides)
            .field("below", &self.below)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Mutex;
    use std::time::Duration;

    fn dec(value: i64) -> Decimal {
        Decimal::new(value, 0)
    }

    fn recording_monitor(threshold: i64) -> (ThresholdMonitor, Arc<Mutex<Vec<AlertEvent>>>) {
        let alerts = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let alerts = Arc::clone(&alerts);
            move |alert: &AlertEvent| alerts.lock().unwrap().push(alert.clone())
        };
        (ThresholdMonitor::new(dec(threshold), sink), alerts)
    }

    #[test]
    fn test_alerts_fire_only_on_downward_crossings() {
        let (monitor, alerts) = recording_monitor(1000);
        let id = AccountId::from("A");

        let fired: Vec<bool> = [1500, 900, 800, 1200, 700]
            .into_iter()
            .map(|balance| monitor.check(&id, dec(balance)).is_some())
            .collect();

        assert_eq!(fired, vec![false, true, false, false, true]);
        let balances: Vec<Decimal> = alerts.lock().unwrap().iter().map(|a| a.balance).collect();
        assert_eq!(balances, vec![dec(900), dec(700)]);
    }

    #[rstest]
    #[case::exactly_at_threshold(1000, false)]
    #[case::one_cent_below(999, true)]
    #[case::well_above(5000, false)]
    fn test_below_is_strict(#[case] balance: i64, #[case] alerts: bool) {
        let (monitor, _) = recording_monitor(1000);
        assert_eq!(
            monitor.check(&AccountId::from("A"), dec(balance)).is_some(),
            alerts
        );
    }

    #[test]
    fn test_returning_to_threshold_rearms() {
        let (monitor, alerts) = recording_monitor(1000);
        let id = AccountId::from("A");

        monitor.check(&id, dec(900));
        monitor.check(&id, dec(1000));
        monitor.check(&id, dec(999));

        assert_eq!(alerts.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_observe_seeds_without_alerting() {
        let (monitor, alerts) = recording_monitor(1000);
        let id = AccountId::from("A");

        monitor.observe(&id, dec(500));
        assert!(monitor.check(&id, dec(400)).is_none());
        assert!(alerts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_check_change_seeds_from_old_balance() {
        let (monitor, _) = recording_monitor(1000);
        let change = |id: &str, old: i64, new: i64| BalanceChange {
            account_id: AccountId::from(id),
            old_balance: dec(old),
            new_balance: dec(new),
            cause: Some(1),
            committed_at: Utc::now(),
        };

        // Already low before the first change seen: no alert
        assert!(monitor.check_change(&change("A", 800, 700)).is_none());
        // Unseen and crossing: alert
        assert!(monitor.check_change(&change("B", 1100, 900)).is_some());
    }

    #[test]
    fn test_account_threshold_override() {
        let (monitor, _) = recording_monitor(1000);
        let monitor = monitor.with_account_threshold("payroll", dec(50_000));

        let alert = monitor.check(&AccountId::from("payroll"), dec(20_000)).unwrap();
        assert_eq!(alert.threshold, dec(50_000));
        assert!(monitor.check(&AccountId::from("other"), dec(20_000)).is_none());
    }

    #[test]
    fn test_accounts_are_tracked_independently() {
        let (monitor, alerts) = recording_monitor(1000);

        monitor.check(&AccountId::from("A"), dec(900));
        monitor.check(&AccountId::from("B"), dec(900));

        assert_eq!(alerts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_alerts() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let monitor = ThresholdMonitor::new(dec(1000), ChannelAlertSink::new(tx));

        monitor.check(&AccountId::from("A"), dec(10));

        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.kind, AlertKind::LowBalance);
        assert_eq!(alert.balance, dec(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_check_returns_while_sink_is_busy() {
        let (release, gate) = std::sync::mpsc::channel::<()>();
        let gate = Mutex::new(gate);
        let (done_tx, mut done) = tokio::sync::mpsc::unbounded_channel();
        let monitor = ThresholdMonitor::new(dec(1000), move |alert: &AlertEvent| {
            let _ = gate.lock().unwrap().recv();
            let _ = done_tx.send(alert.balance);
        });
        let id = AccountId::from("A");

        assert!(monitor.check(&id, dec(900)).is_some());
        assert!(monitor.check(&id, dec(1100)).is_none());
        assert!(monitor.check(&id, dec(800)).is_some());
        assert!(done.try_recv().is_err());

        release.send(()).unwrap();
        release.send(()).unwrap();
        assert_eq!(done.recv().await, Some(dec(900)));
        assert_eq!(done.recv().await, Some(dec(800)));
    }

    #[tokio::test]
    async fn test_panicking_sink_keeps_delivering() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let monitor = ThresholdMonitor::new(dec(1000), move |alert: &AlertEvent| {
            if alert.fund_account_id == AccountId::from("bad") {
                panic!("sink failure");
            }
            let _ = tx.send(alert.fund_account_id.clone());
        });

        monitor.check(&AccountId::from("bad"), dec(1));
        monitor.check(&AccountId::from("good"), dec(1));

        let delivered = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert_eq!(delivered.unwrap(), Some(AccountId::from("good")));
    }
}
