//! Client-side tracking of one in-flight push payment.
//!
//! [`WaitMachine`] is the pure transition function. [`PaymentSession`] drives
//! it: it calls the initiator, subscribes to the pending row and races the
//! row's change notifications against a timeout. Whichever resolves the
//! machine first wins; later events are no-ops because every transition
//! checks the current state.

use super::initiator::{InitiationRequest, PaymentInitiator};
use crate::domain::account::{Amount, SavingsAccount};
use crate::domain::events::{ChangeEvent, ChangeFilter, RowChange, Subscription};
use crate::domain::ports::SharedLedgerStore;
use crate::domain::reference::Reference;
use crate::domain::transaction::{PendingTransaction, Verification};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// How long the client waits for the provider before giving up.
pub const PAYMENT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// Validation or gateway error before the push was accepted.
    Initiation(String),
    /// The provider or an administrator failed the payment.
    Rejected { reference: Reference, message: String },
    /// Nothing arrived before the timeout. The payment may still settle.
    TimedOut { reference: Reference },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum WaitState {
    #[default]
    Idle,
    Processing,
    Waiting { reference: Reference },
    Success { reference: Reference, amount: Amount },
    Failed { reason: FailureReason },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WaitEvent {
    Submit,
    Initiated(Reference),
    InitiationFailed(String),
    RowChanged(PendingTransaction),
    TimedOut,
    /// The user left the waiting view.
    Cancel,
    /// The user dismissed a terminal result.
    Reset,
}

#[derive(Debug, Default)]
pub struct WaitMachine {
    state: WaitState,
}

impl WaitMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &WaitState {
        &self.state
    }

    pub fn pending_reference(&self) -> Option<&Reference> {
        match &self.state {
            WaitState::Waiting { reference } => Some(reference),
            _ => None,
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self.state, WaitState::Waiting { .. })
    }

    /// Applies `event` and returns whether the state changed.
    pub fn apply(&mut self, event: WaitEvent) -> bool {
        let next = match (&self.state, event) {
            (WaitState::Idle, WaitEvent::Submit) => WaitState::Processing,
            (WaitState::Processing, WaitEvent::Initiated(reference)) => {
                WaitState::Waiting { reference }
            }
            (WaitState::Processing, WaitEvent::InitiationFailed(message)) => WaitState::Failed {
                reason: FailureReason::Initiation(message),
            },
            (WaitState::Waiting { reference }, WaitEvent::RowChanged(row))
                if row.reference == *reference =>
            {
                match row.verified {
                    Verification::Confirmed => WaitState::Success {
                        reference: row.reference,
                        amount: row.amount,
                    },
                    Verification::Failed => WaitState::Failed {
                        reason: FailureReason::Rejected {
                            reference: row.reference,
                            message: row.raw_provider_message,
                        },
                    },
                    Verification::Pending => return false,
                }
            }
            (WaitState::Waiting { reference }, WaitEvent::TimedOut) => WaitState::Failed {
                reason: FailureReason::TimedOut {
                    reference: reference.clone(),
                },
            },
            (WaitState::Waiting { .. }, WaitEvent::Cancel) => WaitState::Idle,
            (WaitState::Success { .. } | WaitState::Failed { .. }, WaitEvent::Reset) => {
                WaitState::Idle
            }
            _ => return false,
        };
        debug!("Payment wait: {:?} -> {:?}", self.state, next);
        self.state = next;
        true
    }
}

enum Wake {
    Row(PendingTransaction),
    Resync,
    FeedClosed,
    Timeout,
    Ignored,
}

/// One payment screen: submit, then wait for confirmation, failure or timeout.
///
/// Owns at most one subscription and one deadline, both released as soon as
/// the machine leaves `Waiting` and when the session is dropped.
pub struct PaymentSession {
    initiator: Arc<PaymentInitiator>,
    store: SharedLedgerStore,
    machine: WaitMachine,
    subscription: Option<Subscription>,
    deadline: Option<Instant>,
    timeout: Duration,
    balance: Option<SavingsAccount>,
}

impl PaymentSession {
    pub fn new(initiator: Arc<PaymentInitiator>, store: SharedLedgerStore) -> Self {
        Self {
            initiator,
            store,
            machine: WaitMachine::new(),
            subscription: None,
            deadline: None,
            timeout: PAYMENT_TIMEOUT,
            balance: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> &WaitState {
        self.machine.state()
    }

    /// Savings balance as refreshed after the last successful payment.
    pub fn balance(&self) -> Option<&SavingsAccount> {
        self.balance.as_ref()
    }

    pub fn is_listening(&self) -> bool {
        self.subscription.is_some() || self.deadline.is_some()
    }

    /// Starts a payment. Ignored unless the session is idle.
    pub async fn submit(&mut self, request: InitiationRequest) -> &WaitState {
        if !self.machine.apply(WaitEvent::Submit) {
            warn!("Payment already in progress; submit ignored");
            return self.machine.state();
        }

        match self.initiator.initiate(request).await {
            Ok(initiation) => {
                let reference = initiation.reference;
                // Subscribe before the first read so no change falls in between.
                self.subscription = Some(
                    self.store
                        .subscribe(ChangeFilter::reference(reference.clone())),
                );
                self.deadline = Some(Instant::now() + self.timeout);
                self.machine.apply(WaitEvent::Initiated(reference));
                self.resync().await;
            }
            Err(e) => {
                self.machine.apply(WaitEvent::InitiationFailed(e.to_string()));
            }
        }
        self.settle_side_effects().await;
        self.machine.state()
    }

    /// Waits until the tracked payment leaves `Waiting`.
    pub async fn wait(&mut self) -> &WaitState {
        while self.machine.is_waiting() {
            let Some(deadline) = self.deadline else {
                break;
            };

            let wake = match self.subscription.as_mut() {
                Some(subscription) => tokio::select! {
                    biased;
                    change = subscription.next() => match change {
                        Some(ChangeEvent::Row(RowChange::Pending(row))) => Wake::Row(row),
                        Some(ChangeEvent::Row(_)) => Wake::Ignored,
                        Some(ChangeEvent::Lagged(_)) => Wake::Resync,
                        None => Wake::FeedClosed,
                    },
                    _ = sleep_until(deadline) => Wake::Timeout,
                },
                None => {
                    sleep_until(deadline).await;
                    Wake::Timeout
                }
            };

            match wake {
                Wake::Row(row) => {
                    self.machine.apply(WaitEvent::RowChanged(row));
                }
                Wake::Resync => self.resync().await,
                Wake::FeedClosed => {
                    warn!("Change feed closed; waiting for timeout only");
                    self.subscription = None;
                }
                Wake::Timeout => {
                    self.machine.apply(WaitEvent::TimedOut);
                }
                Wake::Ignored => {}
            }
        }
        self.settle_side_effects().await;
        self.machine.state()
    }

    /// Leaves the waiting view: drops the subscription and the deadline.
    pub fn cancel(&mut self) {
        self.machine.apply(WaitEvent::Cancel);
        self.release();
    }

    /// Dismisses a terminal result so another payment can start.
    pub fn reset(&mut self) -> bool {
        self.machine.apply(WaitEvent::Reset)
    }

    async fn resync(&mut self) {
        let Some(reference) = self.machine.pending_reference().cloned() else {
            return;
        };
        match self.store.get_pending(&reference).await {
            Ok(Some(row)) => {
                self.machine.apply(WaitEvent::RowChanged(row));
            }
            Ok(None) => warn!("Tracked payment {} has no ledger row", reference),
            Err(e) => warn!("Failed to re-read {}: {}", reference, e),
        }
    }

    async fn settle_side_effects(&mut self) {
        if self.machine.is_waiting() {
            return;
        }
        self.release();
        if let WaitState::Success { reference, .. } = self.machine.state() {
            let reference = reference.clone();
            self.refresh_balance(&reference).await;
        }
    }

    async fn refresh_balance(&mut self, reference: &Reference) {
        let owner = match self.store.get_pending(reference).await {
            Ok(Some(row)) => row.owner_id,
            _ => None,
        };
        if let Some(owner) = owner {
            match self.store.savings(&owner).await {
                Ok(account) => self.balance = account,
                Err(e) => warn!("Failed to refresh balance for {}: {}", owner, e),
            }
        }
    }

    fn release(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::OwnerId;
    use crate::domain::phone::PhoneNumber;
    use crate::domain::transaction::Settlement;

    fn reference() -> Reference {
        "savings_1_abc".parse().unwrap()
    }

    fn row(verified: Verification) -> PendingTransaction {
        let mut row = PendingTransaction::new(
            reference(),
            Some(OwnerId::new("user-1").unwrap()),
            Amount::new(500).unwrap(),
            PhoneNumber::normalize("0712345678").unwrap(),
        );
        match verified {
            Verification::Confirmed => {
                row.apply(&Settlement::confirmed(Some("X"), None));
            }
            Verification::Failed => {
                row.apply(&Settlement::failed(None));
            }
            Verification::Pending => {}
        }
        row
    }

    fn waiting() -> WaitMachine {
        let mut machine = WaitMachine::new();
        assert!(machine.apply(WaitEvent::Submit));
        assert!(machine.apply(WaitEvent::Initiated(reference())));
        machine
    }

    #[test]
    fn test_success_then_timeout_is_noop() {
        let mut machine = waiting();
        assert!(machine.apply(WaitEvent::RowChanged(row(Verification::Confirmed))));
        assert!(!machine.apply(WaitEvent::TimedOut));
        assert!(matches!(machine.state(), WaitState::Success { .. }));
    }

    #[test]
    fn test_timeout_then_success_is_noop() {
        let mut machine = waiting();
        assert!(machine.apply(WaitEvent::TimedOut));
        assert!(!machine.apply(WaitEvent::RowChanged(row(Verification::Confirmed))));
        assert_eq!(
            machine.state(),
            &WaitState::Failed {
                reason: FailureReason::TimedOut {
                    reference: reference()
                }
            }
        );
    }

    #[test]
    fn test_failed_row_fails_wait() {
        let mut machine = waiting();
        assert!(machine.apply(WaitEvent::RowChanged(row(Verification::Failed))));
        assert!(matches!(
            machine.state(),
            WaitState::Failed {
                reason: FailureReason::Rejected { .. }
            }
        ));
    }

    #[test]
    fn test_pending_or_foreign_rows_are_ignored() {
        let mut machine = waiting();
        assert!(!machine.apply(WaitEvent::RowChanged(row(Verification::Pending))));

        let mut other = row(Verification::Confirmed);
        other.reference = "savings_2_def".parse().unwrap();
        assert!(!machine.apply(WaitEvent::RowChanged(other)));
        assert!(machine.is_waiting());
    }

    #[test]
    fn test_initiation_failure() {
        let mut machine = WaitMachine::new();
        machine.apply(WaitEvent::Submit);
        assert!(machine.apply(WaitEvent::InitiationFailed("Invalid phone".to_string())));
        assert_eq!(
            machine.state(),
            &WaitState::Failed {
                reason: FailureReason::Initiation("Invalid phone".to_string())
            }
        );
    }

    #[test]
    fn test_terminal_until_reset() {
        let mut machine = waiting();
        machine.apply(WaitEvent::TimedOut);
        assert!(!machine.apply(WaitEvent::Submit));
        assert!(machine.apply(WaitEvent::Reset));
        assert_eq!(machine.state(), &WaitState::Idle);
        assert!(machine.apply(WaitEvent::Submit));
    }

    #[test]
    fn test_submit_while_waiting_is_ignored() {
        let mut machine = waiting();
        assert!(!machine.apply(WaitEvent::Submit));
        assert!(!machine.apply(WaitEvent::Reset));
        assert_eq!(machine.pending_reference(), Some(&reference()));
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        let mut machine = waiting();
        assert!(machine.apply(WaitEvent::Cancel));
        assert_eq!(machine.state(), &WaitState::Idle);
    }
}
