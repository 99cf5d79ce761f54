use super::account::{OwnerId, SavingsAccount};
use super::reference::{Reference, Table};
use super::transaction::PendingTransaction;
use super::withdrawal::Withdrawal;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// A row inserted or updated in the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Pending(PendingTransaction),
    Savings(SavingsAccount),
    Withdrawal(Withdrawal),
}

impl RowChange {
    pub fn table(&self) -> Table {
        match self {
            RowChange::Pending(tx) => tx.reference.table(),
            RowChange::Savings(_) => Table::UserSavings,
            RowChange::Withdrawal(_) => Table::Withdrawals,
        }
    }

    fn reference(&self) -> Option<&Reference> {
        match self {
            RowChange::Pending(tx) => Some(&tx.reference),
            _ => None,
        }
    }

    fn owner(&self) -> Option<&OwnerId> {
        match self {
            RowChange::Pending(tx) => tx.owner_id.as_ref(),
            RowChange::Savings(account) => Some(&account.owner_id),
            RowChange::Withdrawal(w) => Some(&w.owner_id),
        }
    }
}

/// Optional row predicate on top of the table filter.
#[derive(Debug, Clone, PartialEq)]
pub enum RowPredicate {
    Any,
    Reference(Reference),
    Owner(OwnerId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    pub table: Table,
    pub predicate: RowPredicate,
}

impl ChangeFilter {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            predicate: RowPredicate::Any,
        }
    }

    /// Changes to the pending row with this reference, in the table its
    /// prefix routes to.
    pub fn reference(reference: Reference) -> Self {
        Self {
            table: reference.table(),
            predicate: RowPredicate::Reference(reference),
        }
    }

    pub fn with_owner(mut self, owner: OwnerId) -> Self {
        self.predicate = RowPredicate::Owner(owner);
        self
    }

    pub fn matches(&self, change: &RowChange) -> bool {
        if change.table() != self.table {
            return false;
        }
        match &self.predicate {
            RowPredicate::Any => true,
            RowPredicate::Reference(reference) => change.reference() == Some(reference),
            RowPredicate::Owner(owner) => change.owner() == Some(owner),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Row(RowChange),
    /// The subscriber fell behind and `n` changes were dropped. Consumers
    /// should re-read the rows they track.
    Lagged(u64),
}

/// A cancelable handle emitting row changes that pass its filter.
///
/// Dropping the handle (or calling [`Subscription::cancel`]) unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<RowChange>,
    filter: ChangeFilter,
}

impl Subscription {
    pub fn new(receiver: broadcast::Receiver<RowChange>, filter: ChangeFilter) -> Self {
        Self { receiver, filter }
    }

    /// Waits for the next matching change. Returns `None` once the store
    /// has shut down its feed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if self.filter.matches(&change) => return Some(ChangeEvent::Row(change)),
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => return Some(ChangeEvent::Lagged(n)),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn cancel(self) {}
}
