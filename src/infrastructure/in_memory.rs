use super::change_feed::ChangeFeed;
use crate::domain::account::{Amount, OwnerId, SavingsAccount};
use crate::domain::events::{ChangeFilter, RowChange, Subscription};
use crate::domain::phone::PhoneNumber;
use crate::domain::ports::LedgerStore;
use crate::domain::reference::{Reference, Table};
use crate::domain::transaction::{Outcome, PendingTransaction, SettleOutcome, Settlement};
use crate::domain::withdrawal::{Withdrawal, WithdrawalDecision, WithdrawalOutcome, WithdrawalStatus};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    savings_deposits: HashMap<Reference, PendingTransaction>,
    loan_disbursements: HashMap<Reference, PendingTransaction>,
    user_savings: HashMap<OwnerId, SavingsAccount>,
    withdrawals: BTreeMap<u64, Withdrawal>,
    next_withdrawal_id: u64,
}

impl Tables {
    fn pending(&self, reference: &Reference) -> &HashMap<Reference, PendingTransaction> {
        match reference.table() {
            Table::LoanDisbursements => &self.loan_disbursements,
            _ => &self.savings_deposits,
        }
    }

    fn pending_mut(&mut self, reference: &Reference) -> &mut HashMap<Reference, PendingTransaction> {
        match reference.table() {
            Table::LoanDisbursements => &mut self.loan_disbursements,
            _ => &mut self.savings_deposits,
        }
    }
}

/// A thread-safe in-memory ledger.
///
/// All tables live behind one `RwLock`, so a settle holds the write lock
/// across the `verified` check, the status change and the balance credit.
/// Ideal for testing or deployments where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<Tables>>,
    feed: ChangeFeed,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows currently held in `table`, for inspection in tests and tooling.
    pub async fn pending_rows(&self, table: Table) -> Vec<PendingTransaction> {
        let tables = self.tables.read().await;
        let rows = match table {
            Table::SavingsDeposits => &tables.savings_deposits,
            Table::LoanDisbursements => &tables.loan_disbursements,
            Table::UserSavings | Table::Withdrawals => return Vec::new(),
        };
        rows.values().cloned().collect()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_pending(&self, tx: PendingTransaction) -> Result<()> {
        {
            let mut tables = self.tables.write().await;
            let rows = tables.pending_mut(&tx.reference);
            if rows.contains_key(&tx.reference) {
                return Err(PaymentError::DuplicateReference(tx.reference.to_string()));
            }
            rows.insert(tx.reference.clone(), tx.clone());
        }
        self.feed.publish(RowChange::Pending(tx));
        Ok(())
    }

    async fn get_pending(&self, reference: &Reference) -> Result<Option<PendingTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables.pending(reference).get(reference).cloned())
    }

    async fn settle(&self, reference: &Reference, settlement: Settlement) -> Result<SettleOutcome> {
        let (transaction, account) = {
            let mut tables = self.tables.write().await;

            let transaction = {
                let Some(row) = tables.pending_mut(reference).get_mut(reference) else {
                    return Ok(SettleOutcome::NotFound);
                };
                if !row.apply(&settlement) {
                    return Ok(SettleOutcome::AlreadyTerminal(row.clone()));
                }
                row.clone()
            };

            let account = match (settlement.outcome, transaction.credits_balance()) {
                (Outcome::Confirmed, Some(owner)) => {
                    let account = tables
                        .user_savings
                        .entry(owner.clone())
                        .or_insert_with(|| SavingsAccount::new(owner.clone()));
                    account.credit(transaction.amount);
                    Some(account.clone())
                }
                _ => None,
            };
            (transaction, account)
        };

        self.feed.publish(RowChange::Pending(transaction.clone()));
        if let Some(account) = &account {
            self.feed.publish(RowChange::Savings(account.clone()));
        }
        Ok(SettleOutcome::Applied {
            transaction,
            account,
        })
    }

    async fn savings(&self, owner: &OwnerId) -> Result<Option<SavingsAccount>> {
        let tables = self.tables.read().await;
        Ok(tables.user_savings.get(owner).cloned())
    }

    async fn all_savings(&self) -> Result<Vec<SavingsAccount>> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<_> = tables.user_savings.values().cloned().collect();
        accounts.sort_by(|a, b| a.owner_id.cmp(&b.owner_id));
        Ok(accounts)
    }

    async fn insert_withdrawal(
        &self,
        owner: OwnerId,
        amount: Amount,
        phone_number: PhoneNumber,
    ) -> Result<Withdrawal> {
        let withdrawal = {
            let mut tables = self.tables.write().await;
            let id = tables.next_withdrawal_id + 1;
            let withdrawal = Withdrawal::new(id, owner, amount, phone_number)?;
            tables.next_withdrawal_id = id;
            tables.withdrawals.insert(id, withdrawal.clone());
            withdrawal
        };
        self.feed.publish(RowChange::Withdrawal(withdrawal.clone()));
        Ok(withdrawal)
    }

    async fn get_withdrawal(&self, id: u64) -> Result<Option<Withdrawal>> {
        let tables = self.tables.read().await;
        Ok(tables.withdrawals.get(&id).cloned())
    }

    async fn resolve_withdrawal(
        &self,
        id: u64,
        decision: WithdrawalDecision,
    ) -> Result<WithdrawalOutcome> {
        let (withdrawal, account) = {
            let mut tables = self.tables.write().await;
            let Some(withdrawal) = tables.withdrawals.get(&id).cloned() else {
                return Ok(WithdrawalOutcome::NotFound);
            };
            if !withdrawal.is_pending() {
                return Ok(WithdrawalOutcome::AlreadyResolved(withdrawal));
            }

            let account = match decision {
                WithdrawalDecision::Approve => {
                    let mut account = tables
                        .user_savings
                        .get(&withdrawal.owner_id)
                        .cloned()
                        .unwrap_or_else(|| SavingsAccount::new(withdrawal.owner_id.clone()));
                    account.debit(withdrawal.amount)?;
                    tables
                        .user_savings
                        .insert(account.owner_id.clone(), account.clone());
                    Some(account)
                }
                WithdrawalDecision::Reject => None,
            };

            let mut withdrawal = withdrawal;
            withdrawal.status = match decision {
                WithdrawalDecision::Approve => WithdrawalStatus::Completed,
                WithdrawalDecision::Reject => WithdrawalStatus::Rejected,
            };
            tables.withdrawals.insert(id, withdrawal.clone());
            (withdrawal, account)
        };

        self.feed.publish(RowChange::Withdrawal(withdrawal.clone()));
        if let Some(account) = account {
            self.feed.publish(RowChange::Savings(account));
        }
        Ok(WithdrawalOutcome::Resolved(withdrawal))
    }

    fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        self.feed.subscribe(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Balance;
    use crate::domain::transaction::Verification;

    fn owner() -> OwnerId {
        OwnerId::new("user-1").unwrap()
    }

    fn phone() -> PhoneNumber {
        PhoneNumber::normalize("0712345678").unwrap()
    }

    fn deposit(reference: &str, amount: u64) -> PendingTransaction {
        PendingTransaction::new(
            reference.parse().unwrap(),
            Some(owner()),
            Amount::new(amount).unwrap(),
            phone(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get_pending() {
        let store = InMemoryLedgerStore::new();
        let tx = deposit("savings_1_abc", 500);

        store.insert_pending(tx.clone()).await.unwrap();
        let retrieved = store.get_pending(&tx.reference).await.unwrap().unwrap();
        assert_eq!(retrieved, tx);

        let missing: Reference = "savings_2_abc".parse().unwrap();
        assert!(store.get_pending(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let store = InMemoryLedgerStore::new();
        store.insert_pending(deposit("savings_1_abc", 500)).await.unwrap();

        let result = store.insert_pending(deposit("savings_1_abc", 700)).await;
        assert!(matches!(result, Err(PaymentError::DuplicateReference(_))));
    }

    #[tokio::test]
    async fn test_settle_credits_once() {
        let store = InMemoryLedgerStore::new();
        let tx = deposit("savings_1_abc", 500);
        store.insert_pending(tx.clone()).await.unwrap();

        let first = store
            .settle(&tx.reference, Settlement::confirmed(Some("ABC"), None))
            .await
            .unwrap();
        assert!(matches!(first, SettleOutcome::Applied { account: Some(_), .. }));

        let second = store
            .settle(&tx.reference, Settlement::confirmed(Some("ABC"), None))
            .await
            .unwrap();
        assert!(matches!(second, SettleOutcome::AlreadyTerminal(_)));

        let account = store.savings(&owner()).await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(500));
    }

    #[tokio::test]
    async fn test_settle_unknown_reference() {
        let store = InMemoryLedgerStore::new();
        let reference: Reference = "loan_9_1".parse().unwrap();
        let outcome = store
            .settle(&reference, Settlement::failed(None))
            .await
            .unwrap();
        assert_eq!(outcome, SettleOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_tables_are_routed_by_reference() {
        let store = InMemoryLedgerStore::new();
        store.insert_pending(deposit("savings_1_abc", 500)).await.unwrap();
        store.insert_pending(deposit("loan_42_1", 300)).await.unwrap();

        let savings = store.pending_rows(Table::SavingsDeposits).await;
        let loans = store.pending_rows(Table::LoanDisbursements).await;
        assert_eq!(savings.len(), 1);
        assert_eq!(loans.len(), 1);
        assert_eq!(loans[0].application_id.as_deref(), Some("42"));

        store
            .settle(&loans[0].reference, Settlement::confirmed(Some("X1"), None))
            .await
            .unwrap();
        assert_eq!(
            store.pending_rows(Table::SavingsDeposits).await[0].verified,
            Verification::Pending
        );
        assert!(store.savings(&owner()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_withdrawal_approval_debits() {
        let store = InMemoryLedgerStore::new();
        let tx = deposit("savings_1_abc", 1000);
        store.insert_pending(tx.clone()).await.unwrap();
        store
            .settle(&tx.reference, Settlement::confirmed(None, None))
            .await
            .unwrap();

        let withdrawal = store
            .insert_withdrawal(owner(), Amount::new(600).unwrap(), phone())
            .await
            .unwrap();
        let outcome = store
            .resolve_withdrawal(withdrawal.id, WithdrawalDecision::Approve)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            WithdrawalOutcome::Resolved(Withdrawal { status: WithdrawalStatus::Completed, .. })
        ));

        let again = store
            .resolve_withdrawal(withdrawal.id, WithdrawalDecision::Approve)
            .await
            .unwrap();
        assert!(matches!(again, WithdrawalOutcome::AlreadyResolved(_)));

        let account = store.savings(&owner()).await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(400));
    }

    #[tokio::test]
    async fn test_withdrawal_approval_without_funds_leaves_it_pending() {
        let store = InMemoryLedgerStore::new();
        let withdrawal = store
            .insert_withdrawal(owner(), Amount::new(600).unwrap(), phone())
            .await
            .unwrap();

        let result = store
            .resolve_withdrawal(withdrawal.id, WithdrawalDecision::Approve)
            .await;
        assert!(matches!(result, Err(PaymentError::InsufficientFunds { .. })));

        let stored = store.get_withdrawal(withdrawal.id).await.unwrap().unwrap();
        assert!(stored.is_pending());
    }
}
