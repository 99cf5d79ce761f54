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
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for pending savings deposits, keyed by reference.
pub const CF_SAVINGS_DEPOSITS: &str = "savings_deposits";
/// Column Family for loan disbursement payments, keyed by reference.
pub const CF_LOAN_DISBURSEMENTS: &str = "loan_disbursements";
/// Column Family for savings balances, keyed by owner id.
pub const CF_USER_SAVINGS: &str = "user_savings";
/// Column Family for withdrawal requests, keyed by big-endian id.
pub const CF_WITHDRAWALS: &str = "withdrawals";
/// Column Family for counters.
pub const CF_META: &str = "meta";

const NEXT_WITHDRAWAL_ID: &[u8] = b"next_withdrawal_id";

/// A persistent ledger implementation using RocksDB.
///
/// Each table is a Column Family. Multi-row mutations are committed as one
/// `WriteBatch` while holding `write_lock`, which makes the check of
/// `verified` and the balance credit a single conditional update.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBLedgerStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
    feed: ChangeFeed,
}

fn cf_name(table: Table) -> &'static str {
    match table {
        Table::SavingsDeposits => CF_SAVINGS_DEPOSITS,
        Table::LoanDisbursements => CF_LOAN_DISBURSEMENTS,
        Table::UserSavings => CF_USER_SAVINGS,
        Table::Withdrawals => CF_WITHDRAWALS,
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        PaymentError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Serialization error: {}", e),
        )))
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        PaymentError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Deserialization error: {}", e),
        )))
    })
}

impl RocksDBLedgerStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that every ledger column family exists.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [
            CF_SAVINGS_DEPOSITS,
            CF_LOAN_DISBURSEMENTS,
            CF_USER_SAVINGS,
            CF_WITHDRAWALS,
            CF_META,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
            feed: ChangeFeed::new(),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PaymentError::InternalError(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                name
            ))))
        })
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(&cf, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_all<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }

    fn pending_cf(reference: &Reference) -> &'static str {
        cf_name(reference.table())
    }
}

#[async_trait]
impl LedgerStore for RocksDBLedgerStore {
    async fn insert_pending(&self, tx: PendingTransaction) -> Result<()> {
        let key = tx.reference.to_string();
        {
            let _guard = self.write_lock.lock().await;
            let cf = self.cf(Self::pending_cf(&tx.reference))?;
            if self.db.get_pinned_cf(&cf, key.as_bytes())?.is_some() {
                return Err(PaymentError::DuplicateReference(key));
            }
            self.db.put_cf(&cf, key.as_bytes(), encode(&tx)?)?;
        }
        self.feed.publish(RowChange::Pending(tx));
        Ok(())
    }

    async fn get_pending(&self, reference: &Reference) -> Result<Option<PendingTransaction>> {
        self.read(Self::pending_cf(reference), reference.to_string().as_bytes())
    }

    async fn settle(&self, reference: &Reference, settlement: Settlement) -> Result<SettleOutcome> {
        let key = reference.to_string();
        let (transaction, account) = {
            let _guard = self.write_lock.lock().await;

            let Some(mut transaction) =
                self.read::<PendingTransaction>(Self::pending_cf(reference), key.as_bytes())?
            else {
                return Ok(SettleOutcome::NotFound);
            };
            if !transaction.apply(&settlement) {
                return Ok(SettleOutcome::AlreadyTerminal(transaction));
            }

            let mut batch = WriteBatch::default();
            batch.put_cf(
                self.cf(Self::pending_cf(reference))?,
                key.as_bytes(),
                encode(&transaction)?,
            );

            let account = match (settlement.outcome, transaction.credits_balance()) {
                (Outcome::Confirmed, Some(owner)) => {
                    let mut account = self
                        .read::<SavingsAccount>(CF_USER_SAVINGS, owner.as_str().as_bytes())?
                        .unwrap_or_else(|| SavingsAccount::new(owner.clone()));
                    account.credit(transaction.amount);
                    batch.put_cf(
                        self.cf(CF_USER_SAVINGS)?,
                        owner.as_str().as_bytes(),
                        encode(&account)?,
                    );
                    Some(account)
                }
                _ => None,
            };

            self.db.write(batch)?;
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
        self.read(CF_USER_SAVINGS, owner.as_str().as_bytes())
    }

    async fn all_savings(&self) -> Result<Vec<SavingsAccount>> {
        self.read_all(CF_USER_SAVINGS)
    }

    async fn insert_withdrawal(
        &self,
        owner: OwnerId,
        amount: Amount,
        phone_number: PhoneNumber,
    ) -> Result<Withdrawal> {
        let withdrawal = {
            let _guard = self.write_lock.lock().await;
            let id = self.read::<u64>(CF_META, NEXT_WITHDRAWAL_ID)?.unwrap_or(0) + 1;
            let withdrawal = Withdrawal::new(id, owner, amount, phone_number)?;

            let mut batch = WriteBatch::default();
            batch.put_cf(self.cf(CF_META)?, NEXT_WITHDRAWAL_ID, encode(&id)?);
            batch.put_cf(
                self.cf(CF_WITHDRAWALS)?,
                id.to_be_bytes(),
                encode(&withdrawal)?,
            );
            self.db.write(batch)?;
            withdrawal
        };
        self.feed.publish(RowChange::Withdrawal(withdrawal.clone()));
        Ok(withdrawal)
    }

    async fn get_withdrawal(&self, id: u64) -> Result<Option<Withdrawal>> {
        self.read(CF_WITHDRAWALS, &id.to_be_bytes())
    }

    async fn resolve_withdrawal(
        &self,
        id: u64,
        decision: WithdrawalDecision,
    ) -> Result<WithdrawalOutcome> {
        let (withdrawal, account) = {
            let _guard = self.write_lock.lock().await;
            let Some(mut withdrawal) = self.read::<Withdrawal>(CF_WITHDRAWALS, &id.to_be_bytes())?
            else {
                return Ok(WithdrawalOutcome::NotFound);
            };
            if !withdrawal.is_pending() {
                return Ok(WithdrawalOutcome::AlreadyResolved(withdrawal));
            }

            let mut batch = WriteBatch::default();
            let account = match decision {
                WithdrawalDecision::Approve => {
                    let owner = withdrawal.owner_id.as_str().as_bytes();
                    let mut account = self
                        .read::<SavingsAccount>(CF_USER_SAVINGS, owner)?
                        .unwrap_or_else(|| SavingsAccount::new(withdrawal.owner_id.clone()));
                    account.debit(withdrawal.amount)?;
                    batch.put_cf(self.cf(CF_USER_SAVINGS)?, owner, encode(&account)?);
                    withdrawal.status = WithdrawalStatus::Completed;
                    Some(account)
                }
                WithdrawalDecision::Reject => {
                    withdrawal.status = WithdrawalStatus::Rejected;
                    None
                }
            };
            batch.put_cf(
                self.cf(CF_WITHDRAWALS)?,
                id.to_be_bytes(),
                encode(&withdrawal)?,
            );
            self.db.write(batch)?;
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
