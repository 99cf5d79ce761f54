use crate::domain::account::SavingsAccount;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct BalanceRow<'a> {
    owner_id: &'a str,
    balance: i64,
    updated_at: String,
}

impl<'a> From<&'a SavingsAccount> for BalanceRow<'a> {
    fn from(account: &'a SavingsAccount) -> Self {
        Self {
            owner_id: account.owner_id.as_str(),
            balance: account.balance.0,
            updated_at: account.updated_at.to_rfc3339(),
        }
    }
}

/// Writes a snapshot of savings balances as CSV.
///
/// The header is always written, so an empty ledger still yields
/// `owner_id,balance,updated_at`.
pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(sink);
        Self { writer }
    }

    pub fn write_balances(&mut self, accounts: &[SavingsAccount]) -> Result<()> {
        self.writer
            .write_record(["owner_id", "balance", "updated_at"])?;
        for account in accounts {
            self.writer.serialize(BalanceRow::from(account))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::{Balance, OwnerId};

    #[test]
    fn test_writes_header_and_rows() {
        let mut account = SavingsAccount::new(OwnerId::new("user-1").unwrap());
        account.balance = Balance::new(1500);

        let mut out = Vec::new();
        BalanceWriter::new(&mut out)
            .write_balances(&[account])
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("owner_id,balance,updated_at"));
        assert!(lines.next().unwrap().starts_with("user-1,1500,"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_empty_snapshot_still_has_header() {
        let mut out = Vec::new();
        BalanceWriter::new(&mut out).write_balances(&[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "owner_id,balance,updated_at\n");
    }
}
