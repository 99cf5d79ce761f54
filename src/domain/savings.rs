//! Savings requirements that gate a loan disbursement.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Smallest savings deposit accepted for a push payment, in KES.
pub const MIN_DEPOSIT_AMOUNT: u64 = 100;

const MIN_LOAN: Decimal = dec!(2000);
const MAX_LOAN: Decimal = dec!(30000);
const MIN_SAVINGS: Decimal = dec!(100);
const MAX_SAVINGS: Decimal = dec!(1500);

/// Savings balance a borrower must hold before a loan of `loan_amount` is
/// disbursed. Scales linearly from 100 at KES 2,000 to 1,500 at KES 30,000,
/// rounded up to the next whole shilling.
pub fn required_savings(loan_amount: u64) -> u64 {
    let loan = Decimal::from(loan_amount);
    if loan <= MIN_LOAN {
        return MIN_DEPOSIT_AMOUNT;
    }
    if loan >= MAX_LOAN {
        return 1500;
    }

    // Multiply first: the product is exact, so only a true remainder rounds up.
    let scaled =
        MIN_SAVINGS + (loan - MIN_LOAN) * (MAX_SAVINGS - MIN_SAVINGS) / (MAX_LOAN - MIN_LOAN);
    // Bounded by MAX_SAVINGS, so the conversion cannot fail.
    u64::try_from(scaled.ceil()).unwrap_or(1500)
}
