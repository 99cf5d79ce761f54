//! Domain model: value objects, ledger entities and the ports the
//! application layer drives.

pub mod account;
pub mod events;
pub mod phone;
pub mod ports;
pub mod reference;
pub mod savings;
pub mod transaction;
pub mod withdrawal;
