//! Application layer orchestrating the payment flow.
//!
//! `PaymentInitiator` starts push payments, `CallbackReconciler` applies the
//! provider's asynchronous callbacks, `LedgerAdmin` carries manual overrides
//! and withdrawals, and `wait` tracks a single payment from the client side.

pub mod admin;
pub mod initiator;
pub mod reconciler;
pub mod wait;
