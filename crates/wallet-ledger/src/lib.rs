//! Stored-value wallet ledger.
//!
//! Every balance change is an immutable [`WalletTransaction`] appended to the
//! owning user's chain. A user's balance is the `balance_after` of their most
//! recent entry, and each entry's `balance_before` equals the previous
//! entry's `balance_after`.
//!
//! ```text
//! purchase debit   -80.00   100.00 -> 20.00
//! cashback credit  +10.00    20.00 -> 30.00
//! cashback reverse -10.00    30.00 -> 20.00
//! ```
//!
//! The ledger is a plain data structure with no I/O. Callers are expected to
//! mutate it inside whatever transactional unit guards their persistent
//! state, so a debit and the record that explains it commit together.

mod cashback;
mod error;
mod ledger;
mod types;

pub use cashback::{calculate_cashback, CashbackPolicy};
pub use error::LedgerError;
pub use ledger::WalletLedger;
pub use types::{PaymentRef, TransactionMetadata, TransactionType, UserId, WalletTransaction};
