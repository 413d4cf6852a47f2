mod lock_table;
mod txn;
mod txn_table;

pub use lock_table::{LockKey, LockMode, LockTable};
pub use txn::{Transaction, TxnData, TxnState};
pub use txn_table::TxnTable;
