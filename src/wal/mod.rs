mod record;
mod stream;

pub use record::{DptSnapshot, TxnSnapshot, WalRecord};
pub use stream::Wal;
