use core::fmt;

use crate::{
    error::DbError,
    types::{DbResult, Lsn, Tid},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Running,
    /// Seen by analysis without a COMMIT; will be rolled back by the
    /// undo phase.
    CandidateForUndo,
    Committed,
    Done,
}

impl TxnState {
    pub fn as_u8(self) -> u8 {
        match self {
            TxnState::Running => 0,
            TxnState::CandidateForUndo => 1,
            TxnState::Committed => 2,
            TxnState::Done => 3,
        }
    }

    pub fn from_u8(v: u8) -> DbResult<TxnState> {
        match v {
            0 => Ok(TxnState::Running),
            1 => Ok(TxnState::CandidateForUndo),
            2 => Ok(TxnState::Committed),
            3 => Ok(TxnState::Done),
            other => Err(DbError::corrupt(format!(
                "invalid transaction state: {}",
                other
            ))),
        }
    }
}

/// The mutable half of a transaction, mirrored in the transaction table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxnData {
    pub last_lsn: Lsn,
    pub undo_next_lsn: Lsn,
    pub state: TxnState,
}

/// A transaction: created by BEGIN, threaded through every logged
/// write, terminated by COMMIT+END or rollback+END.
pub struct Transaction {
    tid: Tid,
    pub(crate) data: TxnData,
}

impl Transaction {
    pub fn new(tid: Tid, data: TxnData) -> Self {
        Self { tid, data }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn last_lsn(&self) -> Lsn {
        self.data.last_lsn
    }

    pub fn state(&self) -> TxnState {
        self.data.state
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.tid)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
