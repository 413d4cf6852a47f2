use std::collections::HashMap;

use crate::{
    error::DbError,
    transaction::{TxnData, TxnState},
    types::{DbResult, Lsn, Tid},
    wal::TxnSnapshot,
};

/// The active transaction table: every live transaction's logging
/// state, keyed by tid. Checkpoints snapshot it; analysis rebuilds it.
pub struct TxnTable {
    rows: HashMap<Tid, TxnData>,
}

impl TxnTable {
    pub fn new() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn insert(&mut self, tid: Tid, data: TxnData) {
        self.rows.insert(tid, data);
    }

    pub fn insert_if_absent(&mut self, tid: Tid, data: TxnData) {
        self.rows.entry(tid).or_insert(data);
    }

    pub fn get(&self, tid: Tid) -> Option<TxnData> {
        self.rows.get(&tid).copied()
    }

    pub fn get_expect(&self, tid: Tid) -> DbResult<TxnData> {
        self.get(tid)
            .ok_or_else(|| DbError::corrupt(format!("transaction {} not in table", tid)))
    }

    pub fn update(&mut self, tid: Tid, data: TxnData) {
        self.rows.insert(tid, data);
    }

    pub fn remove_expect(&mut self, tid: Tid) -> DbResult {
        self.rows
            .remove(&tid)
            .map(|_| ())
            .ok_or_else(|| DbError::corrupt(format!("removing unknown transaction {}", tid)))
    }

    pub fn remove(&mut self, tid: Tid) {
        self.rows.remove(&tid);
    }

    /// The undo phase works on the transaction with the largest
    /// undo_next_lsn among undo candidates.
    pub fn max_candidate_undo_lsn(&self) -> Option<(Tid, Lsn)> {
        self.rows
            .iter()
            .filter(|(_, d)| d.state == TxnState::CandidateForUndo && d.undo_next_lsn > 0)
            .map(|(tid, d)| (*tid, d.undo_next_lsn))
            .max_by_key(|(_, lsn)| *lsn)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tid, TxnData)> + '_ {
        self.rows.iter().map(|(t, d)| (*t, *d))
    }

    pub fn snapshot(&self) -> Vec<TxnSnapshot> {
        self.rows
            .iter()
            .map(|(tid, d)| TxnSnapshot {
                tid: *tid,
                last_lsn: d.last_lsn,
                undo_next_lsn: d.undo_next_lsn,
                state: d.state,
            })
            .collect()
    }

    pub fn merge_snapshot(&mut self, snap: &[TxnSnapshot]) {
        for row in snap {
            self.insert_if_absent(
                row.tid,
                TxnData {
                    last_lsn: row.last_lsn,
                    undo_next_lsn: row.undo_next_lsn,
                    state: row.state,
                },
            );
        }
    }
}
