use std::collections::HashMap;

use crate::{
    types::{Lsn, Pgno},
    wal::DptSnapshot,
};

/// The dirty page table: for every dirty page, the LSN of the first
/// update that dirtied it since it was last clean. Bounds the redo scan.
pub struct DirtyPageTable {
    rows: HashMap<Pgno, Lsn>,
}

impl DirtyPageTable {
    pub fn new() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }

    pub fn get(&self, pg: Pgno) -> Option<Lsn> {
        self.rows.get(&pg).copied()
    }

    pub fn insert_if_absent(&mut self, pg: Pgno, rec_lsn: Lsn) {
        self.rows.entry(pg).or_insert(rec_lsn);
    }

    pub fn update(&mut self, pg: Pgno, rec_lsn: Lsn) {
        self.rows.insert(pg, rec_lsn);
    }

    pub fn remove(&mut self, pg: Pgno) {
        self.rows.remove(&pg);
    }

    pub fn min_rec_lsn(&self) -> Option<Lsn> {
        self.rows.values().copied().min()
    }

    pub fn snapshot(&self) -> Vec<DptSnapshot> {
        self.rows
            .iter()
            .map(|(pg, rec_lsn)| DptSnapshot {
                pg: *pg,
                rec_lsn: *rec_lsn,
            })
            .collect()
    }

    pub fn merge_snapshot(&mut self, snap: &[DptSnapshot]) {
        for row in snap {
            self.insert_if_absent(row.pg, row.rec_lsn);
        }
    }
}
