use itertools::Itertools;

use crate::{
    config::{IN_HDR, IN_MAX_KEYS},
    error::DbError,
    paging::{Page, PageType},
    types::{BSize, DbResult, Pgno, PGNO_NULL},
};

const NEXT_OFF: usize = 9;
const PREV_OFF: usize = 13;
const NKEYS_OFF: usize = 17;
const KEYS_OFF: usize = IN_HDR;
const LEAVES_OFF: usize = IN_HDR + 4 * IN_MAX_KEYS;

/// Inner node accessors: a router over `nkeys + 1` children whose keys
/// are cumulative byte counts of the children to their left (inclusive).
impl Page {
    fn in_check(&self) {
        debug_assert_eq!(self.raw_type(), PageType::InnerNode as u8);
    }

    pub fn in_next(&self) -> Pgno {
        self.in_check();
        self.get_u32(NEXT_OFF)
    }

    pub fn in_set_next(&mut self, pg: Pgno) {
        self.in_check();
        self.set_u32(NEXT_OFF, pg);
    }

    pub fn in_prev(&self) -> Pgno {
        self.in_check();
        self.get_u32(PREV_OFF)
    }

    pub fn in_set_prev(&mut self, pg: Pgno) {
        self.in_check();
        self.set_u32(PREV_OFF, pg);
    }

    pub fn in_nkeys(&self) -> usize {
        self.in_check();
        self.get_u16(NKEYS_OFF) as usize
    }

    pub fn in_set_nkeys(&mut self, n: usize) {
        self.in_check();
        debug_assert!(n <= IN_MAX_KEYS);
        self.set_u16(NKEYS_OFF, n as u16);
    }

    pub fn in_is_root(&self) -> bool {
        self.in_next() == PGNO_NULL && self.in_prev() == PGNO_NULL
    }

    pub fn in_key(&self, i: usize) -> BSize {
        self.in_check();
        debug_assert!(i < self.in_nkeys());
        self.get_u32(KEYS_OFF + 4 * i) as BSize
    }

    pub fn in_set_key(&mut self, i: usize, key: BSize) {
        self.in_check();
        debug_assert!(key <= u32::max_value() as BSize);
        self.set_u32(KEYS_OFF + 4 * i, key as u32);
    }

    pub fn in_leaf(&self, i: usize) -> Pgno {
        self.in_check();
        debug_assert!(i <= self.in_nkeys());
        self.get_u32(LEAVES_OFF + 4 * i)
    }

    pub fn in_set_leaf(&mut self, i: usize, pg: Pgno) {
        self.in_check();
        self.set_u32(LEAVES_OFF + 4 * i, pg);
    }

    /// Total bytes routed through this node.
    pub fn in_total(&self) -> BSize {
        let n = self.in_nkeys();
        if n == 0 {
            0
        } else {
            self.in_key(n - 1)
        }
    }

    /// Pick the child index for a byte offset: the first `i` such that
    /// `byte < keys[i]`, or the last child when the byte lies at or past
    /// every key (the leaf clips that case to EOF).
    pub fn in_choose_lidx(&self, byte: BSize) -> usize {
        let n = self.in_nkeys();
        for i in 0..n {
            if byte < self.in_key(i) {
                return i;
            }
        }
        n.saturating_sub(1)
    }

    /// Add `delta` bytes to every routing key at index >= `from`.
    pub fn in_add_right(&mut self, from: usize, delta: BSize) {
        for i in from..self.in_nkeys() {
            let k = self.in_key(i);
            self.in_set_key(i, k + delta);
        }
    }

    /// Subtract `delta` bytes from every routing key at index >= `from`.
    pub fn in_sub_right(&mut self, from: usize, delta: BSize) {
        for i in from..self.in_nkeys() {
            let k = self.in_key(i);
            debug_assert!(k >= delta);
            self.in_set_key(i, k - delta);
        }
    }

    /// Byte length of child `i`.
    pub fn in_child_len(&self, i: usize) -> BSize {
        let left = if i == 0 { 0 } else { self.in_key(i - 1) };
        self.in_key(i) - left
    }

    /// Snapshot the node as `(child, byte length)` pairs.
    pub fn in_children(&self) -> Vec<(Pgno, BSize)> {
        let n = self.in_nkeys();
        let mut out = Vec::with_capacity(n + 1);
        let mut left = 0;
        for i in 0..n {
            let key = self.in_key(i);
            out.push((self.in_leaf(i), key - left));
            left = key;
        }
        out
    }

    /// Rewrite the node from `(child, byte length)` pairs, recomputing
    /// cumulative keys. One key per child.
    pub fn in_set_children(&mut self, children: &[(Pgno, BSize)]) {
        self.in_check();
        debug_assert!(children.len() <= IN_MAX_KEYS);

        let mut acc = 0;
        for (i, (pg, len)) in children.iter().enumerate() {
            acc += len;
            self.in_set_key(i, acc);
            self.in_set_leaf(i, *pg);
        }
        self.in_set_nkeys(children.len());
    }

    pub(crate) fn in_validate(&self, strict: bool) -> DbResult {
        let n = self.get_u16(NKEYS_OFF) as usize;

        if n > IN_MAX_KEYS {
            return Err(DbError::corrupt(format!(
                "inner node nkeys ({}) exceeds maximum ({})",
                n, IN_MAX_KEYS
            )));
        }

        if !strict {
            return Ok(());
        }

        if n == 0 {
            return Err(DbError::corrupt("inner node must route at least one child"));
        }

        let increasing = (0..n)
            .map(|i| self.in_key(i))
            .tuple_windows()
            .all(|(a, b)| a < b);
        if !increasing {
            return Err(DbError::corrupt(
                "inner node keys must be strictly increasing",
            ));
        }

        if !self.in_is_root() && n < IN_MAX_KEYS / 2 {
            return Err(DbError::corrupt(format!(
                "non-root inner node must be at least half full (nkeys: {})",
                n
            )));
        }

        Ok(())
    }
}
