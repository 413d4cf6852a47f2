use crate::{
    paging::{Page, PageType},
    types::{Lsn, Pgno},
};

const MASTER_LSN_OFF: usize = 9;
const FIRST_TMBST_OFF: usize = 17;
const TS_NEXT_OFF: usize = 9;

/// Root page accessors. Page 0 stores the checkpoint master LSN and the
/// head of the tombstone free list.
impl Page {
    fn rn_check(&self) {
        debug_assert_eq!(self.raw_type(), PageType::Root as u8);
    }

    pub fn rn_master_lsn(&self) -> Lsn {
        self.rn_check();
        self.get_u64(MASTER_LSN_OFF)
    }

    pub fn rn_set_master_lsn(&mut self, lsn: Lsn) {
        self.rn_check();
        self.set_u64(MASTER_LSN_OFF, lsn);
    }

    pub fn rn_first_tombstone(&self) -> Pgno {
        self.rn_check();
        self.get_u32(FIRST_TMBST_OFF)
    }

    pub fn rn_set_first_tombstone(&mut self, pg: Pgno) {
        self.rn_check();
        self.set_u32(FIRST_TMBST_OFF, pg);
    }
}

/// Tombstone accessors: a freed page whose only live field is the link
/// to the next free page.
impl Page {
    fn ts_check(&self) {
        debug_assert_eq!(self.raw_type(), PageType::Tombstone as u8);
    }

    pub fn ts_next(&self) -> Pgno {
        self.ts_check();
        self.get_u32(TS_NEXT_OFF)
    }

    pub fn ts_set_next(&mut self, pg: Pgno) {
        self.ts_check();
        self.set_u32(TS_NEXT_OFF, pg);
    }
}
