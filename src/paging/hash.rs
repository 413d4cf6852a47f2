use crate::{
    config::{HL_DATA, HL_HDR, NBUCKETS},
    paging::{Page, PageType},
    types::Pgno,
};

const HD_BUCKETS_OFF: usize = 9;
const HL_NEXT_OFF: usize = 9;

/// Well-mixed 32-bit hash of a variable name (FNV-1a).
pub fn name_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for b in name {
        h ^= *b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

/// Hash directory accessors. One fixed page (page 1) of bucket heads; a
/// head of 0 means the bucket was never allocated.
impl Page {
    fn hd_check(&self) {
        debug_assert_eq!(self.raw_type(), PageType::HashDirectory as u8);
    }

    pub fn hd_bucket_pos(&self, name: &[u8]) -> usize {
        name_hash(name) as usize % NBUCKETS
    }

    pub fn hd_bucket(&self, pos: usize) -> Pgno {
        self.hd_check();
        debug_assert!(pos < NBUCKETS);
        self.get_u32(HD_BUCKETS_OFF + 4 * pos)
    }

    pub fn hd_set_bucket(&mut self, pos: usize, pg: Pgno) {
        self.hd_check();
        debug_assert!(pos < NBUCKETS);
        self.set_u32(HD_BUCKETS_OFF + 4 * pos, pg);
    }
}

/// Hash leaf accessors: a singly-linked page of serialized variable
/// entries.
impl Page {
    fn hl_check(&self) {
        debug_assert_eq!(self.raw_type(), PageType::HashLeaf as u8);
    }

    pub fn hl_next(&self) -> Pgno {
        self.hl_check();
        self.get_u32(HL_NEXT_OFF)
    }

    pub fn hl_set_next(&mut self, pg: Pgno) {
        self.hl_check();
        self.set_u32(HL_NEXT_OFF, pg);
    }

    pub fn hl_data(&self) -> &[u8] {
        self.hl_check();
        &self.raw[HL_HDR..HL_HDR + HL_DATA]
    }

    pub fn hl_data_mut(&mut self) -> &mut [u8] {
        self.hl_check();
        &mut self.raw[HL_HDR..HL_HDR + HL_DATA]
    }
}
