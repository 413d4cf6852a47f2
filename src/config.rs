use crate::types::Pgno;

/// Size of one page. Power of two.
pub const PAGE_SIZE: usize = 4096;

/// Every page starts with `{type: u8, page_lsn: u64}`.
pub const COMMON_HDR: usize = 9;

/// Data list header: common + next(4) + prev(4) + used(2).
pub const DL_HDR: usize = COMMON_HDR + 10;

/// Usable bytes in a data list page.
pub const DL_CAPACITY: usize = PAGE_SIZE - DL_HDR;

/// Remainder byte the donor keeps when a balance splits an odd total.
pub const DL_REM: usize = DL_CAPACITY % 2;

/// Inner node header: common + next(4) + prev(4) + nkeys(2).
pub const IN_HDR: usize = COMMON_HDR + 10;

/// Keys are u32 cumulative byte counts; there is one more leaf than keys.
pub const IN_MAX_KEYS: usize = (PAGE_SIZE - IN_HDR - 4) / 8;

/// Hash leaf header: common + next(4).
pub const HL_HDR: usize = COMMON_HDR + 4;

/// Usable entry bytes in a hash leaf page.
pub const HL_DATA: usize = PAGE_SIZE - HL_HDR;

/// Bucket count of the (single, fixed) hash directory page.
pub const NBUCKETS: usize = 512;

/// Number of frames in the buffer pool.
pub const MEMORY_PAGE_LEN: usize = 64;

/// Maximum rptree height a seek will traverse.
pub const SEEK_STACK_DEPTH: usize = 20;

/// Scratch packet moved per cursor execute tick.
pub const CURSOR_PACKET: usize = 2048;

/// Seconds a lock request waits before giving up.
pub const LOCK_TIMEOUT_SECS: u64 = 3;

pub const ROOT_PGNO: Pgno = 0;

pub const HASH_DIR_PGNO: Pgno = 1;
