/// Page number inside the data file. Page 0 is the root page and is
/// never a member of any chain, so 0 doubles as the chain terminator.
pub type Pgno = u32;

pub const PGNO_NULL: Pgno = 0;

/// Log sequence number: the byte offset of a record in the WAL.
pub type Lsn = u64;

/// Transaction id, monotonically increasing per process lifetime.
pub type Tid = u64;

/// A global byte count (positions inside a variable).
pub type BSize = u64;

/// A byte offset within a single page.
pub type PSize = u16;

/// The byte size of one element of a declared type.
pub type TSize = u32;

pub type DbResult<T = ()> = Result<T, crate::error::DbError>;
