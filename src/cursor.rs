use log::debug;

use crate::{
    cbuffer::CBuffer,
    config::CURSOR_PACKET,
    dtype::Ty,
    error::{DbError, ErrorKind},
    hash_map::{HashIndex, Variable},
    pager::Pager,
    rptree::RpTree,
    transaction::{LockKey, LockMode, Transaction},
    types::{BSize, DbResult, TSize},
};

struct InsertSt {
    r: RpTree,
    var: Variable,
    start: BSize,
    len: BSize,
}

struct ReadSt {
    r: RpTree,
    size: TSize,
    from: BSize,
    n: BSize,
    stride: BSize,
}

struct WriteSt {
    r: RpTree,
    size: TSize,
    from: BSize,
    n: BSize,
    stride: BSize,
}

enum CursorState {
    Idle,
    Insert(InsertSt),
    Read(ReadSt),
    Write(WriteSt),
}

/// A resumable statement executor. Bulk statements are pulled through
/// `execute` ticks bounded by a small scratch packet, so working memory
/// stays constant no matter how much data moves.
pub struct Cursor {
    hm: HashIndex,
    state: CursorState,
}

impl Cursor {
    pub fn new(hm: HashIndex) -> Cursor {
        Cursor {
            hm,
            state: CursorState::Idle,
        }
    }

    pub fn idle(&self) -> bool {
        matches!(self.state, CursorState::Idle)
    }

    /// CREATE: allocate an rptree root and index the variable.
    pub fn create(
        &mut self,
        pager: &mut Pager,
        tx: &mut Transaction,
        name: &str,
        ty: Ty,
    ) -> DbResult {
        debug_assert!(self.idle());

        let size = ty.byte_size() as usize;
        if size == 0 || size > CURSOR_PACKET {
            return Err(DbError::new(
                ErrorKind::InvalidArgument,
                format!(
                    "element size {} is outside the supported range (1..={})",
                    size, CURSOR_PACKET
                ),
            ));
        }

        let r = RpTree::open(None, pager, tx)?;
        let var = Variable {
            name: name.to_string(),
            ty,
            pg0: r.pg0(),
        };
        pager
            .lock_table()
            .lock(tx.tid(), LockKey::Var(var.pg0), LockMode::X)?;
        self.hm.insert(pager, tx, &var)?;
        debug!("created variable {} at root page {}", name, var.pg0);
        Ok(())
    }

    /// DELETE: tombstone the hash entry and free the whole rptree.
    pub fn delete(
        &mut self,
        pager: &mut Pager,
        tx: &mut Transaction,
        name: &str,
    ) -> DbResult {
        debug_assert!(self.idle());

        let var = self.hm.get(pager, tx, name)?;
        let lockt = pager.lock_table();
        lockt.lock(tx.tid(), LockKey::Var(var.pg0), LockMode::X)?;
        lockt.lock(tx.tid(), LockKey::RpTree(var.pg0), LockMode::X)?;
        self.hm.delete(pager, tx, name)?;

        let r = RpTree::open(Some(var.pg0), pager, tx)?;
        r.delete_chain(pager, tx)?;
        Ok(())
    }

    /// INSERT `n` elements at element offset `start`; bytes arrive via
    /// the io buffer across execute ticks.
    pub fn insert(
        &mut self,
        pager: &mut Pager,
        tx: &mut Transaction,
        name: &str,
        start: BSize,
        n: BSize,
    ) -> DbResult {
        debug_assert!(self.idle());

        let var = self.hm.get(pager, tx, name)?;
        pager
            .lock_table()
            .lock(tx.tid(), LockKey::RpTree(var.pg0), LockMode::X)?;
        let size = var.ty.byte_size() as BSize;
        let r = RpTree::open(Some(var.pg0), pager, tx)?;

        self.state = CursorState::Insert(InsertSt {
            r,
            start: start * size,
            len: n * size,
            var,
        });
        Ok(())
    }

    /// READ `n` elements from element offset `from` with `stride`.
    pub fn read(
        &mut self,
        pager: &mut Pager,
        tx: &mut Transaction,
        name: &str,
        from: BSize,
        n: BSize,
        stride: BSize,
    ) -> DbResult {
        debug_assert!(self.idle());

        let var = self.hm.get(pager, tx, name)?;
        pager
            .lock_table()
            .lock(tx.tid(), LockKey::RpTree(var.pg0), LockMode::S)?;
        let size = var.ty.byte_size();
        let r = RpTree::open(Some(var.pg0), pager, tx)?;

        self.state = CursorState::Read(ReadSt {
            r,
            size,
            from,
            n,
            stride,
        });
        Ok(())
    }

    /// WRITE (overwrite in place) `n` elements from element offset
    /// `from` with `stride`.
    pub fn write(
        &mut self,
        pager: &mut Pager,
        tx: &mut Transaction,
        name: &str,
        from: BSize,
        n: BSize,
        stride: BSize,
    ) -> DbResult {
        debug_assert!(self.idle());

        let var = self.hm.get(pager, tx, name)?;
        pager
            .lock_table()
            .lock(tx.tid(), LockKey::RpTree(var.pg0), LockMode::X)?;
        let size = var.ty.byte_size();
        let r = RpTree::open(Some(var.pg0), pager, tx)?;

        self.state = CursorState::Write(WriteSt {
            r,
            size,
            from,
            n,
            stride,
        });
        Ok(())
    }

    /// Advance the pending statement by one packet. `io` is the byte
    /// source for INSERT/WRITE and the sink for READ.
    pub fn execute(
        &mut self,
        pager: &mut Pager,
        tx: &mut Transaction,
        io: &mut CBuffer,
    ) -> DbResult {
        match &mut self.state {
            CursorState::Idle => Err(DbError::new(
                ErrorKind::InvalidArgument,
                "cursor has no pending statement",
            )),
            CursorState::Insert(st) => {
                let mut packet = [0u8; CURSOR_PACKET];
                let want = (st.len as usize).min(CURSOR_PACKET);
                let got = io.read(&mut packet[..want]);
                if got == 0 {
                    return Ok(());
                }

                st.r.seek(st.start, pager)?;
                let written = st.r.insert(&packet[..got], pager, tx)?;
                st.len -= written;
                st.start += written;

                if st.len == 0 {
                    // An insert that grew a new root must re-point the
                    // hash entry.
                    if st.r.pg0() != st.var.pg0 {
                        st.var.pg0 = st.r.pg0();
                        self.hm.delete(pager, tx, &st.var.name)?;
                        self.hm.insert(pager, tx, &st.var)?;
                    }
                    self.state = CursorState::Idle;
                }
                Ok(())
            }
            CursorState::Read(st) => {
                let mut packet = [0u8; CURSOR_PACKET];
                let max = (CURSOR_PACKET / st.size as usize) as BSize;
                let todo = max.min(st.n);

                st.r.seek(st.from * st.size as BSize, pager)?;
                let got = st.r.read(&mut packet, st.size, todo, st.stride, pager)?;

                if got > 0 {
                    io.write(&packet[..got as usize * st.size as usize]);
                }

                st.n -= got;
                st.from += got * st.stride;

                if st.n == 0 || st.r.eof() {
                    self.state = CursorState::Idle;
                }
                Ok(())
            }
            CursorState::Write(st) => {
                let mut packet = [0u8; CURSOR_PACKET];
                let size = st.size as usize;
                let max_bytes = (size * st.n as usize).min(CURSOR_PACKET - CURSOR_PACKET % size);
                let got = io.read(&mut packet[..max_bytes]);
                if got == 0 {
                    return Ok(());
                }
                if got % size != 0 {
                    return Err(DbError::new(
                        ErrorKind::InvalidArgument,
                        "write payload is not a whole number of elements",
                    ));
                }

                st.r.seek(st.from * st.size as BSize, pager)?;
                let written = st.r.write(
                    &packet[..got],
                    st.size,
                    (got / size) as BSize,
                    st.stride,
                    pager,
                    tx,
                )?;

                st.n -= written;
                st.from += written * st.stride;

                if st.n == 0 || st.r.eof() {
                    self.state = CursorState::Idle;
                }
                Ok(())
            }
        }
    }
}
