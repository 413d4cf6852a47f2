mod dirty_table;
mod frame;
mod recovery;

pub use frame::{HandleMode, PageHandle};

use std::{collections::HashMap, path::Path, sync::Arc};

use log::{debug, info, trace};

use crate::{
    config::{MEMORY_PAGE_LEN, PAGE_SIZE, ROOT_PGNO},
    error::{DbError, ErrorKind},
    file_pager::FilePager,
    paging::{Page, PageBuf, PageType, TypeMask, PG_ANY},
    transaction::{LockKey, LockMode, LockTable, Transaction, TxnData, TxnState, TxnTable},
    types::{DbResult, Lsn, Pgno, Tid, PGNO_NULL},
    wal::{Wal, WalRecord},
};

use dirty_table::DirtyPageTable;
use frame::{Frame, FW_ACCESS, FW_DIRTY, FW_PRESENT, FW_X};

/// The paged buffer manager. Owns the frame pool, the WAL, the dirty
/// page table and the active transaction table; hands out S/X page
/// handles whose write images stay private until save.
pub struct Pager {
    fp: FilePager,
    wal: Option<Wal>,
    lockt: Arc<LockTable>,

    /// Set during ARIES restart: flushes skip forcing the WAL because
    /// recovery replays from it rather than appending user data.
    restarting: bool,

    dpt: DirtyPageTable,
    pub(crate) txnt: TxnTable,
    next_tid: Tid,

    frames: Vec<Frame>,
    map: HashMap<Pgno, usize>,
    clock: usize,

    master_lsn: Lsn,
}

impl Pager {
    ///////////////////////////////////////////////////////////
    // Lifecycle

    pub fn open<P: AsRef<Path>>(
        data_path: P,
        wal_path: Option<P>,
        lockt: Arc<LockTable>,
    ) -> DbResult<Pager> {
        let fp = FilePager::open(&data_path)?;
        let is_new = fp.npages() == 0;

        let wal = match &wal_path {
            Some(p) => Some(Wal::open(p)?),
            None => None,
        };

        let mut frames = Vec::with_capacity(MEMORY_PAGE_LEN);
        for _ in 0..MEMORY_PAGE_LEN {
            frames.push(Frame::empty());
        }

        let mut pager = Pager {
            fp,
            wal,
            lockt,
            restarting: false,
            dpt: DirtyPageTable::new(),
            txnt: TxnTable::new(),
            next_tid: 1,
            frames,
            map: HashMap::new(),
            clock: 0,
            master_lsn: 0,
        };

        if is_new {
            pager.open_new()?;
        } else {
            pager.open_existing()?;
        }

        Ok(pager)
    }

    fn open_new(&mut self) -> DbResult {
        info!("creating new database");
        self.fp.reset()?;
        if let Some(w) = self.wal.as_mut() {
            w.reset()?;
        }

        // The first transaction creates the root page.
        let mut tx = self.begin_txn()?;

        let mut root = self.new_extend()?;
        self.page_mut(&root).init_empty(PageType::Root);
        self.save(&mut tx, &mut root, PageType::Root.mask())?;
        self.release(&mut tx, root, PageType::Root.mask())?;

        self.commit(&mut tx)?;
        Ok(())
    }

    fn open_existing(&mut self) -> DbResult {
        info!("opening existing database");

        // Pull the root node cache values straight off disk. A crash
        // can leave the root page unwritten (its image only in the
        // WAL); recovery rebuilds it, so start analysis from zero.
        {
            let mut buf = [0u8; PAGE_SIZE];
            self.fp.read(ROOT_PGNO, &mut buf)?;
            let mut page = Page::zeroed();
            page.raw_mut().copy_from_slice(&buf);
            match page.validate_for_db(PageType::Root.mask()) {
                Ok(()) => self.master_lsn = page.rn_master_lsn(),
                Err(_) if self.wal.is_some() => self.master_lsn = 0,
                Err(e) => return Err(e.wrap("pager/open")),
            }
        }

        if self.wal.is_some() {
            info!(
                "running restart recovery from master lsn {}",
                self.master_lsn
            );
            let max_tid = recovery::restart(self)?;
            self.next_tid = max_tid + 1;
            info!("restart done, next tid: {}", self.next_tid);
        }

        Ok(())
    }

    /// Flush everything and drop cleanly.
    pub fn close(&mut self) -> DbResult {
        self.evict_all()?;
        if let Some(w) = self.wal.as_mut() {
            w.flush_all()?;
        }
        self.fp.sync()?;
        Ok(())
    }

    /// Simulate a crash: buffered WAL bytes and all in-memory frames
    /// are lost; nothing is flushed.
    pub fn crash(mut self) {
        if let Some(w) = self.wal.as_mut() {
            w.crash();
        }
    }

    pub fn npages(&self) -> Pgno {
        self.fp.npages()
    }

    pub fn wal_enabled(&self) -> bool {
        self.wal.is_some()
    }

    pub fn lock_table(&self) -> Arc<LockTable> {
        Arc::clone(&self.lockt)
    }

    ///////////////////////////////////////////////////////////
    // Frame pool

    /// Run the clock hand to find a free slot. Twice around so access
    /// bits get one chance to clear.
    fn reserve_at_clock(&mut self) -> DbResult<usize> {
        for _ in 0..2 * MEMORY_PAGE_LEN {
            let slot = self.clock;

            if !self.frames[slot].check(FW_PRESENT) {
                return Ok(slot);
            }

            if self.frames[slot].pin > 0 || self.frames[slot].check(FW_X) {
                self.clock = (self.clock + 1) % MEMORY_PAGE_LEN;
                continue;
            }

            if self.frames[slot].check(FW_ACCESS) {
                self.frames[slot].clr(FW_ACCESS);
                self.clock = (self.clock + 1) % MEMORY_PAGE_LEN;
                continue;
            }

            self.evict(slot)?;
            return Ok(slot);
        }

        Err(DbError::new(
            ErrorKind::PagerFull,
            "memory buffer pool is full",
        ))
    }

    /// WAL rule: before a dirty page goes to the data file, the log must
    /// be durable up to that page's LSN.
    fn flush_slot(&mut self, slot: usize) -> DbResult {
        if self.frames[slot].check(FW_DIRTY) {
            let pg = self.frames[slot].pg;
            trace!("flushing dirty page {} from slot {}", pg, slot);

            if !self.restarting {
                let plsn = self.frames[slot].page.page_lsn();
                if let Some(w) = self.wal.as_mut() {
                    w.flush_to(plsn)?;
                }
            }

            let buf: PageBuf = *self.frames[slot].page.raw();
            self.fp.write(pg, &buf)?;
            self.frames[slot].clr(FW_DIRTY);
            self.dpt.remove(pg);
        }
        Ok(())
    }

    fn evict(&mut self, slot: usize) -> DbResult {
        debug_assert!(self.frames[slot].pin == 0);
        debug_assert!(!self.frames[slot].check(FW_X));

        self.flush_slot(slot)?;
        let pg = self.frames[slot].pg;
        self.map.remove(&pg);
        self.frames[slot].reset();
        Ok(())
    }

    /// Flush every frame and drop the unpinned ones from the pool.
    pub(crate) fn evict_all(&mut self) -> DbResult {
        for slot in 0..MEMORY_PAGE_LEN {
            if !self.frames[slot].check(FW_PRESENT) || self.frames[slot].check(FW_X) {
                continue;
            }
            self.flush_slot(slot)?;
            if self.frames[slot].pin == 0 {
                self.evict(slot)?;
            }
        }
        Ok(())
    }

    ///////////////////////////////////////////////////////////
    // Handles

    /// Current image of the page: the write frame for an X handle, the
    /// committed read frame otherwise.
    pub fn page(&self, h: &PageHandle) -> &Page {
        match h.wslot {
            Some(w) => &self.frames[w].page,
            None => &self.frames[h.slot].page,
        }
    }

    /// Mutable image. X handles only.
    pub fn page_mut(&mut self, h: &PageHandle) -> &mut Page {
        let w = h.wslot.expect("page_mut on a non-X handle");
        &mut self.frames[w].page
    }

    /// Two distinct mutable images at once (sibling balancing).
    pub fn pages_mut2(&mut self, a: &PageHandle, b: &PageHandle) -> (&mut Page, &mut Page) {
        let ia = a.wslot.expect("pages_mut2 on a non-X handle");
        let ib = b.wslot.expect("pages_mut2 on a non-X handle");
        assert!(ia != ib);

        if ia < ib {
            let (left, right) = self.frames.split_at_mut(ib);
            (&mut left[ia].page, &mut right[0].page)
        } else {
            let (left, right) = self.frames.split_at_mut(ia);
            (&mut right[0].page, &mut left[ib].page)
        }
    }

    fn fetch(&mut self, mask: TypeMask, pg: Pgno, verify: bool) -> DbResult<PageHandle> {
        if let Some(&slot) = self.map.get(&pg) {
            // Readers are served the committed read frame even while a
            // write sibling exists.
            if verify {
                self.frames[slot].page.validate_for_db(mask)?;
            }
            self.frames[slot].pin += 1;
            return Ok(PageHandle {
                mode: HandleMode::S,
                slot,
                wslot: None,
                pg,
            });
        }

        let slot = self.reserve_at_clock()?;

        let mut buf = [0u8; PAGE_SIZE];
        self.fp.read(pg, &mut buf)?;
        self.frames[slot].page.raw_mut().copy_from_slice(&buf);

        if verify {
            self.frames[slot].page.validate_for_db(mask).map_err(|e| {
                e.wrap(&format!("pager/get page {}", pg))
            })?;
        }

        self.frames[slot].pin = 1;
        self.frames[slot].flags = 0;
        self.frames[slot].wsibling = None;
        self.frames[slot].pg = pg;
        self.frames[slot].set(FW_ACCESS);
        self.frames[slot].set(FW_PRESENT);

        self.map.insert(pg, slot);
        self.clock = (self.clock + 1) % MEMORY_PAGE_LEN;

        Ok(PageHandle {
            mode: HandleMode::S,
            slot,
            wslot: None,
            pg,
        })
    }

    /// Fetch a page S-locked and validated against `mask`.
    pub fn get(&mut self, mask: TypeMask, pg: Pgno) -> DbResult<PageHandle> {
        self.fetch(mask, pg, true)
    }

    /// Fetch without validation. Recovery reads pages that may be
    /// mid-update.
    pub fn get_unverified(&mut self, pg: Pgno) -> DbResult<PageHandle> {
        self.fetch(PG_ANY, pg, false)
    }

    /// Promote an S handle to X by reserving a private write sibling.
    pub fn make_writable(&mut self, h: &mut PageHandle) -> DbResult {
        debug_assert!(h.mode == HandleMode::S);
        trace!("making page {} writable", h.pg);

        if self.frames[h.slot].wsibling.is_some() {
            return Err(DbError::new(
                ErrorKind::InvalidArgument,
                format!("page {} already has a write sibling", h.pg),
            ));
        }

        let wslot = self.reserve_at_clock()?;

        self.frames[h.slot].set(FW_DIRTY);

        let image: PageBuf = *self.frames[h.slot].page.raw();
        self.frames[wslot].page.raw_mut().copy_from_slice(&image);
        self.frames[wslot].pin = 1;
        self.frames[wslot].flags = 0;
        self.frames[wslot].wsibling = None;
        self.frames[wslot].pg = h.pg;
        self.frames[wslot].set(FW_PRESENT);
        self.frames[wslot].set(FW_X);

        self.frames[h.slot].wsibling = Some(wslot);
        h.wslot = Some(wslot);
        h.mode = HandleMode::X;

        self.clock = (self.clock + 1) % MEMORY_PAGE_LEN;
        Ok(())
    }

    pub fn maybe_make_writable(&mut self, h: &mut PageHandle) -> DbResult {
        if h.mode == HandleMode::S {
            self.make_writable(h)?;
        }
        Ok(())
    }

    /// Fetch X-locked: a copy-on-write frame pair.
    pub fn get_writable(&mut self, mask: TypeMask, pg: Pgno) -> DbResult<PageHandle> {
        let mut h = self.get(mask, pg)?;
        if let Err(e) = self.make_writable(&mut h) {
            self.release_ro(h, mask)?;
            return Err(e);
        }
        Ok(h)
    }

    fn drop_write_frame(&mut self, h: &mut PageHandle) {
        if let Some(w) = h.wslot.take() {
            self.frames[w].reset();
            self.frames[w].clr(FW_PRESENT);
            self.frames[h.slot].wsibling = None;
        }
        h.mode = HandleMode::S;
    }

    /// Validate, log an UPDATE record, install the write image into the
    /// read frame, and downgrade to S.
    pub fn save(&mut self, tx: &mut Transaction, h: &mut PageHandle, mask: TypeMask) -> DbResult {
        debug_assert!(h.mode == HandleMode::X);

        let wslot = h.wslot.expect("save on a non-X handle");
        self.frames[wslot].page.validate_for_db(mask)?;

        if self.wal.is_some() {
            let undo = Box::new(*self.frames[h.slot].page.raw());
            let prev = tx.data.last_lsn;

            // The page LSN is stamped before the redo image is captured
            // so the logged image carries its own LSN.
            let lsn = self.wal.as_ref().map(|w| w.next_lsn()).unwrap_or(0);
            self.frames[wslot].page.set_page_lsn(lsn);

            let redo = Box::new(*self.frames[wslot].page.raw());
            let rec = WalRecord::Update {
                tid: tx.tid(),
                pg: h.pg,
                prev,
                undo,
                redo,
            };
            let got = self.wal.as_mut().map(|w| w.append(&rec)).unwrap_or(Ok(lsn))?;
            debug_assert!(got == lsn);

            tx.data.last_lsn = lsn;
            tx.data.undo_next_lsn = lsn;
            self.txnt.update(tx.tid(), tx.data);

            self.dpt.insert_if_absent(h.pg, lsn);
        }

        let image: PageBuf = *self.frames[wslot].page.raw();
        self.frames[h.slot].page.raw_mut().copy_from_slice(&image);
        self.drop_write_frame(h);
        Ok(())
    }

    /// Save without WAL logging. Recovery installs images whose log
    /// records already exist.
    pub fn save_no_wal(&mut self, h: &mut PageHandle, mask: TypeMask) -> DbResult {
        debug_assert!(h.mode == HandleMode::X);

        let wslot = h.wslot.expect("save on a non-X handle");
        self.frames[wslot].page.validate_for_db(mask)?;
        self.frames[h.slot].set(FW_DIRTY);

        let image: PageBuf = *self.frames[wslot].page.raw();
        self.frames[h.slot].page.raw_mut().copy_from_slice(&image);
        self.drop_write_frame(h);
        Ok(())
    }

    /// Drop the write image without installing it.
    pub fn cancel_w(&mut self, h: &mut PageHandle) {
        debug_assert!(h.mode == HandleMode::X);
        self.drop_write_frame(h);
    }

    fn unpin(&mut self, h: &PageHandle) {
        debug_assert!(self.frames[h.slot].pin > 0);
        self.frames[h.slot].pin -= 1;
    }

    /// Release a handle: X handles are saved first, then validated and
    /// unpinned.
    pub fn release(
        &mut self,
        tx: &mut Transaction,
        mut h: PageHandle,
        mask: TypeMask,
    ) -> DbResult {
        if h.mode == HandleMode::X {
            if let Err(e) = self.save(tx, &mut h, mask) {
                self.drop_write_frame(&mut h);
                self.unpin(&h);
                return Err(e);
            }
        }

        let check = self.frames[h.slot].page.validate_for_db(mask);
        self.unpin(&h);
        check
    }

    /// Release an S handle.
    pub fn release_ro(&mut self, h: PageHandle, mask: TypeMask) -> DbResult {
        debug_assert!(h.mode == HandleMode::S);
        let check = self.frames[h.slot].page.validate_for_db(mask);
        self.unpin(&h);
        check
    }

    /// Release for paths with no transaction (recovery).
    pub fn release_no_tx(&mut self, mut h: PageHandle, mask: TypeMask) -> DbResult {
        if h.mode == HandleMode::X {
            if let Err(e) = self.save_no_wal(&mut h, mask) {
                self.drop_write_frame(&mut h);
                self.unpin(&h);
                return Err(e);
            }
        }
        let check = self.frames[h.slot].page.validate_for_db(mask);
        self.unpin(&h);
        check
    }

    ///////////////////////////////////////////////////////////
    // Allocation

    /// Allocate a brand new page by extending the file. The returned
    /// handle is X-locked and the page is a blank tombstone until the
    /// caller re-initializes it.
    fn new_extend(&mut self) -> DbResult<PageHandle> {
        trace!("allocating page by extending the file");

        let slot = self.reserve_at_clock()?;
        self.frames[slot].pin = 1;
        self.frames[slot].flags = 0;
        self.frames[slot].wsibling = None;
        self.frames[slot].set(FW_ACCESS);
        self.frames[slot].set(FW_PRESENT);
        self.frames[slot].page.init_empty(PageType::Tombstone);
        self.clock = (self.clock + 1) % MEMORY_PAGE_LEN;

        let wslot = match self.reserve_at_clock() {
            Ok(w) => w,
            Err(e) => {
                self.frames[slot].reset();
                return Err(e);
            }
        };

        let pg = match self.fp.new_page() {
            Ok(pg) => pg,
            Err(e) => {
                self.frames[slot].reset();
                return Err(e);
            }
        };

        let image: PageBuf = *self.frames[slot].page.raw();
        self.frames[wslot].page.raw_mut().copy_from_slice(&image);
        self.frames[wslot].pin = 1;
        self.frames[wslot].flags = 0;
        self.frames[wslot].wsibling = None;
        self.frames[wslot].pg = pg;
        self.frames[wslot].set(FW_PRESENT);
        self.frames[wslot].set(FW_X);
        self.clock = (self.clock + 1) % MEMORY_PAGE_LEN;

        self.frames[slot].pg = pg;
        self.frames[slot].set(FW_DIRTY);
        self.frames[slot].wsibling = Some(wslot);
        self.map.insert(pg, slot);

        Ok(PageHandle {
            mode: HandleMode::X,
            slot,
            wslot: Some(wslot),
            pg,
        })
    }

    /// Allocate a page, preferring the tombstone free list over file
    /// growth. The result is X-locked, pinned, dirty and initialized
    /// empty with the requested type.
    pub fn new_page(
        &mut self,
        tx: &mut Transaction,
        ty: PageType,
    ) -> DbResult<PageHandle> {
        let mut root = self.get(PageType::Root.mask(), ROOT_PGNO)?;

        self.lockt
            .lock(tx.tid(), LockKey::FirstTombstone, LockMode::S)?;

        let ftpg = self.page(&root).rn_first_tombstone();

        if let Err(e) = self.make_writable(&mut root) {
            self.release_ro(root, PageType::Root.mask())?;
            return Err(e);
        }

        let mut dest;
        if ftpg != PGNO_NULL {
            // Pop the first tombstone; it becomes the new page.
            self.lockt
                .lock(tx.tid(), LockKey::Tombstone(ftpg), LockMode::S)?;

            dest = match self.get_writable(PageType::Tombstone.mask(), ftpg) {
                Ok(d) => d,
                Err(e) => {
                    self.cancel_w(&mut root);
                    self.release_ro(root, PageType::Root.mask())?;
                    return Err(e);
                }
            };

            self.lockt.upgrade(tx.tid(), LockKey::FirstTombstone)?;

            let ntbst = self.page(&dest).ts_next();
            self.page_mut(&root).rn_set_first_tombstone(ntbst);
        } else {
            dest = match self.new_extend() {
                Ok(d) => d,
                Err(e) => {
                    self.cancel_w(&mut root);
                    self.release_ro(root, PageType::Root.mask())?;
                    return Err(e);
                }
            };
        }

        if let Err(e) = self.save(&mut *tx, &mut root, PageType::Root.mask()) {
            self.cancel_w(&mut dest);
            self.cancel_w(&mut root);
            self.release_ro(root, PG_ANY)?;
            self.release_no_tx(dest, PG_ANY)?;
            return Err(e);
        }
        self.release(tx, root, PageType::Root.mask())?;

        self.page_mut(&dest).init_empty(ty);
        Ok(dest)
    }

    /// Reinitialize a page as a tombstone, link it at the head of the
    /// free list, and release it.
    pub fn delete_and_release(
        &mut self,
        tx: &mut Transaction,
        mut h: PageHandle,
    ) -> DbResult {
        let mut root = self.get_writable(PageType::Root.mask(), ROOT_PGNO)?;

        if h.mode == HandleMode::S {
            if let Err(e) = self.make_writable(&mut h) {
                self.cancel_w(&mut root);
                self.release_ro(root, PageType::Root.mask())?;
                self.release_ro(h, PG_ANY)?;
                return Err(e);
            }
        }

        let ftpg = self.page(&root).rn_first_tombstone();
        let pg = h.pgno();

        let page = self.page_mut(&h);
        page.init_empty(PageType::Tombstone);
        page.ts_set_next(ftpg);

        self.release(tx, h, PageType::Tombstone.mask())?;

        self.page_mut(&root).rn_set_first_tombstone(pg);
        self.release(tx, root, PageType::Root.mask())?;

        Ok(())
    }

    ///////////////////////////////////////////////////////////
    // Transaction control

    pub fn begin_txn(&mut self) -> DbResult<Transaction> {
        let tid = self.next_tid;
        self.next_tid += 1;

        let data = if let Some(w) = self.wal.as_mut() {
            let lsn = w.append(&WalRecord::Begin { tid })?;
            TxnData {
                last_lsn: lsn,
                undo_next_lsn: 0,
                state: TxnState::Running,
            }
        } else {
            TxnData {
                last_lsn: 0,
                undo_next_lsn: 0,
                state: TxnState::Running,
            }
        };

        let tx = Transaction::new(tid, data);
        self.txnt.insert(tid, data);
        Ok(tx)
    }

    /// COMMIT, force, END. The commit record is durable before the end
    /// record exists.
    pub fn commit(&mut self, tx: &mut Transaction) -> DbResult {
        if tx.data.state != TxnState::Running {
            return Err(DbError::new(
                ErrorKind::DuplicateCommit,
                format!("{} is not running", tx),
            ));
        }

        if let Some(w) = self.wal.as_mut() {
            let l = w.append(&WalRecord::Commit {
                tid: tx.tid(),
                prev: tx.data.last_lsn,
            })?;
            w.flush_to(l)?;
            w.append(&WalRecord::End {
                tid: tx.tid(),
                prev: l,
            })?;
        }

        self.txnt.remove(tx.tid());
        tx.data.state = TxnState::Done;
        Ok(())
    }

    /// Walk the transaction's undo chain back to `save_lsn`, restoring
    /// undo images and logging CLRs. (ARIES Figure 8.)
    pub fn rollback(&mut self, tx: &mut Transaction, save_lsn: Lsn) -> DbResult {
        if self.wal.is_none() {
            return Ok(());
        }

        let mut undo_next = tx.data.undo_next_lsn;

        while save_lsn < undo_next {
            let rec = self
                .wal
                .as_mut()
                .map(|w| w.read_entry(undo_next))
                .unwrap_or(Ok(WalRecord::Eof))?;

            match rec {
                WalRecord::Update {
                    pg, prev, undo, ..
                } => {
                    let mut ph = self.get_writable_no_verify(pg)?;
                    self.page_mut(&ph).raw_mut().copy_from_slice(&undo[..]);

                    let clr = WalRecord::Clr {
                        tid: tx.tid(),
                        prev: tx.data.last_lsn,
                        pg,
                        undo_next: prev,
                        redo: undo,
                    };
                    let clr_lsn = self.wal.as_mut().map(|w| w.append(&clr)).unwrap_or(Ok(0))?;

                    self.page_mut(&ph).set_page_lsn(clr_lsn);
                    tx.data.last_lsn = clr_lsn;
                    self.txnt.update(tx.tid(), tx.data);

                    self.release_no_tx(ph, PG_ANY)?;
                    undo_next = prev;
                }
                WalRecord::Clr { undo_next: un, .. } => {
                    undo_next = un;
                }
                WalRecord::Begin { .. } => {
                    undo_next = 0;
                }
                WalRecord::Eof => {
                    break;
                }
                other => {
                    return Err(DbError::corrupt(format!(
                        "got a {} record in a rollback undo chain at lsn {}",
                        other.kind_name(),
                        undo_next
                    )));
                }
            }

            tx.data.undo_next_lsn = undo_next;
            self.txnt.update(tx.tid(), tx.data);
        }

        Ok(())
    }

    /// Full rollback plus the END record that retires the transaction.
    pub fn abort(&mut self, tx: &mut Transaction) -> DbResult {
        if tx.data.state != TxnState::Running {
            return Err(DbError::new(
                ErrorKind::DuplicateCommit,
                format!("{} is not running", tx),
            ));
        }

        self.rollback(tx, 0)?;

        if let Some(w) = self.wal.as_mut() {
            w.append(&WalRecord::End {
                tid: tx.tid(),
                prev: tx.data.last_lsn,
            })?;
        }

        self.txnt.remove(tx.tid());
        tx.data.state = TxnState::Done;
        Ok(())
    }

    pub(crate) fn get_writable_no_verify(&mut self, pg: Pgno) -> DbResult<PageHandle> {
        let mut h = self.get_unverified(pg)?;
        if let Err(e) = self.make_writable(&mut h) {
            self.release_ro(h, PG_ANY)?;
            return Err(e);
        }
        Ok(h)
    }

    ///////////////////////////////////////////////////////////
    // Checkpoint

    /// Fuzzy checkpoint: CKPT_BEGIN, flush everything, CKPT_END with
    /// table snapshots, force, then persist the master LSN in the root
    /// page through a self-contained transaction.
    pub fn checkpoint(&mut self) -> DbResult {
        if self.wal.is_none() {
            return Ok(());
        }

        let mlsn = self
            .wal
            .as_mut()
            .map(|w| w.append(&WalRecord::CkptBegin))
            .unwrap_or(Ok(0))?;

        self.evict_all()?;

        let rec = WalRecord::CkptEnd {
            txns: self.txnt.snapshot(),
            dpt: self.dpt.snapshot(),
        };
        let end_lsn = self.wal.as_mut().map(|w| w.append(&rec)).unwrap_or(Ok(0))?;
        if let Some(w) = self.wal.as_mut() {
            w.flush_to(end_lsn)?;
        }

        // Persist the master LSN.
        let mut tx = self.begin_txn()?;
        let mut root = self.get_writable(PageType::Root.mask(), ROOT_PGNO)?;
        self.page_mut(&root).rn_set_master_lsn(mlsn);
        self.save(&mut tx, &mut root, PageType::Root.mask())?;
        self.commit(&mut tx)?;

        // Force the root page so the master LSN is on disk once the
        // checkpoint call returns.
        self.flush_slot(root.slot)?;
        self.release_ro(root, PageType::Root.mask())?;

        self.master_lsn = mlsn;
        debug!("checkpoint written at lsn {}", mlsn);
        Ok(())
    }

    ///////////////////////////////////////////////////////////
    // Diagnostics

    /// Walk the tombstone free list: every page on it must carry the
    /// tombstone tag and the chain must not cycle. Returns its length.
    pub fn check_free_list(&mut self) -> DbResult<u32> {
        let root = self.get(PageType::Root.mask(), ROOT_PGNO)?;
        let mut cur = self.page(&root).rn_first_tombstone();
        self.release_ro(root, PageType::Root.mask())?;

        let mut seen = std::collections::HashSet::new();
        let mut count = 0;

        while cur != PGNO_NULL {
            if !seen.insert(cur) {
                return Err(DbError::corrupt(format!(
                    "tombstone free list cycles at page {}",
                    cur
                )));
            }

            let h = self.get(PageType::Tombstone.mask(), cur)?;
            cur = self.page(&h).ts_next();
            self.release_ro(h, PageType::Tombstone.mask())?;
            count += 1;
        }

        Ok(count)
    }

    /// Log the state of every occupied frame, then the dirty page
    /// table.
    pub fn log_page_table(&self) {
        debug!("page table:");
        for (i, f) in self.frames.iter().enumerate() {
            if f.check(FW_PRESENT) {
                debug!(
                    "{} | pg: {} pin: {} ax: {} drt: {} x: {} sib: {:?} type: {} |",
                    i,
                    f.pg,
                    f.pin,
                    f.check(FW_ACCESS),
                    f.check(FW_DIRTY),
                    f.check(FW_X),
                    f.wsibling,
                    f.page.raw_type()
                );
            }
        }
    }

    ///////////////////////////////////////////////////////////
    // Recovery plumbing

    pub(crate) fn wal_mut(&mut self) -> &mut Wal {
        self.wal.as_mut().expect("wal is enabled during recovery")
    }

    pub(crate) fn master_lsn(&self) -> Lsn {
        self.master_lsn
    }

    pub(crate) fn set_restarting(&mut self, on: bool) {
        self.restarting = on;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DL_CAPACITY;

    struct Fixture {
        dir: tempfile::TempDir,
        pager: Pager,
    }

    impl Fixture {
        fn create() -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let pager = Pager::open(
                dir.path().join("test.db"),
                Some(dir.path().join("test.wal")),
                Arc::new(LockTable::new()),
            )
            .unwrap();
            Fixture { dir, pager }
        }

        fn reopen(mut self) -> Fixture {
            self.pager.close().unwrap();
            let pager = Pager::open(
                self.dir.path().join("test.db"),
                Some(self.dir.path().join("test.wal")),
                Arc::new(LockTable::new()),
            )
            .unwrap();
            Fixture {
                dir: self.dir,
                pager,
            }
        }
    }

    fn fill_data_list(pager: &mut Pager, h: &PageHandle) {
        let bytes = vec![7u8; DL_CAPACITY];
        pager.page_mut(h).dl_memset(&bytes);
    }

    #[test]
    fn test_open_creates_root() {
        let mut f = Fixture::create();
        assert_eq!(f.pager.npages(), 1);

        let root = f.pager.get(PageType::Root.mask(), ROOT_PGNO).unwrap();
        assert_eq!(f.pager.page(&root).rn_first_tombstone(), PGNO_NULL);
        f.pager.release_ro(root, PageType::Root.mask()).unwrap();

        f.pager.close().unwrap();
    }

    #[test]
    fn test_new_get_save() {
        let mut f = Fixture::create();
        let mut tx = f.pager.begin_txn().unwrap();

        let h = f.pager.new_page(&mut tx, PageType::DataList).unwrap();
        assert_eq!(f.pager.npages(), 2);
        let pg = h.pgno();

        fill_data_list(&mut f.pager, &h);
        f.pager
            .release(&mut tx, h, PageType::DataList.mask())
            .unwrap();
        f.pager.commit(&mut tx).unwrap();

        let h = f.pager.get(PageType::DataList.mask(), pg).unwrap();
        assert_eq!(f.pager.page(&h).dl_used() as usize, DL_CAPACITY);
        f.pager.release_ro(h, PageType::DataList.mask()).unwrap();

        f.pager.close().unwrap();
    }

    #[test]
    fn test_tombstone_reuse_is_lifo() {
        let mut f = Fixture::create();
        let mut tx = f.pager.begin_txn().unwrap();

        let mut pgs = vec![];
        for _ in 0..4 {
            let h = f.pager.new_page(&mut tx, PageType::DataList).unwrap();
            pgs.push(h.pgno());
            fill_data_list(&mut f.pager, &h);
            f.pager
                .release(&mut tx, h, PageType::DataList.mask())
                .unwrap();
        }

        for pg in &pgs {
            let h = f.pager.get(PageType::DataList.mask(), *pg).unwrap();
            f.pager.delete_and_release(&mut tx, h).unwrap();
        }

        // Freed pages come back in reverse deletion order
        for expect in pgs.iter().rev() {
            let h = f.pager.new_page(&mut tx, PageType::DataList).unwrap();
            assert_eq!(h.pgno(), *expect);
            fill_data_list(&mut f.pager, &h);
            f.pager
                .release(&mut tx, h, PageType::DataList.mask())
                .unwrap();
        }

        f.pager.commit(&mut tx).unwrap();
        f.pager.close().unwrap();
    }

    #[test]
    fn test_save_restores_on_rollback() {
        let mut f = Fixture::create();

        // Committed baseline
        let mut tx = f.pager.begin_txn().unwrap();
        let h = f.pager.new_page(&mut tx, PageType::DataList).unwrap();
        let pg = h.pgno();
        let before = vec![1u8; DL_CAPACITY];
        f.pager.page_mut(&h).dl_memset(&before);
        f.pager
            .release(&mut tx, h, PageType::DataList.mask())
            .unwrap();
        f.pager.commit(&mut tx).unwrap();

        // Overwrite inside a second transaction, then roll back
        let mut tx2 = f.pager.begin_txn().unwrap();
        let mut h = f.pager.get_writable(PageType::DataList.mask(), pg).unwrap();
        let after = vec![2u8; DL_CAPACITY];
        f.pager.page_mut(&h).dl_memset(&after);
        f.pager.save(&mut tx2, &mut h, PageType::DataList.mask()).unwrap();
        f.pager.release_ro(h, PageType::DataList.mask()).unwrap();
        f.pager.abort(&mut tx2).unwrap();

        let h = f.pager.get(PageType::DataList.mask(), pg).unwrap();
        assert_eq!(f.pager.page(&h).dl_data()[0], 1);
        f.pager.release_ro(h, PageType::DataList.mask()).unwrap();

        f.pager.close().unwrap();
    }

    #[test]
    fn test_pool_fills_up() {
        let mut f = Fixture::create();
        let mut tx = f.pager.begin_txn().unwrap();

        // Each new page consumes a frame pair; the root stays resident.
        let mut handles = vec![];
        loop {
            match f.pager.new_page(&mut tx, PageType::DataList) {
                Ok(h) => handles.push(h),
                Err(e) => {
                    assert_eq!(e.kind(), ErrorKind::PagerFull);
                    break;
                }
            }
            assert!(handles.len() <= MEMORY_PAGE_LEN);
        }

        for h in handles {
            fill_data_list(&mut f.pager, &h);
            f.pager
                .release(&mut tx, h, PageType::DataList.mask())
                .unwrap();
        }
        f.pager.commit(&mut tx).unwrap();
        f.pager.close().unwrap();
    }

    #[test]
    fn test_reopen_after_clean_close() {
        let f = Fixture::create();
        let mut f = f.reopen();
        assert_eq!(f.pager.npages(), 1);
        f.pager.close().unwrap();
    }
}
