mod dld;
mod dli;
mod ini;
mod mem_node;

pub use mem_node::MemInnerNode;

use log::trace;

use crate::{
    config::SEEK_STACK_DEPTH,
    error::{DbError, ErrorKind},
    pager::Pager,
    paging::{PageType, PG_ANY},
    transaction::Transaction,
    types::{BSize, DbResult, Pgno, TSize, PGNO_NULL},
};

/// One level of the seek path: the inner node visited and the child
/// index chosen there.
#[derive(Debug, Clone, Copy)]
pub struct SeekV {
    pub pg: Pgno,
    pub lidx: usize,
}

struct SubTreeSummary {
    bytes: BSize,
    depth: usize,
}

/// A rope over data-list leaves, routed by inner nodes whose keys are
/// cumulative byte counts. Gives O(log n) positional access to a
/// variable-length byte sequence.
pub struct RpTree {
    pg0: Pgno,

    /// Indexing: where am I?
    gidx: BSize,
    pub(crate) lidx: BSize,
    eof: bool,
    pub(crate) pg: Pgno,

    /// The seek path, root first. Retained so mutations can propagate
    /// key deltas without re-walking from the root.
    pub(crate) stack: Vec<SeekV>,
    is_seeked: bool,
}

impl RpTree {
    /// Open a tree rooted at `pg0`, or allocate a fresh empty leaf when
    /// `pg0` is None.
    pub fn open(
        pg0: Option<Pgno>,
        pager: &mut Pager,
        tx: &mut Transaction,
    ) -> DbResult<RpTree> {
        let root = match pg0 {
            Some(pg) => {
                let h = pager.get(
                    PageType::DataList.mask() | PageType::InnerNode.mask(),
                    pg,
                )?;
                pager.release_ro(h, PG_ANY)?;
                pg
            }
            None => {
                let h = pager.new_page(tx, PageType::DataList)?;
                let pg = h.pgno();
                pager.release(tx, h, PageType::DataList.mask())?;
                pg
            }
        };

        Ok(RpTree {
            pg0: root,
            gidx: 0,
            lidx: 0,
            eof: false,
            pg: root,
            stack: Vec::new(),
            is_seeked: false,
        })
    }

    pub fn pg0(&self) -> Pgno {
        self.pg0
    }

    pub fn tell(&self) -> BSize {
        self.gidx
    }

    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Descend from the root to the leaf containing `byte`, recording
    /// the path. A byte at or past the end clips to EOF on the last
    /// leaf.
    pub fn seek(&mut self, byte: BSize, pager: &mut Pager) -> DbResult {
        trace!("rptree seek to byte {}", byte);

        self.stack.clear();
        self.gidx = 0;
        self.lidx = 0;
        self.eof = false;

        let mut cur = self.pg0;
        let mut byte = byte;

        loop {
            // Occupancy is transiently broken while a delete is midway
            // through its leaves; the seek only cares about the tag.
            let h = pager.get(PG_ANY, cur)?;

            match pager.page(&h).get_type()? {
                PageType::InnerNode => {
                    let lidx = pager.page(&h).in_choose_lidx(byte);

                    if self.stack.len() == SEEK_STACK_DEPTH {
                        pager.release_ro(h, PG_ANY)?;
                        return Err(DbError::new(
                            ErrorKind::PageStackOverflow,
                            "seek: page stack overflow",
                        ));
                    }
                    self.stack.push(SeekV { pg: cur, lidx });

                    // Skip the bytes routed to the children left of the
                    // chosen one.
                    let nleft = if lidx > 0 {
                        pager.page(&h).in_key(lidx - 1)
                    } else {
                        0
                    };
                    debug_assert!(byte >= nleft);
                    self.gidx += nleft;
                    byte -= nleft;

                    let next = pager.page(&h).in_leaf(lidx);
                    pager.release_ro(h, PG_ANY)?;
                    cur = next;
                }
                PageType::DataList => {
                    let used = pager.page(&h).dl_used() as BSize;

                    // Clip to this leaf; at or past the end is EOF.
                    if byte >= used {
                        self.lidx = used;
                        self.eof = true;
                    } else {
                        self.lidx = byte;
                    }

                    self.gidx += self.lidx;
                    self.pg = cur;
                    pager.release_ro(h, PG_ANY)?;
                    break;
                }
                other => {
                    pager.release_ro(h, PG_ANY)?;
                    return Err(DbError::corrupt(format!(
                        "rope reached a {:?} page at {}",
                        other, cur
                    )));
                }
            }
        }

        self.is_seeked = true;
        Ok(())
    }

    /// Contiguous byte read across the leaf chain. A None dest skips
    /// (stride support). Returns bytes consumed; sets EOF at chain end.
    fn read_contiguous(
        &mut self,
        mut dest: Option<&mut [u8]>,
        bytes: BSize,
        pager: &mut Pager,
    ) -> DbResult<BSize> {
        debug_assert!(self.is_seeked);

        let mut read: BSize = 0;
        let mut h = pager.get(PageType::DataList.mask(), self.pg)?;

        while read < bytes {
            if self.lidx == pager.page(&h).dl_used() as BSize {
                let next = pager.page(&h).dl_next();
                pager.release_ro(h, PG_ANY)?;

                if next == PGNO_NULL {
                    self.eof = true;
                    return Ok(read);
                }

                h = pager.get(PageType::DataList.mask(), next)?;
                self.pg = next;
                self.lidx = 0;
            }

            let want = (bytes - read) as usize;
            let got = match dest.as_deref_mut() {
                Some(d) => pager
                    .page(&h)
                    .dl_read(Some(&mut d[read as usize..]), self.lidx as u16, want),
                None => pager.page(&h).dl_read(None, self.lidx as u16, want),
            };

            read += got as BSize;
            self.lidx += got as BSize;
        }

        pager.release_ro(h, PG_ANY)?;
        debug_assert!(read == bytes);
        Ok(read)
    }

    /// Read `n` elements of `size` bytes with an element `stride`.
    /// Returns the element count read; a partial element is corruption.
    pub fn read(
        &mut self,
        dest: &mut [u8],
        size: TSize,
        n: BSize,
        stride: BSize,
        pager: &mut Pager,
    ) -> DbResult<BSize> {
        debug_assert!(size > 0);
        debug_assert!(stride >= 1);

        if !self.is_seeked {
            self.seek(0, pager)?;
        }

        let size = size as BSize;
        let btoread = size * n;

        if stride == 1 {
            let nbytes = self.read_contiguous(Some(dest), btoread, pager)?;
            if nbytes % size != 0 {
                return Err(DbError::corrupt("r+tree: premature EOF while reading"));
            }
            return Ok(nbytes / size);
        }

        let mut bread: BSize = 0;
        while bread < btoread {
            let next = self.read_contiguous(
                Some(&mut dest[bread as usize..]),
                size,
                pager,
            )?;
            bread += next;

            if next == 0 {
                return Ok(bread / size);
            } else if next != size {
                return Err(DbError::corrupt("r+tree: premature EOF while reading"));
            }

            // Skip the strided-over elements
            let skipped = self.read_contiguous(None, size * (stride - 1), pager)?;
            if skipped % size != 0 {
                return Err(DbError::corrupt("r+tree: premature EOF while reading"));
            }

            if self.eof {
                return Ok(bread / size);
            }
        }

        Ok(bread / size)
    }

    /// Contiguous overwrite across the leaf chain. Never grows a leaf.
    fn write_contiguous(
        &mut self,
        src: Option<&[u8]>,
        bytes: BSize,
        pager: &mut Pager,
        tx: &mut Transaction,
    ) -> DbResult<BSize> {
        debug_assert!(self.is_seeked);

        let mut written: BSize = 0;

        while written < bytes {
            let mut h = pager.get(PageType::DataList.mask(), self.pg)?;

            if self.lidx == pager.page(&h).dl_used() as BSize {
                let next = pager.page(&h).dl_next();
                pager.release_ro(h, PG_ANY)?;

                if next == PGNO_NULL {
                    self.eof = true;
                    return Ok(written);
                }

                self.pg = next;
                self.lidx = 0;
                continue;
            }

            pager.make_writable(&mut h)?;

            let want = (bytes - written) as usize;
            let got = match src {
                Some(s) => pager.page_mut(&h).dl_write(
                    Some(&s[written as usize..]),
                    self.lidx as u16,
                    want,
                ),
                None => {
                    // A skip never mutates; drop the write image.
                    pager.cancel_w(&mut h);
                    pager.page(&h).dl_read(None, self.lidx as u16, want)
                }
            };

            if h.is_x() {
                pager.save(tx, &mut h, PageType::DataList.mask())?;
            }
            pager.release_ro(h, PG_ANY)?;

            written += got as BSize;
            self.lidx += got as BSize;
        }

        Ok(written)
    }

    /// Overwrite `n` elements of `size` bytes in place with stride.
    pub fn write(
        &mut self,
        src: &[u8],
        size: TSize,
        n: BSize,
        stride: BSize,
        pager: &mut Pager,
        tx: &mut Transaction,
    ) -> DbResult<BSize> {
        debug_assert!(size > 0);
        debug_assert!(stride >= 1);

        if !self.is_seeked {
            self.seek(0, pager)?;
        }

        let size = size as BSize;
        let btowrite = size * n;

        if stride == 1 {
            let nbytes = self.write_contiguous(Some(src), btowrite, pager, tx)?;
            if nbytes % size != 0 {
                return Err(DbError::corrupt("r+tree: premature EOF while writing"));
            }
            return Ok(nbytes / size);
        }

        let mut bwrite: BSize = 0;
        while bwrite < btowrite {
            let next =
                self.write_contiguous(Some(&src[bwrite as usize..]), size, pager, tx)?;
            bwrite += next;

            if next == 0 {
                return Ok(bwrite / size);
            } else if next != size {
                return Err(DbError::corrupt("r+tree: premature EOF while writing"));
            }

            let skipped = self.write_contiguous(None, size * (stride - 1), pager, tx)?;
            if skipped % size != 0 {
                return Err(DbError::corrupt("r+tree: premature EOF while writing"));
            }

            if self.eof {
                return Ok(bwrite / size);
            }
        }

        Ok(bwrite / size)
    }

    /// Insert `src` at the seek position, splitting leaves and routing
    /// keys upward as needed. The seek is consumed.
    pub fn insert(
        &mut self,
        src: &[u8],
        pager: &mut Pager,
        tx: &mut Transaction,
    ) -> DbResult<BSize> {
        debug_assert!(!src.is_empty());

        if !self.is_seeked {
            self.seek(0, pager)?;
        }

        let written = src.len() as BSize;

        // Bottom layer: split the seeked leaf and append through a
        // fresh chain.
        let mut pending = dli::run(self.pg, self.lidx as u16, src, pager, tx)?;

        // Every routing key to the right of the path grows by the
        // inserted byte count.
        for lvl in self.stack.clone() {
            let mut h = pager.get_writable(PageType::InnerNode.mask(), lvl.pg)?;
            pager.page_mut(&h).in_add_right(lvl.lidx, written);
            pager.save(tx, &mut h, PG_ANY)?;
            pager.release_ro(h, PG_ANY)?;
        }

        // Upper layers: push overflow children up the recorded path,
        // growing a new root if the path runs out.
        let mut sp = self.stack.len();
        while !pending.is_empty() {
            if sp == 0 {
                let rh = pager.new_page(tx, PageType::InnerNode)?;
                let root_pg = rh.pgno();
                let first = (pending.first, pending.first_len);
                pager.page_mut(&rh).in_set_children(&[first]);
                // Transiently a one-child root; filled in right below.
                pager.release(tx, rh, PG_ANY)?;

                self.pg0 = root_pg;
                pending = ini::insert_children(root_pg, 0, pending, pager, tx)?;
            } else {
                sp -= 1;
                let lvl = self.stack[sp];
                pending = ini::insert_children(lvl.pg, lvl.lidx, pending, pager, tx)?;
            }
        }

        self.is_seeked = false;
        Ok(written)
    }

    /// Delete `n` elements at the seek position, discarding the bytes.
    pub fn delete(
        &mut self,
        size: TSize,
        n: BSize,
        stride: BSize,
        pager: &mut Pager,
        tx: &mut Transaction,
    ) -> DbResult<BSize> {
        dld::run(self, None, size, n, stride, pager, tx)
    }

    /// Delete `n` elements at the seek position, copying them out.
    pub fn take(
        &mut self,
        dest: &mut [u8],
        size: TSize,
        n: BSize,
        stride: BSize,
        pager: &mut Pager,
        tx: &mut Transaction,
    ) -> DbResult<BSize> {
        dld::run(self, Some(dest), size, n, stride, pager, tx)
    }

    /// Tombstone every page of the tree. Used when the variable itself
    /// is dropped.
    pub fn delete_chain(self, pager: &mut Pager, tx: &mut Transaction) -> DbResult {
        let mut worklist = vec![self.pg0];

        while let Some(pg) = worklist.pop() {
            let h = pager.get(
                PageType::DataList.mask() | PageType::InnerNode.mask(),
                pg,
            )?;

            if pager.page(&h).get_type()? == PageType::InnerNode {
                for (child, _) in pager.page(&h).in_children() {
                    worklist.push(child);
                }
            }

            pager.delete_and_release(tx, h)?;
        }

        Ok(())
    }

    /// Walk the whole tree and verify its structural invariants:
    /// routing keys strictly increasing and equal to the cumulative
    /// child byte counts, uniform depth, sibling links consistent, and
    /// (optionally) the half-full occupancy minimums. Returns the total
    /// byte count.
    pub fn check_integrity(
        &self,
        check_occupancy: bool,
        pager: &mut Pager,
    ) -> DbResult<BSize> {
        let summary = self.check_subtree(self.pg0, true, check_occupancy, 0, pager)?;
        Ok(summary.bytes)
    }

    fn check_subtree(
        &self,
        pg: Pgno,
        is_root: bool,
        check_occupancy: bool,
        depth: usize,
        pager: &mut Pager,
    ) -> DbResult<SubTreeSummary> {
        if depth > SEEK_STACK_DEPTH {
            return Err(DbError::corrupt("tree deeper than the seek stack bound"));
        }

        let h = pager.get(PG_ANY, pg)?;

        match pager.page(&h).get_type()? {
            PageType::DataList => {
                let used = pager.page(&h).dl_used() as usize;
                pager.release_ro(h, PG_ANY)?;

                if check_occupancy && !is_root && used < crate::config::DL_CAPACITY / 2 {
                    return Err(DbError::corrupt(format!(
                        "leaf {} under half occupancy: {}",
                        pg, used
                    )));
                }

                Ok(SubTreeSummary {
                    bytes: used as BSize,
                    depth: 0,
                })
            }
            PageType::InnerNode => {
                let nkeys = pager.page(&h).in_nkeys();
                if nkeys == 0 {
                    pager.release_ro(h, PG_ANY)?;
                    return Err(DbError::corrupt(format!(
                        "inner node {} routes no children",
                        pg
                    )));
                }
                if check_occupancy && !is_root && nkeys < crate::config::IN_MAX_KEYS / 2 {
                    pager.release_ro(h, PG_ANY)?;
                    return Err(DbError::corrupt(format!(
                        "inner node {} under half occupancy: {}",
                        pg, nkeys
                    )));
                }

                let children = pager.page(&h).in_children();
                pager.release_ro(h, PG_ANY)?;

                let mut child_depth = None;
                for (child, len) in &children {
                    let sub = self.check_subtree(
                        *child,
                        false,
                        check_occupancy,
                        depth + 1,
                        pager,
                    )?;

                    if sub.bytes != *len {
                        return Err(DbError::corrupt(format!(
                            "inner node {} key says child {} holds {} bytes but it holds {}",
                            pg, child, len, sub.bytes
                        )));
                    }
                    match child_depth {
                        None => child_depth = Some(sub.depth),
                        Some(d) if d != sub.depth => {
                            return Err(DbError::corrupt(format!(
                                "inner node {} has children at different depths",
                                pg
                            )));
                        }
                        _ => {}
                    }
                }

                Ok(SubTreeSummary {
                    bytes: children.iter().map(|(_, l)| l).sum(),
                    depth: child_depth.unwrap_or(0) + 1,
                })
            }
            other => {
                pager.release_ro(h, PG_ANY)?;
                Err(DbError::corrupt(format!(
                    "rope reached a {:?} page at {}",
                    other, pg
                )))
            }
        }
    }

    /// Log the tree shape for debugging, one line per page down to
    /// `max_level` (-1 for the whole tree).
    pub fn draw_tree(&self, max_level: i32, pager: &mut Pager) -> DbResult {
        log::info!("tree rooted at page {}:", self.pg0);
        self.draw_subtree(self.pg0, 0, max_level, pager)
    }

    fn draw_subtree(
        &self,
        pg: Pgno,
        level: i32,
        max_level: i32,
        pager: &mut Pager,
    ) -> DbResult {
        if max_level >= 0 && level > max_level {
            return Ok(());
        }

        let h = pager.get(
            PageType::DataList.mask() | PageType::InnerNode.mask(),
            pg,
        )?;
        let indent = "  ".repeat(level as usize);

        match pager.page(&h).get_type()? {
            PageType::DataList => {
                log::info!(
                    "{}leaf {} used={} prev={} next={}",
                    indent,
                    pg,
                    pager.page(&h).dl_used(),
                    pager.page(&h).dl_prev(),
                    pager.page(&h).dl_next()
                );
                pager.release_ro(h, PG_ANY)?;
            }
            PageType::InnerNode => {
                let children = pager.page(&h).in_children();
                log::info!(
                    "{}inner {} nkeys={} total={}",
                    indent,
                    pg,
                    pager.page(&h).in_nkeys(),
                    pager.page(&h).in_total()
                );
                pager.release_ro(h, PG_ANY)?;
                for (child, _) in children {
                    self.draw_subtree(child, level + 1, max_level, pager)?;
                }
            }
            _ => unreachable!(),
        }

        Ok(())
    }

    /// Total byte count stored in the tree.
    pub fn total_bytes(&self, pager: &mut Pager) -> DbResult<BSize> {
        let h = pager.get(
            PageType::DataList.mask() | PageType::InnerNode.mask(),
            self.pg0,
        )?;
        let total = match pager.page(&h).get_type()? {
            PageType::InnerNode => pager.page(&h).in_total(),
            _ => pager.page(&h).dl_used() as BSize,
        };
        pager.release_ro(h, PG_ANY)?;
        Ok(total)
    }
}
