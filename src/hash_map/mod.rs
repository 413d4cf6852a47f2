mod entry_fmt;

pub use entry_fmt::{EntryReader, EntryWriter, FmtState, KIND_EOF, KIND_TOMBSTONE};

use log::debug;

use crate::{
    config::{HASH_DIR_PGNO, HL_DATA},
    dtype::Ty,
    error::{DbError, ErrorKind},
    pager::Pager,
    paging::{PageType, PG_ANY},
    transaction::{LockKey, LockMode, Transaction},
    types::{DbResult, Pgno, PGNO_NULL},
};

/// A named, typed byte sequence rooted at an rptree page.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub ty: Ty,
    pub pg0: Pgno,
}

/// The variable index: one fixed directory page hashing names onto
/// bucket chains of hash leaves holding serialized entries.
pub struct HashIndex;

impl HashIndex {
    /// Open the index, creating the directory page on a fresh database.
    pub fn open(pager: &mut Pager, tx: &mut Transaction) -> DbResult<HashIndex> {
        if pager.npages() < 2 {
            let h = pager.new_page(tx, PageType::HashDirectory)?;
            if h.pgno() != HASH_DIR_PGNO {
                return Err(DbError::corrupt(format!(
                    "hash directory allocated at page {} instead of {}",
                    h.pgno(),
                    HASH_DIR_PGNO
                )));
            }
            pager.release(tx, h, PageType::HashDirectory.mask())?;
        }
        Ok(HashIndex)
    }

    fn bucket_of(&self, pager: &mut Pager, tx: &Transaction, name: &[u8]) -> DbResult<(usize, Pgno)> {
        let lockt = pager.lock_table();
        lockt.lock(tx.tid(), LockKey::HashDir, LockMode::S)?;

        let h = pager.get(PageType::HashDirectory.mask(), HASH_DIR_PGNO)?;
        let pos = pager.page(&h).hd_bucket_pos(name);
        let head = pager.page(&h).hd_bucket(pos);
        pager.release_ro(h, PageType::HashDirectory.mask())?;
        Ok((pos, head))
    }

    /// Look a variable up by name.
    pub fn get(
        &self,
        pager: &mut Pager,
        tx: &mut Transaction,
        name: &str,
    ) -> DbResult<Variable> {
        let (pos, head) = self.bucket_of(pager, tx, name.as_bytes())?;

        let lockt = pager.lock_table();
        lockt.lock(tx.tid(), LockKey::HashBucket(pos as u16), LockMode::S)?;

        if head == PGNO_NULL {
            return Err(DbError::new(
                ErrorKind::DoesntExist,
                format!("variable {} doesn't exist", name),
            ));
        }

        let found = self.scroll(pager, head, name.as_bytes())?;
        match found {
            ScrollResult::Found(reader) => {
                let ty = Ty::deserialize(&reader.tbytes)
                    .map_err(|e| e.type_deser_to_corrupt().wrap(&format!(
                        "hash index: deserializing type of {}",
                        name
                    )))?;
                Ok(Variable {
                    name: name.to_string(),
                    ty,
                    pg0: reader.pg0,
                })
            }
            _ => Err(DbError::new(
                ErrorKind::DoesntExist,
                format!("variable {} doesn't exist", name),
            )),
        }
    }

    /// Insert a fresh variable entry at the EOF marker of its bucket.
    pub fn insert(
        &self,
        pager: &mut Pager,
        tx: &mut Transaction,
        var: &Variable,
    ) -> DbResult {
        let name = var.name.as_bytes();
        let (pos, head) = self.bucket_of(pager, tx, name)?;

        let lockt = pager.lock_table();
        lockt.lock(tx.tid(), LockKey::HashBucket(pos as u16), LockMode::X)?;

        let head = if head == PGNO_NULL {
            // First variable in this bucket: allocate the leaf (its
            // entry stream starts as a bare EOF marker) and hang it off
            // the directory.
            let leaf = pager.new_page(tx, PageType::HashLeaf)?;
            let leaf_pg = leaf.pgno();
            pager.page_mut(&leaf).hl_data_mut()[0] = KIND_EOF;
            pager.release(tx, leaf, PageType::HashLeaf.mask())?;

            let mut dir = pager.get_writable(PageType::HashDirectory.mask(), HASH_DIR_PGNO)?;
            pager.page_mut(&dir).hd_set_bucket(pos, leaf_pg);
            pager.save(tx, &mut dir, PageType::HashDirectory.mask())?;
            pager.release_ro(dir, PageType::HashDirectory.mask())?;
            leaf_pg
        } else {
            head
        };

        // Scroll to the EOF marker, watching for duplicates on the way.
        let eof_at = match self.scroll(pager, head, name)? {
            ScrollResult::Found(_) => {
                return Err(DbError::new(
                    ErrorKind::AlreadyExists,
                    format!("variable {} already exists", var.name),
                ));
            }
            ScrollResult::Eof(at) => at,
        };

        debug!("inserting variable {} at {:?}", var.name, eof_at);

        let tbytes = var.ty.serialize();
        let mut writer = EntryWriter::new(name, &tbytes, var.pg0);

        let (mut cur, mut off) = eof_at;
        loop {
            let mut h = pager.get_writable(PageType::HashLeaf.mask(), cur)?;
            writer.write_out(&mut pager.page_mut(&h).hl_data_mut()[off..])?;

            if writer.done {
                pager.save(tx, &mut h, PageType::HashLeaf.mask())?;
                pager.release_ro(h, PageType::HashLeaf.mask())?;
                break;
            }

            // Ran off this page; continue on (or allocate) the next.
            let next = pager.page(&h).hl_next();
            let next = if next == PGNO_NULL {
                let nh = pager.new_page(tx, PageType::HashLeaf)?;
                let next_pg = nh.pgno();
                pager.release(tx, nh, PageType::HashLeaf.mask())?;
                pager.page_mut(&h).hl_set_next(next_pg);
                next_pg
            } else {
                next
            };

            pager.save(tx, &mut h, PageType::HashLeaf.mask())?;
            pager.release_ro(h, PageType::HashLeaf.mask())?;
            cur = next;
            off = 0;
        }

        Ok(())
    }

    /// Mark a variable entry as a tombstone, in place.
    pub fn delete(
        &self,
        pager: &mut Pager,
        tx: &mut Transaction,
        name: &str,
    ) -> DbResult {
        let (pos, head) = self.bucket_of(pager, tx, name.as_bytes())?;

        let lockt = pager.lock_table();
        lockt.lock(tx.tid(), LockKey::HashBucket(pos as u16), LockMode::X)?;

        if head == PGNO_NULL {
            return Err(DbError::new(
                ErrorKind::DoesntExist,
                format!("variable {} doesn't exist", name),
            ));
        }

        match self.scroll(pager, head, name.as_bytes())? {
            ScrollResult::Found(reader) => {
                let (pg, off) = reader
                    .entry_start
                    .ok_or_else(|| DbError::corrupt("found entry without a start"))?;

                let mut h = pager.get_writable(PageType::HashLeaf.mask(), pg)?;
                pager.page_mut(&h).hl_data_mut()[off] = KIND_TOMBSTONE;
                pager.save(tx, &mut h, PageType::HashLeaf.mask())?;
                pager.release_ro(h, PageType::HashLeaf.mask())?;
                Ok(())
            }
            _ => Err(DbError::new(
                ErrorKind::DoesntExist,
                format!("variable {} doesn't exist", name),
            )),
        }
    }

    /// Walk a bucket chain entry by entry. Stops at a matching live
    /// entry or at the EOF marker.
    fn scroll(
        &self,
        pager: &mut Pager,
        head: Pgno,
        name: &[u8],
    ) -> DbResult<ScrollResult> {
        let mut cur = head;
        let mut data = self.leaf_data(pager, cur)?;
        let mut off = 0usize;
        let mut reader = EntryReader::new();

        loop {
            match reader.state {
                FmtState::Corrupt => {
                    return Err(DbError::corrupt("hash leaf entry stream is corrupt"));
                }
                FmtState::Eof => {
                    let at = reader
                        .entry_start
                        .ok_or_else(|| DbError::corrupt("eof entry without a start"))?;
                    return Ok(ScrollResult::Eof(at));
                }
                FmtState::Done => {
                    if !reader.is_tombstone && reader.name == name {
                        return Ok(ScrollResult::Found(reader));
                    }
                    reader.reset();
                }
                _ => {
                    if off == HL_DATA {
                        let next = {
                            let h = pager.get(PageType::HashLeaf.mask(), cur)?;
                            let n = pager.page(&h).hl_next();
                            pager.release_ro(h, PageType::HashLeaf.mask())?;
                            n
                        };
                        if next == PGNO_NULL {
                            // The stream promised more bytes.
                            return Err(DbError::corrupt(
                                "hash leaf chain ended inside an entry",
                            ));
                        }
                        cur = next;
                        data = self.leaf_data(pager, cur)?;
                        off = 0;
                    }

                    let used = reader.read_in(&data[off..], cur, off)?;
                    debug_assert!(used > 0);
                    off += used;
                }
            }
        }
    }

    fn leaf_data(&self, pager: &mut Pager, pg: Pgno) -> DbResult<Vec<u8>> {
        let h = pager.get(PageType::HashLeaf.mask(), pg)?;
        let data = pager.page(&h).hl_data().to_vec();
        pager.release_ro(h, PG_ANY)?;
        Ok(data)
    }
}

enum ScrollResult {
    Found(EntryReader),
    Eof((Pgno, usize)),
}
