use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use log::info;

use crate::{
    cbuffer::CBuffer,
    compiler::{fill_bytes, parse_statement, Statement},
    config::CURSOR_PACKET,
    cursor::Cursor,
    hash_map::HashIndex,
    pager::Pager,
    transaction::{LockTable, Transaction},
    types::DbResult,
    utils::HandyRwLock,
};

/// What a statement hands back to the caller. READ yields the raw
/// little-endian element bytes.
#[derive(Debug, PartialEq)]
pub enum ExecOutput {
    None,
    Bytes(Vec<u8>),
}

/// The database facade: one pager and one lock table over a directory
/// holding the data file and its WAL. Statements run inside their own
/// transaction; a failed statement leaves persistent state unchanged.
pub struct Database {
    pager: RwLock<Pager>,
    lockt: Arc<LockTable>,
    dir: PathBuf,
}

impl Database {
    pub fn open<P: AsRef<Path>>(dir: P) -> DbResult<Database> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lockt = Arc::new(LockTable::new());
        let mut pager = Pager::open(
            dir.join("data.db"),
            Some(dir.join("data.wal")),
            Arc::clone(&lockt),
        )?;

        // Make sure the variable index exists before the first
        // statement arrives.
        let mut tx = pager.begin_txn()?;
        match HashIndex::open(&mut pager, &mut tx) {
            Ok(_) => {
                pager.commit(&mut tx)?;
                lockt.release_all(tx.tid());
            }
            Err(e) => {
                let _ = pager.abort(&mut tx);
                lockt.release_all(tx.tid());
                return Err(e);
            }
        }

        info!("database open at {:?}", dir);
        Ok(Database {
            pager: RwLock::new(pager),
            lockt,
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parse and run one statement in its own transaction.
    pub fn execute(&self, src: &str) -> DbResult<ExecOutput> {
        let stmt = parse_statement(src)?;

        let mut pager = self.pager.wl();
        let mut tx = pager.begin_txn()?;

        let result = run_statement(&mut pager, &mut tx, stmt);
        match result {
            Ok(out) => {
                pager.commit(&mut tx)?;
                self.lockt.release_all(tx.tid());
                Ok(out)
            }
            Err(e) => {
                // Atomicity: roll the partial statement back.
                let _ = pager.abort(&mut tx);
                self.lockt.release_all(tx.tid());
                Err(e)
            }
        }
    }

    /// Element count currently stored in a variable.
    pub fn var_len(&self, name: &str) -> DbResult<u64> {
        let mut pager = self.pager.wl();
        let mut tx = pager.begin_txn()?;

        let result = (|| -> DbResult<u64> {
            let var = HashIndex.get(&mut pager, &mut tx, name)?;
            let r = crate::rptree::RpTree::open(Some(var.pg0), &mut pager, &mut tx)?;
            let bytes = r.total_bytes(&mut pager)?;
            Ok(bytes / var.ty.byte_size() as u64)
        })();

        match result {
            Ok(n) => {
                pager.commit(&mut tx)?;
                self.lockt.release_all(tx.tid());
                Ok(n)
            }
            Err(e) => {
                let _ = pager.abort(&mut tx);
                self.lockt.release_all(tx.tid());
                Err(e)
            }
        }
    }

    pub fn checkpoint(&self) -> DbResult {
        self.pager.wl().checkpoint()
    }

    pub fn close(&self) -> DbResult {
        self.pager.wl().close()
    }

    /// Tear the database down as a crash would: nothing is flushed and
    /// the WAL tail buffered in memory is lost.
    pub fn crash(self) {
        match self.pager.into_inner() {
            Ok(p) => p.crash(),
            Err(p) => p.into_inner().crash(),
        }
    }
}

fn run_statement(
    pager: &mut Pager,
    tx: &mut Transaction,
    stmt: Statement,
) -> DbResult<ExecOutput> {
    let hm = HashIndex;
    let mut cursor = Cursor::new(HashIndex);

    match stmt {
        Statement::Create { name, ty } => {
            cursor.create(pager, tx, &name, ty)?;
            Ok(ExecOutput::None)
        }

        Statement::Delete { name } => {
            cursor.delete(pager, tx, &name)?;
            Ok(ExecOutput::None)
        }

        Statement::Insert { name, range, expr } => {
            let var = hm.get(pager, tx, &name)?;
            let bytes = fill_bytes(&var.ty, &expr, range.count())?;

            cursor.insert(pager, tx, &name, range.start, range.count())?;

            let mut io = CBuffer::with_capacity(2 * CURSOR_PACKET);
            let mut fed = 0;
            while !cursor.idle() {
                if fed < bytes.len() {
                    fed += io.write(&bytes[fed..]);
                }
                cursor.execute(pager, tx, &mut io)?;
            }
            Ok(ExecOutput::None)
        }

        Statement::Read { name, range } => {
            cursor.read(pager, tx, &name, range.start, range.count(), 1)?;

            let mut io = CBuffer::with_capacity(2 * CURSOR_PACKET);
            let mut out = Vec::new();
            while !cursor.idle() {
                cursor.execute(pager, tx, &mut io)?;
                out.extend(io.drain());
            }
            Ok(ExecOutput::Bytes(out))
        }

        Statement::Write { name, range, expr } => {
            let var = hm.get(pager, tx, &name)?;
            let bytes = fill_bytes(&var.ty, &expr, range.count())?;

            cursor.write(pager, tx, &name, range.start, range.count(), 1)?;

            let mut io = CBuffer::with_capacity(2 * CURSOR_PACKET);
            let mut fed = 0;
            while !cursor.idle() {
                if fed < bytes.len() {
                    fed += io.write(&bytes[fed..]);
                }
                cursor.execute(pager, tx, &mut io)?;
            }
            Ok(ExecOutput::None)
        }
    }
}
