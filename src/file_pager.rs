use std::path::Path;

use log::debug;

use crate::{
    config::PAGE_SIZE,
    error::DbError,
    io::DbFile,
    types::{DbResult, Pgno},
};

/// Raw page-granular file I/O. Page `pg` lives at byte offset
/// `pg * PAGE_SIZE`; the file only ever grows at the tail.
pub struct FilePager {
    file: DbFile,
    npages: Pgno,
}

impl FilePager {
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let file = DbFile::open(path)?;
        let len = file.len()?;

        if len % PAGE_SIZE as u64 != 0 {
            return Err(DbError::corrupt(format!(
                "data file length {} is not a multiple of the page size {}",
                len, PAGE_SIZE
            )));
        }

        Ok(Self {
            file,
            npages: (len / PAGE_SIZE as u64) as Pgno,
        })
    }

    pub fn npages(&self) -> Pgno {
        self.npages
    }

    pub fn read(&mut self, pg: Pgno, dest: &mut [u8; PAGE_SIZE]) -> DbResult {
        if pg >= self.npages {
            return Err(DbError::io(format!(
                "page {} is beyond the end of the file ({} pages)",
                pg, self.npages
            )));
        }
        self.file.read_at(pg as u64 * PAGE_SIZE as u64, dest)
    }

    pub fn write(&mut self, pg: Pgno, src: &[u8; PAGE_SIZE]) -> DbResult {
        if pg >= self.npages {
            return Err(DbError::io(format!(
                "page {} is beyond the end of the file ({} pages)",
                pg, self.npages
            )));
        }
        self.file.write_at(pg as u64 * PAGE_SIZE as u64, src)
    }

    /// Extend the file by one zeroed page and return its number.
    pub fn new_page(&mut self) -> DbResult<Pgno> {
        let pg = self.npages;
        let zeros = [0u8; PAGE_SIZE];
        self.file.append(&zeros)?;
        self.npages += 1;
        debug!("extended data file to {} pages", self.npages);
        Ok(pg)
    }

    pub fn reset(&mut self) -> DbResult {
        self.file.set_len(0)?;
        self.npages = 0;
        Ok(())
    }

    pub fn sync(&mut self) -> DbResult {
        self.file.sync()
    }

    /// Drop the file handle without syncing. Everything already handed
    /// to the OS may or may not be durable, same as a process crash.
    pub fn crash(self) {}
}
