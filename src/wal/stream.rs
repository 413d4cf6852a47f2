use std::io::Read;
use std::path::Path;

use log::{debug, trace};

use crate::{
    error::ErrorKind,
    io::{DbFile, Decodeable, Encodeable},
    types::{DbResult, Lsn},
    wal::record::WalRecord,
};

/// The write-ahead log stream. Appends land in an in-memory tail buffer;
/// `flush_to` makes everything up to (and past) a given LSN durable.
/// Reads may address both the durable prefix and the buffered tail, so
/// rollback can walk records that were never forced.
pub struct Wal {
    file: DbFile,

    /// Durable length of the log file. Every buffered byte sits at an
    /// offset >= base.
    base: u64,

    /// Appended but not yet flushed bytes.
    buffer: Vec<u8>,

    /// Cursor for sequential reads.
    read_pos: u64,
}

/// Adapter that reads the log as one contiguous byte stream spanning the
/// durable file and the in-memory tail. Short reads surface as Io errors
/// which the stream converts into the synthetic EOF record.
struct TailReader<'a> {
    file: &'a mut DbFile,
    base: u64,
    buffer: &'a [u8],
    pos: u64,
}

impl<'a> Read for TailReader<'a> {
    fn read(&mut self, dest: &mut [u8]) -> std::io::Result<usize> {
        let total = self.base + self.buffer.len() as u64;
        if self.pos >= total {
            return Ok(0);
        }

        let n;
        if self.pos < self.base {
            // Durable prefix
            n = dest.len().min((self.base - self.pos) as usize);
            self.file
                .read_at(self.pos, &mut dest[..n])
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        } else {
            // Buffered tail
            let off = (self.pos - self.base) as usize;
            n = dest.len().min(self.buffer.len() - off);
            dest[..n].copy_from_slice(&self.buffer[off..off + n]);
        }

        self.pos += n as u64;
        Ok(n)
    }
}

impl Wal {
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let file = DbFile::open(path)?;
        let base = file.len()?;
        Ok(Self {
            file,
            base,
            buffer: Vec::new(),
            read_pos: 0,
        })
    }

    pub fn reset(&mut self) -> DbResult {
        self.file.set_len(0)?;
        self.base = 0;
        self.buffer.clear();
        self.read_pos = 0;
        Ok(())
    }

    /// The LSN the next appended record will receive.
    pub fn next_lsn(&self) -> Lsn {
        self.base + self.buffer.len() as u64
    }

    pub fn append(&mut self, rec: &WalRecord) -> DbResult<Lsn> {
        let lsn = self.next_lsn();
        let bytes = rec.encode();
        trace!("wal append {} at lsn {}", rec.kind_name(), lsn);
        self.buffer.extend_from_slice(&bytes);
        Ok(lsn)
    }

    /// Block until every byte up to (and including) the record starting
    /// at `lsn` is durable.
    pub fn flush_to(&mut self, lsn: Lsn) -> DbResult {
        if self.buffer.is_empty() {
            return Ok(());
        }
        debug!(
            "wal flush to lsn {} ({} buffered bytes)",
            lsn,
            self.buffer.len()
        );
        self.file.append(&self.buffer)?;
        self.file.sync()?;
        self.base += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    pub fn flush_all(&mut self) -> DbResult {
        let end = self.next_lsn();
        self.flush_to(end)
    }

    /// Read the record starting at `lsn`. A position at or past the
    /// logical end, or a record cut short by a crash, reads as EOF.
    pub fn read_entry(&mut self, lsn: Lsn) -> DbResult<WalRecord> {
        let (rec, _) = self.read_entry_sized(lsn)?;
        Ok(rec)
    }

    fn read_entry_sized(&mut self, lsn: Lsn) -> DbResult<(WalRecord, u64)> {
        let total = self.next_lsn();
        if lsn >= total {
            return Ok((WalRecord::Eof, 0));
        }

        let mut reader = TailReader {
            file: &mut self.file,
            base: self.base,
            buffer: &self.buffer,
            pos: lsn,
        };

        match WalRecord::decode_from(&mut reader) {
            Ok(rec) => {
                let size = reader.pos - lsn;
                Ok((rec, size))
            }
            // A record cut off mid-write is a clean end of the log.
            Err(e) if e.kind() == ErrorKind::Io => Ok((WalRecord::Eof, 0)),
            Err(e) => Err(e.wrap("wal/read_entry")),
        }
    }

    /// Position the sequential reader at `lsn`.
    pub fn seek_read(&mut self, lsn: Lsn) {
        self.read_pos = lsn;
    }

    /// Read the next record in sequence. Returns the record and the LSN
    /// it started at.
    pub fn read_next(&mut self) -> DbResult<(WalRecord, Lsn)> {
        let at = self.read_pos;
        let (rec, size) = self.read_entry_sized(at)?;
        self.read_pos += size;
        Ok((rec, at))
    }

    /// Skip past the record at `lsn` and position the sequential reader
    /// on its successor.
    pub fn seek_read_after(&mut self, lsn: Lsn) -> DbResult {
        let (_, size) = self.read_entry_sized(lsn)?;
        self.read_pos = lsn + size;
        Ok(())
    }

    /// Drop the buffered tail on the floor, as a crash would.
    pub fn crash(&mut self) {
        self.buffer.clear();
    }

    /// Debug dump of the whole log, in the spirit of a recovery
    /// post-mortem. Page images are shown as a short hex prefix.
    pub fn dump(&mut self) -> DbResult<String> {
        let mut out = String::new();
        let mut pos = 0;
        loop {
            let (rec, size) = self.read_entry_sized(pos)?;
            match &rec {
                WalRecord::Eof => break,
                WalRecord::Update { tid, pg, prev, redo, .. } => {
                    out.push_str(&format!(
                        "[{}] UPDATE tid={} pg={} prev={} redo={}..\n",
                        pos,
                        tid,
                        pg,
                        prev,
                        hex::encode(&redo[..8])
                    ));
                }
                WalRecord::Clr {
                    tid,
                    pg,
                    undo_next,
                    redo,
                    ..
                } => {
                    out.push_str(&format!(
                        "[{}] CLR tid={} pg={} undo_next={} redo={}..\n",
                        pos,
                        tid,
                        pg,
                        undo_next,
                        hex::encode(&redo[..8])
                    ));
                }
                other => {
                    out.push_str(&format!(
                        "[{}] {} tid={:?} prev={}\n",
                        pos,
                        other.kind_name(),
                        other.tid(),
                        other.prev_lsn()
                    ));
                }
            }
            pos += size;
        }
        Ok(out)
    }
}
