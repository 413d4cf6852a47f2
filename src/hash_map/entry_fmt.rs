use std::convert::TryInto;

use crate::{
    error::DbError,
    types::{DbResult, Pgno},
};

pub const KIND_PRESENT: u8 = 111;
pub const KIND_TOMBSTONE: u8 = 232;
pub const KIND_EOF: u8 = 152;

/// Header bytes after the kind byte: vlen u16, tlen u16, pad u8, pg0 u32.
pub const HDR_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmtState {
    Start,
    Scanning,
    Done,
    Eof,
    Corrupt,
}

/// Incremental reader for one serialized variable entry. Fed page
/// slices of any size; an entry may span arbitrarily many hash leaves.
pub struct EntryReader {
    pub state: FmtState,

    pos: usize,
    header: [u8; HDR_LEN],

    pub vlen: u16,
    pub tlen: u16,
    pub is_tombstone: bool,
    pub pg0: Pgno,

    vidx: usize,
    tidx: usize,
    pub name: Vec<u8>,
    pub tbytes: Vec<u8>,

    /// Page and in-data offset of this entry's kind byte; the delete
    /// path flips it to a tombstone in place.
    pub entry_start: Option<(Pgno, usize)>,
}

impl EntryReader {
    pub fn new() -> Self {
        Self {
            state: FmtState::Start,
            pos: 0,
            header: [0; HDR_LEN],
            vlen: 0,
            tlen: 0,
            is_tombstone: false,
            pg0: 0,
            vidx: 0,
            tidx: 0,
            name: Vec::new(),
            tbytes: Vec::new(),
            entry_start: None,
        }
    }

    /// Forget the finished entry and prepare for the next one.
    pub fn reset(&mut self) {
        *self = EntryReader::new();
    }

    fn parse_header(&mut self) -> DbResult {
        debug_assert!(self.pos == HDR_LEN + 1);

        let vlen = u16::from_le_bytes(self.header[0..2].try_into().unwrap());
        let tlen = u16::from_le_bytes(self.header[2..4].try_into().unwrap());
        let pg0 = u32::from_le_bytes(self.header[5..9].try_into().unwrap());

        // Names and types are never empty and no variable roots at the
        // reserved pages.
        if vlen == 0 || tlen == 0 || pg0 == 0 {
            self.state = FmtState::Corrupt;
            return Err(DbError::corrupt("invalid variable entry header"));
        }

        self.vlen = vlen;
        self.tlen = tlen;
        self.pg0 = pg0;
        Ok(())
    }

    /// Consume bytes from `src` (located at page `pg`, data offset
    /// `off`). Returns how many bytes were used. Stops after finishing
    /// the current entry.
    pub fn read_in(&mut self, src: &[u8], pg: Pgno, off: usize) -> DbResult<usize> {
        debug_assert!(!src.is_empty());

        let mut read = 0;

        if self.pos == 0 {
            debug_assert!(self.state == FmtState::Start);
            self.entry_start = Some((pg, off));

            let kind = src[0];
            self.pos = 1;
            read = 1;

            match kind {
                KIND_PRESENT => {
                    self.is_tombstone = false;
                    self.state = FmtState::Scanning;
                }
                KIND_TOMBSTONE => {
                    self.is_tombstone = true;
                    self.state = FmtState::Scanning;
                }
                KIND_EOF => {
                    self.state = FmtState::Eof;
                    return Ok(read);
                }
                other => {
                    self.state = FmtState::Corrupt;
                    return Err(DbError::corrupt(format!(
                        "unexpected hash leaf entry kind: {}",
                        other
                    )));
                }
            }
        }

        debug_assert!(self.state == FmtState::Scanning);

        // Header bytes
        if self.pos < 1 + HDR_LEN {
            let want = 1 + HDR_LEN - self.pos;
            let next = want.min(src.len() - read);
            if next > 0 {
                self.header[self.pos - 1..self.pos - 1 + next]
                    .copy_from_slice(&src[read..read + next]);
                self.pos += next;
                read += next;
            }

            if self.pos == 1 + HDR_LEN {
                self.parse_header()?;
                self.name = Vec::with_capacity(self.vlen as usize);
                self.tbytes = Vec::with_capacity(self.tlen as usize);
            } else {
                return Ok(read);
            }
        }

        // Name bytes
        if self.vidx < self.vlen as usize {
            let want = self.vlen as usize - self.vidx;
            let next = want.min(src.len() - read);
            if next > 0 {
                self.name.extend_from_slice(&src[read..read + next]);
                self.vidx += next;
                self.pos += next;
                read += next;
            }
            if read == src.len() {
                return Ok(read);
            }
        }

        // Type bytes
        if self.vidx == self.vlen as usize && self.tidx < self.tlen as usize {
            let want = self.tlen as usize - self.tidx;
            let next = want.min(src.len() - read);
            if next > 0 {
                self.tbytes.extend_from_slice(&src[read..read + next]);
                self.tidx += next;
                self.pos += next;
                read += next;
            }
        }

        if self.tidx == self.tlen as usize && self.vidx == self.vlen as usize {
            self.state = FmtState::Done;
        }

        Ok(read)
    }
}

/// Incremental writer for one serialized variable entry plus the EOF
/// byte that re-terminates the stream.
pub struct EntryWriter {
    pub done: bool,

    kind_and_header: [u8; 1 + HDR_LEN],
    hidx: usize,

    name: Vec<u8>,
    tbytes: Vec<u8>,
    vidx: usize,
    tidx: usize,
    eof_written: bool,
}

impl EntryWriter {
    pub fn new(name: &[u8], tbytes: &[u8], pg0: Pgno) -> Self {
        let mut hdr = [0u8; 1 + HDR_LEN];
        hdr[0] = KIND_PRESENT;
        hdr[1..3].copy_from_slice(&(name.len() as u16).to_le_bytes());
        hdr[3..5].copy_from_slice(&(tbytes.len() as u16).to_le_bytes());
        hdr[5] = 0;
        hdr[6..10].copy_from_slice(&pg0.to_le_bytes());

        Self {
            done: false,
            kind_and_header: hdr,
            hidx: 0,
            name: name.to_vec(),
            tbytes: tbytes.to_vec(),
            vidx: 0,
            tidx: 0,
            eof_written: false,
        }
    }

    /// Write into `dest`, returning the bytes produced. The first byte
    /// overwritten must be the stream's old EOF marker.
    pub fn write_out(&mut self, dest: &mut [u8]) -> DbResult<usize> {
        if dest.is_empty() {
            return Ok(0);
        }

        if self.hidx == 0 && dest[0] != KIND_EOF {
            return Err(DbError::corrupt(format!(
                "expected EOF marker ({}) to start the next entry, got {}",
                KIND_EOF, dest[0]
            )));
        }

        let mut written = 0;

        if self.hidx < self.kind_and_header.len() {
            let want = self.kind_and_header.len() - self.hidx;
            let next = want.min(dest.len() - written);
            dest[written..written + next]
                .copy_from_slice(&self.kind_and_header[self.hidx..self.hidx + next]);
            self.hidx += next;
            written += next;
            if written == dest.len() {
                return Ok(written);
            }
        }

        if self.vidx < self.name.len() {
            let want = self.name.len() - self.vidx;
            let next = want.min(dest.len() - written);
            dest[written..written + next]
                .copy_from_slice(&self.name[self.vidx..self.vidx + next]);
            self.vidx += next;
            written += next;
            if written == dest.len() {
                return Ok(written);
            }
        }

        if self.tidx < self.tbytes.len() {
            let want = self.tbytes.len() - self.tidx;
            let next = want.min(dest.len() - written);
            dest[written..written + next]
                .copy_from_slice(&self.tbytes[self.tidx..self.tidx + next]);
            self.tidx += next;
            written += next;
            if written == dest.len() {
                return Ok(written);
            }
        }

        if !self.eof_written {
            dest[written] = KIND_EOF;
            written += 1;
            self.eof_written = true;
            self.done = true;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(chunk: usize) {
        let name = b"position";
        let tbytes = vec![1u8, 3, 0, 7];
        let mut w = EntryWriter::new(name, &tbytes, 42);

        let mut stream = vec![KIND_EOF];
        stream.resize(1 + 10 + name.len() + tbytes.len() + 1, 0);

        // Feed the writer slices of `chunk` bytes
        let mut at = 0;
        while !w.done {
            let end = (at + chunk).min(stream.len());
            let wrote = w.write_out(&mut stream[at..end]).unwrap();
            assert!(wrote > 0);
            at += wrote;
        }
        assert_eq!(stream[at - 1], KIND_EOF);

        // Read it back in same-size chunks
        let mut r = EntryReader::new();
        let mut pos = 0;
        while r.state != FmtState::Done {
            let end = (pos + chunk).min(stream.len());
            let used = r.read_in(&stream[pos..end], 9, pos).unwrap();
            assert!(used > 0);
            pos += used;
        }

        assert_eq!(r.name, name.to_vec());
        assert_eq!(r.tbytes, tbytes);
        assert_eq!(r.pg0, 42);
        assert!(!r.is_tombstone);
        assert_eq!(r.entry_start, Some((9, 0)));

        // The next entry is the fresh EOF
        r.reset();
        let used = r.read_in(&stream[pos..], 9, pos).unwrap();
        assert_eq!(used, 1);
        assert_eq!(r.state, FmtState::Eof);
    }

    #[test]
    fn test_round_trip_whole() {
        round_trip(1024);
    }

    #[test]
    fn test_round_trip_byte_at_a_time() {
        round_trip(1);
    }

    #[test]
    fn test_writer_requires_eof_marker() {
        let mut w = EntryWriter::new(b"x", &[1], 3);
        let mut buf = [0u8; 64];
        assert!(w.write_out(&mut buf).is_err());
    }

    #[test]
    fn test_reader_rejects_junk_kind() {
        let mut r = EntryReader::new();
        assert!(r.read_in(&[7u8], 0, 0).is_err());
        assert_eq!(r.state, FmtState::Corrupt);
    }

    #[test]
    fn test_reader_rejects_zero_lengths() {
        let mut entry = vec![KIND_PRESENT];
        entry.extend_from_slice(&0u16.to_le_bytes()); // vlen 0
        entry.extend_from_slice(&1u16.to_le_bytes());
        entry.push(0);
        entry.extend_from_slice(&5u32.to_le_bytes());

        let mut r = EntryReader::new();
        assert!(r.read_in(&entry, 0, 0).is_err());
        assert_eq!(r.state, FmtState::Corrupt);
    }
}
