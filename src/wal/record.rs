use std::io::Read;

use crate::{
    config::PAGE_SIZE,
    error::DbError,
    io::{read_exact, read_into, ByteWriter, Decodeable, Encodeable},
    paging::PageBuf,
    transaction::TxnState,
    types::{DbResult, Lsn, Pgno, Tid},
};

const TAG_BEGIN: u8 = 1;
const TAG_UPDATE: u8 = 2;
const TAG_CLR: u8 = 3;
const TAG_COMMIT: u8 = 4;
const TAG_END: u8 = 5;
const TAG_CKPT_BEGIN: u8 = 6;
const TAG_CKPT_END: u8 = 7;

/// One active-transaction-table row inside a CKPT_END record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxnSnapshot {
    pub tid: Tid,
    pub last_lsn: Lsn,
    pub undo_next_lsn: Lsn,
    pub state: TxnState,
}

/// One dirty-page-table row inside a CKPT_END record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DptSnapshot {
    pub pg: Pgno,
    pub rec_lsn: Lsn,
}

/// A WAL record. UPDATE and CLR carry full page images; the design
/// trades log bandwidth for implementation simplicity.
pub enum WalRecord {
    Begin {
        tid: Tid,
    },
    Update {
        tid: Tid,
        pg: Pgno,
        prev: Lsn,
        undo: Box<PageBuf>,
        redo: Box<PageBuf>,
    },
    Clr {
        tid: Tid,
        pg: Pgno,
        prev: Lsn,
        undo_next: Lsn,
        redo: Box<PageBuf>,
    },
    Commit {
        tid: Tid,
        prev: Lsn,
    },
    End {
        tid: Tid,
        prev: Lsn,
    },
    CkptBegin,
    CkptEnd {
        txns: Vec<TxnSnapshot>,
        dpt: Vec<DptSnapshot>,
    },
    /// Synthetic: the reader reached the current logical end of the log
    /// (including a truncated tail). Never written to disk.
    Eof,
}

impl WalRecord {
    pub fn tid(&self) -> Option<Tid> {
        match self {
            WalRecord::Begin { tid }
            | WalRecord::Update { tid, .. }
            | WalRecord::Clr { tid, .. }
            | WalRecord::Commit { tid, .. }
            | WalRecord::End { tid, .. } => Some(*tid),
            _ => None,
        }
    }

    pub fn prev_lsn(&self) -> Lsn {
        match self {
            WalRecord::Update { prev, .. }
            | WalRecord::Clr { prev, .. }
            | WalRecord::Commit { prev, .. }
            | WalRecord::End { prev, .. } => *prev,
            _ => 0,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            WalRecord::Begin { .. } => "BEGIN",
            WalRecord::Update { .. } => "UPDATE",
            WalRecord::Clr { .. } => "CLR",
            WalRecord::Commit { .. } => "COMMIT",
            WalRecord::End { .. } => "END",
            WalRecord::CkptBegin => "CKPT_BEGIN",
            WalRecord::CkptEnd { .. } => "CKPT_END",
            WalRecord::Eof => "EOF",
        }
    }
}

impl Encodeable for WalRecord {
    fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        match self {
            WalRecord::Begin { tid } => {
                w.write(&TAG_BEGIN);
                w.write(tid);
            }
            WalRecord::Update {
                tid,
                pg,
                prev,
                undo,
                redo,
            } => {
                w.write(&TAG_UPDATE);
                w.write(tid);
                w.write(pg);
                w.write(prev);
                w.write_bytes(&undo[..]);
                w.write_bytes(&redo[..]);
            }
            WalRecord::Clr {
                tid,
                pg,
                prev,
                undo_next,
                redo,
            } => {
                w.write(&TAG_CLR);
                w.write(tid);
                w.write(pg);
                w.write(prev);
                w.write(undo_next);
                w.write_bytes(&redo[..]);
            }
            WalRecord::Commit { tid, prev } => {
                w.write(&TAG_COMMIT);
                w.write(tid);
                w.write(prev);
            }
            WalRecord::End { tid, prev } => {
                w.write(&TAG_END);
                w.write(tid);
                w.write(prev);
            }
            WalRecord::CkptBegin => {
                w.write(&TAG_CKPT_BEGIN);
            }
            WalRecord::CkptEnd { txns, dpt } => {
                w.write(&TAG_CKPT_END);
                w.write(&(txns.len() as u32));
                for t in txns {
                    w.write(&t.tid);
                    w.write(&t.last_lsn);
                    w.write(&t.undo_next_lsn);
                    w.write(&t.state.as_u8());
                }
                w.write(&(dpt.len() as u32));
                for d in dpt {
                    w.write(&d.pg);
                    w.write(&d.rec_lsn);
                }
            }
            WalRecord::Eof => unreachable!("EOF is never written to disk"),
        }
        w.into_bytes()
    }
}

fn read_page_image<R: Read>(reader: &mut R) -> DbResult<Box<PageBuf>> {
    let bytes = read_exact(reader, PAGE_SIZE)?;
    let mut buf = Box::new([0u8; PAGE_SIZE]);
    buf.copy_from_slice(&bytes);
    Ok(buf)
}

impl Decodeable for WalRecord {
    fn decode_from<R: Read>(reader: &mut R) -> DbResult<Self> {
        let tag = u8::decode_from(reader)?;
        match tag {
            TAG_BEGIN => Ok(WalRecord::Begin {
                tid: read_into(reader)?,
            }),
            TAG_UPDATE => Ok(WalRecord::Update {
                tid: read_into(reader)?,
                pg: read_into(reader)?,
                prev: read_into(reader)?,
                undo: read_page_image(reader)?,
                redo: read_page_image(reader)?,
            }),
            TAG_CLR => Ok(WalRecord::Clr {
                tid: read_into(reader)?,
                pg: read_into(reader)?,
                prev: read_into(reader)?,
                undo_next: read_into(reader)?,
                redo: read_page_image(reader)?,
            }),
            TAG_COMMIT => Ok(WalRecord::Commit {
                tid: read_into(reader)?,
                prev: read_into(reader)?,
            }),
            TAG_END => Ok(WalRecord::End {
                tid: read_into(reader)?,
                prev: read_into(reader)?,
            }),
            TAG_CKPT_BEGIN => Ok(WalRecord::CkptBegin),
            TAG_CKPT_END => {
                let ntxns: u32 = read_into(reader)?;
                let mut txns = Vec::with_capacity(ntxns as usize);
                for _ in 0..ntxns {
                    let tid = read_into(reader)?;
                    let last_lsn = read_into(reader)?;
                    let undo_next_lsn = read_into(reader)?;
                    let state = TxnState::from_u8(u8::decode_from(reader)?)?;
                    txns.push(TxnSnapshot {
                        tid,
                        last_lsn,
                        undo_next_lsn,
                        state,
                    });
                }
                let ndpt: u32 = read_into(reader)?;
                let mut dpt = Vec::with_capacity(ndpt as usize);
                for _ in 0..ndpt {
                    dpt.push(DptSnapshot {
                        pg: read_into(reader)?,
                        rec_lsn: read_into(reader)?,
                    });
                }
                Ok(WalRecord::CkptEnd { txns, dpt })
            }
            other => Err(DbError::corrupt(format!(
                "unknown wal record tag: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_update_round_trip() {
        let mut undo = Box::new([0u8; PAGE_SIZE]);
        let mut redo = Box::new([0u8; PAGE_SIZE]);
        undo[10] = 1;
        redo[10] = 2;

        let rec = WalRecord::Update {
            tid: 7,
            pg: 3,
            prev: 99,
            undo,
            redo,
        };
        let bytes = rec.encode();
        assert_eq!(bytes.len(), 1 + 8 + 4 + 8 + 2 * PAGE_SIZE);

        let back = WalRecord::decode_from(&mut Cursor::new(bytes)).unwrap();
        match back {
            WalRecord::Update {
                tid,
                pg,
                prev,
                undo,
                redo,
            } => {
                assert_eq!(tid, 7);
                assert_eq!(pg, 3);
                assert_eq!(prev, 99);
                assert_eq!(undo[10], 1);
                assert_eq!(redo[10], 2);
            }
            _ => panic!("wrong record kind"),
        }
    }

    #[test]
    fn test_ckpt_end_round_trip() {
        let rec = WalRecord::CkptEnd {
            txns: vec![TxnSnapshot {
                tid: 1,
                last_lsn: 2,
                undo_next_lsn: 3,
                state: TxnState::Running,
            }],
            dpt: vec![DptSnapshot { pg: 5, rec_lsn: 6 }],
        };
        let bytes = rec.encode();
        let back = WalRecord::decode_from(&mut Cursor::new(bytes)).unwrap();
        match back {
            WalRecord::CkptEnd { txns, dpt } => {
                assert_eq!(txns.len(), 1);
                assert_eq!(txns[0].tid, 1);
                assert_eq!(dpt, vec![DptSnapshot { pg: 5, rec_lsn: 6 }]);
            }
            _ => panic!("wrong record kind"),
        }
    }
}
