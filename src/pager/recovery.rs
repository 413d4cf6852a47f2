use log::{debug, info};

use crate::{
    error::DbError,
    pager::{dirty_table::DirtyPageTable, Pager},
    paging::PG_ANY,
    transaction::{TxnData, TxnState, TxnTable},
    types::{DbResult, Lsn, Tid},
    wal::WalRecord,
};

struct AriesCtx {
    master_lsn: Lsn,
    redo_lsn: Lsn,
    txt: TxnTable,
    dpt: DirtyPageTable,
    max_tid: Tid,
}

impl AriesCtx {
    fn observe_tid(&mut self, tid: Option<Tid>) {
        if let Some(t) = tid {
            if t > self.max_tid {
                self.max_tid = t;
            }
        }
    }
}

/// Restart the pager after a crash: analysis, redo, undo. Returns the
/// largest transaction id observed so the pager can continue after it.
/// (ARIES Figure 9.)
pub(crate) fn restart(pager: &mut Pager) -> DbResult<Tid> {
    let mut ctx = AriesCtx {
        master_lsn: pager.master_lsn(),
        redo_lsn: 0,
        txt: TxnTable::new(),
        dpt: DirtyPageTable::new(),
        max_tid: 0,
    };

    pager.set_restarting(true);
    let result = run_phases(pager, &mut ctx);
    pager.set_restarting(false);
    result?;

    Ok(ctx.max_tid)
}

fn run_phases(pager: &mut Pager, ctx: &mut AriesCtx) -> DbResult {
    restart_analysis(pager, ctx)?;
    restart_redo(pager, ctx)?;
    restart_undo(pager, ctx)
}

/// Forward scan from the master checkpoint (or the log start) building
/// the transaction table and the dirty page table. (ARIES Figure 10.)
fn restart_analysis(pager: &mut Pager, ctx: &mut AriesCtx) -> DbResult {
    info!("restart analysis");

    if ctx.master_lsn > 0 {
        let master_rec = pager.wal_mut().read_entry(ctx.master_lsn)?;
        match master_rec {
            WalRecord::CkptBegin => {}
            _ => {
                return Err(DbError::corrupt(
                    "master lsn points at a record that is not a checkpoint begin",
                ));
            }
        }
        pager.wal_mut().seek_read_after(ctx.master_lsn)?;
    } else {
        pager.wal_mut().seek_read(0);
    }

    loop {
        let (rec, lsn) = pager.wal_mut().read_next()?;
        if let WalRecord::Eof = rec {
            break;
        }

        ctx.observe_tid(rec.tid());

        // Any transaction-bearing record revives its transaction as an
        // undo candidate until a COMMIT or END says otherwise.
        if let Some(tid) = rec.tid() {
            ctx.txt.insert_if_absent(
                tid,
                TxnData {
                    state: TxnState::CandidateForUndo,
                    last_lsn: lsn,
                    undo_next_lsn: rec.prev_lsn(),
                },
            );
        }

        match rec {
            WalRecord::Update { tid, pg, .. } => {
                let mut d = ctx.txt.get_expect(tid)?;
                d.last_lsn = lsn;
                d.undo_next_lsn = lsn;
                ctx.txt.update(tid, d);

                ctx.dpt.insert_if_absent(pg, lsn);
            }
            WalRecord::Clr { tid, undo_next, .. } => {
                let mut d = ctx.txt.get_expect(tid)?;
                d.last_lsn = lsn;
                d.undo_next_lsn = undo_next;
                ctx.txt.update(tid, d);
            }
            WalRecord::Commit { tid, .. } => {
                let mut d = ctx.txt.get_expect(tid)?;
                d.last_lsn = lsn;
                d.state = TxnState::Committed;
                ctx.txt.update(tid, d);
            }
            WalRecord::End { tid, .. } => {
                ctx.txt.remove(tid);
            }
            WalRecord::CkptEnd { txns, dpt } => {
                for t in &txns {
                    ctx.observe_tid(Some(t.tid));
                }
                ctx.txt.merge_snapshot(&txns);
                ctx.dpt.merge_snapshot(&dpt);
            }
            WalRecord::Begin { .. } | WalRecord::CkptBegin => {}
            WalRecord::Eof => unreachable!(),
        }
    }

    // Transactions that finished their work (committed, or with nothing
    // left to undo) get their END written now and leave the table.
    let finished: Vec<(Tid, TxnData)> = ctx
        .txt
        .iter()
        .filter(|(_, d)| {
            (d.state == TxnState::CandidateForUndo && d.undo_next_lsn == 0)
                || d.state == TxnState::Committed
        })
        .collect();

    for (tid, d) in finished {
        pager.wal_mut().append(&WalRecord::End {
            tid,
            prev: d.last_lsn,
        })?;
        ctx.txt.remove(tid);
    }

    ctx.redo_lsn = ctx.dpt.min_rec_lsn().unwrap_or(0);
    debug!("analysis done, redo lsn: {}", ctx.redo_lsn);
    Ok(())
}

/// Repeat history from the oldest rec_lsn: reapply every update or CLR
/// whose effect is missing from the page. (ARIES Figure 11.)
fn restart_redo(pager: &mut Pager, ctx: &mut AriesCtx) -> DbResult {
    info!("restart redo");

    if ctx.redo_lsn == 0 {
        return Ok(());
    }

    pager.wal_mut().seek_read(ctx.redo_lsn);

    loop {
        let (rec, lsn) = pager.wal_mut().read_next()?;

        let (pg, redo) = match rec {
            WalRecord::Eof => break,
            WalRecord::Update { pg, redo, .. } => (pg, redo),
            WalRecord::Clr { pg, redo, .. } => (pg, redo),
            _ => continue,
        };

        let rec_lsn = match ctx.dpt.get(pg) {
            Some(r) => r,
            None => continue,
        };
        if lsn < rec_lsn {
            continue;
        }

        // The page may be mid-update on disk; validation is suppressed.
        let mut ph = pager.get_writable_no_verify(pg)?;

        let page_lsn = pager.page(&ph).page_lsn();
        if page_lsn < lsn {
            pager.page_mut(&ph).raw_mut().copy_from_slice(&redo[..]);
            pager.page_mut(&ph).set_page_lsn(lsn);
        } else {
            // Already reflected; tighten the table.
            ctx.dpt.update(pg, page_lsn + 1);
        }

        pager.release_no_tx(ph, PG_ANY)?;
    }

    Ok(())
}

/// Roll back every loser transaction, always undoing the record with
/// the largest undo_next_lsn first. (ARIES Figure 12.)
fn restart_undo(pager: &mut Pager, ctx: &mut AriesCtx) -> DbResult {
    info!("restart undo");

    loop {
        let (tid, undo_lsn) = match ctx.txt.max_candidate_undo_lsn() {
            Some(v) => v,
            None => break,
        };

        let rec = pager.wal_mut().read_entry(undo_lsn)?;
        match rec {
            WalRecord::Update {
                pg, prev, undo, ..
            } => {
                let mut ph = pager.get_writable_no_verify(pg)?;
                pager.page_mut(&ph).raw_mut().copy_from_slice(&undo[..]);

                let mut d = ctx.txt.get_expect(tid)?;
                let clr = WalRecord::Clr {
                    tid,
                    prev: d.last_lsn,
                    pg,
                    undo_next: prev,
                    redo: undo,
                };
                let clr_lsn = pager.wal_mut().append(&clr)?;
                pager.wal_mut().flush_to(clr_lsn)?;

                pager.page_mut(&ph).set_page_lsn(clr_lsn);
                pager.release_no_tx(ph, PG_ANY)?;

                d.last_lsn = clr_lsn;
                d.undo_next_lsn = prev;
                ctx.txt.update(tid, d);
            }
            WalRecord::Clr { undo_next, .. } => {
                let mut d = ctx.txt.get_expect(tid)?;
                d.undo_next_lsn = undo_next;
                ctx.txt.update(tid, d);
            }
            WalRecord::Begin { .. } => {
                let d = ctx.txt.get_expect(tid)?;
                pager.wal_mut().append(&WalRecord::End {
                    tid,
                    prev: d.last_lsn,
                })?;
                ctx.txt.remove(tid);
            }
            other => {
                return Err(DbError::corrupt(format!(
                    "got a {} record in the restart undo chain at lsn {}",
                    other.kind_name(),
                    undo_lsn
                )));
            }
        }
    }

    // A loser whose BEGIN sat at lsn 0 exhausts its chain without ever
    // visiting the BEGIN record; retire whatever is left.
    let leftovers: Vec<(Tid, TxnData)> = ctx.txt.iter().collect();
    for (tid, d) in leftovers {
        if d.state == TxnState::CandidateForUndo {
            pager.wal_mut().append(&WalRecord::End {
                tid,
                prev: d.last_lsn,
            })?;
            ctx.txt.remove(tid);
        }
    }

    Ok(())
}
