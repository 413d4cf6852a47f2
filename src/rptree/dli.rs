use crate::{
    config::DL_CAPACITY,
    pager::{PageHandle, Pager},
    paging::{PageType, PG_ANY},
    rptree::MemInnerNode,
    transaction::Transaction,
    types::{BSize, DbResult, PSize, Pgno, PGNO_NULL},
};

/// Bottom-layer insert (data list insert). Starting at `idx0` inside
/// the seeked leaf: the right tail of the leaf is parked in a temp
/// buffer, the source bytes are appended through the leaf and a chain
/// of freshly allocated leaves, and the tail is appended last. The
/// returned builder carries every new `(leaf, byte length)` pair for
/// the routing layer above.
pub(crate) fn run(
    start_pg: Pgno,
    idx0: PSize,
    src: &[u8],
    pager: &mut Pager,
    tx: &mut Transaction,
) -> DbResult<MemInnerNode> {
    let mut cur = pager.get_writable(PageType::DataList.mask(), start_pg)?;

    // Park the right half of the first page.
    let mut tail = vec![0u8; DL_CAPACITY];
    let tbl = pager.page_mut(&cur).dl_read_out_from(&mut tail, idx0);
    let last_link = pager.page(&cur).dl_next();

    let mut out = MemInnerNode::new(start_pg);
    let mut nnew = 0usize;

    for chunk in &[src, &tail[..tbl]] {
        let mut off = 0;
        while off < chunk.len() {
            if pager.page(&cur).dl_avail() == 0 {
                cur = advance_to_new_leaf(cur, &mut out, &mut nnew, pager, tx)?;
            }
            let wrote = pager.page_mut(&cur).dl_append(&chunk[off..]);
            debug_assert!(wrote > 0);
            off += wrote;
        }
    }

    // Re-link the end of the new run to the rest of the chain.
    pager.page_mut(&cur).dl_set_next(last_link);

    // Keep the half-full invariant on the last new leaf by borrowing
    // from its (full) predecessor.
    if nnew > 0 && (pager.page(&cur).dl_used() as usize) < DL_CAPACITY / 2 {
        let prev_pg = pager.page(&cur).dl_prev();
        let mut prev = pager.get_writable(PG_ANY, prev_pg)?;

        let deficit = DL_CAPACITY / 2 - pager.page(&cur).dl_used() as usize;
        {
            let (pprev, pcur) = pager.pages_mut2(&prev, &cur);
            crate::paging::dl_move_right(pprev, pcur, deficit);
        }

        pager.save(tx, &mut prev, PG_ANY)?;
        pager.release_ro(prev, PG_ANY)?;
    }

    // Close out the final page.
    let final_used = pager.page(&cur).dl_used() as BSize;
    if nnew == 0 {
        out.first_len = final_used;
    } else {
        out.push(cur.pgno(), final_used);
    }

    if last_link != PGNO_NULL && cur.pgno() != start_pg {
        // The old successor's back link must follow the new chain end.
        let cur_pg = cur.pgno();
        let mut succ = pager.get_writable(PG_ANY, last_link)?;
        pager.page_mut(&succ).dl_set_prev(cur_pg);
        pager.save(tx, &mut succ, PG_ANY)?;
        pager.release_ro(succ, PG_ANY)?;
    }

    pager.save(tx, &mut cur, PG_ANY)?;
    pager.release_ro(cur, PG_ANY)?;

    // The builder's first_len must reflect any borrow-back above.
    fixup_lens(&mut out, pager)?;

    Ok(out)
}

/// Allocate the next leaf of the run, link it behind `cur`, record
/// `cur`'s final length in the builder, and hand the new leaf back.
fn advance_to_new_leaf(
    mut cur: PageHandle,
    out: &mut MemInnerNode,
    nnew: &mut usize,
    pager: &mut Pager,
    tx: &mut Transaction,
) -> DbResult<PageHandle> {
    let next = pager.new_page(tx, PageType::DataList)?;
    let next_pg = next.pgno();
    let cur_pg = cur.pgno();

    let cur_used = pager.page(&cur).dl_used() as BSize;

    pager.page_mut(&cur).dl_set_next(next_pg);
    pager.page_mut(&next).dl_set_prev(cur_pg);

    if *nnew == 0 {
        out.first_len = cur_used;
    } else {
        out.push(cur_pg, cur_used);
    }
    *nnew += 1;

    pager.save(tx, &mut cur, PG_ANY)?;
    pager.release_ro(cur, PG_ANY)?;

    Ok(next)
}

/// The borrow-back rebalance can shrink the second-to-last page after
/// its length was recorded; refresh recorded lengths from the pages.
fn fixup_lens(out: &mut MemInnerNode, pager: &mut Pager) -> DbResult {
    if out.new_children.is_empty() {
        return Ok(());
    }

    {
        let h = pager.get(PG_ANY, out.first)?;
        out.first_len = pager.page(&h).dl_used() as BSize;
        pager.release_ro(h, PG_ANY)?;
    }

    for i in 0..out.new_children.len() {
        let (pg, _) = out.new_children[i];
        let h = pager.get(PG_ANY, pg)?;
        out.new_children[i].1 = pager.page(&h).dl_used() as BSize;
        pager.release_ro(h, PG_ANY)?;
    }

    Ok(())
}
