use crate::{
    config::{DL_CAPACITY, IN_MAX_KEYS},
    error::DbError,
    pager::{PageHandle, Pager},
    paging::{dl_move_left, dl_move_right, PageType, PG_ANY},
    rptree::RpTree,
    transaction::Transaction,
    types::{BSize, DbResult, Pgno, TSize, PGNO_NULL},
};

/// Delete (or take, when `dest` is given) `n` elements of `size` bytes
/// with an element `stride`, starting at the seek position. Bytes are
/// consumed in place leaf by leaf; afterwards a fix-up pass restores
/// the occupancy invariants by borrowing from or merging with siblings
/// and collapsing a thinned root. Freed pages become tombstones.
pub(crate) fn run(
    r: &mut RpTree,
    mut dest: Option<&mut [u8]>,
    size: TSize,
    n: BSize,
    stride: BSize,
    pager: &mut Pager,
    tx: &mut Transaction,
) -> DbResult<BSize> {
    debug_assert!(size > 0);
    debug_assert!(stride >= 1);

    if !r.is_seeked {
        r.seek(0, pager)?;
    }

    let start = r.gidx;
    let size_b = size as BSize;
    let mut removed: BSize = 0;
    let mut out_off: usize = 0;
    let mut pos = start;

    'outer: for _ in 0..n {
        let mut left = size_b;
        while left > 0 {
            r.seek(pos, pager)?;
            if r.eof {
                if left < size_b {
                    return Err(DbError::corrupt(
                        "r+tree: premature EOF while deleting",
                    ));
                }
                break 'outer;
            }

            let mut h = pager.get_writable(PG_ANY, r.pg)?;
            let used = pager.page(&h).dl_used() as BSize;
            let avail = used - r.lidx;
            if avail == 0 {
                pager.cancel_w(&mut h);
                pager.release_ro(h, PG_ANY)?;
                if left == size_b {
                    break 'outer;
                }
                return Err(DbError::corrupt(
                    "r+tree: premature EOF while deleting",
                ));
            }

            let k = avail.min(left) as usize;
            if let Some(d) = dest.as_deref_mut() {
                pager
                    .page(&h)
                    .dl_read(Some(&mut d[out_off..]), r.lidx as u16, k);
                out_off += k;
            }
            pager.page_mut(&h).dl_remove_range(r.lidx as u16, k);

            subtract_on_path(r, k as BSize, pager, tx)?;

            let now_empty =
                pager.page(&h).dl_used() == 0 && !r.stack.is_empty();
            if now_empty {
                unlink_data_list(&mut h, pager, tx)?;
                let victim = h.pgno();
                pager.delete_and_release(tx, h)?;
                remove_child_upward(r, victim, pager, tx)?;
            } else {
                pager.save(tx, &mut h, PG_ANY)?;
                pager.release_ro(h, PG_ANY)?;
            }

            left -= k as BSize;
        }

        removed += 1;
        pos += size_b * (stride - 1);
    }

    fixup(r, start, pager, tx)?;
    r.is_seeked = false;
    Ok(removed)
}

/// Shrink every routing key to the right of the current seek path.
fn subtract_on_path(
    r: &RpTree,
    delta: BSize,
    pager: &mut Pager,
    tx: &mut Transaction,
) -> DbResult {
    for lvl in r.stack.iter() {
        let mut h = pager.get_writable(PG_ANY, lvl.pg)?;
        pager.page_mut(&h).in_sub_right(lvl.lidx, delta);
        pager.save(tx, &mut h, PG_ANY)?;
        pager.release_ro(h, PG_ANY)?;
    }
    Ok(())
}

/// Splice a data list out of its sibling chain. The handle keeps its
/// links until the caller tombstones it.
fn unlink_data_list(
    h: &mut PageHandle,
    pager: &mut Pager,
    tx: &mut Transaction,
) -> DbResult {
    let prev = pager.page(h).dl_prev();
    let next = pager.page(h).dl_next();

    if prev != PGNO_NULL {
        let mut ph = pager.get_writable(PG_ANY, prev)?;
        pager.page_mut(&ph).dl_set_next(next);
        pager.save(tx, &mut ph, PG_ANY)?;
        pager.release_ro(ph, PG_ANY)?;
    }
    if next != PGNO_NULL {
        let mut nh = pager.get_writable(PG_ANY, next)?;
        pager.page_mut(&nh).dl_set_prev(prev);
        pager.save(tx, &mut nh, PG_ANY)?;
        pager.release_ro(nh, PG_ANY)?;
    }
    Ok(())
}

/// Splice an inner node out of its level chain.
fn unlink_inner(pg: Pgno, pager: &mut Pager, tx: &mut Transaction) -> DbResult {
    let (prev, next) = {
        let h = pager.get(PG_ANY, pg)?;
        let links = (pager.page(&h).in_prev(), pager.page(&h).in_next());
        pager.release_ro(h, PG_ANY)?;
        links
    };

    if prev != PGNO_NULL {
        let mut ph = pager.get_writable(PG_ANY, prev)?;
        pager.page_mut(&ph).in_set_next(next);
        pager.save(tx, &mut ph, PG_ANY)?;
        pager.release_ro(ph, PG_ANY)?;
    }
    if next != PGNO_NULL {
        let mut nh = pager.get_writable(PG_ANY, next)?;
        pager.page_mut(&nh).in_set_prev(prev);
        pager.save(tx, &mut nh, PG_ANY)?;
        pager.release_ro(nh, PG_ANY)?;
    }
    Ok(())
}

/// Remove an emptied child from its parent, cascading upward while
/// parents empty out. A fully emptied tree is reseeded with a fresh
/// empty root leaf.
fn remove_child_upward(
    r: &mut RpTree,
    child: Pgno,
    pager: &mut Pager,
    tx: &mut Transaction,
) -> DbResult {
    let mut victim = child;
    let mut lvl_idx = r.stack.len();

    while lvl_idx > 0 {
        lvl_idx -= 1;
        let lvl = r.stack[lvl_idx];

        let mut h = pager.get_writable(PG_ANY, lvl.pg)?;
        let mut children = pager.page(&h).in_children();
        let vidx = children
            .iter()
            .position(|(pg, _)| *pg == victim)
            .ok_or_else(|| {
                DbError::corrupt(format!(
                    "page {} is not a child of inner node {}",
                    victim, lvl.pg
                ))
            })?;
        debug_assert!(children[vidx].1 == 0);
        children.remove(vidx);
        pager.page_mut(&h).in_set_children(&children);
        pager.save(tx, &mut h, PG_ANY)?;
        pager.release_ro(h, PG_ANY)?;

        if !children.is_empty() {
            return Ok(());
        }

        if lvl_idx == 0 {
            // The whole tree drained away: the root inner node has no
            // children left. Reseed with an empty root leaf.
            let nh = pager.new_page(tx, PageType::DataList)?;
            let fresh = nh.pgno();
            pager.release(tx, nh, PageType::DataList.mask())?;

            let old = pager.get(PG_ANY, lvl.pg)?;
            pager.delete_and_release(tx, old)?;

            r.pg0 = fresh;
            return Ok(());
        }

        unlink_inner(lvl.pg, pager, tx)?;
        let old = pager.get(PG_ANY, lvl.pg)?;
        pager.delete_and_release(tx, old)?;
        victim = lvl.pg;
    }

    Ok(())
}

/// Restore the occupancy invariants around the deletion point: collapse
/// a single-child root, then repeatedly find the shallowest node on the
/// boundary paths that is under half full and borrow from or merge with
/// a same-parent sibling.
fn fixup(
    r: &mut RpTree,
    start: BSize,
    pager: &mut Pager,
    tx: &mut Transaction,
) -> DbResult {
    loop {
        if collapse_root(r, pager, tx)? {
            continue;
        }

        let total = r.total_bytes(pager)?;
        if total == 0 {
            break;
        }

        let mut positions = vec![start.min(total - 1)];
        if start > 0 {
            let p = (start - 1).min(total - 1);
            if p != positions[0] {
                positions.push(p);
            }
        }

        let mut changed = false;
        for posn in positions {
            if fix_path_once(r, posn, pager, tx)? {
                changed = true;
                break;
            }
        }
        if !changed {
            break;
        }
    }
    Ok(())
}

/// A root inner node with a single child hands the root role to that
/// child.
fn collapse_root(
    r: &mut RpTree,
    pager: &mut Pager,
    tx: &mut Transaction,
) -> DbResult<bool> {
    let h = pager.get(PG_ANY, r.pg0)?;
    if pager.page(&h).get_type()? != PageType::InnerNode
        || pager.page(&h).in_nkeys() != 1
    {
        pager.release_ro(h, PG_ANY)?;
        return Ok(false);
    }

    let child = pager.page(&h).in_leaf(0);
    pager.delete_and_release(tx, h)?;
    r.pg0 = child;
    Ok(true)
}

/// Walk the path to `posn` top-down; fix the first node found under
/// half occupancy. Returns whether anything changed.
fn fix_path_once(
    r: &mut RpTree,
    posn: BSize,
    pager: &mut Pager,
    tx: &mut Transaction,
) -> DbResult<bool> {
    r.seek(posn, pager)?;
    let stack = r.stack.clone();

    // Inner levels, shallowest first. Level 0 is the root and exempt.
    for lvl_i in 1..stack.len() {
        let node = stack[lvl_i].pg;
        let nkeys = {
            let h = pager.get(PG_ANY, node)?;
            let n = pager.page(&h).in_nkeys();
            pager.release_ro(h, PG_ANY)?;
            n
        };
        if nkeys < IN_MAX_KEYS / 2 {
            balance_inner(stack[lvl_i - 1], node, pager, tx)?;
            return Ok(true);
        }
    }

    // The leaf itself, unless it is the tree root.
    if !stack.is_empty() {
        let used = {
            let h = pager.get(PG_ANY, r.pg)?;
            let u = pager.page(&h).dl_used() as usize;
            pager.release_ro(h, PG_ANY)?;
            u
        };
        if used < DL_CAPACITY / 2 {
            balance_leaf(stack[stack.len() - 1], r.pg, pager, tx)?;
            return Ok(true);
        }
    }

    Ok(false)
}

/// Borrow bytes from, or merge with, a same-parent sibling leaf.
fn balance_leaf(
    parent: crate::rptree::SeekV,
    leaf: Pgno,
    pager: &mut Pager,
    tx: &mut Transaction,
) -> DbResult {
    let mut ph = pager.get_writable(PG_ANY, parent.pg)?;
    let mut children = pager.page(&ph).in_children();

    let idx = children
        .iter()
        .position(|(pg, _)| *pg == leaf)
        .ok_or_else(|| DbError::corrupt("leaf vanished from its parent"))?;
    debug_assert!(children.len() >= 2);

    let sib_is_left = idx > 0;
    let sib_idx = if sib_is_left { idx - 1 } else { idx + 1 };
    let sib = children[sib_idx].0;

    let mut lh = pager.get_writable(PG_ANY, leaf)?;
    let mut sh = pager.get_writable(PG_ANY, sib)?;

    let l_used = pager.page(&lh).dl_used() as usize;
    let s_used = pager.page(&sh).dl_used() as usize;

    if l_used + s_used >= DL_CAPACITY {
        // Borrow enough to reach half.
        let deficit = DL_CAPACITY / 2 - l_used;
        {
            let (sp, lp) = pager.pages_mut2(&sh, &lh);
            if sib_is_left {
                dl_move_right(sp, lp, deficit);
            } else {
                dl_move_left(lp, sp, deficit);
            }
        }
        children[idx].1 = pager.page(&lh).dl_used() as BSize;
        children[sib_idx].1 = pager.page(&sh).dl_used() as BSize;
        pager.page_mut(&ph).in_set_children(&children);

        pager.save(tx, &mut lh, PG_ANY)?;
        pager.release_ro(lh, PG_ANY)?;
        pager.save(tx, &mut sh, PG_ANY)?;
        pager.release_ro(sh, PG_ANY)?;
    } else {
        // Merge the leaf into its sibling and drop the leaf.
        {
            let (sp, lp) = pager.pages_mut2(&sh, &lh);
            if sib_is_left {
                dl_move_left(sp, lp, l_used);
            } else {
                dl_move_right(lp, sp, l_used);
            }
        }
        children[sib_idx].1 = pager.page(&sh).dl_used() as BSize;
        children.remove(idx);
        pager.page_mut(&ph).in_set_children(&children);

        pager.save(tx, &mut sh, PG_ANY)?;
        pager.release_ro(sh, PG_ANY)?;

        unlink_data_list(&mut lh, pager, tx)?;
        pager.delete_and_release(tx, lh)?;
    }

    pager.save(tx, &mut ph, PG_ANY)?;
    pager.release_ro(ph, PG_ANY)?;
    Ok(())
}

/// Borrow children from, or merge with, a same-parent sibling inner
/// node.
fn balance_inner(
    parent: crate::rptree::SeekV,
    node: Pgno,
    pager: &mut Pager,
    tx: &mut Transaction,
) -> DbResult {
    let mut ph = pager.get_writable(PG_ANY, parent.pg)?;
    let mut pchildren = pager.page(&ph).in_children();

    let idx = pchildren
        .iter()
        .position(|(pg, _)| *pg == node)
        .ok_or_else(|| DbError::corrupt("inner node vanished from its parent"))?;
    debug_assert!(pchildren.len() >= 2);

    let sib_is_left = idx > 0;
    let sib_idx = if sib_is_left { idx - 1 } else { idx + 1 };
    let sib = pchildren[sib_idx].0;

    let mut nh = pager.get_writable(PG_ANY, node)?;
    let mut sh = pager.get_writable(PG_ANY, sib)?;

    let mut n_children = pager.page(&nh).in_children();
    let mut s_children = pager.page(&sh).in_children();

    if n_children.len() + s_children.len() >= IN_MAX_KEYS {
        // Borrow entries from the adjacent end of the sibling.
        let deficit = IN_MAX_KEYS / 2 - n_children.len();
        if sib_is_left {
            let at = s_children.len() - deficit;
            let moved: Vec<(Pgno, BSize)> = s_children.split_off(at);
            let mut merged = moved;
            merged.extend(n_children);
            n_children = merged;
        } else {
            let moved: Vec<(Pgno, BSize)> =
                s_children.drain(..deficit).collect();
            n_children.extend(moved);
        }

        pager.page_mut(&nh).in_set_children(&n_children);
        pager.page_mut(&sh).in_set_children(&s_children);

        pchildren[idx].1 = n_children.iter().map(|(_, l)| l).sum();
        pchildren[sib_idx].1 = s_children.iter().map(|(_, l)| l).sum();
        pager.page_mut(&ph).in_set_children(&pchildren);

        pager.save(tx, &mut nh, PG_ANY)?;
        pager.release_ro(nh, PG_ANY)?;
        pager.save(tx, &mut sh, PG_ANY)?;
        pager.release_ro(sh, PG_ANY)?;
    } else {
        // Merge into the left-hand node of the pair; the right one dies.
        let (mut keep, mut die, keep_idx, die_idx) = if sib_is_left {
            (sh, nh, sib_idx, idx)
        } else {
            (nh, sh, idx, sib_idx)
        };

        let mut merged = pager.page(&keep).in_children();
        merged.extend(pager.page(&die).in_children());
        pager.page_mut(&keep).in_set_children(&merged);

        pchildren[keep_idx].1 = merged.iter().map(|(_, l)| l).sum();
        let die_pg = pchildren[die_idx].0;
        pchildren.remove(die_idx);
        pager.page_mut(&ph).in_set_children(&pchildren);

        pager.save(tx, &mut keep, PG_ANY)?;
        pager.release_ro(keep, PG_ANY)?;

        pager.cancel_w(&mut die);
        pager.release_ro(die, PG_ANY)?;
        unlink_inner(die_pg, pager, tx)?;
        let dh = pager.get(PG_ANY, die_pg)?;
        pager.delete_and_release(tx, dh)?;
    }

    pager.save(tx, &mut ph, PG_ANY)?;
    pager.release_ro(ph, PG_ANY)?;
    Ok(())
}
