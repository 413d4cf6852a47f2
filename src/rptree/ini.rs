use crate::{
    config::IN_MAX_KEYS,
    pager::Pager,
    paging::{PageType, PG_ANY},
    rptree::MemInnerNode,
    transaction::Transaction,
    types::{BSize, DbResult, Pgno, PGNO_NULL},
};

/// Upper-layer insert (inner node insert). Splices the lower level's
/// new children into `node_pg` right after child `idx0`, whose subtree
/// length is replaced with the post-split value. Overflow is
/// redistributed across freshly allocated sibling nodes; whatever this
/// level allocates comes back in a builder for the level above.
///
/// Precondition: the routing keys at index >= `idx0` already include
/// the inserted byte count (the caller ran the add-right pass).
pub(crate) fn insert_children(
    node_pg: Pgno,
    idx0: usize,
    input: MemInnerNode,
    pager: &mut Pager,
    tx: &mut Transaction,
) -> DbResult<MemInnerNode> {
    let mut h = pager.get_writable(PG_ANY, node_pg)?;

    let mut children = pager.page(&h).in_children();
    debug_assert!(idx0 < children.len());
    debug_assert!(children[idx0].0 == input.first);

    // The split child keeps its own new length; its spilled bytes live
    // in the new children spliced in right behind it.
    children[idx0].1 = input.first_len;
    let tail: Vec<(Pgno, BSize)> = children.split_off(idx0 + 1);
    children.extend(input.new_children.iter().copied());
    children.extend(tail);

    if children.len() <= IN_MAX_KEYS {
        pager.page_mut(&h).in_set_children(&children);
        pager.save(tx, &mut h, PG_ANY)?;
        pager.release_ro(h, PG_ANY)?;
        return Ok(MemInnerNode::new(node_pg));
    }

    // Overflow: spread the children evenly over this node plus however
    // many new siblings are needed. Even distribution keeps every node
    // at least half full.
    let total = children.len();
    let nnodes = (total + IN_MAX_KEYS - 1) / IN_MAX_KEYS;
    let base = total / nnodes;
    let rem = total % nnodes;

    let mut groups: Vec<&[(Pgno, BSize)]> = Vec::with_capacity(nnodes);
    let mut at = 0;
    for i in 0..nnodes {
        let count = base + if i < rem { 1 } else { 0 };
        groups.push(&children[at..at + count]);
        at += count;
    }
    debug_assert!(at == total);

    let old_next = pager.page(&h).in_next();

    let mut out = MemInnerNode::new(node_pg);
    out.first_len = groups[0].iter().map(|(_, l)| l).sum();

    // Write the keeper group into the original node.
    pager.page_mut(&h).in_set_children(groups[0]);

    // Allocate and chain the sibling nodes.
    let mut prev_pg = node_pg;
    let mut prev = h;
    for group in &groups[1..] {
        let sib = pager.new_page(tx, PageType::InnerNode)?;
        let sib_pg = sib.pgno();

        pager.page_mut(&sib).in_set_children(group);
        pager.page_mut(&sib).in_set_prev(prev_pg);
        pager.page_mut(&prev).in_set_next(sib_pg);

        out.push(sib_pg, group.iter().map(|(_, l)| l).sum());

        pager.save(tx, &mut prev, PG_ANY)?;
        pager.release_ro(prev, PG_ANY)?;

        prev = sib;
        prev_pg = sib_pg;
    }

    pager.page_mut(&prev).in_set_next(old_next);
    pager.save(tx, &mut prev, PG_ANY)?;
    pager.release_ro(prev, PG_ANY)?;

    if old_next != PGNO_NULL {
        let mut succ = pager.get_writable(PG_ANY, old_next)?;
        pager.page_mut(&succ).in_set_prev(prev_pg);
        pager.save(tx, &mut succ, PG_ANY)?;
        pager.release_ro(succ, PG_ANY)?;
    }

    Ok(out)
}
