use crate::types::{BSize, Pgno};

/// The in-memory carrier for one level of an insert split: the
/// pre-existing child the insert started in (with its post-insert byte
/// length) plus the freshly allocated right siblings, in order, each
/// with its byte length. A level with no new children needs no
/// structural change above it.
pub struct MemInnerNode {
    pub first: Pgno,
    pub first_len: BSize,
    pub new_children: Vec<(Pgno, BSize)>,
}

impl MemInnerNode {
    pub fn new(first: Pgno) -> Self {
        Self {
            first,
            first_len: 0,
            new_children: Vec::new(),
        }
    }

    pub fn push(&mut self, pg: Pgno, len: BSize) {
        self.new_children.push((pg, len));
    }

    pub fn is_empty(&self) -> bool {
        self.new_children.is_empty()
    }
}
