//! Resumable randomized traversal of an R-tree.
//!
//! A `Cursor` walks the subtrees that intersect a query region depth first,
//! visiting the entries of every node in a shuffled order. It keeps its
//! position as an explicit stack of frames, so a traversal can be paused
//! after any number of records and resumed by a later call.
//!
//! Every matching record is returned exactly once over the life of a cursor,
//! provided the tree is not modified. A modification is detected through
//! the tree's generation counter.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::rtree::node::Node;
use crate::rtree::tree::{RTree, TreeError};
use crate::storage::PageId;
use crate::types::{BoundingBox, Record};

/// One node on the traversal stack.
#[derive(Debug)]
struct Frame {
    page: PageId,
    /// Entry visit order, shuffled on first visit.
    order: Option<Vec<u16>>,
    /// Position in `order` of the next entry to visit.
    next: usize,
}

impl Frame {
    const fn new(page: PageId) -> Self {
        Self {
            page,
            order: None,
            next: 0,
        }
    }
}

/// What to do with the stack after examining the top frame.
enum Step {
    Descend(PageId),
    Pop,
    /// The batch is full and the top leaf still has a matching record.
    Full,
}

/// Paused position of a randomized region traversal.
#[derive(Debug)]
pub struct Cursor {
    region: BoundingBox,
    stack: Vec<Frame>,
    generation: u64,
    rng: StdRng,
    returned: u64,
}

impl Cursor {
    /// Start a traversal of `tree` restricted to `region`.
    ///
    /// The same `seed` over the same tree yields the same record order.
    #[must_use]
    pub fn open(tree: &RTree, region: BoundingBox, seed: u64) -> Self {
        let stack = if tree.root() == 0 {
            Vec::new()
        } else {
            vec![Frame::new(tree.root())]
        };
        Self {
            region,
            stack,
            generation: tree.generation(),
            rng: StdRng::seed_from_u64(seed),
            returned: 0,
        }
    }

    #[must_use]
    pub const fn region(&self) -> &BoundingBox {
        &self.region
    }

    /// True once every matching record has been returned.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.stack.is_empty()
    }

    /// Records returned so far.
    #[must_use]
    pub const fn returned(&self) -> u64 {
        self.returned
    }

    /// Return up to `max` more matching records.
    ///
    /// Returns fewer than `max` only when the traversal is exhausted, and
    /// `is_exhausted` is true afterwards as soon as no matching record is
    /// left, even if the last batch came back full. A `max` of 0 returns
    /// nothing and leaves the position unchanged.
    ///
    /// # Errors
    ///
    /// `TreeError::StaleCursor` if `tree` was modified since `open`; the
    /// cursor must be discarded.
    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&mut self, tree: &RTree, max: usize) -> Result<Vec<Record>, TreeError> {
        let mut out = Vec::new();
        if max == 0 || self.is_exhausted() {
            return Ok(out);
        }
        if tree.generation() != self.generation {
            return Err(TreeError::StaleCursor);
        }

        // Runs until a matching record is found that does not fit, so the
        // stack is empty exactly when nothing is left to return.
        while let Some(frame) = self.stack.last_mut() {
            let handle = tree.node(frame.page)?;
            let order = frame.order.get_or_insert_with(|| {
                let mut order: Vec<u16> = (0..handle.len() as u16).collect();
                order.shuffle(&mut self.rng);
                order
            });

            let step = match &*handle {
                Node::Leaf(leaf) => {
                    let mut step = Step::Pop;
                    while frame.next < order.len() {
                        let record = leaf.entries[usize::from(order[frame.next])];
                        if self.region.contains_point(&record.location) {
                            if out.len() == max {
                                step = Step::Full;
                                break;
                            }
                            out.push(record);
                        }
                        frame.next += 1;
                    }
                    step
                }
                Node::Internal(node) => {
                    let mut step = Step::Pop;
                    while frame.next < order.len() {
                        let entry = &node.children[usize::from(order[frame.next])];
                        frame.next += 1;
                        if self.region.intersects(&entry.region) {
                            step = Step::Descend(entry.child);
                            break;
                        }
                    }
                    step
                }
            };
            drop(handle);

            match step {
                Step::Descend(child) => self.stack.push(Frame::new(child)),
                Step::Pop => {
                    self.stack.pop();
                }
                Step::Full => break,
            }
        }

        self.returned += out.len() as u64;
        Ok(out)
    }
}
