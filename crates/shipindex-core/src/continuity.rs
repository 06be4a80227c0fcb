//! Block continuity and fork detection.
//!
//! The node delivers blocks in order. Three cases exist for an incoming block
//! number `B` against the committed `head`:
//!
//! * **advance**: nothing committed yet, or `B == head + 1`
//! * **gap**: `B > head + 1`, a skipped block, which is fatal
//! * **fork**: `B <= head`, the node switched branches and everything at or
//!   above `B` must be replaced
//!
//! [`ChainContinuity::plan`] classifies a block without mutating anything;
//! [`ChainContinuity::commit`] applies the plan once the store has committed.

use crate::error::IndexerError;
use crate::types::ChainStatus;

/// What to do with one incoming block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPlan {
    pub block_num: u32,
    /// Status to persist with this block.
    pub status: ChainStatus,
    /// `Some(B)` when rows at or above `B` must be rolled back first.
    pub fork_from: Option<u32>,
    /// Block rows below this number are pruned.
    pub prune_below: u32,
}

impl BlockPlan {
    pub fn is_fork(&self) -> bool {
        self.fork_from.is_some()
    }
}

/// In-memory head/irreversible state for one session.
#[derive(Debug, Clone)]
pub struct ChainContinuity {
    status: ChainStatus,
    retain_blocks: u32,
}

impl ChainContinuity {
    /// `retain_blocks` is how many blocks below irreversible stay stored.
    pub fn new(status: ChainStatus, retain_blocks: u32) -> Self {
        Self {
            status,
            retain_blocks,
        }
    }

    pub fn status(&self) -> ChainStatus {
        self.status
    }

    pub fn head(&self) -> u32 {
        self.status.head
    }

    pub fn irreversible(&self) -> u32 {
        self.status.irreversible
    }

    /// First block to request from the node.
    pub fn start_block(&self) -> u32 {
        self.status.head.saturating_add(1)
    }

    /// Inclusive range of reversible blocks whose ids are reported on resume.
    /// `None` when nothing reversible is stored.
    pub fn resume_range(&self) -> Option<(u32, u32)> {
        let from = self.status.irreversible.saturating_add(1);
        (self.status.head != 0 && from <= self.status.head).then_some((from, self.status.head))
    }

    /// Classify block `block_num` given the node's `last_irreversible`.
    pub fn plan(&self, block_num: u32, last_irreversible: u32) -> Result<BlockPlan, IndexerError> {
        let head = self.status.head;
        if head != 0 && block_num > head.saturating_add(1) {
            return Err(IndexerError::SkippedBlock {
                head,
                received: block_num,
            });
        }
        let fork_from = (head != 0 && block_num <= head).then_some(block_num);
        let irreversible = last_irreversible.min(block_num);
        Ok(BlockPlan {
            block_num,
            status: ChainStatus {
                head: block_num,
                irreversible,
            },
            fork_from,
            prune_below: irreversible.saturating_sub(self.retain_blocks),
        })
    }

    /// Adopt a plan after its unit of work committed.
    pub fn commit(&mut self, plan: &BlockPlan) {
        self.status = plan.status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(head: u32, irreversible: u32) -> ChainContinuity {
        ChainContinuity::new(ChainStatus { head, irreversible }, 200)
    }

    #[test]
    fn first_block_is_an_advance() {
        let c = at(0, 0);
        let plan = c.plan(5000, 4990).unwrap();
        assert!(!plan.is_fork());
        assert_eq!(plan.status, ChainStatus { head: 5000, irreversible: 4990 });
        assert_eq!(plan.prune_below, 4790);
        assert_eq!(c.start_block(), 1);
        assert_eq!(c.resume_range(), None);
    }

    #[test]
    fn linear_advance_tracks_head() {
        let mut c = at(0, 0);
        for b in 100..110 {
            let plan = c.plan(b, b - 3).unwrap();
            assert!(!plan.is_fork());
            c.commit(&plan);
            assert_eq!(c.head(), b);
        }
        assert_eq!(c.resume_range(), Some((107, 109)));
    }

    #[test]
    fn gap_is_rejected() {
        let c = at(100, 90);
        assert!(matches!(
            c.plan(102, 95),
            Err(IndexerError::SkippedBlock { head: 100, received: 102 })
        ));
    }

    #[test]
    fn redelivery_below_head_is_a_fork() {
        let c = at(105, 95);
        let plan = c.plan(103, 96).unwrap();
        assert_eq!(plan.fork_from, Some(103));
        assert_eq!(plan.status.head, 103);
        let same = c.plan(105, 96).unwrap();
        assert_eq!(same.fork_from, Some(105));
    }

    #[test]
    fn irreversible_never_exceeds_head() {
        let c = at(0, 0);
        let plan = c.plan(10, 5000).unwrap();
        assert_eq!(plan.status.irreversible, 10);
        assert_eq!(plan.prune_below, 0);
    }

    #[test]
    fn plan_does_not_mutate() {
        let c = at(100, 90);
        let _ = c.plan(101, 91).unwrap();
        assert_eq!(c.head(), 100);
    }
}
