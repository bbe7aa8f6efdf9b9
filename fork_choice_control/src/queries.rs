use std::sync::Arc;

use clock::Tick;
use fork_choice_store::Store;
use serde::Serialize;
use types::{
    phase0::{
        containers::Checkpoint,
        primitives::{Gwei, Slot, ValidatorIndex, H256},
    },
    preset::Preset,
};

use crate::{controller::Controller, wait::Wait};

// Every method here loads the snapshot separately.
// Use `Controller::snapshot` to read several values that are consistent with each other.
impl<P: Preset, W: Wait> Controller<P, W> {
    #[must_use]
    pub fn head(&self) -> H256 {
        self.store_snapshot().head()
    }

    #[must_use]
    pub fn head_slot(&self) -> Option<Slot> {
        let store = self.store_snapshot();
        store.node(store.head()).map(|node| node.slot)
    }

    #[must_use]
    pub fn tick(&self) -> Tick {
        self.store_snapshot().tick()
    }

    #[must_use]
    pub fn slot(&self) -> Slot {
        self.store_snapshot().slot()
    }

    #[must_use]
    pub fn justified_checkpoint(&self) -> Checkpoint {
        self.store_snapshot().justified_checkpoint()
    }

    #[must_use]
    pub fn best_justified_checkpoint(&self) -> Checkpoint {
        self.store_snapshot().best_justified_checkpoint()
    }

    #[must_use]
    pub fn finalized_checkpoint(&self) -> Checkpoint {
        self.store_snapshot().finalized_checkpoint()
    }

    /// Returns the root of the block with proposer boost or [`H256::zero`] if there is none.
    #[must_use]
    pub fn proposer_boost_root(&self) -> H256 {
        self.store_snapshot().proposer_boost_root()
    }

    #[must_use]
    pub fn contains_block(&self, block_root: H256) -> bool {
        self.store_snapshot().contains_block(block_root)
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.store_snapshot().block_count()
    }

    /// Returns the weight of the block's subtree as of the last head computation.
    #[must_use]
    pub fn weight(&self, block_root: H256) -> Option<Gwei> {
        self.store_snapshot().weight(block_root)
    }

    #[must_use]
    pub fn is_equivocating(&self, validator_index: ValidatorIndex) -> bool {
        self.store_snapshot().is_equivocating(validator_index)
    }

    /// Returns every block without children, including ones that cannot become the head.
    #[must_use]
    pub fn fork_tips(&self) -> Vec<ForkTip> {
        let store = self.store_snapshot();
        let head = store.head();

        store
            .proto_array()
            .leaves()
            .map(|node| ForkTip {
                root: node.root,
                slot: node.slot,
                weight: node.weight,
                is_head: node.root == head,
            })
            .collect()
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<Store<P>> {
        self.owned_store_snapshot()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct ForkTip {
    pub root: H256,
    pub slot: Slot,
    pub weight: Gwei,
    pub is_head: bool,
}
