use std::sync::Arc;

use helper_functions::misc;
use types::{
    phase0::{
        containers::{AttestationData, Checkpoint},
        primitives::{Epoch, Slot, ValidatorIndex, H256},
    },
    preset::Preset,
};

pub type Difference = i64;

/// The trusted block a [`Store`] is initialized from.
///
/// [`Store`]: crate::Store
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AnchorBlock {
    pub root: H256,
    pub slot: Slot,
}

/// A block that passed the state transition, reduced to the fields fork choice needs.
///
/// The unrealized checkpoints are the ones the post-state would have if justification and
/// finalization were processed at the block itself rather than at the next epoch boundary.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ChainLink {
    pub block_root: H256,
    pub parent_root: H256,
    pub slot: Slot,
    pub justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    pub unrealized_justified_checkpoint: Checkpoint,
    pub unrealized_finalized_checkpoint: Checkpoint,
}

impl ChainLink {
    #[must_use]
    pub fn epoch<P: Preset>(&self) -> Epoch {
        misc::compute_epoch_at_slot::<P>(self.slot)
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ValidAttestation {
    pub data: AttestationData,
    pub attesting_indices: Arc<[ValidatorIndex]>,
    pub is_from_block: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct ApplyBlockChanges {
    pub justified_checkpoint_updated: bool,
    pub finalized_checkpoint_updated: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ApplyTickChanges {
    TickUpdated,
    SlotUpdated {
        justified_checkpoint_updated: bool,
        finalized_checkpoint_updated: bool,
    },
}

impl ApplyTickChanges {
    #[must_use]
    pub const fn is_slot_updated(self) -> bool {
        matches!(self, Self::SlotUpdated { .. })
    }

    #[must_use]
    pub const fn is_justified_checkpoint_updated(self) -> bool {
        match self {
            Self::TickUpdated => false,
            Self::SlotUpdated {
                justified_checkpoint_updated,
                ..
            } => justified_checkpoint_updated,
        }
    }

    #[must_use]
    pub const fn is_finalized_checkpoint_updated(self) -> bool {
        match self {
            Self::TickUpdated => false,
            Self::SlotUpdated {
                finalized_checkpoint_updated,
                ..
            } => finalized_checkpoint_updated,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AttestationAction {
    Accept,
    Ignore,
}
