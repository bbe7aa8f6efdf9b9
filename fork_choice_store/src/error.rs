use clock::Tick;
use static_assertions::assert_impl_all;
use thiserror::Error;
use types::phase0::{
    containers::Checkpoint,
    primitives::{Epoch, Slot, ValidatorIndex, H256},
};

#[derive(Clone, Copy, Debug, Error)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum Error {
    #[error("anchor block root {block_root:?} does not match anchor checkpoint {checkpoint}")]
    AnchorRootMismatch {
        checkpoint: Checkpoint,
        block_root: H256,
    },
    #[error("anchor block at slot {slot} is later than the start of anchor checkpoint {checkpoint}")]
    AnchorBlockAfterCheckpoint { checkpoint: Checkpoint, slot: Slot },
    #[error(
        "attestation at slot {attestation_slot} votes for a block from the future \
         (block_root: {block_root:?}, block_slot: {block_slot})"
    )]
    AttestationForFutureBlock {
        attestation_slot: Slot,
        block_root: H256,
        block_slot: Slot,
    },
    #[error("attestation votes for an unknown block: {block_root:?}")]
    AttestationForUnknownBlock { block_root: H256 },
    #[error(
        "attestation is not from a past slot \
         (attestation_slot: {attestation_slot}, current_slot: {current_slot})"
    )]
    AttestationFromCurrentSlot {
        attestation_slot: Slot,
        current_slot: Slot,
    },
    #[error("attestation at slot {slot} targets the wrong epoch: {target_epoch}")]
    AttestationTargetsWrongEpoch { slot: Slot, target_epoch: Epoch },
    #[error(
        "block is from the future \
         (block_root: {block_root:?}, block_slot: {block_slot}, current_slot: {current_slot})"
    )]
    BlockFromFuture {
        block_root: H256,
        block_slot: Slot,
        current_slot: Slot,
    },
    #[error(
        "block does not descend from the finalized block \
         (block_root: {block_root:?}, finalized_checkpoint: {finalized_checkpoint})"
    )]
    BlockNotDescendantOfFinalized {
        block_root: H256,
        finalized_checkpoint: Checkpoint,
    },
    #[error("weight delta overflowed while propagating to {root:?}")]
    DeltaOverflow { root: H256 },
    #[error("block is already present: {block_root:?}")]
    DuplicateBlock { block_root: H256 },
    #[error(
        "block carries a finalized checkpoint later than its justified checkpoint \
         (block_root: {block_root:?})"
    )]
    InconsistentCheckpoints { block_root: H256 },
    #[error("expected {expected} weight deltas, got {actual}")]
    InvalidDeltaCount { expected: usize, actual: usize },
    #[error("node index out of bounds: {index}")]
    InvalidNodeIndex { index: usize },
    #[error(
        "block slot is not later than parent slot \
         (block_root: {block_root:?}, block_slot: {block_slot}, parent_slot: {parent_slot})"
    )]
    InvalidSlotOrdering {
        block_root: H256,
        block_slot: Slot,
        parent_slot: Slot,
    },
    #[error(
        "cannot prune to a block that does not descend from the finalized block \
         (root: {root:?}, finalized_checkpoint: {finalized_checkpoint})"
    )]
    PruneBelowFinalized {
        root: H256,
        finalized_checkpoint: Checkpoint,
    },
    #[error(
        "cannot prune to a block that is not an ancestor of the justified block \
         (root: {root:?}, justified_checkpoint: {justified_checkpoint})"
    )]
    PruneBeyondJustified {
        root: H256,
        justified_checkpoint: Checkpoint,
    },
    #[error("cannot prune to an unknown block: {root:?}")]
    PruneUnknownRoot { root: H256 },
    #[error("time cannot go backwards (old_tick: {old_tick:?}, new_tick: {new_tick:?})")]
    TimeRegression { old_tick: Tick, new_tick: Tick },
    #[error("unknown block root: {root:?}")]
    UnknownBlockRoot { root: H256 },
    #[error("parent block is unknown (block_root: {block_root:?}, parent_root: {parent_root:?})")]
    UnknownParent { block_root: H256, parent_root: H256 },
    #[error("validator index {validator_index} is not below limit {limit}")]
    ValidatorIndexOutOfBounds {
        validator_index: ValidatorIndex,
        limit: usize,
    },
    #[error("weight of {root:?} overflowed")]
    WeightOverflow { root: H256 },
    #[error("weight of {root:?} went below zero")]
    WeightUnderflow { root: H256 },
}

impl Error {
    /// Whether the rejected object may become acceptable later without any changes to it.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownParent { .. }
                | Self::BlockFromFuture { .. }
                | Self::AttestationForUnknownBlock { .. }
                | Self::AttestationFromCurrentSlot { .. },
        )
    }

    /// Whether the error indicates a bug in the caller or corrupted internal state
    /// rather than an invalid object.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::AnchorRootMismatch { .. }
                | Self::AnchorBlockAfterCheckpoint { .. }
                | Self::DeltaOverflow { .. }
                | Self::InvalidDeltaCount { .. }
                | Self::InvalidNodeIndex { .. }
                | Self::PruneBelowFinalized { .. }
                | Self::PruneBeyondJustified { .. }
                | Self::PruneUnknownRoot { .. }
                | Self::TimeRegression { .. }
                | Self::UnknownBlockRoot { .. }
                | Self::WeightOverflow { .. }
                | Self::WeightUnderflow { .. },
        )
    }
}

// `anyhow::Error` requires this.
assert_impl_all!(Error: Send, Sync);
