use core::marker::PhantomData;
use std::sync::Arc;

use anyhow::{ensure, Result};
use clock::Tick;
use helper_functions::misc;
use log::{debug, info};
use typenum::Unsigned as _;
use types::{
    config::Config as ChainConfig,
    phase0::{
        containers::{AttestationData, Checkpoint},
        primitives::{Epoch, Gwei, Slot, ValidatorIndex, H256},
    },
    preset::Preset,
};

use crate::{
    error::Error,
    misc::{
        AnchorBlock, ApplyBlockChanges, ApplyTickChanges, AttestationAction, ChainLink,
        Difference, ValidAttestation,
    },
    proto_array::{ProtoArray, ProtoNode, Viability},
    store_config::{ProposerBoost, StoreConfig},
    votes::Votes,
};

/// [`Store`] from the Fork Choice specification backed by a [`ProtoArray`].
///
/// Every mutating method either succeeds or leaves the store unchanged.
///
/// [`Store`]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#store
#[derive(Clone, Debug)]
pub struct Store<P: Preset> {
    chain_config: Arc<ChainConfig>,
    store_config: StoreConfig,
    // The fork choice rule does not need a precise timestamp.
    tick: Tick,
    justified_checkpoint: Checkpoint,
    finalized_checkpoint: Checkpoint,
    // These are the unrealized checkpoints. They get pulled up at every epoch boundary.
    best_justified_checkpoint: Checkpoint,
    best_finalized_checkpoint: Checkpoint,
    // Zero when unset. The boosted block may be pruned while the root is still set.
    proposer_boost_root: H256,
    proto_array: ProtoArray,
    votes: Votes,
    // Balances the next head computation will use.
    justified_balances: Arc<[Gwei]>,
    // Balances the weights currently in `Store.proto_array` were computed with.
    applied_balances: Arc<[Gwei]>,
    head: H256,
    phantom: PhantomData<P>,
}

impl<P: Preset> Store<P> {
    /// [`get_forkchoice_store`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#get_forkchoice_store)
    pub fn new(
        chain_config: Arc<ChainConfig>,
        store_config: StoreConfig,
        anchor_checkpoint: Checkpoint,
        anchor_block: AnchorBlock,
        justified_balances: Arc<[Gwei]>,
    ) -> Result<Self> {
        let AnchorBlock { root, slot } = anchor_block;

        ensure!(
            anchor_checkpoint.root == root,
            Error::AnchorRootMismatch {
                checkpoint: anchor_checkpoint,
                block_root: root,
            },
        );

        ensure!(
            slot <= misc::compute_start_slot_at_epoch::<P>(anchor_checkpoint.epoch),
            Error::AnchorBlockAfterCheckpoint {
                checkpoint: anchor_checkpoint,
                slot,
            },
        );

        Ok(Self {
            chain_config,
            store_config,
            tick: Tick::start_of_slot(slot),
            justified_checkpoint: anchor_checkpoint,
            finalized_checkpoint: anchor_checkpoint,
            best_justified_checkpoint: anchor_checkpoint,
            best_finalized_checkpoint: anchor_checkpoint,
            proposer_boost_root: H256::zero(),
            proto_array: ProtoArray::new(root, slot, anchor_checkpoint),
            votes: Votes::new(store_config.validator_limit),
            applied_balances: Arc::from([]),
            justified_balances,
            head: root,
            phantom: PhantomData,
        })
    }

    #[must_use]
    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain_config
    }

    #[must_use]
    pub const fn store_config(&self) -> StoreConfig {
        self.store_config
    }

    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub const fn slot(&self) -> Slot {
        self.tick.slot
    }

    #[must_use]
    pub fn current_epoch(&self) -> Epoch {
        self.tick.epoch::<P>()
    }

    #[must_use]
    pub fn previous_epoch(&self) -> Epoch {
        misc::previous_epoch::<P>(self.slot())
    }

    #[must_use]
    pub const fn justified_checkpoint(&self) -> Checkpoint {
        self.justified_checkpoint
    }

    #[must_use]
    pub const fn best_justified_checkpoint(&self) -> Checkpoint {
        self.best_justified_checkpoint
    }

    #[must_use]
    pub const fn finalized_checkpoint(&self) -> Checkpoint {
        self.finalized_checkpoint
    }

    #[must_use]
    pub const fn best_finalized_checkpoint(&self) -> Checkpoint {
        self.best_finalized_checkpoint
    }

    #[must_use]
    pub const fn finalized_slot(&self) -> Slot {
        misc::compute_start_slot_at_epoch::<P>(self.finalized_checkpoint.epoch)
    }

    #[must_use]
    pub const fn proposer_boost_root(&self) -> H256 {
        self.proposer_boost_root
    }

    /// The head computed by the last successful call to [`Self::get_head`].
    #[must_use]
    pub const fn head(&self) -> H256 {
        self.head
    }

    #[must_use]
    pub const fn proto_array(&self) -> &ProtoArray {
        &self.proto_array
    }

    #[must_use]
    pub const fn votes(&self) -> &Votes {
        &self.votes
    }

    #[must_use]
    pub fn justified_balances(&self) -> &Arc<[Gwei]> {
        &self.justified_balances
    }

    #[must_use]
    pub fn contains_block(&self, block_root: H256) -> bool {
        self.proto_array.contains(block_root)
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.proto_array.len()
    }

    #[must_use]
    pub fn node(&self, block_root: H256) -> Option<&ProtoNode> {
        self.proto_array.node(block_root)
    }

    #[must_use]
    pub fn is_descendant(&self, ancestor_root: H256, descendant_root: H256) -> bool {
        self.proto_array.is_descendant(ancestor_root, descendant_root)
    }

    #[must_use]
    pub fn common_ancestor(&self, root_a: H256, root_b: H256) -> Option<&ProtoNode> {
        self.proto_array.common_ancestor(root_a, root_b)
    }

    #[must_use]
    pub fn is_equivocating(&self, validator_index: ValidatorIndex) -> bool {
        self.votes.is_equivocating(validator_index)
    }

    /// Advances time. Regressions are rejected, repeated ticks are no-ops.
    ///
    /// Roughly corresponds to [`on_tick`] from the Fork Choice specification.
    ///
    /// [`on_tick`]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_tick
    pub fn apply_tick(&mut self, new_tick: Tick) -> Result<Option<ApplyTickChanges>> {
        let old_tick = self.tick;

        ensure!(
            old_tick <= new_tick,
            Error::TimeRegression { old_tick, new_tick },
        );

        if new_tick == old_tick {
            return Ok(None);
        }

        // > update store time
        self.tick = new_tick;

        if new_tick.slot == old_tick.slot {
            return Ok(Some(ApplyTickChanges::TickUpdated));
        }

        // > Reset store.proposer_boost_root if this is a new slot
        self.proposer_boost_root = H256::zero();

        let mut justified_checkpoint_updated = false;
        let mut finalized_checkpoint_updated = false;

        // > If a new epoch, pull-up justification and finalization from previous epoch
        if new_tick.epoch::<P>() > old_tick.epoch::<P>() {
            let old_justified_checkpoint = self.justified_checkpoint;
            let old_finalized_checkpoint = self.finalized_checkpoint;

            self.update_checkpoints(
                self.best_justified_checkpoint,
                self.best_finalized_checkpoint,
            );

            justified_checkpoint_updated = old_justified_checkpoint != self.justified_checkpoint;
            finalized_checkpoint_updated = old_finalized_checkpoint != self.finalized_checkpoint;
        }

        Ok(Some(ApplyTickChanges::SlotUpdated {
            justified_checkpoint_updated,
            finalized_checkpoint_updated,
        }))
    }

    /// Roughly corresponds to [`on_block`] from the Fork Choice specification.
    ///
    /// `is_timely` should be `true` if the block arrived before the attesting interval of its slot.
    ///
    /// [`on_block`]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_block
    pub fn apply_block(
        &mut self,
        chain_link: ChainLink,
        is_timely: bool,
    ) -> Result<ApplyBlockChanges> {
        self.validate_block(&chain_link)?;

        let ChainLink {
            block_root,
            slot,
            justified_checkpoint,
            finalized_checkpoint,
            unrealized_justified_checkpoint,
            unrealized_finalized_checkpoint,
            ..
        } = chain_link;

        self.proto_array.insert(chain_link)?;

        // > Add proposer score boost if the block is timely
        //
        // Only the first timely block in a slot is boosted.
        // See <https://github.com/ethereum/consensus-specs/pull/3352>.
        if is_timely && slot == self.slot() && self.proposer_boost_root.is_zero() {
            debug!("boosting timely block {block_root:?} at slot {slot}");
            self.proposer_boost_root = block_root;
        }

        let old_justified_checkpoint = self.justified_checkpoint;
        let old_finalized_checkpoint = self.finalized_checkpoint;

        // > Update checkpoints in store if necessary
        self.update_checkpoints(justified_checkpoint, finalized_checkpoint);

        // > Eagerly compute unrealized justification and finality
        self.update_best_checkpoints(justified_checkpoint, finalized_checkpoint);
        self.update_best_checkpoints(
            unrealized_justified_checkpoint,
            unrealized_finalized_checkpoint,
        );

        // > If the block is from a prior epoch, apply the realized values
        if chain_link.epoch::<P>() < self.current_epoch() {
            self.update_checkpoints(
                unrealized_justified_checkpoint,
                unrealized_finalized_checkpoint,
            );
        }

        Ok(ApplyBlockChanges {
            justified_checkpoint_updated: old_justified_checkpoint != self.justified_checkpoint,
            finalized_checkpoint_updated: old_finalized_checkpoint != self.finalized_checkpoint,
        })
    }

    /// Roughly corresponds to [`on_attestation`] from the Fork Choice specification.
    ///
    /// [`on_attestation`]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_attestation
    pub fn apply_attestation(&mut self, valid_attestation: &ValidAttestation) -> Result<()> {
        self.apply_attestation_batch(core::slice::from_ref(valid_attestation))
    }

    /// Applies all of `valid_attestations` or none of them.
    pub fn apply_attestation_batch(&mut self, valid_attestations: &[ValidAttestation]) -> Result<()> {
        let actions = valid_attestations
            .iter()
            .map(|valid_attestation| self.validate_attestation(valid_attestation))
            .collect::<Result<Vec<_>>>()?;

        let mut votes = self.votes.clone();

        for (valid_attestation, action) in valid_attestations.iter().zip(actions) {
            let ValidAttestation {
                data,
                attesting_indices,
                ..
            } = valid_attestation;

            if action == AttestationAction::Ignore {
                debug!("ignoring attestation for an old epoch: {data:?}");
                continue;
            }

            // > Update latest messages for attesting indices
            for validator_index in attesting_indices.iter().copied() {
                votes.process_attestation(
                    validator_index,
                    data.beacon_block_root,
                    data.target_epoch,
                )?;
            }
        }

        self.votes = votes;

        Ok(())
    }

    /// Excludes the validator from fork choice and removes the weight of its current vote.
    ///
    /// Returns `false` if the validator was already known to be equivocating.
    pub fn apply_equivocation(&mut self, validator_index: ValidatorIndex) -> Result<bool> {
        self.apply_attester_slashing(core::iter::once(validator_index))
            .map(|newly_equivocating| newly_equivocating > 0)
    }

    /// [`on_attester_slashing`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#on_attester_slashing)
    ///
    /// Returns the number of validators that were not already known to be equivocating.
    pub fn apply_attester_slashing(
        &mut self,
        slashable_indices: impl IntoIterator<Item = ValidatorIndex>,
    ) -> Result<usize> {
        let mut votes = self.votes.clone();
        let mut proto_array = self.proto_array.clone();
        let mut deltas = vec![0; proto_array.len()];
        let mut newly_equivocating = 0;

        for validator_index in slashable_indices {
            if votes.process_equivocation(
                validator_index,
                &proto_array,
                &self.applied_balances,
                &mut deltas,
            )? {
                newly_equivocating += 1;
            }
        }

        if newly_equivocating == 0 {
            return Ok(0);
        }

        proto_array.apply_weight_deltas(&deltas, &self.viability())?;

        self.votes = votes;
        self.proto_array = proto_array;

        Ok(newly_equivocating)
    }

    pub fn set_justified_balances(&mut self, justified_balances: Arc<[Gwei]>) {
        self.justified_balances = justified_balances;
    }

    /// Applies staged votes and computes the head, first advancing time if `tick` is newer.
    ///
    /// Roughly corresponds to [`get_head`] from the Fork Choice specification.
    ///
    /// [`get_head`]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#get_head
    pub fn get_head(&mut self, tick: Tick) -> Result<H256> {
        let mut store = self.clone();

        if store.tick < tick {
            store.apply_tick(tick)?;
        }

        let viability = store.viability();

        let deltas = store.votes.compute_deltas(
            &store.proto_array,
            &store.applied_balances,
            &store.justified_balances,
        )?;

        store.proto_array.apply_weight_deltas(&deltas, &viability)?;
        store.applied_balances = Arc::clone(&store.justified_balances);
        store.head = store.boosted_head(&viability)?;

        *self = store;

        Ok(self.head)
    }

    /// Removes all blocks that do not descend from `root`.
    ///
    /// `root` must descend from the finalized block and be an ancestor of the justified block.
    /// Returns the roots of the removed blocks.
    pub fn prune(&mut self, root: H256) -> Result<Vec<H256>> {
        ensure!(
            self.contains_block(root),
            Error::PruneUnknownRoot { root },
        );

        ensure!(
            self.proto_array.is_finalized_checkpoint_or_descendant(
                root,
                self.finalized_checkpoint,
                self.finalized_slot(),
            ),
            Error::PruneBelowFinalized {
                root,
                finalized_checkpoint: self.finalized_checkpoint,
            },
        );

        ensure!(
            self.is_descendant(root, self.justified_checkpoint.root),
            Error::PruneBeyondJustified {
                root,
                justified_checkpoint: self.justified_checkpoint,
            },
        );

        let removed = self.proto_array.prune(root)?;

        info!(
            "pruned {} blocks from fork choice (new root: {root:?})",
            removed.len(),
        );

        Ok(removed)
    }

    /// Prunes up to the finalized block once enough blocks precede it.
    ///
    /// Returns `None` if nothing was pruned.
    pub fn prune_finalized(&mut self) -> Result<Option<Vec<H256>>> {
        let finalized_root = self.finalized_checkpoint.root;

        let Some(finalized_index) = self.proto_array.index_of(finalized_root) else {
            return Ok(None);
        };

        if finalized_index < self.store_config.prune_threshold {
            return Ok(None);
        }

        self.prune(finalized_root).map(Some)
    }

    /// Weight of a block and its descendants as of the last call to [`Self::get_head`],
    /// not counting proposer boost.
    #[must_use]
    pub fn weight(&self, block_root: H256) -> Option<Gwei> {
        self.node(block_root).map(|node| node.weight)
    }

    #[must_use]
    pub fn proposer_boost_score(&self) -> Gwei {
        match self.store_config.proposer_boost {
            ProposerBoost::CommitteeFraction => {
                let total_balance = self
                    .justified_balances
                    .iter()
                    .fold(0, |total: Gwei, balance| total.saturating_add(*balance));

                let committee_weight = total_balance / P::SlotsPerEpoch::U64;

                committee_weight.saturating_mul(self.chain_config.proposer_score_boost) / 100
            }
            ProposerBoost::Fixed(score) => score,
        }
    }

    fn validate_block(&self, chain_link: &ChainLink) -> Result<()> {
        let ChainLink {
            block_root,
            parent_root,
            slot,
            justified_checkpoint,
            finalized_checkpoint,
            unrealized_justified_checkpoint,
            unrealized_finalized_checkpoint,
        } = *chain_link;

        ensure!(
            !self.contains_block(block_root),
            Error::DuplicateBlock { block_root },
        );

        let parent = self.node(parent_root).ok_or(Error::UnknownParent {
            block_root,
            parent_root,
        })?;

        ensure!(
            parent.slot < slot,
            Error::InvalidSlotOrdering {
                block_root,
                block_slot: slot,
                parent_slot: parent.slot,
            },
        );

        // > Blocks cannot be in the future. If they are, their consideration must be delayed until
        // > they are in the past.
        ensure!(
            slot <= self.slot(),
            Error::BlockFromFuture {
                block_root,
                block_slot: slot,
                current_slot: self.slot(),
            },
        );

        ensure!(
            finalized_checkpoint.epoch <= justified_checkpoint.epoch
                && unrealized_finalized_checkpoint.epoch <= unrealized_justified_checkpoint.epoch,
            Error::InconsistentCheckpoints { block_root },
        );

        // > Check block is a descendant of the finalized block at the checkpoint finalized slot
        ensure!(
            self.proto_array.is_finalized_checkpoint_or_descendant(
                parent_root,
                self.finalized_checkpoint,
                self.finalized_slot(),
            ),
            Error::BlockNotDescendantOfFinalized {
                block_root,
                finalized_checkpoint: self.finalized_checkpoint,
            },
        );

        Ok(())
    }

    fn validate_attestation(&self, valid_attestation: &ValidAttestation) -> Result<AttestationAction> {
        let ValidAttestation {
            data,
            is_from_block,
            ..
        } = valid_attestation;

        let AttestationData {
            slot,
            beacon_block_root,
            target_epoch,
        } = *data;

        // > Attestations must be from the current or previous epoch
        if !is_from_block && target_epoch < self.previous_epoch() {
            return Ok(AttestationAction::Ignore);
        }

        // > Check that the epoch number and slot number are matching
        ensure!(
            target_epoch == misc::compute_epoch_at_slot::<P>(slot),
            Error::AttestationTargetsWrongEpoch { slot, target_epoch },
        );

        // > Attestations must be for a known block.
        // > If block is unknown, delay consideration until the block is found
        let block = self
            .node(beacon_block_root)
            .ok_or(Error::AttestationForUnknownBlock {
                block_root: beacon_block_root,
            })?;

        // > Attestations must not be for blocks in the future.
        // > If not, the attestation should not be considered
        ensure!(
            block.slot <= slot,
            Error::AttestationForFutureBlock {
                attestation_slot: slot,
                block_root: beacon_block_root,
                block_slot: block.slot,
            },
        );

        // > Attestations can only affect the fork choice of subsequent slots.
        // > Delay consideration in the fork choice until their slot is in the past.
        ensure!(
            slot < self.slot(),
            Error::AttestationFromCurrentSlot {
                attestation_slot: slot,
                current_slot: self.slot(),
            },
        );

        Ok(AttestationAction::Accept)
    }

    /// [`update_checkpoints`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#update_checkpoints)
    fn update_checkpoints(
        &mut self,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
    ) {
        // > Update justified checkpoint
        if justified_checkpoint.epoch > self.justified_checkpoint.epoch {
            debug!("justified checkpoint updated to {justified_checkpoint}");
            self.justified_checkpoint = justified_checkpoint;
        }

        // > Update finalized checkpoint
        if finalized_checkpoint.epoch > self.finalized_checkpoint.epoch {
            info!("finalized checkpoint updated to {finalized_checkpoint}");
            self.finalized_checkpoint = finalized_checkpoint;
        }
    }

    /// [`update_unrealized_checkpoints`](https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#update_unrealized_checkpoints)
    fn update_best_checkpoints(
        &mut self,
        justified_checkpoint: Checkpoint,
        finalized_checkpoint: Checkpoint,
    ) {
        if justified_checkpoint.epoch > self.best_justified_checkpoint.epoch {
            self.best_justified_checkpoint = justified_checkpoint;
        }

        if finalized_checkpoint.epoch > self.best_finalized_checkpoint.epoch {
            self.best_finalized_checkpoint = finalized_checkpoint;
        }
    }

    fn viability(&self) -> Viability {
        let current_epoch = self.current_epoch();

        Viability {
            justified_checkpoint: self.justified_checkpoint,
            finalized_checkpoint: self.finalized_checkpoint,
            finalized_slot: self.finalized_slot(),
            current_epoch,
            current_epoch_start_slot: misc::compute_start_slot_at_epoch::<P>(current_epoch),
        }
    }

    // Proposer boost is added to a copy of the tree so that it never ends up in stored weights.
    fn boosted_head(&self, viability: &Viability) -> Result<H256> {
        let justified_root = self.justified_checkpoint.root;

        let Some(boosted_index) = self.proto_array.index_of(self.proposer_boost_root) else {
            return self.proto_array.find_head(justified_root, viability);
        };

        let mut deltas = vec![0; self.proto_array.len()];
        deltas[boosted_index] = Difference::try_from(self.proposer_boost_score())?;

        let mut boosted = self.proto_array.clone();
        boosted.apply_weight_deltas(&deltas, viability)?;
        boosted.find_head(justified_root, viability)
    }
}
