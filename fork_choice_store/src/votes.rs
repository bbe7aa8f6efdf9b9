use core::iter;

use anyhow::Result;
use im::{HashSet, Vector};
use types::phase0::primitives::{Epoch, Gwei, ValidatorIndex, H256};

use crate::{
    error::Error, misc::Difference, proto_array::ProtoArray,
    store_config::DEFAULT_VALIDATOR_LIMIT,
};

/// Latest message of a single validator.
///
/// `current_root` is the vote whose weight is in the tree.
/// `next_root` is the latest vote, applied by the next call to [`Votes::compute_deltas`].
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct VoteTracker {
    pub current_root: H256,
    pub next_root: H256,
    pub next_epoch: Epoch,
}

#[derive(Clone, Debug)]
pub struct Votes {
    trackers: Vector<VoteTracker>,
    equivocating_indices: HashSet<ValidatorIndex>,
    validator_limit: usize,
}

impl Default for Votes {
    fn default() -> Self {
        Self::new(DEFAULT_VALIDATOR_LIMIT)
    }
}

impl Votes {
    /// Votes from validators with indices of `validator_limit` or more are rejected.
    #[must_use]
    pub fn new(validator_limit: usize) -> Self {
        Self {
            trackers: Vector::new(),
            equivocating_indices: HashSet::new(),
            validator_limit,
        }
    }

    #[must_use]
    pub fn get(&self, validator_index: ValidatorIndex) -> Option<&VoteTracker> {
        self.trackers.get(usize::try_from(validator_index).ok()?)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    #[must_use]
    pub fn is_equivocating(&self, validator_index: ValidatorIndex) -> bool {
        self.equivocating_indices.contains(&validator_index)
    }

    #[must_use]
    pub fn equivocating_count(&self) -> usize {
        self.equivocating_indices.len()
    }

    /// Stages a vote if it is the first one from the validator or targets a later epoch than the
    /// staged one. Returns whether the vote was staged.
    pub fn process_attestation(
        &mut self,
        validator_index: ValidatorIndex,
        block_root: H256,
        target_epoch: Epoch,
    ) -> Result<bool> {
        if self.is_equivocating(validator_index) {
            return Ok(false);
        }

        let index = usize::try_from(validator_index)
            .ok()
            .filter(|index| *index < self.validator_limit)
            .ok_or(Error::ValidatorIndexOutOfBounds {
                validator_index,
                limit: self.validator_limit,
            })?;

        if let Some(missing) = (index + 1).checked_sub(self.trackers.len()) {
            self.trackers
                .extend(iter::repeat_n(VoteTracker::default(), missing));
        }

        let vote = &mut self.trackers[index];
        let is_first_vote = *vote == VoteTracker::default();

        if !is_first_vote && target_epoch <= vote.next_epoch {
            return Ok(false);
        }

        vote.next_root = block_root;
        vote.next_epoch = target_epoch;

        Ok(true)
    }

    /// Moves staged votes into the tree and adjusts for balance changes.
    ///
    /// Returns one delta per node in `proto_array`. Weight is removed from `current_root` using
    /// the balance it was added with and added to `next_root` using the new balance. Roots
    /// missing from `proto_array` (votes for pruned blocks) are skipped.
    pub fn compute_deltas(
        &mut self,
        proto_array: &ProtoArray,
        old_balances: &[Gwei],
        new_balances: &[Gwei],
    ) -> Result<Vec<Difference>> {
        let mut deltas = vec![0; proto_array.len()];

        for (index, vote) in self.trackers.iter_mut().enumerate() {
            if *vote == VoteTracker::default() {
                continue;
            }

            let validator_index = ValidatorIndex::try_from(index)?;

            if self.equivocating_indices.contains(&validator_index) {
                continue;
            }

            let old_balance = old_balances.get(index).copied().unwrap_or_default();
            let new_balance = new_balances.get(index).copied().unwrap_or_default();

            if vote.current_root == vote.next_root && old_balance == new_balance {
                continue;
            }

            if let Some(current_index) = proto_array.index_of(vote.current_root) {
                subtract(&mut deltas[current_index], old_balance, vote.current_root)?;
            }

            if let Some(next_index) = proto_array.index_of(vote.next_root) {
                add(&mut deltas[next_index], new_balance, vote.next_root)?;
            }

            vote.current_root = vote.next_root;
        }

        Ok(deltas)
    }

    /// Marks the validator as equivocating and removes the weight of its vote from `deltas`.
    ///
    /// Returns `false` if the validator was already marked.
    pub fn process_equivocation(
        &mut self,
        validator_index: ValidatorIndex,
        proto_array: &ProtoArray,
        applied_balances: &[Gwei],
        deltas: &mut [Difference],
    ) -> Result<bool> {
        if self.equivocating_indices.insert(validator_index).is_some() {
            return Ok(false);
        }

        let index = usize::try_from(validator_index)?;

        if let Some(vote) = self.trackers.get_mut(index) {
            if let Some(current_index) = proto_array.index_of(vote.current_root) {
                let balance = applied_balances.get(index).copied().unwrap_or_default();

                let delta_count = deltas.len();

                let delta = deltas
                    .get_mut(current_index)
                    .ok_or(Error::InvalidDeltaCount {
                        expected: proto_array.len(),
                        actual: delta_count,
                    })?;

                subtract(delta, balance, vote.current_root)?;
            }

            *vote = VoteTracker::default();
        }

        Ok(true)
    }
}

fn add(delta: &mut Difference, balance: Gwei, root: H256) -> Result<()> {
    *delta = delta
        .checked_add(Difference::try_from(balance)?)
        .ok_or(Error::DeltaOverflow { root })?;

    Ok(())
}

fn subtract(delta: &mut Difference, balance: Gwei, root: H256) -> Result<()> {
    *delta = delta
        .checked_sub(Difference::try_from(balance)?)
        .ok_or(Error::DeltaOverflow { root })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;
    use types::phase0::{consts::GENESIS_EPOCH, containers::Checkpoint};

    use crate::misc::ChainLink;

    use super::*;

    const ANCHOR: u8 = 0xa;

    fn root(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    // A - B
    //  \
    //   C
    fn proto_array() -> Result<ProtoArray> {
        let checkpoint = Checkpoint {
            epoch: GENESIS_EPOCH,
            root: root(ANCHOR),
        };

        let link = |block, slot| ChainLink {
            block_root: root(block),
            parent_root: root(ANCHOR),
            slot,
            justified_checkpoint: checkpoint,
            finalized_checkpoint: checkpoint,
            unrealized_justified_checkpoint: checkpoint,
            unrealized_finalized_checkpoint: checkpoint,
        };

        let mut proto_array = ProtoArray::new(root(ANCHOR), 0, checkpoint);
        proto_array.insert(link(0xb, 1))?;
        proto_array.insert(link(0xc, 1))?;

        Ok(proto_array)
    }

    #[test]
    fn first_votes_only_add_weight() -> Result<()> {
        let proto_array = proto_array()?;
        let mut votes = Votes::default();

        votes.process_attestation(0, root(0xb), 0)?;
        votes.process_attestation(2, root(0xc), 0)?;

        assert_eq!(votes.len(), 3);

        let deltas = votes.compute_deltas(&proto_array, &[], &[10, 20, 30])?;

        assert_eq!(deltas, [0, 10, 30]);

        Ok(())
    }

    #[test]
    fn moved_votes_are_applied_exactly_once() -> Result<()> {
        let proto_array = proto_array()?;
        let balances = [10, 20];
        let mut votes = Votes::default();

        votes.process_attestation(0, root(0xb), 1)?;
        votes.process_attestation(1, root(0xb), 1)?;
        votes.compute_deltas(&proto_array, &[], &balances)?;

        assert!(votes.process_attestation(1, root(0xc), 2)?);

        assert_eq!(
            votes.compute_deltas(&proto_array, &balances, &balances)?,
            [0, -20, 20],
        );

        assert_eq!(
            votes.compute_deltas(&proto_array, &balances, &balances)?,
            [0, 0, 0],
        );

        Ok(())
    }

    #[test]
    fn stale_and_duplicate_votes_are_ignored() -> Result<()> {
        let mut votes = Votes::default();

        assert!(votes.process_attestation(0, root(0xb), 3)?);
        assert!(!votes.process_attestation(0, root(0xc), 3)?);
        assert!(!votes.process_attestation(0, root(0xc), 2)?);

        let vote = votes.get(0).copied().unwrap_or_default();

        assert_eq!(vote.next_root, root(0xb));
        assert_eq!(vote.next_epoch, 3);

        Ok(())
    }

    #[test]
    fn balance_changes_produce_differences() -> Result<()> {
        let proto_array = proto_array()?;
        let mut votes = Votes::default();

        votes.process_attestation(0, root(0xb), 0)?;
        votes.process_attestation(1, root(0xc), 0)?;
        votes.compute_deltas(&proto_array, &[], &[10, 10])?;

        // Validator 1 is missing from the new balances and counts as having none.
        assert_eq!(
            votes.compute_deltas(&proto_array, &[10, 10], &[15])?,
            [0, 5, -10],
        );

        Ok(())
    }

    #[test]
    fn equivocation_removes_weight_once_and_ignores_later_votes() -> Result<()> {
        let proto_array = proto_array()?;
        let balances = [10, 10];
        let mut votes = Votes::default();

        votes.process_attestation(0, root(0xb), 0)?;
        votes.process_attestation(1, root(0xb), 0)?;
        votes.compute_deltas(&proto_array, &[], &balances)?;

        let mut deltas = vec![0; proto_array.len()];

        assert!(votes.process_equivocation(1, &proto_array, &balances, &mut deltas)?);
        assert!(!votes.process_equivocation(1, &proto_array, &balances, &mut deltas)?);
        assert_eq!(deltas, [0, -10, 0]);

        assert!(!votes.process_attestation(1, root(0xc), 5)?);

        assert_eq!(
            votes.compute_deltas(&proto_array, &balances, &[20, 20])?,
            [0, 10, 0],
        );

        assert!(votes.is_equivocating(1));
        assert_eq!(votes.equivocating_count(), 1);

        Ok(())
    }

    #[test]
    fn equivocation_with_short_deltas_is_rejected() -> Result<()> {
        let proto_array = proto_array()?;
        let mut votes = Votes::default();
        let mut deltas = vec![0; 1];

        votes.process_attestation(0, root(0xc), 0)?;
        votes.compute_deltas(&proto_array, &[], &[10])?;

        let error = votes
            .process_equivocation(0, &proto_array, &[10], &mut deltas)
            .expect_err("deltas shorter than the tree should be rejected");

        assert_eq!(
            error.downcast_ref::<Error>(),
            Some(&Error::InvalidDeltaCount {
                expected: 3,
                actual: 1,
            }),
        );

        Ok(())
    }

    #[test]
    fn equivocation_before_any_vote_removes_nothing() -> Result<()> {
        let proto_array = proto_array()?;
        let mut votes = Votes::default();
        let mut deltas = vec![0; proto_array.len()];

        assert!(votes.process_equivocation(7, &proto_array, &[], &mut deltas)?);
        assert_eq!(deltas, [0, 0, 0]);
        assert!(!votes.process_attestation(7, root(0xb), 0)?);
        assert_eq!(votes.len(), 0);

        Ok(())
    }

    #[test]
    fn votes_for_pruned_blocks_are_skipped() -> Result<()> {
        let mut proto_array = proto_array()?;
        let mut votes = Votes::default();

        votes.process_attestation(0, root(0xc), 0)?;
        votes.compute_deltas(&proto_array, &[], &[10])?;

        proto_array.prune(root(0xb))?;
        votes.process_attestation(0, root(0xb), 1)?;

        assert_eq!(votes.compute_deltas(&proto_array, &[10], &[10])?, [10]);

        Ok(())
    }

    #[test_case(ValidatorIndex::MAX; "largest index")]
    #[test_case(4; "first index past limit")]
    fn votes_from_validators_past_limit_are_rejected(validator_index: ValidatorIndex) {
        let mut votes = Votes::new(4);

        let error = votes
            .process_attestation(validator_index, root(0xb), 0)
            .expect_err("index past the validator limit should be rejected");

        assert_eq!(
            error.downcast_ref::<Error>(),
            Some(&Error::ValidatorIndexOutOfBounds {
                validator_index,
                limit: 4,
            }),
        );
        assert_eq!(votes.len(), 0);
    }

    #[test]
    fn last_index_below_limit_is_accepted() -> Result<()> {
        let mut votes = Votes::new(4);

        assert!(votes.process_attestation(3, root(0xb), 0)?);
        assert_eq!(votes.len(), 4);

        Ok(())
    }
}
