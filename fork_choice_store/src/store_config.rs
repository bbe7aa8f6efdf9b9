use derivative::Derivative;
use serde::Deserialize;
use types::phase0::primitives::Gwei;

pub const DEFAULT_PRUNE_THRESHOLD: usize = 256;
pub const DEFAULT_VALIDATOR_LIMIT: usize = 1 << 22;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Derivative, Deserialize)]
#[derivative(Default)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub proposer_boost: ProposerBoost,
    /// Minimum number of nodes preceding the finalized block before
    /// [`Store::prune_finalized`] does anything.
    ///
    /// [`Store::prune_finalized`]: crate::Store::prune_finalized
    #[derivative(Default(value = "DEFAULT_PRUNE_THRESHOLD"))]
    pub prune_threshold: usize,
    /// Votes from validators with indices of this or more are rejected.
    #[derivative(Default(value = "DEFAULT_VALIDATOR_LIMIT"))]
    pub validator_limit: usize,
}

/// Weight added to a timely block and its ancestors while computing the head.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposerBoost {
    /// `PROPOSER_SCORE_BOOST` percent of the average committee weight.
    #[default]
    CommitteeFraction,
    Fixed(Gwei),
}
