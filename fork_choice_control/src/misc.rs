use fork_choice_store::{ChainLink, ValidAttestation};
use types::phase0::primitives::{Epoch, Slot};

#[derive(Default)]
pub struct Delayed {
    pub blocks: Vec<PendingBlock>,
    pub attestations: Vec<ValidAttestation>,
}

impl Delayed {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let Self {
            blocks,
            attestations,
        } = self;

        blocks.is_empty() && attestations.is_empty()
    }

    // The parent of a delayed block cannot be in a finalized slot.
    // Attestations for old epochs would be ignored anyway.
    pub fn prune(&mut self, finalized_slot: Slot, previous_epoch: Epoch) {
        self.blocks
            .retain(|pending| pending.chain_link.slot.saturating_sub(1) > finalized_slot);

        self.attestations
            .retain(|attestation| attestation.data.target_epoch >= previous_epoch);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PendingBlock {
    pub chain_link: ChainLink,
    pub is_timely: Option<bool>,
}
