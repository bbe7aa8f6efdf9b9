use std::sync::{mpsc::Sender, Arc};

use clock::Tick;
use fork_choice_store::{ChainLink, ValidAttestation};
use log::debug;
use types::phase0::primitives::{Gwei, ValidatorIndex, H256};

// Every variant except `Stop` carries a `wait_group` to make `Controller::wait_for_tasks` work.
// Retried objects are sent back through the same channel with a clone of the original `wait_group`.
pub enum MutatorMessage<W> {
    Tick {
        wait_group: W,
        tick: Tick,
    },
    Block {
        wait_group: W,
        chain_link: ChainLink,
        // `None` means the block is timely if it is applied before the attesting interval of its
        // slot.
        is_timely: Option<bool>,
    },
    Attestation {
        wait_group: W,
        attestation: ValidAttestation,
    },
    AttestationBatch {
        wait_group: W,
        attestations: Vec<ValidAttestation>,
    },
    AttesterSlashing {
        wait_group: W,
        validator_indices: Vec<ValidatorIndex>,
    },
    JustifiedBalances {
        wait_group: W,
        balances: Arc<[Gwei]>,
    },
    Prune {
        wait_group: W,
        root: H256,
    },
    PruneFinalized {
        wait_group: W,
    },
    // Dropping `Controller.mutator_tx` is not enough to stop the mutator thread because `Mutator`
    // keeps a sender of its own for retrying delayed objects.
    Stop,
}

impl<W> MutatorMessage<W> {
    pub(crate) fn send(self, tx: &Sender<Self>) {
        if tx.send(self).is_err() {
            // This can happen if the mutator thread fails or if a message is sent after the
            // `Controller` is dropped.
            debug!("send to mutator failed because the receiver was dropped");
        }
    }
}
