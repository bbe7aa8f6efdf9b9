use std::sync::Arc;

use anyhow::Result;
use clock::Tick;
use crossbeam_utils::sync::WaitGroup;
use fork_choice_store::{AnchorBlock, ChainLink, StoreConfig, ValidAttestation};
use futures::channel::mpsc::UnboundedReceiver;
use helper_functions::misc;
use types::{
    config::Config,
    phase0::{
        consts::GENESIS_EPOCH,
        containers::{AttestationData, Checkpoint},
        primitives::{Epoch, Gwei, Slot, ValidatorIndex, H256},
    },
    preset::{Minimal, Preset},
};
use unwrap_none::UnwrapNone as _;

use crate::{
    controller::{Controller, MutatorHandle},
    events::{ChainReorgEvent, Event, HeadEvent, PrunedEvent},
};

pub type TestController<P> = Controller<P, WaitGroup>;

pub const ANCHOR: u8 = 0xa;

pub struct Context<P: Preset> {
    controller: Option<Arc<TestController<P>>>,
    #[expect(
        dead_code,
        reason = "Keep the `MutatorHandle` around to avoid joining the mutator thread prematurely."
    )]
    mutator_handle: MutatorHandle<WaitGroup>,
    event_rx: UnboundedReceiver<Event>,
}

impl<P: Preset> Drop for Context<P> {
    fn drop(&mut self) {
        self.controller
            .take()
            .expect("Self.controller is only taken in Drop::drop");

        if !std::thread::panicking() {
            self.next_event().unwrap_none();
        }
    }
}

impl<P: Preset> Context<P> {
    pub fn new(
        chain_config: Config,
        store_config: StoreConfig,
        justified_balances: &[Gwei],
    ) -> Result<Self> {
        let (event_tx, event_rx) = futures::channel::mpsc::unbounded();

        let (controller, mutator_handle) = TestController::new(
            Arc::new(chain_config),
            store_config,
            genesis_checkpoint(),
            AnchorBlock {
                root: root(ANCHOR),
                slot: 0,
            },
            Arc::from(justified_balances),
            Tick::start_of_slot(0),
            event_tx,
        )?;

        Ok(Self {
            controller: Some(controller),
            mutator_handle,
            event_rx,
        })
    }

    pub fn on_tick(&self, tick: Tick) {
        self.controller().on_tick(tick);
        self.controller().wait_for_tasks();
    }

    pub fn on_slot(&self, slot: Slot) {
        self.controller().on_slot(slot);
        self.controller().wait_for_tasks();
    }

    pub fn on_block(&self, chain_link: ChainLink) {
        self.controller().on_block(chain_link);
        self.controller().wait_for_tasks();
    }

    pub fn on_attestation(&self, attestation: ValidAttestation) {
        self.controller().on_attestation(attestation);
        self.controller().wait_for_tasks();
    }

    pub fn on_attestation_batch(&self, attestations: Vec<ValidAttestation>) {
        self.controller().on_attestation_batch(attestations);
        self.controller().wait_for_tasks();
    }

    pub fn on_equivocation(&self, validator_index: ValidatorIndex) {
        self.controller().on_equivocation(validator_index);
        self.controller().wait_for_tasks();
    }

    pub fn on_justified_balances(&self, balances: &[Gwei]) {
        self.controller().on_justified_balances(Arc::from(balances));
        self.controller().wait_for_tasks();
    }

    pub fn on_prune(&self, byte: u8) {
        self.controller().on_prune(root(byte));
        self.controller().wait_for_tasks();
    }

    pub fn on_prune_finalized(&self) {
        self.controller().on_prune_finalized();
        self.controller().wait_for_tasks();
    }

    pub fn assert_head(&self, expected_byte: u8) {
        assert_eq!(self.controller().head(), root(expected_byte));
    }

    pub fn assert_contains_block(&self, byte: u8, expected_contains: bool) {
        assert_eq!(self.controller().contains_block(root(byte)), expected_contains);
    }

    pub fn assert_head_event(&mut self, expected_slot: Slot, expected_byte: u8) {
        assert_eq!(
            self.next_event(),
            Some(Event::Head(HeadEvent {
                slot: expected_slot,
                block: root(expected_byte),
                epoch_transition: misc::is_epoch_start::<P>(expected_slot),
            })),
        );
    }

    pub fn assert_reorg_event(&mut self, expected_old_byte: u8, expected_new_byte: u8) {
        assert!(matches!(
            self.next_event(),
            Some(Event::ChainReorg(ChainReorgEvent {
                old_head_block,
                new_head_block,
                ..
            })) if old_head_block == root(expected_old_byte)
                && new_head_block == root(expected_new_byte),
        ));
    }

    pub fn assert_pruned_event(&mut self, expected_byte: u8, expected_removed: &[u8]) {
        assert_eq!(
            self.next_event(),
            Some(Event::Pruned(PrunedEvent {
                root: root(expected_byte),
                removed: expected_removed.iter().copied().map(root).collect(),
            })),
        );
    }

    pub fn controller(&self) -> &TestController<P> {
        self.controller
            .as_ref()
            .expect("Self.controller is only taken in Drop::drop")
    }

    pub fn next_event(&mut self) -> Option<Event> {
        self.event_rx.try_next().ok().flatten()
    }
}

// This cannot be done with a default type parameter because they are not used for type inference.
impl Context<Minimal> {
    pub fn minimal(justified_balances: &[Gwei]) -> Self {
        Self::with_store_config(StoreConfig::default(), justified_balances)
    }

    pub fn with_store_config(store_config: StoreConfig, justified_balances: &[Gwei]) -> Self {
        Self::new(Config::minimal(), store_config, justified_balances)
            .expect("genesis anchor is consistent")
    }
}

pub fn root(byte: u8) -> H256 {
    H256::repeat_byte(byte)
}

pub fn genesis_checkpoint() -> Checkpoint {
    checkpoint(GENESIS_EPOCH, ANCHOR)
}

pub fn checkpoint(epoch: Epoch, byte: u8) -> Checkpoint {
    Checkpoint {
        epoch,
        root: root(byte),
    }
}

pub fn link(block: u8, parent: u8, slot: Slot) -> ChainLink {
    ChainLink {
        block_root: root(block),
        parent_root: root(parent),
        slot,
        justified_checkpoint: genesis_checkpoint(),
        finalized_checkpoint: genesis_checkpoint(),
        unrealized_justified_checkpoint: genesis_checkpoint(),
        unrealized_finalized_checkpoint: genesis_checkpoint(),
    }
}

// The block justifies and finalizes `checkpoint` in its own post-state.
pub fn finalizing_link(block: u8, parent: u8, slot: Slot, checkpoint: Checkpoint) -> ChainLink {
    ChainLink {
        justified_checkpoint: checkpoint,
        finalized_checkpoint: checkpoint,
        unrealized_justified_checkpoint: checkpoint,
        unrealized_finalized_checkpoint: checkpoint,
        ..link(block, parent, slot)
    }
}

pub fn attestation(slot: Slot, block: u8, attesting_indices: &[ValidatorIndex]) -> ValidAttestation {
    ValidAttestation {
        data: AttestationData {
            slot,
            beacon_block_root: root(block),
            target_epoch: misc::compute_epoch_at_slot::<Minimal>(slot),
        },
        attesting_indices: Arc::from(attesting_indices),
        is_from_block: false,
    }
}
