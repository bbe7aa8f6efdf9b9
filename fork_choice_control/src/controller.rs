// Instead of mutating `Store` directly, the `on_*` methods send messages to a mutator thread that
// does so in the background. Query methods operate on a recent but potentially out-of-date snapshot
// of `Store`. This lets queries proceed without waiting and lets the `on_*` methods be called from
// `async` tasks.
//
// Messages are handled in the order they are sent. Objects delayed by the mutator are handled
// after objects sent later.

use core::{any::Any, panic::AssertUnwindSafe};
use std::{
    sync::{mpsc::Sender, Arc},
    thread::{Builder, JoinHandle},
};

use anyhow::{Context as _, Error as AnyhowError, Result};
use arc_swap::{ArcSwap, Guard};
use clock::Tick;
use fork_choice_store::{AnchorBlock, ChainLink, Store, StoreConfig, ValidAttestation};
use log::{error, info};
use thiserror::Error;
use types::{
    config::Config as ChainConfig,
    phase0::{
        containers::Checkpoint,
        primitives::{Gwei, Slot, ValidatorIndex, H256},
    },
    preset::Preset,
};

use crate::{
    events::Event, messages::MutatorMessage, mutator::Mutator, unbounded_sink::UnboundedSink,
    wait::Wait,
};

pub struct Controller<P: Preset, W: Wait> {
    // The latest consistent snapshot of the store.
    store_snapshot: Arc<ArcSwap<Store<P>>>,
    wait_group: W::Swappable,
    mutator_tx: Sender<MutatorMessage<W>>,
}

impl<P: Preset, W: Wait> Drop for Controller<P, W> {
    fn drop(&mut self) {
        MutatorMessage::Stop.send(&self.mutator_tx);
    }
}

impl<P: Preset, W: Wait> Controller<P, W> {
    pub fn new(
        chain_config: Arc<ChainConfig>,
        store_config: StoreConfig,
        anchor_checkpoint: Checkpoint,
        anchor_block: AnchorBlock,
        justified_balances: Arc<[Gwei]>,
        tick: Tick,
        event_tx: impl UnboundedSink<Event>,
    ) -> Result<(Arc<Self>, MutatorHandle<W>)> {
        let mut store = Store::new(
            chain_config,
            store_config,
            anchor_checkpoint,
            anchor_block,
            justified_balances,
        )?;

        let head = store.get_head(tick)?;

        info!(
            "fork choice initialized (anchor: {anchor_checkpoint:?}, slot: {}, head: {head:?})",
            store.slot(),
        );

        let store_snapshot = Arc::new(ArcSwap::from_pointee(store));
        let (mutator_tx, mutator_rx) = std::sync::mpsc::channel();

        let mut mutator = Mutator::new(
            Arc::clone(&store_snapshot),
            mutator_tx.clone(),
            mutator_rx,
            event_tx,
        );

        let join_handle = Builder::new().name("store-mutator".to_owned()).spawn(|| {
            // The instance of `Store` used by the mutator may become inconsistent after a panic
            // but cannot be observed because the shared snapshot is only updated with values that
            // are consistent.
            std::panic::catch_unwind(AssertUnwindSafe(move || mutator.run()))
                .map_err(payload_into_error)
                .context(Error::MutatorPanicked)?
                .context(Error::MutatorFailed)
        })?;

        let controller = Arc::new(Self {
            store_snapshot,
            wait_group: W::Swappable::default(),
            mutator_tx: mutator_tx.clone(),
        });

        let mutator_handle = MutatorHandle {
            join_handle: Some(join_handle),
            mutator_tx,
        };

        Ok((controller, mutator_handle))
    }

    // More or less frequent calls are allowed but may worsen the quality of the head.
    // Older ticks are rejected by `Store`, so there is no need to check them here.
    pub fn on_tick(&self, tick: Tick) {
        MutatorMessage::Tick {
            wait_group: self.owned_wait_group(),
            tick,
        }
        .send(&self.mutator_tx)
    }

    pub fn on_slot(&self, slot: Slot) {
        self.on_tick(Tick::start_of_slot(slot))
    }

    /// Submits a block whose timeliness is decided by the tick it is applied at.
    pub fn on_block(&self, chain_link: ChainLink) {
        self.send_block(chain_link, None)
    }

    /// Submits a block whose timeliness was decided by the caller, usually from its arrival time.
    pub fn on_block_with_timeliness(&self, chain_link: ChainLink, is_timely: bool) {
        self.send_block(chain_link, Some(is_timely))
    }

    pub fn on_attestation(&self, attestation: ValidAttestation) {
        MutatorMessage::Attestation {
            wait_group: self.owned_wait_group(),
            attestation,
        }
        .send(&self.mutator_tx)
    }

    pub fn on_attestation_batch(&self, attestations: Vec<ValidAttestation>) {
        if attestations.is_empty() {
            return;
        }

        MutatorMessage::AttestationBatch {
            wait_group: self.owned_wait_group(),
            attestations,
        }
        .send(&self.mutator_tx)
    }

    pub fn on_equivocation(&self, validator_index: ValidatorIndex) {
        self.on_attester_slashing(vec![validator_index])
    }

    /// Submits the indices of validators that attested in both attestations of a slashing.
    pub fn on_attester_slashing(&self, validator_indices: Vec<ValidatorIndex>) {
        MutatorMessage::AttesterSlashing {
            wait_group: self.owned_wait_group(),
            validator_indices,
        }
        .send(&self.mutator_tx)
    }

    pub fn on_justified_balances(&self, balances: Arc<[Gwei]>) {
        MutatorMessage::JustifiedBalances {
            wait_group: self.owned_wait_group(),
            balances,
        }
        .send(&self.mutator_tx)
    }

    pub fn on_prune(&self, root: H256) {
        MutatorMessage::Prune {
            wait_group: self.owned_wait_group(),
            root,
        }
        .send(&self.mutator_tx)
    }

    pub fn on_prune_finalized(&self) {
        MutatorMessage::PruneFinalized {
            wait_group: self.owned_wait_group(),
        }
        .send(&self.mutator_tx)
    }

    /// Blocks until all messages sent so far are handled along with any objects they caused to be
    /// retried. Only does something if `W` is [`WaitGroup`].
    ///
    /// [`WaitGroup`]: crossbeam_utils::sync::WaitGroup
    pub fn wait_for_tasks(&self) {
        W::wait(&self.wait_group)
    }

    fn send_block(&self, chain_link: ChainLink, is_timely: Option<bool>) {
        MutatorMessage::Block {
            wait_group: self.owned_wait_group(),
            chain_link,
            is_timely,
        }
        .send(&self.mutator_tx)
    }

    pub(crate) fn store_snapshot(&self) -> Guard<Arc<Store<P>>> {
        self.store_snapshot.load()
    }

    pub(crate) fn owned_store_snapshot(&self) -> Arc<Store<P>> {
        self.store_snapshot.load_full()
    }

    fn owned_wait_group(&self) -> W {
        W::load_and_clone(&self.wait_group)
    }
}

/// A handle for the mutator thread.
///
/// The thread stops when the corresponding [`Controller`] is dropped or this handle is joined or
/// dropped, whichever happens first. Errors from the thread are returned by [`MutatorHandle::join`].
/// Dropping the handle joins the thread implicitly and logs errors instead.
pub struct MutatorHandle<W> {
    join_handle: Option<JoinHandle<Result<()>>>,
    mutator_tx: Sender<MutatorMessage<W>>,
}

impl<W> Drop for MutatorHandle<W> {
    fn drop(&mut self) {
        // Stop the mutator thread to avoid a deadlock if the corresponding `Controller` hasn't been
        // dropped yet.
        self.stop();

        if let Err(error) = self.join_internal() {
            error!("mutator thread failed: {error:?}");
        }
    }
}

impl<W> MutatorHandle<W> {
    pub fn join(mut self) -> Result<()> {
        self.stop();
        self.join_internal()
    }

    fn stop(&self) {
        MutatorMessage::Stop.send(&self.mutator_tx);
    }

    // `MutatorHandle::join_internal` is called twice when `MutatorHandle::join` is used.
    fn join_internal(&mut self) -> Result<()> {
        match self.join_handle.take() {
            Some(join_handle) => join_handle
                .join()
                .map_err(payload_into_error)
                .context(Error::MutatorPanicked)?,
            None => Ok(()),
        }
    }
}

fn payload_into_error(payload: Box<dyn Any + Send + 'static>) -> AnyhowError {
    let payload = match payload.downcast::<String>() {
        Ok(string) => return AnyhowError::msg(*string),
        Err(other) => other,
    };

    if let Ok(string) = payload.downcast::<&str>() {
        return AnyhowError::msg(*string);
    }

    AnyhowError::msg("panic with payload of unknown type")
}

#[derive(Debug, Error)]
enum Error {
    #[error("mutator panicked")]
    MutatorPanicked,
    #[error("mutator failed")]
    MutatorFailed,
}
