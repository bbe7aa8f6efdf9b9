// `Mutator::run` is executed in a background thread and performs all mutations on a uniquely owned
// copy of `Store` as an alternative to locking.
//
// A new snapshot is published after every message that may have changed the store. Snapshots are
// only published after the head is recomputed, so queries never observe staged votes without the
// head that results from them.
//
// Objects that cannot be applied yet are kept in `Mutator` rather than in `Store`. They are resent
// through `Mutator.mutator_tx` once the block or slot they are waiting for arrives.

use core::fmt::Debug;
use std::{
    collections::BTreeMap,
    sync::{
        mpsc::{Receiver, Sender},
        Arc,
    },
};

use anyhow::Result;
use arc_swap::ArcSwap;
use clock::Tick;
use fork_choice_store::{Error as StoreError, Store, ValidAttestation};
use hash_hasher::HashedMap;
use log::{debug, error, info, warn};
use types::{
    phase0::primitives::{Gwei, Slot, ValidatorIndex, H256},
    preset::Preset,
};

use crate::{
    events::{ChainReorgEvent, Event, HeadEvent, PrunedEvent},
    messages::MutatorMessage,
    misc::{Delayed, PendingBlock},
    unbounded_sink::UnboundedSink,
    wait::Wait,
};

pub struct Mutator<P: Preset, W, ES> {
    store: Arc<Store<P>>,
    store_snapshot: Arc<ArcSwap<Store<P>>>,
    delayed_until_block: HashedMap<H256, Delayed>,
    // Objects are not dropped for being too far in the future. If the application lags and misses
    // several slots, everything delayed until them is retried on the next tick.
    delayed_until_slot: BTreeMap<Slot, Delayed>,
    mutator_tx: Sender<MutatorMessage<W>>,
    mutator_rx: Receiver<MutatorMessage<W>>,
    event_tx: ES,
}

impl<P, W, ES> Mutator<P, W, ES>
where
    P: Preset,
    W: Wait,
    ES: UnboundedSink<Event>,
{
    pub fn new(
        store_snapshot: Arc<ArcSwap<Store<P>>>,
        mutator_tx: Sender<MutatorMessage<W>>,
        mutator_rx: Receiver<MutatorMessage<W>>,
        event_tx: ES,
    ) -> Self {
        Self {
            store: store_snapshot.load_full(),
            store_snapshot,
            delayed_until_block: HashedMap::default(),
            delayed_until_slot: BTreeMap::new(),
            mutator_tx,
            mutator_rx,
            event_tx,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        // `Mutator.mutator_tx` keeps the channel open, so `recv` only fails if that is dropped.
        // `message` is dropped at the end of each iteration. Wait groups in it are released only
        // after the new snapshot is published.
        while let Ok(message) = self.mutator_rx.recv() {
            let old_store = self.owned_store();

            match message {
                MutatorMessage::Tick {
                    ref wait_group,
                    tick,
                } => self.handle_tick(wait_group, tick)?,
                MutatorMessage::Block {
                    ref wait_group,
                    chain_link,
                    is_timely,
                } => self.handle_block(
                    wait_group,
                    PendingBlock {
                        chain_link,
                        is_timely,
                    },
                )?,
                MutatorMessage::Attestation { attestation, .. } => {
                    self.handle_attestation(attestation)?
                }
                MutatorMessage::AttestationBatch { attestations, .. } => {
                    self.handle_attestation_batch(attestations)?
                }
                MutatorMessage::AttesterSlashing {
                    validator_indices, ..
                } => self.handle_attester_slashing(&validator_indices)?,
                MutatorMessage::JustifiedBalances { balances, .. } => {
                    self.handle_justified_balances(balances)
                }
                MutatorMessage::Prune { root, .. } => self.handle_prune(root)?,
                MutatorMessage::PruneFinalized { .. } => self.handle_prune_finalized()?,
                MutatorMessage::Stop => break,
            }

            self.finish_mutation(&old_store);
        }

        Ok(())
    }

    fn handle_tick(&mut self, wait_group: &W, tick: Tick) -> Result<()> {
        let changes = match self.store_mut().apply_tick(tick) {
            Ok(Some(changes)) => changes,
            Ok(None) => return Ok(()),
            Err(error) => return report_rejection(error, "tick", &tick),
        };

        if changes.is_slot_updated() {
            let slot = tick.slot;

            debug!("retrying objects delayed until slot {slot}");

            for delayed in self.take_delayed_until_slot(slot) {
                self.retry_delayed(delayed, wait_group);
            }
        }

        Ok(())
    }

    fn handle_block(&mut self, wait_group: &W, pending_block: PendingBlock) -> Result<()> {
        let PendingBlock {
            chain_link,
            is_timely,
        } = pending_block;

        let block_root = chain_link.block_root;

        let is_timely = is_timely.unwrap_or_else(|| {
            let tick = self.store.tick();
            tick.slot == chain_link.slot && tick.is_before_attesting_interval()
        });

        let error = match self.store_mut().apply_block(chain_link, is_timely) {
            Ok(changes) => {
                debug!("block accepted (block_root: {block_root:?}, changes: {changes:?})");

                if let Some(delayed) = self.take_delayed_until_block(block_root) {
                    debug!("retrying objects delayed until block {block_root:?}");
                    self.retry_delayed(delayed, wait_group);
                }

                return Ok(());
            }
            Err(error) => error,
        };

        match error.downcast_ref::<StoreError>().copied() {
            Some(StoreError::UnknownParent { parent_root, .. }) => {
                if chain_link.slot.saturating_sub(1) <= self.store.finalized_slot() {
                    debug!("block ignored because its parent would be finalized: {pending_block:?}");
                } else {
                    debug!("block delayed until parent: {pending_block:?}");

                    self.delayed_until_block
                        .entry(parent_root)
                        .or_default()
                        .blocks
                        .push(pending_block);
                }
            }
            Some(StoreError::BlockFromFuture { block_slot, .. }) => {
                debug!("block delayed until slot: {pending_block:?}");

                self.delayed_until_slot
                    .entry(block_slot)
                    .or_default()
                    .blocks
                    .push(pending_block);
            }
            Some(StoreError::DuplicateBlock { .. }) => {
                debug!("block ignored because it is already known: {block_root:?}");
            }
            _ => return report_rejection(error, "block", &chain_link),
        }

        Ok(())
    }

    fn handle_attestation(&mut self, attestation: ValidAttestation) -> Result<()> {
        let error = match self.store_mut().apply_attestation(&attestation) {
            Ok(()) => {
                debug!("attestation accepted: {attestation:?}");
                return Ok(());
            }
            Err(error) => error,
        };

        match error.downcast_ref::<StoreError>().copied() {
            Some(StoreError::AttestationForUnknownBlock { block_root }) => {
                debug!("attestation delayed until block: {attestation:?}");

                self.delayed_until_block
                    .entry(block_root)
                    .or_default()
                    .attestations
                    .push(attestation);
            }
            Some(StoreError::AttestationFromCurrentSlot {
                attestation_slot, ..
            }) => {
                debug!("attestation delayed until slot: {attestation:?}");

                self.delayed_until_slot
                    .entry(attestation_slot.saturating_add(1))
                    .or_default()
                    .attestations
                    .push(attestation);
            }
            _ => return report_rejection(error, "attestation", &attestation),
        }

        Ok(())
    }

    // The whole batch is rejected if any attestation in it cannot be applied.
    // Falling back to applying them one by one lets the others through and delays the ones that
    // can be retried.
    fn handle_attestation_batch(&mut self, attestations: Vec<ValidAttestation>) -> Result<()> {
        let Err(error) = self.store_mut().apply_attestation_batch(&attestations) else {
            debug!("attestation batch accepted ({} attestations)", attestations.len());
            return Ok(());
        };

        debug!("attestation batch rejected, applying attestations individually (error: {error})");

        for attestation in attestations {
            self.handle_attestation(attestation)?;
        }

        Ok(())
    }

    fn handle_attester_slashing(&mut self, validator_indices: &[ValidatorIndex]) -> Result<()> {
        match self
            .store_mut()
            .apply_attester_slashing(validator_indices.iter().copied())
        {
            Ok(newly_equivocating) => {
                debug!(
                    "attester slashing accepted \
                     (validator_indices: {validator_indices:?}, newly equivocating: {newly_equivocating})",
                );

                Ok(())
            }
            Err(error) => report_rejection(error, "attester slashing", &validator_indices),
        }
    }

    fn handle_justified_balances(&mut self, balances: Arc<[Gwei]>) {
        debug!("justified balances updated ({} validators)", balances.len());
        self.store_mut().set_justified_balances(balances);
    }

    fn handle_prune(&mut self, root: H256) -> Result<()> {
        match self.store_mut().prune(root) {
            Ok(removed) => {
                self.notify_about_pruning(root, removed);
                Ok(())
            }
            Err(error) => report_rejection(error, "prune request", &root),
        }
    }

    fn handle_prune_finalized(&mut self) -> Result<()> {
        let root = self.store.finalized_checkpoint().root;

        match self.store_mut().prune_finalized() {
            Ok(Some(removed)) => self.notify_about_pruning(root, removed),
            Ok(None) => debug!("too few blocks precede the finalized block to prune"),
            Err(error) => return report_rejection(error, "prune request", &root),
        }

        Ok(())
    }

    fn finish_mutation(&mut self, old_store: &Arc<Store<P>>) {
        // `Arc::make_mut` was never called, so nothing could have changed.
        if Arc::ptr_eq(&self.store, old_store) {
            return;
        }

        let tick = self.store.tick();

        // `Store::get_head` leaves the store unchanged on failure.
        // The old head is still consistent with everything else in that case.
        if let Err(error) = self.store_mut().get_head(tick) {
            error!("computing head failed: {error:?}");
        }

        if self.store.finalized_checkpoint() != old_store.finalized_checkpoint() {
            self.prune_delayed_until_block();
        }

        self.update_store_snapshot();
        self.notify_about_changes(old_store);
    }

    fn notify_about_changes(&self, old_store: &Store<P>) {
        let justified_checkpoint = self.store.justified_checkpoint();
        let finalized_checkpoint = self.store.finalized_checkpoint();
        let old_head = old_store.head();
        let new_head = self.store.head();

        if justified_checkpoint != old_store.justified_checkpoint() {
            Event::JustifiedCheckpoint(justified_checkpoint).send(&self.event_tx);
        }

        if finalized_checkpoint != old_store.finalized_checkpoint() {
            info!(
                "new finalized checkpoint (epoch: {}, root: {:?}, head root: {new_head:?})",
                finalized_checkpoint.epoch, finalized_checkpoint.root,
            );

            Event::FinalizedCheckpoint(finalized_checkpoint).send(&self.event_tx);
        }

        if new_head == old_head {
            return;
        }

        match HeadEvent::new(&self.store) {
            Ok(event) => Event::Head(event).send(&self.event_tx),
            Err(error) => warn!("{error:#}"),
        }

        if !self.store.is_descendant(old_head, new_head) {
            info!("chain reorganized (old head: {old_head:?}, new head: {new_head:?})");

            match ChainReorgEvent::new(old_store, &self.store) {
                Ok(event) => Event::ChainReorg(event).send(&self.event_tx),
                Err(error) => warn!("{error:#}"),
            }
        }
    }

    fn notify_about_pruning(&self, root: H256, removed: Vec<H256>) {
        Event::Pruned(PrunedEvent { root, removed }).send(&self.event_tx);
    }

    fn take_delayed_until_block(&mut self, block_root: H256) -> Option<Delayed> {
        self.delayed_until_block.remove(&block_root)
    }

    fn take_delayed_until_slot(&mut self, slot: Slot) -> impl Iterator<Item = Delayed> {
        match slot.checked_add(1) {
            Some(next_slot) => {
                let later = self.delayed_until_slot.split_off(&next_slot);
                core::mem::replace(&mut self.delayed_until_slot, later)
            }
            None => core::mem::take(&mut self.delayed_until_slot),
        }
        .into_values()
    }

    // `wait_group` is a reference because the value must not be dropped before the current message
    // is handled. Retried objects are sent with clones of it.
    fn retry_delayed(&self, delayed: Delayed, wait_group: &W) {
        let Delayed {
            blocks,
            attestations,
        } = delayed;

        for PendingBlock {
            chain_link,
            is_timely,
        } in blocks
        {
            debug!("retrying delayed block: {:?}", chain_link.block_root);

            MutatorMessage::Block {
                wait_group: wait_group.clone(),
                chain_link,
                is_timely,
            }
            .send(&self.mutator_tx);
        }

        for attestation in attestations {
            debug!("retrying delayed attestation: {attestation:?}");

            MutatorMessage::Attestation {
                wait_group: wait_group.clone(),
                attestation,
            }
            .send(&self.mutator_tx);
        }
    }

    fn prune_delayed_until_block(&mut self) {
        let finalized_slot = self.store.finalized_slot();
        let previous_epoch = self.store.previous_epoch();

        self.delayed_until_block.retain(|_, delayed| {
            delayed.prune(finalized_slot, previous_epoch);
            !delayed.is_empty()
        });
    }

    fn update_store_snapshot(&self) {
        // `ArcSwap::rcu` is not necessary here because there is only one thread mutating the store.
        self.store_snapshot.store(self.owned_store());
    }

    fn store_mut(&mut self) -> &mut Store<P> {
        Arc::make_mut(&mut self.store)
    }

    fn owned_store(&self) -> Arc<Store<P>> {
        Arc::clone(&self.store)
    }
}

// Rejections are expected in normal operation and are logged without failing the mutator.
// Errors that did not come from the store are propagated and stop the mutator thread.
fn report_rejection(error: anyhow::Error, kind: &str, object: &impl Debug) -> Result<()> {
    let Some(store_error) = error.downcast_ref::<StoreError>() else {
        return Err(error);
    };

    if store_error.is_structural() {
        error!("{kind} rejected (error: {store_error}, {kind}: {object:?})");
    } else {
        warn!("{kind} rejected (error: {store_error}, {kind}: {object:?})");
    }

    Ok(())
}
