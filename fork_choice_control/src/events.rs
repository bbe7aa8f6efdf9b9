use anyhow::Result;
use fork_choice_store::{Error as StoreError, Store};
use helper_functions::misc;
use log::debug;
use serde::Serialize;
use strum::AsRefStr;
use types::{
    phase0::{
        containers::Checkpoint,
        primitives::{Epoch, Slot, H256},
    },
    preset::Preset,
};

use crate::unbounded_sink::UnboundedSink;

#[derive(Clone, Copy, PartialEq, Eq, Debug, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Topic {
    ChainReorg,
    FinalizedCheckpoint,
    Head,
    JustifiedCheckpoint,
    Pruned,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Event {
    ChainReorg(ChainReorgEvent),
    FinalizedCheckpoint(Checkpoint),
    Head(HeadEvent),
    JustifiedCheckpoint(Checkpoint),
    Pruned(PrunedEvent),
}

impl Event {
    pub(crate) fn send(self, tx: &impl UnboundedSink<Self>) {
        if tx.unbounded_send(self).is_err() {
            debug!("send to event subscribers failed because the receiver was dropped");
        }
    }

    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::ChainReorg(_) => Topic::ChainReorg,
            Self::FinalizedCheckpoint(_) => Topic::FinalizedCheckpoint,
            Self::Head(_) => Topic::Head,
            Self::JustifiedCheckpoint(_) => Topic::JustifiedCheckpoint,
            Self::Pruned(_) => Topic::Pruned,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct HeadEvent {
    pub slot: Slot,
    pub block: H256,
    pub epoch_transition: bool,
}

impl HeadEvent {
    pub(crate) fn new<P: Preset>(store: &Store<P>) -> Result<Self> {
        let block = store.head();
        let slot = head_slot(store)?;

        Ok(Self {
            slot,
            block,
            epoch_transition: misc::is_epoch_start::<P>(slot),
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct ChainReorgEvent {
    pub slot: Slot,
    pub depth: u64,
    pub old_head_block: H256,
    pub new_head_block: H256,
    pub epoch: Epoch,
}

impl ChainReorgEvent {
    // `depth` is the distance from the old head to the latest block shared by both chains.
    // The old head may have been pruned along with the common ancestor. `depth` defaults to the
    // distance to the old finalized slot in that case.
    pub(crate) fn new<P: Preset>(old_store: &Store<P>, new_store: &Store<P>) -> Result<Self> {
        let old_head_block = old_store.head();
        let new_head_block = new_store.head();
        let old_slot = head_slot(old_store)?;
        let new_slot = head_slot(new_store)?;

        let depth = new_store
            .common_ancestor(old_head_block, new_head_block)
            .map(|node| node.slot)
            .unwrap_or_else(|| old_store.finalized_slot())
            .abs_diff(old_slot);

        Ok(Self {
            slot: new_slot,
            depth,
            old_head_block,
            new_head_block,
            epoch: misc::compute_epoch_at_slot::<P>(new_slot),
        })
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct PrunedEvent {
    pub root: H256,
    pub removed: Vec<H256>,
}

fn head_slot<P: Preset>(store: &Store<P>) -> Result<Slot> {
    let root = store.head();
    let node = store.node(root).ok_or(StoreError::UnknownBlockRoot { root })?;
    Ok(node.slot)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn topics_use_snake_case() {
        let event = Event::JustifiedCheckpoint(Checkpoint::default());

        assert_eq!(event.topic().as_ref(), "justified_checkpoint");
        assert_eq!(Topic::ChainReorg.as_ref(), "chain_reorg");
    }

    #[test]
    fn head_event_serializes_root_as_hex() -> Result<()> {
        let event = HeadEvent {
            slot: 8,
            block: H256::repeat_byte(0xb),
            epoch_transition: true,
        };

        assert_eq!(
            serde_json::to_value(event)?,
            json!({
                "slot": 8,
                "block": H256::repeat_byte(0xb),
                "epoch_transition": true,
            }),
        );

        Ok(())
    }
}
