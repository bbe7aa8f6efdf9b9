//! Array-based DAG of unfinalized blocks.
//!
//! Nodes are appended after their parents, so a node's index is always greater than the index of
//! its parent. Iterating in reverse index order visits every child before its parent, which is
//! what lets weight changes and best descendants be propagated in a single pass.
//!
//! Nodes refer to each other by index. Indices stay valid until [`ProtoArray::prune`] compacts
//! the array. Everything outside this module refers to blocks by root.

use std::collections::HashSet;

use anyhow::{ensure, Result};
use im::{HashMap, Vector};
use types::phase0::{
    consts::GENESIS_EPOCH,
    containers::Checkpoint,
    primitives::{Epoch, Gwei, Slot, H256},
};

use crate::{
    error::Error,
    misc::{ChainLink, Difference},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ProtoNode {
    pub root: H256,
    pub parent: Option<usize>,
    pub slot: Slot,
    pub justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    pub unrealized_justified_checkpoint: Checkpoint,
    pub unrealized_finalized_checkpoint: Checkpoint,
    pub weight: Gwei,
    pub best_child: Option<usize>,
    pub best_descendant: Option<usize>,
}

/// Store state that determines which nodes may become the head.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Viability {
    pub justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    pub finalized_slot: Slot,
    pub current_epoch: Epoch,
    pub current_epoch_start_slot: Slot,
}

#[derive(Clone, Default, Debug)]
pub struct ProtoArray {
    nodes: Vector<ProtoNode>,
    indices: HashMap<H256, usize>,
}

impl ProtoArray {
    #[must_use]
    pub fn new(anchor_root: H256, anchor_slot: Slot, anchor_checkpoint: Checkpoint) -> Self {
        let anchor = ProtoNode {
            root: anchor_root,
            parent: None,
            slot: anchor_slot,
            justified_checkpoint: anchor_checkpoint,
            finalized_checkpoint: anchor_checkpoint,
            unrealized_justified_checkpoint: anchor_checkpoint,
            unrealized_finalized_checkpoint: anchor_checkpoint,
            weight: 0,
            best_child: None,
            best_descendant: None,
        };

        Self {
            nodes: im::vector![anchor],
            indices: im::hashmap! { anchor_root => 0 },
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn contains(&self, root: H256) -> bool {
        self.indices.contains_key(&root)
    }

    #[must_use]
    pub fn index_of(&self, root: H256) -> Option<usize> {
        self.indices.get(&root).copied()
    }

    #[must_use]
    pub fn node(&self, root: H256) -> Option<&ProtoNode> {
        self.nodes.get(self.index_of(root)?)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProtoNode> {
        self.nodes.iter()
    }

    pub fn insert(&mut self, chain_link: ChainLink) -> Result<usize> {
        let ChainLink {
            block_root,
            parent_root,
            slot,
            justified_checkpoint,
            finalized_checkpoint,
            unrealized_justified_checkpoint,
            unrealized_finalized_checkpoint,
        } = chain_link;

        ensure!(
            !self.contains(block_root),
            Error::DuplicateBlock { block_root },
        );

        let parent_index = self.index_of(parent_root).ok_or(Error::UnknownParent {
            block_root,
            parent_root,
        })?;

        let parent_slot = self.node_at(parent_index)?.slot;

        ensure!(
            parent_slot < slot,
            Error::InvalidSlotOrdering {
                block_root,
                block_slot: slot,
                parent_slot,
            },
        );

        let index = self.nodes.len();

        self.nodes.push_back(ProtoNode {
            root: block_root,
            parent: Some(parent_index),
            slot,
            justified_checkpoint,
            finalized_checkpoint,
            unrealized_justified_checkpoint,
            unrealized_finalized_checkpoint,
            weight: 0,
            best_child: None,
            best_descendant: None,
        });

        self.indices.insert(block_root, index);

        Ok(index)
    }

    /// Adds `deltas[index]` to the weight of the node at `index` and all of its ancestors,
    /// then recomputes best children and best descendants of every node.
    ///
    /// The array is left unchanged if this fails.
    pub fn apply_weight_deltas(&mut self, deltas: &[Difference], viability: &Viability) -> Result<()> {
        ensure!(
            deltas.len() == self.nodes.len(),
            Error::InvalidDeltaCount {
                expected: self.nodes.len(),
                actual: deltas.len(),
            },
        );

        let mut next = self.clone();
        let mut deltas = deltas.to_vec();

        for index in (0..next.nodes.len()).rev() {
            let delta = deltas[index];
            let node = &mut next.nodes[index];

            if delta != 0 {
                let root = node.root;

                node.weight = node.weight.checked_add_signed(delta).ok_or(if delta < 0 {
                    Error::WeightUnderflow { root }
                } else {
                    Error::WeightOverflow { root }
                })?;
            }

            if let Some(parent_index) = node.parent {
                let root = node.root;

                let parent_delta = deltas
                    .get_mut(parent_index)
                    .ok_or(Error::InvalidNodeIndex {
                        index: parent_index,
                    })?;

                *parent_delta = parent_delta
                    .checked_add(delta)
                    .ok_or(Error::DeltaOverflow { root })?;
            }
        }

        for index in (0..next.nodes.len()).rev() {
            if let Some(parent_index) = next.nodes[index].parent {
                next.maybe_update_best_child_and_descendant(parent_index, index, viability)?;
            }
        }

        *self = next;

        Ok(())
    }

    /// Returns the root of the best viable descendant of `justified_root`.
    ///
    /// Falls back to `justified_root` itself when no descendant is viable.
    pub fn find_head(&self, justified_root: H256, viability: &Viability) -> Result<H256> {
        let justified_index = self
            .index_of(justified_root)
            .ok_or(Error::UnknownBlockRoot {
                root: justified_root,
            })?;

        let justified_node = self.node_at(justified_index)?;
        let best_index = justified_node.best_descendant.unwrap_or(justified_index);
        let best_node = self.node_at(best_index)?;

        if self.is_viable_for_head(best_node, viability) {
            Ok(best_node.root)
        } else {
            Ok(justified_root)
        }
    }

    /// Removes every node that is not `new_root` or one of its descendants.
    ///
    /// Returns the roots of the removed nodes in their original order.
    pub fn prune(&mut self, new_root: H256) -> Result<Vec<H256>> {
        let new_root_index = self
            .index_of(new_root)
            .ok_or(Error::PruneUnknownRoot { root: new_root })?;

        // Maps old indices to new ones. `None` marks removed nodes.
        let mut new_indices = vec![None; self.nodes.len()];
        let mut kept_count = 0;
        let mut removed = vec![];

        for (old_index, node) in self.nodes.iter().enumerate() {
            let is_kept = old_index == new_root_index
                || (old_index > new_root_index
                    && node
                        .parent
                        .is_some_and(|parent_index| new_indices[parent_index].is_some()));

            if is_kept {
                new_indices[old_index] = Some(kept_count);
                kept_count += 1;
            } else {
                removed.push(node.root);
            }
        }

        // Descendants of kept nodes are kept, so best children and best descendants of kept
        // nodes always have new indices.
        let nodes = self
            .nodes
            .iter()
            .zip(&new_indices)
            .filter(|(_, new_index)| new_index.is_some())
            .map(|(node, _)| ProtoNode {
                parent: node.parent.and_then(|index| new_indices[index]),
                best_child: node.best_child.and_then(|index| new_indices[index]),
                best_descendant: node.best_descendant.and_then(|index| new_indices[index]),
                ..*node
            })
            .collect::<Vector<_>>();

        let indices = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.root, index))
            .collect();

        self.nodes = nodes;
        self.indices = indices;

        Ok(removed)
    }

    /// Returns the root of the latest block at or before `slot` in the chain ending with `root`.
    ///
    /// Returns `None` if `root` is unknown or the chain was pruned past `slot`.
    #[must_use]
    pub fn ancestor_at_slot(&self, root: H256, slot: Slot) -> Option<H256> {
        let mut node = self.node(root)?;

        loop {
            if node.slot <= slot {
                return Some(node.root);
            }

            node = self.nodes.get(node.parent?)?;
        }
    }

    /// Whether `descendant_root` is `ancestor_root` or one of its descendants.
    #[must_use]
    pub fn is_descendant(&self, ancestor_root: H256, descendant_root: H256) -> bool {
        self.node(ancestor_root).is_some_and(|ancestor| {
            self.ancestor_at_slot(descendant_root, ancestor.slot) == Some(ancestor_root)
        })
    }

    /// Returns the latest block that both `root_a` and `root_b` descend from.
    #[must_use]
    pub fn common_ancestor(&self, root_a: H256, root_b: H256) -> Option<&ProtoNode> {
        let mut node = self.node(root_a)?;

        loop {
            if self.is_descendant(node.root, root_b) {
                return Some(node);
            }

            node = self.nodes.get(node.parent?)?;
        }
    }

    /// Returns nodes without children in index order.
    pub fn leaves(&self) -> impl Iterator<Item = &ProtoNode> {
        let parents = self
            .nodes
            .iter()
            .filter_map(|node| node.parent)
            .collect::<HashSet<_>>();

        self.nodes
            .iter()
            .enumerate()
            .filter(move |(index, _)| !parents.contains(index))
            .map(|(_, node)| node)
    }

    #[must_use]
    pub fn is_finalized_checkpoint_or_descendant(
        &self,
        root: H256,
        finalized_checkpoint: Checkpoint,
        finalized_slot: Slot,
    ) -> bool {
        if finalized_checkpoint.epoch == GENESIS_EPOCH {
            return true;
        }

        // Only descendants of the finalized block survive pruning past it.
        if !self.contains(finalized_checkpoint.root) {
            return true;
        }

        let Some(node) = self.node(root) else {
            return false;
        };

        let node_checkpoints = [
            node.justified_checkpoint,
            node.finalized_checkpoint,
            node.unrealized_justified_checkpoint,
            node.unrealized_finalized_checkpoint,
        ];

        if node_checkpoints.contains(&finalized_checkpoint) {
            return true;
        }

        self.ancestor_at_slot(root, finalized_slot) == Some(finalized_checkpoint.root)
    }

    /// [`filter_block_tree`] condition for a single node.
    ///
    /// [`filter_block_tree`]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#filter_block_tree
    #[must_use]
    pub fn is_viable_for_head(&self, node: &ProtoNode, viability: &Viability) -> bool {
        let Viability {
            justified_checkpoint,
            finalized_checkpoint,
            finalized_slot,
            current_epoch,
            current_epoch_start_slot,
        } = *viability;

        // > If the block is from a prior epoch, the voting source will be pulled-up
        let voting_source = if node.slot < current_epoch_start_slot {
            node.unrealized_justified_checkpoint
        } else {
            node.justified_checkpoint
        };

        // > The voting source should be at the same height as the store's justified checkpoint or
        // > not more than two epochs ago
        let correct_justified = justified_checkpoint.epoch == GENESIS_EPOCH
            || voting_source.epoch == justified_checkpoint.epoch
            || voting_source.epoch.saturating_add(2) >= current_epoch;

        correct_justified
            && self.is_finalized_checkpoint_or_descendant(
                node.root,
                finalized_checkpoint,
                finalized_slot,
            )
    }

    fn node_at(&self, index: usize) -> Result<&ProtoNode> {
        self.nodes
            .get(index)
            .ok_or_else(|| Error::InvalidNodeIndex { index }.into())
    }

    fn leads_to_viable_head(&self, node: &ProtoNode, viability: &Viability) -> Result<bool> {
        let best_descendant_is_viable = match node.best_descendant {
            Some(index) => self.is_viable_for_head(self.node_at(index)?, viability),
            None => false,
        };

        Ok(best_descendant_is_viable || self.is_viable_for_head(node, viability))
    }

    fn maybe_update_best_child_and_descendant(
        &mut self,
        parent_index: usize,
        child_index: usize,
        viability: &Viability,
    ) -> Result<()> {
        let child = *self.node_at(child_index)?;
        let parent = *self.node_at(parent_index)?;

        let child_leads_to_viable_head = self.leads_to_viable_head(&child, viability)?;

        let change_to_none = (None, None);
        let change_to_child = (
            Some(child_index),
            child.best_descendant.or(Some(child_index)),
        );
        let no_change = (parent.best_child, parent.best_descendant);

        let (best_child, best_descendant) = match parent.best_child {
            Some(best_child_index) if best_child_index == child_index => {
                if child_leads_to_viable_head {
                    change_to_child
                } else {
                    change_to_none
                }
            }
            Some(best_child_index) => {
                let best_child = self.node_at(best_child_index)?;
                let best_child_leads_to_viable_head =
                    self.leads_to_viable_head(best_child, viability)?;

                match (child_leads_to_viable_head, best_child_leads_to_viable_head) {
                    (true, false) => change_to_child,
                    (false, true) => no_change,
                    // Ties are broken in favor of the lexicographically smaller root.
                    _ if child.weight == best_child.weight => {
                        if child.root < best_child.root {
                            change_to_child
                        } else {
                            no_change
                        }
                    }
                    _ if child.weight > best_child.weight => change_to_child,
                    _ => no_change,
                }
            }
            None if child_leads_to_viable_head => change_to_child,
            None => no_change,
        };

        let parent = &mut self.nodes[parent_index];

        parent.best_child = best_child;
        parent.best_descendant = best_descendant;

        Ok(())
    }
}
