//! Implementation of [Beacon Chain Fork Choice] based on [`proto_array`].
//!
//! Unfinalized blocks are stored in a [`ProtoArray`], a flat vector in which every block comes
//! after its parent. Each node carries the cumulative weight of its subtree along with its best
//! child and best descendant, so finding the head is a constant time lookup once weights are up
//! to date.
//!
//! Votes are not applied as they arrive. Each validator's latest message is staged in [`Votes`]
//! and moved into the tree by [`Store::get_head`], which turns the changes since the last call
//! into a vector of weight differences and applies it in a single pass over the array.
//!
//! Proposer boost is never stored in weights. It is added to a throwaway copy of the tree while
//! computing the head.
//!
//! Block and attestation processing validate everything before mutating anything.
//! Every method of [`Store`] that returns an error leaves the store unchanged.
//!
//! This implementation makes use of persistent data structures, but they are not required for the
//! algorithm to work. They're only used to make snapshots cheap.
//!
//! Blocks are only pruned when explicitly requested, either with [`Store::prune`] or with
//! [`Store::prune_finalized`] once enough blocks precede the finalized one.
//!
//! [Beacon Chain Fork Choice]: https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md
//! [`proto_array`]: https://github.com/protolambda/lmd-ghost#array-based-stateful-dag-proto_array

pub use crate::{
    error::Error,
    misc::{
        AnchorBlock, ApplyBlockChanges, ApplyTickChanges, ChainLink, Difference, ValidAttestation,
    },
    proto_array::{ProtoArray, ProtoNode, Viability},
    store::Store,
    store_config::{
        ProposerBoost, StoreConfig, DEFAULT_PRUNE_THRESHOLD, DEFAULT_VALIDATOR_LIMIT,
    },
    votes::{VoteTracker, Votes},
};

mod error;
mod misc;
mod proto_array;
mod store;
mod store_config;
mod votes;
