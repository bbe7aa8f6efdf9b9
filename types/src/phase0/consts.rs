use core::num::NonZeroU64;

use nonzero_ext::nonzero;

use crate::phase0::primitives::{Epoch, Slot};

pub const GENESIS_EPOCH: Epoch = 0;
pub const GENESIS_SLOT: Slot = 0;

/// Number of fork choice intervals in a slot.
///
/// Blocks are proposed in the first one, attestations are published at the start of the second
/// one and aggregates at the start of the third one.
pub const INTERVALS_PER_SLOT: NonZeroU64 = nonzero!(3_u64);
