//! Points in time as seen by fork choice.
//!
//! Slots are divided into [`INTERVALS_PER_SLOT`] intervals of equal length.
//! A [`Tick`] identifies the start of one of them. Ticks are totally ordered,
//! which lets the store reject regressions with a single comparison.
//!
//! [`INTERVALS_PER_SLOT`]: types::phase0::consts::INTERVALS_PER_SLOT

use core::time::Duration;

use anyhow::Result;
use enum_iterator::Sequence;
use helper_functions::misc;
use serde::{Deserialize, Serialize};
use strum::AsRefStr;
use thiserror::Error;
use types::{
    config::Config,
    phase0::{
        consts::GENESIS_SLOT,
        primitives::{Epoch, Slot, UnixSeconds},
    },
    preset::Preset,
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Deserialize, Serialize)]
pub struct Tick {
    pub slot: Slot,
    pub kind: TickKind,
}

impl Tick {
    #[must_use]
    pub const fn new(slot: Slot, kind: TickKind) -> Self {
        Self { slot, kind }
    }

    #[must_use]
    pub const fn start_of_slot(slot: Slot) -> Self {
        Self::new(slot, TickKind::Propose)
    }

    pub fn at_time<P: Preset>(
        config: &Config,
        time: UnixSeconds,
        genesis_time: UnixSeconds,
    ) -> Result<Self> {
        let duration_since_unix_epoch = Duration::from_secs(time);
        Self::from_duration::<P>(config, duration_since_unix_epoch, genesis_time)
    }

    #[must_use]
    pub fn epoch<P: Preset>(self) -> Epoch {
        misc::compute_epoch_at_slot::<P>(self.slot)
    }

    #[must_use]
    pub const fn is_before_attesting_interval(self) -> bool {
        matches!(self.kind, TickKind::Propose)
    }

    #[must_use]
    pub const fn is_start_of_slot(self) -> bool {
        matches!(self.kind, TickKind::Propose)
    }

    #[must_use]
    pub fn is_start_of_epoch<P: Preset>(self) -> bool {
        misc::is_epoch_start::<P>(self.slot) && self.is_start_of_slot()
    }

    pub fn next(self) -> Result<Self> {
        let Self { slot, kind } = self;

        let next = match kind.next() {
            Some(next_kind) => Self::new(slot, next_kind),
            None => Self::start_of_slot(slot.checked_add(1).ok_or(ClockError::RanOutOfSlots)?),
        };

        Ok(next)
    }

    fn from_duration<P: Preset>(
        config: &Config,
        duration_since_unix_epoch: Duration,
        genesis_time: UnixSeconds,
    ) -> Result<Self> {
        let unix_epoch_to_genesis = Duration::from_secs(genesis_time);

        // `Duration` does not implement `Div<Duration>` or `Rem<Duration>`,
        // so we have to do arithmetic on nanoseconds.
        let nanos_since_genesis = duration_since_unix_epoch
            .saturating_sub(unix_epoch_to_genesis)
            .as_nanos();

        let nanos_per_slot = config.slot_duration().as_nanos();
        let slots_since_genesis = u64::try_from(nanos_since_genesis / nanos_per_slot)?;
        let slot = GENESIS_SLOT + slots_since_genesis;

        let nanos_since_slot_start = nanos_since_genesis % nanos_per_slot;
        let nanos_per_interval = config.interval_duration().as_nanos();
        let intervals_since_slot = usize::try_from(nanos_since_slot_start / nanos_per_interval)?;

        // Rounding in `Config::interval_duration` may leave a sliver at the end of the slot.
        let kind = enum_iterator::all::<TickKind>()
            .nth(intervals_since_slot)
            .or_else(enum_iterator::last)
            .ok_or(ClockError::NoTickKinds)?;

        Ok(Self::new(slot, kind))
    }
}

#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Sequence,
    AsRefStr,
    Deserialize,
    Serialize,
)]
pub enum TickKind {
    Propose,
    Attest,
    Aggregate,
}

#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum ClockError {
    #[error("ran out of slots")]
    RanOutOfSlots,
    #[error("tick kind enumeration is empty")]
    NoTickKinds,
}
