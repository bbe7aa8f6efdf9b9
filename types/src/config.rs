use core::{num::NonZeroU64, time::Duration};
use std::borrow::Cow;

use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};

use crate::{phase0::consts::INTERVALS_PER_SLOT, preset::PresetName};

/// Configuration variables customizable at runtime.
///
/// See [configurations in `consensus-specs`](https://github.com/ethereum/consensus-specs/tree/aac851f860fa384916f62027b2dbe3318a354c5b/configs).
///
/// Only the variables used by fork choice are present.
/// Loading configurations from files is left to the application.
#[expect(
    clippy::unsafe_derive_deserialize,
    reason = "A false positive triggered by `nonzero!`. \
             `Config` has no invariants. It is intended to be deserialized from user input. \
              The `unsafe` block in `nonzero!` only operates on the literal passed to it."
)]
#[expect(
    clippy::struct_field_names,
    reason = "struct_field_name is allowed to have config_name, as it starts with the same name as struct"
)]
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    // Meta
    pub config_name: Cow<'static, str>,
    pub preset_base: PresetName,

    // Time parameters
    pub seconds_per_slot: NonZeroU64,

    // Fork choice
    pub proposer_score_boost: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl Config {
    #[must_use]
    pub const fn mainnet() -> Self {
        Self {
            config_name: Cow::Borrowed("mainnet"),
            preset_base: PresetName::Mainnet,
            seconds_per_slot: nonzero!(12_u64),
            proposer_score_boost: 40,
        }
    }

    #[must_use]
    pub const fn minimal() -> Self {
        Self {
            config_name: Cow::Borrowed("minimal"),
            preset_base: PresetName::Minimal,
            seconds_per_slot: nonzero!(6_u64),
            proposer_score_boost: 40,
        }
    }

    #[must_use]
    pub const fn slot_duration(&self) -> Duration {
        Duration::from_secs(self.seconds_per_slot.get())
    }

    #[must_use]
    pub const fn interval_duration(&self) -> Duration {
        let slot_millis = self.seconds_per_slot.get().saturating_mul(1000);
        Duration::from_millis(slot_millis / INTERVALS_PER_SLOT.get())
    }
}
