use core::{fmt::Debug, hash::Hash};

use serde::{Deserialize, Serialize};
use typenum::{NonZero, Unsigned, U32, U8};

/// Compile-time configuration variables.
///
/// Only the variables used by fork choice are present.
/// See [presets in `consensus-specs`](https://github.com/ethereum/consensus-specs/tree/aac851f860fa384916f62027b2dbe3318a354c5b/presets).
pub trait Preset: Copy + Eq + Ord + Hash + Default + Debug + Send + Sync + 'static {
    type SlotsPerEpoch: Unsigned + NonZero;

    const NAME: PresetName;
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct Mainnet;

impl Preset for Mainnet {
    type SlotsPerEpoch = U32;

    const NAME: PresetName = PresetName::Mainnet;
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct Minimal;

impl Preset for Minimal {
    type SlotsPerEpoch = U8;

    const NAME: PresetName = PresetName::Minimal;
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetName {
    #[default]
    Mainnet,
    Minimal,
}
