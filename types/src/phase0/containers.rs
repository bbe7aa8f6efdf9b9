use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::phase0::primitives::{Epoch, Slot, H256};

#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Display, Deserialize, Serialize,
)]
#[display("{epoch}/{root:?}")]
#[serde(deny_unknown_fields)]
pub struct Checkpoint {
    pub epoch: Epoch,
    pub root: H256,
}

/// The parts of an attestation that matter to fork choice.
///
/// Signatures, committee membership and the source checkpoint are checked before an attestation
/// reaches the fork choice store, so they are not represented here.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AttestationData {
    pub slot: Slot,
    pub beacon_block_root: H256,
    pub target_epoch: Epoch,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn checkpoint_is_displayed_with_epoch_first() {
        let checkpoint = Checkpoint {
            epoch: 3,
            root: H256::repeat_byte(0xaa),
        };

        assert!(checkpoint.to_string().starts_with("3/0xaaaa"));
    }

    #[test]
    fn checkpoint_rejects_unknown_fields() {
        let root = H256::repeat_byte(1);

        let error = serde_json::from_value::<Checkpoint>(json!({
            "epoch": 1,
            "root": root,
            "slot": 8,
        }))
        .expect_err("unknown fields should be rejected");

        assert!(error.to_string().contains("unknown field"));
    }
}
