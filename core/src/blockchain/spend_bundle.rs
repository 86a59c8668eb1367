use crate::blockchain::coin::Coin;
use crate::blockchain::coin_spend::CoinSpend;
use crate::blockchain::sized_bytes::{Bytes32, Bytes96};
use crate::bls::{aggregate_signatures, INFINITY_SIGNATURE};
use crate::utils::Hashable;
use dg_node_macros::Streamable;
use serde::{Deserialize, Serialize};
use std::io::Error;

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct SpendBundle {
    pub coin_spends: Vec<CoinSpend>,
    pub aggregated_signature: Bytes96,
}
impl Default for SpendBundle {
    fn default() -> Self {
        Self {
            coin_spends: vec![],
            aggregated_signature: INFINITY_SIGNATURE,
        }
    }
}
impl SpendBundle {
    /// Depends on the order of `coin_spends`.
    #[must_use]
    pub fn name(&self) -> Bytes32 {
        self.get_hash()
    }

    /// Concatenates spends in argument order and aggregates the signatures.
    pub fn aggregate(bundles: &[SpendBundle]) -> Result<SpendBundle, Error> {
        let mut coin_spends = vec![];
        let mut signatures = vec![];
        for bundle in bundles {
            coin_spends.extend(bundle.coin_spends.iter().cloned());
            signatures.push(bundle.aggregated_signature);
        }
        Ok(SpendBundle {
            coin_spends,
            aggregated_signature: aggregate_signatures(&signatures)?,
        })
    }

    #[must_use]
    pub fn removals(&self) -> Vec<Coin> {
        self.coin_spends.iter().map(|cs| cs.coin).collect()
    }

    #[must_use]
    pub fn removal_names(&self) -> Vec<Bytes32> {
        self.coin_spends.iter().map(|cs| cs.coin.name()).collect()
    }
}
