use blst::min_pk::SecretKey;
use dg_node_core::blockchain::proof_of_space::calculate_plot_id_puzzle_hash;
use dg_node_core::blockchain::sized_bytes::{Bytes32, Bytes48};
use sha2::{Digest, Sha256};
use std::io::{Error, ErrorKind};

pub const PLOT_SIZE: u8 = 18;

/// Secret key derived from `seed` and `index`, the same inputs always give the same key.
pub fn derive_secret_key(seed: &[u8], index: u32) -> Result<SecretKey, Error> {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(index.to_be_bytes());
    let ikm: [u8; 32] = hasher.finalize().into();
    SecretKey::key_gen(&ikm, &[]).map_err(|e| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("Failed to derive key {index}: {e:?}"),
        )
    })
}

/// A pooled plot: its id commits to the pool contract instead of a pool key.
pub struct SimulatedPlot {
    pub secret_key: SecretKey,
    pub public_key: Bytes48,
    pub pool_contract_puzzle_hash: Bytes32,
    pub plot_id: Bytes32,
    pub size: u8,
}
impl SimulatedPlot {
    pub fn new(seed: &[u8], index: u32, pool_contract_puzzle_hash: Bytes32) -> Result<Self, Error> {
        let secret_key = derive_secret_key(seed, index)?;
        let public_key = Bytes48::from(&secret_key.sk_to_pk());
        Ok(Self {
            plot_id: calculate_plot_id_puzzle_hash(&pool_contract_puzzle_hash, &public_key),
            secret_key,
            public_key,
            pool_contract_puzzle_hash,
            size: PLOT_SIZE,
        })
    }
}

pub fn create_plots(
    seed: &[u8],
    count: u32,
    pool_contract_puzzle_hash: Bytes32,
) -> Result<Vec<SimulatedPlot>, Error> {
    (0..count)
        .map(|index| SimulatedPlot::new(seed, index, pool_contract_puzzle_hash))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plots_are_deterministic_and_distinct() {
        let contract = Bytes32::new([9u8; 32]);
        let first = create_plots(b"plots", 3, contract).unwrap();
        let second = create_plots(b"plots", 3, contract).unwrap();
        assert_eq!(first[1].plot_id, second[1].plot_id);
        assert_ne!(first[0].plot_id, first[1].plot_id);
        assert_ne!(first[0].public_key, first[2].public_key);
    }
}
