use crate::blockchain::sized_bytes::Bytes32;
use crate::clvm::sexp::u64_to_atom;
use dg_node_macros::Streamable;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::hash::{Hash, Hasher};

#[derive(Streamable, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Coin {
    pub parent_coin_info: Bytes32,
    pub puzzle_hash: Bytes32,
    pub amount: u64,
}
impl Coin {
    #[must_use]
    pub fn new(parent_coin_info: Bytes32, puzzle_hash: Bytes32, amount: u64) -> Self {
        Self {
            parent_coin_info,
            puzzle_hash,
            amount,
        }
    }
    #[must_use]
    pub fn name(&self) -> Bytes32 {
        self.coin_id()
    }
    /// The amount is hashed in its CLVM integer encoding, not as a fixed width u64.
    #[must_use]
    pub fn coin_id(&self) -> Bytes32 {
        let mut hasher = Sha256::new();
        hasher.update(self.parent_coin_info);
        hasher.update(self.puzzle_hash);
        hasher.update(u64_to_atom(self.amount));
        Bytes32::new(hasher.finalize().into())
    }
}
impl Hash for Coin {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(self.name().as_ref());
    }
}

/// Hash over a set of coin ids, sorted descending, used for the additions root.
#[must_use]
pub fn hash_coin_ids(coin_ids: &[Bytes32]) -> Bytes32 {
    let mut ids = coin_ids.to_vec();
    if ids.len() == 1 {
        return Bytes32::new(Sha256::digest(ids[0]).into());
    }
    ids.sort_by(|a, b| b.cmp(a));
    let mut hasher = Sha256::new();
    for id in &ids {
        hasher.update(id);
    }
    Bytes32::new(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coin_id_amount_encoding() {
        let parent = Bytes32::new([1u8; 32]);
        let puzzle_hash = Bytes32::new([2u8; 32]);
        let coin = Coin::new(parent, puzzle_hash, 0x80);
        let mut hasher = Sha256::new();
        hasher.update(parent);
        hasher.update(puzzle_hash);
        hasher.update([0u8, 0x80]);
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(coin.name(), Bytes32::new(expected));
        let zero = Coin::new(parent, puzzle_hash, 0);
        let mut hasher = Sha256::new();
        hasher.update(parent);
        hasher.update(puzzle_hash);
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(zero.name(), Bytes32::new(expected));
    }
}
