use crate::blockchain::coin::{hash_coin_ids, Coin};
use crate::blockchain::sized_bytes::Bytes32;
use crate::utils::std_hash;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Root over the sorted, deduplicated leaves. An odd node is carried up unchanged
/// and the empty set has the zero root.
#[must_use]
pub fn merkle_root(leaves: &[Bytes32]) -> Bytes32 {
    let mut level: Vec<Bytes32> = leaves
        .iter()
        .copied()
        .collect::<BTreeSet<Bytes32>>()
        .into_iter()
        .collect();
    if level.is_empty() {
        return Bytes32::default();
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    let mut hasher = Sha256::new();
                    hasher.update(left);
                    hasher.update(right);
                    Bytes32::new(hasher.finalize().into())
                }
                [single] => *single,
                _ => Bytes32::default(),
            })
            .collect();
    }
    level[0]
}

/// Additions are committed as a puzzle hash leaf followed by the hash of the
/// coin ids created for that puzzle hash.
#[must_use]
pub fn additions_root(additions: &[Coin]) -> Bytes32 {
    let mut by_puzzle_hash: BTreeMap<Bytes32, Vec<Bytes32>> = BTreeMap::new();
    for coin in additions {
        by_puzzle_hash
            .entry(coin.puzzle_hash)
            .or_default()
            .push(coin.name());
    }
    let mut leaves = Vec::with_capacity(by_puzzle_hash.len() * 2);
    for (puzzle_hash, ids) in by_puzzle_hash {
        leaves.push(puzzle_hash);
        leaves.push(hash_coin_ids(&ids));
    }
    merkle_root(&leaves)
}

#[must_use]
pub fn removals_root(removal_ids: &[Bytes32]) -> Bytes32 {
    merkle_root(removal_ids)
}

/// Commitment to every puzzle hash and removal id a light client may query.
#[must_use]
pub fn transactions_filter_hash(additions: &[Coin], removal_ids: &[Bytes32]) -> Bytes32 {
    let items: BTreeSet<Bytes32> = additions
        .iter()
        .map(|c| c.puzzle_hash)
        .chain(removal_ids.iter().copied())
        .collect();
    let mut buf = Vec::with_capacity(items.len() * 32);
    for item in items {
        buf.extend_from_slice(item.as_ref());
    }
    std_hash(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merkle_root_is_order_independent() {
        let a = Bytes32::new([1u8; 32]);
        let b = Bytes32::new([2u8; 32]);
        let c = Bytes32::new([3u8; 32]);
        assert_eq!(merkle_root(&[]), Bytes32::default());
        assert_eq!(merkle_root(&[a]), a);
        assert_eq!(merkle_root(&[c, a, b]), merkle_root(&[a, b, c, a]));
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[a, c]));
        let coins = vec![
            Coin::new(a, b, 1),
            Coin::new(a, b, 2),
            Coin::new(b, c, 1),
        ];
        let mut reversed = coins.clone();
        reversed.reverse();
        assert_eq!(additions_root(&coins), additions_root(&reversed));
        assert_eq!(
            transactions_filter_hash(&coins, &[a]),
            transactions_filter_hash(&reversed, &[a, a])
        );
    }
}
