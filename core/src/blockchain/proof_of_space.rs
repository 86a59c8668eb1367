use crate::blockchain::sized_bytes::{hex_to_bytes, Bytes32, Bytes48};
use crate::consensus::constants::ConsensusConstants;
use crate::consensus::verifier::ProofVerifier;
use crate::utils::std_hash;
use dg_node_macros::Streamable;
use dg_node_serialize::Streamable;
use hex::encode;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::io::{Cursor, Error};

#[derive(Clone, PartialEq, Eq, Default)]
pub struct ProofBytes(pub Vec<u8>);

impl Display for ProofBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(&self.0))
    }
}
impl Debug for ProofBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(&self.0))
    }
}
impl Streamable for ProofBytes {
    fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }
    fn from_bytes<T: AsRef<[u8]>>(bytes: &mut Cursor<T>) -> Result<Self, Error> {
        Ok(Self(Vec::<u8>::from_bytes(bytes)?))
    }
}
impl Serialize for ProofBytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&encode(&self.0))
    }
}

struct ProofBytesVisitor;

impl Visitor<'_> for ProofBytesVisitor {
    type Value = ProofBytes;

    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter.write_str("Expecting a hex String")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        hex_to_bytes(value)
            .map(ProofBytes)
            .map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}
impl<'a> Deserialize<'a> for ProofBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'a>,
    {
        deserializer.deserialize_str(ProofBytesVisitor)
    }
}
impl AsRef<[u8]> for ProofBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}
impl From<Vec<u8>> for ProofBytes {
    fn from(bytes: Vec<u8>) -> ProofBytes {
        ProofBytes(bytes)
    }
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct ProofOfSpace {
    pub challenge: Bytes32,
    pub pool_public_key: Option<Bytes48>,
    pub pool_contract_puzzle_hash: Option<Bytes32>,
    pub plot_public_key: Bytes48,
    pub size: u8,
    pub proof: ProofBytes,
}
impl ProofOfSpace {
    /// `None` unless exactly one of the pool key and pool contract is set.
    #[must_use]
    pub fn get_plot_id(&self) -> Option<Bytes32> {
        match (&self.pool_public_key, &self.pool_contract_puzzle_hash) {
            (Some(pool_pk), None) => Some(calculate_plot_id_public_key(
                pool_pk,
                &self.plot_public_key,
            )),
            (None, Some(contract)) => Some(calculate_plot_id_puzzle_hash(
                contract,
                &self.plot_public_key,
            )),
            _ => None,
        }
    }

    /// Checks the proof against the expected challenge and returns its quality string.
    ///
    /// `original_challenge_hash` is the sub-slot challenge and `signage_point` the
    /// challenge chain signage point output hash the plot filter is evaluated on.
    pub fn verify_and_get_quality_string(
        &self,
        constants: &ConsensusConstants,
        verifier: &dyn ProofVerifier,
        original_challenge_hash: &Bytes32,
        signage_point: &Bytes32,
    ) -> Option<Bytes32> {
        let plot_id = self.get_plot_id()?;
        if self.size < constants.min_plot_size || self.size > constants.max_plot_size {
            return None;
        }
        let new_challenge = calculate_pos_challenge(&plot_id, original_challenge_hash, signage_point);
        if new_challenge != self.challenge {
            return None;
        }
        if !passes_plot_filter(
            constants.number_zero_bits_plot_filter,
            &plot_id,
            original_challenge_hash,
            signage_point,
        ) {
            return None;
        }
        verifier.pos_quality_string(&plot_id, self.size, &self.challenge, self.proof.as_ref())
    }
}

pub fn calculate_plot_id_public_key(pool_public_key: &Bytes48, plot_public_key: &Bytes48) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update(pool_public_key);
    hasher.update(plot_public_key);
    Bytes32::new(hasher.finalize().into())
}

pub fn calculate_plot_id_puzzle_hash(
    pool_contract_puzzle_hash: &Bytes32,
    plot_public_key: &Bytes48,
) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update(pool_contract_puzzle_hash);
    hasher.update(plot_public_key);
    Bytes32::new(hasher.finalize().into())
}

/// A plot is eligible when the first `prefix_bits` bits of the filter input are zero.
#[must_use]
pub fn passes_plot_filter(
    prefix_bits: u8,
    plot_id: &Bytes32,
    challenge_hash: &Bytes32,
    signage_point: &Bytes32,
) -> bool {
    let filter_input = calculate_plot_filter_input(plot_id, challenge_hash, signage_point);
    filter_input
        .as_ref()
        .iter()
        .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1 == 1))
        .take(prefix_bits as usize)
        .all(|is_one| !is_one)
}

#[must_use]
pub fn calculate_plot_filter_input(
    plot_id: &Bytes32,
    challenge_hash: &Bytes32,
    signage_point: &Bytes32,
) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update(plot_id);
    hasher.update(challenge_hash);
    hasher.update(signage_point);
    Bytes32::new(hasher.finalize().into())
}

#[must_use]
pub fn calculate_pos_challenge(
    plot_id: &Bytes32,
    challenge_hash: &Bytes32,
    signage_point: &Bytes32,
) -> Bytes32 {
    std_hash(calculate_plot_filter_input(
        plot_id,
        challenge_hash,
        signage_point,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plot_filter_bits() {
        let plot_id = Bytes32::new([3u8; 32]);
        let challenge = Bytes32::new([4u8; 32]);
        let mut passing = 0;
        for i in 0..64u8 {
            let sp = Bytes32::new([i; 32]);
            assert!(passes_plot_filter(0, &plot_id, &challenge, &sp));
            let input = calculate_plot_filter_input(&plot_id, &challenge, &sp);
            let expected = input.as_ref()[0] & 0x80 == 0;
            assert_eq!(passes_plot_filter(1, &plot_id, &challenge, &sp), expected);
            if expected {
                passing += 1;
            }
        }
        assert!(passing > 0 && passing < 64);
    }
}
