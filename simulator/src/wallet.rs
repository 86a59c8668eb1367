use blst::min_pk::SecretKey;
use dg_node_core::blockchain::coin::Coin;
use dg_node_core::blockchain::coin_spend::CoinSpend;
use dg_node_core::blockchain::condition_opcode::ConditionOpcode;
use dg_node_core::blockchain::sized_bytes::{Bytes32, Bytes48, Bytes96};
use dg_node_core::blockchain::spend_bundle::SpendBundle;
use dg_node_core::bls::{aggregate_signatures, sign, INFINITY_SIGNATURE};
use dg_node_core::clvm::program::SerializedProgram;
use dg_node_core::clvm::sexp::{NodePtr, SExp};
use std::io::Error;

/// Message every key locked coin signs, bound to the coin and network by AGG_SIG_ME.
pub const SIGNED_SPEND_MESSAGE: &[u8] = b"dg simulator spend";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    CreateCoin(Bytes32, u64),
    ReserveFee(u64),
    AggSigMe(Bytes48, Vec<u8>),
    AssertHeightRelative(u32),
    AssertHeightAbsolute(u32),
    AssertSecondsRelative(u64),
    AssertSecondsAbsolute(u64),
    AssertBeforeHeightRelative(u32),
    AssertBeforeHeightAbsolute(u32),
    AssertBeforeSecondsRelative(u64),
    AssertBeforeSecondsAbsolute(u64),
    AssertMyCoinId(Bytes32),
    /// Opcode outside the known set, carried through as-is.
    Unknown(u8),
}
impl Condition {
    pub fn to_node(&self) -> NodePtr {
        let op = |code: ConditionOpcode| SExp::from_u64(code as u64);
        match self {
            Condition::CreateCoin(puzzle_hash, amount) => SExp::list(vec![
                op(ConditionOpcode::CreateCoin),
                SExp::atom(puzzle_hash.as_ref()),
                SExp::from_u64(*amount),
            ]),
            Condition::ReserveFee(fee) => {
                SExp::list(vec![op(ConditionOpcode::ReserveFee), SExp::from_u64(*fee)])
            }
            Condition::AggSigMe(public_key, msg) => SExp::list(vec![
                op(ConditionOpcode::AggSigMe),
                SExp::atom(public_key.as_ref()),
                SExp::atom(msg.clone()),
            ]),
            Condition::AssertHeightRelative(h) => SExp::list(vec![
                op(ConditionOpcode::AssertHeightRelative),
                SExp::from_u64(u64::from(*h)),
            ]),
            Condition::AssertHeightAbsolute(h) => SExp::list(vec![
                op(ConditionOpcode::AssertHeightAbsolute),
                SExp::from_u64(u64::from(*h)),
            ]),
            Condition::AssertSecondsRelative(s) => SExp::list(vec![
                op(ConditionOpcode::AssertSecondsRelative),
                SExp::from_u64(*s),
            ]),
            Condition::AssertSecondsAbsolute(s) => SExp::list(vec![
                op(ConditionOpcode::AssertSecondsAbsolute),
                SExp::from_u64(*s),
            ]),
            Condition::AssertBeforeHeightRelative(h) => SExp::list(vec![
                op(ConditionOpcode::AssertBeforeHeightRelative),
                SExp::from_u64(u64::from(*h)),
            ]),
            Condition::AssertBeforeHeightAbsolute(h) => SExp::list(vec![
                op(ConditionOpcode::AssertBeforeHeightAbsolute),
                SExp::from_u64(u64::from(*h)),
            ]),
            Condition::AssertBeforeSecondsRelative(s) => SExp::list(vec![
                op(ConditionOpcode::AssertBeforeSecondsRelative),
                SExp::from_u64(*s),
            ]),
            Condition::AssertBeforeSecondsAbsolute(s) => SExp::list(vec![
                op(ConditionOpcode::AssertBeforeSecondsAbsolute),
                SExp::from_u64(*s),
            ]),
            Condition::AssertMyCoinId(id) => SExp::list(vec![
                op(ConditionOpcode::AssertMyCoinId),
                SExp::atom(id.as_ref()),
            ]),
            Condition::Unknown(code) => SExp::list(vec![SExp::from_u64(u64::from(*code))]),
        }
    }
}

fn conditions_node(conditions: &[Condition]) -> NodePtr {
    SExp::list(conditions.iter().map(Condition::to_node).collect())
}

/// The puzzle `1`: returns its solution, which is taken as the condition list.
pub fn anyone_can_spend() -> Result<SerializedProgram, Error> {
    SerializedProgram::from_node(&SExp::from_u64(1))
}

pub fn anyone_can_spend_puzzle_hash() -> Bytes32 {
    SExp::from_u64(1).tree_hash()
}

/// `(c (q 50 PK MSG) 1)`: prepends an AGG_SIG_ME for `public_key` to the conditions in the solution.
fn signed_puzzle_node(public_key: &Bytes48) -> NodePtr {
    SExp::list(vec![
        SExp::from_u64(4),
        SExp::pair(
            SExp::from_u64(1),
            Condition::AggSigMe(*public_key, SIGNED_SPEND_MESSAGE.to_vec()).to_node(),
        ),
        SExp::from_u64(1),
    ])
}

pub fn signed_puzzle(public_key: &Bytes48) -> Result<SerializedProgram, Error> {
    SerializedProgram::from_node(&signed_puzzle_node(public_key))
}

pub fn signed_puzzle_hash(public_key: &Bytes48) -> Bytes32 {
    signed_puzzle_node(public_key).tree_hash()
}

pub fn spend_anyone_can_spend(coin: &Coin, conditions: &[Condition]) -> Result<CoinSpend, Error> {
    Ok(CoinSpend {
        coin: *coin,
        puzzle_reveal: anyone_can_spend()?,
        solution: SerializedProgram::from_node(&conditions_node(conditions))?,
    })
}

/// Spends anyone-can-spend coins, the bundle needs no signature.
pub fn unsigned_bundle(spends: &[(Coin, Vec<Condition>)]) -> Result<SpendBundle, Error> {
    Ok(SpendBundle {
        coin_spends: spends
            .iter()
            .map(|(coin, conditions)| spend_anyone_can_spend(coin, conditions))
            .collect::<Result<Vec<CoinSpend>, Error>>()?,
        aggregated_signature: INFINITY_SIGNATURE,
    })
}

/// Coins locked to one key.
pub struct SimulatedWallet {
    secret_key: SecretKey,
    pub public_key: Bytes48,
    additional_data: Vec<u8>,
}
impl SimulatedWallet {
    pub fn new(secret_key: SecretKey, agg_sig_me_additional_data: &[u8]) -> Self {
        Self {
            public_key: Bytes48::from(&secret_key.sk_to_pk()),
            secret_key,
            additional_data: agg_sig_me_additional_data.to_vec(),
        }
    }

    pub fn puzzle_hash(&self) -> Bytes32 {
        signed_puzzle_hash(&self.public_key)
    }

    pub fn sign_coin(&self, coin: &Coin) -> Bytes96 {
        let mut msg = SIGNED_SPEND_MESSAGE.to_vec();
        msg.extend_from_slice(coin.name().as_ref());
        msg.extend_from_slice(&self.additional_data);
        Bytes96::from(sign(&self.secret_key, &msg))
    }

    pub fn spend(&self, coin: &Coin, conditions: &[Condition]) -> Result<CoinSpend, Error> {
        Ok(CoinSpend {
            coin: *coin,
            puzzle_reveal: signed_puzzle(&self.public_key)?,
            solution: SerializedProgram::from_node(&conditions_node(conditions))?,
        })
    }

    /// Spends the wallet's coins with a signature covering every spend.
    pub fn bundle(&self, spends: &[(Coin, Vec<Condition>)]) -> Result<SpendBundle, Error> {
        let mut coin_spends = Vec::with_capacity(spends.len());
        let mut signatures = Vec::with_capacity(spends.len());
        for (coin, conditions) in spends {
            coin_spends.push(self.spend(coin, conditions)?);
            signatures.push(self.sign_coin(coin));
        }
        Ok(SpendBundle {
            coin_spends,
            aggregated_signature: aggregate_signatures(&signatures)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_secret_key;
    use dg_node_core::bls::aggregate_verify_signature;
    use dg_node_core::clvm::conditions::{
        get_name_puzzle_conditions, pkm_pairs, simple_solution_generator,
    };

    #[test]
    fn test_signed_spend_verifies() {
        let additional_data = vec![5u8; 32];
        let wallet = SimulatedWallet::new(derive_secret_key(b"wallet", 0).unwrap(), &additional_data);
        let coin = Coin::new(Bytes32::new([1u8; 32]), wallet.puzzle_hash(), 1000);
        let bundle = wallet
            .bundle(&[(coin, vec![Condition::CreateCoin(Bytes32::new([2u8; 32]), 900)])])
            .unwrap();
        let generator = simple_solution_generator(&bundle).unwrap();
        let npc = get_name_puzzle_conditions(&generator, &[], 11_000_000_000, 0, true);
        assert!(npc.error.is_none());
        let conds = npc.conds.unwrap();
        assert_eq!(conds.spends[0].puzzle_hash, wallet.puzzle_hash());
        assert_eq!(conds.fees(), Some(100));
        let pairs = pkm_pairs(&conds, &additional_data);
        assert!(aggregate_verify_signature(&pairs, &bundle.aggregated_signature));
        assert!(!aggregate_verify_signature(&pairs, &INFINITY_SIGNATURE));
    }

    #[test]
    fn test_anyone_can_spend_hash_matches_puzzle() {
        assert_eq!(
            anyone_can_spend().unwrap().tree_hash().unwrap(),
            anyone_can_spend_puzzle_hash()
        );
    }
}
