use crate::clvm::sexp::{atom_to_bigint, NodePtr, SExp};
use num_bigint::BigInt;
use sha2::{Digest, Sha256};
use std::fmt;

const FIRST_COST: u64 = 30;
const IF_COST: u64 = 33;
const CONS_COST: u64 = 50;
const REST_COST: u64 = 30;
const LISTP_COST: u64 = 19;
const EQ_BASE_COST: u64 = 117;
const EQ_COST_PER_BYTE: u64 = 1;
const SHA256_BASE_COST: u64 = 87;
const SHA256_COST_PER_ARG: u64 = 134;
const SHA256_COST_PER_BYTE: u64 = 2;
const ARITH_BASE_COST: u64 = 99;
const ARITH_COST_PER_ARG: u64 = 320;
const ARITH_COST_PER_BYTE: u64 = 3;
const CONCAT_BASE_COST: u64 = 142;
const CONCAT_COST_PER_ARG: u64 = 135;
const CONCAT_COST_PER_BYTE: u64 = 3;
const MALLOC_COST_PER_BYTE: u64 = 10;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum EvalErr {
    CostExceeded,
    Raise(String),
    Invalid(String),
}
impl fmt::Display for EvalErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalErr::CostExceeded => write!(f, "cost exceeded"),
            EvalErr::Raise(msg) => write!(f, "clvm raise: {msg}"),
            EvalErr::Invalid(msg) => write!(f, "{msg}"),
        }
    }
}

fn args_list(args: &NodePtr, op: &str) -> Result<Vec<NodePtr>, EvalErr> {
    SExp::as_list(args).ok_or_else(|| EvalErr::Invalid(format!("{op} takes a proper list")))
}

fn exact_args(args: &NodePtr, count: usize, op: &str) -> Result<Vec<NodePtr>, EvalErr> {
    let list = args_list(args, op)?;
    if list.len() == count {
        Ok(list)
    } else {
        Err(EvalErr::Invalid(format!(
            "{op} takes exactly {count} argument(s), got {}",
            list.len()
        )))
    }
}

fn atom<'a>(node: &'a NodePtr, op: &str) -> Result<&'a [u8], EvalErr> {
    node.as_atom()
        .ok_or_else(|| EvalErr::Invalid(format!("{op} on list")))
}

fn check_cost(cost: u64, max_cost: u64) -> Result<(), EvalErr> {
    if cost > max_cost {
        Err(EvalErr::CostExceeded)
    } else {
        Ok(())
    }
}

fn op_arith(args: &NodePtr, max_cost: u64, subtract: bool) -> Result<(u64, NodePtr), EvalErr> {
    let mut cost = ARITH_BASE_COST;
    let mut byte_count: u64 = 0;
    let mut total = BigInt::from(0);
    for (i, arg) in args_list(args, "+")?.iter().enumerate() {
        cost += ARITH_COST_PER_ARG;
        check_cost(cost + byte_count * ARITH_COST_PER_BYTE, max_cost)?;
        let blob = atom(arg, if subtract { "-" } else { "+" })?;
        byte_count += blob.len() as u64;
        let v = atom_to_bigint(blob);
        if subtract && i > 0 {
            total -= v;
        } else {
            total += v;
        }
    }
    let result = SExp::from_bigint(&total);
    cost += byte_count * ARITH_COST_PER_BYTE;
    let len = result.as_atom().map_or(0, <[u8]>::len) as u64;
    Ok((cost + len * MALLOC_COST_PER_BYTE, result))
}

/// Applies a built-in operator to already evaluated arguments.
pub fn apply_operator(
    op: &[u8],
    args: &NodePtr,
    max_cost: u64,
) -> Result<(u64, NodePtr), EvalErr> {
    let [op] = op else {
        return Err(EvalErr::Invalid(format!("unknown operator {op:?}")));
    };
    match op {
        3 => {
            let a = exact_args(args, 3, "i")?;
            let chosen = if a[0].is_nil() { &a[2] } else { &a[1] };
            Ok((IF_COST, chosen.clone()))
        }
        4 => {
            let a = exact_args(args, 2, "c")?;
            Ok((CONS_COST, SExp::pair(a[0].clone(), a[1].clone())))
        }
        5 => {
            let a = exact_args(args, 1, "f")?;
            let (first, _) = a[0]
                .as_pair()
                .ok_or_else(|| EvalErr::Invalid("first of non-cons".to_string()))?;
            Ok((FIRST_COST, first.clone()))
        }
        6 => {
            let a = exact_args(args, 1, "r")?;
            let (_, rest) = a[0]
                .as_pair()
                .ok_or_else(|| EvalErr::Invalid("rest of non-cons".to_string()))?;
            Ok((REST_COST, rest.clone()))
        }
        7 => {
            let a = exact_args(args, 1, "l")?;
            let result = if a[0].as_pair().is_some() {
                SExp::from_u64(1)
            } else {
                SExp::nil()
            };
            Ok((LISTP_COST, result))
        }
        8 => {
            let msg = args_list(args, "x")?
                .first()
                .and_then(|n| n.as_atom().map(hex::encode))
                .unwrap_or_default();
            Err(EvalErr::Raise(msg))
        }
        9 => {
            let a = exact_args(args, 2, "=")?;
            let s0 = atom(&a[0], "=")?;
            let s1 = atom(&a[1], "=")?;
            let cost = EQ_BASE_COST + (s0.len() as u64 + s1.len() as u64) * EQ_COST_PER_BYTE;
            let result = if s0 == s1 {
                SExp::from_u64(1)
            } else {
                SExp::nil()
            };
            Ok((cost, result))
        }
        11 => {
            let mut cost = SHA256_BASE_COST;
            let mut byte_count: u64 = 0;
            let mut hasher = Sha256::new();
            for arg in args_list(args, "sha256")? {
                cost += SHA256_COST_PER_ARG;
                check_cost(cost + byte_count * SHA256_COST_PER_BYTE, max_cost)?;
                let blob = atom(&arg, "sha256")?;
                byte_count += blob.len() as u64;
                hasher.update(blob);
            }
            cost += byte_count * SHA256_COST_PER_BYTE;
            Ok((cost + 32 * MALLOC_COST_PER_BYTE, SExp::atom(hasher.finalize().to_vec())))
        }
        14 => {
            let mut cost = CONCAT_BASE_COST;
            let mut buf = vec![];
            for arg in args_list(args, "concat")? {
                cost += CONCAT_COST_PER_ARG;
                check_cost(cost + buf.len() as u64 * CONCAT_COST_PER_BYTE, max_cost)?;
                buf.extend_from_slice(atom(&arg, "concat")?);
            }
            cost += buf.len() as u64 * (CONCAT_COST_PER_BYTE + MALLOC_COST_PER_BYTE);
            check_cost(cost, max_cost)?;
            Ok((cost, SExp::atom(buf)))
        }
        16 => op_arith(args, max_cost, false),
        17 => op_arith(args, max_cost, true),
        other => Err(EvalErr::Invalid(format!("unknown operator {other}"))),
    }
}
