use crate::clvm::ops::{apply_operator, EvalErr};
use crate::clvm::sexp::{NodePtr, SExp};

const QUOTE_KW: u8 = 1;
const APPLY_KW: u8 = 2;

const QUOTE_COST: u64 = 20;
const APPLY_COST: u64 = 90;
// mandatory base cost for every operator we execute
const OP_COST: u64 = 1;
const TRAVERSE_BASE_COST: u64 = 40;
const TRAVERSE_COST_PER_ZERO_BYTE: u64 = 4;
const TRAVERSE_COST_PER_BIT: u64 = 4;

enum Operation {
    Apply,
    Cons,
    Eval,
    SwapEval,
}

fn msb_mask(byte: u8) -> u8 {
    let mut byte = u32::from(byte | (byte >> 1));
    byte |= byte >> 2;
    byte |= byte >> 4;
    ((byte + 1) >> 1) as u8
}

fn traverse_path(node_index: &[u8], args: &NodePtr) -> Result<(u64, NodePtr), EvalErr> {
    let first_bit_byte_index = node_index
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(node_index.len());
    let mut cost: u64 = TRAVERSE_BASE_COST
        + (first_bit_byte_index as u64) * TRAVERSE_COST_PER_ZERO_BYTE
        + TRAVERSE_COST_PER_BIT;
    if first_bit_byte_index >= node_index.len() {
        return Ok((cost, SExp::nil()));
    }
    // the most significant set bit is a sentinel
    let last_bitmask = msb_mask(node_index[first_bit_byte_index]);
    let mut arg_list = args;
    let mut byte_idx = node_index.len() - 1;
    let mut bitmask = 0x01;
    while byte_idx > first_bit_byte_index || bitmask < last_bitmask {
        let is_bit_set = (node_index[byte_idx] & bitmask) != 0;
        match arg_list.as_ref() {
            SExp::Atom(_) => return Err(EvalErr::Invalid("path into atom".to_string())),
            SExp::Pair(first, rest) => {
                arg_list = if is_bit_set { rest } else { first };
            }
        }
        if bitmask == 0x80 {
            bitmask = 0x01;
            byte_idx -= 1;
        } else {
            bitmask <<= 1;
        }
        cost += TRAVERSE_COST_PER_BIT;
    }
    Ok((cost, arg_list.clone()))
}

// Two stacks: operands (nodes) and pending operations.
struct RunProgramContext {
    val_stack: Vec<NodePtr>,
    op_stack: Vec<Operation>,
}

impl RunProgramContext {
    fn pop(&mut self) -> Result<NodePtr, EvalErr> {
        self.val_stack
            .pop()
            .ok_or_else(|| EvalErr::Invalid("value stack empty".to_string()))
    }

    fn cons_op(&mut self) -> Result<u64, EvalErr> {
        let first = self.pop()?;
        let rest = self.pop()?;
        self.val_stack.push(SExp::pair(first, rest));
        Ok(0)
    }

    fn eval_pair(&mut self, program: &NodePtr, args: &NodePtr) -> Result<u64, EvalErr> {
        let (op_node, op_list) = match program.as_ref() {
            SExp::Atom(path) => {
                let (cost, node) = traverse_path(path, args)?;
                self.val_stack.push(node);
                return Ok(cost);
            }
            SExp::Pair(first, rest) => (first, rest),
        };
        let op_atom = op_node.as_atom().ok_or_else(|| {
            EvalErr::Invalid("in ((X)...) syntax X must be lone atom".to_string())
        })?;
        if op_atom == [QUOTE_KW] {
            self.val_stack.push(op_list.clone());
            return Ok(QUOTE_COST);
        }
        self.op_stack.push(Operation::Apply);
        self.val_stack.push(op_node.clone());
        let mut operands = op_list;
        loop {
            match operands.as_ref() {
                SExp::Atom(a) if a.is_empty() => break,
                SExp::Atom(_) => return Err(EvalErr::Invalid("bad operand list".to_string())),
                SExp::Pair(first, rest) => {
                    self.op_stack.push(Operation::SwapEval);
                    self.val_stack.push(args.clone());
                    self.val_stack.push(first.clone());
                    operands = rest;
                }
            }
        }
        self.val_stack.push(SExp::nil());
        Ok(OP_COST)
    }

    fn swap_eval_op(&mut self) -> Result<u64, EvalErr> {
        let v2 = self.pop()?;
        let program = self.pop()?;
        let args = self.pop()?;
        self.val_stack.push(v2);
        self.op_stack.push(Operation::Cons);
        self.eval_pair(&program, &args)
    }

    fn eval_op(&mut self) -> Result<u64, EvalErr> {
        let pair = self.pop()?;
        match pair.as_ref() {
            SExp::Atom(_) => Err(EvalErr::Invalid("pair expected".to_string())),
            SExp::Pair(program, args) => self.eval_pair(program, args),
        }
    }

    fn apply_op(&mut self, max_cost: u64) -> Result<u64, EvalErr> {
        let operand_list = self.pop()?;
        let operator = self.pop()?;
        let op_atom = operator
            .as_atom()
            .ok_or_else(|| EvalErr::Invalid("operator is a pair".to_string()))?;
        if op_atom == [APPLY_KW] {
            let operands = SExp::as_list(&operand_list)
                .filter(|l| l.len() == 2)
                .ok_or_else(|| EvalErr::Invalid("apply requires exactly 2 parameters".to_string()))?;
            self.eval_pair(&operands[0], &operands[1])
                .map(|c| c + APPLY_COST)
        } else {
            let (cost, result) = apply_operator(op_atom, &operand_list, max_cost)?;
            self.val_stack.push(result);
            Ok(cost)
        }
    }
}

/// Evaluates `program` against `args`, failing once `max_cost` is exceeded.
pub fn run_program(
    program: &NodePtr,
    args: &NodePtr,
    max_cost: u64,
) -> Result<(u64, NodePtr), EvalErr> {
    let mut ctx = RunProgramContext {
        val_stack: vec![SExp::pair(program.clone(), args.clone())],
        op_stack: vec![Operation::Eval],
    };
    let mut cost: u64 = 0;
    while let Some(op) = ctx.op_stack.pop() {
        cost = cost.saturating_add(match op {
            Operation::Apply => ctx.apply_op(max_cost.saturating_sub(cost))?,
            Operation::Cons => ctx.cons_op()?,
            Operation::Eval => ctx.eval_op()?,
            Operation::SwapEval => ctx.swap_eval_op()?,
        });
        if cost > max_cost {
            return Err(EvalErr::CostExceeded);
        }
    }
    Ok((cost, ctx.pop()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clvm::sexp::atom_to_u64;

    fn q(node: NodePtr) -> NodePtr {
        SExp::pair(SExp::from_u64(1), node)
    }

    #[test]
    fn test_quote_and_path() {
        let env = SExp::list(vec![SExp::from_u64(7), SExp::from_u64(9)]);
        let (_, out) = run_program(&SExp::from_u64(2), &env, 1_000).unwrap();
        assert_eq!(out.as_atom().map(|a| atom_to_u64(a)), Some(Ok(7)));
        let (_, out) = run_program(&SExp::from_u64(5), &env, 1_000).unwrap();
        assert_eq!(out.as_atom().map(|a| atom_to_u64(a)), Some(Ok(9)));
        let (cost, out) = run_program(&q(SExp::from_u64(42)), &SExp::nil(), 1_000).unwrap();
        assert_eq!(cost, QUOTE_COST);
        assert_eq!(out.as_atom().map(|a| atom_to_u64(a)), Some(Ok(42)));
    }

    #[test]
    fn test_add_and_cost_limit() {
        // (+ (q . 2) (q . 3))
        let program = SExp::list(vec![
            SExp::from_u64(16),
            q(SExp::from_u64(2)),
            q(SExp::from_u64(3)),
        ]);
        let (cost, out) = run_program(&program, &SExp::nil(), 10_000).unwrap();
        assert_eq!(out.as_atom().map(|a| atom_to_u64(a)), Some(Ok(5)));
        assert!(matches!(
            run_program(&program, &SExp::nil(), cost - 1),
            Err(EvalErr::CostExceeded)
        ));
    }

    #[test]
    fn test_raise_fails() {
        let program = SExp::list(vec![SExp::from_u64(8), q(SExp::from_u64(1))]);
        assert!(matches!(
            run_program(&program, &SExp::nil(), 10_000),
            Err(EvalErr::Raise(_))
        ));
    }
}
