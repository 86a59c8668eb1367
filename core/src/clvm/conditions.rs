use crate::blockchain::coin::Coin;
use crate::blockchain::coin_record::CoinRecord;
use crate::blockchain::condition_opcode::ConditionOpcode;
use crate::blockchain::npc_result::NpcResult;
use crate::blockchain::sized_bytes::{Bytes32, Bytes48, SizedBytes};
use crate::blockchain::spend_bundle::SpendBundle;
use crate::blockchain::spend_bundle_conditions::{
    NewCoin, SpendBundleConditions, SpendConditions,
};
use crate::clvm::program::SerializedProgram;
use crate::clvm::run_program::run_program;
use crate::clvm::sexp::{atom_to_u64, AtomIntError, NodePtr, SExp};
use crate::errors::ErrorCode;
use crate::utils::std_hash;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::io::Error;

const MAX_MESSAGE_LEN: usize = 1024;

struct CostTracker {
    used: u64,
    max: u64,
}
impl CostTracker {
    fn charge(&mut self, cost: u64) -> Result<(), ErrorCode> {
        self.used = self.used.saturating_add(cost);
        if self.used > self.max {
            Err(ErrorCode::GeneratorRuntimeError)
        } else {
            Ok(())
        }
    }
    fn remaining(&self) -> u64 {
        self.max.saturating_sub(self.used)
    }
}

enum TimeArg {
    Negative,
    Value(u64),
    TooLarge,
}

fn atom_arg(node: Option<&NodePtr>) -> Result<&[u8], ErrorCode> {
    node.and_then(|n| n.as_atom())
        .ok_or(ErrorCode::InvalidCondition)
}

fn bytes32_arg(node: Option<&NodePtr>) -> Result<Bytes32, ErrorCode> {
    Bytes32::try_from_slice(atom_arg(node)?).map_err(|_| ErrorCode::InvalidCondition)
}

fn bytes48_arg(node: Option<&NodePtr>) -> Result<Bytes48, ErrorCode> {
    Bytes48::try_from_slice(atom_arg(node)?).map_err(|_| ErrorCode::InvalidCondition)
}

fn message_arg(node: Option<&NodePtr>) -> Result<Vec<u8>, ErrorCode> {
    let msg = atom_arg(node)?;
    if msg.len() > MAX_MESSAGE_LEN {
        Err(ErrorCode::InvalidCondition)
    } else {
        Ok(msg.to_vec())
    }
}

fn time_arg(node: Option<&NodePtr>) -> Result<TimeArg, ErrorCode> {
    match atom_to_u64(atom_arg(node)?) {
        Ok(v) => Ok(TimeArg::Value(v)),
        Err(AtomIntError::Negative) => Ok(TimeArg::Negative),
        Err(AtomIntError::TooLarge) => Ok(TimeArg::TooLarge),
        Err(AtomIntError::NotCanonical) => Err(ErrorCode::InvalidCondition),
    }
}

fn height_arg(node: Option<&NodePtr>) -> Result<TimeArg, ErrorCode> {
    Ok(match time_arg(node)? {
        TimeArg::Value(v) if v > u64::from(u32::MAX) => TimeArg::TooLarge,
        other => other,
    })
}

fn lower_bound<T: Ord + Copy>(current: Option<T>, value: T) -> Option<T> {
    Some(current.map_or(value, |c| c.max(value)))
}

fn upper_bound<T: Ord + Copy>(current: Option<T>, value: T) -> Option<T> {
    Some(current.map_or(value, |c| c.min(value)))
}

#[derive(Default)]
struct ParseState {
    spent_ids: HashSet<Bytes32>,
    announcements: HashSet<Bytes32>,
    asserted_announcements: Vec<Bytes32>,
    asserted_concurrent: Vec<Bytes32>,
}

fn parse_spend(
    entry: &NodePtr,
    tracker: &mut CostTracker,
    mempool_mode: bool,
    state: &mut ParseState,
    conds: &mut SpendBundleConditions,
) -> Result<(), ErrorCode> {
    let items = SExp::as_list(entry)
        .filter(|l| l.len() >= 4)
        .ok_or(ErrorCode::GeneratorRuntimeError)?;
    let parent_id = items[0]
        .as_atom()
        .and_then(|a| Bytes32::try_from_slice(a).ok())
        .ok_or(ErrorCode::GeneratorRuntimeError)?;
    let amount = items[2]
        .as_atom()
        .and_then(|a| atom_to_u64(a).ok())
        .ok_or(ErrorCode::GeneratorRuntimeError)?;
    let puzzle = &items[1];
    let solution = &items[3];
    let coin = Coin::new(parent_id, puzzle.tree_hash(), amount);
    let coin_id = coin.name();
    if !state.spent_ids.insert(coin_id) {
        return Err(ErrorCode::DoubleSpend);
    }
    let (cost, output) = run_program(puzzle, solution, tracker.remaining()).map_err(|e| {
        debug!("Puzzle for coin {coin_id} failed: {e}");
        ErrorCode::GeneratorRuntimeError
    })?;
    tracker.charge(cost)?;
    let conditions = SExp::as_list(&output).ok_or(ErrorCode::GeneratorRuntimeError)?;
    let mut spend = SpendConditions {
        coin_id,
        parent_id,
        puzzle_hash: coin.puzzle_hash,
        coin_amount: amount,
        height_relative: None,
        seconds_relative: None,
        before_height_relative: None,
        before_seconds_relative: None,
        create_coin: vec![],
        agg_sig_me: vec![],
    };
    let mut created: HashSet<NewCoin> = HashSet::new();
    for condition in conditions {
        let parts = SExp::as_list(&condition).ok_or(ErrorCode::InvalidCondition)?;
        let Some((op_node, args)) = parts.split_first() else {
            return Err(ErrorCode::InvalidCondition);
        };
        let op_atom = op_node.as_atom().ok_or(ErrorCode::InvalidCondition)?;
        let Some(opcode) = ConditionOpcode::from_atom(op_atom) else {
            if mempool_mode {
                return Err(ErrorCode::InvalidCondition);
            }
            continue;
        };
        tracker.charge(opcode.cost())?;
        match opcode {
            ConditionOpcode::AggSigUnsafe => {
                let pk = bytes48_arg(args.first())?;
                conds.agg_sig_unsafe.push((pk, message_arg(args.get(1))?));
            }
            ConditionOpcode::AggSigMe => {
                let pk = bytes48_arg(args.first())?;
                spend.agg_sig_me.push((pk, message_arg(args.get(1))?));
            }
            ConditionOpcode::CreateCoin => {
                let puzzle_hash = bytes32_arg(args.first())?;
                let amount = match atom_to_u64(atom_arg(args.get(1))?) {
                    Ok(v) => v,
                    Err(AtomIntError::Negative) => return Err(ErrorCode::CoinAmountNegative),
                    Err(AtomIntError::TooLarge) => {
                        return Err(ErrorCode::CoinAmountExceedsMaximum)
                    }
                    Err(AtomIntError::NotCanonical) => return Err(ErrorCode::InvalidCondition),
                };
                let new_coin = NewCoin {
                    puzzle_hash,
                    amount,
                };
                if !created.insert(new_coin) {
                    return Err(ErrorCode::DuplicateOutput);
                }
                conds.addition_amount += u128::from(amount);
                spend.create_coin.push(new_coin);
            }
            ConditionOpcode::ReserveFee => {
                let fee = atom_to_u64(atom_arg(args.first())?)
                    .map_err(|_| ErrorCode::ReserveFeeConditionFailed)?;
                conds.reserve_fee = conds
                    .reserve_fee
                    .checked_add(fee)
                    .ok_or(ErrorCode::ReserveFeeConditionFailed)?;
            }
            ConditionOpcode::CreateCoinAnnouncement => {
                let msg = message_arg(args.first())?;
                state
                    .announcements
                    .insert(std_hash([coin_id.as_slice(), msg.as_slice()].concat()));
            }
            ConditionOpcode::CreatePuzzleAnnouncement => {
                let msg = message_arg(args.first())?;
                state
                    .announcements
                    .insert(std_hash([coin.puzzle_hash.as_slice(), msg.as_slice()].concat()));
            }
            ConditionOpcode::AssertCoinAnnouncement
            | ConditionOpcode::AssertPuzzleAnnouncement => {
                state.asserted_announcements.push(bytes32_arg(args.first())?);
            }
            ConditionOpcode::AssertConcurrentSpend => {
                state.asserted_concurrent.push(bytes32_arg(args.first())?);
            }
            ConditionOpcode::AssertMyCoinId => {
                if bytes32_arg(args.first())? != coin_id {
                    return Err(ErrorCode::AssertMyCoinIdFailed);
                }
            }
            ConditionOpcode::AssertMyParentId => {
                if bytes32_arg(args.first())? != parent_id {
                    return Err(ErrorCode::AssertMyParentIdFailed);
                }
            }
            ConditionOpcode::AssertMyPuzzlehash => {
                if bytes32_arg(args.first())? != coin.puzzle_hash {
                    return Err(ErrorCode::AssertMyPuzzlehashFailed);
                }
            }
            ConditionOpcode::AssertMyAmount => {
                if atom_to_u64(atom_arg(args.first())?) != Ok(amount) {
                    return Err(ErrorCode::AssertMyAmountFailed);
                }
            }
            ConditionOpcode::AssertSecondsRelative => match time_arg(args.first())? {
                TimeArg::Value(v) => spend.seconds_relative = lower_bound(spend.seconds_relative, v),
                TimeArg::Negative => {}
                TimeArg::TooLarge => return Err(ErrorCode::AssertSecondsRelativeFailed),
            },
            ConditionOpcode::AssertSecondsAbsolute => match time_arg(args.first())? {
                TimeArg::Value(v) => conds.seconds_absolute = conds.seconds_absolute.max(v),
                TimeArg::Negative => {}
                TimeArg::TooLarge => return Err(ErrorCode::AssertSecondsAbsoluteFailed),
            },
            ConditionOpcode::AssertHeightRelative => match height_arg(args.first())? {
                TimeArg::Value(v) => {
                    spend.height_relative = lower_bound(spend.height_relative, v as u32);
                }
                TimeArg::Negative => {}
                TimeArg::TooLarge => return Err(ErrorCode::AssertHeightRelativeFailed),
            },
            ConditionOpcode::AssertHeightAbsolute => match height_arg(args.first())? {
                TimeArg::Value(v) => conds.height_absolute = conds.height_absolute.max(v as u32),
                TimeArg::Negative => {}
                TimeArg::TooLarge => return Err(ErrorCode::AssertHeightAbsoluteFailed),
            },
            ConditionOpcode::AssertBeforeSecondsRelative => match time_arg(args.first())? {
                TimeArg::Value(v) => {
                    spend.before_seconds_relative = upper_bound(spend.before_seconds_relative, v);
                }
                TimeArg::Negative => return Err(ErrorCode::AssertBeforeSecondsRelativeFailed),
                TimeArg::TooLarge => {}
            },
            ConditionOpcode::AssertBeforeSecondsAbsolute => match time_arg(args.first())? {
                TimeArg::Value(v) => {
                    conds.before_seconds_absolute = upper_bound(conds.before_seconds_absolute, v);
                }
                TimeArg::Negative => return Err(ErrorCode::AssertBeforeSecondsAbsoluteFailed),
                TimeArg::TooLarge => {}
            },
            ConditionOpcode::AssertBeforeHeightRelative => match height_arg(args.first())? {
                TimeArg::Value(v) => {
                    spend.before_height_relative =
                        upper_bound(spend.before_height_relative, v as u32);
                }
                TimeArg::Negative => return Err(ErrorCode::AssertBeforeHeightRelativeFailed),
                TimeArg::TooLarge => {}
            },
            ConditionOpcode::AssertBeforeHeightAbsolute => match height_arg(args.first())? {
                TimeArg::Value(v) => {
                    conds.before_height_absolute =
                        upper_bound(conds.before_height_absolute, v as u32);
                }
                TimeArg::Negative => return Err(ErrorCode::AssertBeforeHeightAbsoluteFailed),
                TimeArg::TooLarge => {}
            },
        }
    }
    conds.removal_amount += u128::from(amount);
    conds.spends.push(spend);
    Ok(())
}

fn run_generator(
    generator: &SerializedProgram,
    generator_refs: &[SerializedProgram],
    max_cost: u64,
    cost_per_byte: u64,
    mempool_mode: bool,
) -> Result<SpendBundleConditions, ErrorCode> {
    let mut tracker = CostTracker {
        used: 0,
        max: max_cost,
    };
    tracker.charge((generator.len() as u64).saturating_mul(cost_per_byte))?;
    let program = generator
        .to_node()
        .map_err(|_| ErrorCode::GeneratorRuntimeError)?;
    let refs = generator_refs
        .iter()
        .map(SerializedProgram::to_node)
        .collect::<Result<Vec<NodePtr>, Error>>()
        .map_err(|_| ErrorCode::GeneratorRuntimeError)?;
    let (cost, spend_list) =
        run_program(&program, &SExp::list(refs), tracker.remaining()).map_err(|e| {
            debug!("Generator failed: {e}");
            ErrorCode::GeneratorRuntimeError
        })?;
    tracker.charge(cost)?;
    let entries = SExp::as_list(&spend_list).ok_or(ErrorCode::GeneratorRuntimeError)?;
    let mut state = ParseState::default();
    let mut conds = SpendBundleConditions::default();
    for entry in &entries {
        parse_spend(entry, &mut tracker, mempool_mode, &mut state, &mut conds)?;
    }
    if state
        .asserted_announcements
        .iter()
        .any(|a| !state.announcements.contains(a))
    {
        return Err(ErrorCode::AssertAnnounceConsumedFailed);
    }
    if state
        .asserted_concurrent
        .iter()
        .any(|c| !state.spent_ids.contains(c))
    {
        return Err(ErrorCode::AssertConcurrentSpendFailed);
    }
    conds.cost = tracker.used;
    Ok(conds)
}

/// Runs a block or mempool generator and parses the conditions of every spend.
///
/// The generator is evaluated with its references as the environment and must
/// produce a list of `(parent_id puzzle_reveal amount solution)` entries. All
/// costs, including `cost_per_byte` for the serialized generator, are charged
/// against `max_cost`. Unknown condition opcodes are ignored unless
/// `mempool_mode` is set.
#[must_use]
pub fn get_name_puzzle_conditions(
    generator: &SerializedProgram,
    generator_refs: &[SerializedProgram],
    max_cost: u64,
    cost_per_byte: u64,
    mempool_mode: bool,
) -> NpcResult {
    match run_generator(
        generator,
        generator_refs,
        max_cost,
        cost_per_byte,
        mempool_mode,
    ) {
        Ok(conds) => NpcResult::from_conds(conds),
        Err(e) => NpcResult::from_error(e),
    }
}

/// Quotes the coin spends of a bundle into a generator.
pub fn simple_solution_generator(bundle: &SpendBundle) -> Result<SerializedProgram, Error> {
    let mut entries = Vec::with_capacity(bundle.coin_spends.len());
    for coin_spend in &bundle.coin_spends {
        entries.push(SExp::list(vec![
            SExp::atom(coin_spend.coin.parent_coin_info.as_slice()),
            coin_spend.puzzle_reveal.to_node()?,
            SExp::from_u64(coin_spend.coin.amount),
            coin_spend.solution.to_node()?,
        ]));
    }
    SerializedProgram::from_node(&SExp::pair(SExp::from_u64(1), SExp::list(entries)))
}

/// Public key and message pairs the aggregate signature has to cover.
#[must_use]
pub fn pkm_pairs(conds: &SpendBundleConditions, additional_data: &[u8]) -> Vec<(Bytes48, Vec<u8>)> {
    let mut pairs = conds.agg_sig_unsafe.clone();
    for spend in &conds.spends {
        for (pk, msg) in &spend.agg_sig_me {
            let mut full = msg.clone();
            full.extend_from_slice(spend.coin_id.as_slice());
            full.extend_from_slice(additional_data);
            pairs.push((*pk, full));
        }
    }
    pairs
}

/// Checks absolute and relative time locks against the chain state a spend would be included on.
#[must_use]
pub fn mempool_check_time_locks(
    removal_coin_records: &HashMap<Bytes32, CoinRecord>,
    conds: &SpendBundleConditions,
    prev_transaction_block_height: u32,
    timestamp: u64,
) -> Option<ErrorCode> {
    if prev_transaction_block_height < conds.height_absolute {
        return Some(ErrorCode::AssertHeightAbsoluteFailed);
    }
    if timestamp < conds.seconds_absolute {
        return Some(ErrorCode::AssertSecondsAbsoluteFailed);
    }
    if let Some(before) = conds.before_height_absolute {
        if prev_transaction_block_height >= before {
            return Some(ErrorCode::AssertBeforeHeightAbsoluteFailed);
        }
    }
    if let Some(before) = conds.before_seconds_absolute {
        if timestamp >= before {
            return Some(ErrorCode::AssertBeforeSecondsAbsoluteFailed);
        }
    }
    for spend in &conds.spends {
        let Some(record) = removal_coin_records.get(&spend.coin_id) else {
            return Some(ErrorCode::UnknownUnspent);
        };
        let confirmed = u64::from(record.confirmed_block_index);
        let height = u64::from(prev_transaction_block_height);
        if let Some(rel) = spend.height_relative {
            if height < confirmed + u64::from(rel) {
                return Some(ErrorCode::AssertHeightRelativeFailed);
            }
        }
        if let Some(rel) = spend.seconds_relative {
            if timestamp < record.timestamp.saturating_add(rel) {
                return Some(ErrorCode::AssertSecondsRelativeFailed);
            }
        }
        if let Some(rel) = spend.before_height_relative {
            if height >= confirmed + u64::from(rel) {
                return Some(ErrorCode::AssertBeforeHeightRelativeFailed);
            }
        }
        if let Some(rel) = spend.before_seconds_relative {
            if timestamp >= record.timestamp.saturating_add(rel) {
                return Some(ErrorCode::AssertBeforeSecondsRelativeFailed);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::coin_spend::CoinSpend;
    use crate::blockchain::sized_bytes::Bytes96;

    fn anyone_can_spend() -> SerializedProgram {
        SerializedProgram::from_node(&SExp::from_u64(1)).unwrap()
    }

    fn cond(opcode: u64, args: Vec<NodePtr>) -> NodePtr {
        let mut items = vec![SExp::from_u64(opcode)];
        items.extend(args);
        SExp::list(items)
    }

    fn spend(parent: u8, amount: u64, conditions: Vec<NodePtr>) -> CoinSpend {
        let puzzle = anyone_can_spend();
        CoinSpend {
            coin: Coin::new(Bytes32::new([parent; 32]), puzzle.tree_hash().unwrap(), amount),
            puzzle_reveal: puzzle,
            solution: SerializedProgram::from_node(&SExp::list(conditions)).unwrap(),
        }
    }

    fn run(spends: Vec<CoinSpend>, mempool_mode: bool) -> NpcResult {
        let bundle = SpendBundle {
            coin_spends: spends,
            aggregated_signature: Bytes96::default(),
        };
        let generator = simple_solution_generator(&bundle).unwrap();
        get_name_puzzle_conditions(&generator, &[], 11_000_000_000, 1337, mempool_mode)
    }

    #[test]
    fn test_create_coin_and_fees() {
        let target = Bytes32::new([9u8; 32]);
        let result = run(
            vec![spend(
                1,
                1_000,
                vec![
                    cond(51, vec![SExp::atom(target.as_slice()), SExp::from_u64(600)]),
                    cond(52, vec![SExp::from_u64(400)]),
                ],
            )],
            true,
        );
        assert_eq!(result.error, None);
        let conds = result.conds.unwrap();
        assert_eq!(conds.additions().len(), 1);
        assert_eq!(conds.additions()[0].amount, 600);
        assert_eq!(conds.fees(), Some(400));
        assert_eq!(conds.reserve_fee, 400);
        assert!(conds.cost > 1_800_000);
    }

    #[test]
    fn test_conflicting_outputs_and_spends() {
        let target = Bytes32::new([9u8; 32]);
        let create = || cond(51, vec![SExp::atom(target.as_slice()), SExp::from_u64(1)]);
        let result = run(vec![spend(1, 10, vec![create(), create()])], false);
        assert_eq!(result.error, Some(ErrorCode::DuplicateOutput));
        let result = run(vec![spend(1, 10, vec![]), spend(1, 10, vec![])], false);
        assert_eq!(result.error, Some(ErrorCode::DoubleSpend));
    }

    #[test]
    fn test_unknown_condition_and_announcements() {
        let unknown = cond(200, vec![SExp::from_u64(1)]);
        assert_eq!(run(vec![spend(1, 10, vec![unknown.clone()])], false).error, None);
        assert_eq!(
            run(vec![spend(1, 10, vec![unknown])], true).error,
            Some(ErrorCode::InvalidCondition)
        );
        let first = spend(1, 10, vec![cond(60, vec![SExp::atom(b"hi".to_vec())])]);
        let announcement = std_hash([first.coin.name().as_slice(), b"hi".as_slice()].concat());
        let second = spend(
            2,
            10,
            vec![cond(61, vec![SExp::atom(announcement.as_slice())])],
        );
        assert_eq!(run(vec![first, second.clone()], true).error, None);
        assert_eq!(
            run(vec![second], true).error,
            Some(ErrorCode::AssertAnnounceConsumedFailed)
        );
    }

    #[test]
    fn test_cost_budget() {
        let bundle = SpendBundle {
            coin_spends: vec![spend(1, 10, vec![])],
            aggregated_signature: Bytes96::default(),
        };
        let generator = simple_solution_generator(&bundle).unwrap();
        let full = get_name_puzzle_conditions(&generator, &[], u64::MAX, 1337, false);
        let cost = full.cost();
        assert!(cost > 0);
        let exact = get_name_puzzle_conditions(&generator, &[], cost, 1337, false);
        assert_eq!(exact.cost(), cost);
        let short = get_name_puzzle_conditions(&generator, &[], cost - 1, 1337, false);
        assert_eq!(short.error, Some(ErrorCode::GeneratorRuntimeError));
    }

    #[test]
    fn test_time_locks() {
        let result = run(
            vec![spend(
                1,
                10,
                vec![
                    cond(83, vec![SExp::from_u64(5)]),
                    cond(82, vec![SExp::from_u64(2)]),
                ],
            )],
            true,
        );
        let conds = result.conds.unwrap();
        let record = CoinRecord {
            coin: conds.spends[0].coin(),
            confirmed_block_index: 4,
            spent_block_index: None,
            coinbase: false,
            timestamp: 100,
        };
        let records = HashMap::from([(record.name(), record)]);
        assert_eq!(
            mempool_check_time_locks(&records, &conds, 4, 200),
            Some(ErrorCode::AssertHeightAbsoluteFailed)
        );
        assert_eq!(
            mempool_check_time_locks(&records, &conds, 5, 200),
            Some(ErrorCode::AssertHeightRelativeFailed)
        );
        assert_eq!(mempool_check_time_locks(&records, &conds, 6, 200), None);
    }
}
