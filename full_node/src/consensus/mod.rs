use dg_node_core::blockchain::block_record::BlockRecord;
use dg_node_core::blockchain::sized_bytes::Bytes32;
use dg_node_core::blockchain::sub_epoch_summary::SubEpochSummary;
use dg_node_core::errors::{ErrorCode, ValidationError};
use std::collections::HashMap;

pub mod block_to_record;
pub mod body_validation;
pub mod challenge;
pub mod deficit;
pub mod difficulty;
pub mod header_validation;
pub mod pre_validation;
pub mod signage_point;

/// Read access to block records, the only view of the chain consensus code needs.
pub trait BlockRecords: Sync {
    fn try_block_record(&self, header_hash: &Bytes32) -> Option<&BlockRecord>;

    fn contains_block(&self, header_hash: &Bytes32) -> bool {
        self.try_block_record(header_hash).is_some()
    }

    /// Like `try_block_record` but a missing record is an error, walks over
    /// ancestors of validated blocks must always succeed.
    fn block_record(&self, header_hash: &Bytes32) -> Result<&BlockRecord, ValidationError> {
        self.try_block_record(header_hash).ok_or_else(|| {
            ValidationError::with_message(
                ErrorCode::ExtendsUnknownBlock,
                format!("missing block record {header_hash}"),
            )
        })
    }
}

/// Records of every known block plus the canonical height index.
#[derive(Default, Clone)]
pub struct BlockCache {
    pub records: HashMap<Bytes32, BlockRecord>,
    pub height_to_hash: HashMap<u32, Bytes32>,
    pub sub_epoch_summaries: HashMap<u32, SubEpochSummary>,
}
impl BlockRecords for BlockCache {
    fn try_block_record(&self, header_hash: &Bytes32) -> Option<&BlockRecord> {
        self.records.get(header_hash)
    }
}

/// A batch of records not yet committed, layered over the committed ones.
pub struct AugmentedRecords<'a, R: BlockRecords + ?Sized> {
    base: &'a R,
    extra: HashMap<Bytes32, BlockRecord>,
}
impl<'a, R: BlockRecords + ?Sized> AugmentedRecords<'a, R> {
    pub fn new(base: &'a R) -> Self {
        Self {
            base,
            extra: HashMap::new(),
        }
    }
    pub fn add_block_record(&mut self, record: BlockRecord) {
        self.extra.insert(record.header_hash, record);
    }
}
impl<R: BlockRecords + ?Sized> BlockRecords for AugmentedRecords<'_, R> {
    fn try_block_record(&self, header_hash: &Bytes32) -> Option<&BlockRecord> {
        self.extra
            .get(header_hash)
            .or_else(|| self.base.try_block_record(header_hash))
    }
}

/// Height of the last block both records descend from, `None` when they share no ancestor.
pub fn find_fork_point_in_chain<R: BlockRecords + ?Sized>(
    records: &R,
    block_1: &BlockRecord,
    block_2: &BlockRecord,
) -> Result<Option<u32>, ValidationError> {
    let mut block_1 = block_1;
    let mut block_2 = block_2;
    while block_1.height > 0 || block_2.height > 0 {
        if block_2.height > block_1.height {
            block_2 = records.block_record(&block_2.prev_hash)?;
        } else if block_1.height > block_2.height {
            block_1 = records.block_record(&block_1.prev_hash)?;
        } else {
            if block_1.header_hash == block_2.header_hash {
                return Ok(Some(block_1.height));
            }
            block_1 = records.block_record(&block_1.prev_hash)?;
            block_2 = records.block_record(&block_2.prev_hash)?;
        }
    }
    if block_1.header_hash == block_2.header_hash {
        Ok(Some(0))
    } else {
        Ok(None)
    }
}

/// Walks back from `header_hash` to the ancestor at `height`.
pub fn ancestor_at_height<'a, R: BlockRecords + ?Sized>(
    records: &'a R,
    header_hash: &Bytes32,
    height: u32,
) -> Result<&'a BlockRecord, ValidationError> {
    let mut curr = records.block_record(header_hash)?;
    while curr.height > height {
        curr = records.block_record(&curr.prev_hash)?;
    }
    if curr.height == height {
        Ok(curr)
    } else {
        Err(ValidationError::with_message(
            ErrorCode::InvalidHeight,
            format!("no ancestor of {header_hash} at height {height}"),
        ))
    }
}

/// Last transaction block at or before `header_hash`.
pub fn last_transaction_block<'a, R: BlockRecords + ?Sized>(
    records: &'a R,
    header_hash: &Bytes32,
) -> Result<&'a BlockRecord, ValidationError> {
    let mut curr = records.block_record(header_hash)?;
    while !curr.is_transaction_block() {
        curr = records.block_record(&curr.prev_hash)?;
    }
    Ok(curr)
}
