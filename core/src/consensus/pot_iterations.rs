use crate::blockchain::sized_bytes::Bytes32;
use crate::consensus::constants::ConsensusConstants;
use lazy_static::lazy_static;
use num_bigint::BigUint;
use num_traits::{One, ToPrimitive};
use sha2::{Digest, Sha256};
use std::cmp::max;
use std::io::{Error, ErrorKind};

lazy_static! {
    static ref TWO_POW_256: BigUint = BigUint::one() << 256;
}

pub fn is_overflow_block(
    constants: &ConsensusConstants,
    signage_point_index: u8,
) -> Result<bool, Error> {
    if u32::from(signage_point_index) >= constants.num_sps_sub_slot {
        Err(Error::new(ErrorKind::InvalidData, "SP index too high"))
    } else {
        Ok(u64::from(signage_point_index)
            >= u64::from(constants.num_sps_sub_slot) - constants.num_sp_intervals_extra)
    }
}

pub fn calculate_sp_interval_iters(
    constants: &ConsensusConstants,
    sub_slot_iters: u64,
) -> Result<u64, Error> {
    if sub_slot_iters % u64::from(constants.num_sps_sub_slot) != 0 {
        Err(Error::new(
            ErrorKind::InvalidData,
            format!("Invalid SubSlot Iterations: {sub_slot_iters}"),
        ))
    } else {
        Ok(sub_slot_iters / u64::from(constants.num_sps_sub_slot))
    }
}

pub fn calculate_sp_iters(
    constants: &ConsensusConstants,
    sub_slot_iters: u64,
    signage_point_index: u8,
) -> Result<u64, Error> {
    if u32::from(signage_point_index) >= constants.num_sps_sub_slot {
        Err(Error::new(ErrorKind::InvalidData, "SP index too high"))
    } else {
        Ok(calculate_sp_interval_iters(constants, sub_slot_iters)?
            * u64::from(signage_point_index))
    }
}

/// Infusion point of a block, relative to the start of its sub-slot (modulo overflow).
pub fn calculate_ip_iters(
    constants: &ConsensusConstants,
    sub_slot_iters: u64,
    signage_point_index: u8,
    required_iters: u64,
) -> Result<u64, Error> {
    let sp_iters = calculate_sp_iters(constants, sub_slot_iters, signage_point_index)?;
    let sp_interval_iters = calculate_sp_interval_iters(constants, sub_slot_iters)?;
    if sp_iters % sp_interval_iters != 0 || sp_iters >= sub_slot_iters {
        Err(Error::new(
            ErrorKind::InvalidData,
            format!("Invalid sp iters {sp_iters} for this ssi {sub_slot_iters}"),
        ))
    } else if required_iters >= sp_interval_iters || required_iters == 0 {
        Err(Error::new(
            ErrorKind::InvalidData,
            format!(
                "Required iters {required_iters} is not below the sp interval iters {sp_interval_iters}, {sub_slot_iters} or not > 0."
            ),
        ))
    } else {
        Ok(
            (sp_iters + constants.num_sp_intervals_extra * sp_interval_iters + required_iters)
                % sub_slot_iters,
        )
    }
}

#[must_use]
pub fn expected_plot_size(k: u8) -> u64 {
    ((2 * u64::from(k)) + 1) * 2u64.pow(u32::from(k).saturating_sub(1))
}

/// Iterations a proof of the given quality must wait past its signage point.
#[must_use]
pub fn calculate_iterations_quality(
    difficulty_constant_factor: u128,
    quality_string: &Bytes32,
    size: u8,
    difficulty: u64,
    cc_sp_output_hash: &Bytes32,
) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(quality_string);
    hasher.update(cc_sp_output_hash);
    let quality_int = BigUint::from_bytes_be(&hasher.finalize());
    let top = BigUint::from(difficulty) * BigUint::from(difficulty_constant_factor) * quality_int;
    let bottom = &*TWO_POW_256 * BigUint::from(expected_plot_size(size));
    let iters = top / bottom;
    max(1, iters.to_u64().unwrap_or(u64::MAX))
}
