use crate::blockchain::class_group_element::ClassgroupElement;
use crate::blockchain::sized_bytes::Bytes32;
use crate::blockchain::vdf_info::VdfInfo;
use crate::blockchain::vdf_proof::VdfProof;
use crate::consensus::constants::ConsensusConstants;

/// Proof of space and VDF checks the consensus engine delegates.
///
/// Implementations must be deterministic and side effect free, they are
/// called concurrently from the pre-validation pool.
pub trait ProofVerifier: Send + Sync {
    /// Quality string of a proof of space, `None` if the proof does not verify.
    fn pos_quality_string(
        &self,
        plot_id: &Bytes32,
        size: u8,
        challenge: &Bytes32,
        proof: &[u8],
    ) -> Option<Bytes32>;

    /// Whether `proof` shows `info.output` is reached from `input` after
    /// `info.number_of_iterations` on the discriminant built from `info.challenge`.
    fn verify_vdf(
        &self,
        constants: &ConsensusConstants,
        input: &ClassgroupElement,
        info: &VdfInfo,
        proof: &VdfProof,
    ) -> bool;
}

impl VdfProof {
    /// Validates the proof, and when `target_vdf_info` is given also that
    /// `info` is exactly the expected one.
    pub fn is_valid(
        &self,
        constants: &ConsensusConstants,
        verifier: &dyn ProofVerifier,
        input_el: &ClassgroupElement,
        info: &VdfInfo,
        target_vdf_info: Option<&VdfInfo>,
    ) -> bool {
        if let Some(target) = target_vdf_info {
            if info != target {
                return false;
            }
        }
        if u16::from(self.witness_type) + 1 > u16::from(constants.max_vdf_witness_size) {
            return false;
        }
        verifier.verify_vdf(constants, input_el, info, self)
    }
}
