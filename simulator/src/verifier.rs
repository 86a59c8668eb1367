use dg_node_core::blockchain::class_group_element::ClassgroupElement;
use dg_node_core::blockchain::sized_bytes::{Bytes100, Bytes32};
use dg_node_core::blockchain::vdf_info::VdfInfo;
use dg_node_core::blockchain::vdf_proof::VdfProof;
use dg_node_core::consensus::constants::ConsensusConstants;
use dg_node_core::consensus::verifier::ProofVerifier;
use sha2::{Digest, Sha256};

/// Deterministic stand-in for the class group VDF and the plot prover.
///
/// A VDF output encodes how many iterations separate it from the default
/// element on a given challenge, so any chain of proofs can be produced
/// instantly and checked exactly. Proofs of space are a hash of the plot
/// and challenge, their quality a hash of the proof.
#[derive(Debug, Default, Copy, Clone)]
pub struct SimulatedVerifier;

/// Output reached after `position` iterations from the default element on `challenge`.
#[must_use]
pub fn vdf_element(challenge: &Bytes32, position: u64) -> ClassgroupElement {
    if position == 0 {
        return ClassgroupElement::get_default_element();
    }
    let mut hasher = Sha256::new();
    hasher.update(b"vdf");
    hasher.update(challenge);
    hasher.update(position.to_be_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    let mut data = [0u8; 100];
    data[..32].copy_from_slice(&digest);
    data[32..40].copy_from_slice(&position.to_be_bytes());
    ClassgroupElement {
        data: Bytes100::new(data),
    }
}

fn vdf_position(challenge: &Bytes32, element: &ClassgroupElement) -> Option<u64> {
    if element.is_default() {
        return Some(0);
    }
    let mut position = [0u8; 8];
    position.copy_from_slice(&element.data.as_ref()[32..40]);
    let position = u64::from_be_bytes(position);
    (position > 0 && vdf_element(challenge, position) == *element).then_some(position)
}

fn vdf_witness(challenge: &Bytes32, input: &ClassgroupElement, iterations: u64) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(challenge);
    hasher.update(input.data);
    hasher.update(iterations.to_be_bytes());
    hasher.finalize().to_vec()
}

/// Runs `iterations` from `input` on `challenge`. `None` if `input` is not an output of that challenge.
#[must_use]
pub fn prove_vdf(
    challenge: &Bytes32,
    input: &ClassgroupElement,
    iterations: u64,
) -> Option<(VdfInfo, VdfProof)> {
    let start = vdf_position(challenge, input)?;
    let info = VdfInfo {
        challenge: *challenge,
        number_of_iterations: iterations,
        output: vdf_element(challenge, start.checked_add(iterations)?),
    };
    let proof = VdfProof {
        witness_type: 0,
        witness: vdf_witness(challenge, input, iterations),
        normalized_to_identity: false,
    };
    Some((info, proof))
}

#[must_use]
pub fn simulated_pos_proof(plot_id: &Bytes32, size: u8, challenge: &Bytes32) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(b"pos");
    hasher.update(plot_id);
    hasher.update([size]);
    hasher.update(challenge);
    hasher.finalize().to_vec()
}

fn quality_string(challenge: &Bytes32, proof: &[u8]) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update(challenge);
    hasher.update(proof);
    Bytes32::new(hasher.finalize().into())
}

impl ProofVerifier for SimulatedVerifier {
    fn pos_quality_string(
        &self,
        plot_id: &Bytes32,
        size: u8,
        challenge: &Bytes32,
        proof: &[u8],
    ) -> Option<Bytes32> {
        (simulated_pos_proof(plot_id, size, challenge) == proof)
            .then(|| quality_string(challenge, proof))
    }

    fn verify_vdf(
        &self,
        _constants: &ConsensusConstants,
        input: &ClassgroupElement,
        info: &VdfInfo,
        proof: &VdfProof,
    ) -> bool {
        let Some(start) = vdf_position(&info.challenge, input) else {
            return false;
        };
        let Some(end) = start.checked_add(info.number_of_iterations) else {
            return false;
        };
        vdf_element(&info.challenge, end) == info.output
            && proof.witness == vdf_witness(&info.challenge, input, info.number_of_iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dg_node_core::consensus::constants::TEST_CONSTANTS;

    #[test]
    fn test_vdf_chains_compose() {
        let challenge = Bytes32::new([7u8; 32]);
        let start = ClassgroupElement::get_default_element();
        let (first, first_proof) = prove_vdf(&challenge, &start, 100).unwrap();
        let (second, second_proof) = prove_vdf(&challenge, &first.output, 50).unwrap();
        let (direct, _) = prove_vdf(&challenge, &start, 150).unwrap();
        assert_eq!(second.output, direct.output);
        let verifier = SimulatedVerifier;
        assert!(verifier.verify_vdf(&TEST_CONSTANTS, &start, &first, &first_proof));
        assert!(verifier.verify_vdf(&TEST_CONSTANTS, &first.output, &second, &second_proof));
        assert!(!verifier.verify_vdf(&TEST_CONSTANTS, &start, &second, &second_proof));
        let mut wrong = second.clone();
        wrong.number_of_iterations += 1;
        assert!(!verifier.verify_vdf(&TEST_CONSTANTS, &first.output, &wrong, &second_proof));
    }

    #[test]
    fn test_vdf_input_must_belong_to_challenge() {
        let start = ClassgroupElement::get_default_element();
        let (info, _) = prove_vdf(&Bytes32::new([1u8; 32]), &start, 10).unwrap();
        assert!(prove_vdf(&Bytes32::new([2u8; 32]), &info.output, 10).is_none());
    }

    #[test]
    fn test_pos_quality() {
        let plot_id = Bytes32::new([3u8; 32]);
        let challenge = Bytes32::new([4u8; 32]);
        let proof = simulated_pos_proof(&plot_id, 18, &challenge);
        let verifier = SimulatedVerifier;
        assert!(verifier
            .pos_quality_string(&plot_id, 18, &challenge, &proof)
            .is_some());
        assert!(verifier
            .pos_quality_string(&plot_id, 19, &challenge, &proof)
            .is_none());
    }
}
