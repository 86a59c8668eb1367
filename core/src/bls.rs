use crate::blockchain::sized_bytes::{Bytes48, Bytes96, SizedBytes};
use blst::min_pk::{AggregateSignature, PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use std::io::{Error, ErrorKind};

pub const AUG_SCHEME_DST: &[u8; 43] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_AUG_";

/// Compressed G2 point at infinity, the signature of an empty aggregate.
pub const INFINITY_SIGNATURE: Bytes96 = {
    let mut bytes = [0u8; 96];
    bytes[0] = 0xc0;
    Bytes96::new(bytes)
};

#[must_use]
pub fn sign(local_sk: &SecretKey, msg: &[u8]) -> Signature {
    local_sk.sign(msg, AUG_SCHEME_DST, &local_sk.sk_to_pk().to_bytes())
}

#[must_use]
pub fn verify_signature(public_key: &PublicKey, msg: &[u8], signature: &Signature) -> bool {
    matches!(
        signature.verify(
            true,
            msg,
            AUG_SCHEME_DST,
            &public_key.to_bytes(),
            public_key,
            true
        ),
        BLST_ERROR::BLST_SUCCESS
    )
}

/// Verifies a serialized signature against a serialized key, any parse failure is a bad signature.
#[must_use]
pub fn verify_bytes(public_key: &Bytes48, msg: &[u8], signature: &Bytes96) -> bool {
    match (
        PublicKey::try_from(public_key),
        Signature::try_from(signature),
    ) {
        (Ok(pk), Ok(sig)) => verify_signature(&pk, msg, &sig),
        _ => false,
    }
}

/// AugScheme aggregate verification over `(public_key, message)` pairs.
#[must_use]
pub fn aggregate_verify_signature(pairs: &[(Bytes48, Vec<u8>)], signature: &Bytes96) -> bool {
    if pairs.is_empty() {
        return *signature == INFINITY_SIGNATURE;
    }
    let mut keys: Vec<PublicKey> = Vec::with_capacity(pairs.len());
    let mut msgs: Vec<Vec<u8>> = Vec::with_capacity(pairs.len());
    for (key, msg) in pairs {
        let Ok(pk) = PublicKey::try_from(key) else {
            return false;
        };
        let mut combined = Vec::with_capacity(48 + msg.len());
        combined.extend(key.as_slice());
        combined.extend(msg);
        keys.push(pk);
        msgs.push(combined);
    }
    let Ok(sig) = Signature::try_from(signature) else {
        return false;
    };
    matches!(
        sig.aggregate_verify(
            true,
            &msgs.iter().map(Vec::as_slice).collect::<Vec<&[u8]>>(),
            AUG_SCHEME_DST,
            &keys.iter().collect::<Vec<&PublicKey>>(),
            true,
        ),
        BLST_ERROR::BLST_SUCCESS
    )
}

pub fn aggregate_signatures(signatures: &[Bytes96]) -> Result<Bytes96, Error> {
    let parsed = signatures
        .iter()
        .filter(|s| **s != INFINITY_SIGNATURE)
        .map(Signature::try_from)
        .collect::<Result<Vec<Signature>, Error>>()?;
    if parsed.is_empty() {
        return Ok(INFINITY_SIGNATURE);
    }
    let agg = AggregateSignature::aggregate(&parsed.iter().collect::<Vec<&Signature>>(), true)
        .map_err(|e| {
            Error::new(
                ErrorKind::InvalidData,
                format!("Failed to aggregate signatures: {e:?}"),
            )
        })?;
    Ok(Bytes96::from(agg.to_signature()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_aggregate() {
        let sk1 = SecretKey::key_gen(&[1u8; 32], &[]).unwrap();
        let sk2 = SecretKey::key_gen(&[2u8; 32], &[]).unwrap();
        let pk1 = Bytes48::from(&sk1.sk_to_pk());
        let pk2 = Bytes48::from(&sk2.sk_to_pk());
        let s1 = Bytes96::from(sign(&sk1, b"first"));
        let s2 = Bytes96::from(sign(&sk2, b"second"));
        assert!(verify_bytes(&pk1, b"first", &s1));
        assert!(!verify_bytes(&pk2, b"first", &s1));
        let agg = aggregate_signatures(&[s1, s2, INFINITY_SIGNATURE]).unwrap();
        assert!(aggregate_verify_signature(
            &[(pk1, b"first".to_vec()), (pk2, b"second".to_vec())],
            &agg
        ));
        assert!(!aggregate_verify_signature(&[(pk1, b"first".to_vec())], &agg));
        assert_eq!(aggregate_signatures(&[]).unwrap(), INFINITY_SIGNATURE);
        assert!(aggregate_verify_signature(&[], &INFINITY_SIGNATURE));
    }
}
