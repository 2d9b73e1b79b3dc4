//! Wire types shared between the accumulator and the backend.

use ark_bn254::Fr;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use serde::{Deserialize, Serialize};

/// JSON-friendly representation of a field element.
///
/// Commitments and roots travel as hex strings of arkworks' canonical
/// compressed encoding so all components agree on one format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentHex {
    pub hex: String,
}

impl CommitmentHex {
    pub fn from_fr(x: &Fr) -> Self {
        let mut bytes = Vec::new();
        x.serialize_compressed(&mut bytes)
            .expect("in-memory serialization");
        Self { hex: hex::encode(bytes) }
    }

    pub fn to_fr(&self) -> Result<Fr, String> {
        let bytes = hex::decode(&self.hex).map_err(|e| format!("invalid hex: {e}"))?;
        Fr::deserialize_compressed(&bytes[..]).map_err(|e| format!("invalid field bytes: {e}"))
    }
}

/// Serialized form of one group at one root.
///
/// This is the payload archived in the history store and returned to clients
/// that rebuild the tree locally to generate membership proofs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerializedGroup {
    pub id: String,
    pub name: String,
    pub depth: usize,
    /// Root as compressed hex.
    pub root: String,
    /// Member commitments as compressed hex, in creation order.
    pub members: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_hex_round_trips() {
        let x = Fr::from(123456789u64);
        let hex = CommitmentHex::from_fr(&x);
        assert_eq!(hex.to_fr().unwrap(), x);
    }

    #[test]
    fn rejects_malformed_hex() {
        let bad = CommitmentHex { hex: "zz".to_string() };
        assert!(bad.to_fr().is_err());
    }
}
