//! Fixed-depth Merkle accumulator over an ordered commitment list.
//!
//! The tree is rebuilt from scratch on every use: construction is O(n) in the
//! number of leaves, leaf order is significant, and an identical leaf list
//! always produces an identical root. Absent subtrees are all-zero, so the
//! root of an empty tree is a well-defined constant per depth.

use crate::constants::{poseidon_config, TREE_CAPACITY, TREE_DEPTH};
use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::{PoseidonConfig, PoseidonSponge};
use ark_crypto_primitives::sponge::CryptographicSponge;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("tree capacity exceeded: capacity {capacity}, got {got} leaves")]
    CapacityExceeded { capacity: usize, got: usize },
}

/// Hash one internal node from its two children.
fn hash_pair(cfg: &PoseidonConfig<Fr>, left: Fr, right: Fr) -> Fr {
    let mut sponge = PoseidonSponge::<Fr>::new(cfg);
    sponge.absorb(&[left, right].as_slice());
    sponge.squeeze_field_elements(1)[0]
}

/// Sibling path from a leaf to the root.
///
/// `path_bits[i]` is true when the node at level `i` is a right child, i.e.
/// the sibling sits on the left.
#[derive(Clone, Debug)]
pub struct MerkleProof {
    pub siblings: Vec<Fr>,
    pub path_bits: Vec<bool>,
}

/// A fully materialized membership tree.
///
/// `levels[0]` holds the leaves in insertion order; `levels[TREE_DEPTH]`
/// holds the single root node.
pub struct MerkleTree {
    levels: Vec<Vec<Fr>>,
    zeroes: Vec<Fr>,
}

impl MerkleTree {
    /// Build a tree from an ordered leaf list.
    ///
    /// The capacity check runs before any hashing so oversized input fails
    /// fast with `CapacityExceeded`.
    pub fn build(leaves: &[Fr]) -> Result<Self, TreeError> {
        if leaves.len() > TREE_CAPACITY {
            return Err(TreeError::CapacityExceeded {
                capacity: TREE_CAPACITY,
                got: leaves.len(),
            });
        }

        let cfg = poseidon_config();

        // Zero-subtree hash for each level.
        let mut zeroes = Vec::with_capacity(TREE_DEPTH + 1);
        zeroes.push(Fr::from(0u64));
        for level in 0..TREE_DEPTH {
            let z = zeroes[level];
            zeroes.push(hash_pair(&cfg, z, z));
        }

        let mut levels: Vec<Vec<Fr>> = Vec::with_capacity(TREE_DEPTH + 1);
        levels.push(leaves.to_vec());

        for level in 0..TREE_DEPTH {
            let current = &levels[level];
            let mut next = Vec::with_capacity(current.len().div_ceil(2));

            for pair in current.chunks(2) {
                let left = pair[0];
                let right = if pair.len() == 2 { pair[1] } else { zeroes[level] };
                next.push(hash_pair(&cfg, left, right));
            }

            // An empty level collapses to the zero subtree of the next level.
            if next.is_empty() {
                next.push(zeroes[level + 1]);
            }

            levels.push(next);
        }

        Ok(Self { levels, zeroes })
    }

    pub fn root(&self) -> Fr {
        self.levels[TREE_DEPTH][0]
    }

    pub fn depth(&self) -> usize {
        TREE_DEPTH
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    pub fn leaves(&self) -> &[Fr] {
        &self.levels[0]
    }

    /// Membership proof for the leaf at `index`, or `None` if out of range.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut siblings = Vec::with_capacity(TREE_DEPTH);
        let mut path_bits = Vec::with_capacity(TREE_DEPTH);
        let mut position = index;

        for level in 0..TREE_DEPTH {
            let sibling = self.levels[level]
                .get(position ^ 1)
                .copied()
                .unwrap_or(self.zeroes[level]);
            siblings.push(sibling);
            path_bits.push(position & 1 == 1);
            position >>= 1;
        }

        Some(MerkleProof { siblings, path_bits })
    }
}

/// Compute the root of an ordered commitment list without keeping the tree.
pub fn compute_root(leaves: &[Fr]) -> Result<Fr, TreeError> {
    MerkleTree::build(leaves).map(|tree| tree.root())
}

/// Recompute the root from a leaf and its sibling path.
pub fn verify_proof(root: Fr, leaf: Fr, proof: &MerkleProof) -> bool {
    if proof.siblings.len() != TREE_DEPTH || proof.path_bits.len() != TREE_DEPTH {
        return false;
    }

    let cfg = poseidon_config();
    let mut node = leaf;

    for (sibling, is_right) in proof.siblings.iter().zip(&proof.path_bits) {
        node = if *is_right {
            hash_pair(&cfg, *sibling, node)
        } else {
            hash_pair(&cfg, node, *sibling)
        };
    }

    node == root
}
