//! Crate-wide constants shared by the tree builder and proof verification.

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::{find_poseidon_ark_and_mds, PoseidonConfig};
use ark_ff::PrimeField;

/// Depth of every membership tree.
///
/// A depth-16 tree holds 65536 leaves, comfortably above the expected
/// participant count while keeping membership proofs short.
pub const TREE_DEPTH: usize = 16;

/// Maximum number of leaves a tree of `TREE_DEPTH` levels can hold.
///
/// Exceeding this is a configuration error, never a silent truncation.
pub const TREE_CAPACITY: usize = 1 << TREE_DEPTH;

// Poseidon sponge configuration.
//
// Width-3 sponge (rate=2, capacity=1) so each internal node absorbs its two
// children in a single permutation. Round counts follow widely used Poseidon
// instantiations for width=3.
//
// NOTE: This is a prototype. For production, parameters should be reviewed by
// cryptographers and ideally fixed via audited constants / standard sets.
pub const POSEIDON_RATE: usize = 2;
pub const POSEIDON_CAPACITY: usize = 1;

pub const POSEIDON_FULL_ROUNDS: usize = 8;
pub const POSEIDON_PARTIAL_ROUNDS: usize = 57;

/// Poseidon S-box exponent (alpha). Common choices are 5 or 17.
pub const POSEIDON_ALPHA: u64 = 5;

/// Deterministically derive Poseidon parameters for BN254::Fr.
///
/// Uses arkworks' parameter derivation helper (Ark + MDS) so every component
/// that hashes tree nodes agrees on the same constants.
pub fn poseidon_config() -> PoseidonConfig<Fr> {
    let prime_bits = Fr::MODULUS_BIT_SIZE as u64;

    let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
        prime_bits,
        POSEIDON_RATE,
        POSEIDON_FULL_ROUNDS as u64,
        POSEIDON_PARTIAL_ROUNDS as u64,
        0,
    );

    PoseidonConfig::new(
        POSEIDON_FULL_ROUNDS,
        POSEIDON_PARTIAL_ROUNDS,
        POSEIDON_ALPHA,
        mds,
        ark,
        POSEIDON_RATE,
        POSEIDON_CAPACITY,
    )
}
