//! Membership accumulator layer for the community passport backend.
//!
//! This crate contains:
//! - A fixed-depth Poseidon Merkle tree built from an ordered list of identity commitments.
//! - Membership-proof generation and verification against a tree root.
//! - Hex wire types for transporting commitments and roots.

pub mod constants;
pub mod tree;
pub mod types;
