//! Merkle tree construction over proof digests.
//!
//! Leaves are the 32-byte raw digests, not their hex renderings. At each
//! interior level a pair is sorted by byte order before hashing, so an
//! inclusion proof is position-agnostic: the verifier applies the same
//! sort-then-hash at every step without needing left/right flags. An odd
//! leftover node is promoted to the next level unchanged, never
//! duplicated; a duplication-based tree over the same leaves produces a
//! different root.

use std::collections::HashSet;

use crate::{
    digest::keccak256,
    error::{AttestationError, Result},
};

/// Maximum number of leaves a batch may aggregate.
pub const MAX_BATCH_LEAVES: usize = 500;

/// Keccak-256 over the sorted concatenation of two nodes.
fn combine(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    if a <= b {
        buf[..32].copy_from_slice(a);
        buf[32..].copy_from_slice(b);
    } else {
        buf[..32].copy_from_slice(b);
        buf[32..].copy_from_slice(a);
    }
    keccak256(&buf)
}

/// Binary Merkle tree with the sort-pair-first interior rule.
///
/// Retains every level so inclusion proofs can be generated without
/// recomputation.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    /// Builds a tree over the given leaves, in order.
    ///
    /// # Errors
    ///
    /// Rejects empty input, more than [`MAX_BATCH_LEAVES`] leaves, and
    /// duplicate leaves.
    pub fn from_leaves(leaves: Vec<[u8; 32]>) -> Result<Self> {
        if leaves.is_empty() {
            return Err(AttestationError::EmptyBatch);
        }
        if leaves.len() > MAX_BATCH_LEAVES {
            return Err(AttestationError::BatchTooLarge {
                count: leaves.len(),
                max: MAX_BATCH_LEAVES,
            });
        }

        let mut seen = HashSet::with_capacity(leaves.len());
        if !leaves.iter().all(|leaf| seen.insert(*leaf)) {
            return Err(AttestationError::DuplicateLeaf);
        }

        let mut levels = vec![leaves];
        while levels[levels.len() - 1].len() > 1 {
            let current = &levels[levels.len() - 1];
            let mut next = Vec::with_capacity(current.len().div_ceil(2));

            for pair in current.chunks(2) {
                match pair {
                    [a, b] => next.push(combine(a, b)),
                    // Odd leftover: promoted unchanged.
                    [a] => next.push(*a),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                }
            }
            levels.push(next);
        }

        Ok(Self { levels })
    }

    /// Root of the tree. A single-leaf tree's root is its leaf.
    pub fn root(&self) -> [u8; 32] {
        self.levels[self.levels.len() - 1][0]
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Leaves in insertion order.
    pub fn leaves(&self) -> &[[u8; 32]] {
        &self.levels[0]
    }

    /// Sibling path for the leaf at `index`, bottom-up.
    ///
    /// Levels where the node was promoted without a partner contribute
    /// no path element. Returns `None` for an out-of-range index.
    pub fn proof(&self, index: usize) -> Option<Vec<[u8; 32]>> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut path = Vec::new();
        let mut position = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = position ^ 1;
            if sibling < level.len() {
                path.push(level[sibling]);
            }
            position /= 2;
        }

        Some(path)
    }
}

/// Verifies an inclusion proof against a root.
///
/// Re-applies the sort-then-hash combine at every step; no position
/// information is needed.
pub fn verify_inclusion(leaf: &[u8; 32], path: &[[u8; 32]], root: &[u8; 32]) -> bool {
    let computed = path.iter().fold(*leaf, |node, sibling| combine(&node, sibling));
    computed == *root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let tree = MerkleTree::from_leaves(vec![leaf(7)]).unwrap();
        assert_eq!(tree.root(), leaf(7));
        assert_eq!(tree.proof(0).unwrap(), Vec::<[u8; 32]>::new());
        assert!(verify_inclusion(&leaf(7), &[], &tree.root()));
    }

    #[test]
    fn two_leaves_combine_sorted() {
        let (lo, hi) = (leaf(1), leaf(2));

        let forward = MerkleTree::from_leaves(vec![lo, hi]).unwrap();
        let reversed = MerkleTree::from_leaves(vec![hi, lo]).unwrap();

        // Sorting before hashing makes leaf order irrelevant to the root.
        assert_eq!(forward.root(), reversed.root());

        let mut concat = [0u8; 64];
        concat[..32].copy_from_slice(&lo);
        concat[32..].copy_from_slice(&hi);
        assert_eq!(forward.root(), keccak256(&concat));
    }

    #[test]
    fn three_leaves_promote_the_odd_node() {
        let (h1, h2, h3) = (leaf(1), leaf(2), leaf(3));
        let tree = MerkleTree::from_leaves(vec![h1, h2, h3]).unwrap();

        // Root must be H(H(h1, h2), h3) with sorted combines, the
        // promoted leaf hashed once at the top, not duplicated.
        let expected = combine(&combine(&h1, &h2), &h3);
        assert_eq!(tree.root(), expected);

        let mut concat = [0u8; 64];
        concat[..32].copy_from_slice(&h3);
        concat[32..].copy_from_slice(&h3);
        let duplicated = combine(&combine(&h1, &h2), &keccak256(&concat));
        assert_ne!(tree.root(), duplicated, "duplication-based trees diverge");
    }

    #[test]
    fn every_leaf_verifies_against_the_root() {
        for count in [1usize, 2, 3, 4, 5, 8, 13, 500] {
            let leaves: Vec<[u8; 32]> =
                (0..count).map(|i| keccak256(&(i as u64).to_be_bytes())).collect();
            let tree = MerkleTree::from_leaves(leaves.clone()).unwrap();
            let root = tree.root();

            for (i, l) in leaves.iter().enumerate() {
                let path = tree.proof(i).unwrap();
                assert!(
                    verify_inclusion(l, &path, &root),
                    "leaf {i} of {count} must verify"
                );
            }
        }
    }

    #[test]
    fn proofs_do_not_verify_foreign_leaves() {
        let leaves: Vec<[u8; 32]> = (0..7u64).map(|i| keccak256(&i.to_be_bytes())).collect();
        let tree = MerkleTree::from_leaves(leaves).unwrap();

        let path = tree.proof(3).unwrap();
        let outsider = keccak256(b"not in the tree");
        assert!(!verify_inclusion(&outsider, &path, &tree.root()));
    }

    #[test]
    fn batch_size_limits_are_enforced() {
        assert!(matches!(
            MerkleTree::from_leaves(vec![]),
            Err(AttestationError::EmptyBatch)
        ));

        let max: Vec<[u8; 32]> =
            (0..500u64).map(|i| keccak256(&i.to_be_bytes())).collect();
        assert!(MerkleTree::from_leaves(max).is_ok());

        let over: Vec<[u8; 32]> =
            (0..501u64).map(|i| keccak256(&i.to_be_bytes())).collect();
        assert!(matches!(
            MerkleTree::from_leaves(over),
            Err(AttestationError::BatchTooLarge { count: 501, max: 500 })
        ));
    }

    #[test]
    fn duplicate_leaves_are_rejected() {
        assert!(matches!(
            MerkleTree::from_leaves(vec![leaf(9), leaf(9)]),
            Err(AttestationError::DuplicateLeaf)
        ));
    }

    #[test]
    fn out_of_range_proof_index_returns_none() {
        let tree = MerkleTree::from_leaves(vec![leaf(1), leaf(2)]).unwrap();
        assert!(tree.proof(2).is_none());
    }
}
