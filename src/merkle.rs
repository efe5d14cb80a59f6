//! Fixed-depth binary Merkle tree over encoded quads.
//!
//! Leaves keep insertion order; the tree is never sorted, so its shape
//! depends on the order quads were supplied in. Positions past the last leaf
//! hold the zero field, and an internal node is `hash2([left, right])`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::field::Field;
use crate::hash::Hasher;

/// Largest supported depth.
pub const MAX_DEPTH: usize = 32;

/// Sibling path from one leaf to the root.
///
/// `directions[i]` is `true` when the running node at level `i` is a right
/// child, i.e. its sibling sits on the left.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub leaf_index: usize,
    pub siblings: Vec<Field>,
    pub directions: Vec<bool>,
}

impl InclusionProof {
    pub fn compute_root(&self, leaf: &Field, hasher: &Hasher) -> Field {
        let mut node = leaf.clone();
        for (sibling, is_right) in self.siblings.iter().zip(&self.directions) {
            node = if *is_right {
                hasher.hash2([sibling, &node])
            } else {
                hasher.hash2([&node, sibling])
            };
        }
        node
    }

    pub fn verify(&self, leaf: &Field, root: &Field, hasher: &Hasher) -> bool {
        self.siblings.len() == self.directions.len() && &self.compute_root(leaf, hasher) == root
    }
}

#[derive(Clone, Debug)]
pub struct CommitmentTree {
    depth: usize,
    // levels[0] holds the leaves, levels[depth] the root; only the occupied
    // prefix of each level is stored.
    levels: Vec<Vec<Field>>,
    // zero_hashes[l] is the root of an empty subtree of height l.
    zero_hashes: Vec<Field>,
}

impl CommitmentTree {
    /// `2^depth`, saturating; `u64` so depth 32 fits on 32-bit targets.
    pub fn capacity(depth: usize) -> u64 {
        u32::try_from(depth)
            .ok()
            .and_then(|d| 1u64.checked_shl(d))
            .unwrap_or(u64::MAX)
    }

    pub fn build(leaves: Vec<Field>, depth: usize, hasher: &Hasher) -> Result<Self> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(Error::Config(format!(
                "tree depth must be within 1..={MAX_DEPTH}, got {depth}"
            )));
        }
        let capacity = Self::capacity(depth);
        if leaves.len() as u64 > capacity {
            return Err(Error::TreeCapacity {
                quads: leaves.len(),
                capacity,
            });
        }

        let mut zero_hashes = Vec::with_capacity(depth + 1);
        zero_hashes.push(Field::zero());
        for level in 0..depth {
            let z = &zero_hashes[level];
            zero_hashes.push(hasher.hash2([z, z]));
        }

        let mut levels = Vec::with_capacity(depth + 1);
        levels.push(leaves);
        for level in 0..depth {
            let below = &levels[level];
            let next: Vec<Field> = below
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hasher.hash2([left, right]),
                    [left] => hasher.hash2([left, &zero_hashes[level]]),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(next);
        }

        Ok(Self {
            depth,
            levels,
            zero_hashes,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    pub fn root(&self) -> Field {
        self.levels[self.depth]
            .first()
            .cloned()
            .unwrap_or_else(|| self.zero_hashes[self.depth].clone())
    }

    pub fn leaf(&self, index: usize) -> Option<&Field> {
        self.levels[0].get(index)
    }

    pub fn proof(&self, leaf_index: usize) -> Option<InclusionProof> {
        if leaf_index >= self.len() {
            return None;
        }
        let mut siblings = Vec::with_capacity(self.depth);
        let mut directions = Vec::with_capacity(self.depth);
        let mut index = leaf_index;
        for level in 0..self.depth {
            let sibling_index = index ^ 1;
            let sibling = self.levels[level]
                .get(sibling_index)
                .cloned()
                .unwrap_or_else(|| self.zero_hashes[level].clone());
            siblings.push(sibling);
            directions.push(index & 1 == 1);
            index >>= 1;
        }
        Some(InclusionProof {
            leaf_index,
            siblings,
            directions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaves(n: u64) -> Vec<Field> {
        (1..=n).map(Field::from_u64).collect()
    }

    #[test]
    fn every_leaf_proves_membership() {
        let hasher = Hasher::default();
        let tree = CommitmentTree::build(leaves(5), 3, &hasher).unwrap();
        let root = tree.root();
        for i in 0..5 {
            let proof = tree.proof(i).unwrap();
            assert_eq!(proof.siblings.len(), 3);
            assert!(proof.verify(tree.leaf(i).unwrap(), &root, &hasher));
        }
        assert!(tree.proof(5).is_none());
    }

    #[test]
    fn full_tree_fits_and_overflow_is_rejected() {
        let hasher = Hasher::default();
        assert!(CommitmentTree::build(leaves(8), 3, &hasher).is_ok());
        match CommitmentTree::build(leaves(9), 3, &hasher) {
            Err(Error::TreeCapacity {
                quads: 9,
                capacity: 8,
            }) => {}
            other => panic!("expected TreeCapacity, got {other:?}"),
        }
    }

    #[test]
    fn capacity_covers_the_largest_depth() {
        assert_eq!(CommitmentTree::capacity(1), 2);
        assert_eq!(CommitmentTree::capacity(MAX_DEPTH), 1u64 << 32);
        assert_eq!(CommitmentTree::capacity(64), u64::MAX);
        let hasher = Hasher::default();
        let tree = CommitmentTree::build(leaves(3), MAX_DEPTH, &hasher).unwrap();
        let proof = tree.proof(2).unwrap();
        assert_eq!(proof.siblings.len(), MAX_DEPTH);
        assert!(proof.verify(tree.leaf(2).unwrap(), &tree.root(), &hasher));
    }

    #[test]
    fn leaf_order_changes_the_root() {
        let hasher = Hasher::default();
        let mut reversed = leaves(4);
        reversed.reverse();
        let a = CommitmentTree::build(leaves(4), 2, &hasher).unwrap();
        let b = CommitmentTree::build(reversed, 2, &hasher).unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn empty_tree_has_zero_subtree_root() {
        let hasher = Hasher::default();
        let empty = CommitmentTree::build(Vec::new(), 2, &hasher).unwrap();
        let z1 = hasher.hash2([&Field::zero(), &Field::zero()]);
        assert_eq!(empty.root(), hasher.hash2([&z1, &z1]));
    }

    proptest! {
        #[test]
        fn tampered_sibling_breaks_verification(
            n in 1u64..=16,
            pick in 0usize..16,
            level in 0usize..4,
            bit in 0usize..8,
        ) {
            let hasher = Hasher::default();
            let tree = CommitmentTree::build(leaves(n), 4, &hasher).unwrap();
            let index = pick % n as usize;
            let mut proof = tree.proof(index).unwrap();
            let leaf = tree.leaf(index).unwrap().clone();
            prop_assert!(proof.verify(&leaf, &tree.root(), &hasher));

            let mut bytes = proof.siblings[level].to_le_bytes();
            bytes[0] ^= 1 << bit;
            proof.siblings[level] = Field::from_le_bytes_mod_order(&bytes);
            prop_assert!(!proof.verify(&leaf, &tree.root(), &hasher));
        }
    }
}
