//! Merkle root computation over byte leaves.
//!
//! The tree shape follows RFC 6962: leaves and inner nodes are
//! domain-separated with a one-byte prefix, and the left subtree of an
//! `n`-leaf tree holds the largest power of two strictly less than `n`.
//! The root of zero leaves is the hash of the empty string, which serves
//! as the empty-tree sentinel (e.g. the results hash of a block with no
//! transactions).

use crate::hash::Hash;

const LEAF_PREFIX: u8 = 0x00;
const INNER_PREFIX: u8 = 0x01;

/// Compute the merkle root of the given leaves.
pub fn merkle_root(leaves: &[Vec<u8>]) -> Hash {
    match leaves.len() {
        0 => Hash::of(&[]),
        1 => leaf_hash(&leaves[0]),
        n => {
            let k = split_point(n);
            let left = merkle_root(&leaves[..k]);
            let right = merkle_root(&leaves[k..]);
            inner_hash(&left, &right)
        }
    }
}

fn leaf_hash(leaf: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_PREFIX]);
    hasher.update(leaf);
    Hash(*hasher.finalize().as_bytes())
}

fn inner_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[INNER_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash(*hasher.finalize().as_bytes())
}

/// Largest power of two strictly less than `n`. Requires `n > 1`.
fn split_point(n: usize) -> usize {
    debug_assert!(n > 1);
    let mut k = 1;
    while k * 2 < n {
        k *= 2;
    }
    k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_root_is_stable_sentinel() {
        assert_eq!(merkle_root(&[]), Hash::of(&[]));
    }

    #[test]
    fn single_leaf_is_prefixed() {
        let root = merkle_root(&[b"leaf".to_vec()]);
        assert_ne!(
            root,
            Hash::of(b"leaf"),
            "leaf hashing must be domain-separated from plain hashing"
        );
    }

    #[test]
    fn root_depends_on_leaf_order() {
        let a = merkle_root(&[b"a".to_vec(), b"b".to_vec()]);
        let b = merkle_root(&[b"b".to_vec(), b"a".to_vec()]);
        assert_ne!(a, b);
    }

    #[test]
    fn split_points() {
        assert_eq!(split_point(2), 1);
        assert_eq!(split_point(3), 2);
        assert_eq!(split_point(4), 2);
        assert_eq!(split_point(5), 4);
        assert_eq!(split_point(8), 4);
        assert_eq!(split_point(9), 8);
    }

    #[test]
    fn unbalanced_tree_matches_manual_construction() {
        let leaves: Vec<Vec<u8>> = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let left = inner_hash(&leaf_hash(b"a"), &leaf_hash(b"b"));
        let expected = inner_hash(&left, &leaf_hash(b"c"));
        assert_eq!(merkle_root(&leaves), expected);
    }
}
