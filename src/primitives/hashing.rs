//! Bitcoin-compatible hashing functions
//!
//! Double SHA256 for block/transaction identifiers and merkle trees.

use sha2::{Digest, Sha256};

use super::Hash256;

/// Calculate Bitcoin double SHA256 hash
pub fn double_sha256(data: &[u8]) -> Hash256 {
    let first_hash = Sha256::digest(data);
    let second_hash = Sha256::digest(first_hash);

    let mut result = [0u8; 32];
    result.copy_from_slice(&second_hash);
    Hash256(result)
}

/// Compute a merkle root, reporting whether the tree is mutated
///
/// A tree is mutated when two identical hashes are paired at any level
/// (CVE-2012-2459): such a transaction list has the same root as a shorter
/// list, so the root alone does not commit to it. An empty list yields the
/// zero hash.
pub fn merkle_root(leaves: &[Hash256]) -> (Hash256, bool) {
    if leaves.is_empty() {
        return (Hash256::ZERO, false);
    }

    let mut mutated = false;
    let mut level: Vec<Hash256> = leaves.to_vec();
    while level.len() > 1 {
        for pair in level.chunks(2) {
            if pair.len() == 2 && pair[0] == pair[1] {
                mutated = true;
            }
        }
        if level.len() % 2 == 1 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(pair[0].as_bytes());
                buf[32..].copy_from_slice(pair[1].as_bytes());
                double_sha256(&buf)
            })
            .collect();
    }
    (level[0], mutated)
}
