//! Merkle block payloads: the header plus a partial merkle proof that a
//! subset of transactions belongs to the block.

use serde::{Deserialize, Serialize};

use crate::codec::ByteReader;
use crate::error::{Result, SpvError};
use crate::merkle::{bytes_to_bit_field, MerkleTree};
use crate::types::Hash;

/// A `merkleblock` payload: header fields, the transaction count, the
/// proof hashes, and the traversal flag bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleBlock {
    pub version: u32,
    /// Display order; reversed on the wire.
    pub prev_block: Hash,
    /// Display order; reversed on the wire.
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: [u8; 4],
    pub nonce: [u8; 4],
    pub total: u32,
    /// Proof hashes in display order; reversed on the wire.
    pub hashes: Vec<Hash>,
    /// Flag bytes, bits LSB-first within each byte.
    pub flags: Vec<u8>,
}

impl MerkleBlock {
    /// Parse a complete merkleblock payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);

        let version = reader.read_u32_le()?;
        let mut prev_block = reader.read_array::<32>()?;
        prev_block.reverse();
        let mut merkle_root = reader.read_array::<32>()?;
        merkle_root.reverse();
        let timestamp = reader.read_u32_le()?;
        let bits = reader.read_array::<4>()?;
        let nonce = reader.read_array::<4>()?;

        let total = reader.read_u32_le()?;
        let num_hashes = reader.read_varint()?;
        let mut hashes = Vec::with_capacity(num_hashes.min(1024) as usize);
        for _ in 0..num_hashes {
            let mut hash = reader.read_array::<32>()?;
            hash.reverse();
            hashes.push(hash);
        }

        let flag_len = reader.read_varint()? as usize;
        let flags = reader.take(flag_len)?.to_vec();

        if !reader.is_empty() {
            return Err(SpvError::Malformed(format!(
                "{} trailing bytes after merkle block",
                reader.remaining()
            )));
        }

        Ok(Self {
            version,
            prev_block,
            merkle_root,
            timestamp,
            bits,
            nonce,
            total,
            hashes,
            flags,
        })
    }

    /// Replay the partial tree and compare its root against the header.
    ///
    /// `Ok(false)` means the proof replayed cleanly but commits to a
    /// different root; `Err(Proof)` means the proof itself is malformed.
    pub fn is_valid(&self) -> Result<bool> {
        let flag_bits = bytes_to_bit_field(&self.flags);
        // the tree hashes in little-endian order
        let hashes_le: Vec<Hash> = self
            .hashes
            .iter()
            .map(|hash| {
                let mut le = *hash;
                le.reverse();
                le
            })
            .collect();

        let mut tree = MerkleTree::new(self.total)?;
        tree.populate(&flag_bits, &hashes_le)?;
        let mut root = tree
            .root()
            .ok_or_else(|| SpvError::Proof("replay left no root".to_string()))?;
        root.reverse();
        Ok(root == self.merkle_root)
    }
}
