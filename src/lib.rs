//! # spv-core
//!
//! Bitcoin light-client core: transaction construction, parsing, signing
//! and verification; Script execution for the standard lock/unlock
//! patterns (P2PKH, P2SH, P2WPKH, multisig); and SPV validation of partial
//! merkle proofs against block headers.
//!
//! ## Architecture
//!
//! The crate is a stack of pure, synchronous layers:
//! - codec: varints, little-endian integers, byte reversal, base58check
//! - hashing: hash256 and hash160 compositions
//! - script: command codec and the stack-machine VM
//! - transaction: wire formats, sighash (legacy and BIP-143), verification
//! - block / merkle / spv: headers, targets, partial-proof replay
//!
//! The only I/O is the [`UtxoFetcher`] collaborator, which supplies raw
//! previous transactions. ECDSA and the hash primitives are consumed from
//! their respective crates; the curve is never reimplemented.
//!
//! ## Usage
//!
//! ```rust
//! use spv_core::{MemoryFetcher, SpvClient};
//!
//! let fetcher = MemoryFetcher::new();
//! let client = SpvClient::new(fetcher, false);
//!
//! let raw = hex::decode(
//!     "0100000001813f79011acb80925dfe69b3def355fe914bd1d96a3f5f71bf8303c6a989c7d1000000\
//!      006b483045022100ed81ff192e75a3fd2304004dcadb746fa5e24c5031ccfcf21320b0277457c98f0\
//!      2207a986d955c6e0cb35d446a89d3f56100f4d7f67801c31967743a9c8e10615bed01210349fc4e63\
//!      1e3624a545de3f89f5d8684c7b8138bd94bdd531d2e213bf016b278afeffffff02a135ef0100000000\
//!      1976a914bc3b654dca7e56b04dca18f2566cdaf02e8d9ada88ac99c39800000000001976a9141c4bc7\
//!      62dd5423e332166702cb75f40df79fea1288ac19430600",
//! )
//! .unwrap();
//! let tx = client.parse_transaction(&raw).unwrap();
//! assert_eq!(tx.outputs.len(), 2);
//! ```

pub mod block;
pub mod codec;
pub mod constants;
pub mod error;
pub mod fetcher;
pub mod hashing;
pub mod keys;
pub mod merkle;
pub mod script;
pub mod spv;
pub mod transaction;
pub mod types;

pub use block::{
    bits_to_target, compute_new_bits, compute_new_target, target_to_bits, BlockHeader, U256,
};
pub use error::{Result, ScriptError, SpvError};
pub use fetcher::{MemoryFetcher, UtxoFetcher};
pub use keys::{pubkey_to_address, verify_signature, PrivateKey};
pub use merkle::{merkle_parent, merkle_parent_level, merkle_root, MerkleTree};
pub use script::{p2pkh_script, p2sh_script, p2wpkh_script, Script, ScriptCommand};
pub use spv::MerkleBlock;
pub use transaction::{Transaction, TxInput, TxOutput};
pub use types::{ByteString, Hash, Hash160};

/// Light-client entry point.
///
/// Holds the previous-transaction fetcher so callers inject it once, at
/// construction, instead of threading it through every call.
pub struct SpvClient<F: UtxoFetcher> {
    fetcher: F,
    testnet: bool,
}

impl<F: UtxoFetcher> SpvClient<F> {
    pub fn new(fetcher: F, testnet: bool) -> Self {
        Self { fetcher, testnet }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn fetcher_mut(&mut self) -> &mut F {
        &mut self.fetcher
    }

    /// Parse a raw transaction for this client's network.
    pub fn parse_transaction(&self, raw: &[u8]) -> Result<Transaction> {
        Transaction::parse(raw, self.testnet)
    }

    /// Fee in satoshis of a parsed transaction.
    pub fn transaction_fee(&self, tx: &Transaction) -> Result<i64> {
        tx.fee(&self.fetcher)
    }

    /// The signature digest for one input, dispatching on the spent
    /// script: BIP-143 for P2WPKH, legacy otherwise.
    pub fn sighash(&self, tx: &Transaction, input_index: usize) -> Result<Hash> {
        let prev = tx.prev_output(input_index, &self.fetcher)?;
        if prev.script_pubkey.is_p2wpkh() {
            tx.sighash_bip143(input_index, &self.fetcher)
        } else {
            tx.sighash_legacy(input_index, &self.fetcher)
        }
    }

    pub fn verify_input(&self, tx: &Transaction, input_index: usize) -> Result<bool> {
        tx.verify_input(input_index, &self.fetcher)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> bool {
        tx.verify(&self.fetcher)
    }

    pub fn sign_input(
        &self,
        tx: &mut Transaction,
        input_index: usize,
        key: &PrivateKey,
    ) -> Result<()> {
        tx.sign_input(input_index, key, &self.fetcher)
    }

    /// Parse a merkleblock payload and replay its proof.
    pub fn validate_merkle_block(&self, payload: &[u8]) -> Result<bool> {
        MerkleBlock::parse(payload)?.is_valid()
    }

    pub fn check_proof_of_work(&self, header: &BlockHeader) -> bool {
        header.check_proof_of_work()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::hash160;
    use crate::script::p2pkh_script;

    #[test]
    fn test_client_signs_and_verifies_through_facade() {
        let key = PrivateKey::from_u64(271828).unwrap();
        let locking = p2pkh_script(&hash160(&key.sec_compressed()));

        let funding = Transaction::new(
            1,
            vec![TxInput::new([0x99; 32], 0)],
            vec![TxOutput::new(25_000, locking)],
            0,
            false,
        );

        let mut fetcher = MemoryFetcher::new();
        fetcher.insert(&funding.txid().unwrap(), funding.serialize().unwrap());
        let client = SpvClient::new(fetcher, false);

        let mut spend = Transaction::new(
            1,
            vec![TxInput::new(funding.hash().unwrap(), 0)],
            vec![TxOutput::new(24_000, p2pkh_script(&[0x01; 20]))],
            0,
            false,
        );

        assert_eq!(client.transaction_fee(&spend).unwrap(), 1_000);
        client.sign_input(&mut spend, 0, &key).unwrap();
        assert!(client.verify_input(&spend, 0).unwrap());
        assert!(client.verify_transaction(&spend));

        // sighash dispatch picks the legacy path for a P2PKH spend
        let z = client.sighash(&spend, 0).unwrap();
        assert_eq!(z, spend.sighash_legacy(0, client.fetcher()).unwrap());
    }

    #[test]
    fn test_client_rejects_unfetchable_input() {
        let client = SpvClient::new(MemoryFetcher::new(), true);
        let spend = Transaction::new(
            1,
            vec![TxInput::new([0xaa; 32], 0)],
            vec![TxOutput::new(1, p2pkh_script(&[0x02; 20]))],
            0,
            true,
        );
        assert!(matches!(
            client.transaction_fee(&spend),
            Err(SpvError::Fetch(_))
        ));
        assert!(!client.verify_transaction(&spend));
    }
}
