//! Transaction wire codec, signature hashing, and verification.
//!
//! Both serializations are supported: legacy and segwit (marker 0x00, flag
//! 0x01, per-input witness stacks before the locktime). The txid always
//! commits to the legacy form, so witness data never changes it. Signature
//! hashes are built from scratch into a preimage buffer; the transaction
//! being signed or verified is never mutated.

use serde::{Deserialize, Serialize};

use crate::codec::{encode_varint, reverse_bytes, ByteReader};
use crate::constants::{SEQUENCE_FINAL, SIGHASH_ALL};
use crate::error::{Result, SpvError};
use crate::fetcher::UtxoFetcher;
use crate::hashing::hash256;
use crate::keys::PrivateKey;
use crate::script::{p2pkh_script, Script, ScriptCommand};
use crate::types::{ByteString, Hash};

/// One spend of a previous output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Referenced txid in display (big-endian) order; reversed on the wire.
    pub prev_txid: Hash,
    pub prev_index: u32,
    pub script_sig: Script,
    pub sequence: u32,
    pub witness: Vec<ByteString>,
}

impl TxInput {
    pub fn new(prev_txid: Hash, prev_index: u32) -> Self {
        Self {
            prev_txid,
            prev_index,
            script_sig: Script::default(),
            sequence: SEQUENCE_FINAL,
            witness: Vec::new(),
        }
    }

    fn parse(reader: &mut ByteReader) -> Result<Self> {
        let wire_txid = reader.read_array::<32>()?;
        let mut prev_txid = wire_txid;
        prev_txid.reverse();
        let prev_index = reader.read_u32_le()?;
        let script_sig = Script::parse(reader)?;
        let sequence = reader.read_u32_le()?;
        Ok(Self {
            prev_txid,
            prev_index,
            script_sig,
            sequence,
            witness: Vec::new(),
        })
    }

    fn serialize(&self) -> Result<ByteString> {
        let mut out = reverse_bytes(&self.prev_txid);
        out.extend_from_slice(&self.prev_index.to_le_bytes());
        out.extend_from_slice(&self.script_sig.serialize()?);
        out.extend_from_slice(&self.sequence.to_le_bytes());
        Ok(out)
    }
}

/// An amount locked by a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub amount: u64,
    pub script_pubkey: Script,
}

impl TxOutput {
    pub fn new(amount: u64, script_pubkey: Script) -> Self {
        Self {
            amount,
            script_pubkey,
        }
    }

    fn parse(reader: &mut ByteReader) -> Result<Self> {
        let amount = reader.read_u64_le()?;
        let script_pubkey = Script::parse(reader)?;
        Ok(Self {
            amount,
            script_pubkey,
        })
    }

    pub(crate) fn serialize(&self) -> Result<ByteString> {
        let mut out = self.amount.to_le_bytes().to_vec();
        out.extend_from_slice(&self.script_pubkey.serialize()?);
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u32,
    /// True iff at least one input carries a non-empty witness.
    pub segwit: bool,
    pub testnet: bool,
}

impl Transaction {
    pub fn new(
        version: u32,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        locktime: u32,
        testnet: bool,
    ) -> Self {
        let segwit = inputs.iter().any(|i| !i.witness.is_empty());
        Self {
            version,
            inputs,
            outputs,
            locktime,
            segwit,
            testnet,
        }
    }

    /// Parse a raw transaction, dispatching on the segwit marker byte.
    pub fn parse(raw: &[u8], testnet: bool) -> Result<Self> {
        let mut reader = ByteReader::new(raw);
        let version = reader.read_u32_le()?;

        let has_marker = reader.peek_byte()? == 0x00;
        if has_marker {
            let marker = reader.read_byte()?;
            let flag = reader.read_byte()?;
            if marker != 0x00 || flag != 0x01 {
                return Err(SpvError::Malformed(format!(
                    "bad segwit marker/flag {marker:#04x}/{flag:#04x}"
                )));
            }
        }

        let input_count = reader.read_varint()?;
        if input_count == 0 {
            return Err(SpvError::Malformed("transaction has no inputs".to_string()));
        }
        let mut inputs = Vec::with_capacity(input_count.min(1024) as usize);
        for _ in 0..input_count {
            inputs.push(TxInput::parse(&mut reader)?);
        }

        let output_count = reader.read_varint()?;
        if output_count == 0 {
            return Err(SpvError::Malformed(
                "transaction has no outputs".to_string(),
            ));
        }
        let mut outputs = Vec::with_capacity(output_count.min(1024) as usize);
        for _ in 0..output_count {
            outputs.push(TxOutput::parse(&mut reader)?);
        }

        if has_marker {
            for input in inputs.iter_mut() {
                let item_count = reader.read_varint()?;
                for _ in 0..item_count {
                    let len = reader.read_varint()? as usize;
                    input.witness.push(reader.take(len)?.to_vec());
                }
            }
        }

        let locktime = reader.read_u32_le()?;
        if !reader.is_empty() {
            return Err(SpvError::Malformed(format!(
                "{} trailing bytes after transaction",
                reader.remaining()
            )));
        }

        let segwit = inputs.iter().any(|i| !i.witness.is_empty());
        Ok(Self {
            version,
            inputs,
            outputs,
            locktime,
            segwit,
            testnet,
        })
    }

    pub fn serialize(&self) -> Result<ByteString> {
        if self.segwit {
            self.serialize_segwit()
        } else {
            self.serialize_legacy()
        }
    }

    /// Witness-stripped serialization; the form txids commit to.
    pub fn serialize_legacy(&self) -> Result<ByteString> {
        let mut out = self.version.to_le_bytes().to_vec();
        out.extend_from_slice(&encode_varint(self.inputs.len() as u64));
        for input in &self.inputs {
            out.extend_from_slice(&input.serialize()?);
        }
        out.extend_from_slice(&encode_varint(self.outputs.len() as u64));
        for output in &self.outputs {
            out.extend_from_slice(&output.serialize()?);
        }
        out.extend_from_slice(&self.locktime.to_le_bytes());
        Ok(out)
    }

    pub fn serialize_segwit(&self) -> Result<ByteString> {
        let mut out = self.version.to_le_bytes().to_vec();
        out.extend_from_slice(&[0x00, 0x01]);
        out.extend_from_slice(&encode_varint(self.inputs.len() as u64));
        for input in &self.inputs {
            out.extend_from_slice(&input.serialize()?);
        }
        out.extend_from_slice(&encode_varint(self.outputs.len() as u64));
        for output in &self.outputs {
            out.extend_from_slice(&output.serialize()?);
        }
        for input in &self.inputs {
            out.extend_from_slice(&encode_varint(input.witness.len() as u64));
            for item in &input.witness {
                out.extend_from_slice(&encode_varint(item.len() as u64));
                out.extend_from_slice(item);
            }
        }
        out.extend_from_slice(&self.locktime.to_le_bytes());
        Ok(out)
    }

    /// Transaction id bytes: reversed hash256 of the legacy serialization.
    pub fn hash(&self) -> Result<Hash> {
        let mut digest = hash256(&self.serialize_legacy()?);
        digest.reverse();
        Ok(digest)
    }

    /// Display-order hex txid.
    pub fn txid(&self) -> Result<String> {
        Ok(hex::encode(self.hash()?))
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_txid == [0u8; 32]
            && self.inputs[0].prev_index == 0xffffffff
    }

    /// Attach a witness stack to an input, keeping the segwit flag honest.
    pub fn set_witness(&mut self, input_index: usize, witness: Vec<ByteString>) -> Result<()> {
        if input_index >= self.inputs.len() {
            return Err(SpvError::Malformed(format!(
                "input index {input_index} out of range"
            )));
        }
        self.inputs[input_index].witness = witness;
        self.segwit = self.inputs.iter().any(|i| !i.witness.is_empty());
        Ok(())
    }

    fn input(&self, input_index: usize) -> Result<&TxInput> {
        self.inputs.get(input_index).ok_or_else(|| {
            SpvError::Malformed(format!("input index {input_index} out of range"))
        })
    }

    /// Fetch and parse the transaction an input spends from.
    fn prev_transaction(
        &self,
        input_index: usize,
        fetcher: &dyn UtxoFetcher,
    ) -> Result<Transaction> {
        let input = self.input(input_index)?;
        let raw = fetcher.fetch(&hex::encode(input.prev_txid), self.testnet)?;
        Transaction::parse(&raw, self.testnet)
    }

    /// The output an input spends: its amount and locking script.
    pub fn prev_output(&self, input_index: usize, fetcher: &dyn UtxoFetcher) -> Result<TxOutput> {
        let input = self.input(input_index)?;
        let prev = self.prev_transaction(input_index, fetcher)?;
        prev.outputs
            .get(input.prev_index as usize)
            .cloned()
            .ok_or_else(|| {
                SpvError::Fetch(format!(
                    "output {} not present in {}",
                    input.prev_index,
                    hex::encode(input.prev_txid)
                ))
            })
    }

    /// Fee in satoshis; negative means the transaction creates money.
    pub fn fee(&self, fetcher: &dyn UtxoFetcher) -> Result<i64> {
        let mut input_sum: i64 = 0;
        for i in 0..self.inputs.len() {
            input_sum += self.prev_output(i, fetcher)?.amount as i64;
        }
        let output_sum: i64 = self.outputs.iter().map(|o| o.amount as i64).sum();
        Ok(input_sum - output_sum)
    }

    /// Legacy SIGHASH_ALL digest for one input.
    ///
    /// For P2SH-wrapped inputs the redeem script (the last push of the
    /// existing script_sig) stands in for the locking script.
    pub fn sighash_legacy(&self, input_index: usize, fetcher: &dyn UtxoFetcher) -> Result<Hash> {
        let prev = self.prev_output(input_index, fetcher)?;
        let script_code = if prev.script_pubkey.is_p2sh() {
            match self.input(input_index)?.script_sig.cmds.last() {
                Some(ScriptCommand::Data(raw)) => Script::parse_raw(raw)?,
                _ => {
                    return Err(SpvError::Malformed(
                        "P2SH input carries no redeem script".to_string(),
                    ))
                }
            }
        } else {
            prev.script_pubkey
        };
        self.sighash_legacy_with(input_index, &script_code)
    }

    /// Legacy digest against an explicit script code. The preimage is built
    /// from scratch; `self` is left untouched.
    pub fn sighash_legacy_with(&self, input_index: usize, script_code: &Script) -> Result<Hash> {
        self.input(input_index)?;
        let mut preimage = self.version.to_le_bytes().to_vec();
        preimage.extend_from_slice(&encode_varint(self.inputs.len() as u64));
        for (i, input) in self.inputs.iter().enumerate() {
            preimage.extend_from_slice(&reverse_bytes(&input.prev_txid));
            preimage.extend_from_slice(&input.prev_index.to_le_bytes());
            if i == input_index {
                preimage.extend_from_slice(&script_code.serialize()?);
            } else {
                preimage.extend_from_slice(&encode_varint(0));
            }
            preimage.extend_from_slice(&input.sequence.to_le_bytes());
        }
        preimage.extend_from_slice(&encode_varint(self.outputs.len() as u64));
        for output in &self.outputs {
            preimage.extend_from_slice(&output.serialize()?);
        }
        preimage.extend_from_slice(&self.locktime.to_le_bytes());
        preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
        Ok(hash256(&preimage))
    }

    /// BIP-143 SIGHASH_ALL digest for a P2WPKH input. Commits to the spent
    /// amount as well as the outpoint.
    pub fn sighash_bip143(&self, input_index: usize, fetcher: &dyn UtxoFetcher) -> Result<Hash> {
        let prev = self.prev_output(input_index, fetcher)?;
        let program = prev.script_pubkey.witness_program().ok_or_else(|| {
            SpvError::Malformed("input does not spend a v0 witness program".to_string())
        })?;
        let script_code = p2pkh_script(program);
        self.sighash_bip143_with(input_index, &script_code, prev.amount)
    }

    /// BIP-143 digest against an explicit script code and amount.
    pub fn sighash_bip143_with(
        &self,
        input_index: usize,
        script_code: &Script,
        amount: u64,
    ) -> Result<Hash> {
        let input = self.input(input_index)?;
        let mut preimage = self.version.to_le_bytes().to_vec();
        preimage.extend_from_slice(&self.hash_prevouts());
        preimage.extend_from_slice(&self.hash_sequences());
        preimage.extend_from_slice(&reverse_bytes(&input.prev_txid));
        preimage.extend_from_slice(&input.prev_index.to_le_bytes());
        preimage.extend_from_slice(&script_code.serialize()?);
        preimage.extend_from_slice(&amount.to_le_bytes());
        preimage.extend_from_slice(&input.sequence.to_le_bytes());
        preimage.extend_from_slice(&self.hash_outputs()?);
        preimage.extend_from_slice(&self.locktime.to_le_bytes());
        preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
        Ok(hash256(&preimage))
    }

    fn hash_prevouts(&self) -> Hash {
        let mut buf = Vec::with_capacity(self.inputs.len() * 36);
        for input in &self.inputs {
            buf.extend_from_slice(&reverse_bytes(&input.prev_txid));
            buf.extend_from_slice(&input.prev_index.to_le_bytes());
        }
        hash256(&buf)
    }

    fn hash_sequences(&self) -> Hash {
        let mut buf = Vec::with_capacity(self.inputs.len() * 4);
        for input in &self.inputs {
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        hash256(&buf)
    }

    fn hash_outputs(&self) -> Result<Hash> {
        let mut buf = Vec::new();
        for output in &self.outputs {
            buf.extend_from_slice(&output.serialize()?);
        }
        Ok(hash256(&buf))
    }

    /// Verify one input: classify the spent script, compute the matching
    /// digest, and run the combined script. Script failures of any category
    /// come back as `Ok(false)`; fetch and parse problems stay errors.
    pub fn verify_input(&self, input_index: usize, fetcher: &dyn UtxoFetcher) -> Result<bool> {
        let input = self.input(input_index)?;
        let prev = self.prev_output(input_index, fetcher)?;
        let z = if prev.script_pubkey.is_p2wpkh() {
            self.sighash_bip143(input_index, fetcher)?
        } else {
            self.sighash_legacy(input_index, fetcher)?
        };
        let combined = input.script_sig.combine(&prev.script_pubkey);
        Ok(combined.evaluate(&z, &input.witness).unwrap_or(false))
    }

    /// Whole-transaction check: the fee must be non-negative and every
    /// input must verify. Coinbase transactions have no prior output and
    /// are not verified.
    pub fn verify(&self, fetcher: &dyn UtxoFetcher) -> bool {
        if self.is_coinbase() {
            return true;
        }
        match self.fee(fetcher) {
            Ok(fee) if fee >= 0 => {}
            _ => return false,
        }
        (0..self.inputs.len()).all(|i| matches!(self.verify_input(i, fetcher), Ok(true)))
    }

    /// Sign a P2PKH input with SIGHASH_ALL, installing
    /// `[DER || 0x01, compressed SEC]` as its script_sig. The assignment
    /// happens once, after the digest is computed.
    pub fn sign_input(
        &mut self,
        input_index: usize,
        key: &PrivateKey,
        fetcher: &dyn UtxoFetcher,
    ) -> Result<()> {
        let z = self.sighash_legacy(input_index, fetcher)?;
        let mut sig = key.sign(&z)?;
        sig.push(SIGHASH_ALL as u8);
        let sec = key.sec_compressed().to_vec();
        self.inputs[input_index].script_sig =
            Script::new(vec![ScriptCommand::Data(sig), ScriptCommand::Data(sec)]);
        Ok(())
    }
}
