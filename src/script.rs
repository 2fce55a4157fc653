//! Bitcoin Script: wire codec and stack-machine execution.
//!
//! Commands are a tagged variant (opcode or data push) and the VM dispatches
//! through a table mapping opcode to handler function. P2SH is detected when
//! the combined command queue is built; after the final unlocking data push
//! the VM injects the synthetic [`OP_P2SH`] opcode which re-hashes the
//! redeem script, compares, and replays its commands. A remaining
//! `OP_0 <20-byte>` pair is expanded into the P2PKH template with the
//! witness items pushed ahead of it.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::codec::ByteReader;
use crate::constants::*;
use crate::error::{Result, ScriptError, SpvError};
use crate::hashing::{hash160, hash256};
use crate::keys::verify_signature;
use crate::types::{ByteString, Hash};

/// One element of a script: an opcode or a data push of 1..=520 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptCommand {
    Op(u8),
    Data(ByteString),
}

/// An ordered sequence of script commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub cmds: Vec<ScriptCommand>,
}

impl Script {
    pub fn new(cmds: Vec<ScriptCommand>) -> Self {
        Self { cmds }
    }

    /// Parse a length-prefixed script: varint byte length followed by the
    /// raw command encoding.
    pub fn parse(reader: &mut ByteReader) -> Result<Self> {
        let len = reader.read_varint()? as usize;
        if len > MAX_SCRIPT_SIZE {
            return Err(SpvError::Malformed(format!(
                "script length {len} exceeds cap"
            )));
        }
        let raw = reader.take(len)?;
        Self::parse_raw(raw)
    }

    /// Parse raw command bytes without a length prefix (redeem scripts).
    pub fn parse_raw(raw: &[u8]) -> Result<Self> {
        if raw.len() > MAX_SCRIPT_SIZE {
            return Err(SpvError::Malformed(format!(
                "script length {} exceeds cap",
                raw.len()
            )));
        }
        let mut reader = ByteReader::new(raw);
        let mut cmds = Vec::new();
        while !reader.is_empty() {
            let byte = reader.read_byte()?;
            match byte {
                1..=75 => {
                    cmds.push(ScriptCommand::Data(reader.take(byte as usize)?.to_vec()));
                }
                OP_PUSHDATA1 => {
                    let len = reader.read_byte()? as usize;
                    cmds.push(ScriptCommand::Data(reader.take(len)?.to_vec()));
                }
                OP_PUSHDATA2 => {
                    let len = reader.read_u16_le()? as usize;
                    if len > MAX_PUSH_SIZE {
                        return Err(SpvError::Malformed(format!(
                            "push of {len} bytes exceeds element cap"
                        )));
                    }
                    cmds.push(ScriptCommand::Data(reader.take(len)?.to_vec()));
                }
                OP_PUSHDATA4 => {
                    return Err(SpvError::Malformed(
                        "OP_PUSHDATA4 not accepted in standard scripts".to_string(),
                    ));
                }
                op => cmds.push(ScriptCommand::Op(op)),
            }
        }
        Ok(Self { cmds })
    }

    /// Serialize the commands without a length prefix, choosing the minimal
    /// push form for each data element.
    pub fn raw_serialize(&self) -> Result<ByteString> {
        let mut out = Vec::new();
        for cmd in &self.cmds {
            match cmd {
                ScriptCommand::Op(op) => out.push(*op),
                ScriptCommand::Data(data) => {
                    let len = data.len();
                    if len == 0 {
                        return Err(SpvError::Malformed(
                            "empty data push has no wire form, use OP_0".to_string(),
                        ));
                    }
                    if len <= 75 {
                        out.push(len as u8);
                    } else if len <= 255 {
                        out.push(OP_PUSHDATA1);
                        out.push(len as u8);
                    } else if len <= MAX_PUSH_SIZE {
                        out.push(OP_PUSHDATA2);
                        out.extend_from_slice(&(len as u16).to_le_bytes());
                    } else {
                        return Err(SpvError::Malformed(format!(
                            "push of {len} bytes exceeds element cap"
                        )));
                    }
                    out.extend_from_slice(data);
                }
            }
        }
        Ok(out)
    }

    /// Serialize with the varint length prefix used on the wire.
    pub fn serialize(&self) -> Result<ByteString> {
        let raw = self.raw_serialize()?;
        let mut out = crate::codec::encode_varint(raw.len() as u64);
        out.extend_from_slice(&raw);
        Ok(out)
    }

    /// Concatenate the unlocking half with the locking half.
    pub fn combine(&self, other: &Script) -> Script {
        let mut cmds = self.cmds.clone();
        cmds.extend(other.cmds.iter().cloned());
        Script { cmds }
    }

    pub fn is_p2pkh(&self) -> bool {
        matches!(
            self.cmds.as_slice(),
            [
                ScriptCommand::Op(OP_DUP),
                ScriptCommand::Op(OP_HASH160),
                ScriptCommand::Data(h),
                ScriptCommand::Op(OP_EQUALVERIFY),
                ScriptCommand::Op(OP_CHECKSIG),
            ] if h.len() == 20
        )
    }

    pub fn is_p2sh(&self) -> bool {
        matches!(
            self.cmds.as_slice(),
            [
                ScriptCommand::Op(OP_HASH160),
                ScriptCommand::Data(h),
                ScriptCommand::Op(OP_EQUAL),
            ] if h.len() == 20
        )
    }

    /// The 20-byte program of a version-0 witness pubkey hash script.
    pub fn witness_program(&self) -> Option<&[u8]> {
        match self.cmds.as_slice() {
            [ScriptCommand::Op(OP_0), ScriptCommand::Data(h)] if h.len() == 20 => Some(h),
            _ => None,
        }
    }

    pub fn is_p2wpkh(&self) -> bool {
        self.witness_program().is_some()
    }

    /// Execute this (usually combined) script against sighash `z`.
    ///
    /// `Ok(false)` is a clean script failure: the final stack did not hold a
    /// true element, or a signature check pushed zero. `Err` carries the
    /// failure category for structurally bad executions (underflow, caps,
    /// unparseable redeem script, non-whitelisted opcode).
    pub fn evaluate(
        &self,
        z: &Hash,
        witness: &[ByteString],
    ) -> std::result::Result<bool, ScriptError> {
        Vm::new(self.cmds.clone(), witness.to_vec()).run(z)
    }
}

/// Standard P2PKH locking script: `OP_DUP OP_HASH160 <h160> OP_EQUALVERIFY
/// OP_CHECKSIG`.
pub fn p2pkh_script(h160: &[u8]) -> Script {
    Script::new(vec![
        ScriptCommand::Op(OP_DUP),
        ScriptCommand::Op(OP_HASH160),
        ScriptCommand::Data(h160.to_vec()),
        ScriptCommand::Op(OP_EQUALVERIFY),
        ScriptCommand::Op(OP_CHECKSIG),
    ])
}

/// Standard P2SH locking script: `OP_HASH160 <h160> OP_EQUAL`.
pub fn p2sh_script(h160: &[u8]) -> Script {
    Script::new(vec![
        ScriptCommand::Op(OP_HASH160),
        ScriptCommand::Data(h160.to_vec()),
        ScriptCommand::Op(OP_EQUAL),
    ])
}

/// Version-0 witness pubkey hash locking script: `OP_0 <h160>`.
pub fn p2wpkh_script(h160: &[u8]) -> Script {
    Script::new(vec![
        ScriptCommand::Op(OP_0),
        ScriptCommand::Data(h160.to_vec()),
    ])
}

/// Script numeric encoding: signed, little-endian, sign bit in the MSB of
/// the last byte. Zero is the empty string.
pub fn encode_num(num: i64) -> ByteString {
    if num == 0 {
        return Vec::new();
    }
    let negative = num < 0;
    let mut abs = num.unsigned_abs();
    let mut result = Vec::new();
    while abs > 0 {
        result.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if let Some(&last) = result.last() {
        if last & 0x80 != 0 {
            result.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            let idx = result.len() - 1;
            result[idx] |= 0x80;
        }
    }
    result
}

/// Inverse of [`encode_num`]. Oversized elements wrap rather than panic.
pub fn decode_num(element: &[u8]) -> i64 {
    if element.is_empty() {
        return 0;
    }
    let mut big_endian = element.to_vec();
    big_endian.reverse();
    let negative = big_endian[0] & 0x80 != 0;
    let mut result = if negative {
        (big_endian[0] & 0x7f) as i64
    } else {
        big_endian[0] as i64
    };
    for &byte in &big_endian[1..] {
        result = result.wrapping_shl(8).wrapping_add(byte as i64);
    }
    if negative {
        result.wrapping_neg()
    } else {
        result
    }
}

/// Truthiness of a stack element: non-zero, where negative zero (a lone
/// 0x80 sign byte) still counts as false.
pub fn cast_to_bool(element: &[u8]) -> bool {
    for (i, &byte) in element.iter().enumerate() {
        if byte != 0 {
            return !(i == element.len() - 1 && byte == 0x80);
        }
    }
    false
}

/// Human-readable opcode name for diagnostics.
pub fn opcode_name(op: u8) -> &'static str {
    match op {
        OP_0 => "OP_0",
        OP_PUSHDATA1 => "OP_PUSHDATA1",
        OP_PUSHDATA2 => "OP_PUSHDATA2",
        OP_PUSHDATA4 => "OP_PUSHDATA4",
        OP_1..=OP_16 => "OP_N",
        OP_VERIFY => "OP_VERIFY",
        OP_TOALTSTACK => "OP_TOALTSTACK",
        OP_FROMALTSTACK => "OP_FROMALTSTACK",
        OP_DUP => "OP_DUP",
        OP_EQUAL => "OP_EQUAL",
        OP_EQUALVERIFY => "OP_EQUALVERIFY",
        OP_HASH160 => "OP_HASH160",
        OP_HASH256 => "OP_HASH256",
        OP_CHECKSIG => "OP_CHECKSIG",
        OP_CHECKMULTISIG => "OP_CHECKMULTISIG",
        OP_P2SH => "OP_P2SH",
        _ => "OP_UNKNOWN",
    }
}

type OpResult = std::result::Result<(), ScriptError>;
type OpHandler = fn(&mut Vm, u8, &Hash) -> OpResult;

fn handler_for(op: u8) -> Option<OpHandler> {
    match op {
        OP_0 | OP_1..=OP_16 => Some(Vm::op_num),
        OP_DUP => Some(Vm::op_dup),
        OP_TOALTSTACK => Some(Vm::op_toaltstack),
        OP_FROMALTSTACK => Some(Vm::op_fromaltstack),
        OP_HASH160 => Some(Vm::op_hash160),
        OP_HASH256 => Some(Vm::op_hash256),
        OP_EQUAL => Some(Vm::op_equal),
        OP_EQUALVERIFY => Some(Vm::op_equalverify),
        OP_VERIFY => Some(Vm::op_verify),
        OP_CHECKSIG => Some(Vm::op_checksig),
        OP_CHECKMULTISIG => Some(Vm::op_checkmultisig),
        OP_P2SH => Some(Vm::op_p2sh),
        _ => None,
    }
}

/// Stack machine state for one script execution.
struct Vm {
    stack: Vec<ByteString>,
    alt_stack: Vec<ByteString>,
    cmds: VecDeque<ScriptCommand>,
    witness: Vec<ByteString>,
    p2sh_pending: bool,
}

fn is_p2sh_tail(tail: &[ScriptCommand]) -> bool {
    matches!(
        tail,
        [
            ScriptCommand::Op(OP_HASH160),
            ScriptCommand::Data(h),
            ScriptCommand::Op(OP_EQUAL),
        ] if h.len() == 20
    )
}

impl Vm {
    fn new(cmds: Vec<ScriptCommand>, witness: Vec<ByteString>) -> Self {
        // P2SH is recognized up front: a locking tail of
        // OP_HASH160 <20-byte> OP_EQUAL preceded by a data push.
        let p2sh_pending = cmds.len() >= 4
            && is_p2sh_tail(&cmds[cmds.len() - 3..])
            && matches!(cmds[cmds.len() - 4], ScriptCommand::Data(_));
        Self {
            stack: Vec::new(),
            alt_stack: Vec::new(),
            cmds: cmds.into(),
            witness,
            p2sh_pending,
        }
    }

    fn run(&mut self, z: &Hash) -> std::result::Result<bool, ScriptError> {
        loop {
            self.expand_witness_program()?;
            let cmd = match self.cmds.pop_front() {
                Some(cmd) => cmd,
                None => break,
            };
            match cmd {
                ScriptCommand::Data(item) => {
                    self.push(item)?;
                    if self.p2sh_pending && self.cmds.len() == 3 {
                        // the redeem script just landed on the stack
                        self.p2sh_pending = false;
                        self.cmds.push_front(ScriptCommand::Op(OP_P2SH));
                    }
                }
                ScriptCommand::Op(op) => {
                    let handler = handler_for(op).ok_or(ScriptError::BadOpcode(op))?;
                    handler(self, op, z)?;
                }
            }
        }
        Ok(match self.stack.last() {
            Some(top) => cast_to_bool(top),
            None => false,
        })
    }

    /// Rewrite a remaining `OP_0 <20-byte>` pair into witness pushes
    /// followed by the P2PKH template over the same hash.
    fn expand_witness_program(&mut self) -> OpResult {
        if self.cmds.len() != 2 {
            return Ok(());
        }
        let is_program = matches!(
            (&self.cmds[0], &self.cmds[1]),
            (ScriptCommand::Op(OP_0), ScriptCommand::Data(h)) if h.len() == 20
        );
        if !is_program {
            return Ok(());
        }
        self.cmds.pop_front();
        let h160 = match self.cmds.pop_front() {
            Some(ScriptCommand::Data(h)) => h,
            _ => return Err(ScriptError::BadRedeemScript),
        };
        let witness = std::mem::take(&mut self.witness);
        for item in witness {
            self.cmds.push_back(ScriptCommand::Data(item));
        }
        for cmd in p2pkh_script(&h160).cmds {
            self.cmds.push_back(cmd);
        }
        Ok(())
    }

    fn push(&mut self, item: ByteString) -> OpResult {
        if item.len() > MAX_PUSH_SIZE {
            return Err(ScriptError::PushTooLarge);
        }
        if self.stack.len() + self.alt_stack.len() >= MAX_STACK_SIZE {
            return Err(ScriptError::StackOverflow);
        }
        self.stack.push(item);
        Ok(())
    }

    fn pop(&mut self) -> std::result::Result<ByteString, ScriptError> {
        self.stack.pop().ok_or(ScriptError::StackUnderflow)
    }

    fn op_num(&mut self, op: u8, _z: &Hash) -> OpResult {
        let value = if op == OP_0 {
            0
        } else {
            (op - OP_1 + 1) as i64
        };
        self.push(encode_num(value))
    }

    fn op_dup(&mut self, _op: u8, _z: &Hash) -> OpResult {
        let top = self
            .stack
            .last()
            .cloned()
            .ok_or(ScriptError::StackUnderflow)?;
        self.push(top)
    }

    fn op_toaltstack(&mut self, _op: u8, _z: &Hash) -> OpResult {
        let item = self.pop()?;
        self.alt_stack.push(item);
        Ok(())
    }

    fn op_fromaltstack(&mut self, _op: u8, _z: &Hash) -> OpResult {
        let item = self
            .alt_stack
            .pop()
            .ok_or(ScriptError::StackUnderflow)?;
        self.push(item)
    }

    fn op_hash160(&mut self, _op: u8, _z: &Hash) -> OpResult {
        let element = self.pop()?;
        self.push(hash160(&element).to_vec())
    }

    fn op_hash256(&mut self, _op: u8, _z: &Hash) -> OpResult {
        let element = self.pop()?;
        self.push(hash256(&element).to_vec())
    }

    fn op_equal(&mut self, _op: u8, _z: &Hash) -> OpResult {
        let a = self.pop()?;
        let b = self.pop()?;
        self.push(encode_num((a == b) as i64))
    }

    fn op_verify(&mut self, _op: u8, _z: &Hash) -> OpResult {
        let element = self.pop()?;
        if cast_to_bool(&element) {
            Ok(())
        } else {
            Err(ScriptError::VerifyFailed)
        }
    }

    fn op_equalverify(&mut self, op: u8, z: &Hash) -> OpResult {
        self.op_equal(op, z)?;
        self.op_verify(op, z)
    }

    fn op_checksig(&mut self, _op: u8, z: &Hash) -> OpResult {
        let pubkey = self.pop()?;
        let mut sig = self.pop()?;
        // strip the trailing sighash-type byte before DER decoding
        if sig.pop().is_none() {
            return self.push(encode_num(0));
        }
        let ok = verify_signature(&pubkey, &sig, z);
        self.push(encode_num(ok as i64))
    }

    fn op_checkmultisig(&mut self, _op: u8, z: &Hash) -> OpResult {
        let n_element = self.pop()?;
        if n_element.len() > 4 {
            return Err(ScriptError::BadMultisig);
        }
        let n = decode_num(&n_element);
        if !(0..=20).contains(&n) {
            return Err(ScriptError::BadMultisig);
        }
        let mut pubkeys = Vec::with_capacity(n as usize);
        for _ in 0..n {
            pubkeys.push(self.pop()?);
        }

        let m_element = self.pop()?;
        if m_element.len() > 4 {
            return Err(ScriptError::BadMultisig);
        }
        let m = decode_num(&m_element);
        if m < 0 || m > n {
            return Err(ScriptError::BadMultisig);
        }
        let mut sigs = Vec::with_capacity(m as usize);
        for _ in 0..m {
            let mut sig = self.pop()?;
            sig.pop();
            sigs.push(sig);
        }

        // consensus off-by-one: one extra element is consumed
        self.pop()?;

        // each signature must match a pubkey, in order
        let mut remaining = pubkeys.into_iter();
        let mut all_matched = true;
        for sig in &sigs {
            let mut matched = false;
            for pubkey in remaining.by_ref() {
                if verify_signature(&pubkey, sig, z) {
                    matched = true;
                    break;
                }
            }
            if !matched {
                all_matched = false;
                break;
            }
        }
        self.push(encode_num(all_matched as i64))
    }

    /// Synthetic P2SH replay: the queue still holds the locking pattern
    /// `OP_HASH160 <h160> OP_EQUAL`; the redeem script sits on the stack.
    fn op_p2sh(&mut self, _op: u8, z: &Hash) -> OpResult {
        match self.cmds.pop_front() {
            Some(ScriptCommand::Op(OP_HASH160)) => {}
            _ => return Err(ScriptError::BadRedeemScript),
        }
        let expected = match self.cmds.pop_front() {
            Some(ScriptCommand::Data(h)) => h,
            _ => return Err(ScriptError::BadRedeemScript),
        };
        match self.cmds.pop_front() {
            Some(ScriptCommand::Op(OP_EQUAL)) => {}
            _ => return Err(ScriptError::BadRedeemScript),
        }

        let redeem_raw = match self.stack.last() {
            Some(raw) => raw.clone(),
            None => return Err(ScriptError::StackUnderflow),
        };
        self.op_hash160(OP_HASH160, z)?;
        self.push(expected)?;
        self.op_equal(OP_EQUAL, z)?;
        self.op_verify(OP_VERIFY, z)?;

        let redeem =
            Script::parse_raw(&redeem_raw).map_err(|_| ScriptError::BadRedeemScript)?;
        for cmd in redeem.cmds {
            self.cmds.push_back(cmd);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::PrivateKey;

    fn op(byte: u8) -> ScriptCommand {
        ScriptCommand::Op(byte)
    }

    fn data(bytes: &[u8]) -> ScriptCommand {
        ScriptCommand::Data(bytes.to_vec())
    }

    #[test]
    fn test_encode_num_vectors() {
        assert_eq!(encode_num(0), Vec::<u8>::new());
        assert_eq!(encode_num(1), vec![0x01]);
        assert_eq!(encode_num(-1), vec![0x81]);
        assert_eq!(encode_num(127), vec![0x7f]);
        assert_eq!(encode_num(128), vec![0x80, 0x00]);
        assert_eq!(encode_num(-128), vec![0x80, 0x80]);
        assert_eq!(encode_num(256), vec![0x00, 0x01]);
        assert_eq!(encode_num(-256), vec![0x00, 0x81]);
        assert_eq!(encode_num(32767), vec![0xff, 0x7f]);
    }

    #[test]
    fn test_decode_num_round_trip() {
        for value in [-70000i64, -256, -128, -1, 0, 1, 127, 128, 255, 256, 70000] {
            assert_eq!(decode_num(&encode_num(value)), value, "value {value}");
        }
    }

    #[test]
    fn test_cast_to_bool() {
        assert!(!cast_to_bool(&[]));
        assert!(!cast_to_bool(&[0x00]));
        assert!(!cast_to_bool(&[0x00, 0x00]));
        assert!(!cast_to_bool(&[0x00, 0x80])); // negative zero
        assert!(cast_to_bool(&[0x01]));
        assert!(cast_to_bool(&[0x80, 0x00]));
    }

    #[test]
    fn test_parse_p2pkh_wire_form() {
        let raw = hex::decode("1976a914bc3b654dca7e56b04dca18f2566cdaf02e8d9ada88ac").unwrap();
        let mut reader = ByteReader::new(&raw);
        let script = Script::parse(&mut reader).unwrap();
        assert!(reader.is_empty());
        assert!(script.is_p2pkh());
        assert_eq!(script.serialize().unwrap(), raw);
    }

    #[test]
    fn test_minimal_push_forms() {
        let bare = Script::new(vec![data(&[0xaa; 75])]);
        assert_eq!(bare.raw_serialize().unwrap()[0], 75);

        let pushdata1 = Script::new(vec![data(&[0xaa; 76])]);
        let raw = pushdata1.raw_serialize().unwrap();
        assert_eq!(raw[0], OP_PUSHDATA1);
        assert_eq!(raw[1], 76);

        let pushdata2 = Script::new(vec![data(&[0xaa; 256])]);
        let raw = pushdata2.raw_serialize().unwrap();
        assert_eq!(raw[0], OP_PUSHDATA2);
        assert_eq!(u16::from_le_bytes([raw[1], raw[2]]), 256);

        let too_big = Script::new(vec![data(&[0xaa; 521])]);
        assert!(too_big.raw_serialize().is_err());
    }

    #[test]
    fn test_push_forms_round_trip() {
        for len in [1usize, 75, 76, 255, 256, 520] {
            let script = Script::new(vec![data(&vec![0x5a; len])]);
            let raw = script.raw_serialize().unwrap();
            assert_eq!(Script::parse_raw(&raw).unwrap(), script, "len {len}");
        }
    }

    #[test]
    fn test_parse_rejects_pushdata4() {
        assert!(Script::parse_raw(&[OP_PUSHDATA4, 1, 0, 0, 0, 0xaa]).is_err());
    }

    #[test]
    fn test_parse_rejects_truncated_push() {
        // claims 5 bytes of data, provides 2
        assert!(Script::parse_raw(&[0x05, 0xaa, 0xbb]).is_err());
    }

    #[test]
    fn test_parse_rejects_oversized_pushdata2() {
        let mut raw = vec![OP_PUSHDATA2];
        raw.extend_from_slice(&521u16.to_le_bytes());
        raw.extend_from_slice(&[0u8; 521]);
        assert!(Script::parse_raw(&raw).is_err());
    }

    #[test]
    fn test_evaluate_trivial_truth() {
        let script = Script::new(vec![op(OP_1)]);
        assert!(script.evaluate(&[0u8; 32], &[]).unwrap());

        let script = Script::new(vec![op(OP_0)]);
        assert!(!script.evaluate(&[0u8; 32], &[]).unwrap());
    }

    #[test]
    fn test_evaluate_equal_paths() {
        let script = Script::new(vec![op(OP_1), op(OP_1), op(OP_EQUAL)]);
        assert!(script.evaluate(&[0u8; 32], &[]).unwrap());

        let script = Script::new(vec![op(OP_1), op(2 + OP_1 - 1), op(OP_EQUAL)]);
        assert!(!script.evaluate(&[0u8; 32], &[]).unwrap());
    }

    #[test]
    fn test_evaluate_hash160_gate() {
        // <preimage> OP_HASH160 <digest> OP_EQUAL
        let preimage = b"some preimage".to_vec();
        let digest = hash160(&preimage);
        let script = Script::new(vec![
            data(&preimage),
            op(OP_HASH160),
            data(&digest),
            op(OP_EQUAL),
        ]);
        assert!(script.evaluate(&[0u8; 32], &[]).unwrap());
    }

    #[test]
    fn test_alt_stack_round_trip() {
        let script = Script::new(vec![op(OP_1), op(OP_TOALTSTACK), op(OP_FROMALTSTACK)]);
        assert!(script.evaluate(&[0u8; 32], &[]).unwrap());

        let script = Script::new(vec![op(OP_FROMALTSTACK)]);
        assert_eq!(
            script.evaluate(&[0u8; 32], &[]),
            Err(ScriptError::StackUnderflow)
        );
    }

    #[test]
    fn test_underflow_is_categorized() {
        let script = Script::new(vec![op(OP_DUP)]);
        assert_eq!(
            script.evaluate(&[0u8; 32], &[]),
            Err(ScriptError::StackUnderflow)
        );
    }

    #[test]
    fn test_unknown_opcode_fails() {
        let script = Script::new(vec![op(0x6a)]); // OP_RETURN, not whitelisted
        assert_eq!(
            script.evaluate(&[0u8; 32], &[]),
            Err(ScriptError::BadOpcode(0x6a))
        );
    }

    #[test]
    fn test_stack_cap_enforced_without_panic() {
        let cmds = vec![op(OP_1); MAX_STACK_SIZE + 1];
        let script = Script::new(cmds);
        assert_eq!(
            script.evaluate(&[0u8; 32], &[]),
            Err(ScriptError::StackOverflow)
        );
    }

    #[test]
    fn test_oversized_witness_item_fails_cleanly() {
        // witness items enter the machine as pushes and get the same cap
        let locking = p2wpkh_script(&[0x11; 20]);
        let witness = vec![vec![0u8; MAX_PUSH_SIZE + 1], vec![0x02; 33]];
        assert_eq!(
            locking.evaluate(&[0u8; 32], &witness),
            Err(ScriptError::PushTooLarge)
        );
    }

    #[test]
    fn test_p2pkh_end_to_end() {
        let key = PrivateKey::from_u64(8675309).unwrap();
        let z = hash256(b"spend authorization");
        let mut sig = key.sign(&z).unwrap();
        sig.push(SIGHASH_ALL as u8);
        let sec = key.sec_compressed().to_vec();

        let unlocking = Script::new(vec![data(&sig), data(&sec)]);
        let locking = p2pkh_script(&hash160(&sec));
        let combined = unlocking.combine(&locking);
        assert!(combined.evaluate(&z, &[]).unwrap());

        // same scripts, different message: signature check pushes zero
        let other = hash256(b"different message");
        assert!(!combined.evaluate(&other, &[]).unwrap());
    }

    #[test]
    fn test_p2sh_replays_redeem_script() {
        // redeem script: OP_1 (anyone can spend)
        let redeem = Script::new(vec![op(OP_1)]);
        let redeem_raw = redeem.raw_serialize().unwrap();
        let locking = p2sh_script(&hash160(&redeem_raw));
        let unlocking = Script::new(vec![data(&redeem_raw)]);
        let combined = unlocking.combine(&locking);
        assert!(combined.evaluate(&[0u8; 32], &[]).unwrap());
    }

    #[test]
    fn test_p2sh_rejects_wrong_redeem_hash() {
        let redeem = Script::new(vec![op(OP_1)]);
        let redeem_raw = redeem.raw_serialize().unwrap();
        let locking = p2sh_script(&[0x42; 20]);
        let unlocking = Script::new(vec![data(&redeem_raw)]);
        let combined = unlocking.combine(&locking);
        assert_eq!(
            combined.evaluate(&[0u8; 32], &[]),
            Err(ScriptError::VerifyFailed)
        );
    }

    #[test]
    fn test_p2wpkh_expansion_runs_template() {
        let key = PrivateKey::from_u64(31337).unwrap();
        let z = hash256(b"witness spend");
        let mut sig = key.sign(&z).unwrap();
        sig.push(SIGHASH_ALL as u8);
        let sec = key.sec_compressed().to_vec();

        let locking = p2wpkh_script(&hash160(&sec));
        let witness = vec![sig, sec];
        assert!(locking.evaluate(&z, &witness).unwrap());
    }

    #[test]
    fn test_classifiers() {
        assert!(p2pkh_script(&[0x11; 20]).is_p2pkh());
        assert!(p2sh_script(&[0x11; 20]).is_p2sh());
        assert!(p2wpkh_script(&[0x11; 20]).is_p2wpkh());

        // a 21-byte program is not P2WPKH
        let not_wpkh = Script::new(vec![op(OP_0), data(&[0x11; 21])]);
        assert!(!not_wpkh.is_p2wpkh());
        // pattern with a hash of the wrong width is not P2SH
        let not_p2sh = Script::new(vec![op(OP_HASH160), data(&[0x11; 19]), op(OP_EQUAL)]);
        assert!(!not_p2sh.is_p2sh());
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(opcode_name(OP_DUP), "OP_DUP");
        assert_eq!(opcode_name(OP_P2SH), "OP_P2SH");
        assert_eq!(opcode_name(0x6a), "OP_UNKNOWN");
    }

    #[test]
    fn test_checkmultisig_one_of_two() {
        let key1 = PrivateKey::from_u64(111).unwrap();
        let key2 = PrivateKey::from_u64(222).unwrap();
        let z = hash256(b"multisig message");

        let mut sig2 = key2.sign(&z).unwrap();
        sig2.push(SIGHASH_ALL as u8);

        // OP_0 <sig2> OP_1 <pk1> <pk2> OP_2 OP_CHECKMULTISIG
        let script = Script::new(vec![
            op(OP_0),
            data(&sig2),
            op(OP_1),
            data(&key1.sec_compressed()),
            data(&key2.sec_compressed()),
            op(OP_1 + 1),
            op(OP_CHECKMULTISIG),
        ]);
        assert!(script.evaluate(&z, &[]).unwrap());
    }

    #[test]
    fn test_checkmultisig_out_of_order_sigs_fail() {
        let key1 = PrivateKey::from_u64(111).unwrap();
        let key2 = PrivateKey::from_u64(222).unwrap();
        let z = hash256(b"multisig message");

        let mut sig1 = key1.sign(&z).unwrap();
        sig1.push(SIGHASH_ALL as u8);
        let mut sig2 = key2.sign(&z).unwrap();
        sig2.push(SIGHASH_ALL as u8);

        // signatures swapped relative to the key list
        let script = Script::new(vec![
            op(OP_0),
            data(&sig2),
            data(&sig1),
            op(OP_1 + 1),
            data(&key1.sec_compressed()),
            data(&key2.sec_compressed()),
            op(OP_1 + 1),
            op(OP_CHECKMULTISIG),
        ]);
        assert!(!script.evaluate(&z, &[]).unwrap());
    }

    #[test]
    fn test_checkmultisig_missing_dummy_underflows() {
        let key = PrivateKey::from_u64(333).unwrap();
        let z = hash256(b"msg");
        let mut sig = key.sign(&z).unwrap();
        sig.push(SIGHASH_ALL as u8);

        // no OP_0 dummy below the signature
        let script = Script::new(vec![
            data(&sig),
            op(OP_1),
            data(&key.sec_compressed()),
            op(OP_1),
            op(OP_CHECKMULTISIG),
        ]);
        assert_eq!(
            script.evaluate(&z, &[]),
            Err(ScriptError::StackUnderflow)
        );
    }
}
