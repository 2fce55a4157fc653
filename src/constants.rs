//! Consensus constants for standard script and header validation

/// Maximum script length in bytes (standardness)
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum stack size during script execution (main + alt combined)
pub const MAX_STACK_SIZE: usize = 1_000;

/// Maximum size of a single pushed element
pub const MAX_PUSH_SIZE: usize = 520;

/// SIGHASH type committing to all inputs and outputs
pub const SIGHASH_ALL: u32 = 1;

/// Sequence number for a final input
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Satoshis per BTC
pub const SATOSHIS_PER_BTC: u64 = 100_000_000;

/// Length of one difficulty epoch in seconds
pub const TWO_WEEKS: u64 = 60 * 60 * 24 * 14;

/// Lowest allowed proof-of-work (the genesis difficulty) in compact form
pub const LOWEST_BITS: [u8; 4] = [0xff, 0xff, 0x00, 0x1d];

/// Version byte for mainnet P2PKH addresses
pub const ADDR_PREFIX_MAINNET: u8 = 0x00;

/// Version byte for testnet P2PKH addresses
pub const ADDR_PREFIX_TESTNET: u8 = 0x6f;

// Script opcodes. Only the whitelist the VM dispatches is listed; anything
// else fails the script with `ScriptError::BadOpcode`.

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_TOALTSTACK: u8 = 0x6b;
pub const OP_FROMALTSTACK: u8 = 0x6c;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_HASH256: u8 = 0xaa;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xae;

/// Synthetic opcode driving P2SH redeem-script replay.
/// Injected by the VM after the final unlocking data push; never valid on
/// the wire.
pub const OP_P2SH: u8 = 0xfe;
