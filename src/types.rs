//! Core type aliases shared across the crate

/// 256-bit hash in display (big-endian) order
pub type Hash = [u8; 32];

/// 160-bit hash, the output of RIPEMD160(SHA256(x))
pub type Hash160 = [u8; 20];

/// Byte string type
pub type ByteString = Vec<u8>;
