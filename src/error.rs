//! Error types for light-client validation

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpvError {
    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("script failure: {0}")]
    Script(#[from] ScriptError),

    #[error("invalid signature: {0}")]
    Signature(String),

    #[error("invalid proof: {0}")]
    Proof(String),

    #[error("fetch failed: {0}")]
    Fetch(String),
}

/// Failure categories for script execution.
///
/// A well-formed script may legitimately fail to verify; these variants
/// record how it failed, which is distinct from a buffer that could not be
/// parsed at all (`SpvError::Malformed`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("stack underflow")]
    StackUnderflow,

    #[error("stack size limit exceeded")]
    StackOverflow,

    #[error("push exceeds element size limit")]
    PushTooLarge,

    #[error("opcode {0:#04x} not in whitelist")]
    BadOpcode(u8),

    #[error("OP_VERIFY failed")]
    VerifyFailed,

    #[error("redeem script does not parse")]
    BadRedeemScript,

    #[error("multisig operand counts inconsistent")]
    BadMultisig,
}

pub type Result<T> = std::result::Result<T, SpvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_error_converts_to_spv_error() {
        let err: SpvError = ScriptError::StackUnderflow.into();
        assert!(matches!(err, SpvError::Script(ScriptError::StackUnderflow)));
    }

    #[test]
    fn test_error_messages() {
        let err = SpvError::Malformed("truncated varint".to_string());
        assert_eq!(err.to_string(), "malformed input: truncated varint");

        let err = ScriptError::BadOpcode(0xb2);
        assert_eq!(err.to_string(), "opcode 0xb2 not in whitelist");
    }
}
