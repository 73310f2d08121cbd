use thiserror::Error;

/// Errors raised while matching an encoding or decoding an [`crate::types::Opcode`]
/// from a code buffer.
///
/// `NotCompat` is only ever seen inside [`crate::encoding::find`]; it never
/// escapes the matcher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("opcode encoding used was not compatible with the actual code")]
    NotCompat,

    #[error("code ended in the middle of an opcode")]
    End,

    #[error("invalid opcode code for encoding")]
    Invalid,
}

/// Top-level driver errors, surfaced by `main.rs` and rendered as
/// `sim86: error: <msg>`.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("unknown opcode '0x{0:02x}'")]
    UnknownOpcode(u8),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("open '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
