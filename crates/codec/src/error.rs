use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("cannot encode NULL in a key column")]
    NullKeyColumn,
    #[error("value `{value}` is not valid for key column type {ty}")]
    InvalidKeyValue { ty: String, value: String },
    #[error("row has {found} columns, schema expects {expected}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("unexpected type tag {found:#04x} for column of type {ty}")]
    TagMismatch { ty: String, found: u8 },
    #[error("unknown type tag {0:#04x}")]
    UnknownTag(u8),
    #[error("encoded value out of range for {0}")]
    OutOfRange(String),
    #[error("encoded value ends unexpectedly")]
    Truncated,
    #[error("encoded string is not valid utf-8")]
    Utf8,
    #[error("{0} trailing bytes after decoded value")]
    TrailingBytes(usize),
}

impl CodecError {
    /// True for errors raised while encoding caller-supplied values.
    ///
    /// Everything else is a decode failure, which on stored data means the
    /// bytes do not match the schema they were written under.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            CodecError::NullKeyColumn | CodecError::InvalidKeyValue { .. }
        )
    }
}
