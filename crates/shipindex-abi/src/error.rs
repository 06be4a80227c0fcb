//! Error types for the binary codec.

use thiserror::Error;

/// Errors that can occur while encoding or decoding ABI-typed values.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("Trailing bytes after '{type_name}': {remaining} of {len} bytes unread")]
    TrailingBytes {
        type_name: String,
        remaining: usize,
        len: usize,
    },

    #[error("Unknown type '{0}'")]
    UnknownType(String),

    #[error("Unknown tag '{tag}' for variant '{variant}'")]
    UnknownVariant { variant: String, tag: String },

    #[error("Variant '{variant}' has no alternative at index {index}")]
    UnknownVariantIndex { variant: String, index: u32 },

    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Missing field '{field}' in struct '{struct_name}'")]
    MissingField { struct_name: String, field: String },

    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid {ty} value: {reason}")]
    InvalidValue { ty: String, reason: String },

    #[error("Invalid UTF-8 in string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Type nesting too deep while resolving '{0}'")]
    RecursionLimit(String),
}

impl CodecError {
    /// Returns `true` when the buffer did not match the schema: too few bytes,
    /// leftover bytes, or a variant tag the schema does not know.
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedEof { .. }
                | Self::TrailingBytes { .. }
                | Self::UnknownVariant { .. }
                | Self::UnknownVariantIndex { .. }
        )
    }

    pub(crate) fn invalid(ty: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            ty: ty.to_string(),
            reason: reason.into(),
        }
    }
}
