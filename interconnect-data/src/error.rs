use thiserror::Error;

use crate::container::StorageKind;

/// Errors produced when decoding or converting a [`ValueContainer`].
///
/// These never escape a table operation: typed accessors capture the error
/// and yield the type's default instead.
///
/// [`ValueContainer`]: crate::ValueContainer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueConversionError {
    #[error("cannot convert stored {from:?} value to {to:?}")]
    KindMismatch { from: StorageKind, to: StorageKind },

    #[error("stored {from:?} value {value} does not fit in {to:?}")]
    OutOfRange {
        from: StorageKind,
        to: StorageKind,
        value: String,
    },

    #[error("cannot parse {text:?} as {to:?}")]
    ParseFailed { text: String, to: StorageKind },

    #[error("stored value is null but the requested type is not nullable")]
    UnexpectedNull,

    #[error("stored value is empty")]
    EmptyValue,
}
