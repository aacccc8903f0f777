//! AMF3 error types.
use std::string;
use thiserror::Error;

/// AMF3 decoding error.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// I/O error, most commonly an unexpected end of the input buffer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A string body was not valid UTF-8.
    #[error("invalid UTF-8 string: {0}")]
    InvalidUtf8(#[from] string::FromUtf8Error),

    /// An unknown or unimplemented type marker was encountered.
    #[error("unsupported type marker: 0x{marker:02x}")]
    UnsupportedType {
        /// The offending marker byte.
        marker: u8,
    },

    /// A reference index pointed outside its table, or at the wrong kind of slot.
    #[error("invalid reference into {table} table: index {index}")]
    InvalidReference {
        /// Which table the index was read from (`"string"`, `"object"`, or `"trait"`).
        table: &'static str,
        /// The out-of-range or mistyped index.
        index: usize,
    },

    /// An externalizable object named a class with no registered reader.
    #[error("no externalizable reader registered for class {class_name:?}")]
    UnregisteredExternalizable {
        /// The class name that had no registered reader.
        class_name: String,
    },

    /// Trait header bits were inconsistent with the bytes that followed.
    #[error("malformed trait: {detail}")]
    MalformedTrait {
        /// Human-readable detail of the inconsistency.
        detail: String,
    },

    /// A decoded date was not finite and non-negative.
    #[error("invalid date value: {millis}")]
    InvalidDate {
        /// The offending millisecond value.
        millis: f64,
    },
}

/// AMF3 encoding error.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// I/O error from the underlying writer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A U29 input (or vector element) fell outside its representable range.
    #[error("value out of range for U29/vector encoding: {value}")]
    OutOfRange {
        /// The offending value.
        value: i64,
    },

    /// Type inference could not map a host value to a wire type.
    #[error("host value cannot be inferred to an AMF3 wire type")]
    UnsupportedValue,

    /// A `ForcedType` named a wire type the encoder cannot reach.
    #[error("unsupported forced wire type: {requested}")]
    UnsupportedType {
        /// Name of the requested, unreachable wire type.
        requested: &'static str,
    },

    /// An externalizable object named a class with no registered writer.
    #[error("no externalizable writer registered for class {class_name:?}")]
    UnregisteredExternalizable {
        /// The class name that had no registered writer.
        class_name: String,
    },
}

/// AMF3 decoding result.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// AMF3 encoding result.
pub type EncodeResult<T> = Result<T, EncodeError>;
