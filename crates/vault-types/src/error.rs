use thiserror::Error;

use crate::mechanism::MechanismType;

/// Errors produced while building or decoding vault entities.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    /// A required field was absent from an option map or a builder.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field was present but could not be parsed.
    #[error("invalid value for {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    /// The `type` discriminant did not name a known mechanism variant.
    #[error("unknown mechanism type: {0:?}")]
    UnknownMechanismType(String),

    /// A notification was built against a mechanism of the wrong variant.
    #[error("wrong mechanism type: expected {expected}, got {actual}")]
    WrongMechanismType {
        expected: MechanismType,
        actual: MechanismType,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}
