use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("owner id must not be empty")]
    InvalidOwner,
    #[error("type is not supported: {0}")]
    UnsupportedType(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("fragment data must not be empty")]
    EmptyData,
    #[error("size must be a non-negative integer; got {0}")]
    InvalidSize(String),
    #[error("payload of {actual} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize, actual: usize },
    #[error("{field} cannot be changed (stored {stored}, requested {requested})")]
    ImmutableFieldViolation {
        field: &'static str,
        stored: String,
        requested: String,
    },
}

/// Half of a data+metadata write that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Data,
    Metadata,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteStage::Data => f.write_str("data"),
            WriteStage::Metadata => f.write_str("metadata"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cannot convert {from} to {to}")]
    UnsupportedConversion { from: String, to: String },
    #[error("unsupported representation: .{0}")]
    UnsupportedRepresentation(String),
    #[error("conversion error: {0}")]
    Conversion(String),
    #[error("create failed while writing {stage}: {reason}")]
    Create { stage: WriteStage, reason: String },
    /// The previous data was put back unless `reason` says otherwise.
    #[error("update failed while writing {stage}: {reason}")]
    Update { stage: WriteStage, reason: String },
    #[error("storage io error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn storage(err: impl fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn unsupported_conversion(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::UnsupportedConversion {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Stable machine-readable code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(v) => match v {
                ValidationError::InvalidOwner => "E_INVALID_OWNER",
                ValidationError::UnsupportedType(_) => "E_UNSUPPORTED_TYPE",
                ValidationError::InvalidData(_) => "E_INVALID_DATA",
                ValidationError::EmptyData => "E_EMPTY_DATA",
                ValidationError::InvalidSize(_) => "E_INVALID_SIZE",
                ValidationError::PayloadTooLarge { .. } => "E_PAYLOAD_TOO_LARGE",
                ValidationError::ImmutableFieldViolation { .. } => "E_IMMUTABLE_FIELD",
            },
            CoreError::NotFound(_) => "E_NOT_FOUND",
            CoreError::UnsupportedConversion { .. } => "E_UNSUPPORTED_CONVERSION",
            CoreError::UnsupportedRepresentation(_) => "E_UNSUPPORTED_REPRESENTATION",
            CoreError::Conversion(_) => "E_CONVERSION",
            CoreError::Create { .. } => "E_CREATE_INCOMPLETE",
            CoreError::Update { .. } => "E_UPDATE_INCOMPLETE",
            CoreError::Storage(_) => "E_STORAGE_IO",
        }
    }

    /// HTTP-equivalent status, for transports that speak HTTP.
    pub fn status(&self) -> u16 {
        match self {
            CoreError::Validation(ValidationError::UnsupportedType(_)) => 415,
            CoreError::Validation(ValidationError::PayloadTooLarge { .. }) => 413,
            CoreError::Validation(_) => 400,
            CoreError::NotFound(_) => 404,
            CoreError::UnsupportedConversion { .. } | CoreError::UnsupportedRepresentation(_) => {
                415
            }
            CoreError::Conversion(_)
            | CoreError::Create { .. }
            | CoreError::Update { .. }
            | CoreError::Storage(_) => 500,
        }
    }
}
