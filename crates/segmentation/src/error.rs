use thiserror::Error;
use uuid::Uuid;

pub type SegmentResult<T> = Result<T, SegmentError>;

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("Unknown segment field: {field}")]
    FieldResolution { field: String },

    #[error("Unknown segment operator: {operator}")]
    UnknownOperator { operator: String },

    #[error("Malformed value for {field} {operator}: {reason}")]
    MalformedValue {
        field: String,
        operator: String,
        reason: String,
    },

    #[error("Filter has {placeholders} placeholders but {parameters} parameters")]
    ParameterMismatch {
        placeholders: usize,
        parameters: usize,
    },

    #[error("Segment not found: {0}")]
    SegmentNotFound(Uuid),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SegmentError {
    /// Errors caused by the caller's segment definition (4xx-equivalent).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SegmentError::FieldResolution { .. }
                | SegmentError::UnknownOperator { .. }
                | SegmentError::MalformedValue { .. }
                | SegmentError::Serialization(_)
        )
    }
}
