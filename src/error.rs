use thiserror::Error;

/// Errors raised while validating or converting a heatmap payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HeatmapError {
    #[error("upstream rejected the request: {message}")]
    Rejected { message: String },

    #[error("payload is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("payload field `{field}` is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error(
        "data[{entry}] = [{time_index}, {price_index}] is outside the {times}x{prices} axes"
    )]
    IndexOutOfBounds {
        entry: usize,
        time_index: i64,
        price_index: i64,
        times: usize,
        prices: usize,
    },
}

impl HeatmapError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        HeatmapError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shape errors mean the payload is unusable as a whole; bounds errors
    /// concern individual entries.
    pub fn is_shape_error(&self) -> bool {
        !matches!(self, HeatmapError::IndexOutOfBounds { .. })
    }
}
