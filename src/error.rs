/// Error type for failures that end a normalized stream.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("No readable source: neither a byte stream nor a response body was supplied")]
    NoReadableSource,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("SSE line exceeded {limit} bytes without a line break")]
    LineTooLong { limit: usize },
    #[error("Response body error: {0}")]
    Body(String),
}

impl NormalizeError {
    /// Stable machine-readable code carried on `RunError` events.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            NormalizeError::NoReadableSource => "no_readable_source",
            NormalizeError::Transport(_) => "transport_error",
            NormalizeError::LineTooLong { .. } => "line_too_long",
            NormalizeError::Body(_) => "invalid_body",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_messages() {
        let err = NormalizeError::Transport("connection reset".to_string());
        assert_eq!(err.error_code(), "transport_error");
        assert_eq!(err.to_string(), "Transport error: connection reset");

        let err = NormalizeError::NoReadableSource;
        assert_eq!(err.error_code(), "no_readable_source");

        let err = NormalizeError::LineTooLong { limit: 16 };
        assert_eq!(err.error_code(), "line_too_long");
        assert_eq!(err.to_string(), "SSE line exceeded 16 bytes without a line break");
    }
}
