use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization/deserialization error: {0}")]
    Serialization(String),

    #[error("Database backend error: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<crate::buffer_json::CodecError> for StoreError {
    fn from(e: crate::buffer_json::CodecError) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_failures_become_serialization_errors() {
        let err: StoreError = crate::buffer_json::from_str("{not json").unwrap_err().into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
