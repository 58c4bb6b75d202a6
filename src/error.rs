//! Error handling for the Dakash coordination service

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error (rejected at the API boundary, nothing mutated)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict (duplicate id, protected tool, ...)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Pub/sub transport unavailable
    #[error("Transport error: {0}")]
    Transport(String),

    /// Blob store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// GPIO line access error
    #[error("GPIO error: {0}")]
    Gpio(String),

    /// Firmware command channel error
    #[error("Firmware error: {0}")]
    Firmware(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable code for log fields and bus error payloads
    pub fn kind_code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Conflict(_) => "CONFLICT",
            Error::Transport(_) => "TRANSPORT_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Gpio(_) => "GPIO_ERROR",
            Error::Firmware(_) => "FIRMWARE_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        assert_eq!(Error::Validation("x".into()).kind_code(), "VALIDATION_ERROR");
        assert_eq!(Error::Transport("down".into()).kind_code(), "TRANSPORT_ERROR");
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.kind_code(), "IO_ERROR");
    }
}
