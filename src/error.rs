use thiserror::Error;

#[derive(Error, Debug)]
pub enum AcqError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection refused/closed, transport I/O error or device exception.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("timeout during {0}")]
    Timeout(&'static str),

    /// Malformed or incomplete register payload, or a value that does not fit a point.
    #[error("decode failure: {0}")]
    Decode(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("unknown point: {0}")]
    UnknownPoint(String),

    #[error("point is not writable: {0}")]
    NotWritable(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AcqError {
    /// Connection-level failure (including timeouts on register I/O).
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// A schema mismatch is a configuration/migration bug and must not be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::Decode(_) | Self::StorageUnavailable(_)
        )
    }

    /// Failures the request layer should render as "no fresh data" rather than a
    /// fabricated record.
    #[must_use]
    pub const fn is_no_fresh_data(&self) -> bool {
        self.is_transport() || matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<rusqlite::Error> for AcqError {
    fn from(e: rusqlite::Error) -> Self {
        Self::StorageUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(AcqError::Timeout("read_registers").is_transport());
        assert!(AcqError::Timeout("read_registers").is_no_fresh_data());
        assert!(AcqError::StorageUnavailable("disk".into()).is_no_fresh_data());
        assert!(!AcqError::Decode("short".into()).is_no_fresh_data());
        assert!(!AcqError::SchemaMismatch("extra column".into()).is_retryable());
        assert!(AcqError::Transport("closed".into()).is_retryable());
    }
}
