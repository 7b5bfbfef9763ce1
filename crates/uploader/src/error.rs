//! Upload error types.

/// Errors produced while uploading a file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid file: {0}")]
    Validation(#[from] ferry_transfer::ValidationError),

    #[error("transfer error: {0}")]
    Transfer(#[from] ferry_transfer::TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The server holds a different length for a chunk than the one the
    /// transfer started from, usually because an interrupted append
    /// finished after the probe.
    #[error("chunk offset conflict: {0}")]
    Conflict(String),

    #[error("cancelled")]
    Cancelled,
}

impl UploadError {
    /// Whether this failure counts against the retry limit and triggers a
    /// fresh attempt.
    ///
    /// A 400 means the request itself is wrong, so repeating it cannot help.
    /// A [`Conflict`](Self::Conflict) restarts from a fresh probe without
    /// counting.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Io(_) => true,
            Self::Server { status, .. } => *status != 400,
            Self::Transfer(ferry_transfer::TransferError::Io(_)) => true,
            Self::Transfer(_) | Self::Validation(_) | Self::Conflict(_) | Self::Cancelled => false,
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
