use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request to {uri} failed: {reason}")]
    Request { uri: String, reason: String },

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("{uri} answered {status}: {body}")]
    Status { uri: String, status: u16, body: String },

    #[error("unexpected response from {uri}: {reason}")]
    Decode { uri: String, reason: String },
}

pub type RemoteResult<T> = Result<T, RemoteError>;
