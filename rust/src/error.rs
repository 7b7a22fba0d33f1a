use thiserror::Error;

/// Failure talking to the BlueBubbles server. Callers turn these into state
/// fields; nothing here is surfaced as a panic.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(u16),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request aborted")]
    Aborted,
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_) | FetchError::Status(404))
    }
}
