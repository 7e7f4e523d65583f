use thiserror::Error;

/// Errors produced by the protocol engine and its HTTP collaborators.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Authentication was rejected or the security token was missing.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Session negotiation returned a body we could not interpret.
    #[error("session negotiation failed: {0}")]
    Session(String),

    /// The instrument catalog could not be fetched or assembled.
    #[error("catalog fetch failed: {0}")]
    Catalog(String),

    /// Transport-level HTTP failure from a collaborator call.
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The channel feeding the upstream connection is gone; the
    /// connection itself is down or draining.
    #[error("upstream writer closed")]
    WriterClosed,
}
