use thiserror::Error;

/// Failure taxonomy for the advisory pipeline.
///
/// `Configuration` and `Connection` are fatal to the session; everything else
/// is recoverable and reported per operation while the connection stays open.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("schema extraction failed: {0}")]
    SchemaExtraction(String),

    #[error("advisory request failed: {0}")]
    Advisory(String),

    #[error("malformed advice payload: {0}")]
    AdviceParse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
