#![allow(missing_docs)]

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Endpoint {0} not found")]
    EndpointNotFound(String),

    #[error("Endpoint {0} already exists")]
    EndpointAlreadyExists(String),

    #[error("Endpoint {0} is offline")]
    EndpointOffline(String),

    #[error("Connection to {0} is closed")]
    ConnectionClosed(String),

    #[error("No callback is installed on {0}")]
    CallbackMissing(String),

    #[error("Remote failed to serve the request: {0}")]
    RemoteError(String),

    #[error("Unexpected transport message from {0}")]
    UnexpectedMessage(String),
}
