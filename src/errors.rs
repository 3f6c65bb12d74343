//! Configuration Service Error Hierarchy
//!
//! Defines the error types shared by the storage engine, the protocol layer,
//! the change-feed watcher and the client SDK, categorized by layer.

use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (storage, network, serialization, change feed)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No pointer, version or target at the requested identity
    #[error("not exist")]
    NotExist,

    /// Payload is not a JSON object
    #[error("config format error: {0} must be json object")]
    ConfigFormat(String),

    /// Malformed request parameters (empty names, separators in names, index 0, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// A server-facing call ran past its deadline
    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// SDK initialization could not fetch a first configuration
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    // Storage layer
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    // Network layer
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    //Serialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    // Change feed
    #[error("Change feed error: {0}")]
    Feed(#[from] FeedError),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// I/O failure bound to a concrete path
    #[error("Error occurred at path: {path}")]
    PathError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// Transaction aborted by the storage layer
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// A record violates the pointer/version invariants
    #[error("Data corruption detected at {location}")]
    DataCorruption { location: String },
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// HTTP transport failures
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Remote side answered with an error code we could not map
    #[error("Remote error (code: {code}): {msg}")]
    Remote { code: u32, msg: String },

    /// Malformed endpoint addresses
    #[error("Invalid URI format: {0}")]
    InvalidURI(String),

    /// No endpoints configured for a network client
    #[error("Endpoint list for {client} contains no address")]
    EmptyEndpointList { client: &'static str },
}

// Serialization is classified separately (across protocol layers and system layers)
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Bincode serialization failed: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Json serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The feed could not be opened (unsupported or misconfigured store)
    #[error("Open change feed for {target} failed: {reason}")]
    Open { target: String, reason: String },

    /// The feed produced an event we cannot interpret
    #[error("Malformed change event: {0}")]
    MalformedEvent(String),

    /// The feed ended on the store side
    #[error("Change feed closed")]
    Closed,

    /// The pointer references a version that does not exist
    #[error("Pointer references missing version {index}")]
    DanglingPointer { index: u64 },
}

/// Stable numeric codes used on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unknown = 10000,
    BadRequest = 10001,
    System = 10003,
    NotExist = 10004,
    ConfigFormat = 10005,
    Deadline = 10006,
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            10001 => ErrorCode::BadRequest,
            10003 => ErrorCode::System,
            10004 => ErrorCode::NotExist,
            10005 => ErrorCode::ConfigFormat,
            10006 => ErrorCode::Deadline,
            _ => ErrorCode::Unknown,
        }
    }
}

impl Error {
    /// Wire code of this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NotExist => ErrorCode::NotExist,
            Error::ConfigFormat(_) => ErrorCode::ConfigFormat,
            Error::InvalidArgument(_) => ErrorCode::BadRequest,
            Error::DeadlineExceeded(_) => ErrorCode::Deadline,
            Error::System(_) => ErrorCode::System,
            _ => ErrorCode::Unknown,
        }
    }

    /// Payload field a [`Error::ConfigFormat`] refers to
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::ConfigFormat(field) => Some(field),
            _ => None,
        }
    }

    /// Rebuilds an error received from a remote binding.
    pub fn from_remote(
        code: u32,
        msg: String,
        field: Option<String>,
    ) -> Self {
        match ErrorCode::from_u32(code) {
            ErrorCode::NotExist => Error::NotExist,
            ErrorCode::ConfigFormat => Error::ConfigFormat(field.unwrap_or_default()),
            ErrorCode::BadRequest => Error::InvalidArgument(msg),
            ErrorCode::Deadline => Error::DeadlineExceeded(Duration::ZERO),
            _ => NetworkError::Remote { code, msg }.into(),
        }
    }
}

// ============== Conversion Implementations ============== //
impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<FeedError> for Error {
    fn from(e: FeedError) -> Self {
        Error::System(SystemError::Feed(e))
    }
}


impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        StorageError::DbError(err.to_string()).into()
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        SerializationError::Bincode(err).into()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        SerializationError::Json(err).into()
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        NetworkError::Http(err).into()
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoError(err).into()
    }
}
