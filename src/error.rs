use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid sample code: {0}")]
    InvalidSampleCode(String),

    #[error("failed to read identifier file {path}: {message}")]
    IdentifierFile { path: PathBuf, message: String },

    #[error("invalid file pattern: {0}")]
    InvalidPattern(String),

    #[error("{0}")]
    ConflictingInputs(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("no metadata server configured (use --server or server_url in kira-sf.json)")]
    MissingServer,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("metadata request failed: {0}")]
    MetadataHttp(String),

    #[error("metadata service returned status {status}: {message}")]
    MetadataStatus { status: u16, message: String },

    #[error("data store request failed: {0}")]
    DataStoreHttp(String),

    #[error("data store returned status {status}: {message}")]
    DataStoreStatus { status: u16, message: String },

    #[error("remote call {method} failed: {message}")]
    Rpc { method: String, message: String },

    #[error("authentication failed for user {user}")]
    #[diagnostic(help("check the user name and the password variable"))]
    Authentication { user: String },

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("service contract violation: {0}")]
    ServiceContract(String),
}

/// Coarse classification used to decide how far an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connection,
    Authentication,
    Transfer,
    Contract,
}

impl KiraError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KiraError::InvalidSampleCode(_)
            | KiraError::IdentifierFile { .. }
            | KiraError::InvalidPattern(_)
            | KiraError::ConflictingInputs(_)
            | KiraError::MissingCredential(_)
            | KiraError::MissingServer
            | KiraError::ConfigRead(_)
            | KiraError::ConfigParse(_)
            | KiraError::InvalidConfig(_) => ErrorKind::Configuration,
            KiraError::MetadataHttp(_)
            | KiraError::MetadataStatus { .. }
            | KiraError::DataStoreHttp(_)
            | KiraError::DataStoreStatus { .. }
            | KiraError::Rpc { .. } => ErrorKind::Connection,
            KiraError::Authentication { .. } => ErrorKind::Authentication,
            KiraError::Transfer(_) | KiraError::Filesystem(_) => ErrorKind::Transfer,
            KiraError::ServiceContract(_) => ErrorKind::Contract,
        }
    }

    pub fn is_connection(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }
}
