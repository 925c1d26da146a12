//! Error types for feed-mirror
//!
//! This module provides the error taxonomy for the mirror:
//! - Transient transport failures (retried with backoff at the call site)
//! - Source API errors carrying the upstream error code
//! - Archive and metadata failures (contained within a single post build)
//! - Delivery failures (rolled back, then fatal)
//! - Persistence failures

use crate::types::{MessageId, PostId};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for feed-mirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for feed-mirror
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "pipeline.prebuild_limit")
        key: Option<String>,
    },

    /// State store operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Remote host answered with an unexpected status
    #[error("unexpected HTTP status {status} for {url}")]
    HttpStatus {
        /// Status code returned by the host
        status: u16,
        /// Requested URL
        url: String,
    },

    /// A transfer broke off mid-body (dropped connection, truncated payload)
    #[error("transfer interrupted: {0}")]
    Transfer(String),

    /// The content source returned an explicit error code
    #[error("source API error {code}: {message}")]
    SourceApi {
        /// Upstream error code
        code: i32,
        /// Upstream error message
        message: String,
    },

    /// Archive could not be read
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Audio tags could not be read
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Delivery to the messaging destination failed
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not supported by the configured collaborator
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Shutdown in progress
    #[error("shutdown in progress")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// State store errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A stored key or value does not decode
    #[error("corrupt record in {partition}: {reason}")]
    CorruptRecord {
        /// Partition (table) holding the record
        partition: &'static str,
        /// What was wrong with it
        reason: String,
    },
}

/// Archive expansion errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The file is not a recognised archive format
    #[error("unrecognised archive format: {path}")]
    UnknownFormat {
        /// The archive file
        path: PathBuf,
    },

    /// The archive could not be opened or an entry could not be read
    #[error("corrupt archive {path}: {reason}")]
    Corrupt {
        /// The archive file
        path: PathBuf,
        /// Decoder message
        reason: String,
    },
}

/// Delivery errors
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// A send failed part-way through a post; already-sent messages were rolled back
    #[error("delivery of post {post_id} failed after {} sent message(s): {source}", sent.len())]
    Failed {
        /// The post being delivered
        post_id: PostId,
        /// Messages that were sent (and then deleted) before the failure
        sent: Vec<MessageId>,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// The messaging client returned a response that does not fit the request
    #[error("unexpected response from messaging client: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Machine-readable error code, used in log fields and admin notifications
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::HttpStatus { .. } => "http_status",
            Error::Transfer(_) => "transfer_interrupted",
            Error::SourceApi { .. } => "source_api_error",
            Error::Archive(_) => "archive_error",
            Error::Metadata(_) => "metadata_error",
            Error::Delivery(_) => "delivery_error",
            Error::Serialization(_) => "serialization_error",
            Error::NotSupported(_) => "not_supported",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }

    /// Shorthand for a configuration error on a specific key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
