use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GibError {
    #[error("invalid mint identifier: {0}")]
    InvalidMint(String),

    #[error("failed to read mint list at {path}: {message}")]
    ListRead { path: String, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to get metadata account: {0}")]
    Resolution(String),

    #[error("RPC endpoint returned status {status}: {message}")]
    RpcStatus { status: u16, message: String },

    #[error("failed to parse metadata account: {0}")]
    Deserialization(String),

    #[error("request to {url} failed: {message}")]
    Fetch { url: String, message: String },

    #[error("received status {status} from {url}")]
    FetchStatus { url: String, status: u16 },

    #[error("request to {url} timed out after {elapsed_ms}ms")]
    FetchTimeout { url: String, elapsed_ms: u128 },

    #[error("giving up on {url} after {attempts} attempts (last status {status})")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        status: u16,
    },

    #[error("failed to decode metadata document: {0}")]
    Parse(String),

    #[error("failed to persist output: {0}")]
    Persistence(String),

    #[error("unable to create directory: {0}")]
    Directory(String),
}

impl GibError {
    /// True for the HTTP failures surfaced by the retrying fetcher.
    pub fn is_fetch(&self) -> bool {
        matches!(
            self,
            GibError::Fetch { .. }
                | GibError::FetchStatus { .. }
                | GibError::FetchTimeout { .. }
                | GibError::RetriesExhausted { .. }
        )
    }
}
