use thiserror::Error;

use crate::error::BridgeError;

pub mod chat;
pub mod config;
pub mod usage;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("usage error: {0}")]
    Usage(String),
    #[error("{}", .0.client_message())]
    Chat(#[from] BridgeError),
}

pub type CliResult<T> = Result<T, CliError>;
