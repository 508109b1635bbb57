//! Error types for the controller core

use thiserror::Error;

/// Errors surfaced by the controller core
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("southbound channel closed")]
    SouthboundClosed,

    #[error("southbound queue full, dropped {0}")]
    SouthboundFull(&'static str),
}
