//! Error types for the context validation engine
//!
//! Business outcomes (no requirement, bypass, excused failure, denial) are
//! values, not errors. Only provider-supplied check failures and contract
//! violations are represented here.

use thiserror::Error;

/// Failure raised by a provider-supplied check (availability, bypass,
/// failure-mode evaluation). The orchestrator never propagates these; it
/// treats the provider as unavailable.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider check timed out")]
    Timeout,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors surfaced to callers of the engine
#[derive(Debug, Error)]
pub enum ContextValidationError {
    #[error("assertion for service {0} carries no primary authentication")]
    MissingAuthentication(String),

    #[error(transparent)]
    Config(#[from] stepgate_common::Error),
}
