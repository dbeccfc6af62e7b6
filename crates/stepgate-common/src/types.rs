//! Core type definitions for Stepgate
//!
//! This module defines the small value types shared by the engine and its
//! configuration: identifiers and the provider failure-mode taxonomy.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an authentication event
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
pub struct AuthenticationId(Uuid);

impl AuthenticationId {
    /// Generate a new random authentication ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AuthenticationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AuthenticationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthenticationId({})", self.0)
    }
}

impl fmt::Display for AuthenticationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a registered service in the service registry
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From,
)]
pub struct RegisteredServiceId(pub u64);

/// Behavior when a required multifactor provider cannot be reached.
///
/// Only [`FailureMode::Closed`] is strict: an unavailable provider in closed
/// mode is routed through the context validator, which denies unless the
/// authentication already carries the context. Every other mode is
/// permissive and excuses the requirement. Deployments that need another
/// strict mode must add it here and to [`FailureMode::is_strict`]; the
/// orchestrator consults nothing else.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureMode {
    /// Let the request through without the factor and without claiming it
    Open,
    /// Deny unless the context was already satisfied
    Closed,
    /// Let the request through as if no provider had been required
    Phantom,
    /// Never health-check the provider; it is always considered available
    None,
    /// Inherit the mode from the next configuration level
    #[default]
    Undefined,
}

impl FailureMode {
    /// Returns true for the modes that force strict validation
    #[must_use]
    pub const fn is_strict(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns true when the mode defers to an outer level
    #[must_use]
    pub const fn is_undefined(self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::Phantom => "PHANTOM",
            Self::None => "NONE",
            Self::Undefined => "UNDEFINED",
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a failure mode name is not recognized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown failure mode: {0}")]
pub struct UnknownFailureMode(pub String);

impl FromStr for FailureMode {
    type Err = UnknownFailureMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(Self::Open),
            "CLOSED" => Ok(Self::Closed),
            "PHANTOM" => Ok(Self::Phantom),
            "NONE" => Ok(Self::None),
            "UNDEFINED" => Ok(Self::Undefined),
            _ => Err(UnknownFailureMode(s.to_string())),
        }
    }
}
