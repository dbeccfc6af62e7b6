//! Stepgate Common - Shared types and configuration
//!
//! This crate provides the configuration model, the failure-mode taxonomy
//! and the error type used across all Stepgate components.

pub mod config;
pub mod error;
pub mod types;

pub use crate::config::Config;
pub use error::{Error, Result};
pub use types::*;
