//! Analyst Common - Shared configuration, errors, and logging for the Analyst services.
//!
//! This crate provides:
//! - Configuration types and loading (file + environment overrides)
//! - The HTTP-facing error type
//! - Logging setup with noise filtering

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    AuthConfig, Config, LlmConfig, NetworkConfig, ObservabilityConfig, StorageConfig,
};
pub use error::{Error, Result};
