//! Zero Common - Shared support layer for the Zero portfolio engine.
//!
//! This crate provides:
//! - Error types and handling utilities
//! - Logging setup
//! - Layered JSON configuration loading
//! - Configuration validation

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config_loader;
pub mod error;
pub mod logging;
pub mod validation;

pub use error::{Error, Result, ResultExt};
pub use validation::{Validate, ValidationError, ValidationResult};

