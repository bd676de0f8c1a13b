//! # LabLens Common Library
//!
//! Shared code for the LabLens service binaries:
//! - Error type and `Result` alias
//! - Configuration loading and root folder resolution
//! - Tracing subscriber setup

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
