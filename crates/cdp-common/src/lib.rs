//! CDP Common Library
//!
//! Shared error handling, logging, and checksum utilities for the CDP
//! workspace members.
//!
//! # Overview
//!
//! - **Error Handling**: the [`CommonError`] type and [`Result`] alias
//! - **Logging**: `tracing`-based logging initialization ([`logging`])
//! - **Checksums**: streaming digests for download verification ([`checksum`])

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
