//! Core utilities for the renderer.
//!
//! This crate provides foundational types and utilities used across the renderer:
//! - Error types and result aliases
//! - Logging initialization
//! - TOML configuration loading
//! - Frame timing

pub mod config;
mod error;
mod logging;
mod timer;

pub use error::{Error, Result};
pub use logging::{DEFAULT_LOG_FILTER, init_logging};
pub use timer::{FrameReport, FrameTimer};
