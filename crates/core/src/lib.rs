//! Core types and shared functionality for trawlr.
//!
//! This crate provides:
//! - Unified error types
//! - Process-wide configuration with layered loading

pub mod config;
pub mod error;

pub use config::{AppConfig, ProxyConfig};
pub use error::Error;
