//! Client code for trawlr.
//!
//! This crate provides the per-destination session cache the crawl loop
//! uses to reuse HTTP connections across requests to the same host.

pub mod session;

pub use session::{Session, SessionCache, SessionConfig, SessionIo, SessionKey};
