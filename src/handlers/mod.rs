//! HTTP handlers for configuration administration.

pub mod configuration;
pub use configuration::*;
