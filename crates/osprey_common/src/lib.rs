//! Shared foundation for the OspreyDS workspace: identifier types, the
//! error taxonomy, and TOML configuration.

pub mod config;
pub mod error;
pub mod types;
