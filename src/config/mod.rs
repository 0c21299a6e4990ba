//! Configuration module for the clinical voice assistant.
//!
//! Provides CLI argument parsing, environment bindings and path resolution.

#[allow(clippy::module_inception)]
mod config;

pub use config::{AppConfig, Provider};
