//! Configuration Module
//!
//! Configuration loading for the stream client and the bundled binary.

mod settings;

pub use settings::{ClientConfig, ConfigError, ServiceConfig};
