//! Configuration Module
//!
//! Configuration loading for the live price service.

mod settings;

pub use settings::{ConfigError, StreamConfig, SymbolSubscription};
