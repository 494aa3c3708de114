//! HeaderHound Core
//!
//! Core types and interfaces for the HeaderHound dependency-discovery engine.

pub mod config;
pub mod error;
pub mod files;

pub use config::{Config, StrategyKind};
pub use error::{Error, Result};
