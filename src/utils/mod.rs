//! Utility modules for configuration and logging

pub mod config;
pub mod logging;

pub use config::{AppConfig, BoundsConfig, ConfigError, ConfigurationManager, EstimatorConfig, SolverKind};
pub use logging::init_logging;
