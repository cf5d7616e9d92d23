use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::{
    DEFAULT_BOUNDS_MARGIN, DEFAULT_COST_TOLERANCE, DEFAULT_GRADIENT_TOLERANCE,
    DEFAULT_MAX_ITERATIONS,
};

/// Local minimizer used by the estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    /// Quasi-Newton BFGS with More-Thuente line search
    Bfgs,
    /// Damped Gauss-Newton specialized to the sum-of-squares structure
    LevenbergMarquardt,
}

impl Default for SolverKind {
    fn default() -> Self {
        SolverKind::LevenbergMarquardt
    }
}

/// Search region limits around the anchors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundsConfig {
    /// Extra margin beyond the anchors' bounding box grown by the largest distance
    pub margin: f64,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            margin: DEFAULT_BOUNDS_MARGIN,
        }
    }
}

/// Estimator configuration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Minimizer algorithm
    pub solver: SolverKind,
    /// Convergence tolerance on the objective change between iterations
    pub cost_tolerance: f64,
    /// Convergence tolerance on the gradient norm
    pub gradient_tolerance: f64,
    /// Safety backstop on iterations
    pub max_iterations: u64,
    /// Bounded search region; `None` searches the whole plane
    pub bounds: Option<BoundsConfig>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            solver: SolverKind::default(),
            cost_tolerance: DEFAULT_COST_TOLERANCE,
            gradient_tolerance: DEFAULT_GRADIENT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            bounds: Some(BoundsConfig::default()),
        }
    }
}

/// Application settings: the estimator plus the store and logging around it.
///
/// The estimator fields sit at the top level of the JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(flatten)]
    pub estimator: EstimatorConfig,
    /// Round positions to two decimals before they are stored
    pub round_persisted: bool,
    /// Default log filter used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            round_persisted: true,
            log_level: "info".to_string(),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid {parameter} = {value}: {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },
    #[error("I/O error: {message}")]
    IoError { message: String },
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

impl EstimatorConfig {
    /// Check every parameter, returning the first violation
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_tolerance("cost_tolerance", self.cost_tolerance)?;
        check_tolerance("gradient_tolerance", self.gradient_tolerance)?;

        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "max_iterations".to_string(),
                value: "0".to_string(),
                reason: "at least one iteration is required".to_string(),
            });
        }

        if let Some(bounds) = &self.bounds {
            if !bounds.margin.is_finite() || bounds.margin < 0.0 {
                return Err(ConfigError::InvalidParameter {
                    parameter: "bounds.margin".to_string(),
                    value: bounds.margin.to_string(),
                    reason: "must be finite and non-negative".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.estimator.validate()?;
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::InvalidParameter {
                parameter: "log_level".to_string(),
                value: String::new(),
                reason: "must name a log filter".to_string(),
            });
        }
        Ok(())
    }
}

fn check_tolerance(parameter: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::InvalidParameter {
            parameter: parameter.to_string(),
            value: value.to_string(),
            reason: "must be finite and positive".to_string(),
        });
    }
    Ok(())
}

/// Owns the active configuration and its backing file
pub struct ConfigurationManager {
    config: AppConfig,
    config_file_path: Option<String>,
    is_modified: bool,
}

impl Default for ConfigurationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationManager {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            config_file_path: None,
            is_modified: false,
        }
    }

    /// Create configuration manager and load from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut manager = Self::new();
        manager.load_from_file(path)?;
        Ok(manager)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn estimator_config(&self) -> &EstimatorConfig {
        &self.config.estimator
    }

    /// Replace the configuration after validating it
    pub fn update_config(&mut self, config: AppConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        self.is_modified = true;
        Ok(())
    }

    /// Set the cost tolerance at runtime, returning the previous value
    pub fn set_cost_tolerance(&mut self, tolerance: f64) -> Result<f64, ConfigError> {
        check_tolerance("cost_tolerance", tolerance)?;
        let old = self.config.estimator.cost_tolerance;
        self.config.estimator.cost_tolerance = tolerance;
        self.is_modified = true;
        debug!(old, new = tolerance, "cost tolerance updated");
        Ok(old)
    }

    pub fn set_solver(&mut self, solver: SolverKind) -> SolverKind {
        let old = self.config.estimator.solver;
        self.config.estimator.solver = solver;
        self.is_modified = true;
        old
    }

    /// Load configuration from JSON file
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read config file '{}': {}", path_str, e),
        })?;

        let config: AppConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::SerializationError {
                message: format!("Failed to parse config file '{}': {}", path_str, e),
            })?;

        config.validate()?;

        info!(path = %path_str, solver = ?config.estimator.solver, "loaded configuration");
        self.config = config;
        self.config_file_path = Some(path_str);
        self.is_modified = false;
        Ok(())
    }

    /// Save configuration to JSON file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = serde_json::to_string_pretty(&self.config).map_err(|e| {
            ConfigError::SerializationError {
                message: format!("Failed to serialize config: {}", e),
            }
        })?;

        fs::write(&path, content).map_err(|e| ConfigError::IoError {
            message: format!("Failed to write config file '{}': {}", path_str, e),
        })?;

        self.config_file_path = Some(path_str);
        self.is_modified = false;
        Ok(())
    }

    /// Save to the currently loaded file path
    pub fn save(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = self.config_file_path.clone() {
            self.save_to_file(path)
        } else {
            Err(ConfigError::IoError {
                message: "No file path set for saving configuration".to_string(),
            })
        }
    }

    /// Check if configuration has been modified since last save
    pub fn is_modified(&self) -> bool {
        self.is_modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EstimatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.solver, SolverKind::LevenbergMarquardt);
        assert_eq!(config.cost_tolerance, 1e-4);
        assert!(config.bounds.is_some());
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let mut config = EstimatorConfig::default();
        config.cost_tolerance = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { ref parameter, .. }) if parameter == "cost_tolerance"
        ));

        let mut config = EstimatorConfig::default();
        config.max_iterations = 0;
        assert!(config.validate().is_err());

        let mut config = EstimatorConfig::default();
        config.bounds = Some(BoundsConfig { margin: -1.0 });
        assert!(config.validate().is_err());

        let mut config = EstimatorConfig::default();
        config.gradient_tolerance = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("estimator.json");

        let mut manager = ConfigurationManager::new();
        let previous = manager.set_solver(SolverKind::Bfgs);
        assert_eq!(previous, SolverKind::LevenbergMarquardt);
        manager.save_to_file(&path).unwrap();
        assert!(!manager.is_modified());

        let loaded = ConfigurationManager::from_file(&path).unwrap();
        assert_eq!(loaded.estimator_config().solver, SolverKind::Bfgs);
        assert_eq!(loaded.config(), manager.config());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "solver": "bfgs", "cost_tolerance": 0.01 }"#).unwrap();

        let manager = ConfigurationManager::from_file(&path).unwrap();
        assert_eq!(manager.estimator_config().solver, SolverKind::Bfgs);
        assert_eq!(manager.estimator_config().cost_tolerance, 0.01);
        assert_eq!(manager.estimator_config().max_iterations, DEFAULT_MAX_ITERATIONS);
        assert!(manager.config().round_persisted);
        assert_eq!(manager.config().log_level, "info");
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{ "cost_tolerance": -5.0 }"#).unwrap();
        assert!(matches!(
            ConfigurationManager::from_file(&path),
            Err(ConfigError::InvalidParameter { .. })
        ));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            ConfigurationManager::from_file(&path),
            Err(ConfigError::SerializationError { .. })
        ));

        assert!(matches!(
            ConfigurationManager::from_file(dir.path().join("missing.json")),
            Err(ConfigError::IoError { .. })
        ));
    }

    #[test]
    fn test_runtime_tolerance_adjustment() {
        let mut manager = ConfigurationManager::new();

        let old = manager.set_cost_tolerance(1e-2).unwrap();
        assert_eq!(old, 1e-4);
        assert_eq!(manager.estimator_config().cost_tolerance, 1e-2);
        assert!(manager.is_modified());

        assert!(manager.set_cost_tolerance(-1.0).is_err());
        assert_eq!(manager.estimator_config().cost_tolerance, 1e-2);
    }

    #[test]
    fn test_app_settings_sit_beside_estimator_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.json");
        fs::write(
            &path,
            r#"{ "max_iterations": 500, "round_persisted": false, "log_level": "debug" }"#,
        )
        .unwrap();

        let manager = ConfigurationManager::from_file(&path).unwrap();
        assert_eq!(manager.estimator_config().max_iterations, 500);
        assert!(!manager.config().round_persisted);
        assert_eq!(manager.config().log_level, "debug");

        fs::write(&path, r#"{ "log_level": " " }"#).unwrap();
        assert!(matches!(
            ConfigurationManager::from_file(&path),
            Err(ConfigError::InvalidParameter { ref parameter, .. }) if parameter == "log_level"
        ));
    }

    #[test]
    fn test_save_without_path_fails() {
        let mut manager = ConfigurationManager::new();
        assert!(matches!(manager.save(), Err(ConfigError::IoError { .. })));
    }
}
