//! Tunables of a single update call.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigurationError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
  /// Eigenvalues of the innovation covariance below
  /// `truncation * largest` are dropped before inversion.
  pub truncation: f64,
  /// Largest condition number the retained spectrum may have.
  pub max_condition: f64,
  pub max_workers: usize,

  pub outlier_rejection: bool,
  /// Distance factor of the outlier filter.
  pub enkf_alpha: f64,
  /// Responses with an ensemble spread at or below this are dropped.
  pub std_cutoff: f64,
  /// Observation error inflation; 1.0 is a plain smoother update.
  pub global_std_scaling: f64,

  /// When false no observation noise is drawn (deterministic update).
  pub perturb_observations: bool,
  pub min_realizations: usize,
  pub verbose: bool,
}

impl Default for AnalysisConfig {
  fn default() -> AnalysisConfig {
    let workers = ::std::thread::available_parallelism()
      .map(|n| n.get())
      .unwrap_or(1);

    AnalysisConfig {
      truncation: 1e-10,
      max_condition: 1e14,
      max_workers: workers,

      outlier_rejection: true,
      enkf_alpha: 3.0,
      std_cutoff: 1e-6,
      global_std_scaling: 1.0,

      perturb_observations: true,
      min_realizations: 2,
      verbose: false,
    }
  }
}

impl AnalysisConfig {
  pub fn from_json(text: &str) -> Result<AnalysisConfig> {
    let config: AnalysisConfig = serde_json::from_str(text)
      .map_err(|e| ConfigurationError::Parse(e.to_string()))?;
    config.validate()?;
    debug!(?config, "loaded analysis configuration");
    Ok(config)
  }

  pub fn noise_free(mut self) -> AnalysisConfig {
    self.perturb_observations = false;
    self
  }
  pub fn with_workers(mut self, workers: usize) -> AnalysisConfig {
    self.max_workers = workers;
    self
  }

  pub fn validate(&self) -> ::std::result::Result<(), ConfigurationError> {
    fn invalid(name: &'static str, reason: String) -> ConfigurationError {
      ConfigurationError::InvalidSetting {
        name: name,
        reason: reason,
      }
    }

    if !(self.truncation >= 0.0 && self.truncation < 1.0) {
      return Err(invalid("truncation",
                         format!("{} is not in [0, 1)", self.truncation)));
    }
    if !(self.max_condition > 1.0) {
      return Err(invalid("max_condition",
                         format!("{} must be greater than 1", self.max_condition)));
    }
    if self.max_workers == 0 {
      return Err(invalid("max_workers", "at least one worker is required".into()));
    }
    if !(self.enkf_alpha > 0.0) || !self.enkf_alpha.is_finite() {
      return Err(invalid("enkf_alpha",
                         format!("{} must be finite and positive", self.enkf_alpha)));
    }
    if !(self.std_cutoff >= 0.0) || !self.std_cutoff.is_finite() {
      return Err(invalid("std_cutoff",
                         format!("{} must be finite and non-negative", self.std_cutoff)));
    }
    if !(self.global_std_scaling > 0.0) || !self.global_std_scaling.is_finite() {
      return Err(invalid("global_std_scaling",
                         format!("{} must be finite and positive",
                                 self.global_std_scaling)));
    }

    Ok(())
  }
}
