//! Drops observations the ensemble cannot be expected to match.

use nd::{ArrayView1, ArrayView2};

use std::fmt;

use enkf_core::AnalysisConfig;

use crate::utils::{center, row_spread};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationStatus {
  Active,
  /// The ensemble barely varies in the simulated value.
  LowSpread,
  /// The observation is too far from the ensemble mean.
  Outlier,
}

impl ObservationStatus {
  pub fn is_active(&self) -> bool {
    *self == ObservationStatus::Active
  }
}

impl fmt::Display for ObservationStatus {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      ObservationStatus::Active => f.pad("Active"),
      ObservationStatus::LowSpread |
      ObservationStatus::Outlier => f.pad("Deactivated"),
    }
  }
}

/// `responses` is (observations x members); `std` is the uncertainty before
/// any inflation.
pub fn deactivate_outliers(responses: ArrayView2<f64>,
                           observed: ArrayView1<f64>,
                           std: ArrayView1<f64>,
                           config: &AnalysisConfig) -> Vec<ObservationStatus> {
  let m = responses.dim().0;
  assert_eq!(m, observed.len());
  assert_eq!(m, std.len());

  if !config.outlier_rejection {
    return vec![ObservationStatus::Active; m];
  }

  let (mean, _) = center(responses);
  let spread = row_spread(responses);

  (0..m)
    .map(|j| {
      let obs_std = std[j] * config.global_std_scaling;
      if spread[j] <= config.std_cutoff {
        ObservationStatus::LowSpread
      } else if (observed[j] - mean[j]).abs() > config.enkf_alpha * (spread[j] + obs_std) {
        ObservationStatus::Outlier
      } else {
        ObservationStatus::Active
      }
    })
    .collect()
}
