//! The perturbed-observation ensemble smoother update of one block.
//!
//! With Y the forecast responses (m x N), X the forecast parameters
//! (p x N), D = d 1ᵗ + E the perturbed observations and R = diag(σ²):
//!
//!   S  = ΔY ΔYᵗ / (N - 1) + R
//!   K  = ΔX ΔYᵗ / (N - 1) · S⁺
//!   X' = X + scale · K (D - Y)
//!
//! where S⁺ is the eigenvalue-truncated pseudo-inverse of S.

use na::{DMatrix, SymmetricEigen};
use nd::{Array2, ArrayView1, ArrayView2};
use nd::linalg::general_mat_mul;
use num_traits::{One, Zero};

use enkf_core::NumericalError;

use crate::utils::{center, extend_dim_ref};

/// Conditioning of an inverted innovation covariance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Inversion {
  /// Eigen components kept.
  pub components: usize,
  pub truncated: usize,
  /// Largest over smallest kept eigenvalue.
  pub condition: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Input<'a> {
  pub responses: ArrayView2<'a, f64>,
  pub parameters: ArrayView2<'a, f64>,
  pub observed: ArrayView1<'a, f64>,
  pub std: ArrayView1<'a, f64>,
  pub noise: ArrayView2<'a, f64>,
  pub scale: f64,
}

#[derive(Debug, Clone)]
pub struct Output {
  pub parameters: Array2<f64>,
  pub inversion: Inversion,
}

pub fn update(input: Input, truncation: f64,
              max_condition: f64) -> Result<Output, NumericalError> {
  let Input {
    responses, parameters, observed,
    std, noise, scale,
  } = input;

  let (m, n) = responses.dim();
  if m == 0 {
    return Err(NumericalError::NoObservations);
  }
  assert!(n >= 2, "an ensemble update needs at least two members");
  assert_eq!(parameters.dim().1, n);
  assert_eq!(observed.len(), m);
  assert_eq!(std.len(), m);
  assert_eq!(noise.dim(), (m, n));

  let nm1 = (n - 1) as f64;
  let (_, dy) = center(responses);
  let (_, dx) = center(parameters);

  let mut s = Array2::from_diag(&std.mapv(|v| v * v));
  general_mat_mul(nm1.recip(), &dy, &dy.t(), One::one(), &mut s);
  if !s.iter().all(|v| v.is_finite()) {
    return Err(NumericalError::NonFinite);
  }

  let (s_inv, inversion) = invert_truncated(s.view(), truncation, max_condition)?;

  // cross covariance ΔX ΔYᵗ / (N - 1), then the gain
  let p = parameters.dim().0;
  let mut c = Array2::zeros((p, m));
  general_mat_mul(nm1.recip(), &dx, &dy.t(), Zero::zero(), &mut c);
  let mut gain = Array2::zeros((p, m));
  general_mat_mul(One::one(), &c, &s_inv, Zero::zero(), &mut gain);

  // innovations D - Y
  let mut innovation = noise.to_owned();
  innovation += &extend_dim_ref(&observed, false);
  innovation -= &responses;

  let mut updated = parameters.to_owned();
  general_mat_mul(scale, &gain, &innovation, One::one(), &mut updated);

  Ok(Output {
    parameters: updated,
    inversion: inversion,
  })
}

/// Pseudo-inverse of the symmetric matrix `s` keeping only eigenvalues
/// above `truncation` times the largest one.
pub fn invert_truncated(s: ArrayView2<f64>, truncation: f64,
                        max_condition: f64)
  -> Result<(Array2<f64>, Inversion), NumericalError>
{
  let m = s.dim().0;
  assert_eq!(s.dim(), (m, m));

  let mat = DMatrix::from_fn(m, m, |i, j| s[[i, j]]);
  let eigen = SymmetricEigen::try_new(mat, ::std::f64::EPSILON, 0)
    .ok_or(NumericalError::NoConvergence)?;

  let largest = eigen.eigenvalues
    .iter()
    .cloned()
    .fold(::std::f64::NEG_INFINITY, f64::max);
  if !(largest > 0.0) || !largest.is_finite() {
    return Err(NumericalError::Degenerate { largest: largest });
  }

  let cutoff = truncation * largest;
  let mut kept = 0;
  let mut smallest = largest;
  let mut inverse = Array2::zeros((m, m));

  for (k, &lambda) in eigen.eigenvalues.iter().enumerate() {
    if lambda <= cutoff || lambda <= 0.0 {
      continue;
    }
    kept += 1;
    smallest = smallest.min(lambda);

    let v = eigen.eigenvectors.column(k);
    for i in 0..m {
      let vi = v[i] / lambda;
      let mut row = inverse.row_mut(i);
      for j in 0..m {
        row[j] += vi * v[j];
      }
    }
  }

  let condition = largest / smallest;
  if condition > max_condition {
    return Err(NumericalError::Singular {
      condition: condition,
      ceiling: max_condition,
    });
  }

  Ok((inverse, Inversion {
    components: kept,
    truncated: m - kept,
    condition: condition,
  }))
}
