use nd::{ArrayBase, Array1, Array2, ArrayView, ArrayView1, ArrayView2,
         Axis, Data, Ix1, Ix2, ViewRepr};
use num_traits::Float;

/// View a vector as a single column (`t == false`) or row.
pub fn extend_dim_ref<D>(d: &ArrayBase<D, Ix1>, t: bool)
  -> ArrayBase<ViewRepr<&D::Elem>, Ix2>
  where D: Data,
{
  let axis = if !t {
    Axis(1)
  } else {
    Axis(0)
  };
  d.view().insert_axis(axis)
}

/// Row means and the centered anomalies of an (rows x members) ensemble.
pub fn center(ensemble: ArrayView2<f64>) -> (Array1<f64>, Array2<f64>) {
  let n = ensemble.dim().1;
  let mean = ensemble.sum_axis(Axis(1)) / n as f64;

  let mut anomalies = ensemble.to_owned();
  anomalies -= &extend_dim_ref(&mean, false);

  (mean, anomalies)
}

/// Population (ddof = 0) standard deviation of every row.
pub fn row_spread(ensemble: ArrayView2<f64>) -> Array1<f64> {
  let n = ensemble.dim().1 as f64;
  let (_, anomalies) = center(ensemble);
  anomalies.map_axis(Axis(1), |row| {
    (row.iter().map(|v| v * v).sum::<f64>() / n).sqrt()
  })
}

pub trait PartialEqWithinTol<Rhs, Tol> {
  const STD_TOL: Tol;
  fn partial_eq_within_tol(&self, rhs: &Rhs, tol: Tol) -> bool;

  fn partial_neq_within_tol(&self, rhs: &Rhs, tol: Tol) -> bool {
    !self.partial_eq_within_tol(rhs, tol)
  }

  fn partial_eq_within_std_tol(&self, rhs: &Rhs) -> bool {
    self.partial_eq_within_tol(rhs, Self::STD_TOL)
  }
}

impl PartialEqWithinTol<f64, f64> for f64 {
  const STD_TOL: Self = ::std::f64::EPSILON;
  fn partial_eq_within_tol(&self, rhs: &f64, tol: f64) -> bool {
    (self - rhs).abs() <= tol
  }
}
impl<'a, T> PartialEqWithinTol<ArrayView1<'a, T>, T> for ArrayView1<'a, T>
  where T: PartialEqWithinTol<T, T> + Float,
{
  const STD_TOL: T = T::STD_TOL;
  fn partial_eq_within_tol(&self, rhs: &ArrayView1<'a, T>, tol: T) -> bool {
    self.len() == rhs.len() &&
      self.iter()
      .zip(rhs.iter())
      .all(|(l, r)| l.partial_eq_within_tol(r, tol))
  }
}
impl<'a, T> PartialEqWithinTol<ArrayView<'a, T, Ix2>, T> for ArrayView<'a, T, Ix2>
  where T: PartialEqWithinTol<T, T> + Float,
{
  const STD_TOL: T = T::STD_TOL;
  fn partial_eq_within_tol(&self, rhs: &ArrayView<'a, T, Ix2>, tol: T) -> bool {
    self.dim() == rhs.dim() &&
      self.axis_iter(Axis(0))
      .zip(rhs.axis_iter(Axis(0)))
      .all(|(l, r)| l.partial_eq_within_tol(&r, tol))
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use nd::{arr1, arr2};

  #[test]
  fn center_rows() {
    let e = arr2(&[
      [1.0, 2.0, 3.0, 4.0],
      [0.0, 0.0, 2.0, 2.0],
    ]);
    let (mean, anomalies) = center(e.view());

    assert!(mean.view().partial_eq_within_std_tol(&arr1(&[2.5, 1.0]).view()));
    let expected = arr2(&[
      [-1.5, -0.5, 0.5, 1.5],
      [-1.0, -1.0, 1.0, 1.0],
    ]);
    assert!(anomalies.view().partial_eq_within_std_tol(&expected.view()));
  }

  #[test]
  fn spread_is_population_std() {
    let e = arr2(&[
      [1.0, 1.0, 1.0],
      [0.0, 0.0, 2.0, ],
    ]);
    let spread = row_spread(e.view());
    assert_eq!(spread[0], 0.0);
    assert!(spread[1].partial_eq_within_tol(&(8.0f64 / 9.0).sqrt(), 1e-12));
  }

  #[test]
  fn column_view() {
    let v = arr1(&[1.0, 2.0, 3.0]);
    assert_eq!(extend_dim_ref(&v, false).dim(), (3, 1));
    assert_eq!(extend_dim_ref(&v, true).dim(), (1, 3));
  }
}
