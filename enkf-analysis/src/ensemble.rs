//! In-memory forecast state of one update call.
//!
//! Everything the plan needs is read up front, blocks read from and commit
//! into these matrices, and only then is anything written to the target.

use nd::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;

use std::collections::BTreeMap;

use tracing::{debug, warn};

use enkf_core::{EnsembleSchema, EnsembleStore, GroupSchema, RealizationId,
                StoreError, StoreResult, TimeStep};

use crate::local::{Block, Plan};
use crate::obs_data::ObsData;

#[derive(Debug)]
pub struct Forecast {
  members: usize,
  /// Per schema parameter group, (group size x members). `None` for
  /// groups no block touches.
  parameters: Vec<Option<StoreResult<Array2<f64>>>>,
  /// Parameter groups as read, untouched by `commit`.
  prior: Vec<Option<Array2<f64>>>,
  /// Simulated values, rows indexed like `ObsData`.
  responses: Array2<f64>,
  response_errors: Vec<Option<StoreError>>,
}

/// A parameter group that could not be written for every realization.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteFailure {
  pub group: usize,
  pub error: StoreError,
  /// Realizations that got the update but could not be put back to their
  /// forecast.
  pub unrestored: Vec<RealizationId>,
}

/// Reads `key` for every realization; the first failure in realization
/// order wins.
fn read_all<F>(realizations: &[RealizationId], layout: &GroupSchema,
               read: F) -> StoreResult<Array2<f64>>
  where F: Fn(RealizationId) -> StoreResult<Array1<f64>> + Sync,
{
  let columns: Vec<StoreResult<Array1<f64>>> = realizations
    .par_iter()
    .map(|&r| {
      let values = read(r)?;
      if values.len() != layout.size {
        return Err(StoreError::Shape {
          realization: r,
          key: layout.name.clone(),
          expected: layout.size,
          found: values.len(),
        });
      }
      Ok(values)
    })
    .collect();

  let mut out = Array2::zeros((layout.size, realizations.len()));
  for (mut column, values) in out.axis_iter_mut(Axis(1)).zip(columns.into_iter()) {
    column.assign(&values?);
  }
  Ok(out)
}

impl Forecast {
  pub fn load(source: &dyn EnsembleStore, schema: &EnsembleSchema,
              plan: &Plan, obs: &ObsData,
              realizations: &[RealizationId]) -> Forecast {
    let members = realizations.len();

    let mut parameters: Vec<Option<StoreResult<Array2<f64>>>> =
      (0..schema.parameters.len()).map(|_| None).collect();
    let mut prior: Vec<Option<Array2<f64>>> =
      (0..schema.parameters.len()).map(|_| None).collect();
    for group in plan.parameter_groups() {
      let layout = &schema.parameters[group];
      let read = read_all(realizations, layout, |r| {
        source.read_parameter(r, &layout.name, schema.parameter_step)
      });
      if let Err(ref e) = read {
        warn!(group = %layout.name, error = %e, "unable to read parameters");
      }
      prior[group] = read.as_ref().ok().cloned();
      parameters[group] = Some(read);
    }

    // one read per (response, step) and realization
    let mut wanted: BTreeMap<(usize, TimeStep), Vec<usize>> = BTreeMap::new();
    for row in plan.observation_rows() {
      if let Some(r) = plan.response(row) {
        wanted
          .entry((r.group, obs.record(row).step))
          .or_insert_with(Vec::new)
          .push(row);
      }
    }

    let mut responses = Array2::zeros((obs.len(), members));
    let mut response_errors = vec![None; obs.len()];
    for ((group, step), rows) in wanted.into_iter() {
      let layout = &schema.responses[group];
      match read_all(realizations, layout, |r| source.read_response(r, &layout.name, step)) {
        Ok(values) => {
          for &row in rows.iter() {
            let offset = plan.response(row)
              .map(|r| r.offset)
              .unwrap_or(0);
            responses.row_mut(row).assign(&values.row(offset));
          }
        },
        Err(e) => {
          warn!(response = %layout.name, step, error = %e, "unable to read responses");
          for &row in rows.iter() {
            response_errors[row] = Some(e.clone());
          }
        },
      }
    }

    debug!(members, "loaded forecast");

    Forecast {
      members: members,
      parameters: parameters,
      prior: prior,
      responses: responses,
      response_errors: response_errors,
    }
  }

  pub fn members(&self) -> usize { self.members }

  /// Current values of the block's parameters, (parameters x members).
  pub fn parameter_block(&self, plan: &Plan,
                         block: &Block) -> StoreResult<Array2<f64>> {
    let indices = plan.parameters(block);
    let mut out = Array2::zeros((indices.len(), self.members));
    for (mut row, p) in out.axis_iter_mut(Axis(0)).zip(indices.iter()) {
      match self.parameters[p.group] {
        Some(Ok(ref values)) => row.assign(&values.row(p.offset)),
        Some(Err(ref e)) => return Err(e.clone()),
        None => unreachable!("parameter group {} was not loaded", p.group),
      }
    }
    Ok(out)
  }

  /// Simulated values of the given observation rows, (rows x members).
  pub fn response_block(&self, rows: &[usize]) -> StoreResult<Array2<f64>> {
    if let Some(e) = rows.iter().filter_map(|&r| self.response_errors[r].as_ref()).next() {
      return Err(e.clone());
    }
    Ok(self.responses.select(Axis(0), rows))
  }

  /// Makes a block's update visible to every block that runs after it.
  pub fn commit(&mut self, plan: &Plan, block: &Block,
                updated: ArrayView2<f64>) {
    let indices = plan.parameters(block);
    assert_eq!(updated.dim(), (indices.len(), self.members));

    for (p, row) in indices.iter().zip(updated.axis_iter(Axis(0))) {
      if let Some(Ok(ref mut values)) = self.parameters[p.group] {
        values.row_mut(p.offset).assign(&row);
      }
    }
  }

  /// Writes every loaded parameter group to `target`.
  ///
  /// A group is written whole or not at all: when some realization fails,
  /// the forecast goes back to the realizations that were written.
  /// Returns the groups that could not be written.
  pub fn write_back(&self, target: &dyn EnsembleStore,
                    schema: &EnsembleSchema,
                    realizations: &[RealizationId]) -> Vec<WriteFailure> {
    let mut failures = Vec::new();

    for (group, values) in self.parameters.iter().enumerate() {
      let values = match *values {
        Some(Ok(ref values)) => values,
        _ => continue,
      };
      let layout = &schema.parameters[group];

      let results = write_columns(target, layout, schema.parameter_step,
                                  realizations, values.view());
      let error = match results.iter().filter_map(|r| r.as_ref().err()).next() {
        Some(e) => e.clone(),
        None => continue,
      };
      warn!(group = %layout.name, error = %error, "unable to write parameters");

      let written: Vec<usize> = results
        .iter()
        .enumerate()
        .filter(|&(_, r)| r.is_ok())
        .map(|(i, _)| i)
        .collect();
      let unrestored: Vec<RealizationId> = match self.prior[group] {
        Some(ref prior) => {
          let members: Vec<RealizationId> = written.iter().map(|&i| realizations[i]).collect();
          let columns = prior.select(Axis(1), &written[..]);
          let restored = write_columns(target, layout, schema.parameter_step,
                                       &members[..], columns.view());
          members
            .into_iter()
            .zip(restored.into_iter())
            .filter(|&(_, ref r)| r.is_err())
            .map(|(r, _)| r)
            .collect()
        },
        None => written.iter().map(|&i| realizations[i]).collect(),
      };
      if !unrestored.is_empty() {
        warn!(group = %layout.name, realizations = ?unrestored,
              "unable to restore forecast parameters");
      }

      failures.push(WriteFailure {
        group: group,
        error: error,
        unrestored: unrestored,
      });
    }

    failures
  }
}

/// One write per realization, results in realization order.
fn write_columns(target: &dyn EnsembleStore, layout: &GroupSchema,
                 step: TimeStep, realizations: &[RealizationId],
                 values: ArrayView2<f64>) -> Vec<StoreResult<()>> {
  realizations
    .par_iter()
    .zip(values.axis_iter(Axis(1)).into_par_iter())
    .map(|(&r, column)| target.write_parameter(r, &layout.name, step, column))
    .collect()
}

#[cfg(test)]
mod test {
  use super::*;
  use nd::{arr1, arr2, ArrayView1};
  use std::sync::Mutex;
  use enkf_core::{LocalDataset, MemoryObservations, MemoryStore,
                  ObservationRecord, UpdateStep};

  fn setup() -> (EnsembleSchema, MemoryStore, ObsData, Plan) {
    let schema = EnsembleSchema::new()
      .with_parameter("PORO", 2)
      .with_parameter("UNUSED", 1)
      .with_response("WOPR", 3);

    let store = MemoryStore::new();
    for r in 0..3 {
      let r_f = r as f64;
      store.set_parameter(r, "PORO", 0, arr1(&[r_f, 10.0 + r_f])).unwrap();
      store.set_parameter(r, "UNUSED", 0, arr1(&[-1.0])).unwrap();
      store.set_response(r, "WOPR", 1, arr1(&[r_f, 2.0 * r_f, 3.0 * r_f])).unwrap();
      store.set_response(r, "WOPR", 2, arr1(&[0.0, 0.0, 100.0 + r_f])).unwrap();
    }

    let provider = MemoryObservations::new()
      .with(ObservationRecord::new("WOPR", 0, 1, 1.0, 1.0, "WOPR", 1))
      .with(ObservationRecord::new("WOPR", 1, 2, 1.0, 1.0, "WOPR", 2));
    let obs = ObsData::aggregate(&provider, &[1, 2]).unwrap();

    let step = UpdateStep::new("S")
      .with_dataset(LocalDataset::new("A").observe("WOPR").update_partly("PORO", vec![1]));
    let plan = Plan::build(&step, &schema, &obs).unwrap();

    (schema, store, obs, plan)
  }

  #[test]
  fn loads_rows_at_their_steps() {
    let (schema, store, obs, plan) = setup();
    let forecast = Forecast::load(&store, &schema, &plan, &obs, &[0, 1, 2]);
    let block = &plan.blocks()[0];

    assert_eq!(forecast.parameter_block(&plan, block).unwrap(),
               arr2(&[[10.0, 11.0, 12.0]]));
    assert_eq!(forecast.response_block(&[0, 1]).unwrap(),
               arr2(&[
                 [0.0, 2.0, 4.0],
                 [100.0, 101.0, 102.0],
               ]));
    assert!(forecast.parameters[1].is_none());
  }

  #[test]
  fn commit_and_write_back() {
    let (schema, store, obs, plan) = setup();
    let mut forecast = Forecast::load(&store, &schema, &plan, &obs, &[0, 1, 2]);
    let block = &plan.blocks()[0];

    forecast.commit(&plan, block, arr2(&[[7.0, 8.0, 9.0]]).view());
    assert_eq!(forecast.parameter_block(&plan, block).unwrap(),
               arr2(&[[7.0, 8.0, 9.0]]));

    let target = MemoryStore::new();
    assert!(forecast.write_back(&target, &schema, &[0, 1, 2]).is_empty());
    assert_eq!(target.read_parameter(2, "PORO", 0).unwrap(), arr1(&[2.0, 9.0]));
    assert!(target.read_parameter(0, "UNUSED", 0).is_err());
    assert_eq!(target.write_count(), 3);

    target.fail_on("PORO").unwrap();
    let failures = forecast.write_back(&target, &schema, &[0, 1, 2]);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].group, 0);
    assert!(failures[0].unrestored.is_empty());
  }

  #[test]
  fn partly_written_group_goes_back_to_its_forecast() {
    let (schema, store, obs, plan) = setup();
    let mut forecast = Forecast::load(&store, &schema, &plan, &obs, &[0, 1, 2]);
    forecast.commit(&plan, &plan.blocks()[0], arr2(&[[7.0, 8.0, 9.0]]).view());

    store.fail_write(1, "PORO").unwrap();
    let failures = forecast.write_back(&store, &schema, &[0, 1, 2]);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].group, 0);
    assert!(failures[0].unrestored.is_empty());
    for r in 0..3 {
      let r_f = r as f64;
      assert_eq!(store.read_parameter(r, "PORO", 0).unwrap(), arr1(&[r_f, 10.0 + r_f]));
    }
  }

  /// Fails every write of realization 2, and realization 0 from its second
  /// write on.
  struct Flaky {
    inner: MemoryStore,
    writes: Mutex<Vec<usize>>,
  }

  impl EnsembleStore for Flaky {
    fn read_parameter(&self, realization: RealizationId, key: &str,
                      step: TimeStep) -> StoreResult<Array1<f64>> {
      self.inner.read_parameter(realization, key, step)
    }
    fn write_parameter(&self, realization: RealizationId, key: &str,
                       step: TimeStep, values: ArrayView1<f64>) -> StoreResult<()> {
      let n = {
        let mut writes = self.writes.lock().unwrap();
        writes[realization] += 1;
        writes[realization]
      };
      if realization == 2 || (realization == 0 && n > 1) {
        return Err(StoreError::Backend("disk full".into()));
      }
      self.inner.write_parameter(realization, key, step, values)
    }
    fn read_response(&self, realization: RealizationId, key: &str,
                     step: TimeStep) -> StoreResult<Array1<f64>> {
      self.inner.read_response(realization, key, step)
    }
  }

  #[test]
  fn failed_restores_are_reported() {
    let (schema, store, obs, plan) = setup();
    let mut forecast = Forecast::load(&store, &schema, &plan, &obs, &[0, 1, 2]);
    forecast.commit(&plan, &plan.blocks()[0], arr2(&[[7.0, 8.0, 9.0]]).view());

    let target = Flaky {
      inner: MemoryStore::new(),
      writes: Mutex::new(vec![0; 3]),
    };
    let failures = forecast.write_back(&target, &schema, &[0, 1, 2]);
    assert_eq!(failures, vec![WriteFailure {
      group: 0,
      error: StoreError::Backend("disk full".into()),
      unrestored: vec![0],
    }]);
    assert_eq!(target.inner.read_parameter(0, "PORO", 0).unwrap(), arr1(&[0.0, 7.0]));
    assert_eq!(target.inner.read_parameter(1, "PORO", 0).unwrap(), arr1(&[1.0, 11.0]));
    assert!(target.inner.read_parameter(2, "PORO", 0).is_err());
  }

  #[test]
  fn read_failures_stay_with_their_rows() {
    let (schema, store, obs, plan) = setup();
    store.set_parameter(1, "PORO", 0, arr1(&[1.0])).unwrap();
    store.set_response(2, "WOPR", 2, arr1(&[1.0, 2.0])).unwrap();
    let forecast = Forecast::load(&store, &schema, &plan, &obs, &[0, 1, 2]);
    let block = &plan.blocks()[0];

    assert_eq!(forecast.parameter_block(&plan, block).unwrap_err(),
               StoreError::Shape {
                 realization: 1,
                 key: "PORO".into(),
                 expected: 2,
                 found: 1,
               });
    assert!(forecast.response_block(&[0]).is_ok());
    assert!(forecast.response_block(&[0, 1]).is_err());

    let target = MemoryStore::new();
    assert!(forecast.write_back(&target, &schema, &[0, 1, 2]).is_empty());
    assert_eq!(target.write_count(), 0);
  }
}
