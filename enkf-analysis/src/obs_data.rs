//! Flattens the active observations of the requested steps into one vector.

use nd::Array1;

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use enkf_core::{ObservationProvider, ObservationRecord, TimeStep,
                ValidationError};

#[derive(Debug, Clone)]
pub struct ObsData {
  records: Vec<ObservationRecord>,
  values: Array1<f64>,
  std: Array1<f64>,

  steps: Vec<TimeStep>,
  known: HashSet<String>,
  active_by_key: HashMap<String, Vec<usize>>,
  /// `(index, step)` of every record per key, active or not.
  expected: HashMap<String, Vec<(usize, TimeStep)>>,
}

impl ObsData {
  pub fn aggregate(provider: &dyn ObservationProvider,
                   steps: &[TimeStep]) -> Result<ObsData, ValidationError> {
    let steps: Vec<TimeStep> = steps
      .iter()
      .cloned()
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect();

    let mut known: HashSet<String> = provider
      .observation_keys()
      .into_iter()
      .collect();
    let mut records = Vec::new();
    let mut expected: HashMap<String, Vec<(usize, TimeStep)>> = HashMap::new();
    let mut inactive = 0;

    for record in provider.list_active_observations(&steps[..]) {
      if !steps.contains(&record.step) {
        continue;
      }
      known.insert(record.key.clone());
      expected
        .entry(record.key.clone())
        .or_insert_with(Vec::new)
        .push((record.index, record.step));
      if !record.active {
        inactive += 1;
        continue;
      }

      if !(record.std > 0.0) || !record.std.is_finite() {
        return Err(ValidationError::NonPositiveUncertainty {
          key: record.key.clone(),
          index: record.index,
          step: record.step,
          std: record.std,
        });
      }
      if !record.value.is_finite() {
        return Err(ValidationError::NonFiniteValue {
          key: record.key.clone(),
          index: record.index,
          step: record.step,
          value: record.value,
        });
      }

      records.push(record);
    }

    let mut active_by_key: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
      active_by_key
        .entry(record.key.clone())
        .or_insert_with(Vec::new)
        .push(i);
    }

    debug!(active = records.len(), inactive, steps = ?steps,
           "aggregated observations");

    Ok(ObsData {
      values: records.iter().map(|r| r.value).collect(),
      std: records.iter().map(|r| r.std).collect(),
      records: records,

      steps: steps,
      known: known,
      active_by_key: active_by_key,
      expected: expected,
    })
  }

  pub fn len(&self) -> usize { self.records.len() }
  pub fn is_empty(&self) -> bool { self.records.is_empty() }

  pub fn values(&self) -> &Array1<f64> { &self.values }
  pub fn std(&self) -> &Array1<f64> { &self.std }
  pub fn steps(&self) -> &[TimeStep] { &self.steps[..] }

  pub fn record(&self, i: usize) -> &ObservationRecord { &self.records[i] }
  pub fn records(&self) -> &[ObservationRecord] { &self.records[..] }

  pub fn knows(&self, key: &str) -> bool { self.known.contains(key) }

  /// Positions of the active records of `key`, in aggregation order.
  pub fn active(&self, key: &str) -> &[usize] {
    self.active_by_key
      .get(key)
      .map(|v| &v[..])
      .unwrap_or(&[])
  }

  /// `(index, step)` of every record of `key` at the requested steps,
  /// including inactive ones.
  pub fn expected(&self, key: &str) -> &[(usize, TimeStep)] {
    self.expected
      .get(key)
      .map(|v| &v[..])
      .unwrap_or(&[])
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use enkf_core::MemoryObservations;

  fn provider() -> MemoryObservations {
    MemoryObservations::new()
      .with(ObservationRecord::new("WOPR", 0, 1, 10.0, 1.0, "WOPR", 0))
      .with(ObservationRecord::new("WOPR", 1, 2, 11.0, 1.0, "WOPR", 0))
      .with(ObservationRecord::new("WWCT", 0, 1, 0.5, 0.1, "WWCT", 0).deactivated())
      .with(ObservationRecord::new("WWCT", 1, 1, 0.6, 0.1, "WWCT", 1))
      .with(ObservationRecord::new("BPR", 0, 3, 200.0, 5.0, "BPR", 0))
  }

  #[test]
  fn keeps_active_at_requested_steps_in_order() {
    let obs = ObsData::aggregate(&provider(), &[2, 1, 1]).unwrap();

    assert_eq!(obs.steps(), &[1, 2]);
    let labels: Vec<String> = obs.records().iter().map(|r| r.label()).collect();
    assert_eq!(labels, vec!["WOPR[0]@1", "WOPR[1]@2", "WWCT[1]@1"]);
    assert_eq!(obs.values().to_vec(), vec![10.0, 11.0, 0.6]);
    assert_eq!(obs.std().to_vec(), vec![1.0, 1.0, 0.1]);

    assert_eq!(obs.active("WOPR"), &[0, 1]);
    assert_eq!(obs.active("WWCT"), &[2]);
    assert!(obs.active("BPR").is_empty());
    assert!(obs.knows("BPR"));
    assert!(!obs.knows("FOPR"));
    assert_eq!(obs.expected("WWCT"), &[(0, 1), (1, 1)]);
    assert!(obs.expected("BPR").is_empty());
  }

  #[test]
  fn rejects_non_positive_uncertainty() {
    let provider = provider()
      .with(ObservationRecord::new("FOPT", 0, 1, 1.0, 0.0, "FOPT", 0));
    match ObsData::aggregate(&provider, &[1]) {
      Err(ValidationError::NonPositiveUncertainty { key, std, .. }) => {
        assert_eq!(key, "FOPT");
        assert_eq!(std, 0.0);
      },
      other => panic!("unexpected {:?}", other),
    }

    // Only records that take part are validated.
    assert!(ObsData::aggregate(&provider, &[2]).is_ok());
  }

  #[test]
  fn inactive_records_are_not_validated() {
    let provider = provider()
      .with(ObservationRecord::new("FOPT", 0, 1, ::std::f64::NAN, -1.0, "FOPT", 0)
            .deactivated());
    let obs = ObsData::aggregate(&provider, &[1]).unwrap();
    assert_eq!(obs.len(), 2);
  }
}
