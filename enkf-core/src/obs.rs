
use crate::TimeStep;

/// One scalar measurement and the response entry it is compared against.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
  /// Observation group this record belongs to.
  pub key: String,
  /// Position inside the group.
  pub index: usize,
  pub step: TimeStep,
  pub value: f64,
  /// Standard deviation of the measurement error.
  pub std: f64,
  pub active: bool,

  pub response: String,
  pub response_index: usize,
}
impl ObservationRecord {
  pub fn new(key: &str, index: usize, step: TimeStep,
             value: f64, std: f64,
             response: &str, response_index: usize) -> ObservationRecord {
    ObservationRecord {
      key: key.to_owned(),
      index: index,
      step: step,
      value: value,
      std: std,
      active: true,
      response: response.to_owned(),
      response_index: response_index,
    }
  }

  pub fn deactivated(mut self) -> ObservationRecord {
    self.active = false;
    self
  }

  pub fn label(&self) -> String {
    format!("{}[{}]@{}", self.key, self.index, self.step)
  }
}

pub trait ObservationProvider: Sync {
  /// Every observation group the provider knows of, at any step.
  fn observation_keys(&self) -> Vec<String>;
  /// Records at the given steps, in a stable order. Inactive records may
  /// be included; they carry `active == false`.
  fn list_active_observations(&self, steps: &[TimeStep]) -> Vec<ObservationRecord>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryObservations {
  records: Vec<ObservationRecord>,
}
impl MemoryObservations {
  pub fn new() -> MemoryObservations { Default::default() }

  pub fn push(&mut self, record: ObservationRecord) {
    self.records.push(record);
  }
  pub fn with(mut self, record: ObservationRecord) -> MemoryObservations {
    self.push(record);
    self
  }
}
impl ObservationProvider for MemoryObservations {
  fn observation_keys(&self) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for record in self.records.iter() {
      if !keys.contains(&record.key) {
        keys.push(record.key.clone());
      }
    }
    keys
  }
  fn list_active_observations(&self, steps: &[TimeStep]) -> Vec<ObservationRecord> {
    self.records
      .iter()
      .filter(|r| steps.contains(&r.step))
      .cloned()
      .collect()
  }
}
