extern crate ndarray as nd;
extern crate serde;
extern crate serde_json;
extern crate thiserror;
extern crate tracing;

pub use error::{Result, StoreResult, Error, ConfigurationError,
                ValidationError, StoreError, NumericalError,
                BlockFailure};
pub use config::AnalysisConfig;
pub use local::{LocalConfig, LocalDataset, Selection, UpdateStep};
pub use obs::{ObservationProvider, ObservationRecord, MemoryObservations};
pub use store::{EnsembleStore, MemoryStore};

pub mod config;
pub mod error;
pub mod local;
pub mod obs;
pub mod store;

pub type RealizationId = usize;
pub type TimeStep = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSchema {
  pub name: String,
  pub size: usize,
}

/// Names and sizes of everything a realization carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnsembleSchema {
  pub parameters: Vec<GroupSchema>,
  pub responses: Vec<GroupSchema>,
  /// Parameters are read from and written back to this step.
  pub parameter_step: TimeStep,
}
impl EnsembleSchema {
  pub fn new() -> EnsembleSchema { Default::default() }

  pub fn with_parameter(mut self, name: &str, size: usize) -> EnsembleSchema {
    self.parameters.push(GroupSchema {
      name: name.to_owned(),
      size: size,
    });
    self
  }
  pub fn with_response(mut self, name: &str, size: usize) -> EnsembleSchema {
    self.responses.push(GroupSchema {
      name: name.to_owned(),
      size: size,
    });
    self
  }
  pub fn at_parameter_step(mut self, step: TimeStep) -> EnsembleSchema {
    self.parameter_step = step;
    self
  }

  pub fn parameter(&self, name: &str) -> Option<(usize, &GroupSchema)> {
    self.parameters
      .iter()
      .enumerate()
      .find(|&(_, g)| g.name == name)
  }
  pub fn response(&self, name: &str) -> Option<(usize, &GroupSchema)> {
    self.responses
      .iter()
      .enumerate()
      .find(|&(_, g)| g.name == name)
  }

  pub fn parameter_count(&self) -> usize {
    self.parameters.iter().map(|g| g.size).sum()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn schema_lookup() {
    let schema = EnsembleSchema::new()
      .with_parameter("PORO", 10)
      .with_parameter("MULTFLT", 2)
      .with_response("WOPR", 5);

    assert_eq!(schema.parameter("MULTFLT").map(|(i, g)| (i, g.size)),
               Some((1, 2)));
    assert!(schema.parameter("WOPR").is_none());
    assert_eq!(schema.response("WOPR").map(|(i, _)| i), Some(0));
    assert_eq!(schema.parameter_count(), 12);
  }
}
