
use thiserror::Error;

use crate::{RealizationId, TimeStep};

pub type Result<T> = ::std::result::Result<T, Error>;
pub type StoreResult<T> = ::std::result::Result<T, StoreError>;

/// Fatal errors. Anything returned through this type aborts the update
/// before a single value reaches the target store.
#[derive(Debug, Error)]
pub enum Error {
  #[error("configuration error: {0}")]
  Configuration(#[from] ConfigurationError),
  #[error("validation error: {0}")]
  Validation(#[from] ValidationError),
  #[error("unable to start the worker pool: {0}")]
  ThreadPool(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
  #[error("dataset `{dataset}` references unknown observation group `{group}`")]
  UnknownObservationGroup { dataset: String, group: String },
  #[error("dataset `{dataset}` references unknown parameter group `{group}`")]
  UnknownParameterGroup { dataset: String, group: String },
  #[error("observation `{observation}` is attached to unknown response `{response}`")]
  UnknownResponse { observation: String, response: String },
  #[error("dataset `{dataset}`: index {index} is outside parameter group `{group}` of size {size}")]
  ParameterIndexOutOfRange {
    dataset: String,
    group: String,
    index: usize,
    size: usize,
  },
  #[error("observation `{observation}`: index {index} is outside response `{response}` of size {size}")]
  ResponseIndexOutOfRange {
    observation: String,
    response: String,
    index: usize,
    size: usize,
  },
  #[error("dataset `{dataset}` has no active observations at step {step}")]
  NoActiveObservations { dataset: String, step: TimeStep },
  #[error("dataset `{dataset}` selects no active observations")]
  EmptyObservations { dataset: String },
  #[error("dataset `{dataset}` selects no parameters")]
  EmptyParameters { dataset: String },
  #[error("dataset name `{0}` is used more than once")]
  DuplicateDataset(String),
  #[error("dataset `{dataset}` has invalid scale {scale}; expected a value in [0, 1]")]
  InvalidScale { dataset: String, scale: f64 },
  #[error("ensemble size is {expected} but {found} realizations were supplied")]
  EnsembleSizeMismatch { expected: usize, found: usize },
  #[error("{found} realizations is less than the required minimum of {required}")]
  TooFewRealizations { found: usize, required: usize },
  #[error("analysis setting `{name}`: {reason}")]
  InvalidSetting { name: &'static str, reason: String },
  #[error("unable to parse analysis configuration: {0}")]
  Parse(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
  #[error("observation `{key}`[{index}] at step {step} has uncertainty {std}; it must be finite and > 0")]
  NonPositiveUncertainty {
    key: String,
    index: usize,
    step: TimeStep,
    std: f64,
  },
  #[error("observation `{key}`[{index}] at step {step} has non-finite value {value}")]
  NonFiniteValue {
    key: String,
    index: usize,
    step: TimeStep,
    value: f64,
  },
}

/// Store access failures. These are local to the blocks that needed the
/// data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
  #[error("realization {realization} has no `{key}` at step {step}")]
  Missing {
    realization: RealizationId,
    key: String,
    step: TimeStep,
  },
  #[error("realization {realization}: `{key}` has {found} values, expected {expected}")]
  Shape {
    realization: RealizationId,
    key: String,
    expected: usize,
    found: usize,
  },
  #[error("{0}")]
  Backend(String),
}

/// Failures of the update kernel for a single block.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NumericalError {
  #[error("no active observations left in block")]
  NoObservations,
  #[error("innovation covariance has non-finite entries")]
  NonFinite,
  #[error("eigen decomposition did not converge")]
  NoConvergence,
  #[error("innovation covariance is degenerate (largest eigenvalue {largest:e})")]
  Degenerate { largest: f64 },
  #[error("innovation covariance is singular (condition number {condition:e} exceeds {ceiling:e})")]
  Singular { condition: f64, ceiling: f64 },
}

/// Why a block kept its forecast values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BlockFailure {
  #[error(transparent)]
  Numerical(#[from] NumericalError),
  #[error("store: {0}")]
  Io(#[from] StoreError),
}
