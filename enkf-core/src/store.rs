
use nd::{Array1, ArrayView1};

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::{RealizationId, TimeStep};

/// Access to per-realization state. Implementations must allow concurrent
/// reads, and concurrent writes as long as they touch different keys.
pub trait EnsembleStore: Send + Sync {
  fn read_parameter(&self, realization: RealizationId, key: &str,
                    step: TimeStep) -> StoreResult<Array1<f64>>;
  fn write_parameter(&self, realization: RealizationId, key: &str,
                     step: TimeStep, values: ArrayView1<f64>) -> StoreResult<()>;
  fn read_response(&self, realization: RealizationId, key: &str,
                   step: TimeStep) -> StoreResult<Array1<f64>>;
}

type Entries = HashMap<(RealizationId, String, TimeStep), Array1<f64>>;

/// Keeps everything in memory. Failures can be injected per key, which is
/// how the error paths of the update are exercised.
#[derive(Debug, Default)]
pub struct MemoryStore {
  parameters: RwLock<Entries>,
  responses: RwLock<Entries>,
  failing: RwLock<HashSet<String>>,
  failing_writes: RwLock<HashSet<(RealizationId, String)>>,
  writes: AtomicUsize,
}

fn poisoned<T>(_: T) -> StoreError {
  StoreError::Backend("memory store lock poisoned".into())
}

impl MemoryStore {
  pub fn new() -> MemoryStore { Default::default() }

  pub fn set_parameter(&self, realization: RealizationId, key: &str,
                       step: TimeStep, values: Array1<f64>) -> StoreResult<()> {
    self.parameters
      .write()
      .map_err(poisoned)?
      .insert((realization, key.to_owned(), step), values);
    Ok(())
  }
  pub fn set_response(&self, realization: RealizationId, key: &str,
                      step: TimeStep, values: Array1<f64>) -> StoreResult<()> {
    self.responses
      .write()
      .map_err(poisoned)?
      .insert((realization, key.to_owned(), step), values);
    Ok(())
  }

  /// Every later access to `key` fails with a backend error.
  pub fn fail_on(&self, key: &str) -> StoreResult<()> {
    self.failing
      .write()
      .map_err(poisoned)?
      .insert(key.to_owned());
    Ok(())
  }

  /// Later writes of `key` for `realization` fail; reads still work.
  pub fn fail_write(&self, realization: RealizationId, key: &str) -> StoreResult<()> {
    self.failing_writes
      .write()
      .map_err(poisoned)?
      .insert((realization, key.to_owned()));
    Ok(())
  }

  /// Number of successful `write_parameter` calls so far.
  pub fn write_count(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  fn check(&self, key: &str) -> StoreResult<()> {
    if self.failing.read().map_err(poisoned)?.contains(key) {
      return Err(StoreError::Backend(format!("injected failure for `{}`", key)));
    }
    Ok(())
  }

  fn read(entries: &RwLock<Entries>, realization: RealizationId, key: &str,
          step: TimeStep) -> StoreResult<Array1<f64>> {
    entries
      .read()
      .map_err(poisoned)?
      .get(&(realization, key.to_owned(), step))
      .cloned()
      .ok_or_else(|| StoreError::Missing {
        realization: realization,
        key: key.to_owned(),
        step: step,
      })
  }
}

impl EnsembleStore for MemoryStore {
  fn read_parameter(&self, realization: RealizationId, key: &str,
                    step: TimeStep) -> StoreResult<Array1<f64>> {
    self.check(key)?;
    MemoryStore::read(&self.parameters, realization, key, step)
  }
  fn write_parameter(&self, realization: RealizationId, key: &str,
                     step: TimeStep, values: ArrayView1<f64>) -> StoreResult<()> {
    self.check(key)?;
    if self.failing_writes.read().map_err(poisoned)?.contains(&(realization, key.to_owned())) {
      return Err(StoreError::Backend(format!("injected write failure for `{}` of realization {}",
                                             key, realization)));
    }
    trace!(realization, key, step, "write parameter");
    self.set_parameter(realization, key, step, values.to_owned())?;
    self.writes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
  fn read_response(&self, realization: RealizationId, key: &str,
                   step: TimeStep) -> StoreResult<Array1<f64>> {
    self.check(key)?;
    MemoryStore::read(&self.responses, realization, key, step)
  }
}
