
extern crate ndarray as nd;
extern crate nalgebra as na;
extern crate num_traits;
extern crate rand;
extern crate rand_chacha;
extern crate rand_distr;
extern crate rayon;
extern crate tracing;
extern crate enkf_core;

use rayon::ThreadPoolBuilder;

use std::sync::Mutex;

use tracing::{info, warn};

use enkf_core::{AnalysisConfig, ConfigurationError, EnsembleSchema,
                EnsembleStore, Error, LocalConfig, ObservationProvider,
                RealizationId, Result, TimeStep, BlockFailure};

pub use ensemble::{Forecast, WriteFailure};
pub use kernel::{Inversion, invert_truncated};
pub use local::{Block, BlockId, Plan};
pub use obs_data::ObsData;
pub use outlier::ObservationStatus;
pub use perturb::Sampler;
pub use report::{BlockReport, BlockStatus, Collector, DiagnosticSink,
                 LogStream, SnapshotEntry, UpdateSnapshot};
pub use rng::RandomStream;

pub mod ensemble;
pub mod kernel;
pub mod local;
pub mod obs_data;
pub mod outlier;
pub mod perturb;
pub mod report;
pub mod rng;
pub mod scheduler;
pub mod utils;

/// Everything one smoother update needs. `source` and `target` may be the
/// same store.
pub struct UpdateArgs<'a> {
  pub time_steps: &'a [TimeStep],
  pub update_step: &'a dyn LocalConfig,
  pub ens_size: usize,
  pub observations: &'a dyn ObservationProvider,
  pub rng: &'a mut RandomStream,
  pub config: &'a AnalysisConfig,
  pub schema: &'a EnsembleSchema,
  pub realizations: &'a [RealizationId],
  pub source: &'a dyn EnsembleStore,
  pub target: &'a dyn EnsembleStore,
  pub log: &'a mut dyn DiagnosticSink,
  pub verbose: bool,
}

/// Runs one ensemble smoother update.
///
/// Configuration and validation problems are returned as `Err` before
/// anything is read or written. Otherwise every block runs, and the result
/// is `Ok(true)` only when every block was updated and written back; a
/// failed block keeps its forecast values and the result is `Ok(false)`.
pub fn smoother_update(args: UpdateArgs) -> Result<bool> {
  let UpdateArgs {
    time_steps, update_step, ens_size,
    observations, rng, config, schema,
    realizations, source, target, log,
    verbose,
  } = args;

  config.validate()?;
  if realizations.len() != ens_size {
    return Err(ConfigurationError::EnsembleSizeMismatch {
      expected: ens_size,
      found: realizations.len(),
    }.into());
  }
  let required = config.min_realizations.max(2);
  if ens_size < required {
    return Err(ConfigurationError::TooFewRealizations {
      found: ens_size,
      required: required,
    }.into());
  }

  let obs = ObsData::aggregate(observations, time_steps)?;
  let plan = Plan::build(update_step, schema, &obs)?;

  info!(blocks = plan.len(), observations = obs.len(), members = ens_size,
        workers = config.max_workers, epoch = rng.epoch(),
        "starting smoother update");

  let pool = ThreadPoolBuilder::new()
    .num_threads(config.max_workers)
    .build()
    .map_err(|e| Error::ThreadPool(e.to_string()))?;

  let verbose = verbose || config.verbose;
  let sink = Mutex::new(log);
  let stream: &RandomStream = rng;

  let (mut reports, write_failures) = pool.install(|| {
    let mut forecast = Forecast::load(source, schema, &plan, &obs, realizations);
    let ctx = scheduler::Context {
      plan: &plan,
      obs: &obs,
      sampler: Sampler::new(stream, config.perturb_observations),
      config: config,
    };
    let reports = scheduler::execute(&ctx, &mut forecast, &sink, verbose);
    let failures = forecast.write_back(target, schema, realizations);
    (reports, failures)
  });

  let sink = sink.into_inner().unwrap_or_else(|e| e.into_inner());
  for failure in write_failures.iter() {
    let touching = plan.blocks_touching(failure.group);
    let names: Vec<&str> = touching
      .iter()
      .map(|&id| &plan.blocks()[id].name[..])
      .collect();
    sink.write_failed(&schema.parameters[failure.group].name, &names[..],
                      &failure.error, &failure.unrestored[..]);

    for &id in touching.iter() {
      if reports[id].status.is_updated() {
        reports[id].status = BlockStatus::Failed(BlockFailure::Io(failure.error.clone()));
      }
    }
  }

  rng.advance();

  let failed = reports.iter().filter(|r| !r.status.is_updated()).count();
  if failed > 0 {
    warn!(failed, blocks = reports.len(), "smoother update finished with failed blocks");
  } else {
    info!(blocks = reports.len(), "smoother update finished");
  }

  Ok(failed == 0)
}
