
extern crate ndarray as nd;
extern crate enkf_analysis as ea;
extern crate enkf_core;
extern crate rand;
extern crate rand_chacha;
extern crate rand_distr;
extern crate tracing;
extern crate tracing_subscriber;

use nd::{Array1, ArrayView1};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::env;
use std::error::Error;
use std::io;

use enkf_core::{AnalysisConfig, EnsembleSchema, EnsembleStore, LocalDataset,
                MemoryObservations, MemoryStore, ObservationRecord,
                RealizationId, StoreResult, UpdateStep};
use ea::{smoother_update, LogStream, RandomStream, UpdateArgs};

const MEMBERS: usize = 100;
const RNG_SEED: u64 = 1;
const POINTS: usize = 10;
const OBS_STEP: usize = 1;
const OBS_STD: f64 = 1.0;
/// a t² + b t + c
const TRUTH: [f64; 3] = [0.5, 1.0, 3.0];
const PRIOR_STD: [f64; 3] = [1.0, 1.0, 2.0];
/// Inflation factors of the multiple data assimilation run; their
/// reciprocals sum to one.
const MDA_WEIGHTS: [f64; 4] = [4.0; 4];

fn poly(coeffs: ArrayView1<f64>, t: f64) -> f64 {
  coeffs[0] * t * t + coeffs[1] * t + coeffs[2]
}

/// Runs the "simulator" for every realization.
fn forward(store: &MemoryStore, realizations: &[RealizationId]) -> StoreResult<()> {
  for &r in realizations {
    let coeffs = store.read_parameter(r, "COEFFS", 0)?;
    let y: Array1<f64> = (0..POINTS)
      .map(|t| poly(coeffs.view(), t as f64))
      .collect();
    store.set_response(r, "POLY", OBS_STEP, y)?;
  }
  Ok(())
}

fn prior(realizations: &[RealizationId]) -> Result<MemoryStore, Box<dyn Error>> {
  let mut rand = ChaCha20Rng::seed_from_u64(RNG_SEED);
  let store = MemoryStore::new();
  for &r in realizations {
    let mut coeffs = Array1::zeros(3);
    for (c, &std) in coeffs.iter_mut().zip(PRIOR_STD.iter()) {
      *c = Normal::new(0.0, std)?.sample(&mut rand);
    }
    store.set_parameter(r, "COEFFS", 0, coeffs)?;
  }
  forward(&store, realizations)?;
  Ok(store)
}

fn observations() -> Result<MemoryObservations, Box<dyn Error>> {
  let mut rand = ChaCha20Rng::seed_from_u64(RNG_SEED + 1);
  let noise = Normal::new(0.0, OBS_STD)?;
  let truth = nd::aview1(&TRUTH[..]);

  let mut obs = MemoryObservations::new();
  for (index, t) in (0..POINTS).step_by(2).enumerate() {
    let value = poly(truth, t as f64) + noise.sample(&mut rand);
    obs.push(ObservationRecord::new("POLY_OBS", index, OBS_STEP, value,
                                    OBS_STD, "POLY", t));
  }
  Ok(obs)
}

fn posterior_mean(store: &MemoryStore,
                  realizations: &[RealizationId]) -> StoreResult<Array1<f64>> {
  let mut sum = Array1::zeros(3);
  for &r in realizations {
    sum += &store.read_parameter(r, "COEFFS", 0)?;
  }
  Ok(sum / realizations.len() as f64)
}

fn main() -> Result<(), Box<dyn Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env()
                     .unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let schema = EnsembleSchema::new()
    .with_parameter("COEFFS", 3)
    .with_response("POLY", POINTS);
  let realizations: Vec<RealizationId> = (0..MEMBERS).collect();
  let obs = observations()?;
  let step = UpdateStep::new("POLY")
    .with_dataset(LocalDataset::new("ALL").observe("POLY_OBS").update("COEFFS"));
  let mut log = LogStream::new(io::stdout());

  println!("Starting ensemble smoother");
  let source = prior(&realizations[..])?;
  info!(mean = ?posterior_mean(&source, &realizations[..])?, "prior");

  let target = MemoryStore::new();
  let config = AnalysisConfig::default();
  // `--random-seed` draws the seed from the OS; both runs reuse it.
  let mut rng = match env::args().nth(1) {
    Some(ref arg) if arg == "--random-seed" => RandomStream::from_entropy(),
    _ => RandomStream::new(RNG_SEED),
  };
  let seed = rng.seed();
  let ok = smoother_update(UpdateArgs {
    time_steps: &[OBS_STEP],
    update_step: &step,
    ens_size: MEMBERS,
    observations: &obs,
    rng: &mut rng,
    config: &config,
    schema: &schema,
    realizations: &realizations[..],
    source: &source,
    target: &target,
    log: &mut log,
    verbose: true,
  })?;
  println!("ES posterior mean: {} (ok: {}, truth: {:?}, seed: {})",
           posterior_mean(&target, &realizations[..])?, ok, TRUTH, seed);

  println!("Starting multiple data assimilation");
  let store = prior(&realizations[..])?;
  let mut rng = RandomStream::new(seed);
  for (i, &weight) in MDA_WEIGHTS.iter().enumerate() {
    let mut config = AnalysisConfig::default();
    config.global_std_scaling = weight;

    let ok = smoother_update(UpdateArgs {
      time_steps: &[OBS_STEP],
      update_step: &step,
      ens_size: MEMBERS,
      observations: &obs,
      rng: &mut rng,
      config: &config,
      schema: &schema,
      realizations: &realizations[..],
      source: &store,
      target: &store,
      log: &mut log,
      verbose: false,
    })?;
    if !ok {
      println!("iteration {} left some blocks at their forecast", i);
    }
    forward(&store, &realizations[..])?;
  }
  println!("ES-MDA posterior mean: {} (truth: {:?})",
           posterior_mean(&store, &realizations[..])?, TRUTH);

  Ok(())
}
