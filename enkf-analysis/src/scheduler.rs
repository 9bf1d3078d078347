//! Runs the blocks of a plan on the current rayon pool.
//!
//! Blocks are grouped into levels. Within a level no two blocks share a
//! parameter, so they run concurrently; a block that overlaps an earlier
//! one lands in a later level and reads its committed values.

use nd::{Array1, Axis};
use rayon::prelude::*;

use std::sync::Mutex;

use tracing::{debug, warn};

use enkf_core::{AnalysisConfig, BlockFailure, NumericalError};

use crate::ensemble::Forecast;
use crate::kernel::{self, Input};
use crate::local::{Block, BlockId, Plan};
use crate::obs_data::ObsData;
use crate::outlier::deactivate_outliers;
use crate::perturb::Sampler;
use crate::report::{BlockReport, BlockStatus, DiagnosticSink,
                    SnapshotEntry, UpdateSnapshot};
use crate::utils::{center, row_spread};

pub struct Context<'a> {
  pub plan: &'a Plan,
  pub obs: &'a ObsData,
  pub sampler: Sampler<'a>,
  pub config: &'a AnalysisConfig,
}

pub struct BlockOutcome {
  pub report: BlockReport,
  pub parameters: Option<nd::Array2<f64>>,
}

/// `level(b) = 1 + max(level(a))` over earlier blocks `a` overlapping `b`.
pub fn levels(plan: &Plan) -> Vec<Vec<BlockId>> {
  let mut level_of: Vec<usize> = Vec::with_capacity(plan.len());
  let mut out: Vec<Vec<BlockId>> = Vec::new();

  for block in plan.blocks() {
    let level = block.overlaps
      .iter()
      .filter(|&&other| other < block.id)
      .map(|&other| level_of[other] + 1)
      .max()
      .unwrap_or(0);
    level_of.push(level);

    if out.len() <= level {
      out.resize(level + 1, Vec::new());
    }
    out[level].push(block.id);
  }

  out
}

fn failed(block: &Block, ctx: &Context, error: BlockFailure,
          observations: usize, snapshot: UpdateSnapshot) -> BlockOutcome {
  warn!(block = %block.name, error = %error, "block keeps its forecast");
  BlockOutcome {
    report: BlockReport {
      block: block.id,
      name: block.name.clone(),
      observations: observations,
      deactivated: snapshot.deactivated(),
      parameters: ctx.plan.parameters(block).len(),
      inversion: None,
      status: BlockStatus::Failed(error),
      snapshot: snapshot,
    },
    parameters: None,
  }
}

pub fn run_block(ctx: &Context, forecast: &Forecast,
                 block: &Block) -> BlockOutcome {
  let rows = ctx.plan.observations(block);

  let responses = match forecast.response_block(rows) {
    Ok(r) => r,
    Err(e) => return failed(block, ctx, e.into(), 0, Default::default()),
  };
  let parameters = match forecast.parameter_block(ctx.plan, block) {
    Ok(p) => p,
    Err(e) => return failed(block, ctx, e.into(), 0, Default::default()),
  };

  let observed: Array1<f64> = rows.iter().map(|&i| ctx.obs.values()[i]).collect();
  let std: Array1<f64> = rows.iter().map(|&i| ctx.obs.std()[i]).collect();
  let steps: Vec<_> = rows.iter().map(|&i| ctx.obs.record(i).step).collect();

  // Noise for every row, before filtering, so a dropped observation never
  // shifts the draws of the others.
  let inflated = &std * ctx.config.global_std_scaling.sqrt();
  let noise = ctx.sampler.noise(block.id, &steps[..], inflated.view(),
                                forecast.members());

  let status = deactivate_outliers(responses.view(), observed.view(),
                                   std.view(), ctx.config);
  let (mean, _) = center(responses.view());
  let spread = row_spread(responses.view());
  let snapshot = UpdateSnapshot {
    entries: rows.iter()
      .enumerate()
      .map(|(j, &i)| {
        let record = ctx.obs.record(i);
        SnapshotEntry {
          key: record.key.clone(),
          index: record.index,
          step: record.step,
          value: observed[j],
          std: inflated[j],
          status: status[j],
          response_mean: mean[j],
          response_std: spread[j],
        }
      })
      .collect(),
  };

  let keep: Vec<usize> = (0..rows.len()).filter(|&j| status[j].is_active()).collect();
  if keep.len() < rows.len() {
    warn!(block = %block.name, deactivated = rows.len() - keep.len(),
          "deactivated observations");
  }
  if keep.is_empty() {
    return failed(block, ctx, NumericalError::NoObservations.into(), 0, snapshot);
  }

  let responses = responses.select(Axis(0), &keep[..]);
  let observed = observed.select(Axis(0), &keep[..]);
  let inflated = inflated.select(Axis(0), &keep[..]);
  let noise = noise.select(Axis(0), &keep[..]);

  let input = Input {
    responses: responses.view(),
    parameters: parameters.view(),
    observed: observed.view(),
    std: inflated.view(),
    noise: noise.view(),
    scale: block.scale,
  };
  match kernel::update(input, ctx.config.truncation, ctx.config.max_condition) {
    Ok(out) => {
      debug!(block = %block.name, components = out.inversion.components,
             truncated = out.inversion.truncated,
             condition = out.inversion.condition, "updated block");
      BlockOutcome {
        report: BlockReport {
          block: block.id,
          name: block.name.clone(),
          observations: keep.len(),
          deactivated: rows.len() - keep.len(),
          parameters: parameters.dim().0,
          inversion: Some(out.inversion),
          status: BlockStatus::Updated,
          snapshot: snapshot,
        },
        parameters: Some(out.parameters),
      }
    },
    Err(e) => failed(block, ctx, e.into(), keep.len(), snapshot),
  }
}

/// Runs every block, committing each level before the next starts.
/// Reports come back in block order.
pub fn execute(ctx: &Context, forecast: &mut Forecast,
               sink: &Mutex<&mut dyn DiagnosticSink>,
               verbose: bool) -> Vec<BlockReport> {
  let mut reports: Vec<Option<BlockReport>> = (0..ctx.plan.len()).map(|_| None).collect();

  for (depth, level) in levels(ctx.plan).into_iter().enumerate() {
    debug!(depth, blocks = level.len(), "running level");

    let outcomes: Vec<BlockOutcome> = {
      let current: &Forecast = forecast;
      level.par_iter()
        .map(|&id| {
          let outcome = run_block(ctx, current, &ctx.plan.blocks()[id]);
          let mut sink = sink.lock().unwrap_or_else(|e| e.into_inner());
          sink.block_completed(&outcome.report, verbose);
          outcome
        })
        .collect()
    };

    for outcome in outcomes.into_iter() {
      let block = &ctx.plan.blocks()[outcome.report.block];
      if let Some(ref updated) = outcome.parameters {
        forecast.commit(ctx.plan, block, updated.view());
      }
      reports[block.id] = Some(outcome.report);
    }
  }

  reports.into_iter().flatten().collect()
}
