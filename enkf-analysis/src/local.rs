//! Resolves an update step into a flat list of blocks.
//!
//! Blocks do not own their index lists; each holds a range into the
//! plan's shared observation and parameter index arrays.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Range;

use tracing::debug;

use enkf_core::{ConfigurationError, EnsembleSchema, LocalConfig,
                LocalDataset};

use crate::obs_data::ObsData;

pub type BlockId = usize;

/// A parameter value: row `offset` of schema parameter group `group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamIndex {
  pub group: usize,
  pub offset: usize,
}

/// Where the simulated value of an observation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResponseIndex {
  pub group: usize,
  pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
  pub id: BlockId,
  pub name: String,
  pub scale: f64,
  /// Earlier and later blocks sharing at least one parameter.
  pub overlaps: Vec<BlockId>,

  obs: Range<usize>,
  params: Range<usize>,
}

impl Block {
  pub fn observation_count(&self) -> usize { self.obs.len() }
  pub fn parameter_count(&self) -> usize { self.params.len() }
}

#[derive(Debug, Clone)]
pub struct Plan {
  blocks: Vec<Block>,
  obs_index: Vec<usize>,
  param_index: Vec<ParamIndex>,
  /// Indexed like `ObsData`; `None` for observations no block uses.
  responses: Vec<Option<ResponseIndex>>,
}

impl Plan {
  pub fn build<C>(config: &C, schema: &EnsembleSchema,
                  obs: &ObsData) -> Result<Plan, ConfigurationError>
    where C: LocalConfig + ?Sized,
  {
    let datasets = config.get_datasets();

    let mut blocks = Vec::with_capacity(datasets.len());
    let mut obs_index = Vec::new();
    let mut param_index = Vec::new();
    let mut names = HashSet::new();

    for (id, dataset) in datasets.iter().enumerate() {
      if !names.insert(dataset.name.clone()) {
        return Err(ConfigurationError::DuplicateDataset(dataset.name.clone()));
      }

      let scale = dataset.scale.unwrap_or(1.0);
      if !(scale >= 0.0 && scale <= 1.0) {
        return Err(ConfigurationError::InvalidScale {
          dataset: dataset.name.clone(),
          scale: scale,
        });
      }

      let o = resolve_observations(dataset, obs)?;
      let p = resolve_parameters(dataset, schema)?;

      let obs_start = obs_index.len();
      obs_index.extend(o);
      let param_start = param_index.len();
      param_index.extend(p);

      blocks.push(Block {
        id: id,
        name: dataset.name.clone(),
        scale: scale,
        overlaps: Vec::new(),

        obs: obs_start..obs_index.len(),
        params: param_start..param_index.len(),
      });
    }

    let responses = resolve_responses(&obs_index[..], schema, obs)?;

    let mut plan = Plan {
      blocks: blocks,
      obs_index: obs_index,
      param_index: param_index,
      responses: responses,
    };
    plan.compute_overlaps();

    debug!(blocks = plan.blocks.len(),
           observations = plan.obs_index.len(),
           parameters = plan.param_index.len(),
           "planned local analysis");

    Ok(plan)
  }

  fn compute_overlaps(&mut self) {
    let mut owners: HashMap<ParamIndex, Vec<BlockId>> = HashMap::new();
    for block in self.blocks.iter() {
      for &p in self.param_index[block.params.clone()].iter() {
        owners.entry(p).or_insert_with(Vec::new).push(block.id);
      }
    }

    let mut overlaps: Vec<BTreeSet<BlockId>> = vec![BTreeSet::new(); self.blocks.len()];
    for ids in owners.values().filter(|ids| ids.len() > 1) {
      for &a in ids.iter() {
        for &b in ids.iter().filter(|&&b| b != a) {
          overlaps[a].insert(b);
        }
      }
    }

    for (block, set) in self.blocks.iter_mut().zip(overlaps.into_iter()) {
      block.overlaps = set.into_iter().collect();
    }
  }

  pub fn len(&self) -> usize { self.blocks.len() }
  pub fn is_empty(&self) -> bool { self.blocks.is_empty() }
  pub fn blocks(&self) -> &[Block] { &self.blocks[..] }

  /// Positions into `ObsData` of the block's observations.
  pub fn observations(&self, block: &Block) -> &[usize] {
    &self.obs_index[block.obs.clone()]
  }
  pub fn parameters(&self, block: &Block) -> &[ParamIndex] {
    &self.param_index[block.params.clone()]
  }
  pub fn response(&self, observation: usize) -> Option<ResponseIndex> {
    self.responses.get(observation).and_then(|r| *r)
  }

  /// Schema parameter groups touched by any block.
  pub fn parameter_groups(&self) -> BTreeSet<usize> {
    self.param_index.iter().map(|p| p.group).collect()
  }
  /// Observation positions used by any block.
  pub fn observation_rows(&self) -> BTreeSet<usize> {
    self.obs_index.iter().cloned().collect()
  }
  pub fn blocks_touching(&self, group: usize) -> Vec<BlockId> {
    self.blocks
      .iter()
      .filter(|b| self.parameters(b).iter().any(|p| p.group == group))
      .map(|b| b.id)
      .collect()
  }
}

fn resolve_observations(dataset: &LocalDataset,
                        obs: &ObsData) -> Result<Vec<usize>, ConfigurationError> {
  let mut out = Vec::new();
  let mut seen = HashSet::new();

  for selection in dataset.observations.iter() {
    if !obs.knows(&selection.group) {
      return Err(ConfigurationError::UnknownObservationGroup {
        dataset: dataset.name.clone(),
        group: selection.group.clone(),
      });
    }

    let active: Vec<usize> = obs.active(&selection.group)
      .iter()
      .cloned()
      .filter(|&i| selection.selects(obs.record(i).index))
      .collect();

    for &step in obs.steps() {
      let expected = obs.expected(&selection.group)
        .iter()
        .any(|&(index, s)| s == step && selection.selects(index));
      let present = active.iter().any(|&i| obs.record(i).step == step);
      if expected && !present {
        return Err(ConfigurationError::NoActiveObservations {
          dataset: dataset.name.clone(),
          step: step,
        });
      }
    }

    out.extend(active.into_iter().filter(|i| seen.insert(*i)));
  }

  if out.is_empty() {
    return Err(ConfigurationError::EmptyObservations {
      dataset: dataset.name.clone(),
    });
  }

  Ok(out)
}

fn resolve_parameters(dataset: &LocalDataset,
                      schema: &EnsembleSchema) -> Result<Vec<ParamIndex>, ConfigurationError> {
  let mut out = Vec::new();
  let mut seen = HashSet::new();

  for selection in dataset.parameters.iter() {
    let (group, layout) = schema.parameter(&selection.group)
      .ok_or_else(|| ConfigurationError::UnknownParameterGroup {
        dataset: dataset.name.clone(),
        group: selection.group.clone(),
      })?;

    let offsets: Vec<usize> = match selection.active {
      None => (0..layout.size).collect(),
      Some(ref active) => active.clone(),
    };

    for offset in offsets {
      if offset >= layout.size {
        return Err(ConfigurationError::ParameterIndexOutOfRange {
          dataset: dataset.name.clone(),
          group: layout.name.clone(),
          index: offset,
          size: layout.size,
        });
      }
      let p = ParamIndex {
        group: group,
        offset: offset,
      };
      if seen.insert(p) {
        out.push(p);
      }
    }
  }

  if out.is_empty() {
    return Err(ConfigurationError::EmptyParameters {
      dataset: dataset.name.clone(),
    });
  }

  Ok(out)
}

fn resolve_responses(obs_index: &[usize], schema: &EnsembleSchema,
                     obs: &ObsData) -> Result<Vec<Option<ResponseIndex>>, ConfigurationError> {
  let mut out = vec![None; obs.len()];

  for &i in obs_index.iter() {
    if out[i].is_some() {
      continue;
    }

    let record = obs.record(i);
    let (group, layout) = schema.response(&record.response)
      .ok_or_else(|| ConfigurationError::UnknownResponse {
        observation: record.label(),
        response: record.response.clone(),
      })?;
    if record.response_index >= layout.size {
      return Err(ConfigurationError::ResponseIndexOutOfRange {
        observation: record.label(),
        response: layout.name.clone(),
        index: record.response_index,
        size: layout.size,
      });
    }

    out[i] = Some(ResponseIndex {
      group: group,
      offset: record.response_index,
    });
  }

  Ok(out)
}

#[cfg(test)]
mod test {
  use super::*;
  use enkf_core::{MemoryObservations, ObservationRecord, UpdateStep};

  fn schema() -> EnsembleSchema {
    EnsembleSchema::new()
      .with_parameter("PORO", 4)
      .with_parameter("MULTFLT", 2)
      .with_response("WOPR", 2)
      .with_response("BPR", 1)
  }

  fn obs() -> ObsData {
    let provider = MemoryObservations::new()
      .with(ObservationRecord::new("WOPR", 0, 1, 10.0, 1.0, "WOPR", 0))
      .with(ObservationRecord::new("WOPR", 1, 1, 12.0, 1.0, "WOPR", 1))
      .with(ObservationRecord::new("WOPR", 2, 2, 13.0, 1.0, "WOPR", 1))
      .with(ObservationRecord::new("BPR", 0, 1, 200.0, 5.0, "BPR", 0))
      .with(ObservationRecord::new("BPR", 1, 2, 210.0, 5.0, "BPR", 0).deactivated())
      .with(ObservationRecord::new("RFT", 0, 1, 1.0, 1.0, "RFT", 0));
    ObsData::aggregate(&provider, &[1, 2]).unwrap()
  }

  #[test]
  fn resolves_blocks_and_overlap() {
    let step = UpdateStep::new("ALL")
      .with_dataset(LocalDataset::new("A").observe("WOPR").update("PORO"))
      .with_dataset(LocalDataset::new("B").observe_partly("WOPR", vec![1])
                    .update_partly("PORO", vec![3]).update("MULTFLT").scaled(0.5))
      .with_dataset(LocalDataset::new("C").observe_partly("WOPR", vec![0])
                    .update_partly("MULTFLT", vec![1, 1]));

    let plan = Plan::build(&step, &schema(), &obs()).unwrap();
    assert_eq!(plan.len(), 3);

    let a = &plan.blocks()[0];
    assert_eq!(plan.observations(a), &[0, 1, 2]);
    assert_eq!(plan.parameters(a).len(), 4);
    assert_eq!(a.scale, 1.0);
    assert_eq!(a.overlaps, vec![1]);

    let b = &plan.blocks()[1];
    assert_eq!(plan.observations(b), &[1]);
    assert_eq!(plan.parameters(b), &[
      ParamIndex { group: 0, offset: 3 },
      ParamIndex { group: 1, offset: 0 },
      ParamIndex { group: 1, offset: 1 },
    ]);
    assert_eq!(b.scale, 0.5);
    assert_eq!(b.overlaps, vec![0, 2]);

    let c = &plan.blocks()[2];
    assert_eq!(c.parameter_count(), 1);
    assert_eq!(c.overlaps, vec![1]);

    assert_eq!(plan.response(1), Some(ResponseIndex { group: 0, offset: 1 }));
    assert_eq!(plan.response(3), None);
    assert_eq!(plan.blocks_touching(1), vec![1, 2]);
    assert_eq!(plan.parameter_groups().into_iter().collect::<Vec<_>>(), vec![0, 1]);
  }

  #[test]
  fn unknown_groups_are_fatal() {
    let step = UpdateStep::new("S")
      .with_dataset(LocalDataset::new("A").observe("FOPR").update("PORO"));
    assert!(matches!(Plan::build(&step, &schema(), &obs()),
                     Err(ConfigurationError::UnknownObservationGroup { .. })));

    let step = UpdateStep::new("S")
      .with_dataset(LocalDataset::new("A").observe("WOPR").update("PERMX"));
    assert!(matches!(Plan::build(&step, &schema(), &obs()),
                     Err(ConfigurationError::UnknownParameterGroup { .. })));

    let step = UpdateStep::new("S")
      .with_dataset(LocalDataset::new("A").observe("RFT").update("PORO"));
    assert!(matches!(Plan::build(&step, &schema(), &obs()),
                     Err(ConfigurationError::UnknownResponse { .. })));
  }

  #[test]
  fn indices_and_scale_are_checked() {
    let step = UpdateStep::new("S")
      .with_dataset(LocalDataset::new("A").observe("WOPR").update_partly("PORO", vec![4]));
    assert_eq!(Plan::build(&step, &schema(), &obs()).unwrap_err(),
               ConfigurationError::ParameterIndexOutOfRange {
                 dataset: "A".into(),
                 group: "PORO".into(),
                 index: 4,
                 size: 4,
               });

    let step = UpdateStep::new("S")
      .with_dataset(LocalDataset::new("A").observe("WOPR").update("PORO").scaled(1.5));
    assert!(matches!(Plan::build(&step, &schema(), &obs()),
                     Err(ConfigurationError::InvalidScale { .. })));

    let step = UpdateStep::new("S")
      .with_dataset(LocalDataset::new("A").observe("WOPR").update("PORO"))
      .with_dataset(LocalDataset::new("A").observe("BPR").update("MULTFLT"));
    assert_eq!(Plan::build(&step, &schema(), &obs()).unwrap_err(),
               ConfigurationError::DuplicateDataset("A".into()));
  }

  #[test]
  fn step_without_active_observations_is_fatal() {
    // BPR has a record at step 2 but it is deactivated.
    let step = UpdateStep::new("S")
      .with_dataset(LocalDataset::new("A").observe("BPR").update("PORO"));
    assert_eq!(Plan::build(&step, &schema(), &obs()).unwrap_err(),
               ConfigurationError::NoActiveObservations {
                 dataset: "A".into(),
                 step: 2,
               });

    let step = UpdateStep::new("S")
      .with_dataset(LocalDataset::new("A").observe_partly("WOPR", vec![7]).update("PORO"));
    assert!(matches!(Plan::build(&step, &schema(), &obs()),
                     Err(ConfigurationError::EmptyObservations { .. })));
  }
}
