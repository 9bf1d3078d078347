//! Observation noise for perturbed-observation updates.

use nd::{Array2, ArrayView1, Axis};
use nd::parallel::prelude::*;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, StandardNormal};

use std::collections::BTreeMap;

use enkf_core::TimeStep;

use crate::local::BlockId;
use crate::rng::RandomStream;

#[derive(Debug, Clone, Copy)]
pub struct Sampler<'a> {
  stream: &'a RandomStream,
  enabled: bool,
}

impl<'a> Sampler<'a> {
  pub fn new(stream: &'a RandomStream, enabled: bool) -> Sampler<'a> {
    Sampler {
      stream: stream,
      enabled: enabled,
    }
  }

  /// An (observations x members) matrix of N(0, std²) draws. Observation
  /// `j` of member `i` comes from substream `(block, steps[j], i)`, in
  /// block order among the observations sharing that step.
  pub fn noise(&self, block: BlockId, steps: &[TimeStep],
               std: ArrayView1<f64>, members: usize) -> Array2<f64> {
    assert_eq!(steps.len(), std.len());

    let mut noise = Array2::zeros((std.len(), members));
    if !self.enabled {
      return noise;
    }

    let stream = self.stream;
    noise.axis_iter_mut(Axis(1))
      .into_par_iter()
      .enumerate()
      .for_each(|(member, mut column)| {
        let mut streams: BTreeMap<TimeStep, ChaCha20Rng> = BTreeMap::new();
        for (j, out) in column.iter_mut().enumerate() {
          let rng = streams
            .entry(steps[j])
            .or_insert_with(|| stream.substream(block, steps[j], member));
          let z: f64 = StandardNormal.sample(rng);
          *out = z * std[j];
        }
      });

    noise
  }
}
