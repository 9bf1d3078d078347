//! Reproducible random source shared by every block of an update.
//!
//! Nothing is ever drawn from the `RandomStream` itself. Each
//! `(block, step, member)` triple gets its own ChaCha stream, derived from
//! the seed and the current epoch, so the draws do not depend on which
//! worker runs first.

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::info;

use enkf_core::TimeStep;

use crate::local::BlockId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomStream {
  seed: u64,
  epoch: u64,
}

impl RandomStream {
  pub fn new(seed: u64) -> RandomStream {
    RandomStream {
      seed: seed,
      epoch: 0,
    }
  }

  pub fn from_entropy() -> RandomStream {
    let seed = rand::random::<u64>();
    info!(seed, "to repeat this update, seed the random stream with {}", seed);
    RandomStream::new(seed)
  }

  pub fn seed(&self) -> u64 { self.seed }
  pub fn epoch(&self) -> u64 { self.epoch }

  /// Moves to fresh substreams; called once per update so a stream reused
  /// over a multi-step smoother run never repeats its noise.
  pub fn advance(&mut self) {
    self.epoch = self.epoch.wrapping_add(1);
  }

  pub fn substream(&self, block: BlockId, step: TimeStep,
                   member: usize) -> ChaCha20Rng {
    let mut rng = ChaCha20Rng::seed_from_u64(mix(self.seed ^ mix(self.epoch)));
    let key = mix(mix(mix(block as u64) ^ step as u64) ^ member as u64);
    rng.set_stream(key);
    rng
  }
}

/// splitmix64
fn mix(v: u64) -> u64 {
  let mut z = v.wrapping_add(0x9E37_79B9_7F4A_7C15);
  z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
  z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
  z ^ (z >> 31)
}
