use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::collaborators::DurableRandom;

/// Deterministic random source for a single execution.
///
/// Two sources built from the same seed produce the same draw sequence, which
/// is what a platform needs to reproduce a segment's choices.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl DurableRandom for SeededRandom {
    fn next_below(&self, bound: u64) -> u64 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen_range(0..bound)
    }
}

/// Derive a per-execution seed from the instance name and execution number.
pub fn execution_seed(instance: &str, execution_id: u64) -> u64 {
    // FNV-1a over the instance name, mixed with the execution number.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in instance.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash ^ execution_id.wrapping_mul(0x9e37_79b9_7f4a_7c15)
}
