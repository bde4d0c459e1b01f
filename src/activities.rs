//! Activity inputs and an in-process executor for them.

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::collaborators::{ActivityExecutor, DurableRandom};
use crate::distribution::SleepDistribution;
use crate::error::ActivityError;

pub const PAYLOAD_ACTIVITY: &str = "Payload";
pub const SLEEP_ACTIVITY: &str = "Sleep";

/// Input of the payload activity. The input bytes are filler; only the
/// requested output size matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadActivityInput {
    pub ignored_input_data: Vec<u8>,
    pub desired_output_size: usize,
}

/// Input of the sleep activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepActivityInput {
    pub sleep_duration: Duration,
}

/// Build a payload input of `in_size` filler bytes.
///
/// The filler is derived from `seed` so a replayed segment builds the exact
/// same input.
pub fn make_payload_input(in_size: usize, out_size: usize, seed: u64) -> PayloadActivityInput {
    let mut data = vec![0u8; in_size];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    PayloadActivityInput {
        ignored_input_data: data,
        desired_output_size: out_size,
    }
}

/// Sample a sleep input from `distribution`, or `None` if it is empty.
pub fn make_sleep_input<R: DurableRandom + ?Sized>(
    distribution: &SleepDistribution,
    random: &R,
) -> Option<SleepActivityInput> {
    distribution
        .sample_duration(random)
        .map(|sleep_duration| SleepActivityInput { sleep_duration })
}

/// Executes activities inside the current process.
///
/// `time_scale` divides every sleep, so a load run configured in seconds can
/// be replayed in milliseconds.
#[derive(Debug, Clone)]
pub struct LocalActivities {
    time_scale: u32,
}

impl Default for LocalActivities {
    fn default() -> Self {
        Self { time_scale: 1 }
    }
}

impl LocalActivities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time_scale(time_scale: u32) -> Self {
        Self {
            time_scale: time_scale.max(1),
        }
    }

    pub fn scaled(&self, duration: Duration) -> Duration {
        duration / self.time_scale
    }
}

#[async_trait]
impl ActivityExecutor for LocalActivities {
    async fn payload(&self, input: PayloadActivityInput) -> Result<Vec<u8>, ActivityError> {
        let mut output = vec![0u8; input.desired_output_size];
        rand::thread_rng().fill_bytes(&mut output);
        Ok(output)
    }

    async fn sleep(&self, input: SleepActivityInput) -> Result<(), ActivityError> {
        tokio::time::sleep(self.scaled(input.sleep_duration)).await;
        Ok(())
    }
}
