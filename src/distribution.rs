//! Weighted sleep-duration distribution and its interpolating sampler.
//!
//! A distribution is a small table of anchor durations (seconds) with relative
//! weights. Sampling picks an interval between two adjacent anchors, biased by
//! the weights, and then draws an integer uniformly inside that interval. A few
//! configured buckets therefore produce continuous-looking durations.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collaborators::DurableRandom;
use crate::error::ConfigError;

/// Bucket (duration in seconds) → weight. Both strictly positive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<u64, u64>", into = "BTreeMap<u64, u64>")]
pub struct SleepDistribution {
    buckets: BTreeMap<u64, u64>,
}

impl SleepDistribution {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Buckets in ascending order.
    pub fn buckets(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.buckets.iter().map(|(k, w)| (*k, *w))
    }

    /// Smallest and largest configured bucket.
    pub fn bounds(&self) -> Option<(u64, u64)> {
        let low = *self.buckets.keys().next()?;
        let high = *self.buckets.keys().next_back()?;
        Some((low, high))
    }

    /// Sample a bucket value, or `None` when no buckets are configured.
    ///
    /// With a single bucket its key is returned as-is. With two or more, the
    /// lower-bound search over the cumulative weights is clamped to index 1, so
    /// the smallest bucket only ever acts as the floor of the first interval.
    pub fn sample<R: DurableRandom + ?Sized>(&self, random: &R) -> Option<u64> {
        if self.buckets.len() < 2 {
            return self.buckets.keys().next().copied();
        }

        let keys: Vec<u64> = self.buckets.keys().copied().collect();
        // The total was checked for overflow at construction.
        let mut total = 0u64;
        let cdf: Vec<u64> = self
            .buckets
            .values()
            .map(|w| {
                total = total.saturating_add(*w);
                total
            })
            .collect();

        let target = random.next_below(total);
        let mut idx = cdf.partition_point(|c| *c < target);
        if idx == 0 {
            idx = 1;
        }

        let (low, high) = (keys[idx - 1], keys[idx]);
        Some(low + random.next_below(high - low + 1))
    }

    /// [`sample`](Self::sample) expressed as a sleep duration.
    pub fn sample_duration<R: DurableRandom + ?Sized>(&self, random: &R) -> Option<Duration> {
        self.sample(random).map(Duration::from_secs)
    }
}

impl TryFrom<BTreeMap<u64, u64>> for SleepDistribution {
    type Error = ConfigError;

    fn try_from(buckets: BTreeMap<u64, u64>) -> Result<Self, Self::Error> {
        for (bucket, weight) in &buckets {
            if *bucket == 0 {
                return Err(ConfigError::InvalidBucket {
                    entry: format!("{bucket}:{weight}"),
                });
            }
            if *weight == 0 {
                return Err(ConfigError::InvalidWeight {
                    entry: format!("{bucket}:{weight}"),
                });
            }
        }
        Self::checked(buckets)
    }
}

impl SleepDistribution {
    /// Reject tables whose cumulative weight does not fit in a `u64`.
    fn checked(buckets: BTreeMap<u64, u64>) -> Result<Self, ConfigError> {
        buckets
            .values()
            .try_fold(0u64, |total, w| total.checked_add(*w))
            .ok_or(ConfigError::WeightOverflow)?;
        Ok(Self { buckets })
    }
}

impl From<SleepDistribution> for BTreeMap<u64, u64> {
    fn from(d: SleepDistribution) -> Self {
        d.buckets
    }
}

impl FromStr for SleepDistribution {
    type Err = ConfigError;

    /// Parse `"<bucket>:<weight>,<bucket>:<weight>,..."`.
    ///
    /// A blank string is the empty distribution, which turns sleeps off. This
    /// is looser than stricter loaders of the same format, which reject `""`
    /// as a malformed pair. A repeated bucket keeps the last weight. The
    /// weights must sum to at most `u64::MAX`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut buckets = BTreeMap::new();
        if input.trim().is_empty() {
            return Ok(Self { buckets });
        }

        for pair in input.split(',') {
            let parts: Vec<&str> = pair.trim().split(':').collect();
            let [bucket, weight] = parts.as_slice() else {
                return Err(ConfigError::MalformedEntry {
                    entry: pair.to_string(),
                });
            };
            let bucket: u64 = match bucket.trim().parse() {
                Ok(b) if b > 0 => b,
                _ => {
                    return Err(ConfigError::InvalidBucket {
                        entry: pair.to_string(),
                    })
                }
            };
            let weight: u64 = match weight.trim().parse() {
                Ok(w) if w > 0 => w,
                _ => {
                    return Err(ConfigError::InvalidWeight {
                        entry: pair.to_string(),
                    })
                }
            };
            buckets.insert(bucket, weight);
        }

        Self::checked(buckets)
    }
}

impl fmt::Display for SleepDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (bucket, weight) in &self.buckets {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{bucket}:{weight}")?;
            first = false;
        }
        Ok(())
    }
}
