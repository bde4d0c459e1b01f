//! Property-based tests for the sleep sampler and the continue-as-new chain.

mod common;

use std::collections::BTreeMap;

use common::{Script, ScriptedChain};
use proptest::prelude::*;
use throughput_stress::activities::make_payload_input;
use throughput_stress::*;

fn arb_distribution(min_buckets: usize, max_buckets: usize) -> impl Strategy<Value = SleepDistribution> {
    prop::collection::btree_map(1u64..500, 1u64..50, min_buckets..=max_buckets)
        .prop_map(|buckets: BTreeMap<u64, u64>| SleepDistribution::try_from(buckets).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// A single bucket always yields its own key.
    #[test]
    fn prop_single_bucket_is_constant(bucket in 1u64..10_000, weight in 1u64..100, seed in any::<u64>()) {
        let d: SleepDistribution = format!("{bucket}:{weight}").parse().unwrap();
        let random = SeededRandom::new(seed);
        for _ in 0..50 {
            prop_assert_eq!(d.sample(&random), Some(bucket));
        }
    }

    /// Samples never leave the hull of the configured buckets.
    #[test]
    fn prop_samples_stay_within_bounds(d in arb_distribution(1, 6), seed in any::<u64>()) {
        let (low, high) = d.bounds().unwrap();
        let random = SeededRandom::new(seed);
        for _ in 0..200 {
            let v = d.sample(&random).unwrap();
            prop_assert!(v >= low && v <= high, "{} outside [{}, {}] for {}", v, low, high, d);
        }
    }

    /// With two buckets the weights cannot change the interval: every sample
    /// falls in `[k1, k2]`.
    #[test]
    fn prop_two_buckets_cover_the_closed_interval(d in arb_distribution(2, 2), seed in any::<u64>()) {
        let (k1, k2) = d.bounds().unwrap();
        let random = SeededRandom::new(seed);
        let samples: Vec<u64> = (0..300).map(|_| d.sample(&random).unwrap()).collect();
        prop_assert!(samples.iter().all(|v| (k1..=k2).contains(v)));
    }

    /// With three or more buckets a heavy upper bucket pulls samples into
    /// the interval below it.
    #[test]
    fn prop_weights_bias_the_interval(seed in any::<u64>()) {
        // cdf = [1, 2, 100]: targets 0..=2 pick [1, 10], the other 97 pick [10, 100].
        let d: SleepDistribution = "1:1,10:1,100:98".parse().unwrap();
        let random = SeededRandom::new(seed);
        let n = 1_000;
        let upper = (0..n).filter(|_| d.sample(&random).unwrap() >= 10).count();
        prop_assert!(upper as f64 / n as f64 > 0.9, "only {} of {} samples in [10, 100]", upper, n);
    }

    /// Across any chain of segments every iteration runs exactly once, in
    /// order, and the counters carried through continue-as-new add up.
    #[test]
    fn prop_chain_runs_each_iteration_once(
        iterations in 1u64..40,
        initial_fraction in 0u64..100,
        threshold in 0u64..120,
        events_per_iteration in 1u64..30,
        spawn_child_every in 0u64..4,
    ) {
        let initial_iteration = iterations * initial_fraction / 100;
        let params = WorkflowParams {
            skip_sleep: true,
            initial_iteration,
            continue_as_new_after_event_count: threshold,
            spawn_child_every,
            ..WorkflowParams::new(iterations)
        };
        let chain = ScriptedChain::new(Script::with_events_per_iteration(events_per_iteration));

        let output = tokio::runtime::Runtime::new().unwrap().block_on(async {
            run_to_completion(chain.first_segment(), &chain, params.clone()).await
        }).unwrap();

        let expected: Vec<Vec<u8>> = (initial_iteration..iterations)
            .map(|i| make_payload_input(params.payload_input_bytes, params.payload_output_bytes, i).ignored_input_data)
            .collect();
        prop_assert_eq!(chain.log.payload_inputs(), expected);

        let continuations = chain.log.continuations();
        prop_assert_eq!(output.times_continued, continuations.len() as u64);
        prop_assert_eq!(output.children_spawned, chain.log.spawned());
        if threshold == 0 {
            prop_assert!(continuations.is_empty());
        }
        for next in &continuations {
            prop_assert!(next.initial_iteration > initial_iteration);
            prop_assert!(next.initial_iteration < iterations);
        }
    }
}
