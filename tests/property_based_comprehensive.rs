//! Property-based tests for timers, correlation and option parsing
//!
//! Time is driven by `ManualClock` so duration properties are exact rather
//! than bounded by scheduler noise.
//!
//! Properties covered:
//! 1. Duration unit conversions agree
//! 2. Correlated count and time equal the queries run inside the window
//! 3. Queries outside the window are never attributed
//! 4. Logging channel selection
//! 5. Option parsing never panics and never touches the filesystem

use blocktimer::clock::ManualClock;
use blocktimer::{InMemoryLedger, ProfileOptions, ProfilerConfig, ProfilerContext, ProfilerError};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn is_known(key: &str) -> bool {
    ProfileOptions::KEYS.iter().any(|known| *known == key)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_duration_units_agree(micros in 0u64..100_000_000) {
        let clock = Arc::new(ManualClock::new());
        let context = ProfilerContext::default().with_clock(clock.clone());

        let mut timer = context.timer("prop").unwrap();
        timer.start();
        clock.advance(Duration::from_micros(micros));
        let measurement = timer.stop().unwrap();

        let seconds = micros as f64 / 1_000_000.0;
        prop_assert!((measurement.duration_seconds - seconds).abs() < 1e-9);
        prop_assert!((measurement.duration_ms - seconds * 1_000.0).abs() < 1e-6);
        prop_assert!((measurement.duration_us - micros as f64).abs() < 1e-6);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_duration_frozen_after_stop(
        running in 0u64..10_000,
        after in 1u64..10_000,
    ) {
        let clock = Arc::new(ManualClock::new());
        let context = ProfilerContext::default().with_clock(clock.clone());

        let mut timer = context.timer("prop").unwrap();
        timer.start();
        clock.advance(Duration::from_millis(running));
        timer.stop().unwrap();
        let frozen = timer.duration_ms().unwrap();

        clock.advance(Duration::from_millis(after));
        prop_assert_eq!(timer.duration_ms().unwrap(), frozen);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_correlation_counts_window_queries(
        before in prop::collection::vec(0.0f64..5.0, 0..10),
        inside in prop::collection::vec(0.0f64..5.0, 0..20),
        after in prop::collection::vec(0.0f64..5.0, 0..10),
    ) {
        let ledger = Arc::new(InMemoryLedger::new());
        let context = ProfilerContext::default().with_ledger(ledger.clone());

        for (i, time) in before.iter().enumerate() {
            ledger.record("default", format!("SELECT before_{}", i), *time);
        }
        let mut timer = context.timer("prop").unwrap();
        timer.start();
        for (i, time) in inside.iter().enumerate() {
            ledger.record("default", format!("SELECT inside_{}", i), *time);
        }
        let measurement = timer.stop().unwrap();
        for (i, time) in after.iter().enumerate() {
            ledger.record("default", format!("SELECT after_{}", i), *time);
        }

        let expected: f64 = inside.iter().sum();
        prop_assert_eq!(measurement.query_count, inside.len());
        prop_assert!((measurement.query_time_seconds - expected).abs() < 1e-9);
        prop_assert!(measurement
            .per_query_detail
            .iter()
            .all(|query| query.sql.starts_with("SELECT inside_")));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_channel_selection(name in "[A-Za-z_][A-Za-z0-9_.]{0,20}", label in "[a-z]{1,8} [a-z]{1,8}") {
        let config = ProfilerConfig::default();

        prop_assert_eq!(config.channel_for(&name), format!("blocktimer.{}", name));
        prop_assert_eq!(config.channel_for(&label), "blocktimer");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_option_pairs_never_panic(
        pairs in prop::collection::vec(
            (
                prop_oneof![
                    Just("profile_sql".to_string()),
                    Just("collect_stats".to_string()),
                    Just("connection_names".to_string()),
                    Just("stats_sink".to_string()),
                    "[a-z_]{1,12}",
                ],
                "[a-z0-9, ]{0,12}",
            ),
            0..6,
        )
    ) {
        match ProfileOptions::from_pairs(pairs.clone()) {
            Ok(_) => prop_assert!(pairs
                .iter()
                .all(|(key, _)| is_known(key))),
            Err(ProfilerError::UnsupportedOptions { keys }) => {
                prop_assert!(!keys.is_empty());
                prop_assert!(keys
                    .iter()
                    .all(|key| !is_known(key)));
            }
            Err(e) => prop_assert!(e.is_usage_error()),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_option_spec_never_panics(
        spec in "[a-z_=,; 0-9]{0,40}",
        sink in "[a-z0-9]{0,8}",
    ) {
        let dir = tempfile::tempdir().unwrap();
        let before = std::fs::read_dir(dir.path()).unwrap().count();

        let _ = ProfileOptions::from_spec(&spec);
        let _ = ProfileOptions::from_spec(&format!("{},stats_sink={}", spec, sink));
        let with_path = format!("stats_sink={}", dir.path().join(&sink).display());
        let _ = ProfileOptions::from_spec(&with_path);

        // Parsing never creates sink files
        prop_assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), before);
    }
}
