// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bcpd_core::ObservationSeries;
use bcpd_posterior::{ImpactConfig, Resolution, estimate_change_point, hdi, impact_at};
use chrono::NaiveDate;
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

const MIN_PROPTEST_CASES: u32 = 1000;

fn proptest_cases() -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(|parsed| parsed.max(MIN_PROPTEST_CASES))
        .unwrap_or(MIN_PROPTEST_CASES)
}

fn daily(values: Vec<f64>) -> ObservationSeries {
    let start = NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid date");
    ObservationSeries::from_daily(start, values).expect("series")
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: proptest_cases(),
        max_shrink_iters: 1024,
        failure_persistence: Some(Box::new(FileFailurePersistence::Direct(
            "proptest-regressions/tests/proptest_invariants.txt",
        ))),
        .. ProptestConfig::default()
    })]

    #[test]
    fn hdi_is_ordered_and_narrows_with_probability(
        samples in prop::collection::vec(-1.0e3f64..1.0e3, 1..400),
        low_prob in 0.05f64..0.95,
        extra in 0.0f64..0.05,
    ) {
        let high_prob = (low_prob + extra).min(1.0);
        let (lo_a, hi_a) = hdi(&samples, low_prob).expect("hdi");
        let (lo_b, hi_b) = hdi(&samples, high_prob).expect("hdi");
        prop_assert!(lo_a <= hi_a);
        prop_assert!(lo_b <= hi_b);
        prop_assert!(hi_a - lo_a <= hi_b - lo_b);

        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(lo_b >= min && hi_b <= max);
    }

    #[test]
    fn estimates_stay_inside_the_series(
        draws in prop::collection::vec(-50.0f64..250.0, 1..200),
        n in 1usize..200,
    ) {
        let series = daily(vec![0.0; n]);
        let estimate = estimate_change_point("tau", &draws, &series).expect("estimate");
        for index in [
            estimate.mean_index,
            estimate.median_index,
            estimate.mode_index,
            estimate.hdi_index.0,
            estimate.hdi_index.1,
        ] {
            prop_assert!(index < n);
        }
        prop_assert!(estimate.hdi_index.0 <= estimate.hdi_index.1);
        prop_assert!(estimate.hdi_dates.0 <= estimate.hdi_dates.1);
    }

    #[test]
    fn impact_ratios_are_never_silently_non_finite(
        values in prop::collection::vec(prop_oneof![Just(0.0f64), -1.0f64..1.0], 2..120),
        split in 0usize..119,
        before in 1usize..60,
        after in 1usize..60,
    ) {
        prop_assume!(split < values.len());
        let series = daily(values);
        let config = ImpactConfig {
            window_before: before,
            window_after: after,
        };
        let report = impact_at(&series, "tau", split, Resolution::Mode, &config, true)
            .expect("impact");
        if let Some(value) = report.percent_change.value() {
            prop_assert!(value.is_finite());
        }
        let effect = report.effect_size.expect("requested");
        if let Some(value) = effect.value() {
            prop_assert!(value.is_finite());
        }
        match report.mean_change {
            Some(value) => prop_assert!(value.is_finite()),
            None => prop_assert_eq!(split, 0),
        }
    }
}
