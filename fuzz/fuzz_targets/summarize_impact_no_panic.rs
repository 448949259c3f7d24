// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]

use bcpd_core::ObservationSeries;
use bcpd_core::numeric::hdi;
use bcpd_posterior::{ImpactConfig, Resolution, estimate_change_point, impact_at};
use chrono::NaiveDate;
use libfuzzer_sys::fuzz_target;

const MAX_SERIES_LEN: usize = 512;

fn take_u8(data: &mut &[u8]) -> u8 {
    match data.split_first() {
        Some((&head, rest)) => {
            *data = rest;
            head
        }
        None => 0,
    }
}

fn take_i16(data: &mut &[u8]) -> i16 {
    i16::from_le_bytes([take_u8(data), take_u8(data)])
}

fuzz_target!(|bytes: &[u8]| {
    let mut data = bytes;
    let n = 1 + usize::from(take_u8(&mut data)) * 2 % MAX_SERIES_LEN;
    let window_before = usize::from(take_u8(&mut data) % 64);
    let window_after = usize::from(take_u8(&mut data) % 64);
    let prob = f64::from(take_u8(&mut data)) / 255.0;

    // Values in [-32.768, 32.767] include exact zeros, which exercise the
    // undefined-ratio paths.
    let values: Vec<f64> = (0..n).map(|_| f64::from(take_i16(&mut data)) / 1000.0).collect();
    let draws: Vec<f64> = data
        .chunks(2)
        .map(|pair| f64::from(i16::from_le_bytes([pair[0], *pair.get(1).unwrap_or(&0)])) / 64.0)
        .collect();

    let Some(start) = NaiveDate::from_ymd_opt(1987, 5, 20) else {
        return;
    };
    let Ok(series) = ObservationSeries::from_daily(start, values) else {
        return;
    };

    if let Ok((low, high)) = hdi(&draws, prob) {
        assert!(low <= high, "hdi bounds out of order: {low} > {high}");
    }

    if let Ok(estimate) = estimate_change_point("tau", &draws, &series) {
        assert!(estimate.mode_index < n);
        assert!(estimate.mean_index < n);
        assert!(estimate.hdi_index.0 <= estimate.hdi_index.1);
        assert!(estimate.hdi_index.1 < n);

        let config = ImpactConfig {
            window_before,
            window_after,
        };
        if let Ok(report) =
            impact_at(&series, "tau", estimate.mode_index, Resolution::Mode, &config, true)
        {
            if let Some(value) = report.mean_change {
                assert!(value.is_finite());
            } else {
                assert!(report.before.is_empty() || report.after.is_empty());
            }
            if let Some(value) = report.percent_change.value() {
                assert!(value.is_finite());
            }
            if let Some(value) = report.effect_size.and_then(|ratio| ratio.value()) {
                assert!(value.is_finite());
            }
        }
    }
});
