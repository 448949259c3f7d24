// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bcpd_core::{BcpdError, ObservationSeries};
use bcpd_diagnostics::diagnose_with_summary;
use bcpd_model::{ConvergenceThresholds, ModelKind};
use bcpd_posterior::{ImpactConfig, analyze_impact, summarize_change_points};
use bcpd_sampler::{ChainStats, ChainTrace, PosteriorTrace, SamplerKernel};
use bcpd_store::{
    Artifact, ArtifactStore, PayloadCodec, PersistedPaths, RunArtifacts, RunLayout,
};
use chrono::NaiveDate;
use std::path::Path;

fn series() -> ObservationSeries {
    let start = NaiveDate::from_ymd_opt(2008, 1, 1).expect("valid date");
    let values = (0..80)
        .map(|t| if t < 40 { 0.01 } else { -0.02 } + 0.005 * ((t % 4) as f64 - 1.5))
        .collect();
    ObservationSeries::from_daily(start, values).expect("series")
}

fn trace() -> PosteriorTrace {
    trace_around(7, 40.0)
}

fn trace_around(seed: u64, tau: f64) -> PosteriorTrace {
    let chain = |offset: usize| ChainTrace {
        chain: offset,
        draws: (0..60)
            .map(|i| {
                let jitter = ((i * 7 + offset * 3) % 5) as f64 - 2.0;
                vec![tau + jitter * 0.5, 0.01 + jitter * 0.001]
            })
            .collect(),
        stats: ChainStats {
            divergences: 0,
            mean_accept: 0.9,
            step_size: 0.25,
            mean_tree_depth: 3.5,
            max_tree_depth_hits: 0,
        },
    };
    PosteriorTrace {
        model: ModelKind::Single,
        kernel: SamplerKernel::Nuts,
        seed,
        draws: 60,
        tune: 60,
        n_obs: 80,
        parameters: vec!["tau".to_string(), "sigma".to_string()],
        chains: vec![chain(0), chain(1)],
    }
}

/// Temp files, staging directories and set-aside previous runs.
fn temp_files(dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(next) = pending.pop() {
        for entry in std::fs::read_dir(&next).expect("read dir") {
            let path = entry.expect("entry").path();
            let name = path.to_string_lossy().into_owned();
            if name.contains(".tmp-") || name.contains(".prev-") {
                found.push(name);
            } else if path.is_dir() {
                pending.push(path);
            }
        }
    }
    found
}

fn persist(store: &ArtifactStore) {
    try_persist(store, &trace()).expect("persist");
}

fn try_persist(store: &ArtifactStore, trace: &PosteriorTrace) -> Result<PersistedPaths, BcpdError> {
    let series = series();
    let (summary, convergence) =
        diagnose_with_summary(trace, &ConvergenceThresholds::default()).expect("diagnose");
    let change_points = summarize_change_points(trace, &series).expect("summarize");
    let impacts =
        analyze_impact(&change_points, &series, &ImpactConfig::default()).expect("impact");
    store.persist(&RunArtifacts {
        trace,
        summary: &summary,
        convergence: &convergence,
        change_points: &change_points,
        impacts: &impacts,
    })
}

#[test]
fn persisted_run_reloads_every_artifact() {
    for codec in [PayloadCodec::Json, PayloadCodec::Bincode] {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = RunLayout::new(dir.path(), "single").expect("layout");
        let store = ArtifactStore::new(layout).with_codec(codec);
        persist(&store);

        assert_eq!(store.load_trace().available().expect("trace"), trace());

        let summary = store.load_model_summary().available().expect("summary");
        assert_eq!(summary.len(), 2);
        assert!(summary.row("tau").is_some());

        let change_points = store.load_change_points().available().expect("change points");
        assert_eq!(change_points.estimates().len(), 1);
        assert_eq!(change_points.estimates()[0].mode_index, 40);

        assert!(store.load_convergence().is_available());

        let impacts = store.load_impacts().available().expect("impacts");
        let table = store.load_impact_table().available().expect("impact table");
        assert_eq!(impacts, table);
        assert_eq!(impacts[0].change_point_index, 40);

        assert!(temp_files(dir.path()).is_empty());
    }
}

#[test]
fn missing_artifacts_load_as_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(RunLayout::new(dir.path(), "never-ran").expect("layout"));

    match store.load_trace() {
        Artifact::Unavailable { path, reason } => {
            assert!(path.ends_with("models/saved/never-ran/trace.json"));
            assert_eq!(reason, "not found");
        }
        Artifact::Available(_) => panic!("nothing was persisted"),
    }
    assert!(!store.load_model_summary().is_available());
    assert!(!store.load_change_points().is_available());
    assert!(!store.load_convergence().is_available());
    assert!(!store.load_impacts().is_available());
    assert!(!store.load_impact_table().is_available());
}

#[test]
fn corrupted_trace_is_reported_unavailable_with_reason() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(RunLayout::new(dir.path(), "single").expect("layout"));
    persist(&store);

    let path = store.layout().trace_path();
    let bytes = std::fs::read(&path).expect("read trace");
    let mut envelope: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
    let crc = envelope["payload_crc32"].as_u64().expect("crc field");
    envelope["payload_crc32"] = serde_json::Value::from(crc ^ 1);
    std::fs::write(&path, serde_json::to_vec(&envelope).expect("encode")).expect("tamper");

    match store.load_trace() {
        Artifact::Unavailable { reason, .. } => assert!(reason.contains("crc32")),
        Artifact::Available(_) => panic!("tampered trace must not load"),
    }
    assert!(store.load_change_points().is_available());
}

#[test]
fn persisting_twice_replaces_artifacts_in_place() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(RunLayout::new(dir.path(), "single").expect("layout"));
    persist(&store);
    let first = std::fs::read(store.layout().change_points_path()).expect("first");
    persist(&store);
    let second = std::fs::read(store.layout().change_points_path()).expect("second");

    assert_eq!(first, second);
    assert!(temp_files(dir.path()).is_empty());
}

#[test]
fn failed_promotion_keeps_the_previous_run_intact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(RunLayout::new(dir.path(), "single").expect("layout"));
    persist(&store);
    let trace_before = std::fs::read(store.layout().trace_path()).expect("trace");
    let impacts_before = std::fs::read(store.layout().impact_json_path()).expect("impacts");

    // A non-empty directory where the table belongs makes the last rename fail.
    let table = store.layout().impact_csv_path();
    std::fs::remove_file(&table).expect("remove table");
    std::fs::create_dir_all(table.join("blocker")).expect("block table path");

    let err = try_persist(&store, &trace_around(2, 60.0)).expect_err("table rename fails");
    assert_eq!(err.code(), "io_error");

    assert_eq!(std::fs::read(store.layout().trace_path()).expect("trace"), trace_before);
    assert_eq!(
        std::fs::read(store.layout().impact_json_path()).expect("impacts"),
        impacts_before
    );
    assert_eq!(store.load_trace().available().expect("trace").seed, 7);
    assert!(temp_files(dir.path()).is_empty());
}

#[test]
fn replacing_a_damaged_run_yields_one_consistent_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(RunLayout::new(dir.path(), "single").expect("layout"));
    persist(&store);

    let change_points = store.layout().change_points_path();
    std::fs::remove_file(&change_points).expect("remove change points");
    std::fs::create_dir_all(change_points.join("stray")).expect("damage run directory");

    try_persist(&store, &trace_around(2, 60.0)).expect("persist over damaged run");

    assert_eq!(store.load_trace().available().expect("trace").seed, 2);
    let estimates = store.load_change_points().available().expect("change points");
    assert_eq!(estimates.estimates()[0].mode_index, 60);
    let impacts = store.load_impacts().available().expect("impacts");
    assert_eq!(impacts[0].change_point_index, 60);
    let table = store.load_impact_table().available().expect("table");
    assert_eq!(table, impacts);
    assert!(temp_files(dir.path()).is_empty());
}

#[test]
fn runs_keep_separate_impact_tables() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = ArtifactStore::new(RunLayout::new(dir.path(), "first").expect("layout"));
    let second = ArtifactStore::new(RunLayout::new(dir.path(), "second").expect("layout"));
    try_persist(&first, &trace_around(1, 40.0)).expect("first run");
    try_persist(&second, &trace_around(2, 60.0)).expect("second run");

    assert_ne!(first.layout().impact_csv_path(), second.layout().impact_csv_path());
    let first_table = first.load_impact_table().available().expect("first table");
    let second_table = second.load_impact_table().available().expect("second table");
    assert_eq!(first_table[0].change_point_index, 40);
    assert_eq!(second_table[0].change_point_index, 60);
}
