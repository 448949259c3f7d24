// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::atomic::{ensure_dir, hidden_sibling, stage_file, write_file_atomic};
use crate::envelope::{
    PayloadCodec, decode_trace_envelope, encode_trace_envelope, unwrap_trace, wrap_trace,
};
use crate::tables::{
    decode_impact_table, decode_model_summary, encode_impact_table, encode_model_summary,
};
use bcpd_core::BcpdError;
use bcpd_diagnostics::{ConvergenceReport, ModelSummary};
use bcpd_posterior::{ChangePointPosterior, ImpactReport};
use bcpd_sampler::PosteriorTrace;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const MODEL_SUMMARY_FILE: &str = "model_summary.csv";
pub const TRACE_FILE: &str = "trace.json";
pub const CHANGE_POINTS_FILE: &str = "change_points.json";
pub const CONVERGENCE_FILE: &str = "convergence.json";
pub const IMPACT_JSON_FILE: &str = "impact_analysis.json";
pub const IMPACT_CSV_FILE: &str = "impact_analysis.csv";

/// Directory layout of one run below an output root:
/// `models/saved/<run>/` for model artifacts and `results/tables/<run>/`
/// for flat tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
    run: String,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>, run: impl Into<String>) -> Result<Self, BcpdError> {
        let run = run.into();
        if run.trim().is_empty() {
            return Err(BcpdError::config("run name must be non-empty"));
        }
        if run.contains(['/', '\\']) || run == "." || run == ".." {
            return Err(BcpdError::config(format!(
                "run name '{run}' must be a single path component"
            )));
        }
        Ok(Self {
            root: root.into(),
            run,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    pub fn saved_dir(&self) -> PathBuf {
        self.root.join("models").join("saved")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.saved_dir().join(&self.run)
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.root.join("results").join("tables").join(&self.run)
    }

    pub fn model_summary_path(&self) -> PathBuf {
        self.run_dir().join(MODEL_SUMMARY_FILE)
    }

    pub fn trace_path(&self) -> PathBuf {
        self.run_dir().join(TRACE_FILE)
    }

    pub fn change_points_path(&self) -> PathBuf {
        self.run_dir().join(CHANGE_POINTS_FILE)
    }

    pub fn convergence_path(&self) -> PathBuf {
        self.run_dir().join(CONVERGENCE_FILE)
    }

    pub fn impact_json_path(&self) -> PathBuf {
        self.run_dir().join(IMPACT_JSON_FILE)
    }

    pub fn impact_csv_path(&self) -> PathBuf {
        self.tables_dir().join(IMPACT_CSV_FILE)
    }
}

/// Result of reading one artifact. A missing or unreadable artifact is a
/// state the caller reports, not an error.
#[derive(Clone, Debug, PartialEq)]
pub enum Artifact<T> {
    Available(T),
    Unavailable { path: PathBuf, reason: String },
}

impl<T> Artifact<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn available(self) -> Option<T> {
        match self {
            Self::Available(value) => Some(value),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Artifact<U> {
        match self {
            Self::Available(value) => Artifact::Available(f(value)),
            Self::Unavailable { path, reason } => Artifact::Unavailable { path, reason },
        }
    }
}

/// Everything one pipeline run persists.
#[derive(Clone, Copy, Debug)]
pub struct RunArtifacts<'a> {
    pub trace: &'a PosteriorTrace,
    pub summary: &'a ModelSummary,
    pub convergence: &'a ConvergenceReport,
    pub change_points: &'a ChangePointPosterior,
    pub impacts: &'a [ImpactReport],
}

/// Paths written by [`ArtifactStore::persist`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PersistedPaths {
    pub written: Vec<PathBuf>,
}

/// Writes and reads the artifacts of one run.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    layout: RunLayout,
    codec: PayloadCodec,
}

fn to_pretty_json<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<Vec<u8>, BcpdError> {
    serde_json::to_vec_pretty(value)
        .map_err(|err| BcpdError::serialization(format!("{what} serialization failed: {err}")))
}

fn from_json<T: DeserializeOwned>(encoded: &[u8], what: &str) -> Result<T, BcpdError> {
    serde_json::from_slice(encoded)
        .map_err(|err| BcpdError::serialization(format!("{what} parse failed: {err}")))
}

fn stage_run(staging: &Path, files: &[(&str, Vec<u8>)]) -> Result<(), BcpdError> {
    std::fs::create_dir(staging).map_err(|err| BcpdError::io(staging, err))?;
    for (name, bytes) in files {
        write_file_atomic(&staging.join(name), bytes)?;
    }
    Ok(())
}

fn discard_dir(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(dir = %dir.display(), error = %err, "staged directory was not removed"),
    }
}

impl ArtifactStore {
    pub fn new(layout: RunLayout) -> Self {
        Self {
            layout,
            codec: PayloadCodec::default(),
        }
    }

    pub fn with_codec(mut self, codec: PayloadCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    pub fn codec(&self) -> PayloadCodec {
        self.codec
    }

    /// Persists a run as one unit.
    ///
    /// Every artifact is encoded in memory, the model artifacts are written
    /// into a hidden staging directory next to `models/saved/<run>/`, and the
    /// impact table into a temp sibling of its final path. Only then is the
    /// previous run directory moved aside, the staged one renamed into place
    /// and the table promoted. A failure at any step restores the previous
    /// run and discards everything staged.
    pub fn persist(&self, artifacts: &RunArtifacts<'_>) -> Result<PersistedPaths, BcpdError> {
        let envelope = wrap_trace(artifacts.trace, self.codec)?;
        let run_files = [
            (MODEL_SUMMARY_FILE, encode_model_summary(artifacts.summary)?),
            (TRACE_FILE, encode_trace_envelope(&envelope)?),
            (
                CHANGE_POINTS_FILE,
                to_pretty_json(artifacts.change_points, "change points")?,
            ),
            (
                CONVERGENCE_FILE,
                to_pretty_json(artifacts.convergence, "convergence report")?,
            ),
            (
                IMPACT_JSON_FILE,
                to_pretty_json(artifacts.impacts, "impact analysis")?,
            ),
        ];
        let table = encode_impact_table(artifacts.impacts)?;

        ensure_dir(&self.layout.saved_dir())?;
        ensure_dir(&self.layout.tables_dir())?;

        let staging = hidden_sibling(&self.layout.run_dir(), "tmp")?;
        let staged_table = match stage_run(&staging, &run_files)
            .and_then(|()| stage_file(&self.layout.impact_csv_path(), &table))
        {
            Ok(path) => path,
            Err(err) => {
                discard_dir(&staging);
                return Err(err);
            }
        };
        if let Err(err) = self.promote(&staging, &staged_table) {
            discard_dir(&staging);
            let _ = std::fs::remove_file(&staged_table);
            return Err(err);
        }

        let run_dir = self.layout.run_dir();
        let mut persisted = PersistedPaths::default();
        persisted
            .written
            .extend(run_files.iter().map(|(name, _)| run_dir.join(name)));
        persisted.written.push(self.layout.impact_csv_path());
        info!(
            run = self.layout.run(),
            dir = %run_dir.display(),
            codec = self.codec.as_str(),
            files = persisted.written.len(),
            "persisted run artifacts"
        );
        Ok(persisted)
    }

    fn promote(&self, staging: &Path, staged_table: &Path) -> Result<(), BcpdError> {
        let run_dir = self.layout.run_dir();
        let backup = if std::fs::symlink_metadata(&run_dir).is_ok() {
            let backup = hidden_sibling(&run_dir, "prev")?;
            std::fs::rename(&run_dir, &backup).map_err(|err| BcpdError::io(&run_dir, err))?;
            Some(backup)
        } else {
            None
        };
        let restore = || {
            if let Some(backup) = &backup {
                if let Err(err) = std::fs::rename(backup, &run_dir) {
                    warn!(
                        backup = %backup.display(),
                        error = %err,
                        "previous run could not be restored"
                    );
                }
            }
        };

        if let Err(err) = std::fs::rename(staging, &run_dir) {
            restore();
            return Err(BcpdError::io(&run_dir, err));
        }

        let csv_path = self.layout.impact_csv_path();
        if let Err(err) = std::fs::rename(staged_table, &csv_path) {
            if std::fs::rename(&run_dir, staging).is_err() {
                discard_dir(&run_dir);
            }
            restore();
            return Err(BcpdError::io(&csv_path, err));
        }

        if let Some(backup) = &backup {
            if let Err(err) = std::fs::remove_dir_all(backup) {
                warn!(
                    backup = %backup.display(),
                    error = %err,
                    "previous run directory was not removed"
                );
            }
        }
        Ok(())
    }

    fn load<T>(
        &self,
        path: PathBuf,
        decode: impl FnOnce(&[u8]) -> Result<T, BcpdError>,
    ) -> Artifact<T> {
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Artifact::Unavailable {
                    path,
                    reason: "not found".to_string(),
                };
            }
            Err(err) => {
                let reason = BcpdError::io(&path, err).to_string();
                warn!(reason = %reason, "artifact unreadable");
                return Artifact::Unavailable { path, reason };
            }
        };
        match decode(&bytes) {
            Ok(value) => Artifact::Available(value),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "artifact failed to decode");
                Artifact::Unavailable {
                    path,
                    reason: err.to_string(),
                }
            }
        }
    }

    pub fn load_trace(&self) -> Artifact<PosteriorTrace> {
        self.load(self.layout.trace_path(), |bytes| {
            unwrap_trace(&decode_trace_envelope(bytes)?)
        })
    }

    pub fn load_model_summary(&self) -> Artifact<ModelSummary> {
        self.load(self.layout.model_summary_path(), decode_model_summary)
    }

    pub fn load_change_points(&self) -> Artifact<ChangePointPosterior> {
        self.load(self.layout.change_points_path(), |bytes| {
            from_json(bytes, "change points")
        })
    }

    pub fn load_convergence(&self) -> Artifact<ConvergenceReport> {
        self.load(self.layout.convergence_path(), |bytes| {
            from_json(bytes, "convergence report")
        })
    }

    pub fn load_impacts(&self) -> Artifact<Vec<ImpactReport>> {
        self.load(self.layout.impact_json_path(), |bytes| {
            from_json(bytes, "impact analysis")
        })
    }

    pub fn load_impact_table(&self) -> Artifact<Vec<ImpactReport>> {
        self.load(self.layout.impact_csv_path(), decode_impact_table)
    }
}
