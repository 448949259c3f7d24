// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod atomic;
pub mod envelope;
pub mod store;
pub mod tables;

pub use atomic::write_file_atomic;
pub use envelope::{
    CURRENT_TRACE_SCHEMA_VERSION, MIN_SUPPORTED_TRACE_SCHEMA_VERSION, PayloadCodec, TraceEnvelope,
    decode_trace_envelope, encode_trace_envelope, unwrap_trace, validate_trace_schema_version,
    wrap_trace,
};
pub use store::{Artifact, ArtifactStore, PersistedPaths, RunArtifacts, RunLayout};
pub use tables::{
    decode_impact_table, decode_model_summary, encode_impact_table, encode_model_summary,
};

/// Persistence of change-point run artifacts for bcpd.
pub fn crate_name() -> &'static str {
    "bcpd-store"
}
