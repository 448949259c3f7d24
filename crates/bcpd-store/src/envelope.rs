// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bcpd_core::BcpdError;
use bcpd_sampler::PosteriorTrace;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Trace schema version emitted by writers.
pub const CURRENT_TRACE_SCHEMA_VERSION: u32 = 1;
/// Oldest trace schema version readers accept.
pub const MIN_SUPPORTED_TRACE_SCHEMA_VERSION: u32 = 1;

/// Encoding of the trace payload bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadCodec {
    #[default]
    Json,
    Bincode,
}

impl PayloadCodec {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Bincode => "bincode",
        }
    }
}

/// Self-describing container for a persisted [`PosteriorTrace`].
///
/// `payload` holds the encoded trace: canonical JSON (sorted keys) for the
/// json codec, bincode bytes otherwise. The CRC covers exactly these bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEnvelope {
    pub schema_version: u32,
    pub engine_fingerprint: String,
    pub created_at_ns: i64,
    pub payload_crc32: u32,
    pub payload_codec: PayloadCodec,
    pub payload: Vec<u8>,
}

impl TraceEnvelope {
    fn validate_metadata(&self) -> Result<(), BcpdError> {
        if self.engine_fingerprint.trim().is_empty() {
            return Err(BcpdError::invalid_input(
                "trace engine_fingerprint must be non-empty",
            ));
        }
        if self.created_at_ns < 0 {
            return Err(BcpdError::invalid_input(format!(
                "trace created_at_ns must be >= 0; got {}",
                self.created_at_ns
            )));
        }
        validate_trace_schema_version(self.schema_version)
    }

    fn verify_payload_crc32(&self) -> Result<(), BcpdError> {
        let observed = crc32fast::hash(&self.payload);
        if observed != self.payload_crc32 {
            return Err(BcpdError::invalid_input(format!(
                "trace payload crc32 mismatch: expected=0x{:08x}, observed=0x{:08x}",
                self.payload_crc32, observed
            )));
        }
        Ok(())
    }
}

/// On-disk form of [`TraceEnvelope`]. A json payload is embedded as a JSON
/// document; a bincode payload is a byte array.
#[derive(Serialize, Deserialize)]
struct EnvelopeDocument {
    schema_version: u32,
    engine_fingerprint: String,
    created_at_ns: i64,
    payload_crc32: u32,
    payload_codec: PayloadCodec,
    payload: serde_json::Value,
}

impl TryFrom<&TraceEnvelope> for EnvelopeDocument {
    type Error = BcpdError;

    fn try_from(envelope: &TraceEnvelope) -> Result<Self, Self::Error> {
        let payload = match envelope.payload_codec {
            PayloadCodec::Json => serde_json::from_slice(&envelope.payload).map_err(|err| {
                BcpdError::serialization(format!("trace payload is not valid JSON: {err}"))
            })?,
            PayloadCodec::Bincode => serde_json::Value::from(envelope.payload.clone()),
        };
        Ok(Self {
            schema_version: envelope.schema_version,
            engine_fingerprint: envelope.engine_fingerprint.clone(),
            created_at_ns: envelope.created_at_ns,
            payload_crc32: envelope.payload_crc32,
            payload_codec: envelope.payload_codec,
            payload,
        })
    }
}

impl TryFrom<EnvelopeDocument> for TraceEnvelope {
    type Error = BcpdError;

    fn try_from(document: EnvelopeDocument) -> Result<Self, Self::Error> {
        let payload = match document.payload_codec {
            PayloadCodec::Json => serde_json::to_vec(&document.payload),
            PayloadCodec::Bincode => serde_json::from_value::<Vec<u8>>(document.payload),
        }
        .map_err(|err| {
            BcpdError::serialization(format!(
                "trace payload field is malformed (codec={}): {err}",
                document.payload_codec.as_str()
            ))
        })?;
        Ok(Self {
            schema_version: document.schema_version,
            engine_fingerprint: document.engine_fingerprint,
            created_at_ns: document.created_at_ns,
            payload_crc32: document.payload_crc32,
            payload_codec: document.payload_codec,
            payload,
        })
    }
}

/// Rejects schema versions outside the supported window.
pub fn validate_trace_schema_version(schema_version: u32) -> Result<(), BcpdError> {
    if (MIN_SUPPORTED_TRACE_SCHEMA_VERSION..=CURRENT_TRACE_SCHEMA_VERSION).contains(&schema_version)
    {
        return Ok(());
    }
    Err(BcpdError::invalid_input(format!(
        "trace schema_version={schema_version} is unsupported; supported versions are {MIN_SUPPORTED_TRACE_SCHEMA_VERSION}..={CURRENT_TRACE_SCHEMA_VERSION}"
    )))
}

fn engine_fingerprint() -> String {
    format!(
        "bcpd-store/{}/{}-{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

fn now_unix_ns() -> Result<i64, BcpdError> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| {
            BcpdError::invalid_input(format!(
                "system clock before UNIX epoch; cannot timestamp trace: {err}"
            ))
        })?;
    i64::try_from(elapsed.as_nanos())
        .map_err(|_| BcpdError::invalid_input("system timestamp overflow while stamping trace"))
}

fn serialize_payload(trace: &PosteriorTrace, codec: PayloadCodec) -> Result<Vec<u8>, BcpdError> {
    match codec {
        // Through `Value` so the bytes match what a reader re-serializes
        // from the embedded document.
        PayloadCodec::Json => serde_json::to_value(trace)
            .and_then(|value| serde_json::to_vec(&value))
            .map_err(|err| {
                BcpdError::serialization(format!(
                    "trace payload serialization failed (codec=json): {err}"
                ))
            }),
        PayloadCodec::Bincode => bincode::serialize(trace).map_err(|err| {
            BcpdError::serialization(format!(
                "trace payload serialization failed (codec=bincode): {err}"
            ))
        }),
    }
}

fn deserialize_payload(payload: &[u8], codec: PayloadCodec) -> Result<PosteriorTrace, BcpdError> {
    match codec {
        PayloadCodec::Json => serde_json::from_slice(payload).map_err(|err| {
            BcpdError::serialization(format!(
                "trace payload deserialization failed (codec=json): {err}"
            ))
        }),
        PayloadCodec::Bincode => bincode::deserialize(payload).map_err(|err| {
            BcpdError::serialization(format!(
                "trace payload deserialization failed (codec=bincode): {err}"
            ))
        }),
    }
}

fn check_trace_shape(trace: &PosteriorTrace) -> Result<(), BcpdError> {
    let width = trace.parameters.len();
    for chain in &trace.chains {
        if let Some(draw) = chain.draws.iter().find(|draw| draw.len() != width) {
            return Err(BcpdError::invalid_input(format!(
                "chain {} has a draw with {} values but the trace names {width} parameters",
                chain.chain,
                draw.len()
            )));
        }
    }
    Ok(())
}

/// Wraps a trace into a checksummed envelope.
pub fn wrap_trace(trace: &PosteriorTrace, codec: PayloadCodec) -> Result<TraceEnvelope, BcpdError> {
    check_trace_shape(trace)?;
    let payload = serialize_payload(trace, codec)?;
    let envelope = TraceEnvelope {
        schema_version: CURRENT_TRACE_SCHEMA_VERSION,
        engine_fingerprint: engine_fingerprint(),
        created_at_ns: now_unix_ns()?,
        payload_crc32: crc32fast::hash(&payload),
        payload_codec: codec,
        payload,
    };
    envelope.validate_metadata()?;
    Ok(envelope)
}

/// Restores the trace after version and CRC checks.
pub fn unwrap_trace(envelope: &TraceEnvelope) -> Result<PosteriorTrace, BcpdError> {
    envelope.validate_metadata()?;
    envelope.verify_payload_crc32()?;
    let trace = deserialize_payload(&envelope.payload, envelope.payload_codec)?;
    check_trace_shape(&trace)?;
    Ok(trace)
}

/// Serializes an envelope to JSON bytes.
pub fn encode_trace_envelope(envelope: &TraceEnvelope) -> Result<Vec<u8>, BcpdError> {
    envelope.validate_metadata()?;
    envelope.verify_payload_crc32()?;
    let document = EnvelopeDocument::try_from(envelope)?;
    serde_json::to_vec(&document).map_err(|err| {
        BcpdError::serialization(format!("trace envelope serialization failed: {err}"))
    })
}

/// Parses envelope JSON bytes and verifies them.
pub fn decode_trace_envelope(encoded: &[u8]) -> Result<TraceEnvelope, BcpdError> {
    let document: EnvelopeDocument = serde_json::from_slice(encoded).map_err(|err| {
        BcpdError::serialization(format!("trace envelope JSON parse failed: {err}"))
    })?;
    let envelope = TraceEnvelope::try_from(document)?;
    envelope.validate_metadata()?;
    envelope.verify_payload_crc32()?;
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::{
        CURRENT_TRACE_SCHEMA_VERSION, PayloadCodec, decode_trace_envelope, encode_trace_envelope,
        unwrap_trace, wrap_trace,
    };
    use bcpd_model::ModelKind;
    use bcpd_sampler::{ChainStats, ChainTrace, PosteriorTrace, SamplerKernel};

    fn trace() -> PosteriorTrace {
        PosteriorTrace {
            model: ModelKind::Single,
            kernel: SamplerKernel::Nuts,
            seed: 42,
            draws: 2,
            tune: 10,
            n_obs: 50,
            parameters: vec!["tau".to_string(), "sigma".to_string()],
            chains: vec![ChainTrace {
                chain: 0,
                draws: vec![vec![24.5, 0.01], vec![25.25, 0.011]],
                stats: ChainStats {
                    divergences: 0,
                    mean_accept: 0.93,
                    step_size: 0.2,
                    mean_tree_depth: 3.0,
                    max_tree_depth_hits: 0,
                },
            }],
        }
    }

    #[test]
    fn envelope_preserves_trace_with_both_codecs() {
        for codec in [PayloadCodec::Json, PayloadCodec::Bincode] {
            let envelope = wrap_trace(&trace(), codec).expect("wrap");
            assert_eq!(envelope.schema_version, CURRENT_TRACE_SCHEMA_VERSION);
            assert_eq!(envelope.payload_codec, codec);
            assert!(envelope.engine_fingerprint.starts_with("bcpd-store/"));

            let bytes = encode_trace_envelope(&envelope).expect("encode");
            let decoded = decode_trace_envelope(&bytes).expect("decode");
            assert_eq!(unwrap_trace(&decoded).expect("unwrap"), trace());
        }
    }

    #[test]
    fn json_payload_is_embedded_as_a_document() {
        let envelope = wrap_trace(&trace(), PayloadCodec::Json).expect("wrap");
        let bytes = encode_trace_envelope(&envelope).expect("encode");
        let document: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(document["payload"]["seed"], serde_json::Value::from(42));
        assert_eq!(document["payload"]["parameters"][0], "tau");
        assert_eq!(document["payload"]["chains"][0]["draws"][1][0], 25.25);

        let bincode = wrap_trace(&trace(), PayloadCodec::Bincode).expect("wrap");
        let bytes = encode_trace_envelope(&bincode).expect("encode");
        let document: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert!(document["payload"].is_array());
    }

    #[test]
    fn edited_embedded_payload_fails_crc_check() {
        let envelope = wrap_trace(&trace(), PayloadCodec::Json).expect("wrap");
        let bytes = encode_trace_envelope(&envelope).expect("encode");
        let mut document: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        document["payload"]["seed"] = serde_json::Value::from(43);
        let edited = serde_json::to_vec(&document).expect("encode");
        let err = decode_trace_envelope(&edited).expect_err("crc mismatch");
        assert!(err.to_string().contains("crc32 mismatch"));
    }

    #[test]
    fn corrupted_payload_fails_crc_check() {
        let mut envelope = wrap_trace(&trace(), PayloadCodec::Json).expect("wrap");
        envelope.payload[0] ^= 0xff;
        let err = unwrap_trace(&envelope).expect_err("crc mismatch");
        assert!(err.to_string().contains("crc32 mismatch"));
    }

    #[test]
    fn truncated_envelope_fails_to_parse() {
        let envelope = wrap_trace(&trace(), PayloadCodec::Json).expect("wrap");
        let bytes = encode_trace_envelope(&envelope).expect("encode");
        let err = decode_trace_envelope(&bytes[..bytes.len() / 2]).expect_err("truncated");
        assert_eq!(err.code(), "serialization_error");
    }

    #[test]
    fn future_schema_version_is_rejected() {
        let mut envelope = wrap_trace(&trace(), PayloadCodec::Bincode).expect("wrap");
        envelope.schema_version = CURRENT_TRACE_SCHEMA_VERSION + 1;
        let err = unwrap_trace(&envelope).expect_err("unsupported version");
        assert!(err.to_string().contains("unsupported"));
    }

    #[test]
    fn ragged_draws_are_rejected_before_writing() {
        let mut ragged = trace();
        ragged.chains[0].draws[1].pop();
        let err = wrap_trace(&ragged, PayloadCodec::Json).expect_err("ragged");
        assert_eq!(err.code(), "invalid_input");
    }
}
