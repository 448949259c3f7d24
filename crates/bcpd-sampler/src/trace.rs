// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use bcpd_model::ModelKind;
use serde::{Deserialize, Serialize};

/// Transition kernel used to produce a trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKernel {
    Nuts,
    Metropolis,
}

impl SamplerKernel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nuts => "nuts",
            Self::Metropolis => "metropolis",
        }
    }
}

/// Per-chain sampling statistics, post-tuning only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainStats {
    pub divergences: usize,
    pub mean_accept: f64,
    /// Final NUTS step size, or the mean random-walk scale for Metropolis.
    pub step_size: f64,
    pub mean_tree_depth: f64,
    pub max_tree_depth_hits: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainTrace {
    pub chain: usize,
    /// `draws[i][j]` is draw `i` of parameter `j`.
    pub draws: Vec<Vec<f64>>,
    pub stats: ChainStats,
}

/// Retained posterior draws of every chain, plus run metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PosteriorTrace {
    pub model: ModelKind,
    pub kernel: SamplerKernel,
    pub seed: u64,
    pub draws: usize,
    pub tune: usize,
    pub n_obs: usize,
    /// Scalar names; vector entries are flattened as `name[i]`.
    pub parameters: Vec<String>,
    pub chains: Vec<ChainTrace>,
}

impl PosteriorTrace {
    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p == name)
    }

    /// Names of the flattened entries `prefix[0]`, `prefix[1]`, ... in index order.
    pub fn vector_entries(&self, prefix: &str) -> Vec<String> {
        let mut entries: Vec<(usize, String)> = self
            .parameters
            .iter()
            .filter_map(|name| {
                let rest = name.strip_prefix(prefix)?.strip_prefix('[')?;
                let index = rest.strip_suffix(']')?.parse::<usize>().ok()?;
                Some((index, name.clone()))
            })
            .collect();
        entries.sort_by_key(|(index, _)| *index);
        entries.into_iter().map(|(_, name)| name).collect()
    }

    /// Draws of one parameter, one vector per chain.
    pub fn chain_values(&self, name: &str) -> Option<Vec<Vec<f64>>> {
        let index = self.parameter_index(name)?;
        Some(
            self.chains
                .iter()
                .map(|chain| chain.draws.iter().map(|draw| draw[index]).collect())
                .collect(),
        )
    }

    /// Draws of one parameter pooled across chains, chain by chain.
    pub fn pooled(&self, name: &str) -> Option<Vec<f64>> {
        self.chain_values(name)
            .map(|chains| chains.into_iter().flatten().collect())
    }

    pub fn total_divergences(&self) -> usize {
        self.chains.iter().map(|chain| chain.stats.divergences).sum()
    }

    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(|chain| chain.draws.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChainStats, ChainTrace, PosteriorTrace, SamplerKernel};
    use bcpd_model::ModelKind;

    fn trace() -> PosteriorTrace {
        let chain = |id: usize, offset: f64| ChainTrace {
            chain: id,
            draws: vec![
                vec![1.0 + offset, 10.0, 20.0],
                vec![2.0 + offset, 11.0, 21.0],
            ],
            stats: ChainStats {
                divergences: id,
                ..ChainStats::default()
            },
        };
        PosteriorTrace {
            model: ModelKind::Multiple,
            kernel: SamplerKernel::Metropolis,
            seed: 7,
            draws: 2,
            tune: 0,
            n_obs: 30,
            parameters: vec![
                "sigma".to_string(),
                "changepoints[1]".to_string(),
                "changepoints[0]".to_string(),
            ],
            chains: vec![chain(0, 0.0), chain(1, 100.0)],
        }
    }

    #[test]
    fn vector_entries_are_sorted_by_index() {
        assert_eq!(
            trace().vector_entries("changepoints"),
            vec!["changepoints[0]", "changepoints[1]"]
        );
        assert!(trace().vector_entries("tau").is_empty());
    }

    #[test]
    fn pooled_concatenates_chains() {
        let t = trace();
        assert_eq!(
            t.pooled("sigma").expect("sigma exists"),
            vec![1.0, 2.0, 101.0, 102.0]
        );
        assert_eq!(t.pooled("missing"), None);
        assert_eq!(t.total_divergences(), 1);
        assert_eq!(t.total_draws(), 4);
    }

    #[test]
    fn trace_round_trips_through_json() {
        let t = trace();
        let encoded = serde_json::to_string(&t).expect("encode");
        assert!(encoded.contains("\"kernel\":\"metropolis\""));
        let decoded: PosteriorTrace = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, t);
    }
}
