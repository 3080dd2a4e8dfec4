//! Content-addressable artefact identities

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A canonical record identifying an artefact and all its inputs.
///
/// Fingerprints form a DAG that mirrors the build pipeline: a predictor
/// fingerprint embeds the feature-learner fingerprint, which embeds the
/// preprocessor fingerprints, which embed the data-frame fingerprints.
/// Equal hashes mean observationally equivalent artefacts; a frame
/// fingerprint changes whenever the frame's `last_change` does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type_", rename_all = "snake_case")]
pub enum Fingerprint {
    DataFrame {
        name: String,
        last_change: u64,
    },
    Staging {
        dependencies: Vec<Fingerprint>,
    },
    Preprocessor {
        marker: String,
        params: serde_json::Value,
        dependencies: Vec<Fingerprint>,
    },
    FeatureLearner {
        marker: String,
        params: serde_json::Value,
        dependencies: Vec<Fingerprint>,
    },
    FeatureSelector {
        num_features: usize,
        dependencies: Vec<Fingerprint>,
    },
    Predictor {
        marker: String,
        params: serde_json::Value,
        target_num: usize,
        dependencies: Vec<Fingerprint>,
    },
}

impl Fingerprint {
    /// The canonical JSON rendering. Hash comparisons go through this
    /// string, so two fingerprints collide only if they serialize
    /// identically.
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Lowercase hex SHA-256 of the canonical rendering.
    pub fn hash_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
