// Copyright 2026 Recall Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use tracing::debug;

use crate::compile::BackendCapabilities;
use crate::error::ConfigurationError;

/// Neighbours requested from a native nearest-neighbour clause.
pub const KNN_CANDIDATES: usize = 600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub id: u32,
    pub name: String,
    /// Suffix of the stored vector field, `emb.<path>`.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
}

impl EmbeddingModel {
    pub fn field(&self) -> String {
        format!("emb.{}", self.path)
    }

    pub fn check_vector(&self, vector: &[f32]) -> Result<(), ConfigurationError> {
        if vector.is_empty() {
            return Err(ConfigurationError::EmptyEmbedding);
        }
        match self.dimension {
            Some(expected) if expected != vector.len() => {
                Err(ConfigurationError::DimensionMismatch {
                    model: self.id,
                    expected,
                    actual: vector.len(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Read-only set of embedding models, loaded once from configuration.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: Vec<EmbeddingModel>,
}

impl ModelCatalog {
    pub fn new(models: Vec<EmbeddingModel>) -> Self {
        Self { models }
    }

    pub fn resolve(&self, id: u32) -> Result<&EmbeddingModel, ConfigurationError> {
        self.models
            .iter()
            .find(|model| model.id == id)
            .ok_or(ConfigurationError::UnknownModel(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &EmbeddingModel> {
        self.models.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingStrategy {
    NativeKnn,
    /// Score every filtered document that has a vector for the model.
    BruteForce,
}

impl EmbeddingStrategy {
    pub fn select(caps: &BackendCapabilities) -> Self {
        if caps.native_knn {
            EmbeddingStrategy::NativeKnn
        } else {
            debug!("backend lacks native vector search; rescoring by brute force");
            EmbeddingStrategy::BruteForce
        }
    }
}

pub struct VectorSearch<'a> {
    pub model: &'a EmbeddingModel,
    pub vector: &'a [f32],
    pub strategy: EmbeddingStrategy,
}

impl VectorSearch<'_> {
    /// Installs the similarity clause on a full-backend request body. All
    /// other constraints arrive in `filters` and restrict the candidate set.
    pub fn apply_elastic(&self, body: &mut Map<String, Value>, mut filters: Vec<Value>) {
        let field = self.model.field();
        match self.strategy {
            EmbeddingStrategy::NativeKnn => {
                body.insert(
                    "knn".to_string(),
                    json!({
                        "field": field,
                        "query_vector": self.vector,
                        "k": KNN_CANDIDATES,
                        "num_candidates": KNN_CANDIDATES,
                        "filter": filters,
                    }),
                );
            }
            EmbeddingStrategy::BruteForce => {
                filters.push(json!({ "exists": { "field": field } }));
                body.insert(
                    "query".to_string(),
                    json!({
                        "function_score": {
                            "query": { "bool": { "filter": filters } },
                            "script_score": {
                                "script": {
                                    "source": format!(
                                        "cosineSimilarity(params.query_vector, \"{field}\") + 1.0"
                                    ),
                                    "params": { "query_vector": self.vector },
                                }
                            }
                        }
                    }),
                );
            }
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn to_bytes(vec: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> EmbeddingModel {
        EmbeddingModel {
            id: 1,
            name: "clip".to_string(),
            path: "clip".to_string(),
            dimension: Some(3),
        }
    }

    #[test]
    fn brute_force_adds_exists_filter_and_script_score() {
        let model = model();
        let vector = [0.1, 0.2, 0.3];
        let search = VectorSearch {
            model: &model,
            vector: &vector,
            strategy: EmbeddingStrategy::BruteForce,
        };
        let mut body = Map::new();
        search.apply_elastic(&mut body, vec![json!({"terms": {"index": ["i1"]}})]);

        assert!(!body.contains_key("knn"));
        let function_score = &body["query"]["function_score"];
        let filters = function_score["query"]["bool"]["filter"]
            .as_array()
            .expect("filters");
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[1], json!({"exists": {"field": "emb.clip"}}));
        assert!(
            function_score["script_score"]["script"]["source"]
                .as_str()
                .expect("script")
                .contains("cosineSimilarity")
        );
    }

    #[test]
    fn native_knn_carries_filters() {
        let model = model();
        let vector = [0.1, 0.2, 0.3];
        let search = VectorSearch {
            model: &model,
            vector: &vector,
            strategy: EmbeddingStrategy::NativeKnn,
        };
        let mut body = Map::new();
        search.apply_elastic(&mut body, vec![json!({"term": {"path": "a"}})]);
        assert!(!body.contains_key("query"));
        assert_eq!(body["knn"]["field"], json!("emb.clip"));
        assert_eq!(body["knn"]["k"], json!(KNN_CANDIDATES));
        assert_eq!(body["knn"]["filter"][0], json!({"term": {"path": "a"}}));
    }

    #[test]
    fn catalog_rejects_unknown_models_and_bad_dimensions() {
        let catalog = ModelCatalog::new(vec![model()]);
        assert_eq!(
            catalog.resolve(9),
            Err(ConfigurationError::UnknownModel(9))
        );
        let model = catalog.resolve(1).expect("model");
        assert!(model.check_vector(&[1.0, 2.0, 3.0]).is_ok());
        assert_eq!(
            model.check_vector(&[1.0]),
            Err(ConfigurationError::DimensionMismatch {
                model: 1,
                expected: 3,
                actual: 1
            })
        );
    }

    #[test]
    fn vector_bytes_round_trip() {
        let vec = vec![0.5f32, -1.25, 3.0];
        assert_eq!(from_bytes(&to_bytes(&vec)), vec);
    }

    #[test]
    fn cosine_of_parallel_vectors_is_one() {
        let sim = cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]);
        assert!((sim - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
