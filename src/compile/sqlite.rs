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

//! Compiler for the reduced backend, which takes a flat parameter record
//! rather than a nested query language.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::BackendCapabilities;
use super::BackendKind;
use super::Facet;
use super::NativeQuery;
use super::QueryCompiler;
use crate::cursor::CursorPosition;
use crate::normalize::Hit;
use crate::request::SearchPlan;
use crate::request::TagMode;
use crate::sort::SortMode;

pub const DEFAULT_HIGHLIGHT_CONTEXT: usize = 20;
const MAX_HIGHLIGHT_CONTEXT: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlatSort {
    #[default]
    Score,
    Random,
    Mtime,
    Size,
    Name,
    Embedding,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlatRequest {
    pub page_size: usize,
    pub sort: FlatSort,
    pub sort_asc: bool,
    pub fetch_aggregations: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub advanced: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub search_in_path: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_min: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_max: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_max: Option<i64>,
    /// Resume marker: primary key and id of the last hit, as strings.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub index_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mime_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub tags_all: bool,
    pub seed: u64,
    #[serde(skip_serializing_if = "is_false")]
    pub highlight: bool,
    pub highlight_context_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Facet-only form: aggregations over these fields, no hits.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub facets: Vec<Facet>,
}

impl FlatRequest {
    pub fn is_facet_query(&self) -> bool {
        !self.facets.is_empty()
    }
}

pub struct SqliteCompiler;

fn filters(plan: &SearchPlan<'_>) -> FlatRequest {
    let req = plan.request;
    FlatRequest {
        path: plan.path.clone(),
        size_min: req.size_min,
        size_max: req.size_max,
        date_min: req.mtime_min,
        date_max: req.mtime_max,
        index_ids: req.index_ids.iter().cloned().collect(),
        mime_types: req.mime_types.iter().cloned().collect(),
        tags: req.tags.iter().cloned().collect(),
        tags_all: !req.tags.is_empty() && req.tag_mode == TagMode::All,
        ..Default::default()
    }
}

fn context_size(fragment_size: Option<usize>) -> usize {
    match fragment_size {
        // Roughly ten characters per token.
        Some(chars) => (chars / 10).clamp(1, MAX_HIGHLIGHT_CONTEXT),
        None => DEFAULT_HIGHLIGHT_CONTEXT,
    }
}

fn marker_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl QueryCompiler for SqliteCompiler {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    fn compile(&self, plan: &SearchPlan<'_>) -> NativeQuery {
        let req = plan.request;
        if req.fuzzy {
            debug!("reduced backend has no fuzzy matching; ignoring flag");
        }

        let (sort, sort_asc) = match plan.embedding() {
            Some(_) => (FlatSort::Embedding, false),
            None => plan.sort.flat_sort(),
        };
        let embedding = plan.embedding();

        NativeQuery::Sqlite(FlatRequest {
            page_size: plan.page_size(),
            sort,
            sort_asc,
            fetch_aggregations: plan.is_first_page(),
            query: req.text().map(str::to_string),
            advanced: req.advanced,
            search_in_path: req.search_in_path,
            after: plan
                .resume
                .map(CursorPosition::marker_values)
                .unwrap_or_default(),
            seed: req.seed,
            highlight: req.highlight && embedding.is_none(),
            highlight_context_size: context_size(req.fragment_size),
            model: embedding.map(|(model, _)| model.id),
            embedding: embedding.map(|(_, vector)| vector.to_vec()),
            ..filters(plan)
        })
    }

    fn compile_facets(&self, plan: &SearchPlan<'_>, facets: &[Facet]) -> NativeQuery {
        NativeQuery::Sqlite(FlatRequest {
            page_size: 0,
            highlight_context_size: DEFAULT_HIGHLIGHT_CONTEXT,
            facets: facets.to_vec(),
            ..filters(plan)
        })
    }

    fn resume_position(&self, mode: &SortMode, last: &Hit) -> CursorPosition {
        match &last.sort {
            Some(values) if !values.is_empty() => CursorPosition::Marker {
                values: values.iter().map(marker_value).collect(),
            },
            _ => CursorPosition::Marker {
                values: vec![mode.key(last).to_string(), last.id.clone()],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::embed::EmbeddingModel;
    use crate::embed::ModelCatalog;
    use crate::request::EmbeddingQuery;
    use crate::request::MAX_PAGE_SIZE;
    use crate::request::SearchRequest;
    use crate::request::validate;
    use crate::request::validate_facets;
    use crate::sort::SortModeRegistry;

    fn compile(request: &SearchRequest) -> FlatRequest {
        let catalog = ModelCatalog::new(vec![EmbeddingModel {
            id: 3,
            name: "text".into(),
            path: "text".into(),
            dimension: Some(2),
        }]);
        let plan = validate(request, &SortModeRegistry::builtin(), &catalog, MAX_PAGE_SIZE)
            .expect("plan");
        match SqliteCompiler.compile(&plan) {
            NativeQuery::Sqlite(flat) => flat,
            other => panic!("unexpected query {other:?}"),
        }
    }

    #[test]
    fn empty_text_sends_no_query() {
        let flat = compile(&SearchRequest {
            query: "   ".into(),
            sort: "dateDesc".into(),
            ..Default::default()
        });
        assert_eq!(flat.query, None);
        assert_eq!(flat.sort, FlatSort::Mtime);
        assert!(!flat.sort_asc);
        assert!(flat.fetch_aggregations);
    }

    #[test]
    fn filters_are_flattened() {
        let flat = compile(&SearchRequest {
            size_min: Some(5),
            mtime_max: Some(99),
            path: Some("Docs/".into()),
            tags: ["x".to_string(), "y".to_string()].into(),
            ..Default::default()
        });
        assert_eq!(flat.size_min, Some(5));
        assert_eq!(flat.size_max, None);
        assert_eq!(flat.date_max, Some(99));
        assert_eq!(flat.path.as_deref(), Some("docs"));
        assert_eq!(flat.tags, vec!["x".to_string(), "y".to_string()]);
        assert!(flat.tags_all);
    }

    #[test]
    fn embedding_sorts_by_similarity() {
        let flat = compile(&SearchRequest {
            query: "cat".into(),
            sort: "nameAsc".into(),
            embedding: Some(EmbeddingQuery {
                model: 3,
                vector: vec![1.0, 0.0],
            }),
            ..Default::default()
        });
        assert_eq!(flat.sort, FlatSort::Embedding);
        assert_eq!(flat.model, Some(3));
        assert!(!flat.highlight);
    }

    #[test]
    fn serialized_form_omits_absent_filters() {
        let flat = compile(&SearchRequest::default());
        let value = serde_json::to_value(&flat).expect("json");
        assert_eq!(value["pageSize"], json!(100));
        assert_eq!(value["sort"], json!("score"));
        assert!(value.get("sizeMin").is_none());
        assert!(value.get("after").is_none());
        assert_eq!(value["highlightContextSize"], json!(DEFAULT_HIGHLIGHT_CONTEXT));
    }

    #[test]
    fn resume_prefers_backend_marker() {
        let mode = SortModeRegistry::builtin().resolve("nameAsc").expect("mode");
        let mut last = Hit {
            id: "d2".into(),
            source: crate::normalize::Document {
                name: "b.txt".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            SqliteCompiler.resume_position(&mode, &last),
            CursorPosition::Marker {
                values: vec!["b.txt".into(), "d2".into()]
            }
        );
        last.sort = Some(vec![json!(17), json!("d2")]);
        assert_eq!(
            SqliteCompiler.resume_position(&mode, &last),
            CursorPosition::Marker {
                values: vec!["17".into(), "d2".into()]
            }
        );
    }

    #[test]
    fn facet_form_has_no_page() {
        let request = SearchRequest {
            query: "ignored".into(),
            ..Default::default()
        };
        let catalog = ModelCatalog::default();
        let plan = validate_facets(&request, &SortModeRegistry::builtin(), &catalog).expect("plan");
        let NativeQuery::Sqlite(flat) = SqliteCompiler.compile_facets(&plan, &[Facet::Tag]) else {
            panic!("expected flat request");
        };
        assert_eq!(flat.page_size, 0);
        assert!(flat.is_facet_query());
        assert_eq!(flat.query, None);
    }
}
