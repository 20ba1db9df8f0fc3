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

//! Compiler for the full-featured document index.

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use super::BackendCapabilities;
use super::BackendKind;
use super::Facet;
use super::HIGHLIGHT_POST;
use super::HIGHLIGHT_PRE;
use super::NativeQuery;
use super::QueryCompiler;
use crate::cursor::CursorPosition;
use crate::embed::EmbeddingStrategy;
use crate::embed::VectorSearch;
use crate::normalize::Hit;
use crate::request::SearchPlan;
use crate::request::TagMode;
use crate::sort::SortField;
use crate::sort::SortMode;

const SOURCE_EXCLUDES: [&str; 3] = ["content", "_tie", "emb.*"];
const DEFAULT_FRAGMENT_SIZE: usize = 200;
const MAX_ANALYZED_OFFSET: u64 = 999_999;
const RANDOM_WEIGHT: u32 = 1000;

const TEXT_FIELDS: [&str; 8] = [
    "name^8",
    "content^3",
    "album^8",
    "artist^8",
    "title^8",
    "genre^2",
    "album_artist^8",
    "font_name^6",
];
const FUZZY_FIELDS: [&str; 2] = ["content.nGram", "name.nGram^3"];
const HIGHLIGHT_FIELDS: [&str; 5] = ["content", "name", "name.nGram", "content.nGram", "font_name"];

pub struct ElasticCompiler {
    caps: BackendCapabilities,
}

impl ElasticCompiler {
    pub fn new(caps: BackendCapabilities) -> Self {
        Self { caps }
    }
}

fn filter_clauses(plan: &SearchPlan<'_>) -> Vec<Value> {
    let req = plan.request;
    let mut filters = Vec::new();

    if !req.index_ids.is_empty() {
        filters.push(json!({ "terms": { "index": req.index_ids } }));
    }
    if let Some(range) = range_clause(req.size_min, req.size_max) {
        filters.push(json!({ "range": { "size": range } }));
    }
    if let Some(range) = range_clause(req.mtime_min, req.mtime_max) {
        filters.push(json!({ "range": { "mtime": range } }));
    }
    if let Some(path) = &plan.path {
        filters.push(json!({ "term": { "path": path } }));
    }
    if !req.mime_types.is_empty() {
        filters.push(json!({ "terms": { "mime": req.mime_types } }));
    }
    if !req.tags.is_empty() {
        match req.tag_mode {
            TagMode::Any => filters.push(json!({ "terms": { "tag": req.tags } })),
            TagMode::All => {
                for tag in &req.tags {
                    filters.push(json!({ "term": { "tag": tag } }));
                }
            }
        }
    }
    filters
}

fn range_clause<T: Into<Value>>(min: Option<T>, max: Option<T>) -> Option<Value> {
    let mut range = Map::new();
    if let Some(min) = min {
        range.insert("gte".to_string(), min.into());
    }
    if let Some(max) = max {
        range.insert("lte".to_string(), max.into());
    }
    (!range.is_empty()).then_some(Value::Object(range))
}

fn text_clause(plan: &SearchPlan<'_>) -> Option<Value> {
    let req = plan.request;
    let text = req.text()?;
    if req.advanced {
        return Some(json!({
            "query_string": {
                "query": text,
                "default_field": "name",
                "default_operator": "and",
            }
        }));
    }

    let mut fields: Vec<&str> = TEXT_FIELDS.to_vec();
    if req.search_in_path {
        fields.push("path.text^5");
    }
    if req.fuzzy {
        fields.extend(FUZZY_FIELDS);
        if req.search_in_path {
            fields.push("path.nGram");
        }
    }
    Some(json!({
        "simple_query_string": {
            "query": text,
            "fields": fields,
            "default_operator": "and",
        }
    }))
}

fn bool_query(filters: Vec<Value>, text: Option<Value>) -> Value {
    let mut clause = Map::new();
    if !filters.is_empty() {
        clause.insert("filter".to_string(), Value::Array(filters));
    }
    if let Some(text) = text {
        clause.insert("must".to_string(), json!([text]));
    }
    if clause.is_empty() {
        return json!({ "match_all": {} });
    }
    json!({ "bool": clause })
}

impl ElasticCompiler {
    fn highlight(&self, plan: &SearchPlan<'_>) -> Value {
        let mut fields = Map::new();
        let mut names: Vec<&str> = HIGHLIGHT_FIELDS.to_vec();
        if plan.request.search_in_path {
            names.extend(["path.text", "path.nGram"]);
        }
        for name in names {
            fields.insert(name.to_string(), json!({}));
        }

        let mut highlight = Map::new();
        highlight.insert("pre_tags".to_string(), json!([HIGHLIGHT_PRE]));
        highlight.insert("post_tags".to_string(), json!([HIGHLIGHT_POST]));
        highlight.insert(
            "fragment_size".to_string(),
            json!(plan.request.fragment_size.unwrap_or(DEFAULT_FRAGMENT_SIZE)),
        );
        highlight.insert("number_of_fragments".to_string(), json!(1));
        highlight.insert("order".to_string(), json!("score"));
        if !self.caps.legacy_highlight {
            highlight.insert("max_analyzed_offset".to_string(), json!(MAX_ANALYZED_OFFSET));
        }
        highlight.insert("fields".to_string(), Value::Object(fields));
        Value::Object(highlight)
    }
}

impl QueryCompiler for ElasticCompiler {
    fn kind(&self) -> BackendKind {
        BackendKind::Elastic
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.caps
    }

    fn compile(&self, plan: &SearchPlan<'_>) -> NativeQuery {
        let req = plan.request;
        let mut filters = filter_clauses(plan);
        let text = text_clause(plan);

        let mut body = Map::new();
        body.insert("_source".to_string(), json!({ "excludes": SOURCE_EXCLUDES }));
        body.insert("size".to_string(), json!(plan.page_size()));
        body.insert("sort".to_string(), plan.sort.elastic_clause());

        if let Some((model, vector)) = plan.embedding() {
            filters.extend(text);
            VectorSearch {
                model,
                vector,
                strategy: EmbeddingStrategy::select(&self.caps),
            }
            .apply_elastic(&mut body, filters);
        } else if plan.sort.field == SortField::Random {
            body.insert(
                "query".to_string(),
                json!({
                    "function_score": {
                        "query": bool_query(filters, text),
                        "functions": [{
                            "random_score": { "seed": req.seed, "field": "_seq_no" },
                            "weight": RANDOM_WEIGHT,
                        }],
                        "boost_mode": "sum",
                    }
                }),
            );
        } else {
            body.insert("query".to_string(), bool_query(filters, text));
        }

        if req.highlight && plan.embedding().is_none() {
            body.insert("highlight".to_string(), self.highlight(plan));
        }

        match plan.resume {
            Some(CursorPosition::KeyAndId { key, id }) => {
                body.insert("search_after".to_string(), json!([key, id]));
            }
            Some(CursorPosition::Marker { values }) => {
                body.insert("search_after".to_string(), json!(values));
            }
            Some(CursorPosition::SortValues { values }) => {
                body.insert("search_after".to_string(), json!(values));
            }
            None => {
                body.insert(
                    "aggs".to_string(),
                    json!({
                        "total_size": { "sum": { "field": "size" } },
                        "total_count": { "value_count": { "field": "_id" } },
                    }),
                );
            }
        }

        NativeQuery::Elastic(Value::Object(body))
    }

    fn compile_facets(&self, plan: &SearchPlan<'_>, facets: &[Facet]) -> NativeQuery {
        let mut aggs = Map::new();
        for facet in facets {
            aggs.insert(
                facet.aggregation_name().to_string(),
                json!({ "terms": { "field": facet.field(), "size": facet.bucket_limit() } }),
            );
        }
        NativeQuery::Elastic(json!({
            "size": 0,
            "query": bool_query(filter_clauses(plan), None),
            "aggs": aggs,
        }))
    }

    /// Prefers the hit's own `sort` array: it holds the stored (escaped)
    /// name and the `_tie` value the index actually ordered by.
    fn resume_position(&self, mode: &SortMode, last: &Hit) -> CursorPosition {
        match &last.sort {
            Some(values) if !values.is_empty() => CursorPosition::SortValues {
                values: values.clone(),
            },
            _ => CursorPosition::KeyAndId {
                key: mode.key(last),
                id: last.id.clone(),
            },
        }
    }
}
