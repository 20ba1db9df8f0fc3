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

//! Query compilation. One [`QueryCompiler`] per backend kind, chosen once
//! when a session starts; compiling a validated [`SearchPlan`] cannot fail.

pub mod elastic;
pub mod sqlite;

use clap::ValueEnum;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::cursor::CursorPosition;
use crate::normalize::Hit;
use crate::request::SearchPlan;
use crate::sort::SortMode;

pub const HIGHLIGHT_PRE: &str = "<mark>";
pub const HIGHLIGHT_POST: &str = "</mark>";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Elastic,
    #[default]
    Sqlite,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Elastic => "elastic",
            BackendKind::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub native_knn: bool,
    /// Older full backends reject `max_analyzed_offset` in highlight requests.
    pub legacy_highlight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Facet {
    Mime,
    Tag,
    Path,
}

impl Facet {
    pub fn aggregation_name(self) -> &'static str {
        match self {
            Facet::Mime => "mimeTypes",
            Facet::Tag => "tags",
            Facet::Path => "paths",
        }
    }

    pub fn field(self) -> &'static str {
        match self {
            Facet::Mime => "mime",
            Facet::Tag => "tag",
            Facet::Path => "path",
        }
    }

    pub fn bucket_limit(self) -> usize {
        match self {
            Facet::Mime | Facet::Path => 10_000,
            Facet::Tag => 65_535,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NativeQuery {
    Elastic(Value),
    Sqlite(sqlite::FlatRequest),
}

impl NativeQuery {
    pub fn kind(&self) -> BackendKind {
        match self {
            NativeQuery::Elastic(_) => BackendKind::Elastic,
            NativeQuery::Sqlite(_) => BackendKind::Sqlite,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            NativeQuery::Elastic(body) => body.clone(),
            NativeQuery::Sqlite(flat) => serde_json::to_value(flat).unwrap_or(Value::Null),
        }
    }
}

pub trait QueryCompiler {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> BackendCapabilities;

    fn compile(&self, plan: &SearchPlan<'_>) -> NativeQuery;

    /// Filter-only query with one terms aggregation per facet and no hits.
    fn compile_facets(&self, plan: &SearchPlan<'_>, facets: &[Facet]) -> NativeQuery;

    /// Position to resume after `last` on the next page.
    fn resume_position(&self, mode: &SortMode, last: &Hit) -> CursorPosition;
}

pub fn build_compiler(kind: BackendKind, caps: BackendCapabilities) -> Box<dyn QueryCompiler> {
    match kind {
        BackendKind::Elastic => Box::new(elastic::ElasticCompiler::new(caps)),
        BackendKind::Sqlite => Box::new(sqlite::SqliteCompiler),
    }
}
