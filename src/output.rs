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

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::normalize::Totals;

#[derive(Debug, Clone, Serialize, Default)]
pub struct TimingBreakdown {
    pub compile_ms: i64,
    pub backend_ms: i64,
    pub normalize_ms: i64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct StatsOut {
    pub took_ms: i64,
    pub pages: usize,
    pub hits: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<TimingBreakdown>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOut {
    pub backend: String,
    pub sort: String,
    pub page_size: usize,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorOut {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct JsonResponse {
    pub ok: bool,
    pub schema_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facets: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<Totals>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorOut>,
}

impl JsonResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            schema_version: "1".to_string(),
            ..Default::default()
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self {
            ok: false,
            schema_version: "1".to_string(),
            error: Some(ErrorOut {
                code: code.to_string(),
                message: message.to_string(),
                details: None,
            }),
            ..Default::default()
        }
    }

    pub fn with_details(mut self, details: Option<String>) -> Self {
        if let Some(error) = &mut self.error {
            error.details = details;
        }
        self
    }

    pub fn with_query(mut self, query: QueryOut) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_native(mut self, native: Value) -> Self {
        self.native = Some(native);
        self
    }

    pub fn with_summary(mut self, summary: Value) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn with_results(mut self, results: Vec<Value>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn with_facets(mut self, facets: Value) -> Self {
        self.facets = Some(facets);
        self
    }

    pub fn with_totals(mut self, totals: Option<Totals>) -> Self {
        self.totals = totals;
        self
    }

    pub fn with_stats(mut self, stats: StatsOut) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_next_cursor(mut self, cursor: Option<String>) -> Self {
        self.next_cursor = cursor;
        self
    }
}

pub fn print_json(resp: &JsonResponse) -> Result<()> {
    let text = serde_json::to_string_pretty(resp)?;
    println!("{text}");
    Ok(())
}

pub fn print_value(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    println!("{text}");
    Ok(())
}
