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

//! Blocking HTTP client for the full-featured document index.

use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::Value;
use serde_json::json;
use tracing::debug;
use tracing::warn;

use crate::compile::BackendCapabilities;
use crate::config::ElasticConfig;
use crate::error::SearchError;
use crate::normalize::RawResponse;
use crate::tag::TAG_SEPARATOR;
use crate::tag::TagAction;
use crate::tag::TagMutation;

/// Error types the index reports for queries it cannot parse.
const SYNTAX_ERROR_TYPES: [&str; 5] = [
    "parse_exception",
    "query_shard_exception",
    "query_parsing_exception",
    "search_phase_execution_exception",
    "x_content_parse_exception",
];

const ADD_TAG_SCRIPT: &str = "if (ctx._source.tag == null) { ctx._source.tag = new ArrayList(); } \
     if (!ctx._source.tag.contains(params.tag)) { ctx._source.tag.add(params.tag); }";
const REMOVE_TAG_SCRIPT: &str = "if (ctx._source.tag != null) { \
     ctx._source.tag.removeIf(t -> t == params.tag || (!params.exact && t.startsWith(params.prefix))); }";

pub struct ElasticBackend {
    client: Client,
    base_url: String,
    index: String,
    caps: BackendCapabilities,
}

impl ElasticBackend {
    pub fn new(config: &ElasticConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(concat!("quarry/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            caps: config.capabilities(),
        })
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.caps
    }

    pub fn search_url(&self) -> String {
        format!("{}/{}/_search", self.base_url, self.index)
    }

    fn update_url(&self, id: &str) -> String {
        format!("{}/{}/_update/{}?refresh=wait_for", self.base_url, self.index, id)
    }

    pub fn search(&self, body: &Value) -> Result<RawResponse, SearchError> {
        let url = self.search_url();
        debug!(%url, "full backend search");
        let text = self.post(&url, body)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn apply_tag(&self, mutation: &TagMutation) -> Result<(), SearchError> {
        let url = self.update_url(&mutation.doc_id);
        self.post(&url, &tag_update_body(mutation))?;
        Ok(())
    }

    fn post(&self, url: &str, body: &Value) -> Result<String, SearchError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(transport_error)?;
        let status = response.status();
        let text = response.text().map_err(transport_error)?;
        if status.is_success() {
            Ok(text)
        } else {
            let err = classify_failure(status, &text);
            warn!(%status, code = err.code(), "full backend rejected request");
            Err(err)
        }
    }
}

fn transport_error(err: reqwest::Error) -> SearchError {
    if err.is_connect() || err.is_timeout() {
        SearchError::BackendUnavailable(err.to_string())
    } else {
        SearchError::Backend(err.to_string())
    }
}

/// Maps a non-success response to a search error by status and reported type.
pub fn classify_failure(status: StatusCode, body: &str) -> SearchError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let reason = error
        .and_then(|e| e.get("reason"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"));

    if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::BAD_GATEWAY {
        return SearchError::BackendUnavailable(reason);
    }
    if status == StatusCode::BAD_REQUEST && error.is_some_and(is_syntax_error) {
        return SearchError::QuerySyntax(reason);
    }
    SearchError::Backend(reason)
}

fn is_syntax_error(error: &Value) -> bool {
    let is_syntax_type = |value: &Value| {
        value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|ty| SYNTAX_ERROR_TYPES.contains(&ty))
    };
    is_syntax_type(error)
        || error
            .get("root_cause")
            .and_then(Value::as_array)
            .is_some_and(|causes| causes.iter().any(is_syntax_type))
}

pub fn tag_update_body(mutation: &TagMutation) -> Value {
    let value = mutation.stored_value();
    match mutation.action {
        TagAction::Add => json!({
            "script": {
                "lang": "painless",
                "source": ADD_TAG_SCRIPT,
                "params": { "tag": value },
            }
        }),
        TagAction::Remove => json!({
            "script": {
                "lang": "painless",
                "source": REMOVE_TAG_SCRIPT,
                "params": {
                    "tag": value,
                    "exact": mutation.color.is_some(),
                    "prefix": format!("{}{TAG_SEPARATOR}#", mutation.label),
                },
            }
        }),
    }
}
