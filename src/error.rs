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

//! Error types shared by request validation, compilation and execution.

use thiserror::Error;

/// Problems with a request that are detected before anything reaches a backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("unknown sort mode '{0}'")]
    UnknownSortMode(String),

    #[error("unknown embedding model {0}")]
    UnknownModel(u32),

    #[error("embedding vector is empty")]
    EmptyEmbedding,

    #[error("embedding vector has {actual} dimensions but model {model} expects {expected}")]
    DimensionMismatch {
        model: u32,
        expected: usize,
        actual: usize,
    },

    #[error("page size {size} is outside 1..={max}")]
    PageSize { size: usize, max: usize },

    #[error("path filter may not contain '*'")]
    WildcardPath,

    #[error("cursor was produced under sort mode '{cursor}' but the request uses '{request}'")]
    CursorSortMismatch { cursor: String, request: String },

    #[error("cursor belongs to a different query; restart from the first page")]
    StaleCursor,

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("search backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("query syntax error: {0}")]
    QuerySyntax(String),

    #[error("a page request is already in flight for this session")]
    PageInFlight,

    #[error("backend error: {0}")]
    Backend(String),

    #[error("malformed backend response: {0}")]
    MalformedResponse(#[from] serde_json::Error),
}

impl SearchError {
    /// Stable machine-readable code used in JSON error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            SearchError::Configuration(_) => "configuration",
            SearchError::BackendUnavailable(_) => "backend_unavailable",
            SearchError::QuerySyntax(_) => "query_syntax",
            SearchError::PageInFlight => "page_in_flight",
            SearchError::Backend(_) | SearchError::MalformedResponse(_) => "backend",
        }
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(err: rusqlite::Error) -> Self {
        let message = err.to_string();
        if is_fts5_syntax_error(&message) {
            SearchError::QuerySyntax(message)
        } else {
            SearchError::Backend(message)
        }
    }
}

fn is_fts5_syntax_error(message: &str) -> bool {
    message.contains("fts5: syntax error") || message.contains("unterminated string")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fts5_parse_failures_map_to_query_syntax() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(1),
            Some("fts5: syntax error near \"(\"".to_string()),
        );
        let mapped = SearchError::from(err);
        assert!(matches!(mapped, SearchError::QuerySyntax(_)));
        assert_eq!(mapped.code(), "query_syntax");
    }

    #[test]
    fn configuration_errors_keep_their_code() {
        let err = SearchError::from(ConfigurationError::UnknownSortMode("bogus".into()));
        assert_eq!(err.code(), "configuration");
        assert_eq!(err.to_string(), "unknown sort mode 'bogus'");
    }
}
