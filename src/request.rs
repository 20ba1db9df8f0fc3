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

//! The backend-independent search request and its validation.
//!
//! A [`SearchRequest`] is plain data. [`validate`] resolves its sort mode and
//! embedding model and checks its cursor, producing a [`SearchPlan`] that the
//! compilers consume without any further failure modes.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use tracing::debug;

use crate::cursor::CursorPosition;
use crate::cursor::PaginationCursor;
use crate::embed::EmbeddingModel;
use crate::embed::ModelCatalog;
use crate::error::ConfigurationError;
use crate::sort::SortMode;
use crate::sort::SortModeRegistry;

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMode {
    /// Every selected tag is required.
    #[default]
    All,
    /// Any selected tag matches.
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingQuery {
    pub model: u32,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchRequest {
    pub query: String,
    pub advanced: bool,
    pub fuzzy: bool,
    pub search_in_path: bool,
    pub path: Option<String>,
    pub size_min: Option<u64>,
    pub size_max: Option<u64>,
    pub mtime_min: Option<i64>,
    pub mtime_max: Option<i64>,
    pub index_ids: BTreeSet<String>,
    pub mime_types: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub tag_mode: TagMode,
    pub sort: String,
    pub seed: u64,
    pub page_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<PaginationCursor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingQuery>,
    pub highlight: bool,
    pub fragment_size: Option<usize>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            advanced: false,
            fuzzy: false,
            search_in_path: false,
            path: None,
            size_min: None,
            size_max: None,
            mtime_min: None,
            mtime_max: None,
            index_ids: BTreeSet::new(),
            mime_types: BTreeSet::new(),
            tags: BTreeSet::new(),
            tag_mode: TagMode::All,
            sort: "score".to_string(),
            seed: 0,
            page_size: DEFAULT_PAGE_SIZE,
            cursor: None,
            embedding: None,
            highlight: true,
            fragment_size: None,
        }
    }
}

/// The parts of a request that decide which documents match and in what
/// order. Page size, highlighting and the cursor itself are left out.
#[derive(Serialize)]
struct FingerprintView<'a> {
    query: &'a str,
    advanced: bool,
    fuzzy: bool,
    search_in_path: bool,
    path: Option<String>,
    size: (Option<u64>, Option<u64>),
    mtime: (Option<i64>, Option<i64>),
    index_ids: &'a BTreeSet<String>,
    mime_types: &'a BTreeSet<String>,
    tags: &'a BTreeSet<String>,
    tag_mode: TagMode,
    sort: &'a str,
    seed: u64,
    embedding: Option<&'a EmbeddingQuery>,
}

impl SearchRequest {
    pub fn text(&self) -> Option<&str> {
        let text = self.query.trim();
        (!text.is_empty()).then_some(text)
    }

    pub fn fingerprint(&self) -> String {
        let view = FingerprintView {
            query: self.query.trim(),
            advanced: self.advanced,
            fuzzy: self.fuzzy,
            search_in_path: self.search_in_path,
            path: normalize_path(self.path.as_deref()),
            size: (self.size_min, self.size_max),
            mtime: (self.mtime_min, self.mtime_max),
            index_ids: &self.index_ids,
            mime_types: &self.mime_types,
            tags: &self.tags,
            tag_mode: self.tag_mode,
            sort: &self.sort,
            seed: self.seed,
            embedding: self.embedding.as_ref(),
        };
        let mut hasher = Sha256::new();
        // Serializing plain data into a Vec cannot fail.
        hasher.update(serde_json::to_vec(&view).unwrap_or_default());
        hex::encode(&hasher.finalize()[..12])
    }
}

/// Lower-cases the path filter and strips its trailing separator. An empty
/// result means no path filter.
pub fn normalize_path(path: Option<&str>) -> Option<String> {
    let path = path?.trim().to_lowercase();
    let path = path.trim_end_matches('/');
    (!path.is_empty()).then(|| path.to_string())
}

/// A request whose ids have been resolved against the registry and catalog.
#[derive(Debug, Clone)]
pub struct SearchPlan<'a> {
    pub request: &'a SearchRequest,
    /// Effective sort mode; relevance whenever an embedding is present.
    pub sort: SortMode,
    pub model: Option<&'a EmbeddingModel>,
    pub path: Option<String>,
    pub resume: Option<&'a CursorPosition>,
    pub fingerprint: String,
}

impl SearchPlan<'_> {
    pub fn is_first_page(&self) -> bool {
        self.resume.is_none()
    }

    pub fn page_size(&self) -> usize {
        self.request.page_size
    }

    pub fn embedding(&self) -> Option<(&EmbeddingModel, &[f32])> {
        let model = self.model?;
        let query = self.request.embedding.as_ref()?;
        Some((model, query.vector.as_slice()))
    }
}

pub fn validate<'a>(
    request: &'a SearchRequest,
    registry: &SortModeRegistry,
    catalog: &'a ModelCatalog,
    max_page_size: usize,
) -> Result<SearchPlan<'a>, ConfigurationError> {
    let requested = registry.resolve(&request.sort)?;
    let model = match &request.embedding {
        Some(query) => {
            let model = catalog.resolve(query.model)?;
            model.check_vector(&query.vector)?;
            Some(model)
        }
        None => None,
    };
    let sort = if model.is_some() && !requested.is_relevance() {
        debug!(requested = requested.id, "embedding query forces relevance order");
        registry.relevance()
    } else {
        requested
    };

    if request.page_size == 0 || request.page_size > max_page_size {
        return Err(ConfigurationError::PageSize {
            size: request.page_size,
            max: max_page_size,
        });
    }
    if request.path.as_deref().is_some_and(|p| p.contains('*')) {
        return Err(ConfigurationError::WildcardPath);
    }

    let fingerprint = request.fingerprint();
    let resume = match &request.cursor {
        Some(cursor) => Some(cursor.resume_under(&sort, &fingerprint)?),
        None => None,
    };

    Ok(SearchPlan {
        request,
        sort,
        model,
        path: normalize_path(request.path.as_deref()),
        resume,
        fingerprint,
    })
}

/// Validation for facet-only queries: paging fields are ignored.
pub fn validate_facets<'a>(
    request: &'a SearchRequest,
    registry: &SortModeRegistry,
    catalog: &'a ModelCatalog,
) -> Result<SearchPlan<'a>, ConfigurationError> {
    let sort = registry.resolve(&request.sort)?;
    if let Some(query) = &request.embedding {
        catalog.resolve(query.model)?.check_vector(&query.vector)?;
    }
    if request.path.as_deref().is_some_and(|p| p.contains('*')) {
        return Err(ConfigurationError::WildcardPath);
    }
    Ok(SearchPlan {
        request,
        sort,
        model: None,
        path: normalize_path(request.path.as_deref()),
        resume: None,
        fingerprint: request.fingerprint(),
    })
}
