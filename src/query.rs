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

//! Compile, execute and normalize: the search pipeline the commands drive.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use serde_json::Value;
use serde_json::json;
use tracing::debug;

use crate::backend::SearchBackend;
use crate::compile::Facet;
use crate::compile::build_compiler;
use crate::config::Config;
use crate::cursor::PaginationCursor;
use crate::error::SearchError;
use crate::normalize::FacetBucket;
use crate::normalize::Totals;
use crate::normalize::buckets;
use crate::output::TimingBreakdown;
use crate::request::SearchRequest;
use crate::session::Page;
use crate::session::SearchSession;
use crate::taxonomy::TaxonomyNode;
use crate::taxonomy::mime_tree;
use crate::taxonomy::path_tree;
use crate::taxonomy::tag_tree;

#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub pages: Vec<Page>,
    pub totals: Option<Totals>,
    pub next_cursor: Option<PaginationCursor>,
    pub timings: TimingBreakdown,
}

impl SearchOutcome {
    pub fn hit_count(&self) -> usize {
        self.pages.iter().map(|page| page.hits.len()).sum()
    }

    pub fn results(&self) -> Vec<Value> {
        self.pages
            .iter()
            .flat_map(|page| page.hits.iter())
            .map(|hit| serde_json::to_value(hit).unwrap_or(Value::Null))
            .collect()
    }
}

/// Reads a request from a JSON file, or stdin for `-`. Paging and fragment
/// sizes the file leaves out come from the configuration.
pub fn load_request(path: &Path, config: &Config) -> Result<SearchRequest> {
    let text = read_input(path)?;
    let mut value: Value =
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    if let Some(obj) = value.as_object_mut() {
        obj.entry("pageSize").or_insert(json!(config.page_size));
        obj.entry("fragmentSize").or_insert(json!(config.fragment_size));
    }
    serde_json::from_value(value).with_context(|| format!("invalid request in {}", path.display()))
}

pub fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

pub fn build_session(config: &Config) -> SearchSession {
    SearchSession::new(
        build_compiler(config.backend, config.capabilities()),
        config.catalog(),
        config.max_page_size,
        config.normalize_options(),
    )
}

/// Fetches up to `max_pages` pages of `request` in order.
pub fn run_pages(
    session: &mut SearchSession,
    backend: &dyn SearchBackend,
    request: SearchRequest,
    max_pages: usize,
) -> Result<SearchOutcome, SearchError> {
    let mut outcome = SearchOutcome::default();
    session.submit(request)?;

    for _ in 0..max_pages {
        let compile_start = Instant::now();
        let Some(ticket) = session.next_page()? else {
            break;
        };
        outcome.timings.compile_ms += compile_start.elapsed().as_millis() as i64;

        let backend_start = Instant::now();
        let raw = match backend.execute(&ticket.query) {
            Ok(raw) => raw,
            Err(err) => {
                session.fail(&ticket);
                return Err(err);
            }
        };
        outcome.timings.backend_ms += backend_start.elapsed().as_millis() as i64;

        let normalize_start = Instant::now();
        let Some(page) = session.accept(ticket, &raw)? else {
            break;
        };
        outcome.timings.normalize_ms += normalize_start.elapsed().as_millis() as i64;

        if page.totals.is_some() {
            outcome.totals = page.totals;
        }
        outcome.next_cursor = page.next_cursor.clone();
        let exhausted = page.exhausted;
        outcome.pages.push(page);
        if exhausted {
            break;
        }
    }
    debug!(
        pages = outcome.pages.len(),
        hits = outcome.hit_count(),
        "search finished"
    );
    Ok(outcome)
}

pub fn facet_tree(facet: Facet, raw_buckets: &[FacetBucket]) -> Vec<TaxonomyNode> {
    match facet {
        Facet::Mime => mime_tree(raw_buckets),
        Facet::Tag => tag_tree(raw_buckets),
        Facet::Path => path_tree(raw_buckets),
    }
}

/// Runs the facet-only query and builds one tree per facet, keyed by the
/// facet's aggregation name.
pub fn run_facets(
    session: &SearchSession,
    backend: &dyn SearchBackend,
    request: &SearchRequest,
    facets: &[Facet],
) -> Result<BTreeMap<String, Vec<TaxonomyNode>>, SearchError> {
    let query = session.compile_facets(request, facets)?;
    let raw = backend.execute(&query)?;
    let mut trees = BTreeMap::new();
    for facet in facets {
        let facet_buckets = buckets(&raw, *facet)?;
        trees.insert(
            facet.aggregation_name().to_string(),
            facet_tree(*facet, &facet_buckets),
        );
    }
    Ok(trees)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::Map;
    use tempfile::tempdir;

    use super::*;
    use crate::compile::BackendCapabilities;
    use crate::compile::BackendKind;
    use crate::compile::NativeQuery;
    use crate::normalize::RawResponse;
    use crate::store::Store;
    use crate::store::StoreMode;
    use crate::store::StoredDocument;
    use crate::tag::TagMutation;

    fn store_with(docs: &[(&str, &str, &[&str])]) -> (tempfile::TempDir, Store) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("quarry.db");
        Store::init(&path).expect("init");
        let store = Store::open(&path, StoreMode::ReadWrite).expect("open");
        for (i, (id, mime, tags)) in docs.iter().enumerate() {
            let mut data = Map::new();
            data.insert("name".into(), json!(format!("{id}.bin")));
            data.insert("path".into(), json!("root"));
            data.insert("mime".into(), json!(mime));
            data.insert("size".into(), json!(i));
            store
                .upsert_document(&StoredDocument {
                    id: id.to_string(),
                    index: "main".into(),
                    path: "root".into(),
                    name: format!("{id}.bin"),
                    mime: Some(mime.to_string()),
                    size: Some(i as i64),
                    mtime: Some(0),
                    tags: tags.iter().map(|t| t.to_string()).collect(),
                    data,
                    ..Default::default()
                })
                .expect("insert");
        }
        (dir, store)
    }

    fn sqlite_session() -> SearchSession {
        build_session(&Config::default())
    }

    #[test]
    fn pages_until_exhausted() {
        let docs: Vec<(String, &str, &[&str])> = (0..5)
            .map(|i| (format!("d{i}"), "text/plain", &[][..]))
            .collect();
        let refs: Vec<(&str, &str, &[&str])> =
            docs.iter().map(|(id, m, t)| (id.as_str(), *m, *t)).collect();
        let (_dir, store) = store_with(&refs);
        let mut session = sqlite_session();
        let request = SearchRequest {
            sort: "sizeDesc".into(),
            page_size: 2,
            ..Default::default()
        };
        let outcome = run_pages(&mut session, &store, request, 10).expect("search");
        assert_eq!(outcome.pages.len(), 3);
        let ids: Vec<String> = outcome
            .pages
            .iter()
            .flat_map(|p| p.hits.iter().map(|h| h.id.clone()))
            .collect();
        assert_eq!(ids, vec!["d4", "d3", "d2", "d1", "d0"]);
        assert_eq!(outcome.totals.map(|t| t.count), Some(5));
        assert_eq!(outcome.totals.map(|t| t.size), Some(10));
        assert!(outcome.next_cursor.is_none());
    }

    #[test]
    fn page_limit_leaves_a_cursor() {
        let (_dir, store) = store_with(&[
            ("a", "text/plain", &[]),
            ("b", "text/plain", &[]),
            ("c", "text/plain", &[]),
        ]);
        let mut session = sqlite_session();
        let request = SearchRequest {
            sort: "nameAsc".into(),
            page_size: 1,
            ..Default::default()
        };
        let outcome = run_pages(&mut session, &store, request.clone(), 1).expect("search");
        let cursor = outcome.next_cursor.expect("cursor");

        let resumed = SearchRequest {
            cursor: Some(cursor),
            ..request
        };
        let rest = run_pages(&mut session, &store, resumed, 10).expect("resume");
        let ids: Vec<String> = rest
            .pages
            .iter()
            .flat_map(|p| p.hits.iter().map(|h| h.id.clone()))
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(rest.totals.is_none());
    }

    #[test]
    fn facet_trees_are_built_per_facet() {
        let (_dir, store) = store_with(&[
            ("a", "image/png", &["trip.beach.#ff0000"]),
            ("b", "image/jpeg", &["trip.beach"]),
            ("c", "video/mp4", &["work"]),
        ]);
        let session = sqlite_session();
        let trees = run_facets(
            &session,
            &store,
            &SearchRequest::default(),
            &[Facet::Mime, Facet::Tag],
        )
        .expect("facets");
        let mime = &trees["mimeTypes"];
        let tops: Vec<&str> = mime.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(tops, vec!["image", "video"]);
        assert_eq!(mime[0].total_count(), 2);

        let tags = &trees["tags"];
        let trip = tags.iter().find(|n| n.text == "trip").expect("trip");
        let beach = &trip.children[0];
        assert_eq!(beach.text, "beach");
        let leaf = beach.leaf.as_ref().expect("leaf");
        assert_eq!(leaf.count, Some(2));
        assert_eq!(leaf.color.as_deref(), Some("#ff0000"));
    }

    struct Failing {
        calls: Cell<usize>,
    }

    impl SearchBackend for Failing {
        fn kind(&self) -> BackendKind {
            BackendKind::Sqlite
        }

        fn capabilities(&self) -> BackendCapabilities {
            BackendCapabilities::default()
        }

        fn execute(&self, _query: &NativeQuery) -> Result<RawResponse, SearchError> {
            self.calls.set(self.calls.get() + 1);
            Err(SearchError::BackendUnavailable("down".into()))
        }

        fn mutate_tag(&self, _mutation: &TagMutation) -> Result<(), SearchError> {
            Ok(())
        }
    }

    #[test]
    fn failures_surface_without_retry_and_free_the_session() {
        let backend = Failing {
            calls: Cell::new(0),
        };
        let mut session = sqlite_session();
        let err = run_pages(&mut session, &backend, SearchRequest::default(), 3)
            .expect_err("unavailable");
        assert_eq!(err.code(), "backend_unavailable");
        assert_eq!(backend.calls.get(), 1);
        assert!(session.next_page().expect("free").is_some());
    }
}
