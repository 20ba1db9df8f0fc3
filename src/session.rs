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

//! Sequential pagination over one backend.
//!
//! A session holds at most one page request in flight. Each ticket is stamped
//! with the generation of the request it was compiled from, and a response
//! whose ticket predates the latest [`SearchSession::submit`] is dropped.

use tracing::debug;

use crate::compile::BackendKind;
use crate::compile::Facet;
use crate::compile::NativeQuery;
use crate::compile::QueryCompiler;
use crate::cursor::PaginationCursor;
use crate::embed::ModelCatalog;
use crate::error::ConfigurationError;
use crate::error::SearchError;
use crate::normalize::Hit;
use crate::normalize::NormalizeOptions;
use crate::normalize::RawResponse;
use crate::normalize::Totals;
use crate::normalize::normalize;
use crate::normalize::totals;
use crate::request::SearchRequest;
use crate::request::validate;
use crate::request::validate_facets;
use crate::sort::SortMode;
use crate::sort::SortModeRegistry;

#[derive(Debug)]
pub struct PageTicket {
    generation: u64,
    first: bool,
    pub query: NativeQuery,
}

impl PageTicket {
    pub fn is_first_page(&self) -> bool {
        self.first
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    pub hits: Vec<Hit>,
    /// Present on the first page of a request only.
    pub totals: Option<Totals>,
    pub next_cursor: Option<PaginationCursor>,
    pub exhausted: bool,
}

struct Current {
    request: SearchRequest,
    sort: SortMode,
    fingerprint: String,
    cursor: Option<PaginationCursor>,
    exhausted: bool,
}

pub struct SearchSession {
    compiler: Box<dyn QueryCompiler>,
    registry: SortModeRegistry,
    catalog: ModelCatalog,
    max_page_size: usize,
    normalize: NormalizeOptions,
    current: Option<Current>,
    generation: u64,
    in_flight: bool,
}

impl SearchSession {
    pub fn new(
        compiler: Box<dyn QueryCompiler>,
        catalog: ModelCatalog,
        max_page_size: usize,
        normalize: NormalizeOptions,
    ) -> Self {
        Self {
            compiler,
            registry: SortModeRegistry::builtin(),
            catalog,
            max_page_size,
            normalize,
            current: None,
            generation: 0,
            in_flight: false,
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.compiler.kind()
    }

    pub fn registry(&self) -> &SortModeRegistry {
        &self.registry
    }

    /// Compiles one page of `request` without touching session state.
    pub fn compile(&self, request: &SearchRequest) -> Result<NativeQuery, ConfigurationError> {
        let plan = validate(request, &self.registry, &self.catalog, self.max_page_size)?;
        Ok(self.compiler.compile(&plan))
    }

    /// Compiles the facet-only form of `request`. Facet queries share no
    /// cursor state and may run alongside page requests.
    pub fn compile_facets(
        &self,
        request: &SearchRequest,
        facets: &[Facet],
    ) -> Result<NativeQuery, ConfigurationError> {
        let plan = validate_facets(request, &self.registry, &self.catalog)?;
        Ok(self.compiler.compile_facets(&plan, facets))
    }

    /// Replaces the active request. Any page still in flight becomes stale.
    pub fn submit(&mut self, request: SearchRequest) -> Result<(), ConfigurationError> {
        let plan = validate(&request, &self.registry, &self.catalog, self.max_page_size)?;
        let sort = plan.sort;
        let fingerprint = plan.fingerprint.clone();
        let cursor = request.cursor.clone();
        self.generation += 1;
        self.in_flight = false;
        self.current = Some(Current {
            request: SearchRequest {
                cursor: None,
                ..request
            },
            sort,
            fingerprint,
            cursor,
            exhausted: false,
        });
        debug!(generation = self.generation, sort = sort.id, "request submitted");
        Ok(())
    }

    /// Compiles the next page. `None` once results are exhausted or before
    /// any request was submitted.
    pub fn next_page(&mut self) -> Result<Option<PageTicket>, SearchError> {
        if self.in_flight {
            return Err(SearchError::PageInFlight);
        }
        let Some(current) = &self.current else {
            return Ok(None);
        };
        if current.exhausted {
            return Ok(None);
        }
        let request = SearchRequest {
            cursor: current.cursor.clone(),
            ..current.request.clone()
        };
        let plan = validate(&request, &self.registry, &self.catalog, self.max_page_size)?;
        let ticket = PageTicket {
            generation: self.generation,
            first: plan.is_first_page(),
            query: self.compiler.compile(&plan),
        };
        self.in_flight = true;
        Ok(Some(ticket))
    }

    /// Folds a backend response into the session. Returns `None` when the
    /// ticket belongs to a superseded request.
    pub fn accept(
        &mut self,
        ticket: PageTicket,
        raw: &RawResponse,
    ) -> Result<Option<Page>, SearchError> {
        if ticket.generation != self.generation {
            debug!(
                ticket = ticket.generation,
                current = self.generation,
                "discarding stale page"
            );
            return Ok(None);
        }
        self.in_flight = false;
        let Some(current) = self.current.as_mut() else {
            return Ok(None);
        };

        let hits = normalize(raw, &self.normalize)?;
        let totals = if ticket.first { totals(raw) } else { None };
        let exhausted = hits.len() < current.request.page_size;
        let next_cursor = match hits.last() {
            Some(last) if !exhausted => Some(PaginationCursor::new(
                &current.sort,
                current.fingerprint.clone(),
                self.compiler.resume_position(&current.sort, last),
            )),
            _ => None,
        };
        current.exhausted = exhausted;
        if next_cursor.is_some() {
            current.cursor = next_cursor.clone();
        }
        Ok(Some(Page {
            hits,
            totals,
            next_cursor,
            exhausted,
        }))
    }

    /// Records a failed page request. The cursor stays where it was.
    pub fn fail(&mut self, ticket: &PageTicket) {
        if ticket.generation == self.generation {
            self.in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use serde_json::json;

    use super::*;
    use crate::compile::BackendCapabilities;
    use crate::compile::build_compiler;
    use crate::cursor::CursorPosition;

    fn session(kind: BackendKind) -> SearchSession {
        SearchSession::new(
            build_compiler(kind, BackendCapabilities::default()),
            ModelCatalog::default(),
            1000,
            NormalizeOptions::default(),
        )
    }

    fn response(ids: &[&str], with_totals: bool) -> RawResponse {
        let hits: Vec<Value> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                json!({
                    "_id": id,
                    "_score": 1.0,
                    "_source": {"name": format!("{id}.txt"), "path": "a", "size": i * 10},
                    "sort": [(i * 10).to_string(), id],
                })
            })
            .collect();
        let mut raw = json!({"hits": {"hits": hits}});
        if with_totals {
            raw["aggregations"] =
                json!({"total_count": {"value": 42}, "total_size": {"value": 4200}});
        }
        serde_json::from_value(raw).expect("raw")
    }

    fn request(page_size: usize) -> SearchRequest {
        SearchRequest {
            sort: "sizeAsc".into(),
            page_size,
            ..Default::default()
        }
    }

    #[test]
    fn rejects_second_page_while_one_is_in_flight() {
        let mut session = session(BackendKind::Sqlite);
        session.submit(request(2)).expect("submit");
        let ticket = session.next_page().expect("page").expect("ticket");
        assert!(matches!(session.next_page(), Err(SearchError::PageInFlight)));
        session.fail(&ticket);
        assert!(session.next_page().expect("retry").is_some());
    }

    #[test]
    fn totals_arrive_on_first_page_only() {
        let mut session = session(BackendKind::Sqlite);
        session.submit(request(2)).expect("submit");

        let ticket = session.next_page().expect("page").expect("ticket");
        assert!(ticket.is_first_page());
        let page = session
            .accept(ticket, &response(&["a", "b"], true))
            .expect("accept")
            .expect("page");
        assert_eq!(page.totals.map(|t| t.count), Some(42));
        let cursor = page.next_cursor.expect("cursor");
        assert_eq!(
            cursor.position,
            CursorPosition::Marker {
                values: vec!["10".into(), "b".into()]
            }
        );

        let ticket = session.next_page().expect("page").expect("ticket");
        assert!(!ticket.is_first_page());
        let NativeQuery::Sqlite(flat) = &ticket.query else {
            panic!("expected flat request");
        };
        assert_eq!(flat.after, vec!["10".to_string(), "b".to_string()]);
        assert!(!flat.fetch_aggregations);
        let page = session
            .accept(ticket, &response(&["c"], true))
            .expect("accept")
            .expect("page");
        assert!(page.totals.is_none());
        assert!(page.exhausted);
        assert!(page.next_cursor.is_none());
        assert!(session.next_page().expect("done").is_none());
    }

    #[test]
    fn stale_responses_are_discarded() {
        let mut session = session(BackendKind::Elastic);
        session.submit(request(2)).expect("submit");
        let stale = session.next_page().expect("page").expect("ticket");

        session
            .submit(SearchRequest {
                query: "new".into(),
                ..request(2)
            })
            .expect("resubmit");
        assert!(
            session
                .accept(stale, &response(&["x", "y"], true))
                .expect("accept")
                .is_none()
        );

        let fresh = session.next_page().expect("page").expect("ticket");
        assert!(fresh.is_first_page());
    }

    #[test]
    fn full_backend_cursor_replays_sort_values() {
        let mut session = session(BackendKind::Elastic);
        session.submit(request(2)).expect("submit");
        let ticket = session.next_page().expect("page").expect("ticket");
        let page = session
            .accept(ticket, &response(&["a", "b"], false))
            .expect("accept")
            .expect("page");
        assert!(page.totals.is_none());
        let ticket = session.next_page().expect("page").expect("ticket");
        let NativeQuery::Elastic(body) = &ticket.query else {
            panic!("expected nested query");
        };
        assert_eq!(body["search_after"], json!(["10", "b"]));
    }

    #[test]
    fn full_backend_cursor_falls_back_to_key_and_id() {
        let mut session = session(BackendKind::Elastic);
        session.submit(request(2)).expect("submit");
        let ticket = session.next_page().expect("page").expect("ticket");
        let mut raw = response(&["a", "b"], false);
        for hit in &mut raw.hits.hits {
            hit.sort = None;
        }
        session.accept(ticket, &raw).expect("accept").expect("page");
        let ticket = session.next_page().expect("page").expect("ticket");
        let NativeQuery::Elastic(body) = &ticket.query else {
            panic!("expected nested query");
        };
        assert_eq!(body["search_after"], json!([10, "b"]));
    }

    #[test]
    fn invalid_requests_fail_at_submit() {
        let mut session = session(BackendKind::Sqlite);
        assert!(session.submit(request(0)).is_err());
        assert!(session.next_page().expect("nothing").is_none());
    }
}
