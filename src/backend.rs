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

use crate::compile::BackendCapabilities;
use crate::compile::BackendKind;
use crate::compile::NativeQuery;
use crate::config::ConfigCtx;
use crate::elastic::ElasticBackend;
use crate::error::SearchError;
use crate::normalize::RawResponse;
use crate::store::Store;
use crate::store::StoreMode;
use crate::tag::TagMutation;

/// Something that can execute a compiled query and apply tag writes.
pub trait SearchBackend {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> BackendCapabilities;

    fn execute(&self, query: &NativeQuery) -> Result<RawResponse, SearchError>;

    fn mutate_tag(&self, mutation: &TagMutation) -> Result<(), SearchError>;
}

fn mismatch(expected: BackendKind, query: &NativeQuery) -> SearchError {
    SearchError::Backend(format!(
        "{} backend cannot execute a {} query",
        expected.as_str(),
        query.kind().as_str()
    ))
}

impl SearchBackend for Store {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    fn execute(&self, query: &NativeQuery) -> Result<RawResponse, SearchError> {
        match query {
            NativeQuery::Sqlite(flat) => self.search(flat),
            other => Err(mismatch(BackendKind::Sqlite, other)),
        }
    }

    fn mutate_tag(&self, mutation: &TagMutation) -> Result<(), SearchError> {
        self.apply_tag(mutation)
    }
}

impl SearchBackend for ElasticBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Elastic
    }

    fn capabilities(&self) -> BackendCapabilities {
        ElasticBackend::capabilities(self)
    }

    fn execute(&self, query: &NativeQuery) -> Result<RawResponse, SearchError> {
        match query {
            NativeQuery::Elastic(body) => self.search(body),
            other => Err(mismatch(BackendKind::Elastic, other)),
        }
    }

    fn mutate_tag(&self, mutation: &TagMutation) -> Result<(), SearchError> {
        self.apply_tag(mutation)
    }
}

/// Opens the backend named by the configuration.
pub fn open_backend(ctx: &ConfigCtx, mode: StoreMode) -> Result<Box<dyn SearchBackend>> {
    match ctx.config.backend {
        BackendKind::Sqlite => Ok(Box::new(Store::open(&ctx.store_path(), mode)?)),
        BackendKind::Elastic => Ok(Box::new(ElasticBackend::new(&ctx.config.elastic)?)),
    }
}
