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

//! Local SQLite/FTS5 store answering the reduced backend's flat requests in
//! the full backend's raw response shape.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::functions::FunctionFlags;
use rusqlite::params;
use rusqlite::types::Value as SqlValue;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use tracing::debug;

use crate::compile::Facet;
use crate::compile::HIGHLIGHT_POST;
use crate::compile::HIGHLIGHT_PRE;
use crate::compile::sqlite::FlatRequest;
use crate::compile::sqlite::FlatSort;
use crate::embed::cosine_similarity;
use crate::embed::from_bytes;
use crate::embed::to_bytes;
use crate::error::ConfigurationError;
use crate::error::SearchError;
use crate::normalize::RawHit;
use crate::normalize::RawResponse;
use crate::sql::SqlColumn;
use crate::sql::SqlExpr;
use crate::sql::SqlFragment;
use crate::sql::SqlJoin;
use crate::sql::SqlOrderBy;
use crate::sql::SqlOrderDir;
use crate::sql::SqlSelectBuilder;
use crate::sql::SqlSelectItem;
use crate::sql::SqlTable;
use crate::sql::with_ranked;
use crate::tag::TAG_SEPARATOR;
use crate::tag::TagAction;
use crate::tag::TagMutation;

const SCHEMA_VERSION: i64 = 1;
const FTS_VERSION: &str = "fts5-unicode61-v1";
const RANDOM_WEIGHT: f64 = 1000.0;
/// bm25 column weights for name, content and path.
const BM25_WEIGHTS: &str = "8.0, 3.0, 5.0";

pub struct Store {
    pub conn: Connection,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub enum StoreMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub documents: i64,
    pub tags: i64,
    pub embeddings: i64,
    pub db_size_bytes: u64,
}

/// One document as written by the importer. `data` is the stored source
/// minus content, tags and vectors, which live in their own tables.
#[derive(Debug, Clone, Default)]
pub struct StoredDocument {
    pub id: String,
    pub index: String,
    pub path: String,
    pub name: String,
    pub mime: Option<String>,
    pub size: Option<i64>,
    pub mtime: Option<i64>,
    pub content: Option<String>,
    pub tags: Vec<String>,
    pub embeddings: Vec<(u32, Vec<f32>)>,
    pub data: Map<String, Value>,
}

impl Store {
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("store already exists at {}", path.display());
        }
        let conn = Self::open_connection(path, StoreMode::ReadWrite)?;
        Self::apply_pragmas(&conn, StoreMode::ReadWrite)?;
        Self::create_schema(&conn)?;
        Self::set_meta(&conn, "schema_version", &SCHEMA_VERSION.to_string())?;
        Self::set_meta(&conn, "fts_version", FTS_VERSION)?;
        Ok(())
    }

    pub fn open(path: &Path, mode: StoreMode) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("no store at {}; run `quarry init` first", path.display());
        }
        let mut conn = Self::open_connection(path, mode)?;
        Self::apply_pragmas(&conn, mode)?;
        if matches!(mode, StoreMode::ReadWrite) {
            Self::migrate(&conn)?;
        } else if Self::schema_version(&conn)? != SCHEMA_VERSION {
            drop(conn);
            let conn_rw = Self::open_connection(path, StoreMode::ReadWrite)?;
            Self::apply_pragmas(&conn_rw, StoreMode::ReadWrite)?;
            Self::migrate(&conn_rw)?;
            drop(conn_rw);
            conn = Self::open_connection(path, StoreMode::ReadOnly)?;
            Self::apply_pragmas(&conn, StoreMode::ReadOnly)?;
        }
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    fn open_connection(path: &Path, mode: StoreMode) -> Result<Connection> {
        let flags = match mode {
            StoreMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            StoreMode::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        };
        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("open {}", path.display()))?;
        conn.busy_timeout(Duration::from_millis(5000))
            .context("set busy timeout")?;
        register_functions(&conn)?;
        Ok(conn)
    }

    fn apply_pragmas(conn: &Connection, mode: StoreMode) -> Result<()> {
        let mut batch = String::from("PRAGMA foreign_keys=ON;");
        if matches!(mode, StoreMode::ReadWrite) {
            batch = format!("PRAGMA journal_mode=DELETE;\nPRAGMA synchronous=NORMAL;\n{batch}");
        }
        conn.execute_batch(&batch).context("apply pragmas")?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (\n  key TEXT PRIMARY KEY,\n  value TEXT\n);\n\nCREATE TABLE IF NOT EXISTS document (\n  seq INTEGER PRIMARY KEY,\n  id TEXT UNIQUE NOT NULL,\n  index_id TEXT NOT NULL,\n  path TEXT NOT NULL,\n  name TEXT NOT NULL,\n  mime TEXT,\n  size INTEGER,\n  mtime INTEGER,\n  json_data TEXT NOT NULL\n);\n\nCREATE TABLE IF NOT EXISTS tag (\n  id TEXT NOT NULL,\n  tag TEXT NOT NULL,\n  PRIMARY KEY (id, tag)\n);\n\nCREATE TABLE IF NOT EXISTS embedding (\n  id TEXT NOT NULL,\n  model_id INTEGER NOT NULL,\n  embedding BLOB NOT NULL,\n  PRIMARY KEY (id, model_id)\n);\n\nCREATE INDEX IF NOT EXISTS idx_document_path ON document(path);\nCREATE INDEX IF NOT EXISTS idx_document_mime ON document(mime);\nCREATE INDEX IF NOT EXISTS idx_tag_tag ON tag(tag);\n\nCREATE VIRTUAL TABLE IF NOT EXISTS search USING fts5(name, content, path, tokenize = 'unicode61 remove_diacritics 2');",
        )
        .context("create schema")?;
        Ok(())
    }

    fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .context("set meta")?;
        Ok(())
    }

    fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                params![name],
                |row| row.get(0),
            )
            .context("check table")?;
        Ok(count > 0)
    }

    fn schema_version(conn: &Connection) -> Result<i64> {
        if !Self::table_exists(conn, "meta")? {
            return Ok(0);
        }
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key='schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("read schema_version")?;
        Ok(value.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0))
    }

    fn migrate(conn: &Connection) -> Result<()> {
        let version = Self::schema_version(conn)?;
        if version > SCHEMA_VERSION {
            anyhow::bail!(
                "store schema version {} is newer than supported {}",
                version,
                SCHEMA_VERSION
            );
        }
        if version == SCHEMA_VERSION {
            return Ok(());
        }
        Self::create_schema(conn)?;
        Self::set_meta(conn, "schema_version", &SCHEMA_VERSION.to_string())?;
        Self::set_meta(conn, "fts_version", FTS_VERSION)?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let count = |table: &str| -> Result<i64> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .with_context(|| format!("count {table}"))
        };
        let db_size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        Ok(StoreStats {
            documents: count("document")?,
            tags: count("tag")?,
            embeddings: count("embedding")?,
            db_size_bytes,
        })
    }

    /// Inserts or replaces a document with its full-text row, tags and vectors.
    pub fn upsert_document(&self, doc: &StoredDocument) -> Result<()> {
        self.delete_document(&doc.id)?;
        let json_data = serde_json::to_string(&doc.data).context("serialize document")?;
        self.conn
            .execute(
                "INSERT INTO document (id, index_id, path, name, mime, size, mtime, json_data) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    doc.id, doc.index, doc.path, doc.name, doc.mime, doc.size, doc.mtime, json_data
                ],
            )
            .with_context(|| format!("insert document {}", doc.id))?;
        let seq = self.conn.last_insert_rowid();
        self.conn
            .execute(
                "INSERT INTO search (rowid, name, content, path) VALUES (?1, ?2, ?3, ?4)",
                params![
                    seq,
                    crate::escape::decode(&doc.name),
                    doc.content.as_deref().unwrap_or_default(),
                    crate::escape::decode(&doc.path)
                ],
            )
            .context("index document text")?;
        for tag in &doc.tags {
            self.conn.execute(
                "INSERT OR IGNORE INTO tag (id, tag) VALUES (?1, ?2)",
                params![doc.id, tag],
            )?;
        }
        for (model_id, vector) in &doc.embeddings {
            self.conn.execute(
                "INSERT OR REPLACE INTO embedding (id, model_id, embedding) VALUES (?1, ?2, ?3)",
                params![doc.id, model_id, to_bytes(vector)],
            )?;
        }
        Ok(())
    }

    fn delete_document(&self, id: &str) -> Result<()> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT seq FROM document WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        if let Some(seq) = seq {
            self.conn
                .execute("DELETE FROM search WHERE rowid = ?1", params![seq])?;
            self.conn
                .execute("DELETE FROM document WHERE seq = ?1", params![seq])?;
        }
        self.conn
            .execute("DELETE FROM tag WHERE id = ?1", params![id])?;
        self.conn
            .execute("DELETE FROM embedding WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn apply_tag(&self, mutation: &TagMutation) -> Result<(), SearchError> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT seq FROM document WHERE id = ?1",
                params![mutation.doc_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(SearchError::Backend(format!(
                "document {} not found",
                mutation.doc_id
            )));
        }
        let value = mutation.stored_value();
        match mutation.action {
            TagAction::Add => {
                self.conn.execute(
                    "INSERT OR IGNORE INTO tag (id, tag) VALUES (?1, ?2)",
                    params![mutation.doc_id, value],
                )?;
            }
            TagAction::Remove if mutation.color.is_some() => {
                self.conn.execute(
                    "DELETE FROM tag WHERE id = ?1 AND tag = ?2",
                    params![mutation.doc_id, value],
                )?;
            }
            TagAction::Remove => {
                let colored = format!("{}{TAG_SEPARATOR}#%", like_escape(&mutation.label));
                self.conn.execute(
                    "DELETE FROM tag WHERE id = ?1 AND (tag = ?2 OR tag LIKE ?3 ESCAPE '\\')",
                    params![mutation.doc_id, mutation.label, colored],
                )?;
            }
        }
        Ok(())
    }

    /// Executes a flat request.
    pub fn search(&self, req: &FlatRequest) -> Result<RawResponse, SearchError> {
        let started = Instant::now();
        let filters = filter_fragments(req);
        let mut response = RawResponse::default();

        if req.is_facet_query() {
            let mut aggregations = Map::new();
            for facet in &req.facets {
                let buckets = self.facet_buckets(*facet, filters.clone())?;
                aggregations.insert(
                    facet.aggregation_name().to_string(),
                    json!({ "buckets": buckets }),
                );
            }
            response.aggregations = Some(aggregations);
            response.took = Some(started.elapsed().as_millis() as u64);
            return Ok(response);
        }

        let plan = PagePlan::new(req, filters)?;
        if req.page_size > 0 {
            response.hits.hits = self.page(req, &plan)?;
        }
        if req.fetch_aggregations {
            let (count, size) = self.totals(&plan)?;
            response.hits.total = Some(json!({ "value": count }));
            let mut aggregations = Map::new();
            aggregations.insert("total_count".to_string(), json!({ "value": count }));
            aggregations.insert("total_size".to_string(), json!({ "value": size }));
            response.aggregations = Some(aggregations);
        }
        response.took = Some(started.elapsed().as_millis() as u64);
        debug!(
            hits = response.hits.hits.len(),
            took_ms = response.took,
            "reduced backend query"
        );
        Ok(response)
    }

    fn page(&self, req: &FlatRequest, plan: &PagePlan) -> Result<Vec<RawHit>, SearchError> {
        let dir = SqlOrderDir::from_asc(req.sort_asc);
        let mut items = vec![
            SqlSelectItem::new(SqlExpr::column(SqlColumn::DocumentId)).alias("id"),
            SqlSelectItem::new(SqlExpr::column(SqlColumn::DocumentIndex)).alias("index_id"),
            SqlSelectItem::new(SqlExpr::column(SqlColumn::DocumentData)).alias("json_data"),
            SqlSelectItem::new(plan.score.clone()).alias("score"),
            SqlSelectItem::new(plan.sort_key(req)).alias("sort_key"),
        ];
        let highlight = req.highlight && plan.match_expr.is_some();
        if highlight {
            items.push(
                SqlSelectItem::new(SqlExpr::raw(format!(
                    "highlight(search, 0, '{HIGHLIGHT_PRE}', '{HIGHLIGHT_POST}')"
                )))
                .alias("hl_name"),
            );
            items.push(
                SqlSelectItem::new(SqlExpr::raw(format!(
                    "snippet(search, 1, '{HIGHLIGHT_PRE}', '{HIGHLIGHT_POST}', '…', {})",
                    req.highlight_context_size.clamp(1, 64)
                )))
                .alias("hl_content"),
            );
            if req.search_in_path {
                items.push(
                    SqlSelectItem::new(SqlExpr::raw(format!(
                        "highlight(search, 2, '{HIGHLIGHT_PRE}', '{HIGHLIGHT_POST}')"
                    )))
                    .alias("hl_path"),
                );
            }
        }

        let inner = plan.from().select(items).where_clause(plan.where_clause());
        let outer = SqlSelectBuilder::new(SqlTable::Ranked)
            .where_clause(resume_clause(req, dir)?)
            .order_by(SqlOrderBy::new(SqlExpr::alias("sort_key"), dir))
            .order_by(SqlOrderBy::asc(SqlExpr::alias("id")))
            .limit(req.page_size);
        let (sql, params) = with_ranked(inner, outer);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            read_page_row(row, highlight, req.search_in_path)
        })?;
        let mut pages = Vec::new();
        for row in rows {
            pages.push(row?);
        }

        let scored = plan.match_expr.is_some() || req.embedding.is_some();
        let mut tag_stmt = self
            .conn
            .prepare_cached("SELECT tag FROM tag WHERE id = ?1 ORDER BY tag")?;
        let mut hits = Vec::with_capacity(pages.len());
        for row in pages {
            let mut source: Map<String, Value> = serde_json::from_str(&row.json_data)?;
            let tags = tag_stmt
                .query_map(params![row.id], |r| r.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            source.insert("tag".to_string(), json!(tags));
            source
                .entry("index".to_string())
                .or_insert_with(|| json!(row.index_id));
            hits.push(RawHit {
                id: row.id.clone(),
                index: Some(row.index_id),
                score: scored.then_some(row.score),
                source,
                highlight: row.highlight,
                sort: Some(vec![json!(row.sort_key), json!(row.id)]),
            });
        }
        Ok(hits)
    }

    fn totals(&self, plan: &PagePlan) -> Result<(u64, u64), SearchError> {
        let (sql, params) = plan
            .from()
            .select([
                SqlSelectItem::new(SqlExpr::raw("COUNT(*)")),
                SqlSelectItem::new(SqlExpr::raw("IFNULL(SUM(document.size), 0)")),
            ])
            .where_clause(plan.where_clause())
            .build();
        let (count, size): (i64, i64) = self
            .conn
            .query_row(&sql, rusqlite::params_from_iter(params), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
        Ok((count.max(0) as u64, size.max(0) as u64))
    }

    fn facet_buckets(
        &self,
        facet: Facet,
        filters: Vec<SqlFragment>,
    ) -> Result<Vec<Value>, SearchError> {
        let (builder, key) = match facet {
            Facet::Mime => (
                SqlSelectBuilder::new(SqlTable::Document),
                SqlColumn::DocumentMime,
            ),
            Facet::Path => (
                SqlSelectBuilder::new(SqlTable::Document),
                SqlColumn::DocumentPath,
            ),
            Facet::Tag => (
                SqlSelectBuilder::new(SqlTable::Tag).join(SqlJoin::inner(
                    SqlTable::Document,
                    SqlColumn::DocumentId,
                    SqlColumn::TagId,
                )),
                SqlColumn::TagValue,
            ),
        };
        let mut clauses = filters;
        clauses.push(SqlFragment::raw(format!("{} IS NOT NULL", key.sql())));
        let (sql, params) = builder
            .select([
                SqlSelectItem::new(SqlExpr::column(key)).alias("bucket"),
                SqlSelectItem::new(SqlExpr::raw("COUNT(*)")).alias("doc_count"),
            ])
            .where_clause(SqlFragment::all(clauses))
            .group_by(SqlExpr::column(key))
            .order_by(SqlOrderBy::desc(SqlExpr::alias("doc_count")))
            .order_by(SqlOrderBy::asc(SqlExpr::alias("bucket")))
            .limit(facet.bucket_limit())
            .build();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            let key: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok(json!({ "key": key, "doc_count": count }))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

struct PageRow {
    id: String,
    index_id: String,
    json_data: String,
    score: f64,
    sort_key: String,
    highlight: Option<Map<String, Value>>,
}

fn read_page_row(row: &Row, highlight: bool, in_path: bool) -> rusqlite::Result<PageRow> {
    let sort_key: SqlValue = row.get("sort_key")?;
    let mut fragments = Map::new();
    if highlight {
        let mut columns = vec![("name", "hl_name"), ("content", "hl_content")];
        if in_path {
            columns.push(("path.text", "hl_path"));
        }
        for (field, column) in columns {
            let text: Option<String> = row.get(column)?;
            if let Some(text) = text
                && text.contains(HIGHLIGHT_PRE)
            {
                fragments.insert(field.to_string(), Value::String(text));
            }
        }
    }
    Ok(PageRow {
        id: row.get("id")?,
        index_id: row.get("index_id")?,
        json_data: row.get("json_data")?,
        score: row.get::<_, Option<f64>>("score")?.unwrap_or(0.0),
        sort_key: marker_text(&sort_key),
        highlight: (!fragments.is_empty()).then_some(fragments),
    })
}

fn marker_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Integer(v) => v.to_string(),
        SqlValue::Real(v) => v.to_string(),
        SqlValue::Text(v) => v.clone(),
        SqlValue::Null | SqlValue::Blob(_) => String::new(),
    }
}

/// Joins, score and match shared by the page and totals queries.
struct PagePlan {
    match_expr: Option<String>,
    score: SqlExpr,
    filters: Vec<SqlFragment>,
    model: Option<u32>,
}

impl PagePlan {
    fn new(req: &FlatRequest, filters: Vec<SqlFragment>) -> Result<Self, SearchError> {
        let match_expr = match_expression(req);
        let (score, model) = match (&req.model, &req.embedding) {
            (Some(model), Some(vector)) => (
                SqlExpr::bound(
                    "cosine_sim(embedding.embedding, ?) + 1.0",
                    vec![SqlValue::Blob(to_bytes(vector))],
                ),
                Some(*model),
            ),
            (None, None) => (
                match &match_expr {
                    Some(_) => SqlExpr::raw(format!("-bm25(search, {BM25_WEIGHTS})")),
                    None => SqlExpr::raw("0.0"),
                },
                None,
            ),
            _ => {
                return Err(SearchError::Backend(
                    "embedding search needs both a model and a vector".to_string(),
                ));
            }
        };
        Ok(Self {
            match_expr,
            score,
            filters,
            model,
        })
    }

    fn from(&self) -> SqlSelectBuilder {
        let mut builder = if self.match_expr.is_some() {
            SqlSelectBuilder::new(SqlTable::Search).join(SqlJoin::inner(
                SqlTable::Document,
                SqlColumn::DocumentSeq,
                SqlColumn::SearchRowid,
            ))
        } else {
            SqlSelectBuilder::new(SqlTable::Document)
        };
        if self.model.is_some() {
            builder = builder.join(SqlJoin::inner(
                SqlTable::Embedding,
                SqlColumn::EmbeddingId,
                SqlColumn::DocumentId,
            ));
        }
        builder
    }

    fn where_clause(&self) -> Option<SqlFragment> {
        let mut clauses = Vec::new();
        if let Some(expr) = &self.match_expr {
            clauses.push(SqlFragment::raw_with_params(
                "search MATCH ?",
                vec![SqlValue::Text(expr.clone())],
            ));
        }
        clauses.extend(self.filters.iter().cloned());
        if let Some(model) = self.model {
            clauses.push(SqlFragment::cmp(
                SqlExpr::column(SqlColumn::EmbeddingModel),
                "=",
                SqlValue::Integer(i64::from(model)),
            ));
        }
        SqlFragment::all(clauses)
    }

    fn sort_key(&self, req: &FlatRequest) -> SqlExpr {
        match req.sort {
            FlatSort::Score | FlatSort::Embedding => self.score.clone(),
            FlatSort::Random => {
                let (score_sql, mut params) = match &self.score {
                    SqlExpr::Bound(fragment) => (fragment.sql.clone(), fragment.params.clone()),
                    other => (other.to_sql(), Vec::new()),
                };
                params.insert(0, SqlValue::Integer(req.seed as i64));
                SqlExpr::bound(
                    format!("random_score(?, document.seq) + {score_sql}"),
                    params,
                )
            }
            FlatSort::Mtime => SqlExpr::raw("IFNULL(document.mtime, 0)"),
            FlatSort::Size => SqlExpr::raw("IFNULL(document.size, 0)"),
            FlatSort::Name => SqlExpr::raw("document.name"),
        }
    }
}

fn filter_fragments(req: &FlatRequest) -> Vec<SqlFragment> {
    let text_list = |values: &[String]| -> Vec<SqlValue> {
        values.iter().cloned().map(SqlValue::Text).collect()
    };
    let mut clauses = Vec::new();
    clauses.extend(SqlFragment::in_list(
        SqlExpr::column(SqlColumn::DocumentIndex),
        text_list(&req.index_ids),
    ));
    let ranges = [
        (SqlColumn::DocumentSize, ">=", req.size_min.map(clamp_size)),
        (SqlColumn::DocumentSize, "<=", req.size_max.map(clamp_size)),
        (SqlColumn::DocumentMtime, ">=", req.date_min),
        (SqlColumn::DocumentMtime, "<=", req.date_max),
    ];
    for (column, op, bound) in ranges {
        if let Some(bound) = bound {
            clauses.push(SqlFragment::cmp(
                SqlExpr::column(column),
                op,
                SqlValue::Integer(bound),
            ));
        }
    }
    if let Some(path) = &req.path {
        clauses.push(SqlFragment::raw_with_params(
            "lower(document.path) = ? OR lower(document.path) LIKE ? ESCAPE '\\'",
            vec![
                SqlValue::Text(path.clone()),
                SqlValue::Text(format!("{}/%", like_escape(path))),
            ],
        ));
    }
    clauses.extend(SqlFragment::in_list(
        SqlExpr::column(SqlColumn::DocumentMime),
        text_list(&req.mime_types),
    ));
    if req.tags_all {
        for tag in &req.tags {
            clauses.push(SqlFragment::raw_with_params(
                "EXISTS (SELECT 1 FROM tag WHERE tag.id = document.id AND tag.tag = ?)",
                vec![SqlValue::Text(tag.clone())],
            ));
        }
    } else if !req.tags.is_empty() {
        let placeholders = vec!["?"; req.tags.len()].join(", ");
        clauses.push(SqlFragment::raw_with_params(
            format!(
                "EXISTS (SELECT 1 FROM tag WHERE tag.id = document.id AND tag.tag IN ({placeholders}))"
            ),
            text_list(&req.tags),
        ));
    }
    clauses
}

/// Sizes are stored as SQLite integers; larger bounds saturate.
fn clamp_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn resume_clause(req: &FlatRequest, dir: SqlOrderDir) -> Result<Option<SqlFragment>, SearchError> {
    let [key, id] = match req.after.as_slice() {
        [] => return Ok(None),
        [key, id] => [key, id],
        other => {
            return Err(ConfigurationError::InvalidCursor(format!(
                "expected a two-value marker, got {} values",
                other.len()
            ))
            .into());
        }
    };
    let invalid = || ConfigurationError::InvalidCursor(format!("bad sort key '{key}'"));
    let key = match req.sort {
        FlatSort::Mtime | FlatSort::Size => {
            SqlValue::Integer(key.parse::<i64>().map_err(|_| invalid())?)
        }
        FlatSort::Name => SqlValue::Text(key.clone()),
        FlatSort::Score | FlatSort::Random | FlatSort::Embedding => {
            SqlValue::Real(key.parse::<f64>().map_err(|_| invalid())?)
        }
    };
    let op = dir.after_op();
    Ok(Some(SqlFragment::raw_with_params(
        format!("sort_key {op} ? OR (sort_key = ? AND id > ?)"),
        vec![key.clone(), key, SqlValue::Text(id.clone())],
    )))
}

/// Turns free text into an FTS5 match. Simple mode keeps letters, digits and
/// underscores and requires every remaining term; advanced mode passes the
/// text through as FTS5 syntax.
pub fn match_expression(req: &FlatRequest) -> Option<String> {
    let query = req.query.as_deref()?.trim();
    if query.is_empty() {
        return None;
    }
    if req.advanced {
        return Some(query.to_string());
    }
    let (safe, changed) = sanitize_fts5_query(query);
    if changed {
        debug!(original = query, sanitized = %safe, "query sanitized for FTS5");
    }
    let terms: Vec<String> = safe
        .split_whitespace()
        .map(|term| format!("\"{term}\""))
        .collect();
    if terms.is_empty() {
        return None;
    }
    let columns = if req.search_in_path {
        "{name content path}"
    } else {
        "{name content}"
    };
    Some(format!("{columns} : ({})", terms.join(" AND ")))
}

fn sanitize_fts5_query(query: &str) -> (String, bool) {
    let mut out = String::with_capacity(query.len());
    let mut last_space = true;
    for ch in query.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            out.push(ch);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    let trimmed = out.trim().to_string();
    let changed = trimmed != query.trim();
    (trimmed, changed)
}

fn like_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Seeded score in `[0, RANDOM_WEIGHT)` for a document sequence number.
pub fn random_score(seed: u64, seq: u64) -> f64 {
    let hashed = splitmix64(seed ^ seq.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    (hashed >> 11) as f64 / (1u64 << 53) as f64 * RANDOM_WEIGHT
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn register_functions(conn: &Connection) -> Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function("random_score", 2, flags, |ctx| {
        let seed: i64 = ctx.get(0)?;
        let seq: i64 = ctx.get(1)?;
        Ok(random_score(seed as u64, seq as u64))
    })
    .context("register random_score")?;
    conn.create_scalar_function("cosine_sim", 2, flags, |ctx| {
        let a: Vec<u8> = ctx.get(0)?;
        let b: Vec<u8> = ctx.get(1)?;
        Ok(f64::from(cosine_similarity(&from_bytes(&a), &from_bytes(&b))))
    })
    .context("register cosine_sim")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tempfile::TempDir;
    use tempfile::tempdir;

    use super::*;
    use crate::tag::Color;

    fn doc(id: &str, name: &str, size: i64, mtime: i64) -> StoredDocument {
        let mut data = Map::new();
        data.insert("name".into(), json!(name));
        data.insert("path".into(), json!("photos/trip"));
        data.insert("size".into(), json!(size));
        data.insert("mtime".into(), json!(mtime));
        data.insert("mime".into(), json!("image/jpeg"));
        StoredDocument {
            id: id.to_string(),
            index: "main".into(),
            path: "photos/trip".into(),
            name: name.to_string(),
            mime: Some("image/jpeg".into()),
            size: Some(size),
            mtime: Some(mtime),
            content: Some(format!("notes about {name}")),
            data,
            ..Default::default()
        }
    }

    fn seeded(count: usize) -> (TempDir, Store) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("quarry.db");
        Store::init(&path).expect("init");
        let store = Store::open(&path, StoreMode::ReadWrite).expect("open");
        for i in 0..count {
            let mut d = doc(
                &format!("d{i:02}"),
                &format!("beach {}", i % 4),
                (i as i64 % 5) * 100,
                1_700_000_000 + (i as i64 % 3),
            );
            if i % 2 == 0 {
                d.tags.push("holiday.#ff0000".into());
            }
            if i % 3 == 0 {
                d.mime = Some("image/png".into());
            }
            d.embeddings.push((1, vec![1.0, i as f32]));
            store.upsert_document(&d).expect("insert");
        }
        (dir, store)
    }

    fn page(store: &Store, req: &FlatRequest) -> Vec<RawHit> {
        store.search(req).expect("search").hits.hits
    }

    fn ids(hits: &[RawHit]) -> Vec<String> {
        hits.iter().map(|hit| hit.id.clone()).collect()
    }

    fn marker(hit: &RawHit) -> Vec<String> {
        hit.sort
            .as_ref()
            .expect("sort")
            .iter()
            .map(|v| v.as_str().expect("string").to_string())
            .collect()
    }

    #[test]
    fn text_query_matches_and_highlights() {
        let (_dir, store) = seeded(8);
        let req = FlatRequest {
            page_size: 10,
            query: Some("beach 1".into()),
            highlight: true,
            highlight_context_size: 20,
            fetch_aggregations: true,
            ..Default::default()
        };
        let response = store.search(&req).expect("search");
        let hits = &response.hits.hits;
        assert_eq!(ids(hits), vec!["d01".to_string(), "d05".to_string()]);
        assert!(hits.iter().all(|hit| hit.score.is_some_and(|s| s > 0.0)));
        let highlight = hits[0].highlight.as_ref().expect("highlight");
        assert!(highlight["name"].as_str().expect("name").contains("<mark>beach</mark>"));
        let aggs = response.aggregations.expect("aggs");
        assert_eq!(aggs["total_count"]["value"], json!(2));
        assert_eq!(aggs["total_size"]["value"], json!(100));
    }

    #[test]
    fn punctuation_only_query_matches_everything() {
        let (_dir, store) = seeded(3);
        let req = FlatRequest {
            page_size: 10,
            query: Some("!!!".into()),
            ..Default::default()
        };
        assert_eq!(page(&store, &req).len(), 3);
    }

    #[test]
    fn advanced_syntax_errors_are_query_syntax() {
        let (_dir, store) = seeded(1);
        let req = FlatRequest {
            page_size: 10,
            query: Some("beach AND (".into()),
            advanced: true,
            ..Default::default()
        };
        assert!(matches!(store.search(&req), Err(SearchError::QuerySyntax(_))));
    }

    #[test]
    fn filters_narrow_results() {
        let (_dir, store) = seeded(12);
        let req = FlatRequest {
            page_size: 100,
            size_min: Some(300),
            tags: vec!["holiday.#ff0000".into()],
            tags_all: true,
            mime_types: vec!["image/jpeg".into()],
            path: Some("photos".into()),
            ..Default::default()
        };
        let hits = page(&store, &req);
        for hit in &hits {
            let n: usize = hit.id[1..].parse().expect("n");
            assert!((n % 5) * 100 >= 300);
            assert_eq!(n % 2, 0);
            assert_ne!(n % 3, 0);
        }
        assert_eq!(ids(&hits), vec!["d04".to_string(), "d08".to_string()]);

        let other_path = FlatRequest {
            page_size: 100,
            path: Some("photo".into()),
            ..Default::default()
        };
        assert!(page(&store, &other_path).is_empty());
    }

    #[test]
    fn huge_size_bounds_saturate() {
        let (_dir, store) = seeded(5);
        let above = FlatRequest {
            page_size: 10,
            size_min: Some(u64::MAX),
            ..Default::default()
        };
        assert!(page(&store, &above).is_empty());

        let below = FlatRequest {
            page_size: 10,
            size_max: Some(u64::MAX),
            ..Default::default()
        };
        assert_eq!(page(&store, &below).len(), 5);
    }

    #[test]
    fn size_sort_resumes_after_marker() {
        let (_dir, store) = seeded(10);
        let mut req = FlatRequest {
            page_size: 3,
            sort: FlatSort::Size,
            sort_asc: true,
            ..Default::default()
        };
        let mut seen = Vec::new();
        loop {
            let hits = page(&store, &req);
            if hits.is_empty() {
                break;
            }
            seen.extend(ids(&hits));
            req.after = marker(hits.last().expect("last"));
        }
        assert_eq!(
            seen,
            vec!["d00", "d05", "d01", "d06", "d02", "d07", "d03", "d08", "d04", "d09"]
        );
    }

    #[test]
    fn random_order_is_reproducible_per_seed() {
        let (_dir, store) = seeded(20);
        let req = |seed| FlatRequest {
            page_size: 20,
            sort: FlatSort::Random,
            seed,
            ..Default::default()
        };
        let first = ids(&page(&store, &req(7)));
        assert_eq!(first, ids(&page(&store, &req(7))));
        assert_ne!(first, ids(&page(&store, &req(8))));
    }

    #[test]
    fn embedding_requires_a_vector_for_the_model() {
        let (_dir, store) = seeded(4);
        let mut no_vector = doc("zz", "plain", 1, 1);
        no_vector.embeddings.clear();
        store.upsert_document(&no_vector).expect("insert");
        let req = FlatRequest {
            page_size: 10,
            sort: FlatSort::Embedding,
            model: Some(1),
            embedding: Some(vec![0.0, 1.0]),
            ..Default::default()
        };
        let hits = page(&store, &req);
        assert_eq!(ids(&hits), vec!["d03", "d02", "d01", "d00"]);
        assert!(hits[0].highlight.is_none());
    }

    #[test]
    fn facets_count_buckets() {
        let (_dir, store) = seeded(6);
        let req = FlatRequest {
            facets: vec![Facet::Mime, Facet::Tag],
            ..Default::default()
        };
        let aggs = store.search(&req).expect("facets").aggregations.expect("aggs");
        assert_eq!(
            aggs["mimeTypes"]["buckets"],
            json!([
                {"key": "image/jpeg", "doc_count": 4},
                {"key": "image/png", "doc_count": 2},
            ])
        );
        assert_eq!(
            aggs["tags"]["buckets"],
            json!([{"key": "holiday.#ff0000", "doc_count": 3}])
        );
    }

    #[test]
    fn tag_mutations_add_and_remove() {
        let (_dir, store) = seeded(1);
        let add = TagMutation {
            doc_id: "d00".into(),
            label: "work".into(),
            color: Color::parse_hex("00ff00"),
            action: TagAction::Add,
        };
        store.apply_tag(&add).expect("add");
        let tags = |store: &Store| {
            page(store, &FlatRequest { page_size: 1, ..Default::default() })[0].source["tag"].clone()
        };
        assert_eq!(tags(&store), json!(["holiday.#ff0000", "work.#00ff00"]));

        let remove = TagMutation {
            color: None,
            action: TagAction::Remove,
            ..add
        };
        store.apply_tag(&remove).expect("remove");
        assert_eq!(tags(&store), json!(["holiday.#ff0000"]));

        let missing = TagMutation {
            doc_id: "nope".into(),
            ..remove
        };
        assert!(matches!(store.apply_tag(&missing), Err(SearchError::Backend(_))));
    }

    #[test]
    fn random_score_stays_in_range() {
        for seq in 0..1000 {
            let score = random_score(42, seq);
            assert!((0.0..RANDOM_WEIGHT).contains(&score));
        }
    }

    fn every_sort() -> Vec<FlatRequest> {
        let sorted = |sort, sort_asc| FlatRequest {
            sort,
            sort_asc,
            ..Default::default()
        };
        let mut requests = Vec::new();
        for sort in [FlatSort::Mtime, FlatSort::Size, FlatSort::Name] {
            requests.push(sorted(sort, true));
            requests.push(sorted(sort, false));
        }
        requests.push(FlatRequest {
            query: Some("beach".into()),
            ..sorted(FlatSort::Score, false)
        });
        requests.push(FlatRequest {
            seed: 3,
            ..sorted(FlatSort::Random, false)
        });
        requests.push(FlatRequest {
            query: Some("beach".into()),
            seed: 11,
            ..sorted(FlatSort::Random, false)
        });
        requests.push(FlatRequest {
            model: Some(1),
            embedding: Some(vec![0.0, 1.0]),
            ..sorted(FlatSort::Embedding, false)
        });
        requests
    }

    fn primary_order(sort: FlatSort, a: &str, b: &str) -> std::cmp::Ordering {
        match sort {
            FlatSort::Mtime | FlatSort::Size => a
                .parse::<i64>()
                .expect("int")
                .cmp(&b.parse::<i64>().expect("int")),
            FlatSort::Name => a.cmp(b),
            FlatSort::Score | FlatSort::Random | FlatSort::Embedding => a
                .parse::<f64>()
                .expect("float")
                .total_cmp(&b.parse::<f64>().expect("float")),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn pages_are_disjoint_and_ordered_for_every_sort(page_size in 1usize..7) {
            let (_dir, store) = seeded(15);
            for base in every_sort() {
                let mut req = FlatRequest {
                    page_size,
                    ..base.clone()
                };
                let mut keys: Vec<(String, String)> = Vec::new();
                loop {
                    let hits = page(&store, &req);
                    if hits.is_empty() {
                        break;
                    }
                    for hit in &hits {
                        let m = marker(hit);
                        keys.push((m[0].clone(), m[1].clone()));
                    }
                    req.after = marker(hits.last().expect("last"));
                }
                let mut unique: Vec<&String> = keys.iter().map(|(_, id)| id).collect();
                unique.sort();
                unique.dedup();
                prop_assert_eq!(unique.len(), 15, "{:?}", base.sort);
                prop_assert_eq!(keys.len(), 15, "{:?}", base.sort);
                for pair in keys.windows(2) {
                    let (a, b) = (&pair[0], &pair[1]);
                    let primary = match (primary_order(base.sort, &a.0, &b.0), base.sort_asc) {
                        (order, true) => order,
                        (order, false) => order.reverse(),
                    };
                    let ordered = primary.is_lt() || (primary.is_eq() && a.1 < b.1);
                    prop_assert!(ordered, "{:?}: {:?} then {:?}", base.sort, a, b);
                }
            }
        }
    }
}
