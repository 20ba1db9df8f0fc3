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

use rusqlite::types::Value as SqlValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlTable {
    Document,
    Search,
    Embedding,
    Tag,
    /// The materialized inner page query.
    Ranked,
}

impl SqlTable {
    pub fn as_str(self) -> &'static str {
        match self {
            SqlTable::Document => "document",
            SqlTable::Search => "search",
            SqlTable::Embedding => "embedding",
            SqlTable::Tag => "tag",
            SqlTable::Ranked => "ranked",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlColumn {
    DocumentSeq,
    DocumentId,
    DocumentIndex,
    DocumentPath,
    DocumentName,
    DocumentMime,
    DocumentSize,
    DocumentMtime,
    DocumentData,
    SearchRowid,
    EmbeddingId,
    EmbeddingModel,
    EmbeddingVector,
    TagId,
    TagValue,
}

impl SqlColumn {
    pub fn sql(self) -> &'static str {
        match self {
            SqlColumn::DocumentSeq => "document.seq",
            SqlColumn::DocumentId => "document.id",
            SqlColumn::DocumentIndex => "document.index_id",
            SqlColumn::DocumentPath => "document.path",
            SqlColumn::DocumentName => "document.name",
            SqlColumn::DocumentMime => "document.mime",
            SqlColumn::DocumentSize => "document.size",
            SqlColumn::DocumentMtime => "document.mtime",
            SqlColumn::DocumentData => "document.json_data",
            SqlColumn::SearchRowid => "search.rowid",
            SqlColumn::EmbeddingId => "embedding.id",
            SqlColumn::EmbeddingModel => "embedding.model_id",
            SqlColumn::EmbeddingVector => "embedding.embedding",
            SqlColumn::TagId => "tag.id",
            SqlColumn::TagValue => "tag.tag",
        }
    }
}

#[derive(Clone, Debug)]
pub enum SqlExpr {
    Column(SqlColumn),
    Raw(String),
    /// An expression with its own placeholders.
    Bound(SqlFragment),
    Alias(&'static str),
}

impl SqlExpr {
    pub fn column(column: SqlColumn) -> Self {
        Self::Column(column)
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Self::Raw(sql.into())
    }

    pub fn bound(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self::Bound(SqlFragment::raw_with_params(sql, params))
    }

    pub fn alias(alias: &'static str) -> Self {
        Self::Alias(alias)
    }

    pub fn to_sql(&self) -> String {
        match self {
            SqlExpr::Column(column) => column.sql().to_string(),
            SqlExpr::Raw(sql) => sql.clone(),
            SqlExpr::Bound(fragment) => fragment.sql.clone(),
            SqlExpr::Alias(alias) => (*alias).to_string(),
        }
    }

    fn params(&self) -> &[SqlValue] {
        match self {
            SqlExpr::Bound(fragment) => &fragment.params,
            _ => &[],
        }
    }
}

#[derive(Clone, Debug)]
pub struct SqlSelectItem {
    expr: SqlExpr,
    alias: Option<&'static str>,
}

impl SqlSelectItem {
    pub fn new(expr: SqlExpr) -> Self {
        Self { expr, alias: None }
    }

    pub fn alias(mut self, alias: &'static str) -> Self {
        self.alias = Some(alias);
        self
    }

    fn to_sql(&self) -> String {
        let expr = self.expr.to_sql();
        if let Some(alias) = self.alias {
            format!("{} AS {}", expr, alias)
        } else {
            expr
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlOrderDir {
    Asc,
    Desc,
}

impl SqlOrderDir {
    pub fn from_asc(asc: bool) -> Self {
        if asc { SqlOrderDir::Asc } else { SqlOrderDir::Desc }
    }

    fn as_str(self) -> &'static str {
        match self {
            SqlOrderDir::Asc => "ASC",
            SqlOrderDir::Desc => "DESC",
        }
    }

    /// Comparison operator selecting rows that come after a key in this order.
    pub fn after_op(self) -> &'static str {
        match self {
            SqlOrderDir::Asc => ">",
            SqlOrderDir::Desc => "<",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SqlOrderBy {
    expr: SqlExpr,
    dir: SqlOrderDir,
}

impl SqlOrderBy {
    pub fn new(expr: SqlExpr, dir: SqlOrderDir) -> Self {
        Self { expr, dir }
    }

    pub fn asc(expr: SqlExpr) -> Self {
        Self::new(expr, SqlOrderDir::Asc)
    }

    pub fn desc(expr: SqlExpr) -> Self {
        Self::new(expr, SqlOrderDir::Desc)
    }

    fn to_sql(&self) -> String {
        format!("{} {}", self.expr.to_sql(), self.dir.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl SqlFragment {
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn raw_with_params(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn cmp(expr: SqlExpr, op: &str, value: SqlValue) -> Self {
        let sql = format!("{} {} ?", expr.to_sql(), op);
        Self {
            sql,
            params: vec![value],
        }
    }

    /// `None` for an empty list; callers skip the filter instead.
    pub fn in_list(expr: SqlExpr, values: Vec<SqlValue>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!("{} IN ({})", expr.to_sql(), placeholders);
        Some(Self {
            sql,
            params: values,
        })
    }

    pub fn and(self, other: SqlFragment) -> SqlFragment {
        let sql = format!("({}) AND ({})", self.sql, other.sql);
        let mut params = self.params;
        params.extend(other.params);
        SqlFragment { sql, params }
    }

    pub fn or(self, other: SqlFragment) -> SqlFragment {
        let sql = format!("({}) OR ({})", self.sql, other.sql);
        let mut params = self.params;
        params.extend(other.params);
        SqlFragment { sql, params }
    }

    /// Conjunction of every fragment, or `None` when there are none.
    pub fn all(fragments: impl IntoIterator<Item = SqlFragment>) -> Option<SqlFragment> {
        fragments.into_iter().reduce(SqlFragment::and)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlJoinKind {
    Inner,
}

impl SqlJoinKind {
    fn as_str(self) -> &'static str {
        match self {
            SqlJoinKind::Inner => "INNER",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SqlJoin {
    kind: SqlJoinKind,
    table: SqlTable,
    left: SqlColumn,
    right: SqlColumn,
}

impl SqlJoin {
    pub fn inner(table: SqlTable, left: SqlColumn, right: SqlColumn) -> Self {
        Self {
            kind: SqlJoinKind::Inner,
            table,
            left,
            right,
        }
    }

    fn to_sql(&self) -> String {
        format!(
            "{} JOIN {} ON {} = {}",
            self.kind.as_str(),
            self.table.as_str(),
            self.left.sql(),
            self.right.sql()
        )
    }
}

#[derive(Clone, Debug)]
pub struct SqlSelectBuilder {
    select: Vec<SqlSelectItem>,
    from: SqlTable,
    joins: Vec<SqlJoin>,
    where_clause: Option<SqlFragment>,
    group_by: Vec<SqlExpr>,
    order_by: Vec<SqlOrderBy>,
    limit: Option<usize>,
}

impl SqlSelectBuilder {
    pub fn new(from: SqlTable) -> Self {
        Self {
            select: Vec::new(),
            from,
            joins: Vec::new(),
            where_clause: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn select<I>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = SqlSelectItem>,
    {
        self.select.extend(items);
        self
    }

    pub fn join(mut self, join: SqlJoin) -> Self {
        self.joins.push(join);
        self
    }

    pub fn where_clause(mut self, clause: Option<SqlFragment>) -> Self {
        self.where_clause = clause;
        self
    }

    pub fn group_by(mut self, expr: SqlExpr) -> Self {
        self.group_by.push(expr);
        self
    }

    pub fn order_by(mut self, order: SqlOrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(self) -> (String, Vec<SqlValue>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        sql.push_str("SELECT ");
        if self.select.is_empty() {
            sql.push('*');
        } else {
            let mut first = true;
            for item in &self.select {
                if !first {
                    sql.push_str(", ");
                }
                first = false;
                sql.push_str(&item.to_sql());
                params.extend_from_slice(item.expr.params());
            }
        }
        sql.push_str(" FROM ");
        sql.push_str(self.from.as_str());
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.to_sql());
        }

        if let Some(where_clause) = self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.sql);
            params.extend(where_clause.params);
        }
        if !self.group_by.is_empty() {
            let exprs: Vec<String> = self.group_by.iter().map(SqlExpr::to_sql).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&exprs.join(", "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let mut first = true;
            for order in &self.order_by {
                if !first {
                    sql.push_str(", ");
                }
                first = false;
                sql.push_str(&order.to_sql());
                params.extend_from_slice(order.expr.params());
            }
        }
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::from(limit as i64));
        }

        (sql, params)
    }
}

/// Wraps `inner` as a materialized `ranked` CTE in front of `outer`.
pub fn with_ranked(inner: SqlSelectBuilder, outer: SqlSelectBuilder) -> (String, Vec<SqlValue>) {
    let (inner_sql, mut params) = inner.build();
    let (outer_sql, outer_params) = outer.build();
    params.extend(outer_params);
    (
        format!("WITH ranked AS MATERIALIZED ({inner_sql}) {outer_sql}"),
        params,
    )
}
