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

//! Named ordering policies. Every mode orders by a primary key and then by
//! document id ascending, which makes the order total.

use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::compile::sqlite::FlatSort;
use crate::error::ConfigurationError;
use crate::normalize::Hit;

/// Field name of the tie-break attribute on the full backend.
pub const TIE_FIELD: &str = "_tie";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortField {
    Relevance,
    Random,
    Mtime,
    Size,
    Name,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortMode {
    pub id: &'static str,
    pub label: &'static str,
    pub field: SortField,
    pub direction: SortDirection,
}

/// Primary sort key of a hit. Integer keys come first so that untagged
/// deserialization keeps whole numbers exact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortKey {
    Integer(i64),
    Float(f64),
    Text(String),
    Missing,
}

impl SortKey {
    fn rank(&self) -> u8 {
        match self {
            SortKey::Missing => 0,
            SortKey::Integer(_) | SortKey::Float(_) => 1,
            SortKey::Text(_) => 2,
        }
    }

    pub fn cmp_total(&self, other: &SortKey) -> Ordering {
        match (self, other) {
            (SortKey::Integer(a), SortKey::Integer(b)) => a.cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Integer(_) | SortKey::Float(_), SortKey::Integer(_) | SortKey::Float(_)) => {
                self.as_f64().total_cmp(&other.as_f64())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            SortKey::Integer(v) => *v as f64,
            SortKey::Float(v) => *v,
            _ => 0.0,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKey::Integer(v) => write!(f, "{v}"),
            SortKey::Float(v) => write!(f, "{v}"),
            SortKey::Text(v) => f.write_str(v),
            SortKey::Missing => Ok(()),
        }
    }
}

impl SortMode {
    pub fn is_relevance(&self) -> bool {
        self.field == SortField::Relevance
    }

    /// Primary key of `hit` under this mode.
    pub fn key(&self, hit: &Hit) -> SortKey {
        match self.field {
            SortField::Relevance | SortField::Random => {
                hit.score.map(SortKey::Float).unwrap_or(SortKey::Missing)
            }
            SortField::Mtime => hit
                .source
                .mtime
                .map(SortKey::Integer)
                .unwrap_or(SortKey::Missing),
            SortField::Size => hit
                .source
                .size
                .map(|size| SortKey::Integer(i64::try_from(size).unwrap_or(i64::MAX)))
                .unwrap_or(SortKey::Missing),
            SortField::Name => SortKey::Text(hit.source.name.clone()),
        }
    }

    /// The comparator pages are ordered by: primary key in this mode's
    /// direction, then id ascending.
    pub fn compare(&self, a: &Hit, b: &Hit) -> Ordering {
        let primary = self.key(a).cmp_total(&self.key(b));
        let primary = match self.direction {
            SortDirection::Asc => primary,
            SortDirection::Desc => primary.reverse(),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }

    pub fn elastic_clause(&self) -> Value {
        let field = match self.field {
            SortField::Relevance | SortField::Random => "_score",
            SortField::Mtime => "mtime",
            SortField::Size => "size",
            SortField::Name => "name",
        };
        json!([
            { (field): { "order": self.direction.as_str() } },
            { (TIE_FIELD): { "order": "asc" } },
        ])
    }

    pub fn flat_sort(&self) -> (FlatSort, bool) {
        let sort = match self.field {
            SortField::Relevance => FlatSort::Score,
            SortField::Random => FlatSort::Random,
            SortField::Mtime => FlatSort::Mtime,
            SortField::Size => FlatSort::Size,
            SortField::Name => FlatSort::Name,
        };
        (sort, self.direction == SortDirection::Asc)
    }
}

const fn mode(
    id: &'static str,
    label: &'static str,
    field: SortField,
    direction: SortDirection,
) -> SortMode {
    SortMode {
        id,
        label,
        field,
        direction,
    }
}

static BUILTIN_MODES: [SortMode; 8] = [
    mode("score", "Relevance", SortField::Relevance, SortDirection::Desc),
    mode("random", "Random", SortField::Random, SortDirection::Desc),
    mode("dateAsc", "Date (ascending)", SortField::Mtime, SortDirection::Asc),
    mode("dateDesc", "Date (descending)", SortField::Mtime, SortDirection::Desc),
    mode("sizeAsc", "Size (ascending)", SortField::Size, SortDirection::Asc),
    mode("sizeDesc", "Size (descending)", SortField::Size, SortDirection::Desc),
    mode("nameAsc", "Name (ascending)", SortField::Name, SortDirection::Asc),
    mode("nameDesc", "Name (descending)", SortField::Name, SortDirection::Desc),
];

#[derive(Clone, Copy, Debug)]
pub struct SortModeRegistry {
    modes: &'static [SortMode],
}

impl Default for SortModeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SortModeRegistry {
    pub fn builtin() -> Self {
        Self {
            modes: &BUILTIN_MODES,
        }
    }

    pub fn get(&self, id: &str) -> Option<&SortMode> {
        self.modes.iter().find(|mode| mode.id == id)
    }

    pub fn resolve(&self, id: &str) -> Result<SortMode, ConfigurationError> {
        self.get(id)
            .copied()
            .ok_or_else(|| ConfigurationError::UnknownSortMode(id.to_string()))
    }

    pub fn relevance(&self) -> SortMode {
        BUILTIN_MODES[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SortMode> {
        self.modes.iter()
    }
}
