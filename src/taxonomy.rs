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

//! Facet buckets to hierarchical trees for the media-type picker, the tag
//! picker and the path/size treemap.
//!
//! Trees are assembled in an explicit [`Entry`] form first and only then
//! flattened into [`TaxonomyNode`]s, sorted by segment. A segment that
//! contains the separator as literal data cannot be told apart from a
//! hierarchy boundary.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::normalize::FacetBucket;
use crate::tag::TAG_SEPARATOR;
use crate::tag::split_color;

/// Segment used for the synthetic leaf that holds a branch's own value.
pub const SELF_SEGMENT: &str = ".";

const MIME_SEPARATOR: char = '/';
const PATH_SEPARATOR: char = '/';

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LeafMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Underlying bucket values, one per merged bucket.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LeafMeta {
    fn merge(&mut self, other: LeafMeta) {
        self.count = add(self.count, other.count);
        self.size = add(self.size, other.size);
        if self.color.is_none() {
            self.color = other.color;
        }
        for value in other.values {
            if !self.values.contains(&value) {
                self.values.push(value);
            }
        }
    }
}

fn add(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.saturating_add(b)),
        (a, b) => a.or(b),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonomyNode {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TaxonomyNode>,
    #[serde(flatten)]
    pub leaf: Option<LeafMeta>,
}

impl TaxonomyNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Sum of leaf sizes under this node, including a folded own size.
    pub fn total_size(&self) -> u64 {
        let own = self.leaf.as_ref().and_then(|leaf| leaf.size).unwrap_or(0);
        self.children
            .iter()
            .map(TaxonomyNode::total_size)
            .fold(own, u64::saturating_add)
    }

    pub fn total_count(&self) -> u64 {
        let own = self.leaf.as_ref().and_then(|leaf| leaf.count).unwrap_or(0);
        self.children
            .iter()
            .map(TaxonomyNode::total_count)
            .fold(own, u64::saturating_add)
    }
}

/// What to do with a branch that also carries a value of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfLeaf {
    /// Emit the value as a sibling leaf named [`SELF_SEGMENT`].
    Inject,
    /// Keep the value on the branch node.
    Fold,
}

#[derive(Debug)]
enum Entry {
    Leaf(LeafMeta),
    Branch {
        own: Option<LeafMeta>,
        children: BTreeMap<String, Entry>,
    },
}

impl Entry {
    /// Children of this entry, turning a leaf into a branch that keeps the
    /// leaf's value as its own.
    fn children_mut(&mut self) -> &mut BTreeMap<String, Entry> {
        if let Entry::Leaf(meta) = self {
            let own = std::mem::take(meta);
            *self = Entry::Branch {
                own: Some(own),
                children: BTreeMap::new(),
            };
        }
        match self {
            Entry::Branch { children, .. } => children,
            Entry::Leaf(_) => unreachable!("leaf converted to branch above"),
        }
    }
}

#[derive(Debug, Default)]
struct TreeBuilder {
    roots: BTreeMap<String, Entry>,
    /// Value of rows that sit at the root itself (an empty path).
    own: Option<LeafMeta>,
}

impl TreeBuilder {
    fn insert(&mut self, segments: &[&str], meta: LeafMeta) {
        let Some((last, parents)) = segments.split_last() else {
            match &mut self.own {
                Some(existing) => existing.merge(meta),
                None => self.own = Some(meta),
            }
            return;
        };
        let mut level = &mut self.roots;
        for segment in parents {
            level = level
                .entry((*segment).to_string())
                .or_insert_with(|| Entry::Branch {
                    own: None,
                    children: BTreeMap::new(),
                })
                .children_mut();
        }

        match level.get_mut(*last) {
            Some(Entry::Leaf(existing)) => existing.merge(meta),
            Some(Entry::Branch { own, .. }) => match own {
                Some(existing) => existing.merge(meta),
                None => *own = Some(meta),
            },
            None => {
                level.insert((*last).to_string(), Entry::Leaf(meta));
            }
        }
    }

    /// The root has no node to fold into, so its own value always becomes a
    /// top-level [`SELF_SEGMENT`] leaf.
    fn build(self, separator: char, policy: SelfLeaf) -> Vec<TaxonomyNode> {
        let mut nodes = flatten(self.roots, "", separator, policy);
        if let Some(meta) = self.own {
            nodes.push(TaxonomyNode {
                id: SELF_SEGMENT.to_string(),
                text: SELF_SEGMENT.to_string(),
                children: Vec::new(),
                leaf: Some(meta),
            });
            nodes.sort_by(|a, b| a.text.cmp(&b.text));
        }
        nodes
    }
}

fn flatten(
    level: BTreeMap<String, Entry>,
    parent_id: &str,
    separator: char,
    policy: SelfLeaf,
) -> Vec<TaxonomyNode> {
    level
        .into_iter()
        .map(|(segment, entry)| {
            let id = if parent_id.is_empty() {
                segment.clone()
            } else {
                format!("{parent_id}{separator}{segment}")
            };
            match entry {
                Entry::Leaf(meta) => TaxonomyNode {
                    id,
                    text: segment,
                    children: Vec::new(),
                    leaf: Some(meta),
                },
                Entry::Branch { own, children } => {
                    let mut nodes = flatten(children, &id, separator, policy);
                    let leaf = match (own, policy) {
                        (Some(meta), SelfLeaf::Inject) => {
                            nodes.push(TaxonomyNode {
                                id: format!("{id}{separator}{SELF_SEGMENT}"),
                                text: SELF_SEGMENT.to_string(),
                                children: Vec::new(),
                                leaf: Some(meta),
                            });
                            nodes.sort_by(|a, b| a.text.cmp(&b.text));
                            None
                        }
                        (own, _) => own,
                    };
                    TaxonomyNode {
                        id,
                        text: segment,
                        children: nodes,
                        leaf,
                    }
                }
            }
        })
        .collect()
}

/// Groups `top/sub` buckets under their top-level type.
pub fn mime_tree(buckets: &[FacetBucket]) -> Vec<TaxonomyNode> {
    let mut builder = TreeBuilder::default();
    for bucket in buckets {
        let segments: Vec<&str> = match bucket.value.split_once(MIME_SEPARATOR) {
            Some((top, sub)) => vec![top, sub],
            None => vec![bucket.value.as_str()],
        };
        builder.insert(&segments, counted(bucket, None));
    }
    builder.build(MIME_SEPARATOR, SelfLeaf::Inject)
}

/// Splits tag labels on `.` and merges color variants of the same label.
pub fn tag_tree(buckets: &[FacetBucket]) -> Vec<TaxonomyNode> {
    let mut sorted: Vec<&FacetBucket> = buckets.iter().collect();
    sorted.sort_by(|a, b| a.value.cmp(&b.value));

    let mut builder = TreeBuilder::default();
    for bucket in sorted {
        let (label, color) = split_color(&bucket.value);
        let segments: Vec<&str> = label.split(TAG_SEPARATOR).collect();
        builder.insert(&segments, counted(bucket, color.map(|c| c.to_hex())));
    }
    builder.build(TAG_SEPARATOR, SelfLeaf::Inject)
}

/// Document counts per directory.
pub fn path_tree(buckets: &[FacetBucket]) -> Vec<TaxonomyNode> {
    let mut builder = TreeBuilder::default();
    for bucket in buckets {
        let segments = path_segments(&bucket.value);
        builder.insert(&segments, counted(bucket, None));
    }
    builder.build(PATH_SEPARATOR, SelfLeaf::Inject)
}

fn counted(bucket: &FacetBucket, color: Option<String>) -> LeafMeta {
    LeafMeta {
        count: Some(bucket.count),
        color,
        size: None,
        values: vec![bucket.value.clone()],
    }
}

fn path_segments(path: &str) -> Vec<&str> {
    path.split(PATH_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TreemapRow {
    pub path: String,
    pub size: u64,
}

/// Builds the size treemap. With [`SelfLeaf::Inject`] a directory holding both
/// its own files and subdirectories gets a `.` leaf next to the
/// subdirectories, independent of row order.
pub fn treemap(rows: &[TreemapRow], policy: SelfLeaf) -> Vec<TaxonomyNode> {
    let mut builder = TreeBuilder::default();
    for row in rows {
        let segments = path_segments(&row.path);
        builder.insert(
            &segments,
            LeafMeta {
                size: Some(row.size),
                ..Default::default()
            },
        );
    }
    builder.build(PATH_SEPARATOR, policy)
}
