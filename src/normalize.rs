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

//! Raw backend responses to canonical hits.
//!
//! Both backends answer in the same envelope (`hits.hits[]` plus named
//! `aggregations`); differences such as highlight values arriving as plain
//! strings are smoothed over here.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::compile::Facet;
use crate::error::SearchError;
use crate::escape;
use crate::tag::DEFAULT_LUMINANCE_THRESHOLD;
use crate::tag::Tag;

const UNPLAYABLE_IMAGE_CODECS: [&str; 3] = ["tiff", "raw", "ppm"];
const UNPLAYABLE_VIDEO_CONTAINERS: [&str; 3] = ["mkv", "avi", "mov"];
const UNPLAYABLE_VIDEO_CODECS: [&str; 4] = ["hevc", "mpeg1video", "mpeg2video", "wmv3"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub took: Option<u64>,
    #[serde(default)]
    pub hits: RawHits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawHits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<Value>,
    #[serde(default)]
    pub hits: Vec<RawHit>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawHit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_index", default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(rename = "_score", default)]
    pub score: Option<f64>,
    #[serde(rename = "_source", default)]
    pub source: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<Value>>,
}

/// Stored attributes of a document. Fields not modelled here are kept in
/// `extra` untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videoc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audioc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Display flags derived from a document. `None` means "not applicable".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HitProps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_sub_document: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_thumbnail: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_video_preview: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_image: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_gif: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_playable_image: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_aspect_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_video: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_playable_video: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_audio: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    pub id: String,
    pub index: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub source: Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<BTreeMap<String, Vec<String>>>,
    #[serde(flatten)]
    pub props: HitProps,
    pub tags: Vec<Tag>,
    /// Backend sort marker, when the backend returned one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    pub luminance_threshold: f32,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            luminance_threshold: DEFAULT_LUMINANCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub count: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetBucket {
    #[serde(rename = "key", deserialize_with = "bucket_key")]
    pub value: String,
    #[serde(rename = "doc_count")]
    pub count: u64,
}

impl FacetBucket {
    pub fn new(value: impl Into<String>, count: u64) -> Self {
        Self {
            value: value.into(),
            count,
        }
    }
}

fn bucket_key<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

pub fn normalize(raw: &RawResponse, opts: &NormalizeOptions) -> Result<Vec<Hit>, SearchError> {
    raw.hits
        .hits
        .iter()
        .map(|hit| normalize_hit(hit, opts))
        .collect()
}

pub fn normalize_hit(raw: &RawHit, opts: &NormalizeOptions) -> Result<Hit, SearchError> {
    let mut source: Document = serde_json::from_value(Value::Object(raw.source.clone()))?;
    source.name = escape::decode(&source.name);
    source.path = escape::decode(&source.path);

    let tags = source
        .tag
        .iter()
        .map(|raw_tag| Tag::decode(raw_tag, opts.luminance_threshold))
        .collect();
    let index = source
        .index
        .clone()
        .or_else(|| raw.index.clone())
        .unwrap_or_default();

    Ok(Hit {
        id: raw.id.clone(),
        index,
        score: raw.score,
        props: derive_props(&source),
        highlight: raw.highlight.as_ref().map(highlight_fragments),
        source,
        tags,
        sort: raw.sort.clone(),
    })
}

fn highlight_fragments(raw: &Map<String, Value>) -> BTreeMap<String, Vec<String>> {
    raw.iter()
        .filter_map(|(field, value)| {
            let fragments: Vec<String> = match value {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            };
            (!fragments.is_empty()).then(|| (field.clone(), fragments))
        })
        .collect()
}

pub fn derive_props(doc: &Document) -> HitProps {
    let mut props = HitProps::default();
    let is_sub_document = doc.parent.is_some();
    if is_sub_document {
        props.is_sub_document = Some(true);
    }

    if let Some(thumbnail) = &doc.thumbnail {
        match thumbnail_count(thumbnail) {
            Some(0) => props.has_thumbnail = Some(false),
            Some(count) => {
                props.has_thumbnail = Some(true);
                props.thumbnail_count = Some(count);
                props.has_video_preview = Some(count > 1);
            }
            None => {
                props.has_thumbnail = Some(true);
                props.thumbnail_count = Some(1);
            }
        }
    }

    let Some(mime) = doc.mime.as_deref() else {
        return props;
    };
    let category = mime.split('/').next().unwrap_or(mime);
    props.mime_category = Some(category.to_string());
    let videoc = doc.videoc.as_deref();

    match category {
        "image" => {
            let gif = videoc == Some("gif");
            props.is_gif = Some(gif);
            props.is_image = Some(!gif);
            props.is_playable_image = Some(
                doc.width.is_some()
                    && !is_sub_document
                    && !videoc.is_some_and(|codec| UNPLAYABLE_IMAGE_CODECS.contains(&codec)),
            );
            if let (Some(width), Some(height)) = (doc.width, doc.height)
                && height > 0
            {
                props.image_aspect_ratio = Some(width as f64 / height as f64);
            }
        }
        "video" => {
            let is_video = videoc.is_some();
            props.is_video = Some(is_video);
            if is_video {
                let extension = doc.extension.as_deref().unwrap_or_default();
                props.is_playable_video = Some(
                    mime.starts_with("video/")
                        && !is_sub_document
                        && !UNPLAYABLE_VIDEO_CONTAINERS.contains(&extension)
                        && !videoc.is_some_and(|codec| UNPLAYABLE_VIDEO_CODECS.contains(&codec)),
                );
            }
        }
        "audio" => {
            props.is_audio = Some(doc.audioc.is_some() && !is_sub_document);
        }
        _ => {}
    }
    props
}

/// A numeric marker is a thumbnail count; anything else is the legacy
/// single-thumbnail form.
fn thumbnail_count(marker: &Value) -> Option<u32> {
    match marker {
        Value::Number(n) => n.as_u64().map(|v| v.min(u32::MAX as u64) as u32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Result totals, present only when the response carried them.
pub fn totals(raw: &RawResponse) -> Option<Totals> {
    let aggs = raw.aggregations.as_ref()?;
    let count = aggregation_value(aggs, "total_count")?;
    let size = aggregation_value(aggs, "total_size").unwrap_or(0);
    Some(Totals { count, size })
}

fn aggregation_value(aggs: &Map<String, Value>, name: &str) -> Option<u64> {
    let value = aggs.get(name)?.get("value")?;
    value
        .as_u64()
        .or_else(|| value.as_f64().map(|v| v.max(0.0).round() as u64))
}

pub fn hit_total(raw: &RawResponse) -> Option<u64> {
    match raw.hits.total.as_ref()? {
        Value::Number(n) => n.as_u64(),
        Value::Object(obj) => obj.get("value").and_then(Value::as_u64),
        _ => None,
    }
}

pub fn buckets(raw: &RawResponse, facet: Facet) -> Result<Vec<FacetBucket>, SearchError> {
    let Some(agg) = raw
        .aggregations
        .as_ref()
        .and_then(|aggs| aggs.get(facet.aggregation_name()))
    else {
        return Ok(Vec::new());
    };
    match agg.get("buckets") {
        Some(buckets) => Ok(serde_json::from_value(buckets.clone())?),
        None => Ok(Vec::new()),
    }
}
