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

//! JSONL import and export for the local store.
//!
//! One document per line. Names and paths travel as plain text and are
//! escape-encoded on the way in. Vectors are either JSON arrays or base64 of
//! little-endian `f32`s; export always writes base64.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;

use anyhow::Context;
use anyhow::Result;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use crate::embed::from_bytes;
use crate::embed::to_bytes;
use crate::escape;
use crate::store::Store;
use crate::store::StoredDocument;

const DEFAULT_INDEX: &str = "default";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Mtime {
    Seconds(i64),
    Text(String),
}

impl Mtime {
    fn seconds(&self) -> Result<i64> {
        match self {
            Mtime::Seconds(secs) => Ok(*secs),
            Mtime::Text(text) => OffsetDateTime::parse(text, &Rfc3339)
                .map(|ts| ts.unix_timestamp())
                .with_context(|| format!("invalid mtime {text:?}")),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Vector {
    Values(Vec<f32>),
    Encoded(String),
}

impl Vector {
    fn values(self) -> Result<Vec<f32>> {
        match self {
            Vector::Values(values) => Ok(values),
            Vector::Encoded(text) => {
                let bytes = BASE64.decode(text.as_bytes()).context("decode vector")?;
                if bytes.len() % 4 != 0 {
                    anyhow::bail!("vector byte length {} is not a multiple of 4", bytes.len());
                }
                Ok(from_bytes(&bytes))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImportLine {
    id: String,
    #[serde(default)]
    index: Option<String>,
    path: String,
    name: String,
    #[serde(default)]
    mime: Option<String>,
    #[serde(default)]
    size: Option<i64>,
    #[serde(default)]
    mtime: Option<Mtime>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tag: Vec<String>,
    /// Keyed by model id. String keys, since the extra fields are
    /// buffered and buffered keys do not parse as integers.
    #[serde(default)]
    embeddings: BTreeMap<String, Vector>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl ImportLine {
    fn into_document(self) -> Result<StoredDocument> {
        let index = self.index.unwrap_or_else(|| DEFAULT_INDEX.to_string());
        let name = escape::encode(&self.name);
        let path = escape::encode(self.path.trim_matches('/'));
        let mtime = self.mtime.as_ref().map(Mtime::seconds).transpose()?;

        let mut data = self.extra;
        data.insert("name".to_string(), json!(name));
        data.insert("path".to_string(), json!(path));
        data.insert("index".to_string(), json!(index));
        if let Some(mime) = &self.mime {
            data.insert("mime".to_string(), json!(mime));
        }
        if let Some(size) = self.size {
            data.insert("size".to_string(), json!(size));
        }
        if let Some(mtime) = mtime {
            data.insert("mtime".to_string(), json!(mtime));
        }

        let embeddings = self
            .embeddings
            .into_iter()
            .map(|(model, vector)| {
                let model: u32 = model
                    .parse()
                    .with_context(|| format!("invalid model id {model:?}"))?;
                Ok((model, vector.values()?))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(StoredDocument {
            id: self.id,
            index,
            path,
            name,
            mime: self.mime,
            size: self.size,
            mtime,
            content: self.content,
            tags: self.tag,
            embeddings,
            data,
        })
    }
}

#[derive(Debug, Serialize)]
struct ExportLine {
    id: String,
    index: String,
    path: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tag: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    embeddings: BTreeMap<u32, String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Default, Serialize)]
pub struct TransferStats {
    pub documents: usize,
    pub tags: usize,
    pub embeddings: usize,
}

/// Imports JSONL documents in a single transaction. A bad line rolls back
/// everything read so far.
pub fn import_store(store: &Store, reader: impl std::io::Read) -> Result<TransferStats> {
    let mut stats = TransferStats::default();
    let mut buf = BufReader::new(reader);

    store.conn.execute_batch("BEGIN IMMEDIATE")?;
    let res = (|| -> Result<()> {
        let mut line = String::new();
        let mut line_no = 0usize;
        loop {
            line.clear();
            let bytes = buf.read_line(&mut line)?;
            if bytes == 0 {
                break;
            }
            line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed: ImportLine = serde_json::from_str(trimmed)
                .with_context(|| format!("parse import line {line_no}"))?;
            let doc = parsed
                .into_document()
                .with_context(|| format!("import line {line_no}"))?;
            store.upsert_document(&doc)?;
            stats.documents += 1;
            stats.tags += doc.tags.len();
            stats.embeddings += doc.embeddings.len();
        }
        Ok(())
    })();

    if let Err(err) = res {
        store.conn.execute_batch("ROLLBACK")?;
        return Err(err);
    }

    store.conn.execute_batch("COMMIT")?;
    debug!(documents = stats.documents, "import committed");
    Ok(stats)
}

/// Writes every stored document as one JSONL line, in insertion order.
pub fn export_store(store: &Store, mut writer: impl Write) -> Result<TransferStats> {
    let mut stats = TransferStats::default();
    let mut stmt = store.conn.prepare(
        "SELECT document.id, document.index_id, document.path, document.name, document.mime, \
         document.size, document.mtime, document.json_data, search.content \
         FROM document LEFT JOIN search ON search.rowid = document.seq ORDER BY document.seq",
    )?;
    let mut tag_stmt = store
        .conn
        .prepare("SELECT tag FROM tag WHERE id = ?1 ORDER BY tag")?;
    let mut vec_stmt = store
        .conn
        .prepare("SELECT model_id, embedding FROM embedding WHERE id = ?1 ORDER BY model_id")?;

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let json_data: String = row.get(7)?;
        let mut extra: Map<String, Value> =
            serde_json::from_str(&json_data).with_context(|| format!("stored data of {id}"))?;
        for key in ["name", "path", "index", "mime", "size", "mtime", "tag"] {
            extra.remove(key);
        }

        let mtime = row
            .get::<_, Option<i64>>(6)?
            .map(|secs| -> Result<String> {
                let ts = OffsetDateTime::from_unix_timestamp(secs)?;
                Ok(ts.format(&Rfc3339)?)
            })
            .transpose()?;
        let tag = tag_stmt
            .query_map(params![id], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let embeddings = vec_stmt
            .query_map(params![id], |r| {
                Ok((r.get::<_, u32>(0)?, r.get::<_, Vec<u8>>(1)?))
            })?
            .map(|r| r.map(|(model, bytes)| (model, BASE64.encode(bytes))))
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        let content: Option<String> = row.get(8)?;

        let line = ExportLine {
            index: row.get(1)?,
            path: escape::decode(&row.get::<_, String>(2)?),
            name: escape::decode(&row.get::<_, String>(3)?),
            mime: row.get(4)?,
            size: row.get(5)?,
            mtime,
            content: content.filter(|c| !c.is_empty()),
            id,
            tag,
            embeddings,
            extra,
        };
        stats.tags += line.tag.len();
        stats.embeddings += line.embeddings.len();
        writeln!(writer, "{}", serde_json::to_string(&line)?)?;
        stats.documents += 1;
    }
    Ok(stats)
}

/// Encodes a vector the way [`export_store`] writes it.
pub fn encode_vector(vector: &[f32]) -> String {
    BASE64.encode(to_bytes(vector))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::store::StoreMode;

    fn open_store(dir: &tempfile::TempDir) -> Store {
        let path = dir.path().join("quarry.db");
        Store::init(&path).expect("init");
        Store::open(&path, StoreMode::ReadWrite).expect("open")
    }

    #[test]
    fn imports_documents_with_tags_and_vectors() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let encoded = encode_vector(&[0.0, 1.0]);
        let input = format!(
            "{}\n\n{}\n",
            r#"{"id":"a","path":"/photos/2024/","name":"beach.png","mime":"image/png","size":10,"mtime":"2024-01-02T03:04:05Z","tag":["trip.#ff0000"],"embeddings":{"1":[1.0,0.0]},"camera":"x100"}"#,
            format!(
                r#"{{"id":"b","index":"other","path":"docs","name":"notes.txt","content":"hello world","embeddings":{{"1":"{encoded}"}}}}"#
            ),
        );
        let stats = import_store(&store, input.as_bytes()).expect("import");
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.tags, 1);
        assert_eq!(stats.embeddings, 2);

        let (path, mtime, data): (String, i64, String) = store
            .conn
            .query_row(
                "SELECT path, mtime, json_data FROM document WHERE id = 'a'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .expect("row");
        assert_eq!(path, "photos/2024");
        assert_eq!(mtime, 1_704_164_645);
        let data: Value = serde_json::from_str(&data).expect("json");
        assert_eq!(data["camera"], "x100");
        assert_eq!(data["index"], DEFAULT_INDEX);
    }

    #[test]
    fn bad_line_rolls_back_the_whole_import() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let input = "{\"id\":\"a\",\"path\":\"p\",\"name\":\"n\"}\n{\"id\":\"b\",\"path\":\"p\",\"name\":\"n\",\"mtime\":\"yesterday\"}\n";
        let err = import_store(&store, input.as_bytes()).expect_err("bad mtime");
        assert!(format!("{err:#}").contains("line 2"));
        assert_eq!(store.stats().expect("stats").documents, 0);
    }

    #[test]
    fn export_writes_plain_names_and_base64_vectors() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let input = r#"{"id":"a","path":"x/y","name":"a]b.txt","mtime":0,"tag":["red"],"embeddings":{"2":[0.5,0.25]},"camera":"x100"}"#;
        import_store(&store, input.as_bytes()).expect("import");

        let mut out = Vec::new();
        let stats = export_store(&store, &mut out).expect("export");
        assert_eq!(stats.documents, 1);
        let line: Value = serde_json::from_slice(&out).expect("json line");
        assert_eq!(line["name"], "a]b.txt");
        assert_eq!(line["path"], "x/y");
        assert_eq!(line["mtime"], "1970-01-01T00:00:00Z");
        assert_eq!(line["tag"], json!(["red"]));
        assert_eq!(line["embeddings"]["2"], encode_vector(&[0.5, 0.25]));
        assert_eq!(line["camera"], "x100");
        assert!(line.get("content").is_none());
    }
}
