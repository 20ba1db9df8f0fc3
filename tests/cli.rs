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

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

const ELASTIC_CONFIG: &str = r#"backend = "elastic"

[[models]]
id = 1
name = "clip"
path = "clip"
dimension = 2
"#;

fn quarry_cmd(config_root: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("quarry"));
    cmd.env("XDG_CONFIG_HOME", config_root);
    cmd.env("HOME", config_root);
    cmd.env("APPDATA", config_root);
    cmd.env_remove("QUARRY_LOG");
    cmd.current_dir(config_root);
    cmd
}

fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string(value).expect("json")).expect("write");
    path
}

fn run_json(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("run command");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("parse json")
}

#[test]
fn compile_falls_back_to_script_score_without_native_knn() {
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    fs::write(root.join("quarry.toml"), ELASTIC_CONFIG).expect("config");
    let request = write_json(
        root,
        "request.json",
        &json!({"query": "cat", "embedding": {"model": 1, "vector": [0.5, 0.5]}}),
    );

    let body = run_json(quarry_cmd(root).args(["compile", "--request"]).arg(&request));
    assert!(body.get("knn").is_none());
    assert!(body["query"]["function_score"]["script_score"].is_object());

    let body = run_json(
        quarry_cmd(root)
            .args(["compile", "--native-knn", "--request"])
            .arg(&request),
    );
    assert_eq!(body["knn"]["field"], json!("emb.clip"));
    assert_eq!(body["knn"]["num_candidates"], json!(600));
}

#[test]
fn compile_targets_the_reduced_backend_on_request() {
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    let request = write_json(
        root,
        "request.json",
        &json!({"query": "beach", "sort": "sizeDesc", "sizeMin": 10}),
    );

    let envelope = run_json(
        quarry_cmd(root)
            .args(["compile", "--backend", "sqlite", "--json", "--request"])
            .arg(&request),
    );
    assert_eq!(envelope["ok"], json!(true));
    assert_eq!(envelope["query"]["backend"], json!("sqlite"));
    assert_eq!(envelope["query"]["sort"], json!("sizeDesc"));
    let flat = &envelope["native"];
    assert_eq!(flat["query"], json!("beach"));
    assert_eq!(flat["sort"], json!("size"));
    assert_eq!(flat["sortAsc"], json!(false));
    assert_eq!(flat["sizeMin"], json!(10));
    assert_eq!(flat["fetchAggregations"], json!(true));
    assert!(flat.get("sizeMax").is_none());
}

#[test]
fn compile_rejects_unknown_sort_modes() {
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    let request = write_json(root, "request.json", &json!({"sort": "color"}));

    quarry_cmd(root)
        .args(["compile", "--request"])
        .arg(&request)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown sort mode 'color'"));

    let envelope = run_json(
        quarry_cmd(root)
            .args(["compile", "--json", "--request"])
            .arg(&request),
    );
    assert_eq!(envelope["ok"], json!(false));
    assert_eq!(envelope["error"]["code"], json!("configuration"));
}

#[test]
fn compile_rejects_a_cursor_from_another_query() {
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    let first = write_json(root, "first.json", &json!({"query": "a", "pageSize": 1}));
    let other = write_json(root, "other.json", &json!({"query": "b", "pageSize": 1}));

    quarry_cmd(root).arg("init").assert().success();
    let docs = "{\"id\":\"x\",\"path\":\"p\",\"name\":\"a one\"}\n{\"id\":\"y\",\"path\":\"p\",\"name\":\"a two\"}\n";
    quarry_cmd(root)
        .args(["import", "-"])
        .write_stdin(docs)
        .assert()
        .success();

    let page = run_json(quarry_cmd(root).args(["search", "--json", "--request"]).arg(&first));
    let cursor = page["next_cursor"].as_str().expect("cursor").to_string();

    quarry_cmd(root)
        .args(["compile", "--cursor", &cursor, "--request"])
        .arg(&other)
        .assert()
        .failure()
        .stderr(predicate::str::contains("different query"));
}

#[test]
fn normalize_decodes_names_and_tags() {
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    let response = write_json(
        root,
        "response.json",
        &json!({
            "took": 3,
            "hits": {"hits": [{
                "_id": "a",
                "_index": "main",
                "_score": 1.5,
                "_source": {"name": "a]]b.png", "path": "x", "mime": "image/png", "size": 3, "tag": ["red.#ff0000"]}
            }]},
            "aggregations": {"total_count": {"value": 1}, "total_size": {"value": 3}}
        }),
    );

    let envelope = run_json(
        quarry_cmd(root)
            .args(["normalize", "--json", "--response"])
            .arg(&response),
    );
    let hit = &envelope["results"][0];
    assert_eq!(hit["source"]["name"], json!("a]b.png"));
    assert_eq!(hit["tags"][0]["label"], json!("red"));
    assert_eq!(hit["tags"][0]["color"], json!("#ff0000"));
    assert_eq!(envelope["totals"], json!({"count": 1, "size": 3}));
}

#[test]
fn taxonomy_builds_mime_tree() {
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    let buckets = write_json(
        root,
        "buckets.json",
        &json!([
            {"key": "image/png", "doc_count": 5},
            {"key": "image/jpeg", "doc_count": 3},
            {"key": "video/mp4", "doc_count": 2}
        ]),
    );

    let tree = run_json(quarry_cmd(root).args(["taxonomy", "mime", "--buckets"]).arg(&buckets));
    assert_eq!(tree[0]["text"], json!("image"));
    assert_eq!(tree[0]["children"][0]["id"], json!("image/jpeg"));
    assert_eq!(tree[0]["children"][1]["count"], json!(5));
    assert_eq!(tree[1]["text"], json!("video"));
}

#[test]
fn treemap_injects_or_folds_own_sizes() {
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();
    let rows = write_json(
        root,
        "rows.json",
        &json!([
            {"path": "a", "size": 10},
            {"path": "a/b", "size": 5}
        ]),
    );

    let injected = run_json(quarry_cmd(root).args(["treemap", "--rows"]).arg(&rows));
    let children: Vec<&str> = injected[0]["children"]
        .as_array()
        .expect("children")
        .iter()
        .map(|c| c["text"].as_str().expect("text"))
        .collect();
    assert_eq!(children, vec![".", "b"]);
    assert!(injected[0].get("size").is_none());

    let folded = run_json(quarry_cmd(root).args(["treemap", "--self-leaf", "false", "--rows"]).arg(&rows));
    assert_eq!(folded[0]["size"], json!(10));
    assert_eq!(folded[0]["children"].as_array().map(Vec::len), Some(1));
}

#[test]
fn modes_lists_builtin_sorts() {
    let temp = TempDir::new().expect("tempdir");
    let modes = run_json(quarry_cmd(temp.path()).args(["modes", "--json"]));
    let ids: Vec<&str> = modes
        .as_array()
        .expect("modes")
        .iter()
        .map(|m| m["id"].as_str().expect("id"))
        .collect();
    assert_eq!(ids.len(), 8);
    assert!(ids.contains(&"score"));
    assert!(ids.contains(&"random"));
}
