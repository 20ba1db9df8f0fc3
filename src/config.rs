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

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::compile::BackendCapabilities;
use crate::compile::BackendKind;
use crate::embed::EmbeddingModel;
use crate::embed::ModelCatalog;
use crate::normalize::NormalizeOptions;
use crate::request::DEFAULT_PAGE_SIZE;
use crate::request::MAX_PAGE_SIZE;
use crate::tag::DEFAULT_LUMINANCE_THRESHOLD;

pub const CONFIG_FILE: &str = "quarry.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendKind,
    pub store_path: PathBuf,
    pub page_size: usize,
    pub max_page_size: usize,
    pub fragment_size: usize,
    pub luminance_threshold: f32,
    pub treemap_self_leaf: bool,
    // Tables come last so the file serializes.
    pub elastic: ElasticConfig,
    pub models: Vec<EmbeddingModel>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            store_path: PathBuf::from("quarry.db"),
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            fragment_size: 200,
            luminance_threshold: DEFAULT_LUMINANCE_THRESHOLD,
            treemap_self_leaf: true,
            elastic: ElasticConfig::default(),
            models: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticConfig {
    pub url: String,
    pub index: String,
    pub native_knn: bool,
    pub legacy_highlight: bool,
    pub timeout_ms: u64,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            index: "documents".to_string(),
            native_knn: false,
            legacy_highlight: false,
            timeout_ms: 10_000,
        }
    }
}

impl ElasticConfig {
    pub fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            native_knn: self.native_knn,
            legacy_highlight: self.legacy_highlight,
        }
    }
}

impl Config {
    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog::new(self.models.clone())
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            luminance_threshold: self.luminance_threshold,
        }
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        match self.backend {
            BackendKind::Elastic => self.elastic.capabilities(),
            BackendKind::Sqlite => BackendCapabilities::default(),
        }
    }

    fn check(&self) -> Result<()> {
        if self.max_page_size == 0 {
            anyhow::bail!("max_page_size must be at least 1");
        }
        if self.page_size == 0 || self.page_size > self.max_page_size {
            anyhow::bail!(
                "page_size {} is outside 1..={}",
                self.page_size,
                self.max_page_size
            );
        }
        let mut ids: Vec<u32> = self.models.iter().map(|model| model.id).collect();
        ids.sort_unstable();
        if let Some(dup) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            anyhow::bail!("embedding model id {} is defined twice", dup[0]);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigCtx {
    /// Directory relative store paths resolve against.
    pub root: PathBuf,
    pub config: Config,
    /// The file the configuration was read from, if any.
    pub source: Option<PathBuf>,
}

impl ConfigCtx {
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().context("get current dir")?;
        Self::load_from(&cwd, explicit)
    }

    pub fn load_from(start: &Path, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let config = read_config(path)?;
            let root = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| start.to_path_buf());
            return Ok(Self {
                root,
                config,
                source: Some(path.to_path_buf()),
            });
        }
        if let Some(root) = find_config_root(start) {
            let path = root.join(CONFIG_FILE);
            return Ok(Self {
                config: read_config(&path)?,
                root,
                source: Some(path),
            });
        }
        if let Some(path) = global_config_path().filter(|path| path.exists()) {
            return Ok(Self {
                root: start.to_path_buf(),
                config: read_config(&path)?,
                source: Some(path),
            });
        }
        Ok(Self {
            root: start.to_path_buf(),
            config: Config::default(),
            source: None,
        })
    }

    pub fn store_path(&self) -> PathBuf {
        if self.config.store_path.is_absolute() {
            self.config.store_path.clone()
        } else {
            self.root.join(&self.config.store_path)
        }
    }
}

fn config_dir() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return Some(PathBuf::from(appdata));
        }
        if let Ok(profile) = std::env::var("USERPROFILE") {
            return Some(PathBuf::from(profile).join("AppData").join("Roaming"));
        }
        return None;
    }

    if cfg!(target_os = "macos") {
        let home = std::env::var("HOME").ok()?;
        return Some(
            PathBuf::from(home)
                .join("Library")
                .join("Application Support"),
        );
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg));
    }
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(home).join(".config"))
}

pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("quarry").join(CONFIG_FILE))
}

pub fn find_config_root(start: &Path) -> Option<PathBuf> {
    let mut cur = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    loop {
        if cur.join(CONFIG_FILE).is_file() {
            return Some(cur);
        }
        match cur.parent() {
            Some(parent) => cur = parent.to_path_buf(),
            None => return None,
        }
    }
}

pub fn read_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let config: Config =
        toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    config.check()?;
    Ok(config)
}

pub fn write_config(path: &Path, config: &Config) -> Result<()> {
    let text = toml::to_string_pretty(config).context("serialize config")?;
    std::fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
