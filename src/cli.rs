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

use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;

use crate::compile::BackendKind;
use crate::compile::Facet;

#[derive(Parser, Debug)]
#[command(
    name = "quarry",
    version,
    about = "Query compiler and result normalizer for document search backends"
)]
pub struct Cli {
    /// Configuration file to use instead of the discovered quarry.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a quarry.toml and create an empty local store
    Init {
        /// Directory to initialize
        path: Option<PathBuf>,
    },

    /// Import JSONL documents into the local store
    Import(ImportArgs),

    /// Export the local store as JSONL
    Export(ExportArgs),

    /// Print the native query a request compiles to
    Compile(CompileArgs),

    /// Run a request against the configured backend
    Search(SearchArgs),

    /// Build facet trees for a request
    Facets(FacetsArgs),

    /// Normalize a raw backend response
    Normalize(NormalizeArgs),

    /// Build a facet tree from raw buckets
    Taxonomy(TaxonomyArgs),

    /// Build a size treemap from path rows
    Treemap(TreemapArgs),

    /// Add or remove a document tag
    Tag {
        #[command(subcommand)]
        action: TagCommand,
    },

    /// List the sort modes
    Modes {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Show local store stats
    Stats {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// JSONL file, or - for stdin
    pub path: PathBuf,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output file (stdout when omitted)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct CompileArgs {
    /// Request JSON file, or - for stdin
    #[arg(long)]
    pub request: PathBuf,

    /// Backend to compile for (defaults to the configured one)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Assume the backend supports native kNN
    #[arg(long)]
    pub native_knn: bool,

    /// Assume a backend without max_analyzed_offset support
    #[arg(long)]
    pub legacy_highlight: bool,

    /// Compile the facet-only form for these facets
    #[arg(long, value_enum)]
    pub facet: Vec<Facet>,

    /// Resume from an encoded cursor
    #[arg(long)]
    pub cursor: Option<String>,

    /// Wrap the query in a JSON envelope
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Request JSON file, or - for stdin
    #[arg(long)]
    pub request: PathBuf,

    /// Maximum number of pages to fetch
    #[arg(long, default_value_t = 1)]
    pub pages: usize,

    /// Resume from an encoded cursor
    #[arg(long)]
    pub cursor: Option<String>,

    /// Also build facet trees
    #[arg(long, value_enum)]
    pub facet: Vec<Facet>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct FacetsArgs {
    /// Request JSON file, or - for stdin
    #[arg(long)]
    pub request: PathBuf,

    /// Facets to build
    #[arg(long, value_enum, required = true)]
    pub facet: Vec<Facet>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct NormalizeArgs {
    /// Raw response JSON file, or - for stdin
    #[arg(long)]
    pub response: PathBuf,

    /// Output JSON envelope
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct TaxonomyArgs {
    /// Which tree to build
    #[arg(value_enum)]
    pub facet: Facet,

    /// Bucket array (`key`/`doc_count`) JSON file, or - for stdin
    #[arg(long)]
    pub buckets: PathBuf,
}

#[derive(Args, Debug)]
pub struct TreemapArgs {
    /// Row array (`path`/`size`) JSON file, or - for stdin
    #[arg(long)]
    pub rows: PathBuf,

    /// Emit a directory's own size as a `.` leaf (defaults to treemap_self_leaf)
    #[arg(long)]
    pub self_leaf: Option<bool>,
}

#[derive(Subcommand, Debug)]
pub enum TagCommand {
    /// Add a tag to a document
    Add(TagArgs),

    /// Remove a tag from a document
    Remove(TagArgs),
}

#[derive(Args, Debug)]
pub struct TagArgs {
    /// Document id
    #[arg(long)]
    pub id: String,

    /// Tag label, `.`-separated for hierarchy
    #[arg(long)]
    pub label: String,

    /// Color as rrggbb, with or without a leading #
    #[arg(long)]
    pub color: Option<String>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}
