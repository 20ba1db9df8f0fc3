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

mod backend;
mod cli;
mod compile;
mod config;
mod cursor;
mod elastic;
mod embed;
mod error;
mod escape;
mod normalize;
mod output;
mod query;
mod request;
mod session;
mod sort;
mod sql;
mod store;
mod tag;
mod taxonomy;
mod transfer;

use std::path::Path;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context as _;
use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::backend::open_backend;
use crate::cli::Cli;
use crate::cli::Commands;
use crate::cli::CompileArgs;
use crate::cli::FacetsArgs;
use crate::cli::SearchArgs;
use crate::cli::TagArgs;
use crate::cli::TagCommand;
use crate::compile::BackendCapabilities;
use crate::compile::build_compiler;
use crate::config::Config;
use crate::config::ConfigCtx;
use crate::cursor::PaginationCursor;
use crate::error::ConfigurationError;
use crate::error::SearchError;
use crate::normalize::FacetBucket;
use crate::normalize::RawResponse;
use crate::output::JsonResponse;
use crate::output::QueryOut;
use crate::output::StatsOut;
use crate::output::print_json;
use crate::output::print_value;
use crate::request::SearchRequest;
use crate::session::SearchSession;
use crate::store::Store;
use crate::store::StoreMode;
use crate::tag::Color;
use crate::tag::TagAction;
use crate::tag::TagMutation;
use crate::taxonomy::SelfLeaf;
use crate::taxonomy::TreemapRow;

const LOG_ENV: &str = "QUARRY_LOG";

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Init { path } => cmd_init(path),
        Commands::Import(args) => {
            handle_result(cmd_import(config, &args.path, args.json), args.json)
        }
        Commands::Export(args) => {
            handle_result(cmd_export(config, args.out, args.json), args.json)
        }
        Commands::Compile(args) => {
            let json = args.json;
            handle_result(cmd_compile(config, args), json)
        }
        Commands::Search(args) => {
            let json = args.json;
            handle_result(cmd_search(config, args), json)
        }
        Commands::Facets(args) => {
            let json = args.json;
            handle_result(cmd_facets(config, args), json)
        }
        Commands::Normalize(args) => {
            handle_result(cmd_normalize(config, &args.response, args.json), args.json)
        }
        Commands::Taxonomy(args) => cmd_taxonomy(args.facet, &args.buckets),
        Commands::Treemap(args) => cmd_treemap(config, &args.rows, args.self_leaf),
        Commands::Tag { action } => match action {
            TagCommand::Add(args) => {
                let json = args.json;
                handle_result(cmd_tag(config, args, TagAction::Add), json)
            }
            TagCommand::Remove(args) => {
                let json = args.json;
                handle_result(cmd_tag(config, args, TagAction::Remove), json)
            }
        },
        Commands::Modes { json } => cmd_modes(json),
        Commands::Stats { json } => handle_result(cmd_stats(config, json), json),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "quarry=debug" } else { "quarry=warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn error_code(err: &anyhow::Error) -> &'static str {
    if let Some(err) = err.downcast_ref::<SearchError>() {
        return err.code();
    }
    if err.downcast_ref::<ConfigurationError>().is_some() {
        return "configuration";
    }
    "error"
}

fn handle_result(result: Result<()>, json: bool) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            if json {
                let resp = JsonResponse::error(error_code(&err), &err.to_string())
                    .with_details(err.chain().nth(1).map(|cause| cause.to_string()));
                print_json(&resp)?;
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}

fn cmd_init(path: Option<PathBuf>) -> Result<()> {
    let root = path.unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&root).with_context(|| format!("create dir {root:?}"))?;

    let config_path = root.join(config::CONFIG_FILE);
    if config_path.exists() {
        anyhow::bail!(
            "{} already exists at {}",
            config::CONFIG_FILE,
            config_path.display()
        );
    }

    let config = Config::default();
    config::write_config(&config_path, &config)?;

    let store_path = root.join(&config.store_path);
    Store::init(&store_path)?;

    println!("Initialized quarry store at {}", store_path.display());
    Ok(())
}

fn open_store(ctx: &ConfigCtx, mode: StoreMode) -> Result<Store> {
    Store::open(&ctx.store_path(), mode)
}

fn cmd_import(config: Option<&Path>, path: &Path, json: bool) -> Result<()> {
    let ctx = ConfigCtx::load(config)?;
    let store = open_store(&ctx, StoreMode::ReadWrite)?;
    let stats = if path == Path::new("-") {
        transfer::import_store(&store, std::io::stdin().lock())?
    } else {
        let file =
            std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
        transfer::import_store(&store, file)?
    };

    if json {
        let resp = JsonResponse::ok().with_summary(json!(stats));
        print_json(&resp)?;
    } else {
        println!(
            "Imported {} docs ({} tags, {} vectors)",
            stats.documents, stats.tags, stats.embeddings
        );
    }
    Ok(())
}

fn cmd_export(config: Option<&Path>, out: Option<PathBuf>, json: bool) -> Result<()> {
    if json && out.is_none() {
        anyhow::bail!("--json requires --out for export");
    }
    let ctx = ConfigCtx::load(config)?;
    let store = open_store(&ctx, StoreMode::ReadOnly)?;

    let stats = if let Some(path) = out {
        let file =
            std::fs::File::create(&path).with_context(|| format!("create {}", path.display()))?;
        transfer::export_store(&store, file)?
    } else {
        let stdout = std::io::stdout();
        let handle = stdout.lock();
        transfer::export_store(&store, handle)?
    };

    if json {
        let resp = JsonResponse::ok().with_summary(json!(stats));
        print_json(&resp)?;
    }
    Ok(())
}

/// Loads the request file and applies a `--cursor` token on top of it.
fn load_request(path: &Path, cursor: Option<&str>, config: &Config) -> Result<SearchRequest> {
    let mut request = query::load_request(path, config)?;
    if let Some(token) = cursor {
        request.cursor = Some(PaginationCursor::decode(token)?);
    }
    Ok(request)
}

fn query_out(session: &SearchSession, request: &SearchRequest) -> QueryOut {
    let sort = match session.registry().get(&request.sort) {
        Some(mode) => mode.id.to_string(),
        None => request.sort.clone(),
    };
    QueryOut {
        backend: session.backend_kind().as_str().to_string(),
        sort,
        page_size: request.page_size,
        fingerprint: request.fingerprint(),
    }
}

fn cmd_compile(config: Option<&Path>, args: CompileArgs) -> Result<()> {
    let ctx = ConfigCtx::load(config)?;
    let request = load_request(&args.request, args.cursor.as_deref(), &ctx.config)?;

    let kind = args.backend.unwrap_or(ctx.config.backend);
    let configured = ctx.config.elastic.capabilities();
    let caps = BackendCapabilities {
        native_knn: args.native_knn || configured.native_knn,
        legacy_highlight: args.legacy_highlight || configured.legacy_highlight,
    };
    let session = SearchSession::new(
        build_compiler(kind, caps),
        ctx.config.catalog(),
        ctx.config.max_page_size,
        ctx.config.normalize_options(),
    );

    let native = if args.facet.is_empty() {
        session.compile(&request)?
    } else {
        session.compile_facets(&request, &args.facet)?
    };
    let native = native.to_json();

    if args.json {
        let resp = JsonResponse::ok()
            .with_query(query_out(&session, &request))
            .with_native(native);
        print_json(&resp)?;
    } else {
        print_value(&native)?;
    }
    Ok(())
}

fn cmd_search(config: Option<&Path>, args: SearchArgs) -> Result<()> {
    let started = Instant::now();
    let ctx = ConfigCtx::load(config)?;
    let request = load_request(&args.request, args.cursor.as_deref(), &ctx.config)?;
    let backend = open_backend(&ctx, StoreMode::ReadOnly)?;
    let mut session = query::build_session(&ctx.config);
    let query = query_out(&session, &request);

    let facets = if args.facet.is_empty() {
        None
    } else {
        Some(query::run_facets(
            &session,
            backend.as_ref(),
            &request,
            &args.facet,
        )?)
    };
    let outcome = query::run_pages(&mut session, backend.as_ref(), request, args.pages.max(1))?;
    let next_cursor = outcome
        .next_cursor
        .as_ref()
        .map(PaginationCursor::encode)
        .transpose()?;

    if args.json {
        let mut resp = JsonResponse::ok()
            .with_query(query)
            .with_results(outcome.results())
            .with_totals(outcome.totals)
            .with_next_cursor(next_cursor)
            .with_stats(StatsOut {
                took_ms: started.elapsed().as_millis() as i64,
                pages: outcome.pages.len(),
                hits: outcome.hit_count(),
                timings: Some(outcome.timings.clone()),
            });
        if let Some(facets) = facets {
            resp = resp.with_facets(serde_json::to_value(facets)?);
        }
        print_json(&resp)?;
        return Ok(());
    }

    if let Some(totals) = outcome.totals {
        println!("{} documents, {} bytes", totals.count, totals.size);
    }
    for hit in outcome.pages.iter().flat_map(|page| page.hits.iter()) {
        let score = hit
            .score
            .map(|score| format!("{score:.3}"))
            .unwrap_or_else(|| "-".to_string());
        let path = if hit.source.path.is_empty() {
            hit.source.name.clone()
        } else {
            format!("{}/{}", hit.source.path, hit.source.name)
        };
        println!("{score:>8}  {path}");
    }
    if let Some(cursor) = next_cursor {
        println!("next: {cursor}");
    }
    Ok(())
}

fn cmd_facets(config: Option<&Path>, args: FacetsArgs) -> Result<()> {
    let ctx = ConfigCtx::load(config)?;
    let request = load_request(&args.request, None, &ctx.config)?;
    let backend = open_backend(&ctx, StoreMode::ReadOnly)?;
    let session = query::build_session(&ctx.config);
    let trees = query::run_facets(&session, backend.as_ref(), &request, &args.facet)?;

    if args.json {
        let resp = JsonResponse::ok()
            .with_query(query_out(&session, &request))
            .with_facets(serde_json::to_value(trees)?);
        print_json(&resp)?;
    } else {
        print_value(&trees)?;
    }
    Ok(())
}

fn cmd_normalize(config: Option<&Path>, path: &Path, json: bool) -> Result<()> {
    let ctx = ConfigCtx::load(config)?;
    let text = query::read_input(path)?;
    let raw: RawResponse = serde_json::from_str(&text)
        .map_err(SearchError::from)
        .with_context(|| format!("parse {}", path.display()))?;
    let hits = normalize::normalize(&raw, &ctx.config.normalize_options())?;
    let results = hits
        .iter()
        .map(serde_json::to_value)
        .collect::<serde_json::Result<Vec<_>>>()?;

    if json {
        let resp = JsonResponse::ok()
            .with_results(results)
            .with_totals(normalize::totals(&raw));
        print_json(&resp)?;
    } else {
        print_value(&results)?;
    }
    Ok(())
}

fn cmd_taxonomy(facet: compile::Facet, path: &Path) -> Result<()> {
    let text = query::read_input(path)?;
    let buckets: Vec<FacetBucket> =
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    print_value(&query::facet_tree(facet, &buckets))
}

fn cmd_treemap(config: Option<&Path>, path: &Path, self_leaf: Option<bool>) -> Result<()> {
    let ctx = ConfigCtx::load(config)?;
    let text = query::read_input(path)?;
    let rows: Vec<TreemapRow> =
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    let policy = if self_leaf.unwrap_or(ctx.config.treemap_self_leaf) {
        SelfLeaf::Inject
    } else {
        SelfLeaf::Fold
    };
    print_value(&taxonomy::treemap(&rows, policy))
}

fn cmd_tag(config: Option<&Path>, args: TagArgs, action: TagAction) -> Result<()> {
    let color = match args.color.as_deref() {
        Some(hex) => Some(
            Color::parse_hex(hex).with_context(|| format!("invalid color {hex:?}, expected #rrggbb"))?,
        ),
        None => None,
    };
    let label = args.label.trim();
    if label.is_empty() {
        anyhow::bail!("tag label must not be empty");
    }
    let mutation = TagMutation {
        doc_id: args.id,
        label: label.to_string(),
        color,
        action,
    };

    let ctx = ConfigCtx::load(config)?;
    let backend = open_backend(&ctx, StoreMode::ReadWrite)?;
    backend.mutate_tag(&mutation)?;

    if args.json {
        let resp = JsonResponse::ok().with_summary(json!({
            "id": mutation.doc_id,
            "tag": mutation.stored_value(),
            "action": match action {
                TagAction::Add => "add",
                TagAction::Remove => "remove",
            },
        }));
        print_json(&resp)?;
    } else {
        let verb = match action {
            TagAction::Add => "Added",
            TagAction::Remove => "Removed",
        };
        println!("{verb} tag {} on {}", mutation.stored_value(), mutation.doc_id);
    }
    Ok(())
}

fn cmd_modes(json: bool) -> Result<()> {
    let registry = sort::SortModeRegistry::builtin();
    if json {
        let modes: Vec<_> = registry
            .iter()
            .map(|mode| json!({ "id": mode.id, "label": mode.label }))
            .collect();
        return print_value(&modes);
    }
    for mode in registry.iter() {
        println!("{:<10} {}", mode.id, mode.label);
    }
    Ok(())
}

fn cmd_stats(config: Option<&Path>, json: bool) -> Result<()> {
    let ctx = ConfigCtx::load(config)?;
    let store = open_store(&ctx, StoreMode::ReadOnly)?;
    let stats = store.stats()?;

    if json {
        let resp = JsonResponse::ok().with_summary(json!(stats));
        print_json(&resp)?;
    } else {
        println!("Documents: {}", stats.documents);
        println!("Tags: {}", stats.tags);
        println!("Embeddings: {}", stats.embeddings);
        println!("DB size: {} bytes", stats.db_size_bytes);
    }
    Ok(())
}
