//! Codegraph CLI - ingest extracted code facts and query the knowledge graph

use anyhow::Context;
use clap::{Parser, Subcommand};
use codegraph::config::{self, CodegraphConfig};
use codegraph::query::QueryEngine;
use codegraph::raw::RawBatch;
use codegraph::ui::{self, Icons};
use codegraph::{
    CodeEntity, EntityId, EntityType, Error, GraphStore, Pipeline, SqliteStore, StoreView,
    TransformReport,
};
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "codegraph")]
#[command(version)]
#[command(about = "Code knowledge graph - ingest extracted code facts and run graph analyses")]
#[command(long_about = r#"
Codegraph stores entities and relationships extracted from source code in a
persistent graph and answers analytical questions over it:
  • Call graph queries (callers, callees, call paths)
  • Centrality and most-called rankings
  • Dead code, undocumented and complex functions
  • Embedding-based clone detection

Example usage:
  codegraph init
  codegraph ingest --input extracted.json --similarity 0.9
  codegraph complex --threshold 10
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file and install the schema
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Ingest an extractor batch (JSON)
    Ingest {
        /// Path to the batch file
        #[arg(short, long)]
        input: PathBuf,

        /// Records per sub-transaction
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Derive similar relationships at or above this cosine score
        #[arg(long)]
        similarity: Option<f64>,

        /// Repository name recorded for this batch
        #[arg(short, long)]
        repository: Option<String>,
    },

    /// Show store and graph statistics
    Stats,

    /// Find entities whose name matches a regex
    Search {
        #[arg(short, long)]
        pattern: String,
    },

    /// List entities of one type
    ByType {
        #[arg(short = 't', long = "type")]
        entity_type: EntityType,
    },

    /// Entities that call the given entity
    Callers {
        #[arg(long)]
        id: EntityId,
    },

    /// Entities the given entity calls
    Callees {
        #[arg(long)]
        id: EntityId,
    },

    /// Call chain between two entities
    Chain {
        #[arg(long)]
        from: EntityId,

        #[arg(long)]
        to: EntityId,

        /// Search call paths up to this many hops instead of the two-hop chain
        #[arg(long)]
        depth: Option<usize>,
    },

    /// Entities ranked by incoming calls
    MostCalled {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Functions ranked by total call degree
    Central {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Functions without a docstring
    Undocumented,

    /// Functions at or above a complexity threshold
    Complex {
        #[arg(short, long)]
        threshold: i64,
    },

    /// Pairs joined by a similarity at or above the threshold
    Clones {
        #[arg(short, long)]
        threshold: f64,
    },

    /// Functions nothing calls
    Unused,

    /// Retract an entity and its relationships
    Retract {
        #[arg(long)]
        id: EntityId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn is_human(self) -> bool {
        self == OutputMode::Human
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    ok: bool,
    command: &'a str,
    data: T,
}

fn emit<T: Serialize>(mode: OutputMode, ok: bool, command: &str, data: T) -> anyhow::Result<()> {
    if mode == OutputMode::Json {
        let doc = Envelope { ok, command, data };
        println!("{}", serde_json::to_string_pretty(&doc)?);
    }
    Ok(())
}

pub fn emit_success<T: Serialize>(mode: OutputMode, command: &str, data: T) -> anyhow::Result<()> {
    emit(mode, true, command, data)
}

pub fn emit_failure<T: Serialize>(mode: OutputMode, command: &str, data: T) -> anyhow::Result<()> {
    emit(mode, false, command, data)
}

/// JSON body for a failed ingest; the transform report is always included
fn ingest_failure(report: &TransformReport, error: &Error) -> serde_json::Value {
    let (chunks_applied, chunks_total) = match error {
        Error::PartialBatchCommit {
            chunks_applied,
            chunks_total,
            ..
        } => (Some(*chunks_applied), Some(*chunks_total)),
        _ => (None, None),
    };
    serde_json::json!({
        "report": report,
        "chunks_applied": chunks_applied,
        "chunks_total": chunks_total,
        "error": format!("{:#}", error),
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    ui::init_theme(mode.is_human() && ui::Theme::terminal_wants_color());

    if let Err(e) = run(cli, mode) {
        if mode.is_human() {
            ui::error(&format!("{:#}", e));
        }
        return Err(e);
    }
    Ok(())
}

fn run(cli: Cli, mode: OutputMode) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(config::CONFIG_FILE));

    let command = match cli.command {
        Commands::Init { force } => {
            return run_init(&config_path, cli.database.as_deref(), force, mode);
        }
        command => command,
    };

    let settings = CodegraphConfig::load(&config_path)?;
    let database = settings.resolve_database(cli.database.as_deref(), &std::env::current_dir()?);
    config::ensure_parent_dir(&database)?;
    let store = SqliteStore::open(&database)
        .with_context(|| format!("opening database {}", database.display()))?;

    match command {
        Commands::Init { .. } => {}

        Commands::Ingest {
            input,
            chunk_size,
            similarity,
            repository,
        } => run_ingest(&store, &settings, &input, chunk_size, similarity, repository, mode)?,

        Commands::Stats => {
            let graph = GraphStore::new(&store, config::DEFAULT_CHUNK_SIZE);
            let view = graph.snapshot()?;
            let graph_stats = QueryEngine::new(&view).repository_statistics();
            let store_stats = store.stats()?;

            if mode.is_human() {
                ui::header(Icons::STATS, &format!("Codegraph Statistics ({})", database.display()));
                println!(
                    "{}",
                    ui::stats_table(&[
                        ("Functions", graph_stats.function_count.to_string()),
                        ("Classes", graph_stats.class_count.to_string()),
                        ("Modules", graph_stats.module_count.to_string()),
                        ("Relationships", graph_stats.relationship_count.to_string()),
                        ("Repositories", view.repositories().len().to_string()),
                        ("Transactions", store_stats.transactions.to_string()),
                        ("Datoms asserted", store_stats.assertions.to_string()),
                        ("Datoms retracted", store_stats.retractions.to_string()),
                    ])
                );
            } else {
                emit_success(
                    mode,
                    "stats",
                    serde_json::json!({
                        "graph": graph_stats,
                        "store": store_stats,
                        "repositories": view.repositories(),
                        "basis_tx": view.basis_tx(),
                    }),
                )?;
            }
        }

        Commands::Search { pattern } => {
            let view = snapshot(&store)?;
            let found = QueryEngine::new(&view).find_by_name_pattern(&pattern)?;
            print_entities(mode, "search", &format!("Entities matching /{}/", pattern), &found)?;
        }

        Commands::ByType { entity_type } => {
            let view = snapshot(&store)?;
            let found = QueryEngine::new(&view).entities_by_type(entity_type);
            print_entities(mode, "by-type", &format!("{} entities", entity_type), &found)?;
        }

        Commands::Callers { id } => {
            let view = snapshot(&store)?;
            let found = QueryEngine::new(&view).callers_of(id);
            print_entities(mode, "callers", &format!("{} Callers of {}", Icons::UP, id), &found)?;
        }

        Commands::Callees { id } => {
            let view = snapshot(&store)?;
            let found = QueryEngine::new(&view).callees_of(id);
            print_entities(mode, "callees", &format!("{} Callees of {}", Icons::DOWN, id), &found)?;
        }

        Commands::Chain { from, to, depth } => {
            let view = snapshot(&store)?;
            let engine = QueryEngine::new(&view);
            let title = format!("{} Call chain {} -> {}", Icons::LINK, from, to);
            match depth {
                Some(depth) => {
                    let path = engine.call_path(from, to, depth)?.unwrap_or_default();
                    print_entities(mode, "chain", &title, &path)?;
                }
                None => {
                    let chain = engine.call_chain(from, to);
                    print_entities(mode, "chain", &title, &chain)?;
                }
            }
        }

        Commands::MostCalled { limit } => {
            let view = snapshot(&store)?;
            let ranked = QueryEngine::new(&view).most_called(limit)?;
            if mode.is_human() {
                ui::header(Icons::STATS, "Most called");
                if ranked.is_empty() {
                    ui::empty("calls");
                } else {
                    println!("{}", ui::ranking_table(&ranked));
                }
            } else {
                emit_success(mode, "most-called", &ranked)?;
            }
        }

        Commands::Central { limit } => {
            let view = snapshot(&store)?;
            let ranked = QueryEngine::new(&view).central_functions(limit)?;
            if mode.is_human() {
                ui::header(Icons::STATS, "Central functions");
                if ranked.is_empty() {
                    ui::empty("connected functions");
                } else {
                    println!("{}", ui::ranking_table(&ranked));
                }
            } else {
                emit_success(mode, "central", &ranked)?;
            }
        }

        Commands::Undocumented => {
            let view = snapshot(&store)?;
            let found = QueryEngine::new(&view).undocumented_functions();
            print_entities(mode, "undocumented", "Undocumented functions", &found)?;
        }

        Commands::Complex { threshold } => {
            let view = snapshot(&store)?;
            let found = QueryEngine::new(&view).complex_functions(threshold)?;
            print_entities(
                mode,
                "complex",
                &format!("Functions with complexity at or above {}", threshold),
                &found,
            )?;
        }

        Commands::Clones { threshold } => {
            let view = snapshot(&store)?;
            let pairs = QueryEngine::new(&view).potential_clones(threshold)?;
            if mode.is_human() {
                ui::header(Icons::TWINS, &format!("Potential clones (similarity >= {})", threshold));
                if pairs.is_empty() {
                    ui::empty("clone pairs");
                } else {
                    println!("{}", ui::clone_table(&pairs));
                }
            } else {
                emit_success(mode, "clones", &pairs)?;
            }
        }

        Commands::Unused => {
            let view = snapshot(&store)?;
            let found = QueryEngine::new(&view).unused_functions();
            print_entities(mode, "unused", "Functions with no callers", &found)?;
        }

        Commands::Retract { id } => {
            let graph = GraphStore::new(&store, config::DEFAULT_CHUNK_SIZE);
            let report = graph.retract_entity(id)?;
            if mode.is_human() {
                if report.found {
                    ui::status(Icons::DEL, "Retracted", &id.to_string());
                    ui::summary_row(
                        "Relationships retracted:",
                        &report.relationships_retracted.to_string(),
                    );
                } else {
                    ui::warn(&format!("No entity with id {}", id));
                }
            } else {
                emit_success(mode, "retract", &report)?;
            }
        }
    }

    Ok(())
}

fn snapshot(store: &SqliteStore) -> anyhow::Result<StoreView> {
    Ok(GraphStore::new(store, config::DEFAULT_CHUNK_SIZE).snapshot()?)
}

fn run_init(
    config_path: &Path,
    database: Option<&Path>,
    force: bool,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let database = CodegraphConfig::default().resolve_database(database, &std::env::current_dir()?);
    CodegraphConfig::for_database(&database).save(config_path, force)?;
    config::ensure_parent_dir(&database)?;

    let store = SqliteStore::open(&database)?;
    let report = GraphStore::new(&store, config::DEFAULT_CHUNK_SIZE).install_schema()?;

    if mode.is_human() {
        ui::banner("Codegraph", &format!("Version {}", env!("CARGO_PKG_VERSION")));
        ui::success(&format!("Wrote {}", config_path.display()));
        ui::status(Icons::DATABASE, "Database", &database.display().to_string());
        ui::status(Icons::GEAR, "Schema", &report.to_string());
    } else {
        emit_success(
            mode,
            "init",
            serde_json::json!({
                "config": config_path,
                "database": database,
                "schema": report,
            }),
        )?;
    }
    Ok(())
}

fn run_ingest(
    store: &SqliteStore,
    settings: &CodegraphConfig,
    input: &Path,
    chunk_size: Option<usize>,
    similarity: Option<f64>,
    repository: Option<String>,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let started = Instant::now();
    let chunk_size = settings.resolve_chunk_size(chunk_size)?;
    let graph = GraphStore::new(store, chunk_size);

    let spinner = mode.is_human().then(|| ui::Spinner::new("Installing schema..."));
    graph.install_schema()?;

    if let Some(spinner) = &spinner {
        spinner.set_message(&format!("Reading {}...", input.display()));
    }
    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let raw = RawBatch::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", input.display()))?;

    if let Some(spinner) = &spinner {
        spinner.set_message("Transforming...");
    }
    let known = graph.snapshot()?;
    let mut pipeline = Pipeline::new().with_known_entities(&known);
    if let Some(threshold) = similarity.or(settings.similarity_threshold) {
        pipeline = pipeline.with_similarity_threshold(threshold);
    }
    if let Some(name) = repository.or_else(|| settings.repository.clone()) {
        pipeline = pipeline.with_repository(name, None);
    }
    let (batch, report) = pipeline.build(&raw);
    if let Some(spinner) = &spinner {
        spinner.finish_and_clear();
    }

    let progress = mode
        .is_human()
        .then(|| ui::CommitProgress::new(batch.len(), chunk_size.get()));
    let committed = graph.commit_with_progress(&batch, |applied, total| {
        if let Some(progress) = &progress {
            progress.chunk_applied(applied, total);
        }
    });

    match (&committed, &progress) {
        (Ok(_), Some(progress)) => progress.finish(),
        (Err(_), Some(progress)) => progress.abandon("commit failed"),
        _ => {}
    }

    if mode.is_human() {
        ui::header(Icons::PACKAGE, &format!("Ingested {}", input.display()));
        print!("{}", report);
        ui::timing(&format!("{:.2?}", started.elapsed()));
    }

    let result = match committed {
        Ok(result) => result,
        Err(e) => {
            if mode.is_human() {
                if let Error::PartialBatchCommit {
                    chunks_applied,
                    chunks_total,
                    ..
                } = &e
                {
                    ui::warn(&format!(
                        "{} of {} chunks were persisted before the failure",
                        chunks_applied, chunks_total
                    ));
                }
            } else {
                emit_failure(mode, "ingest", ingest_failure(&report, &e))?;
            }
            return Err(e.into());
        }
    };
    if mode.is_human() {
        ui::success(&format!(
            "Committed {} chunks ({} datoms)",
            result.chunks_applied, result.datoms_asserted
        ));
    } else {
        emit_success(
            mode,
            "ingest",
            serde_json::json!({ "report": report, "commit": result }),
        )?;
    }
    Ok(())
}

fn print_entities(
    mode: OutputMode,
    command: &str,
    title: &str,
    entities: &[&CodeEntity],
) -> anyhow::Result<()> {
    if !mode.is_human() {
        return emit_success(mode, command, entities);
    }

    ui::header(Icons::SEARCH, title);
    if entities.is_empty() {
        ui::empty("entities");
    } else {
        println!("{}", ui::entity_table(entities));
        ui::summary_row("Total:", &entities.len().to_string());
    }
    Ok(())
}
