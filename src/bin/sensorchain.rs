//! Sensorchain CLI: replay recorded graphs through the pipeline and manage
//! the matching store.
//!
//! Usage:
//!   sensorchain replay --graph snapshot.json [--entry uri]
//!   sensorchain store <subcommand> [--db path]

use clap::{Args, Parser, Subcommand};
use sensorchain::plugins::builtin_registry;
use sensorchain::storage::parse_timestamp;
use sensorchain::{
    build_training_set, nearest_match, run_pipeline, CollectionName, Config, DispatchLoop,
    DocumentFilter, Fetcher, GraphCrawler, HttpFetcher, MatchStore, MemoryGraph, OpenStore,
    QueryPoint, SearchWindow, SqliteStore, TrainingQuery,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "sensorchain",
    version,
    about = "Sensor ingestion pipeline and spatiotemporal matching store"
)]
struct Cli {
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Path to YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a recorded graph and dispatch every discovered sensor
    Replay {
        /// Graph snapshot (JSON)
        #[arg(long)]
        graph: PathBuf,
        /// Resource to start crawling from (overrides config)
        #[arg(long)]
        entry: Option<String>,
        /// Fetch resource attributes over HTTP instead of from the snapshot
        #[arg(long)]
        live_fetch: bool,
        /// Write the resulting graph, including published sensors, here
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Manage the matching store
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// Upsert a JSON array of documents into a collection
    Write {
        collection: String,
        /// File holding a JSON array of objects
        file: PathBuf,
    },
    /// List collections
    List,
    /// Drop a collection and its documents
    Drop { collection: String },
    /// Print the documents of a collection as JSON lines
    Show {
        collection: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Find the best match for a point
    Nearest {
        collection: String,
        #[arg(long)]
        timestamp: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[command(flatten)]
        window: WindowArgs,
    },
    /// Join a measure collection with conditions into training examples
    Train {
        collection: String,
        /// Condition fields to keep
        #[arg(long, value_delimiter = ',')]
        conditions: Option<Vec<String>>,
        /// Measure fields to keep
        #[arg(long, value_delimiter = ',')]
        measures: Option<Vec<String>>,
        /// Extra collection to merge into conditions, as name or name=key,key
        #[arg(long)]
        extra: Vec<String>,
        #[command(flatten)]
        window: WindowArgs,
    },
}

/// Search window overrides; unset values come from config
#[derive(Args)]
struct WindowArgs {
    /// Half-width of the time window in seconds
    #[arg(long)]
    time_range: Option<i64>,
    /// Half-width of the lat/lon window in degrees
    #[arg(long)]
    degrees: Option<f64>,
    /// Choose the closest match by time instead of location
    #[arg(long)]
    prefer_time: bool,
}

impl WindowArgs {
    /// Overrides applied on top of `window`, checked the same way as config
    fn apply(&self, mut window: SearchWindow) -> Result<SearchWindow, String> {
        if let Some(secs) = self.time_range {
            window.time_range_secs = secs;
        }
        if let Some(degrees) = self.degrees {
            window.lat_lon_range_deg = degrees;
        }
        if self.prefer_time {
            window.prefer_location = false;
        }
        window.validate()?;
        Ok(window)
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: &Config, db: Option<PathBuf>) -> Result<SqliteStore, String> {
    let db_path = db.unwrap_or_else(|| config.resolved_db_path());
    SqliteStore::open(&db_path)
        .map_err(|e| format!("Failed to open database {}: {}", db_path.display(), e))
}

fn print_json(value: &impl serde::Serialize) -> i32 {
    match serde_json::to_string(value) {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_replay(
    config: &Config,
    graph_path: &Path,
    entry: Option<String>,
    live_fetch: bool,
    save: Option<PathBuf>,
) -> i32 {
    let graph = match MemoryGraph::load(graph_path) {
        Ok(graph) => Arc::new(graph),
        Err(e) => {
            eprintln!("Error: cannot load graph '{}': {}", graph_path.display(), e);
            return 1;
        }
    };

    let Some(entry) = entry.or_else(|| config.entry_point.clone()) else {
        eprintln!("Error: no entry point given (use --entry or set entry_point in config)");
        return 1;
    };

    let fetcher: Arc<dyn Fetcher> = if live_fetch {
        match HttpFetcher::new(config.http_timeout()) {
            Ok(fetcher) => Arc::new(fetcher),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    } else {
        graph.clone()
    };

    let dispatch = DispatchLoop::new(fetcher, graph.clone(), Arc::new(builtin_registry()))
        .with_publish_namespace(config.publish_namespace.clone());
    let crawler = GraphCrawler::new(graph.clone(), entry).with_criteria(config.crawl.clone());

    let report = match run_pipeline(crawler, Arc::new(dispatch), config.queue_capacity).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let stats = &report.stats;
    println!("{:<24}  {:>7}", "discovered", report.discovered);
    println!("{:<24}  {:>7}", "published", stats.published);
    println!("{:<24}  {:>7}", "nothing to publish", stats.nothing_to_publish);
    println!("{:<24}  {:>7}", "publish target missing", stats.publish_target_missing);
    println!("{:<24}  {:>7}", "skipped", stats.skipped);
    println!("{:<24}  {:>7}", "failed", stats.failed);

    if let Some(path) = save {
        let written = serde_json::to_string_pretty(&graph.snapshot())
            .map_err(|e| e.to_string())
            .and_then(|text| std::fs::write(&path, text).map_err(|e| e.to_string()));
        if let Err(e) = written {
            eprintln!("Error: cannot save graph '{}': {}", path.display(), e);
            return 1;
        }
    }
    0
}

fn cmd_store_write(store: &SqliteStore, collection: &str, file: &Path) -> i32 {
    let text = match std::fs::read_to_string(file) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: cannot read '{}': {}", file.display(), e);
            return 1;
        }
    };
    let docs = match serde_json::from_str::<Value>(&text) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            eprintln!("Error: '{}' must hold a JSON array", file.display());
            return 1;
        }
        Err(e) => {
            eprintln!("Error: cannot parse '{}': {}", file.display(), e);
            return 1;
        }
    };

    let mut mappings = Vec::with_capacity(docs.len());
    let mut rejected = 0;
    for (index, doc) in docs.into_iter().enumerate() {
        match doc {
            Value::Object(map) => mappings.push(map),
            _ => {
                eprintln!("Warning: item {} is not an object, skipped", index);
                rejected += 1;
            }
        }
    }

    let collection = CollectionName::new(collection);
    match store.write_documents(&collection, mappings) {
        Ok(report) => {
            println!(
                "Wrote {} document(s) to '{}', skipped {}",
                report.written,
                collection,
                report.skipped.len() + rejected
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_store_list(store: &SqliteStore) -> i32 {
    let names = match store.list_collections() {
        Ok(names) => names,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    println!("{:<32}  {:>9}", "COLLECTION", "DOCUMENTS");
    println!("{}", "-".repeat(43));
    for name in names {
        match store.scan(&name) {
            Ok(docs) => println!("{:<32}  {:>9}", name, docs.len()),
            Err(e) => eprintln!("Error: {}: {}", name, e),
        }
    }
    0
}

fn cmd_store_drop(store: &SqliteStore, collection: &str) -> i32 {
    match store.drop_collection(&CollectionName::new(collection)) {
        Ok(true) => {
            println!("Dropped collection '{}'", collection);
            0
        }
        Ok(false) => {
            eprintln!("Error: collection '{}' not found", collection);
            1
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_store_show(store: &SqliteStore, collection: &str, limit: Option<usize>) -> i32 {
    let result = store.open_collection(collection).and_then(|name| {
        let mut filter = DocumentFilter::new();
        filter.limit = limit;
        store.find_documents(&name, &filter)
    });
    match result {
        Ok(docs) => {
            for doc in docs {
                if print_json(&doc.into_mapping()) != 0 {
                    return 1;
                }
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_store_nearest(
    store: &SqliteStore,
    collection: &str,
    point: QueryPoint,
    window: SearchWindow,
) -> i32 {
    let result = store
        .open_collection(collection)
        .and_then(|name| nearest_match(store, &name, &point, &window, true));
    match result {
        Ok(Some(found)) => print_json(&found.into_mapping()),
        Ok(None) => {
            println!("No match in range.");
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_store_train(store: &SqliteStore, query: &TrainingQuery) -> i32 {
    match build_training_set(store, query) {
        Ok(examples) => print_json(&examples),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

/// `name` or `name=key,key`
fn parse_extra(arg: &str) -> (CollectionName, Option<Vec<String>>) {
    match arg.split_once('=') {
        Some((name, keys)) => (
            CollectionName::new(name),
            Some(keys.split(',').filter(|k| !k.is_empty()).map(str::to_string).collect()),
        ),
        None => (CollectionName::new(arg), None),
    }
}

fn run_store(config: &Config, db: Option<PathBuf>, action: StoreAction) -> i32 {
    let store = match open_store(config, db) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    match action {
        StoreAction::Write { collection, file } => cmd_store_write(&store, &collection, &file),
        StoreAction::List => cmd_store_list(&store),
        StoreAction::Drop { collection } => cmd_store_drop(&store, &collection),
        StoreAction::Show { collection, limit } => cmd_store_show(&store, &collection, limit),
        StoreAction::Nearest { collection, timestamp, lat, lon, window } => {
            let timestamp = match parse_timestamp(&Value::String(timestamp)) {
                Ok(ts) => ts,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return 1;
                }
            };
            let window = match window.apply(config.search) {
                Ok(window) => window,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return 1;
                }
            };
            let point = QueryPoint::new(timestamp, lat, lon);
            cmd_store_nearest(&store, &collection, point, window)
        }
        StoreAction::Train { collection, conditions, measures, extra, window } => {
            let window = match window.apply(config.search) {
                Ok(window) => window,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return 1;
                }
            };
            let mut query = TrainingQuery::new(collection).with_window(window);
            query.condition_keys = conditions;
            query.measure_keys = measures;
            for arg in &extra {
                let (name, keys) = parse_extra(arg);
                query = query.with_extra(name, keys);
            }
            cmd_store_train(&store, &query)
        }
    }
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    let config = match Config::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Replay { graph, entry, live_fetch, save } => {
            cmd_replay(&config, &graph, entry, live_fetch, save).await
        }
        Commands::Store { action } => run_store(&config, cli.db, action),
    };
    std::process::exit(code);
}
