use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand, ValueEnum};
use mdindex_bus::{MemStreamer, Streamer};
use mdindex_core::{decode, map_update, ClusterScope, DocumentId, EntityKind, EntityState, IndexDocument};
use mdindex_indexer::{log_reports, metadata_topic, ErrorSink, IndexerConfig, IndexerManager};
use mdindex_persist::SqliteStore;
use mdindex_store::{CasStore, DocumentStore, ElasticStore, MemoryStore};
use metrics::counter;
use tokio::signal;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "mdindexctl", version, about = "mdindex CLI: replay metadata updates and inspect indexed entities")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum StoreKind {
    /// In-process map; gone when the command exits
    Memory,
    /// In-process map behind the compare-and-swap retry loop
    Cas,
    /// SQLite file (MDINDEX_DB_PATH, default ~/.mdindex/mdindex.db)
    Sqlite,
    /// Elasticsearch index named by MDINDEX_INDEX_NAME
    Elastic,
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Document store backend
    #[arg(id = "store", long = "store", value_enum, global = true, default_value_t = StoreKind::Sqlite)]
    kind: StoreKind,

    /// SQLite database path
    #[arg(long = "db", env = "MDINDEX_DB_PATH", global = true)]
    db: Option<String>,

    /// Elasticsearch base URL, e.g. http://localhost:9200
    #[arg(long = "es-url", env = "MDINDEX_ES_URL", global = true)]
    es_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Feed a JSON-lines file of resource updates through an indexer for one cluster
    Replay {
        /// One serialized update per line
        #[arg(long = "file")]
        file: PathBuf,
        #[arg(long = "org", default_value_t = Uuid::nil())]
        org: Uuid,
        #[arg(long = "vizier")]
        vizier: Uuid,
        #[arg(long = "cluster")]
        cluster: String,
        /// Topic override (default: the vizier's metadata topic)
        #[arg(long = "topic")]
        topic: Option<String>,
        /// Give up waiting for acks after this many seconds
        #[arg(long = "wait-secs", default_value_t = 30)]
        wait_secs: u64,
    },
    /// Fetch one document by id ("<vizier>-<cluster>-<uid>")
    Get { id: String },
    /// List stored documents (SQLite only)
    Ls {
        /// Only this kind: namespace, pod or service
        #[arg(long = "kind", value_parser = parse_kind)]
        kind: Option<EntityKind>,
        /// Only this state: unknown, pending, running, failed or terminated
        #[arg(long = "state", value_parser = parse_state)]
        state: Option<EntityState>,
        #[arg(long = "limit", default_value_t = 50)]
        limit: usize,
    },
}

fn parse_kind(s: &str) -> Result<EntityKind, String> {
    EntityKind::parse(s).ok_or_else(|| format!("unknown kind {:?}; expected namespace, pod or service", s))
}

fn parse_state(s: &str) -> Result<EntityState, String> {
    EntityState::parse(s).ok_or_else(|| format!("unknown state {:?}", s))
}

fn init_tracing() {
    let env = std::env::var("MDINDEX_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("MDINDEX_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid MDINDEX_METRICS_ADDR; expected host:port");
        }
    }
}

fn open_sqlite(args: &StoreArgs) -> Result<SqliteStore> {
    match args.db.as_deref() {
        Some(path) => SqliteStore::open(path),
        None => SqliteStore::open_default(),
    }
}

fn open_store(args: &StoreArgs, config: &IndexerConfig) -> Result<Arc<dyn DocumentStore>> {
    Ok(match args.kind {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::Cas => Arc::new(CasStore::new(MemoryStore::new(), config.cas_max_attempts)),
        StoreKind::Sqlite => Arc::new(open_sqlite(args)?),
        StoreKind::Elastic => {
            let url = args.es_url.as_deref().context("--es-url (or MDINDEX_ES_URL) is required for --store elastic")?;
            Arc::new(ElasticStore::new(url, &config.index_name)?)
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let config = IndexerConfig::from_env();

    match &cli.command {
        Commands::Replay { file, org, vizier, cluster, topic, wait_secs } => {
            let scope = ClusterScope::new(*org, *vizier, cluster.clone());
            let topic = topic.clone().unwrap_or_else(|| metadata_topic(vizier));
            let store = open_store(&cli.store, &config)?;
            let docs = replay(file, scope, &topic, Arc::clone(&store), config, Duration::from_secs(*wait_secs)).await?;
            print_docs(cli.output, &docs)?;
        }
        Commands::Get { id } => {
            if matches!(cli.store.kind, StoreKind::Memory | StoreKind::Cas) {
                bail!("get needs a persistent store (--store sqlite|elastic)");
            }
            let store = open_store(&cli.store, &config)?;
            match store.get(&DocumentId::from(id.clone())).await? {
                Some(doc) => print_docs(cli.output, std::slice::from_ref(&doc))?,
                None => bail!("document {} not found", id),
            }
        }
        Commands::Ls { kind, state, limit } => {
            if cli.store.kind != StoreKind::Sqlite {
                bail!("ls is only supported for --store sqlite");
            }
            let docs = open_sqlite(&cli.store)?.list(*kind, *state, *limit)?;
            print_docs(cli.output, &docs)?;
        }
    }

    Ok(())
}

/// Publish every line of `file`, run one vizier indexer over it until the
/// durable is drained, then read back the documents the lines touched.
async fn replay(
    file: &Path,
    scope: ClusterScope,
    topic: &str,
    store: Arc<dyn DocumentStore>,
    config: IndexerConfig,
    wait: Duration,
) -> Result<Vec<IndexDocument>> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let ids = touched_ids(&scope, &lines);

    let bus = MemStreamer::new();
    let (sink, reports) = ErrorSink::channel(config.error_sink_cap);
    let reporter = tokio::spawn(log_reports(reports));
    let manager = IndexerManager::new(Arc::new(bus.clone()), Arc::clone(&store), sink, config);
    let durable = manager.config().durable_name();
    manager.start_vizier(scope.clone(), topic).await?;

    for line in &lines {
        bus.publish(topic, Bytes::copy_from_slice(line.as_bytes())).await?;
    }
    counter!("replay_published_total", lines.len() as u64);
    info!(topic = %topic, messages = lines.len(), "published replay");

    let drained = tokio::select! {
        d = bus.wait_drained(topic, &durable, wait) => d,
        _ = signal::ctrl_c() => {
            warn!("interrupted; stopping indexer");
            false
        }
    };
    if !drained {
        warn!(pending = bus.pending(topic, &durable), "replay stopped before every message was acked");
    }
    manager.stop_all().await;
    drop(manager);
    let errors = reporter.await.context("error reporter task")?;

    let mut docs = Vec::with_capacity(ids.len());
    for id in &ids {
        if let Some(doc) = store.get(id).await? {
            docs.push(doc);
        }
    }
    info!(messages = lines.len(), documents = docs.len(), errors, "replay finished");
    Ok(docs)
}

/// Ids of documents the given payloads would write; undecodable lines touch nothing.
fn touched_ids(scope: &ClusterScope, lines: &[&str]) -> BTreeSet<DocumentId> {
    lines
        .iter()
        .filter_map(|l| decode(l.as_bytes()).ok())
        .filter_map(|u| map_update(scope, &u))
        .map(|d| d.id())
        .collect()
}

fn print_docs(output: Output, docs: &[IndexDocument]) -> Result<()> {
    match output {
        Output::Human => {
            println!("{:<10} {:<40} {:<10} {:>7} {:>6}  RELATED", "KIND", "NAMESPACE/NAME", "STATE", "VERSION", "AGE");
            for d in docs {
                let related: Vec<&str> = d.related_entity_names.iter().map(String::as_str).collect();
                println!(
                    "{:<10} {:<40} {:<10} {:>7} {:>6}  {}",
                    d.kind.as_str(),
                    qualified_name(d),
                    d.state.as_str(),
                    d.update_version,
                    render_age(d.time_started_ns),
                    if related.is_empty() { "-".to_string() } else { related.join(",") },
                );
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(docs)?),
    }
    Ok(())
}

fn qualified_name(d: &IndexDocument) -> String {
    if d.namespace.is_empty() || d.namespace == d.name {
        d.name.clone()
    } else {
        format!("{}/{}", d.namespace, d.name)
    }
}

fn render_age(started_ns: i64) -> String {
    if started_ns <= 0 { return "-".to_string(); }
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    let mut secs = (now - started_ns / 1_000_000_000).max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}
