use anyhow::{Context as AnyhowContext, Result};
use chatnav_adapters::{AdapterRegistry, PlatformAdapter};
use chatnav_dom::{Document, DocumentSnapshot};
use chatnav_engine::{
    projection, EngineConfig, FavoritesSet, JsonFileSettingsStore, Message, MessageFilter,
    MessageIndex, ProjectionQuery, SettingsStore,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

mod replay;
mod report;

pub use replay::{ReplayReport, ReplayScript, ReplayStep, StepAction};

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "chatnav")]
#[command(about = "Message detection and navigation for chat web pages", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Engine configuration (TOML). Falls back to CHATNAV_CONFIG.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List adapters in priority order
    Adapters(AdaptersArgs),

    /// Run one detection pass over a document snapshot
    Scan(ScanArgs),

    /// Export the conversation in a document snapshot
    Export(ExportArgs),

    /// Drive the live engine with a scripted session
    Replay(ReplayArgs),
}

#[derive(Args)]
struct AdaptersArgs {
    /// Mark the adapter that would handle this address
    #[arg(long)]
    url: Option<String>,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ScanArgs {
    /// Document snapshot (JSON)
    snapshot: PathBuf,

    /// Override the snapshot address
    #[arg(long)]
    url: Option<String>,

    /// Which messages to list
    #[arg(long, value_enum, default_value = "all")]
    filter: FilterFlag,

    /// Case-insensitive text filter
    #[arg(long, default_value = "")]
    search: String,

    /// Settings file holding favorites (JSON)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ExportArgs {
    /// Document snapshot (JSON)
    snapshot: PathBuf,

    /// Override the snapshot address
    #[arg(long)]
    url: Option<String>,

    #[arg(long, value_enum, default_value = "markdown")]
    format: ExportFormat,

    /// Write to a file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ReplayArgs {
    /// Replay script (JSON)
    script: PathBuf,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Copy, Clone, ValueEnum)]
enum FilterFlag {
    All,
    User,
    Assistant,
    Favorites,
}

impl FilterFlag {
    const fn as_domain(self) -> MessageFilter {
        match self {
            FilterFlag::All => MessageFilter::All,
            FilterFlag::User => MessageFilter::User,
            FilterFlag::Assistant => MessageFilter::Assistant,
            FilterFlag::Favorites => MessageFilter::Favorites,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
enum ExportFormat {
    Markdown,
    Json,
}

pub async fn main_entry() -> Result<()> {
    let mut cli = Cli::parse();

    // stdout carries JSON; keep info logs off it
    let json_output = match &cli.command {
        Commands::Adapters(args) => args.json,
        Commands::Scan(args) => args.json,
        Commands::Export(args) => matches!(args.format, ExportFormat::Json),
        Commands::Replay(args) => args.json,
    };
    if json_output {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config_path = cli
        .config
        .clone()
        .or_else(|| env::var_os("CHATNAV_CONFIG").map(PathBuf::from));
    let config = load_config(config_path.as_deref()).await?;

    match cli.command {
        Commands::Adapters(args) => run_adapters(args)?,
        Commands::Scan(args) => run_scan(args, &config).await?,
        Commands::Export(args) => run_export(args, &config)?,
        Commands::Replay(args) => run_replay(args, config).await?,
    }

    Ok(())
}

async fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            let config = EngineConfig::load(path)
                .await
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            log::debug!("loaded config from {}", path.display());
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn run_adapters(args: AdaptersArgs) -> Result<()> {
    let registry = AdapterRegistry::with_builtin();
    let active = match &args.url {
        Some(raw) => {
            let url = chatnav_dom::Url::parse(raw).with_context(|| format!("Invalid URL {raw}"))?;
            registry.select(&url).map(|a| a.name())
        }
        None => None,
    };

    if args.json {
        let rows: Vec<_> = registry
            .iter()
            .map(|a| report::AdapterRow::new(a.as_ref(), active == Some(a.name())))
            .collect();
        print_stdout(&serde_json::to_string_pretty(&rows)?)?;
    } else {
        print_stdout(&report::adapters_table(&registry, active))?;
        if args.url.is_some() && active.is_none() {
            log::warn!("no adapter handles that address");
        }
    }
    Ok(())
}

/// One detection pass over a snapshot.
#[derive(Debug, Serialize)]
struct ScanResult {
    adapter: &'static str,
    assistant_name: &'static str,
    conversation: String,
    messages: Vec<Message>,
}

fn scan_snapshot(path: &Path, url: Option<&str>, config: &EngineConfig) -> Result<ScanResult> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    let snapshot = DocumentSnapshot::from_json(&raw)
        .with_context(|| format!("Invalid snapshot {}", path.display()))?;
    let mut doc = Document::from_snapshot(&snapshot)?;
    if let Some(url) = url {
        doc.set_location(url)?;
    }
    let location = doc
        .location()
        .cloned()
        .context("Snapshot has no address; pass --url")?;

    let registry = AdapterRegistry::with_builtin();
    let adapter: Arc<dyn PlatformAdapter> = registry
        .select(&location)
        .with_context(|| format!("No adapter handles {location}"))?;
    let candidates = adapter
        .detect_messages(&mut doc)
        .with_context(|| format!("{} adapter failed", adapter.name()))?;

    let mut index = MessageIndex::new();
    let outcome = index.merge(
        candidates,
        adapter.order_policy(),
        &doc,
        current_unix_ms(),
        config,
    );
    log::info!(
        "{}: {} messages ({} duplicates dropped)",
        adapter.name(),
        index.len(),
        outcome.dropped_by_id + outcome.dropped_near_duplicate
    );

    Ok(ScanResult {
        adapter: adapter.name(),
        assistant_name: adapter.assistant_name(),
        conversation: adapter.normalize_url(&location),
        messages: index.messages().to_vec(),
    })
}

async fn run_scan(args: ScanArgs, config: &EngineConfig) -> Result<()> {
    let result = scan_snapshot(&args.snapshot, args.url.as_deref(), config)?;
    let favorites: FavoritesSet = match &args.settings {
        Some(path) => JsonFileSettingsStore::new(path)
            .load()
            .await
            .with_context(|| format!("Failed to read settings {}", path.display()))?
            .favorites
            .into_iter()
            .collect(),
        None => FavoritesSet::default(),
    };
    let query = ProjectionQuery::new(args.filter.as_domain(), args.search.as_str());
    let rows = projection::project(&result.messages, &favorites, &query);

    if args.json {
        let output = serde_json::json!({
            "adapter": result.adapter,
            "conversation": result.conversation,
            "messages": result.messages,
            "rows": rows,
        });
        print_stdout(&serde_json::to_string_pretty(&output)?)?;
    } else {
        print_stdout(&format!("{} ({})", result.conversation, result.adapter))?;
        print_stdout(&report::rows_table(&rows, result.assistant_name))?;
    }
    Ok(())
}

#[derive(Serialize)]
struct ExportedMessage<'a> {
    number: usize,
    heading: String,
    role: chatnav_adapters::Role,
    content: &'a str,
}

fn run_export(args: ExportArgs, config: &EngineConfig) -> Result<()> {
    let result = scan_snapshot(&args.snapshot, args.url.as_deref(), config)?;
    let text = match args.format {
        ExportFormat::Markdown => {
            projection::transcript_markdown(&result.messages, result.assistant_name)
        }
        ExportFormat::Json => {
            let messages: Vec<_> = result
                .messages
                .iter()
                .enumerate()
                .map(|(i, m)| ExportedMessage {
                    number: i + 1,
                    heading: projection::heading(i + 1, m.role, result.assistant_name),
                    role: m.role,
                    content: &m.full_content,
                })
                .collect();
            serde_json::to_string_pretty(&serde_json::json!({
                "adapter": result.adapter,
                "conversation": result.conversation,
                "messages": messages,
            }))?
        }
    };

    match &args.output {
        Some(path) => {
            fs::write(path, &text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("wrote {} messages to {}", result.messages.len(), path.display());
        }
        None => print_stdout(text.trim_end())?,
    }
    Ok(())
}

async fn run_replay(args: ReplayArgs, config: EngineConfig) -> Result<()> {
    let raw = fs::read_to_string(&args.script)
        .with_context(|| format!("Failed to read script {}", args.script.display()))?;
    let script: ReplayScript = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid script {}", args.script.display()))?;
    let report = replay::run(script, config).await?;

    if args.json {
        print_stdout(&serde_json::to_string_pretty(&report)?)?;
    } else {
        for update in &report.updates {
            print_stdout(&report::update_line(update))?;
        }
        let rows = report.snapshot.project(&ProjectionQuery::default());
        print_stdout(&report::rows_table(&rows, &report.snapshot.assistant_name))?;
    }
    Ok(())
}

fn current_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|dur| u64::try_from(dur.as_millis()).ok())
        .unwrap_or(0)
}
