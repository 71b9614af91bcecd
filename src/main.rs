use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;

use aggregation::AggregationEngine;
use config::Config;
use discovery::FileDiscoverer;
use models::{HttpPriceSource, PricingResolver, RefreshOutcome};
use scan::{ScanOptions, ScanOrchestrator};
use storage::{JsonFileStore, Storage};
use types::Source;

mod aggregation;
mod config;
mod discovery;
mod error;
mod logging;
mod models;
mod normalize;
mod parsers;
mod reqwest_simd_json;
mod scan;
mod storage;
mod types;
mod utils;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "agent-ledger")]
#[command(version)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use human-readable number formatting (k, m, b, t)
    #[arg(short = 'H', long, global = true)]
    number_human: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest new and changed session files
    Scan(ScanArgs),
    /// Show per-day usage and cost
    Daily(DailyArgs),
    /// List ingested sessions
    Sessions(SessionsArgs),
    /// Print the canonical events of one session as JSON
    Events {
        session_id: String,
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },
    /// Remove a session from the index and the daily rollups
    Forget { session_id: String },
    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Args)]
struct ScanArgs {
    /// Re-parse every file, ignoring what earlier scans recorded
    #[arg(long, default_value_t = false)]
    full: bool,

    /// Only scan these sources (claude, codex, gemini, opencode, droid, copilot)
    #[arg(long = "source", value_parser = parse_source)]
    sources: Vec<Source>,

    /// Skip refreshing the remote price table
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// Print the scan summary as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args)]
struct DailyArgs {
    /// First day to include (YYYY-MM-DD)
    #[arg(long)]
    from: Option<String>,

    /// Last day to include (YYYY-MM-DD)
    #[arg(long)]
    to: Option<String>,

    /// Only count sessions from this source
    #[arg(long, value_parser = parse_source, conflicts_with = "model")]
    source: Option<Source>,

    /// Only count sessions whose main model is this one
    #[arg(long)]
    model: Option<String>,

    /// Output the daily store as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Pretty-print JSON instead of a single line
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[derive(Args)]
struct SessionsArgs {
    #[arg(long, value_parser = parse_source)]
    source: Option<Source>,

    /// Show at most this many of the most recent sessions
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Include housekeeping sessions (no real conversation)
    #[arg(long, default_value_t = false)]
    all: bool,

    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    subcommand: ConfigSubcommands,
}

#[derive(Subcommand)]
enum ConfigSubcommands {
    /// Create default configuration file
    Init {
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Show current configuration
    Show,
    /// Set configuration value
    Set {
        /// Configuration key (max-workers, max-file-bytes, pricing-refresh, remote-url,
        /// cooldown-secs, timeout-secs, data-dir, timezone, log-level, source.<name>)
        key: String,
        /// Configuration value
        value: String,
    },
}

fn parse_source(value: &str) -> std::result::Result<Source, String> {
    value.parse()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load config file to get defaults
    let config = match Config::load_or_default() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {e:#}");
            std::process::exit(1);
        }
    };
    let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    logging::init(level);

    let format_options = utils::NumberFormatOptions {
        use_human: cli.number_human,
        ..Default::default()
    };

    let outcome = match cli.command {
        Commands::Scan(args) => run_scan(&config, args).await.context("Scan failed"),
        Commands::Daily(args) => run_daily(&config, args, &format_options),
        Commands::Sessions(args) => run_sessions(&config, args, &format_options),
        Commands::Events { session_id, pretty } => run_events(&config, &session_id, pretty),
        Commands::Forget { session_id } => run_forget(&config, &session_id),
        Commands::Config(config_args) => handle_config_subcommand(config_args),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn open_store(config: &Config) -> Result<JsonFileStore> {
    Ok(JsonFileStore::new(config.data_dir()?))
}

async fn build_pricing(config: &Config, offline: bool) -> Arc<PricingResolver> {
    if !config.pricing.refresh || offline {
        return Arc::new(PricingResolver::new());
    }

    let source = HttpPriceSource::new(config.pricing.remote_url.clone(), config.pricing_timeout());
    let pricing = PricingResolver::with_remote(Box::new(source), config.pricing_cooldown());
    match pricing.refresh().await {
        RefreshOutcome::Updated(count) => tracing::debug!(models = count, "price table refreshed"),
        // Already logged; the static table still prices known models
        RefreshOutcome::Failed | RefreshOutcome::Skipped => {}
    }
    Arc::new(pricing)
}

fn build_orchestrator(config: &Config, pricing: Arc<PricingResolver>) -> Result<ScanOrchestrator> {
    let store: Arc<dyn Storage> = Arc::new(open_store(config)?);
    let discoverer = FileDiscoverer::from_environment(&config.source_overrides()?);

    Ok(ScanOrchestrator::new(
        discoverer,
        store,
        pricing,
        AggregationEngine::with_timezone_name(config.timezone()),
    )
    .with_max_workers(config.effective_workers())
    .with_max_file_bytes(config.scan.max_file_bytes))
}

async fn run_scan(config: &Config, args: ScanArgs) -> Result<()> {
    let pricing = build_pricing(config, args.offline).await;
    let orchestrator = build_orchestrator(config, pricing)?;

    let options = ScanOptions {
        full: args.full,
        sources: (!args.sources.is_empty()).then_some(args.sources),
    };

    // Parsing is CPU-bound and runs on its own rayon pool
    let summary = tokio::task::spawn_blocking(move || orchestrator.scan(&options))
        .await
        .context("Scan task panicked")??;

    if args.json {
        println!("{}", simd_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Scanned {} of {} files ({} unchanged, {} unreadable), {} sessions updated.",
            summary.scanned, summary.total, summary.skipped, summary.errors, summary.sessions
        );
    }
    Ok(())
}

fn run_daily(config: &Config, args: DailyArgs, format_options: &utils::NumberFormatOptions) -> Result<()> {
    let store = open_store(config)?;
    let daily = store.read_daily_range(args.from.as_deref(), args.to.as_deref())?;

    if args.json {
        let json = if args.pretty {
            simd_json::to_string_pretty(&daily)?
        } else {
            simd_json::to_string(&daily)?
        };
        println!("{json}");
        return Ok(());
    }

    if daily.is_empty() {
        println!("No usage recorded yet. Run 'agent-ledger scan' first.");
        return Ok(());
    }

    let filter = match (args.source, args.model) {
        (Some(source), _) => utils::DailyFilter::Source(source),
        (None, Some(model)) => utils::DailyFilter::Model(model),
        (None, None) => utils::DailyFilter::All,
    };
    let today = chrono::Utc::now()
        .with_timezone(&AggregationEngine::with_timezone_name(config.timezone()).timezone())
        .date_naive();
    let rows = utils::daily_rows(&daily, &filter);
    print!("{}", utils::render_daily_table(&rows, today, format_options));
    Ok(())
}

fn run_sessions(
    config: &Config,
    args: SessionsArgs,
    format_options: &utils::NumberFormatOptions,
) -> Result<()> {
    let store = open_store(config)?;
    let mut sessions: Vec<_> = store
        .read_sessions()?
        .into_iter()
        .filter(|s| args.source.is_none_or(|source| s.source == source))
        .filter(|s| args.all || !s.is_housekeeping)
        .collect();
    sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| a.id.cmp(&b.id)));
    sessions.truncate(args.limit);

    if args.json {
        println!("{}", simd_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    for session in &sessions {
        println!("{}", utils::render_session_line(session, format_options));
    }
    Ok(())
}

fn run_events(config: &Config, session_id: &str, pretty: bool) -> Result<()> {
    let events = open_store(config)?.read_events(session_id)?;
    if events.is_empty() {
        anyhow::bail!("No events stored for session {session_id}");
    }
    let json = if pretty {
        simd_json::to_string_pretty(&events)?
    } else {
        simd_json::to_string(&events)?
    };
    println!("{json}");
    Ok(())
}

fn run_forget(config: &Config, session_id: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config, Arc::new(PricingResolver::new()))?;
    if orchestrator.forget_session(session_id)? {
        println!("Forgot session {session_id}.");
    } else {
        println!("No session with id {session_id}.");
    }
    Ok(())
}

fn handle_config_subcommand(config_args: ConfigArgs) -> Result<()> {
    match config_args.subcommand {
        ConfigSubcommands::Init { overwrite } => {
            config::create_default_config(overwrite).context("Error creating config")
        }
        ConfigSubcommands::Show => config::show_config().context("Error showing config"),
        ConfigSubcommands::Set { key, value } => {
            config::set_config_value(&key, &value).context("Error setting config")
        }
    }
}
