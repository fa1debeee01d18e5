mod dataset;
mod db;
mod error;
mod extract;
mod fetch;
mod ingest;
mod logging;
mod normalize;
mod partition;
mod render;

use std::io::IsTerminal as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use db::Store;
use extract::HtmlExtractor;
use fetch::{FetchConfig, FetchSummary, OutputMode};
use ingest::{DatasetOutcome, IngestOptions, IngestReport, IngestTotals};
use normalize::{BenignPolicy, SchemaHints};
use render::{HttpRenderer, RenderBackend, SpiderRenderer};

#[derive(Parser)]
#[command(
    name = "phish_crawler",
    about = "Load labeled phishing/benign URL datasets into SQLite and fetch every page"
)]
struct Cli {
    /// Directory for log files
    #[arg(long, env = "LOG_DIR", default_value = "logging", global = true)]
    log_dir: PathBuf,

    /// Print the run summary as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize CSV datasets and insert their URLs
    Ingest {
        /// SQLite store (default: db/phishing_sites_<timestamp>.db)
        #[arg(long, env = "DB_PATH")]
        store: Option<PathBuf>,
        #[command(flatten)]
        ingest: IngestArgs,
    },
    /// Render every pending URL and store its content
    Fetch {
        /// Existing SQLite store
        #[arg(long, env = "DB_PATH")]
        store: PathBuf,
        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Ingest, then fetch, into one store
    Run {
        /// SQLite store (default: db/phishing_sites_<timestamp>.db)
        #[arg(long, env = "DB_PATH")]
        store: Option<PathBuf>,
        #[command(flatten)]
        ingest: IngestArgs,
        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Show store statistics
    Stats {
        #[arg(long, env = "DB_PATH")]
        store: PathBuf,
    },
}

#[derive(Args)]
struct IngestArgs {
    /// CSV datasets in priority order; the first file wins on duplicate URLs
    #[arg(short, long = "dataset", env = "DATASETS", value_delimiter = ',', required = true)]
    datasets: Vec<PathBuf>,

    /// Reject rows labeled benign (for phishing-only runs)
    #[arg(long, env = "EXCLUDE_BENIGN")]
    exclude_benign: bool,
}

#[derive(Args)]
struct FetchArgs {
    /// Number of concurrent fetch workers (1 to 1024)
    #[arg(
        short = 'w',
        long,
        env = "THREADS",
        default_value_t = 8,
        value_parser = clap::value_parser!(u64).range(1..=fetch::MAX_WORKERS as u64)
    )]
    workers: u64,

    /// Per-URL render timeout in seconds
    #[arg(long, env = "RENDER_TIMEOUT_SECS", default_value_t = 30)]
    render_timeout_secs: u64,

    #[arg(long, env = "RENDERER", value_enum, default_value_t = RendererKind::Spider)]
    renderer: RendererKind,

    /// Which content columns to write
    #[arg(long, env = "OUTPUT_MODE", value_enum, default_value_t = OutputMode::Both)]
    output: OutputMode,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum RendererKind {
    /// spider.cloud rendering API (needs SPIDER_API_KEY)
    Spider,
    /// Plain HTTP GET, no script execution
    Http,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log = logging::init(&cli.log_dir).context("init logging")?;
    info!("Starting phish_crawler, logging to {}", log.path().display());

    let t0 = Instant::now();
    let result = run_command(cli.command, cli.json).await;

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    info!("phish_crawler finished");
    log.close()?;

    result
}

async fn run_command(command: Commands, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Ingest { store, ingest } => {
            let store_path = store.unwrap_or_else(default_store_path);
            let totals = ingest_phase(&store_path, &ingest)?;
            if json {
                println!("{}", serde_json::to_string(&totals)?);
            }
            Ok(())
        }
        Commands::Fetch { store, fetch } => {
            ensure_exists(&store)?;
            let summary = fetch_phase(&store, &fetch).await?;
            if json {
                println!("{}", serde_json::to_string(&summary)?);
            }
            Ok(())
        }
        Commands::Run {
            store,
            ingest,
            fetch,
        } => {
            let store_path = store.unwrap_or_else(default_store_path);
            let totals = ingest_phase(&store_path, &ingest)?;
            let summary = fetch_phase(&store_path, &fetch).await?;
            if json {
                let out = serde_json::json!({ "ingest": totals, "fetch": summary });
                println!("{}", out);
            }
            Ok(())
        }
        Commands::Stats { store } => {
            ensure_exists(&store)?;
            let store = open_store(&store)?;
            let s = store.stats()?;
            store.close()?;
            println!("Total:     {}", s.total);
            println!("Fetched:   {}", s.fetched);
            println!("Pending:   {}", s.pending);
            println!("\n--- Labels ---");
            for (label, count) in &s.labels {
                println!("  {:<24} {:>8}", truncate(label, 24), count);
            }
            Ok(())
        }
    }
}

fn ingest_phase(store_path: &Path, args: &IngestArgs) -> anyhow::Result<IngestTotals> {
    info!("Initializing database at {}", store_path.display());
    let store = open_store(store_path)?;
    let opts = IngestOptions {
        hints: SchemaHints::default(),
        policy: if args.exclude_benign {
            BenignPolicy::Exclude
        } else {
            BenignPolicy::Keep
        },
    };

    let report = ingest::ingest_datasets(&store, &args.datasets, &opts);
    store.close().context("close store after ingest")?;
    print_ingest(&report);

    if !report.any_resolved() {
        anyhow::bail!(
            "no URL column could be resolved in any of {} dataset(s)",
            report.datasets.len()
        );
    }
    Ok(report.totals())
}

async fn fetch_phase(store_path: &Path, args: &FetchArgs) -> anyhow::Result<FetchSummary> {
    let timeout = Duration::from_secs(args.render_timeout_secs);
    let backend: Arc<dyn RenderBackend> = match args.renderer {
        RendererKind::Spider => Arc::new(SpiderRenderer::from_env()),
        RendererKind::Http => Arc::new(HttpRenderer::new(timeout)),
    };
    let config = FetchConfig {
        workers: args.workers as usize,
        render_timeout: timeout,
        output: args.output,
        progress: !args.no_progress && std::io::stderr().is_terminal(),
    };

    let summary = fetch::run_fetch(store_path, &config, backend, Arc::new(HtmlExtractor))
        .await
        .context("fetch")?;
    println!(
        "Done: {} pending, {} fetched ({} failed, {} skipped) with {} workers.",
        summary.pending, summary.succeeded, summary.failed, summary.skipped, summary.workers
    );
    Ok(summary)
}

fn print_ingest(report: &IngestReport) {
    println!(
        "{:<40} | {:<12} | {:>7} | {:>7} | {:>7} | {:>8} | {:>6}",
        "Dataset", "URL column", "Rows", "Reject", "Bad", "Inserted", "Dupes"
    );
    println!("{}", "-".repeat(105));
    for d in &report.datasets {
        let name = truncate(&d.path.display().to_string(), 40);
        match &d.outcome {
            DatasetOutcome::Ingested {
                columns,
                rows,
                malformed,
                rejected,
                counts,
            } => println!(
                "{:<40} | {:<12} | {:>7} | {:>7} | {:>7} | {:>8} | {:>6}",
                name,
                truncate(&columns.url, 12),
                rows,
                rejected.total(),
                malformed,
                counts.inserted,
                counts.duplicates
            ),
            DatasetOutcome::Skipped(e) => println!("{:<40} | skipped: {}", name, e),
            DatasetOutcome::Failed(e) => println!("{:<40} | failed: {}", name, e),
        }
    }

    let t = report.totals();
    println!(
        "\n{} datasets ({} skipped, {} failed): {} inserted, {} duplicates, {} rejected, {} insert errors",
        t.datasets, t.skipped, t.failed, t.inserted, t.duplicates, t.rejected, t.insert_failures
    );
}

fn open_store(path: &Path) -> anyhow::Result<Store> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create store dir: {}", parent.display()))?;
    }
    let store = Store::open(path).with_context(|| format!("open store: {}", path.display()))?;
    store.init_schema().context("init schema")?;
    Ok(store)
}

fn ensure_exists(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("store not found: {}", path.display());
    }
    Ok(())
}

fn default_store_path() -> PathBuf {
    PathBuf::from(format!(
        "db/phishing_sites_{}.db",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
