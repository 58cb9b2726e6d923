use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use draw_ledger::config::SourceKind;
use draw_ledger::diagnostics::write_token_dump;
use draw_ledger::{parse_local, AppConfig, Pipeline, RunMode, RunSummary, WriteOutcome};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "draw-ledger", version, about = "Lottery draw ingestion into a canonical CSV ledger")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = "config/default.toml", env = "DRAWLEDGER_CONFIG")]
    config: PathBuf,

    /// Debug logging for this crate
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Full fetch, rewrite the ledger
    Seed {
        #[arg(long)]
        game: String,
    },
    /// Fetch and merge new draws into the ledger
    Update {
        #[arg(long)]
        game: String,
    },
    /// Extract records from a local PDF/HTML file (layout debugging)
    Parse {
        file: PathBuf,
        #[arg(long)]
        game: String,
        /// Treat the file as an HTML listing
        #[arg(long)]
        html: bool,
        /// Side-by-side panes per page
        #[arg(long)]
        panes: Option<usize>,
        /// Write the classified tokens to this CSV
        #[arg(long)]
        dump: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,draw_ledger=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    match cli.command {
        Command::Seed { game } => run(config, &game, RunMode::Seed).await,
        Command::Update { game } => run(config, &game, RunMode::Update).await,
        Command::Parse {
            file,
            game,
            html,
            panes,
            dump,
        } => parse(&config, &file, &game, html, panes, dump),
    }
}

async fn run(config: AppConfig, game: &str, mode: RunMode) -> Result<()> {
    println!("🎰 {:?} run for {}", mode, game);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let pipeline = Pipeline::new(config).context("building HTTP client")?;
    let summary = pipeline
        .run(game, mode)
        .await
        .with_context(|| format!("{:?} run for {} failed", mode, game))?;

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\n📡 Sources");
    for source in &summary.sources {
        let strategy = source.strategy.map(|s| format!(" via {}", s)).unwrap_or_default();
        match &source.error {
            Some(e) => println!("  ✗ {} ({:?}): {}", source.name, source.role, e),
            None => println!(
                "  ✓ {} ({:?}): {} pages, {} rows, {} skipped{}",
                source.name,
                source.role,
                source.pages,
                source.rows,
                source.skip_total(),
                strategy
            ),
        }
        for (reason, count) in &source.skips {
            println!("      {:<28} {}", reason, count);
        }
        if let Some(dump) = &source.dump {
            println!("      token dump: {}", dump.display());
        }
    }

    println!("\n🔀 Merge");
    println!("  added:         {}", summary.merge.added);
    println!("  replaced:      {}", summary.merge.replaced);
    println!("  dropped stale: {}", summary.merge.dropped_stale);
    println!("  unchanged:     {}", summary.merge.unchanged);

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    match summary.write {
        WriteOutcome::Unchanged => println!("✓ Ledger unchanged: {}", summary.ledger.display()),
        WriteOutcome::Rewritten { rows } => {
            println!("✅ Ledger rewritten ({} rows): {}", rows, summary.ledger.display())
        }
        WriteOutcome::Appended { rows } => {
            println!("✅ Appended {} rows to {}", rows, summary.ledger.display())
        }
    }
    println!("   {} records total, run {}", summary.ledger_rows, summary.run_id);
}

fn parse(
    config: &AppConfig,
    file: &Path,
    game: &str,
    html: bool,
    panes: Option<usize>,
    dump: Option<PathBuf>,
) -> Result<()> {
    let game_config = config.game(game)?;
    let spec = game_config.spec();
    let kind = if html { SourceKind::Html } else { SourceKind::Pdf };
    let selectors = game_config
        .sources
        .iter()
        .find(|s| s.kind == SourceKind::Html)
        .map(|s| s.selectors.clone())
        .unwrap_or_default();

    println!("📄 Parsing {}", file.display());
    let parsed = parse_local(&spec, &config.tuner, file, kind, &selectors, panes)
        .with_context(|| format!("parsing {}", file.display()))?;

    let report = parsed.outcome.combined_report();
    for record in &report.records {
        println!("  {}", record.to_row(&spec).join(","));
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for page in &parsed.outcome.pages {
        println!(
            "  page {}: {} rows, {} skipped (attempt {}, {} columns, {} panes)",
            page.page,
            page.report.rows(),
            page.report.skips.len(),
            page.attempt,
            page.columns,
            page.panes
        );
    }
    for (reason, count) in report.skips_by_reason() {
        println!("  {:<28} {}", reason.as_str(), count);
    }
    println!("✓ {} records from {} tokens", report.rows(), parsed.tokens.len());

    if let Some(path) = dump {
        write_token_dump(&path, &parsed.tokens)?;
        println!("✓ Token dump written to {}", path.display());
    }
    Ok(())
}
