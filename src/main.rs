//! Souk-Scrape main entry point
//!
//! This is the command-line interface for the Souk-Scrape listing scraper.

use clap::Parser;
use souk_scrape::config::load_config_with_hash;
use souk_scrape::output::print_summary;
use souk_scrape::run_scrape;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Souk-Scrape: a resilient marketplace listing scraper
///
/// Souk-Scrape walks paginated category listings concurrently while
/// adapting its pace to the target, rotating client identities, and
/// checkpointing progress so an interrupted run resumes where it left off.
#[derive(Parser, Debug)]
#[command(name = "souk-scrape")]
#[command(version = "1.0.0")]
#[command(about = "A resilient marketplace listing scraper", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume an interrupted scrape (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start over, discarding the checkpoint log and CSV output
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show what would be scraped without fetching
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show totals from the checkpoint log and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_scrape(config, &config_hash, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// An explicit RUST_LOG overrides the verbosity flags except for --quiet.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        let default = match verbose {
            0 => "souk_scrape=info,warn",
            1 => "souk_scrape=debug,info",
            2 => "souk_scrape=trace,debug",
            _ => "trace",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be scraped
fn handle_dry_run(config: &souk_scrape::config::Config) {
    println!("=== Souk-Scrape Dry Run ===\n");

    println!("Engine Configuration:");
    println!("  Workers: {}", config.engine.workers);
    println!(
        "  Delay: {}ms base ({}ms..{}ms)",
        config.engine.base_delay_ms, config.engine.min_delay_ms, config.engine.max_delay_ms
    );
    println!("  Max attempts per page: {}", config.engine.max_attempts);
    println!("  Max pages per category: {}", config.engine.max_pages);
    println!("  Session pool size: {}", config.engine.session_pool_size);
    println!(
        "  Request timeout: {}s",
        config.engine.request_timeout_secs
    );

    println!("\nIdentity:");
    println!("  User agents: {}", config.identity.user_agents.len());
    println!("  Accept-Language: {}", config.identity.accept_language);
    if config.identity.proxies.is_empty() {
        println!("  Proxies: none (direct connection)");
    } else {
        println!("  Proxies: {}", config.identity.proxies.len());
        for proxy in &config.identity.proxies {
            println!("    * {}", proxy);
        }
    }

    println!("\nOutput:");
    println!("  Records CSV: {}", config.output.csv_path);
    println!("  Checkpoint log: {}", config.output.checkpoint_path);

    println!("\nCategories ({}):", config.categories.len());
    for entry in &config.categories {
        println!("  - {} ({})", entry.id, entry.url);
        println!("    page parameter: {}", entry.page_param);
        println!("    card selector: {}", entry.selectors.card);
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would scrape {} categories with {} workers",
        config.categories.len(),
        config.engine.workers
    );
}

/// Handles the --stats mode: shows totals from the checkpoint log
fn handle_stats(config: &souk_scrape::config::Config) -> anyhow::Result<()> {
    use souk_scrape::checkpoint::read_summary;

    let path = Path::new(&config.output.checkpoint_path);
    println!("Checkpoint log: {}\n", config.output.checkpoint_path);

    if !path.exists() {
        println!("No checkpoint log yet; nothing has been scraped.");
        return Ok(());
    }

    let (summary, report) = read_summary(path)?;
    print_summary(&summary);
    if report.skipped_lines > 0 {
        println!("\n({} unreadable log lines skipped)", report.skipped_lines);
    }

    Ok(())
}

/// Handles the main scrape operation
async fn handle_scrape(
    config: souk_scrape::config::Config,
    config_hash: &str,
    fresh: bool,
) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh (discarding checkpoint log and CSV output)");
        remove_if_present(Path::new(&config.output.checkpoint_path))?;
        remove_if_present(Path::new(&config.output.csv_path))?;
    } else {
        tracing::info!("Starting scrape (will resume if a checkpoint log exists)");
    }

    tracing::info!(
        "Categories: {}, workers: {}, session pool: {}",
        config.categories.len(),
        config.engine.workers,
        config.engine.session_pool_size
    );

    // First Ctrl-C stops enumeration and lets in-flight requests finish
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received; finishing in-flight requests");
            let _ = stop_tx.send(true);
        }
    });

    match run_scrape(&config, config_hash, stop_rx).await {
        Ok(summary) => {
            print_summary(&summary);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Scrape failed: {}", e);
            Err(e.into())
        }
    }
}

/// Deletes a file, treating "not found" as already done
fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
