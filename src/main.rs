//! fedmeta - federated inverse-variance weighted meta-analysis
//!
//! A CLI tool that combines per-participant summary statistics
//! (effect estimates and standard errors) round by round, and writes a
//! report plus the aggregated update for each round.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (bad input, aggregation failure, I/O, config)

mod analysis;
mod cli;
mod config;
mod models;
mod report;
mod round;
mod scanner;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use models::{Report, ReportMetadata};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Config comes first so `general.verbose` can set the log level.
    let (mut config, source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(args.log_level(config.general.verbose));

    info!("fedmeta v{}", env!("CARGO_PKG_VERSION"));
    info!("{}", source);
    debug!("Arguments: {:?}", args);

    match run_meta_analysis(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Meta-analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .fedmeta.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize rounds, participant discovery, and reporting.");
    Ok(())
}

/// Initialize logging. `RUST_LOG` overrides the verbosity flags.
fn init_logging(level: tracing::Level) {
    let filter = log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok(), level);

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Filter from `RUST_LOG`-style directives, else the flag-derived level.
fn log_filter(directives: Option<String>, level: tracing::Level) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::default().add_directive(LevelFilter::from_level(level).into()))
}

/// Run every round and write the report. Returns the exit code.
async fn run_meta_analysis(args: Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    let input = args.input_dir();
    let scan_config = scanner::ScanConfig::from(&config.scanner);
    let round_scanner = scanner::RoundScanner::new(input.clone(), scan_config);
    let plans = scanner::limit_rounds(round_scanner.scan()?, config.aggregation.num_rounds)?;

    if args.dry_run {
        return handle_dry_run(&plans);
    }

    println!("🧮 Aggregating {} round(s) from {}", plans.len(), input.display());
    println!("   Min participants: {}", config.aggregation.min_participants);
    println!(
        "   Params type check: {}",
        if config.aggregation.strict_params_type {
            "strict"
        } else {
            "lenient"
        }
    );

    let mut runner_config = round::RunnerConfig::from(&config);
    runner_config.show_progress = !args.quiet;
    let mut runner = round::RoundRunner::new(runner_config);

    let outcomes = runner.run(&plans).await?;

    let metadata = ReportMetadata {
        input: input.display().to_string(),
        run_date: Utc::now(),
        rounds: outcomes.len(),
        participant_updates: outcomes.iter().map(|o| o.summary.participants).sum(),
        strict_params_type: config.aggregation.strict_params_type,
        duration_seconds: start_time.elapsed().as_secs_f64(),
    };
    let report = Report {
        metadata,
        rounds: outcomes,
    };

    let output = match args.format {
        OutputFormat::Markdown => report::generate_markdown_report(&report),
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Tsv => report::generate_tsv_report(&report),
    };

    let output_path = resolve_output_path(&args, &config);
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    if let Some(ref emit_dir) = args.emit_dir {
        let written = report::write_aggregated_results(&report.rounds, emit_dir)?;
        info!("Wrote {} aggregated updates to {}", written.len(), emit_dir.display());
    }

    println!("\n📊 Meta-analysis Summary:");
    for outcome in &report.rounds {
        let s = &outcome.summary;
        println!(
            "   {}: {} participants, {} features, {} significant (|z| ≥ {})",
            outcome.round, s.participants, s.features, s.significant, s.z_threshold
        );
        if s.exact_features > 0 {
            warn!(
                "{}: {} features came from zero-variance participants",
                outcome.round, s.exact_features
            );
        }
    }
    println!("   Duration: {:.1}s", report.metadata.duration_seconds);
    println!(
        "\n✅ Meta-analysis complete! Report saved to: {}",
        output_path.display()
    );

    Ok(0)
}

/// Handle --dry-run: list rounds and participant files, exit.
fn handle_dry_run(plans: &[scanner::RoundPlan]) -> Result<i32> {
    println!("\n🔍 Dry run: discovering rounds (nothing is aggregated)...\n");

    for plan in plans {
        println!(
            "   Round {} ({}): {} participant files",
            plan.index,
            plan.name,
            plan.participants.len()
        );
        for file in &plan.participants {
            println!("     📄 {}", file.display());
        }
    }

    println!("\n✅ Dry run complete. {} round(s) found.", plans.len());
    Ok(0)
}

/// Report path: explicit --output, else the configured name with the
/// format's extension.
fn resolve_output_path(args: &Args, config: &Config) -> PathBuf {
    match args.output {
        Some(ref path) => path.clone(),
        None => PathBuf::from(&config.general.output).with_extension(args.format.extension()),
    }
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is set up, so it returns a line describing where the
/// settings came from instead of logging it.
fn load_config(args: &Args) -> Result<(Config, String)> {
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, format!("Loaded config from: {}", config_path.display())));
    }

    match Config::load_default() {
        Ok(Some(config)) => Ok((config, format!("Loaded default config from {}", CONFIG_FILE))),
        Ok(None) => Ok((Config::default(), "No config file found, using defaults".to_string())),
        Err(e) => {
            eprintln!("⚠️  Failed to load config: {}", e);
            Ok((Config::default(), "Using default config".to_string()))
        }
    }
}
