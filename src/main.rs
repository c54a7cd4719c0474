use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "earmark",
    version,
    about = "Locate where a short audio clip occurs inside a longer recording"
)]
struct Cli {
    /// Query audio file (the short clip to locate)
    query: PathBuf,

    /// Reference audio file (the longer recording searched for the clip)
    reference: PathBuf,

    /// Offset histogram bin width in milliseconds
    #[arg(long)]
    bin_size: Option<f64>,

    /// Warn when the match confidence is below this count
    #[arg(long)]
    min_confidence: Option<u64>,

    /// Ignore and do not write sidecar fingerprint caches
    #[arg(long)]
    no_cache: bool,

    /// Print the full match report as JSON
    #[arg(long)]
    json: bool,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Config file defaults, overridden per-run by CLI flags
    let mut config = earmark::config::AppConfig::load();
    if let Some(bin_size) = cli.bin_size {
        if bin_size <= 0.0 {
            anyhow::bail!("--bin-size must be positive");
        }
        config.bin_size_ms = bin_size;
    }
    if let Some(min_confidence) = cli.min_confidence {
        config.confidence_threshold = min_confidence;
    }
    if cli.no_cache {
        config.cache = false;
    }

    for path in [&cli.query, &cli.reference] {
        if !path.is_file() {
            anyhow::bail!("Audio file not found: {}", path.display());
        }
    }

    let result = earmark::pipeline::locate(&cli.query, &cli.reference, &config)
        .context("Match failed")?;
    let report = &result.report;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "Query:      {} ({} fingerprints)",
        cli.query.display(),
        result.query_fingerprints
    );
    println!(
        "Reference:  {} ({} fingerprints)",
        cli.reference.display(),
        result.reference_fingerprints
    );
    println!();
    println!(
        "Offset:     {} ({:.3} ms)",
        earmark::pipeline::format_offset(report.offset_ms),
        report.offset_ms
    );
    println!(
        "Matches:    {} (rate {:.3})",
        report.match_count, report.match_rate
    );
    println!("Confidence: {}", report.confidence);

    if report.confidence < config.confidence_threshold {
        println!();
        println!(
            "Warning: confidence {} is below threshold {}; the clip may not occur in the reference.",
            report.confidence, config.confidence_threshold
        );
    }

    Ok(())
}
