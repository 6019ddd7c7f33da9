//! blockcache CLI
//!
//! Entry point for the `blockcache` command-line tool.

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use blockcache::cache::{self, MatchMode};
use blockcache::signal::{self, EXIT_CODE_INTERRUPTED};
use blockcache::{BlockCache, BlockCacheConfig, ManifestSource, Warmer};
use clap::{Parser, Subcommand};
use tracing::{warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "blockcache")]
#[command(about = "Disk block cache for manifest-backed datasets", version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every block of the configured manifest through the cache
    Warm {
        /// Path to the cache config file
        #[arg(long, short = 'c')]
        config: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove stale generations of a cache id
    Invalidate {
        /// Cache root directory
        #[arg(long)]
        root: PathBuf,

        /// Cache identifier
        #[arg(long)]
        id: String,

        /// Current version; generations of other versions are removed
        #[arg(long)]
        version: String,

        /// Only match `<id>_<version>` names exactly
        #[arg(long)]
        exact: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List the generations of a cache id
    Info {
        /// Cache root directory
        #[arg(long)]
        root: PathBuf,

        /// Cache identifier
        #[arg(long)]
        id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref(), cli.log_json);

    match cli.command {
        Commands::Warm { config, json } => run_warm(&config, json),
        Commands::Invalidate {
            root,
            id,
            version,
            exact,
            json,
        } => run_invalidate(&root, &id, &version, exact, json),
        Commands::Info { root, id, json } => run_info(&root, &id, json),
    }
}

fn parse_level(log_level: &str) -> Level {
    match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// An explicit `--log-level` wins; otherwise RUST_LOG applies, then `info`.
fn build_filter(log_level: Option<&str>) -> EnvFilter {
    match log_level {
        Some(level) => EnvFilter::from_default_env().add_directive(parse_level(level).into()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

fn init_logging(log_level: Option<&str>, log_json: bool) {
    let filter = build_filter(log_level);

    // Logs go to stderr so JSON output on stdout stays parseable.
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

fn run_warm(config_path: &Path, json: bool) {
    let config = match BlockCacheConfig::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    let source = match ManifestSource::open(&config.source.manifest, config.source.block_size) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading manifest: {}", e);
            process::exit(1);
        }
    };
    let streams = source.stream_count();

    let cache = match BlockCache::with_match_mode(
        &config.cache.root,
        &config.cache.id,
        &config.cache.version,
        config.cache.match_mode,
        source,
    ) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error opening cache: {}", e);
            process::exit(1);
        }
    };

    let warmer = match Warmer::new(
        cache,
        streams,
        config.workers.count,
        Duration::from_millis(config.workers.idle_wait_ms),
    ) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Error preparing workers: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = signal::install(warmer.stop_handle()) {
        warn!(error = %e, "failed to install interrupt handler");
    }

    let summary = match warmer.run() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Warm-up failed: {}", e);
            process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&summary) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
    } else {
        println!(
            "Warmed {}/{} blocks ({} hits, {} misses) in {} ms",
            summary.loaded, summary.blocks, summary.cache.hits, summary.cache.misses, summary.elapsed_ms
        );
        if summary.failed > 0 || summary.panicked > 0 {
            println!("  Failed: {}, panicked: {}", summary.failed, summary.panicked);
        }
        if summary.cache.persist_failures > 0 {
            println!("  Not written to disk: {}", summary.cache.persist_failures);
        }
        if summary.faulted_records > 0 {
            println!("  Damaged cached records: {}", summary.faulted_records);
        }
    }

    if summary.interrupted {
        process::exit(EXIT_CODE_INTERRUPTED);
    }
    if summary.failed > 0 || summary.panicked > 0 {
        process::exit(1);
    }
}

fn run_invalidate(root: &Path, id: &str, version: &str, exact: bool, json: bool) {
    if id.is_empty() || version.is_empty() {
        eprintln!("Error: --id and --version must not be empty");
        process::exit(2);
    }
    let mode = if exact { MatchMode::Exact } else { MatchMode::Prefix };

    let removed = match cache::invalidate(root, id, version, mode) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error invalidating cache: {}", e);
            process::exit(1);
        }
    };

    if json {
        let output = serde_json::json!({
            "root": root,
            "id": id,
            "version": version,
            "match_mode": mode,
            "removed": removed,
        });
        println!("{}", output);
    } else if removed.is_empty() {
        println!("No stale generations of '{}' under {}", id, root.display());
    } else {
        println!(
            "Removed {} stale generation(s) ({} match):",
            removed.len(),
            mode.as_str()
        );
        for path in &removed {
            println!("  {}", path.display());
        }
    }
}

fn run_info(root: &Path, id: &str, json: bool) {
    let generations = match cache::list_generations(root, id) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error reading cache root: {}", e);
            process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&generations) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    if generations.is_empty() {
        println!("No generations of '{}' under {}", id, root.display());
        return;
    }

    println!("{:<24} {:>8} {:>14}", "VERSION", "BLOCKS", "BYTES");
    println!("{}", "-".repeat(48));
    for generation in &generations {
        println!(
            "{:<24} {:>8} {:>14}",
            generation.version, generation.block_files, generation.total_bytes
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    fn test_explicit_level_is_applied() {
        let filter = build_filter(Some("trace")).to_string();
        assert!(filter.contains("trace"), "filter: {}", filter);
    }
}
