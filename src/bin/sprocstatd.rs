//! sprocstatd - stored procedure statistics collector daemon.
//!
//! Runs one collection pipeline per monitored database, each on its own
//! thread, all writing to the same monitoring store.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use sprocstat::CollectError;
use sprocstat::collector::{CollectionPipeline, PgStatsSource, StatsSource};
use sprocstat::config::{CollectorConfig, PendingPolicy, SourceConfig, redact_password};
use sprocstat::storage::{CachedIdentityResolver, PgMonitorStore};

/// Stored procedure statistics collector daemon.
#[derive(Parser)]
#[command(
    name = "sprocstatd",
    about = "Stored procedure statistics collector daemon",
    version
)]
struct Args {
    /// Monitored database as ID=CONNINFO (e.g. "3=host=db3 dbname=shop").
    /// Repeat for several databases. Defaults to the PG* environment variables.
    #[arg(long = "source", env = "SPROCSTAT_SOURCES", value_delimiter = ';')]
    sources: Vec<String>,

    /// Host id used when no --source is given.
    #[arg(long, default_value = "1", env = "SPROCSTAT_HOST_ID")]
    host_id: i32,

    /// Connection string of the monitoring store.
    #[arg(long, env = "SPROCSTAT_TARGET")]
    target: String,

    /// Collection interval in seconds.
    #[arg(
        short,
        long,
        default_value = "60",
        env = "SPROCSTAT_INTERVAL",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval: u64,

    /// Statement timeout on monitored databases, in seconds.
    #[arg(
        long,
        default_value = "15",
        env = "SPROCSTAT_STATEMENT_TIMEOUT",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    statement_timeout: u64,

    /// Clause appended to the statistics query (must start with AND/OR).
    #[arg(long, default_value = "", env = "SPROCSTAT_SCHEMA_FILTER")]
    schema_filter: String,

    /// Drop snapshots of a failed cycle instead of retrying them next cycle.
    #[arg(long)]
    discard_failed: bool,

    /// Maximum number of snapshot batches kept for retry.
    #[arg(long, default_value = "60")]
    max_pending: usize,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["sprocstatd", "sprocstat"] {
        match format!("{}={}", target, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("invalid log directive for {}: {}", target, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Builds the per-source configs from arguments or the environment.
fn source_configs(args: &Args) -> Result<Vec<SourceConfig>, CollectError> {
    let bases = if args.sources.is_empty() {
        vec![SourceConfig::from_env(args.host_id)?]
    } else {
        args.sources
            .iter()
            .map(|arg| SourceConfig::from_arg(arg))
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut seen = std::collections::HashSet::new();
    let mut configs = Vec::with_capacity(bases.len());
    for base in bases {
        if !seen.insert(base.host_id) {
            return Err(CollectError::InvalidConfig(format!(
                "host id {} configured twice",
                base.host_id
            )));
        }
        configs.push(
            base.with_statement_timeout(Duration::from_secs(args.statement_timeout))
                .with_schema_filter(args.schema_filter.clone())?,
        );
    }
    Ok(configs)
}

/// Per-host cycle totals reported at shutdown.
#[derive(Debug, Default)]
struct CycleTotals {
    succeeded: u64,
    failed: u64,
}

fn spawn_collector(
    source: SourceConfig,
    store: Arc<PgMonitorStore>,
    config: CollectorConfig,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<(String, CycleTotals)>> {
    let source = PgStatsSource::new(source);
    let name = source.name().to_string();
    let resolver = CachedIdentityResolver::new(source.config().host_id);

    std::thread::Builder::new()
        .name(format!("collector-{}", source.config().host_id))
        .spawn(move || {
            let interval = config.interval;
            let mut pipeline = CollectionPipeline::new(source, store, resolver, config);
            let mut totals = CycleTotals::default();

            while running.load(Ordering::SeqCst) {
                if pipeline.run_cycle() {
                    totals.succeeded += 1;
                } else {
                    totals.failed += 1;
                }

                // Sleep with periodic checks for shutdown signal
                let sleep_interval = Duration::from_millis(100);
                let mut remaining = interval;
                while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
                    let sleep_time = remaining.min(sleep_interval);
                    std::thread::sleep(sleep_time);
                    remaining = remaining.saturating_sub(sleep_time);
                }
            }

            if pipeline.pending_batches() > 0 {
                warn!(
                    host = %name,
                    pending = pipeline.pending_batches(),
                    "exiting with unpersisted snapshots"
                );
            }
            (name, totals)
        })
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!("sprocstatd {} starting", env!("CARGO_PKG_VERSION"));

    let sources = match source_configs(&args) {
        Ok(sources) => sources,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    let config = CollectorConfig {
        interval: Duration::from_secs(args.interval),
        pending_policy: if args.discard_failed {
            PendingPolicy::DiscardOnFailure
        } else {
            PendingPolicy::RetainOnFailure
        },
        max_pending_batches: args.max_pending,
    };
    info!(
        "Config: interval={}s, statement_timeout={}s, sources={}, policy={:?}, max_pending={}",
        args.interval,
        args.statement_timeout,
        sources.len(),
        config.pending_policy,
        config.max_pending_batches
    );

    let store = Arc::new(PgMonitorStore::new(args.target.clone()));
    info!("Monitoring store: {}", store.describe());

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let mut handles = Vec::with_capacity(sources.len());
    for source in sources {
        debug!(
            host_id = source.host_id,
            source = %redact_password(&source.connection_string),
            "starting collector"
        );
        let host_id = source.host_id;
        match spawn_collector(source, store.clone(), config.clone(), running.clone()) {
            Ok(handle) => handles.push(handle),
            Err(e) => error!(host_id, error = %e, "failed to start collector thread"),
        }
    }

    if handles.is_empty() {
        error!("No collectors running");
        std::process::exit(1);
    }

    for handle in handles {
        match handle.join() {
            Ok((name, totals)) => info!(
                host = %name,
                succeeded = totals.succeeded,
                failed = totals.failed,
                "collector stopped"
            ),
            Err(_) => error!("collector thread panicked"),
        }
    }

    info!("Shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["sprocstatd", "--target", "host=mon dbname=monitor"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    fn try_args(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["sprocstatd", "--target", "host=mon dbname=monitor"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn parses_multiple_sources() {
        let a = args(&[
            "--source",
            "1=host=db1 dbname=shop",
            "--source",
            "2=host=db2 dbname=shop",
            "--schema-filter",
            "AND schemaname LIKE '%_api'",
        ]);
        let configs = source_configs(&a).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[1].host_id, 2);
        assert_eq!(configs[0].statement_timeout, Duration::from_secs(15));
        assert_eq!(configs[0].schema_filter, "AND schemaname LIKE '%_api'");
    }

    #[test]
    fn rejects_duplicate_host_ids() {
        let a = args(&["--source", "1=host=db1", "--source", "1=host=db2"]);
        assert!(matches!(
            source_configs(&a),
            Err(CollectError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_bad_schema_filter() {
        let a = args(&["--source", "1=host=db1", "--schema-filter", "schemaname = 'x'"]);
        assert!(source_configs(&a).is_err());
    }

    #[test]
    fn defaults() {
        let a = args(&["--source", "1=host=db1"]);
        assert_eq!(a.interval, 60);
        assert_eq!(a.max_pending, 60);
        assert!(!a.discard_failed);
    }

    #[test]
    fn rejects_zero_interval_and_timeout() {
        assert!(try_args(&["--interval", "0"]).is_err());
        assert!(try_args(&["--statement-timeout", "0"]).is_err());
        let a = try_args(&["--interval", "1", "--statement-timeout", "1"]).unwrap();
        assert_eq!((a.interval, a.statement_timeout), (1, 1));
    }
}
