/*!
 * Cheyenne CLI - run one Router or Duplication Worker invocation
 *
 * Reads a platform batch (`{"Records": [...]}`) from a file or stdin. With
 * `--dry-run` the in-memory collaborators stand in for S3 and SQS.
 */

use anyhow::Context;
use cheyenne::{
    config::{LogFormat, VaultConfig},
    error::{Result, VaultError, EXIT_SUCCESS},
    logging,
    tier::DispatchTier,
    DuplicationReport, DuplicationWorker, PlatformBatch, RouteReport, Router, VaultEventRecord,
};
use cheyenne_core_interface::memory::{MemoryObjectStore, MemoryQueue};
use cheyenne_core_interface::queue_name;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "cheyenne")]
#[command(version, about = "Vault newly written objects with provenance tags", long_about = None)]
struct Cli {
    /// TOML configuration file (default: read from the environment)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Use in-memory collaborators instead of S3 and SQS
    #[arg(long, global = true)]
    dry_run: bool,

    /// Same as DEBUG_MODE=true
    #[arg(short = 'd', long, global = true)]
    debug: bool,

    /// Log output format
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify change notifications and dispatch them to the tier queues
    Route {
        /// Platform batch file ("-" or absent = stdin)
        #[arg(short = 'i', long = "input", value_name = "FILE")]
        input: Option<PathBuf>,
    },

    /// Copy queued objects into the vault
    Duplicate {
        /// Platform batch file ("-" or absent = stdin)
        #[arg(short = 'i', long = "input", value_name = "FILE")]
        input: Option<PathBuf>,
    },

    /// Validate configuration for one or both stages
    CheckConfig {
        #[arg(long)]
        router: bool,

        #[arg(long)]
        duplicator: bool,

        /// Also write the effective configuration as TOML
        #[arg(short = 'w', long = "write", value_name = "FILE")]
        write: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Json,
    Compact,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Compact => LogFormat::Compact,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => VaultConfig::from_file(path)?,
        None => VaultConfig::from_env()?,
    };
    if cli.debug {
        config.logging.debug_mode = true;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }
    logging::init_logging(&config.logging)?;

    match cli.command {
        Commands::Route { input } => {
            let batch = read_batch(input.as_deref())?;
            let report = runtime()?.block_on(route(&config, &batch, cli.dry_run))?;
            print_route_report(&report);
            Ok(())
        }
        Commands::Duplicate { input } => {
            let batch = read_batch(input.as_deref())?;
            let report = runtime()?.block_on(duplicate(&config, &batch, cli.dry_run))?;
            println!(
                "{}",
                serde_json::json!({
                    "accepted": report.accepted.len(),
                    "destination_keys": report
                        .accepted
                        .iter()
                        .map(|r| r.destination_key.as_str())
                        .collect::<Vec<_>>(),
                })
            );
            Ok(())
        }
        Commands::CheckConfig {
            router,
            duplicator,
            write,
        } => {
            check_config(&config, router, duplicator)?;
            if let Some(path) = write {
                config.to_file(&path)?;
                println!("wrote {}", path.display());
            }
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| VaultError::Config(format!("Failed to start async runtime: {}", e)))
}

fn read_input(path: Option<&Path>) -> anyhow::Result<String> {
    let mut contents = String::new();
    match path {
        Some(path) if path != Path::new("-") => {
            contents = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read batch file {}", path.display()))?;
        }
        _ => {
            std::io::stdin()
                .read_to_string(&mut contents)
                .context("cannot read batch from stdin")?;
        }
    }
    Ok(contents)
}

fn read_batch(path: Option<&Path>) -> Result<PlatformBatch> {
    let raw = read_input(path)
        .map_err(|e| VaultError::Io(std::io::Error::other(format!("{:#}", e))))?;
    PlatformBatch::from_json(&raw)
}

async fn route(config: &VaultConfig, batch: &PlatformBatch, dry_run: bool) -> Result<RouteReport> {
    if !dry_run {
        return live::route(config, batch).await;
    }

    let queue = MemoryQueue::new();
    let router = Router::from_config(queue.clone(), config)?;
    let report = router.route_batch(&batch.records).await?;

    for tier in DispatchTier::ALL {
        let target = router.targets().queue_for(tier);
        for message in queue.pending(target) {
            info!(
                queue = queue_name(target),
                queue_type = %tier,
                group_key = ?message.group_key,
                body = %message.body,
                "dry run: would send"
            );
        }
    }
    Ok(report)
}

async fn duplicate(
    config: &VaultConfig,
    batch: &PlatformBatch,
    dry_run: bool,
) -> Result<DuplicationReport> {
    if !dry_run {
        return live::duplicate(config, batch).await;
    }

    // Mirror every referenced origin object so copies have something to read.
    let store = MemoryObjectStore::new();
    for record in &batch.records {
        if let Ok(event) = VaultEventRecord::from_body(&record.body) {
            let origin = event.notification.object_ref();
            store.seed_object(&origin.bucket, &origin.key, origin.version_id.as_deref(), b"");
        }
    }

    let worker = DuplicationWorker::from_config(store.clone(), MemoryQueue::new(), config)?;
    let report = worker.process_batch(&batch.records).await?;
    for record in &report.accepted {
        if let Some(copy) = store.object(worker.vault_bucket(), &record.destination_key) {
            info!(
                vault_event_uuid = %record.correlation_id,
                to_key = %record.destination_key,
                storage_class = %copy.storage_class,
                tags = ?copy.tags,
                "dry run: would copy"
            );
        }
    }
    Ok(report)
}

fn print_route_report(report: &RouteReport) {
    println!(
        "{}",
        serde_json::json!({
            "group_key": report.group_key,
            "standard": report.count(DispatchTier::Standard),
            "large": report.count(DispatchTier::Large),
            "failure": report.count(DispatchTier::Failure),
            "vault_event_uuids": report.dispatched.values().flatten().collect::<Vec<_>>(),
        })
    );
}

fn check_config(config: &VaultConfig, router: bool, duplicator: bool) -> Result<()> {
    let (router, duplicator) = if router || duplicator {
        (router, duplicator)
    } else {
        (true, true)
    };

    if router {
        config.validate_for_router()?;
        println!("router: ok");
    }
    if duplicator {
        config.validate_for_duplicator()?;
        println!("duplicator: ok");
    }
    Ok(())
}

#[cfg(feature = "aws")]
mod live {
    use cheyenne::aws::{load_sdk_config, S3ObjectStore, SqsQueue};
    use cheyenne::{
        DuplicationReport, DuplicationWorker, PlatformBatch, Result, RouteReport, Router,
        VaultConfig,
    };

    pub async fn route(config: &VaultConfig, batch: &PlatformBatch) -> Result<RouteReport> {
        let sdk_config = load_sdk_config(config.region.clone()).await;
        let router = Router::from_config(SqsQueue::new(&sdk_config), config)?;
        router.route_batch(&batch.records).await
    }

    pub async fn duplicate(
        config: &VaultConfig,
        batch: &PlatformBatch,
    ) -> Result<DuplicationReport> {
        let sdk_config = load_sdk_config(config.region.clone()).await;
        let worker = DuplicationWorker::from_config(
            S3ObjectStore::new(&sdk_config),
            SqsQueue::new(&sdk_config),
            config,
        )?;
        worker.process_batch(&batch.records).await
    }
}

#[cfg(not(feature = "aws"))]
mod live {
    use cheyenne::{DuplicationReport, PlatformBatch, Result, RouteReport, VaultConfig, VaultError};

    fn unavailable() -> VaultError {
        VaultError::Config(
            "built without the `aws` feature; rebuild with --features aws or pass --dry-run"
                .to_string(),
        )
    }

    pub async fn route(_config: &VaultConfig, _batch: &PlatformBatch) -> Result<RouteReport> {
        Err(unavailable())
    }

    pub async fn duplicate(
        _config: &VaultConfig,
        _batch: &PlatformBatch,
    ) -> Result<DuplicationReport> {
        Err(unavailable())
    }
}
