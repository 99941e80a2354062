//! Main entry point for the orchestrator binary
//!
//! Runs one batch from a JSON list of source descriptors, logs progress
//! snapshots while it runs and writes `manifest.json` to the output directory.
//! Ctrl+C requests a cooperative stop: in-flight items finish, the rest are
//! skipped, and the manifest is still written.

use std::path::PathBuf;
use anyhow::Context;
use clap::Parser;
use tokio::signal;

use orchestrator::{ProviderMode, ServiceOptions, build_service};
use shared::{
    BatchConfig, BatchRequest, ProcessId, RetryPolicy, SourceDescriptor, logging, process_debug, process_info,
    process_warn,
};

/// Batch image enhancement with rate-limited generation credentials
#[derive(Parser, Debug)]
#[command(name = "orchestrator")]
#[command(about = "Runs one enhancement batch and writes its manifest")]
pub struct Args {
    /// JSON file holding a list of source descriptors
    #[arg(long)]
    pub input: PathBuf,

    /// Output directory for manifest.json
    #[arg(long, default_value = "./output")]
    pub output: PathBuf,

    /// Variants per item unless the item sets its own count
    #[arg(long, default_value = "1")]
    pub variants: u32,

    /// Provider calls allowed per item, including the first
    #[arg(long, default_value = "3")]
    pub max_attempts: u32,

    /// Cap on in-flight items across all credentials
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Stop generating once this much has been spent on the batch
    #[arg(long)]
    pub budget: Option<f64>,

    /// JSON-lines reuse cache file (in-memory when not set)
    #[arg(long)]
    pub cache_file: Option<PathBuf>,

    /// Generation provider
    #[arg(long, value_enum, default_value = "random")]
    pub provider: ProviderMode,

    /// Generation endpoint for the http provider
    #[arg(long, env = "GENERATION_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Synthetic credentials in random mode
    #[arg(long, default_value = "3")]
    pub simulated_credentials: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    ProcessId::init_orchestrator();
    logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup(ProcessId::current(), "batch enhancement (CLI mode)");

    let raw = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("reading {}", args.input.display()))?;
    let sources: Vec<SourceDescriptor> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", args.input.display()))?;
    process_debug!(ProcessId::current(), "Read {} source(s) from {}", sources.len(), args.input.display());

    let service = build_service(&ServiceOptions {
        provider: args.provider,
        endpoint: args.endpoint.clone(),
        simulated_credentials: args.simulated_credentials,
        cache_file: args.cache_file.clone(),
        ..ServiceOptions::default()
    })
    .await?;

    let config = BatchConfig {
        variant_count: args.variants,
        max_concurrency: args.max_concurrency,
        budget: args.budget,
        retry: RetryPolicy {
            max_attempts: args.max_attempts,
            ..RetryPolicy::default()
        },
        ..BatchConfig::default()
    };
    let batch_id = service.submit(BatchRequest { sources, config }).await?;

    // Ctrl+C requests a stop; the batch still finishes and writes its manifest
    let stopper = service.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                logging::log_shutdown(ProcessId::current(), "Received Ctrl+C signal, stopping batch");
                let _ = stopper.stop(batch_id).await;
            }
            Err(err) => {
                logging::log_error(ProcessId::current(), "Signal handling", &err);
            }
        }
    });

    let mut progress = service.subscribe(batch_id).await?;
    while let Some(snapshot) = progress.next().await {
        let eta = snapshot
            .eta_seconds
            .map(|eta| format!("{eta:.0}s"))
            .unwrap_or_else(|| "unknown".to_string());
        logging::log_progress(
            ProcessId::current(),
            &format!("{:.1}%", snapshot.percent_complete),
            &format!(
                "{} succeeded, {} reused, {} failed, {} skipped of {}, eta {}",
                snapshot.succeeded, snapshot.reused, snapshot.failed, snapshot.skipped, snapshot.total, eta
            ),
        );
    }

    let manifest = service.wait(batch_id).await?;
    tokio::fs::create_dir_all(&args.output)
        .await
        .with_context(|| format!("creating {}", args.output.display()))?;
    let path = args.output.join("manifest.json");
    tokio::fs::write(&path, manifest.to_json_pretty()?)
        .await
        .with_context(|| format!("writing {}", path.display()))?;

    let stats = service.cache_stats();
    process_info!(
        ProcessId::current(),
        "📊 Cache: {} hit(s), {} miss(es), {} wait(s), reuse rate {:.1}%",
        stats.hits,
        stats.misses,
        stats.waits,
        stats.reuse_rate
    );
    for usage in &manifest.credential_usage {
        process_info!(
            ProcessId::current(),
            "🔑 {} ({}): {} request(s), {} ok, {} failed, {}ms waiting for tokens, {} image(s) costing {:.4}",
            usage.name,
            usage.tier,
            usage.requests,
            usage.successes,
            usage.failures,
            usage.token_wait_ms,
            usage.images,
            usage.cost
        );
    }
    if manifest.budget_exhausted {
        process_warn!(
            ProcessId::current(),
            "💸 Budget of {:.2} ran out; {} item(s) were skipped",
            manifest.budget.unwrap_or_default(),
            manifest.skipped
        );
    }
    process_info!(
        ProcessId::current(),
        "💰 Generated {} image(s) for a total of {:.4}",
        manifest.generated_images,
        manifest.total_cost
    );

    logging::log_success(
        ProcessId::current(),
        &format!("Batch {} {}; manifest written to {}", batch_id, manifest.status, path.display()),
    );
    Ok(())
}
