//! 🚀 dsf: the front door of dsferry.
//!
//! 🎬 *[narrator voice]* "It all started with a dataset name and a bucket..."
//!
//! Thin on purpose: parse flags, set up tracing, load config, hand a [`JobRequest`] to
//! the library, print what came back. Ctrl-C asks the job to stop submitting work and
//! lets in-flight transfers land. 🦆
//!
//! Exit codes: 0 all good, 1 error, 2 `--strict` and at least one file failed,
//! 130 cancelled.

use std::path::PathBuf;
use std::process::exit;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, CellAlignment, Table, presets::NOTHING};
use dsf::{DatasetSource, JobRequest, JobSummary, SweepReport};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dsf", version, about = "⛴️ Ferry datasets from HuggingFace or Kaggle into object storage")]
struct Cli {
    /// TOML config file. Environment variables (DSF_*) apply either way; the file wins.
    #[arg(short = 'c', long, env = "DSF_CONFIG", global = true)]
    config_file: Option<PathBuf>,

    /// Log as JSON lines instead of pretty text
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download a dataset, upload it, announce it
    Fetch {
        /// owner/name
        #[arg(long)]
        dataset: String,
        /// huggingface (hf) or kaggle
        #[arg(long, default_value = "huggingface")]
        source: DatasetSource,
        /// subfolder of the mount to stage into
        #[arg(long)]
        dest_suffix: Option<String>,
        /// HuggingFace config name, matched as *name*
        #[arg(long)]
        config_name: Option<String>,
        /// HuggingFace split, matched as *split*
        #[arg(long)]
        split: Option<String>,
        /// exit 2 when any single file failed to download or upload
        #[arg(long)]
        strict: bool,
        /// print the job summary as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Delete everything under the staging mount root
    Sweep,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn summary_table(summary: &JobSummary) -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    let mut row = |label: &str, value: String| {
        table.add_row(vec![
            Cell::new(label).set_alignment(CellAlignment::Right),
            Cell::new(value),
        ]);
    };
    row("dataset", format!("{} ({})", summary.dataset, summary.source));
    row("staged in", summary.local_dir.clone());
    row("uploaded to", summary.destination_uri.clone());
    if let Some(revision) = &summary.revision {
        row("revision", revision.clone());
    }
    if let Some(complete) = summary.listing_complete {
        row("listing", if complete { "complete" } else { "partial (rate limited)" }.to_string());
    }
    row(
        "downloads",
        format!("{} ok, {} failed", summary.downloaded, summary.download_failed),
    );
    row(
        "uploads",
        format!(
            "{} ok, {} failed, {} bytes",
            summary.uploaded, summary.upload_failed, summary.bytes_uploaded
        ),
    );
    if summary.cancelled {
        row("cancelled", format!("{} files never submitted", summary.not_submitted));
    }
    row(
        "announced",
        match &summary.notification {
            Some(status) => status.to_string(),
            None => "no".to_string(),
        },
    );
    table
}

async fn fetch(
    config_file: Option<PathBuf>,
    request: JobRequest,
    strict: bool,
    json: bool,
) -> Result<i32> {
    let app_config = dsf::load_config(config_file.as_deref())
        .context("💀 In dsf, we couldn't load the config. Check the file and the DSF_* variables.")?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C: no new transfers will start, letting in-flight ones finish");
            on_ctrl_c.cancel();
        }
    });

    let report = dsf::run(&app_config, &request, &cancel).await?;
    let summary = report.summary();
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary_table(&summary));
        for key in &summary.failed_keys {
            println!("  💀 {key}");
        }
    }

    if summary.cancelled {
        return Ok(130);
    }
    if strict && report.failed_files() > 0 {
        error!("💀 --strict: {} files failed", report.failed_files());
        return Ok(2);
    }
    Ok(0)
}

async fn sweep(config_file: Option<PathBuf>) -> Result<i32> {
    let mount = dsf::load_mount_config(config_file.as_deref())?;
    let SweepReport { deleted, failed } = dsf::sweep(&mount).await?;
    info!("🧹 {deleted} entries deleted, {failed} could not be");
    Ok(if failed > 0 { 1 } else { 0 })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let result = match cli.command {
        Command::Fetch {
            dataset,
            source,
            dest_suffix,
            config_name,
            split,
            strict,
            json,
        } => match JobRequest::new(&dataset, source, dest_suffix.as_deref()) {
            Ok(request) => {
                let request = request.with_config_name(config_name).with_split(split);
                fetch(cli.config_file, request, strict, json).await
            }
            Err(err) => Err(anyhow::Error::new(err).context("💀 the request was rejected before anything happened")),
        },
        Command::Sweep => sweep(cli.config_file).await,
    };

    match result {
        Ok(code) => exit(code),
        Err(err) => {
            error!("💀 error: {err}");
            // -- 🧅 peel the onion, one layer at a time
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {cause}");
            }
            exit(1);
        }
    }
}
