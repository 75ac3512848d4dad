use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use fieldscribe::cli::{Cli, Commands, ModelsAction};
use fieldscribe::config::Config;
use fieldscribe::convert::{ConversionResult, ConvertOptions};
use fieldscribe::defaults;
use fieldscribe::diagnostics::{check_dependencies, print_checks};
use fieldscribe::ledger::{Stage, StatusView};
use fieldscribe::models::catalog::{get_model, list_models, resolve_name};
use fieldscribe::models::download::{download_model, format_model_info, list_installed_models};
use fieldscribe::pipeline::Pipeline;
use fieldscribe::queue::{Job, JobOutcome, WorkQueue};
use fieldscribe::sync::SyncOptions;
use fieldscribe::transcribe::TranscribeOptions;
use fieldscribe::{ScribeError, logging, remote, stt};
use owo_colors::OwoColorize;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            "fieldscribe",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        config.transcribe.model = model;
        config.transcribe.model_path = None;
    }
    config.validate()?;

    match cli.command {
        Commands::Sync { dry_run } => handle_sync(&config, dry_run).await?,
        Commands::Convert { id, all } => handle_convert(&config, id, all).await?,
        Commands::Transcribe { id } => {
            let pipeline = open_pipeline(&config, false, true)?;
            let transcript = pipeline.transcribe(&id).await?;
            println!("{}", transcript.full_text);
        }
        Commands::Process { id } => {
            let pipeline = open_pipeline(&config, false, true)?;
            let transcript = pipeline.process(&id).await?;
            println!("{}", transcript.full_text);
        }
        Commands::Status { id, json } => handle_status(&config, id, json)?,
        Commands::Transcript { id, json } => handle_transcript(&config, &id, json)?,
        Commands::Retry { id } => {
            let pipeline = open_pipeline(&config, false, false)?;
            let session = pipeline.ledger().retry(&id)?;
            println!("{id}: resumed at {}", session.stage.yellow());
        }
        Commands::Retranscribe { id } => {
            let pipeline = open_pipeline(&config, false, true)?;
            pipeline.ledger().retranscribe(&id)?;
            let transcript = pipeline.transcribe(&id).await?;
            println!("{}", transcript.full_text);
        }
        Commands::Stats { json } => handle_stats(&config, json)?,
        Commands::Check => print_checks(&check_dependencies(&config)),
        Commands::Models { action } => handle_models_command(action).await?,
        Commands::Run => handle_run(&config).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/fieldscribe/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

/// Open the store and attach the remote and the model on request.
fn open_pipeline(config: &Config, with_remote: bool, with_model: bool) -> Result<Pipeline> {
    let mut pipeline = Pipeline::open(
        fieldscribe::store::LocalStore::new(&config.storage.root),
        ConvertOptions::from(&config.convert),
    )
    .with_context(|| format!("cannot open store at {}", config.storage.root.display()))?;

    if with_remote {
        let inventory = remote::from_config(&config.remote)?;
        pipeline = pipeline.with_remote(inventory, SyncOptions::from_config(&config.sync)?);
    }
    if with_model {
        let transcriber = match stt::from_config(&config.transcribe) {
            Ok(t) => t,
            Err(e @ ScribeError::TranscriptionModelNotFound { .. }) => {
                return Err(e).with_context(|| {
                    format!(
                        "install it with: fieldscribe models install {}",
                        config.transcribe.model
                    )
                });
            }
            Err(e) => return Err(e.into()),
        };
        pipeline =
            pipeline.with_transcriber(transcriber, TranscribeOptions::from(&config.transcribe));
    }
    Ok(pipeline)
}

fn stage_label(stage: Stage) -> String {
    match stage {
        Stage::Complete => stage.green().to_string(),
        Stage::Failed => stage.red().to_string(),
        _ => stage.yellow().to_string(),
    }
}

async fn handle_sync(config: &Config, dry_run: bool) -> Result<()> {
    let pipeline = open_pipeline(config, true, false)?;
    let synchronizer = pipeline.synchronizer()?;

    if dry_run {
        let report = synchronizer.reconcile().await?;
        println!("{} present", report.present.len());
        for file in report.pending() {
            println!("  {} {} ({} bytes)", "would download".yellow(), file.id, file.size);
        }
        for id in &report.local_only {
            println!("  {} {id}", "local only".dimmed());
        }
        return Ok(());
    }

    let report = synchronizer.full_sync().await?;
    for id in &report.downloads.downloaded {
        println!("  {} {id}", "downloaded".green());
    }
    for (id, why) in &report.downloads.skipped {
        println!("  {} {id}: {why}", "skipped".dimmed());
    }
    for (id, error) in &report.downloads.failed {
        println!("  {} {id}: {error}", "failed".red());
    }
    if report.is_synced() {
        println!("{}", "In sync.".green());
    } else {
        bail!(
            "{} file(s) still missing after sync",
            report.after.pending().len()
        );
    }
    Ok(())
}

fn print_conversion(result: &ConversionResult) {
    if result.success {
        println!(
            "  {} {} ({:.1} s audio, {} ms)",
            "converted".green(),
            result.file_id,
            result.duration_ms as f64 / 1000.0,
            result.conversion_ms
        );
    } else {
        println!(
            "  {} {}: {}",
            "failed".red(),
            result.file_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
}

async fn handle_convert(config: &Config, id: Option<String>, all: bool) -> Result<()> {
    let pipeline = open_pipeline(config, false, false)?;
    let results = match id {
        Some(id) if !all => vec![pipeline.convert(&id).await],
        _ => pipeline.convert_all().await,
    };
    if results.is_empty() {
        println!("Nothing to convert.");
    }
    results.iter().for_each(print_conversion);

    let failed = results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        bail!("{failed} conversion(s) failed");
    }
    Ok(())
}

fn print_status(view: &StatusView) {
    print!("{:<24} {}", view.file_id, stage_label(view.stage));
    if let Some(at) = view.failed_at {
        print!(" at {at}");
        if let Some(window) = view.failed_window {
            print!(" (window {window})");
        }
    }
    if let Some(error) = &view.error {
        print!("  {}", error.dimmed());
    }
    println!();
}

fn handle_status(config: &Config, id: Option<String>, json: bool) -> Result<()> {
    let pipeline = open_pipeline(config, false, false)?;
    let ledger = pipeline.ledger();
    let views: Vec<StatusView> = match id {
        Some(id) => vec![
            ledger
                .get_status(&id)
                .ok_or(ScribeError::NotFound { file_id: id })?,
        ],
        None => ledger
            .sessions()
            .iter()
            .filter_map(|s| ledger.get_status(&s.file_id))
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&views)?);
    } else if views.is_empty() {
        println!("No recordings tracked yet. Run 'fieldscribe sync' first.");
    } else {
        views.iter().for_each(print_status);
    }
    Ok(())
}

/// `mm:ss.s`
fn timestamp(secs: f64) -> String {
    let minutes = (secs / 60.0).floor();
    format!("{:02}:{:04.1}", minutes as u64, secs - minutes * 60.0)
}

fn handle_transcript(config: &Config, id: &str, json: bool) -> Result<()> {
    let pipeline = open_pipeline(config, false, false)?;
    let Some(transcript) = pipeline.ledger().get_transcript(id)? else {
        bail!("no transcript for {id}");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(transcript.as_ref())?);
        return Ok(());
    }
    for segment in &transcript.segments {
        println!(
            "{} {}",
            format!("[{} - {}]", timestamp(segment.start), timestamp(segment.end)).dimmed(),
            segment.text
        );
    }
    Ok(())
}

fn handle_stats(config: &Config, json: bool) -> Result<()> {
    let pipeline = open_pipeline(config, false, false)?;
    let usage = pipeline.store().usage()?;
    let conversion = pipeline.converter().stats()?;
    let stages = pipeline.ledger().stage_counts();

    if json {
        let value = serde_json::json!({
            "file_count": usage.file_count,
            "total_bytes": usage.total_bytes,
            "conversion": conversion,
            "stages": stages,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!(
        "Storage:    {} files, {:.1} MB",
        usage.file_count,
        usage.total_bytes as f64 / 1_048_576.0
    );
    println!(
        "Converted:  {}/{} ({:.0}%)",
        conversion.converted,
        conversion.originals,
        conversion.ratio * 100.0
    );
    for stage in Stage::ALL {
        if let Some(count) = stages.get(&stage) {
            println!("  {:<14} {count}", stage_label(stage));
        }
    }
    Ok(())
}

async fn handle_models_command(action: ModelsAction) -> Result<()> {
    match action {
        ModelsAction::List => {
            println!("Available models:");
            for model in list_models() {
                println!("  {}", format_model_info(model));
            }
            let extra: Vec<String> = list_installed_models()
                .into_iter()
                .filter(|name| get_model(name).is_none())
                .collect();
            if !extra.is_empty() {
                println!("\nOther installed models:");
                for name in extra {
                    println!("  {name}");
                }
            }
        }
        ModelsAction::Install { name } => {
            let name = resolve_name(&name);
            let path = download_model(&name, true).await?;
            println!("{} {name} → {}", "Installed".green(), path.display());
        }
    }
    Ok(())
}

/// Sync, convert everything, then transcribe everything pending through
/// the work queue. Ctrl-C skips queued transcriptions and stops running ones
/// between windows.
async fn handle_run(config: &Config) -> Result<()> {
    let pipeline = Arc::new(open_pipeline(config, true, true)?);
    let workers = config.transcribe.workers.max(config.convert.concurrency);
    let queue = WorkQueue::start(pipeline.clone(), workers, defaults::QUEUE_CAPACITY);

    match queue.submit(Job::Sync).await?.wait().await? {
        JobOutcome::Synced(report) => println!(
            "Sync: {} downloaded, {} failed",
            report.downloads.downloaded.len(),
            report.downloads.failed.len()
        ),
        JobOutcome::Failed { error, .. } => bail!("sync failed: {error}"),
        _ => {}
    }

    if let JobOutcome::ConvertedAll(results) = queue.submit(Job::ConvertAll).await?.wait().await? {
        results.iter().for_each(print_conversion);
    }

    let pending = pipeline.transcription_candidates();
    let canceller = {
        let handle = queue.cancel_handle();
        let pending = pending.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", "Cancelling after the current windows...".yellow());
                for id in &pending {
                    handle.cancel(id);
                }
            }
        })
    };

    let mut tickets = Vec::with_capacity(pending.len());
    for id in &pending {
        tickets.push((id.clone(), queue.submit(Job::Transcribe(id.clone())).await?));
    }
    let mut failed = 0;
    for (id, ticket) in tickets {
        match ticket.wait().await? {
            JobOutcome::Transcribed(t) => println!(
                "  {} {id} ({} windows, {} segments)",
                "transcribed".green(),
                t.windows,
                t.segments.len()
            ),
            JobOutcome::Failed { error, .. } => {
                failed += 1;
                println!("  {} {id}: {error}", "failed".red());
            }
            _ => {}
        }
    }
    canceller.abort();
    queue.shutdown().await;

    if failed > 0 {
        bail!("{failed} transcription(s) failed; see 'fieldscribe status'");
    }
    Ok(())
}
