//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use leadscout_core::{JobQueue, ProgressHub, Subscription, WorkerPool, seed_demo_data};
use leadscout_search::provider_from_config;
use leadscout_shared::{
    AgentConfig, AppConfig, COMPANY_ENTITY, EnrichmentJob, JobId, JobStatus, ProgressEvent,
    ProgressStep, QueueConfig, WorkerConfig, database_path, init_config, load_config,
};
use leadscout_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// LeadScout: research company facts for your contacts.
#[derive(Parser)]
#[command(
    name = "leadscout",
    version,
    about = "Enrich contact records with researched company facts.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database file (overrides `[database].path`).
    #[arg(long, env = "LEADSCOUT_DB", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Insert the demo company and contacts.
    Seed,

    /// List contacts with their companies.
    People,

    /// Queue an enrichment job for a contact.
    Enrich {
        /// Person ID (see `leadscout people`).
        person_id: String,

        /// Run a worker pool in-process and stream progress until the job finishes.
        #[arg(short, long)]
        watch: bool,

        /// Print progress events as JSON lines instead of a spinner.
        #[arg(long, requires = "watch")]
        json: bool,
    },

    /// Run the worker pool until interrupted.
    ///
    /// On start, jobs left active by a crashed process are requeued at once,
    /// so run one worker per database.
    Worker {
        /// Maximum jobs processed at once (overrides `[worker].concurrency`).
        #[arg(short, long)]
        concurrency: Option<u32>,
    },

    /// Show one job.
    Job {
        /// Job ID printed by `enrich`.
        job_id: String,
    },

    /// List pending jobs, or permanently failed ones.
    Jobs {
        /// Only permanently failed jobs.
        #[arg(long)]
        failed: bool,
    },

    /// Show stored research results for a company, newest first.
    Snippets {
        /// Company ID.
        company_id: String,

        /// Include per-iteration search logs.
        #[arg(long)]
        logs: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "leadscout=info",
        1 => "leadscout=debug",
        _ => "leadscout=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config()?;
    if let Some(db) = &cli.db {
        config.database.path = db.to_string_lossy().to_string();
    }

    match cli.command {
        Command::Seed => cmd_seed(&config).await,
        Command::People => cmd_people(&config).await,
        Command::Enrich {
            person_id,
            watch,
            json,
        } => cmd_enrich(&config, &person_id, watch, json).await,
        Command::Worker { concurrency } => {
            if let Some(n) = concurrency {
                config.worker.concurrency = n;
            }
            cmd_worker(&config).await
        }
        Command::Job { job_id } => cmd_job(&config, &job_id).await,
        Command::Jobs { failed } => cmd_jobs(&config, failed).await,
        Command::Snippets { company_id, logs } => cmd_snippets(&config, &company_id, logs).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = database_path(config)?;
    Ok(Arc::new(Storage::open(&path).await?))
}

async fn open_storage_readonly(config: &AppConfig) -> Result<Storage> {
    let path = database_path(config)?;
    if !path.exists() {
        return Err(eyre!(
            "no database at '{}'; run `leadscout seed` first",
            path.display()
        ));
    }
    Ok(Storage::open_readonly(&path).await?)
}

fn parse_job_id(raw: &str) -> Result<JobId> {
    raw.parse().map_err(|e| eyre!("invalid job id '{raw}': {e}"))
}

/// Build a pool over `storage` using the configured backend and limits.
fn build_pool(
    config: &AppConfig,
    storage: Arc<Storage>,
    queue: Arc<JobQueue>,
    hub: ProgressHub,
) -> Result<WorkerPool> {
    let provider = provider_from_config(config)?;
    Ok(WorkerPool::new(
        queue,
        hub,
        provider,
        storage,
        AgentConfig::from(config),
        WorkerConfig::from(config),
    ))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_seed(config: &AppConfig) -> Result<()> {
    let storage = open_storage(config).await?;
    let summary = seed_demo_data(&storage).await?;

    println!();
    if summary.inserted == 0 {
        println!("  Demo data already present.");
    } else {
        println!("  Seeded {} records.", summary.inserted);
    }
    println!("  Company: {}", summary.company_id);
    for id in &summary.person_ids {
        println!("  Person:  {id}");
    }
    println!();
    Ok(())
}

async fn cmd_people(config: &AppConfig) -> Result<()> {
    let storage = open_storage_readonly(config).await?;
    let subjects = storage.list_subjects().await?;

    if subjects.is_empty() {
        println!("No people found. Run `leadscout seed` to add demo data.");
        return Ok(());
    }

    for subject in subjects {
        let person = &subject.person;
        let company = subject
            .company
            .as_ref()
            .map(|c| format!("{} ({}) {}", c.name, c.id, c.domain.as_deref().unwrap_or("-")))
            .unwrap_or_else(|| "no company".into());
        println!(
            "{}  {:<16} {:<20} {:<6} {company}",
            person.id,
            person.full_name,
            person.email,
            person.title.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn cmd_enrich(config: &AppConfig, person_id: &str, watch: bool, json: bool) -> Result<()> {
    let storage = open_storage(config).await?;
    let queue = Arc::new(JobQueue::new(
        Arc::clone(&storage),
        QueueConfig::from(config),
    ));

    let job_id = queue.enqueue_subject(person_id).await?;
    info!(%job_id, person_id, "enrichment queued");

    if !watch {
        println!("{job_id}");
        return Ok(());
    }

    let hub = ProgressHub::new();
    // Subscribe before any worker can pick the job up.
    let subscription = hub.subscribe(&job_id);
    let handle = build_pool(config, Arc::clone(&storage), Arc::clone(&queue), hub.clone())?
        .start()
        .await?;

    let renderer = ProgressRenderer::new(json);
    let outcome = watch_job(&queue, &hub, &job_id, subscription, &renderer).await;
    renderer.finish();
    handle.shutdown().await;

    match outcome? {
        Some(job) => print_job_outcome(&job, json),
        None => {
            println!("Interrupted; job {job_id} continues with the next `leadscout worker`.");
            Ok(())
        }
    }
}

/// Stream progress until the job reaches a final status.
///
/// A failed attempt ends one observation session; while the job is being
/// retried a new session is opened for the next attempt. Returns `None` if
/// interrupted.
async fn watch_job(
    queue: &JobQueue,
    hub: &ProgressHub,
    job_id: &JobId,
    mut subscription: Subscription,
    renderer: &ProgressRenderer,
) -> Result<Option<EnrichmentJob>> {
    loop {
        loop {
            tokio::select! {
                event = subscription.recv() => match event {
                    Some(event) => renderer.render(&event),
                    None => break,
                },
                _ = shutdown_signal() => return Ok(None),
            }
        }

        let job = queue
            .get(job_id)
            .await?
            .ok_or_else(|| eyre!("job {job_id} disappeared"))?;
        if job.status.is_final() {
            return Ok(Some(job));
        }
        if job.status == JobStatus::Waiting {
            renderer.note(&format!(
                "Attempt {} of {} failed, retrying...",
                job.attempts_made, job.max_attempts
            ));
        }
        subscription = hub.subscribe(job_id);
        if subscription.is_closed() {
            tokio::time::sleep(queue.config().poll_interval).await;
        }
    }
}

fn print_job_outcome(job: &EnrichmentJob, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(job)?);
        return Ok(());
    }
    println!();
    match job.status {
        JobStatus::Completed => {
            println!("  Enrichment complete!");
            if let Some(snippet_id) = &job.snippet_id {
                println!("  Snippet:  {snippet_id}");
            }
        }
        _ => {
            println!("  Enrichment failed after {} attempts.", job.attempts_made);
            if let Some(error) = &job.last_error {
                println!("  Reason:   {error}");
            }
        }
    }
    println!("  Job:      {}", job.id);
    println!();
    Ok(())
}

async fn cmd_worker(config: &AppConfig) -> Result<()> {
    let storage = open_storage(config).await?;
    let queue = Arc::new(JobQueue::new(
        Arc::clone(&storage),
        QueueConfig::from(config),
    ));
    let handle = build_pool(config, storage, queue, ProgressHub::new())?
        .with_startup_recovery()
        .start()
        .await?;

    println!(
        "Worker running with concurrency {}. Press Ctrl+C to stop.",
        WorkerConfig::from(config).concurrency
    );
    shutdown_signal().await;
    info!("shutdown requested, draining active jobs");
    handle.shutdown().await;
    Ok(())
}

async fn cmd_job(config: &AppConfig, raw_id: &str) -> Result<()> {
    let job_id = parse_job_id(raw_id)?;
    let storage = open_storage_readonly(config).await?;
    let job = storage
        .get_job(&job_id)
        .await?
        .ok_or_else(|| eyre!("job {job_id} not found (finished jobs are kept for a limited time)"))?;

    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

async fn cmd_jobs(config: &AppConfig, failed: bool) -> Result<()> {
    let storage = open_storage_readonly(config).await?;
    let statuses: &[JobStatus] = if failed {
        &[JobStatus::Failed]
    } else {
        &[JobStatus::Active, JobStatus::Waiting]
    };

    let mut found = 0;
    for status in statuses {
        for job in storage.list_jobs_by_status(*status).await? {
            found += 1;
            println!(
                "{}  {:<9} {}/{}  {}  {}",
                job.id,
                job.status,
                job.attempts_made,
                job.max_attempts,
                job.subject_id,
                job.last_error.as_deref().unwrap_or(""),
            );
        }
    }
    if found == 0 {
        println!("No jobs.");
    }
    Ok(())
}

async fn cmd_snippets(config: &AppConfig, company_id: &str, logs: bool) -> Result<()> {
    let storage = open_storage_readonly(config).await?;
    let mut snippets = storage
        .list_snippets_for_entity(COMPANY_ENTITY, company_id)
        .await?;

    if logs {
        for snippet in &mut snippets {
            if let Some(full) = storage.get_snippet(&snippet.id).await? {
                *snippet = full;
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&snippets)?);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received Ctrl+C"),
        _ = wait_for_sigterm() => info!("received SIGTERM"),
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}

// ---------------------------------------------------------------------------
// CLI progress renderer
// ---------------------------------------------------------------------------

/// Renders progress events with an indicatif spinner, or as JSON lines.
struct ProgressRenderer {
    spinner: Option<ProgressBar>,
}

impl ProgressRenderer {
    fn new(json: bool) -> Self {
        if json {
            return Self { spinner: None };
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self {
            spinner: Some(spinner),
        }
    }

    fn render(&self, event: &ProgressEvent) {
        let Some(spinner) = &self.spinner else {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{line}");
            }
            return;
        };

        match event.step {
            ProgressStep::Search => {
                let iteration = event
                    .metadata
                    .get("iteration")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                spinner.set_message(format!("[{iteration}] {}", event.message));
                if let Some(query) = event.metadata.get("query").and_then(|v| v.as_str()) {
                    spinner.println(format!("  search {iteration}: {query}"));
                }
            }
            ProgressStep::Error => {
                spinner.println(format!("  error: {}", event.message));
                if let Some(errors) = event.metadata.get("errors") {
                    spinner.println(format!("  {errors}"));
                }
            }
            ProgressStep::Complete => spinner.println(format!("  {}", event.message)),
            _ => spinner.set_message(event.message.clone()),
        }
    }

    fn note(&self, message: &str) {
        match &self.spinner {
            Some(spinner) => spinner.println(format!("  {message}")),
            None => info!("{message}"),
        }
    }

    fn finish(&self) {
        if let Some(spinner) = &self.spinner {
            spinner.finish_and_clear();
        }
    }
}
