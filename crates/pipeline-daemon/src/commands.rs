//! Command implementations for the pipeline daemon.
//!
//! Handles:
//! - start: load config, open storage and gateways, run both consumers
//! - submit: the producer side of an upload (container, job, queue message)
//! - job / queue: operator inspection of persisted state

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::TryStreamExt;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use walkdir::WalkDir;

use pipeline_blob::{open_object_store, ObjectStore};
use pipeline_consumers::{
    encode, ContainerCleaner, IngestConsumer, JobReference, PollingWorker, ProvisionConsumer,
    RetryPolicy, WorkerRegistry,
};
use pipeline_search::{IndexingGateway, SearchClientConfig, SearchServiceClient};
use pipeline_storage::{JobStore, MessageQueue, Storage, StorageError, StorageQueue};
use pipeline_types::{
    build_tree, container_name, index_name, Job, JobDefinitions, JobId, JobUpdate, NewJob,
    Settings,
};

use crate::cli::{JobCommands, QueueCommands};

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(db_path) = db_path_override {
        settings.db_path = db_path.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the setting.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn open_storage(settings: &Settings) -> Result<Arc<Storage>> {
    let db_path = settings.expanded_db_path();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    match Storage::open(&db_path) {
        Ok(storage) => Ok(Arc::new(storage)),
        Err(StorageError::Locked(path)) => Err(anyhow!(
            "Storage at {:?} is held by a running daemon; stop it before running this command, \
             or use `job show`, `job list` and `queue stats`, which read alongside it",
            path
        )),
        Err(e) => {
            Err(anyhow::Error::new(e).context(format!("Failed to open storage at {:?}", db_path)))
        }
    }
}

/// Open storage for inspection. Does not take the database lock.
fn open_storage_read_only(settings: &Settings) -> Result<Arc<Storage>> {
    let db_path = settings.expanded_db_path();
    let storage = Storage::open_read_only(&db_path)
        .with_context(|| format!("Failed to open storage read-only at {:?}", db_path))?;
    Ok(Arc::new(storage))
}

fn open_queue(storage: &Arc<Storage>, name: &str) -> Result<Arc<dyn MessageQueue>> {
    let queue = StorageQueue::new(storage.clone(), name)
        .with_context(|| format!("Invalid queue name '{}'", name))?;
    Ok(Arc::new(queue))
}

/// Queue names the daemon uses, dead-letter queues included when enabled.
pub fn queue_names(settings: &Settings) -> Vec<String> {
    let mut names = vec![settings.primary_queue(), settings.secondary_queue()];
    if settings.queues.dead_letter {
        names.push(Settings::dead_letter_queue(&settings.primary_queue()));
        names.push(Settings::dead_letter_queue(&settings.secondary_queue()));
    }
    names
}

/// Wire both consumers from settings and already-opened backends.
pub fn build_consumers(
    settings: &Settings,
    storage: &Arc<Storage>,
    object_store: Arc<dyn ObjectStore>,
    gateway: Arc<dyn IndexingGateway>,
) -> Result<(IngestConsumer, ProvisionConsumer)> {
    let primary = open_queue(storage, &settings.primary_queue())?;
    let secondary = open_queue(storage, &settings.secondary_queue())?;
    let jobs: Arc<dyn JobStore> = storage.clone();
    let policy = RetryPolicy::from_settings(&settings.consumer);
    let lease = settings.consumer.lease();

    let cleaner = ContainerCleaner::new(object_store, &settings.cleanup)
        .context("Invalid cleanup.default_ignore patterns")?;

    let mut ingest = IngestConsumer::new(primary, secondary.clone(), jobs.clone(), Arc::new(cleaner))
        .with_policy(policy)
        .with_lease(lease);
    let mut provision = ProvisionConsumer::new(secondary, jobs, gateway)
        .with_policy(policy)
        .with_lease(lease)
        .with_mark_failed_on_discard(settings.consumer.mark_failed_on_discard);

    if settings.queues.dead_letter {
        ingest = ingest.with_dead_letter(open_queue(
            storage,
            &Settings::dead_letter_queue(&settings.primary_queue()),
        )?);
        provision = provision.with_dead_letter(open_queue(
            storage,
            &Settings::dead_letter_queue(&settings.secondary_queue()),
        )?);
    }
    Ok((ingest, provision))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Start the pipeline daemon.
///
/// 1. Open RocksDB storage, the object store and the search client
/// 2. Spawn one polling worker per consumer
/// 3. On SIGINT/SIGTERM, cancel both and wait for in-flight ticks
pub async fn start_daemon(settings: Settings) -> Result<()> {
    info!("Index pipeline starting...");
    info!("Configuration:");
    info!("  Database path: {}", settings.db_path);
    info!("  Environment: {}", settings.environment);
    info!("  Primary queue: {}", settings.primary_queue());
    info!("  Secondary queue: {}", settings.secondary_queue());
    info!("  Search endpoint: {}", settings.search.endpoint);

    let storage = open_storage(&settings)?;
    let object_store = open_object_store(&settings.storage.connection_string)
        .context("Failed to open object store")?;
    let client_config =
        SearchClientConfig::from_settings(&settings.search).context("Invalid search settings")?;
    let gateway: Arc<dyn IndexingGateway> =
        Arc::new(SearchServiceClient::new(client_config).context("Failed to build search client")?);

    let (ingest, provision) = build_consumers(&settings, &storage, object_store, gateway)?;

    let registry = Arc::new(WorkerRegistry::new());
    let cancel = CancellationToken::new();
    let interval = settings.consumer.poll_interval();
    let handles = vec![
        PollingWorker::new(Arc::new(ingest), interval, registry.clone()).spawn(cancel.clone()),
        PollingWorker::new(Arc::new(provision), interval, registry.clone())
            .spawn(cancel.clone()),
    ];

    shutdown_signal().await;
    cancel.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Worker task ended abnormally: {}", e);
        }
    }

    for status in registry.get_all_status() {
        info!("{}", status.summary());
    }
    storage.flush().context("Failed to flush storage")?;
    info!("Index pipeline stopped");
    Ok(())
}

/// Upload every file under `dir` into `container`, keyed by relative path.
async fn upload_dir(store: &dyn ObjectStore, container: &str, dir: &Path) -> Result<usize> {
    let mut uploaded = 0;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {:?}", dir))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .with_context(|| format!("{:?} is outside {:?}", entry.path(), dir))?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let bytes = tokio::fs::read(entry.path())
            .await
            .with_context(|| format!("Failed to read {:?}", entry.path()))?;
        store.put_object(container, &key, bytes).await?;
        uploaded += 1;
    }
    Ok(uploaded)
}

/// Producer side of an upload: container, files, job record, queue message.
pub async fn submit_upload(
    store: &dyn ObjectStore,
    jobs: &dyn JobStore,
    primary: &dyn MessageQueue,
    container_prefix: &str,
    project: &str,
    dir: &Path,
    definitions: JobDefinitions,
) -> Result<Job> {
    let uid = ulid::Ulid::new().to_string().to_lowercase();
    let container = container_name(container_prefix, project, &uid)?;

    store.create_container(&container).await?;
    let uploaded = upload_dir(store, &container, dir).await?;

    let job = jobs
        .create(NewJob::new(index_name(project, &uid), &container).with_definitions(definitions))
        .await?;
    let reference = JobReference::new(job.id).with_blob_name(&container);
    let message_id = primary.send(&encode(&reference)?).await?;

    info!(
        job_id = job.id,
        container = %container,
        files = uploaded,
        message_id = %message_id,
        "Upload queued"
    );
    Ok(job)
}

/// Handle `submit`.
pub async fn handle_submit(
    settings: &Settings,
    project: &str,
    dir: &Path,
    definitions_path: Option<&Path>,
) -> Result<()> {
    let definitions = match definitions_path {
        Some(path) => {
            let bytes =
                fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("Invalid definitions file {:?}", path))?
        }
        None => JobDefinitions::default(),
    };

    let storage = open_storage(settings)?;
    let store = open_object_store(&settings.storage.connection_string)
        .context("Failed to open object store")?;
    let primary = open_queue(&storage, &settings.primary_queue())?;

    let job = submit_upload(
        store.as_ref(),
        storage.as_ref(),
        primary.as_ref(),
        &settings.storage.container_prefix,
        project,
        dir,
        definitions,
    )
    .await?;
    storage.flush()?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

/// Build the folder tree of a job's container and cache it on the job.
pub async fn cache_structure(
    store: &dyn ObjectStore,
    jobs: &dyn JobStore,
    id: JobId,
) -> Result<Job> {
    let job = jobs
        .find_by_id(id)
        .await?
        .with_context(|| format!("Job {} not found", id))?;
    let keys: Vec<String> = store
        .list_objects(&job.container_ref)
        .await?
        .try_collect()
        .await?;
    let tree = build_tree(&job.container_ref, &keys);
    info!(job_id = id, files = tree.file_count(), "Structure cached");
    Ok(jobs.update(id, JobUpdate::structure(tree)).await?)
}

/// Handle `job` subcommands.
pub async fn handle_job(settings: &Settings, command: JobCommands) -> Result<()> {
    match command {
        JobCommands::Show { id } => {
            let storage = open_storage_read_only(settings)?;
            let job = storage
                .find_by_id(id)
                .await?
                .with_context(|| format!("Job {} not found", id))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        JobCommands::List => {
            let storage = open_storage_read_only(settings)?;
            let jobs = storage.list().await?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        JobCommands::Enqueue { id } => {
            let storage = open_storage(settings)?;
            let job = storage
                .find_by_id(id)
                .await?
                .with_context(|| format!("Job {} not found", id))?;
            let primary = open_queue(&storage, &settings.primary_queue())?;
            let reference = JobReference::new(job.id).with_blob_name(&job.container_ref);
            let message_id = primary.send(&encode(&reference)?).await?;
            storage.flush()?;
            println!("Queued job {} as message {}", job.id, message_id);
        }
        JobCommands::Structure { id } => {
            let storage = open_storage(settings)?;
            let store = open_object_store(&settings.storage.connection_string)
                .context("Failed to open object store")?;
            let job = cache_structure(store.as_ref(), storage.as_ref(), id).await?;
            storage.flush()?;
            println!("{}", serde_json::to_string_pretty(&job.structure)?);
        }
    }
    Ok(())
}

/// Handle `queue` subcommands.
pub async fn handle_queue(settings: &Settings, command: QueueCommands) -> Result<()> {
    let storage = open_storage_read_only(settings)?;
    match command {
        QueueCommands::Stats => {
            for name in queue_names(settings) {
                let queue = open_queue(&storage, &name)?;
                println!("{:<40} {}", name, queue.approximate_len().await?);
            }
            let stats = storage.get_stats()?;
            println!();
            println!("Jobs:            {}", stats.job_count);
            println!("Queued messages: {}", stats.queued_message_count);
            println!("Disk usage:      {} bytes", stats.disk_usage_bytes);
        }
    }
    Ok(())
}
