//! Top-level flows: list tasks, ad hoc download, run tasks until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use automate_core::config::Settings;
use automate_core::fetch::UserAgentOverrides;
use automate_core::{
    CompletionRouter, Database, DedupEngine, DownloadEvent, DownloadRegistry, DownloadTask, Fetch,
    FileConfig, HttpFetcher, Identifier, LocalDownloadManager, ManagerHandle, ScheduledTask,
    Scheduler, check_task_names, load_config, select_tasks, stop_channel,
};
use clap::CommandFactory;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::{config_runtime, exit_handler, terminal};
use crate::cli::Args;

/// Shared components wired once per process.
struct Services {
    fetch: Arc<dyn Fetch>,
    registry: Arc<DownloadRegistry>,
    engine: DedupEngine,
    events: mpsc::UnboundedReceiver<DownloadEvent>,
    db: Database,
}

pub(crate) async fn run(args: Args) -> Result<ProcessExit> {
    if !args.has_action() {
        Args::command().print_help()?;
        println!();
        return Ok(ProcessExit::Success);
    }

    let loaded = load_config(args.config.as_deref())?;
    let log = config_runtime::resolve_log_setting(&args, loaded.config.settings.verbosity);
    terminal::init_tracing(log, terminal::is_no_color_requested(&args));
    debug!(path = ?loaded.path, from_file = loaded.loaded_from_file, "Configuration loaded");
    let config = loaded.config;

    if args.list_tasks {
        print_task_list(&config);
        return Ok(ProcessExit::Success);
    }
    if let Some(url) = &args.download {
        return run_download(&config, url, &args).await;
    }
    run_tasks(&config, &args.tasks).await
}

fn print_task_list(config: &FileConfig) {
    if config.sources.is_empty() && config.cleanups.is_empty() {
        println!("No tasks configured");
        return;
    }
    let poll = config.settings.poll_interval();
    for source in &config.sources {
        println!(
            "{}\t{}\t{}s",
            source.name,
            source.kind.as_str(),
            source.interval(poll).as_secs()
        );
    }
    for cleanup in &config.cleanups {
        println!(
            "{}\tcleanup\t{}s",
            cleanup.name,
            cleanup.interval_secs.unwrap_or(poll.as_secs())
        );
    }
}

async fn build_services(settings: &Settings, user_agents: UserAgentOverrides) -> Result<Services> {
    let poll_fetch = HttpFetcher::new(settings.poll_fetch_settings(user_agents.clone()))
        .context("Failed to build HTTP client")?;
    let download_fetch = HttpFetcher::new(settings.download_fetch_settings(user_agents))
        .context("Failed to build download HTTP client")?;

    let db_path = config_runtime::resolve_db_path(settings)?;
    let db = Database::new(&db_path)
        .await
        .with_context(|| format!("Failed to open download history '{}'", db_path.display()))?;
    debug!(path = %db_path.display(), "Download history opened");

    let output_dir = settings.output_dir();
    let (manager, events) = LocalDownloadManager::new(db.clone(), download_fetch, output_dir);
    let (handle, _worker) = ManagerHandle::spawn(manager);

    let fetch: Arc<dyn Fetch> = Arc::new(poll_fetch);
    let registry = Arc::new(
        DownloadRegistry::new(handle, fetch.clone()).with_refresh_interval(settings.cache_refresh()),
    );
    let engine = DedupEngine::new(registry.clone(), fetch.clone());

    Ok(Services {
        fetch,
        registry,
        engine,
        events,
        db,
    })
}

async fn run_download(config: &FileConfig, url: &str, args: &Args) -> Result<ProcessExit> {
    let mut identifier =
        Identifier::parse(url).with_context(|| format!("Invalid download URL '{url}'"))?;
    if let Some(save_as) = &args.save_as {
        identifier = identifier.with_save_as(save_as.clone());
    }
    if let Some(comment) = &args.comment {
        identifier = identifier.with_comment(comment.clone());
    }

    let mut services = build_services(&config.settings, config.user_agent_overrides()).await?;
    let sources = config.build_sources(&services.fetch)?;
    let router = CompletionRouter::new(services.registry.clone(), sources);

    let submitted = services
        .registry
        .download_url(&identifier)
        .await
        .context("Download was not accepted")?;
    info!(url = %submitted, "Download submitted");

    let exit = loop {
        let event = tokio::select! {
            event = services.events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted before the download finished");
                break ProcessExit::Failure;
            }
        };
        let Some(event) = event else {
            bail!("Download manager stopped before the transfer finished");
        };
        router.route(&event).await;
        if event.url() == submitted.as_str() {
            break exit_handler::exit_for_download(&event);
        }
    };

    services.db.close().await;
    Ok(exit)
}

async fn run_tasks(config: &FileConfig, requested: &[String]) -> Result<ProcessExit> {
    check_task_names(&config.task_names(), requested)?;

    let services = build_services(&config.settings, config.user_agent_overrides()).await?;
    let sources = config.build_sources(&services.fetch)?;

    let poll = config.settings.poll_interval();
    let mut tasks: Vec<ScheduledTask> = config
        .sources
        .iter()
        .zip(&sources)
        .map(|(source_config, source)| {
            ScheduledTask::new(
                Arc::new(DownloadTask::new(source.clone(), services.engine.clone())),
                source_config.interval(poll),
            )
        })
        .collect();
    tasks.extend(config.cleanup_tasks()?);
    let selected = select_tasks(tasks, requested)?;
    if selected.is_empty() {
        info!("No tasks configured; nothing to do");
        services.db.close().await;
        return Ok(ProcessExit::Success);
    }

    let scheduler = Scheduler::start(selected);
    let (router_stopper, router_signal) = stop_channel();
    let router = CompletionRouter::new(services.registry.clone(), sources);
    let events = services.events;
    let routing = tokio::spawn(async move { router.run(events, router_signal).await });
    info!(tasks = scheduler.len(), "Running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Interrupt received");

    scheduler.stop_all();
    let aborted = scheduler.join_all(config.settings.shutdown_grace()).await;
    if aborted > 0 {
        warn!(aborted, "Tasks aborted after the shutdown grace period");
    }
    router_stopper.stop();
    let _ = routing.await;

    services.db.close().await;
    info!("Stopped");
    Ok(ProcessExit::Success)
}
