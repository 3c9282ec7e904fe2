use clap::Parser;
use portpilot::adapters::{format_summary, GameRestClient, WebhookNotifier};
use portpilot::cli::{Cli, Commands};
use portpilot::config::{AppConfig, LoggingConfig};
use portpilot::dispatch::DispatchEngine;
use portpilot::error::{PilotError, Result};
use portpilot::operator::OperatorRegistry;
use portpilot::services::{
    BroadcastObserver, DispatchEvent, DispatchScheduler, FanoutObserver, SchedulerHandle, TracingObserver,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)?;
    init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        return Err(PilotError::Validation(errors.join("; ")));
    }

    match &cli.command {
        Commands::CheckConfig => {
            println!(
                "Configuration OK: {} operator(s), chunk size {}, scheduler {}",
                config.operators.len(),
                config.dispatch.chunk_size,
                if config.scheduler.enabled {
                    format!("every {}s", config.scheduler.interval_secs)
                } else {
                    "disabled".to_string()
                }
            );
            Ok(())
        }
        Commands::Depart {
            dry_run,
            operator,
            json,
            ..
        } => {
            if *dry_run {
                config.dispatch.dry_run = true;
            }
            let operators = match operator {
                Some(op) => vec![op.clone()],
                None => config.operators.clone(),
            };
            if operators.is_empty() {
                return Err(PilotError::Validation(
                    "no operator given and none configured".to_string(),
                ));
            }

            let (engine, _) = build_engine(&config)?;
            let registry = OperatorRegistry::new();
            let filter = cli.command.vessel_filter();

            for operator_id in operators {
                let handle = registry.get_or_create(&operator_id);
                let summary = engine.dispatch(&handle, filter.as_ref()).await;
                if *json {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                } else {
                    println!("{}\n", format_summary(&summary));
                }
            }
            Ok(())
        }
        Commands::Run { events } => run_scheduler(config, *events).await,
    }
}

fn build_engine(config: &AppConfig) -> Result<(DispatchEngine, Arc<BroadcastObserver>)> {
    let api = Arc::new(GameRestClient::new(&config.api)?);
    let events = Arc::new(BroadcastObserver::from_config(&config.notify));

    let mut observer = FanoutObserver::new()
        .with(Arc::new(TracingObserver))
        .with(events.clone());
    if let Some(webhook) = WebhookNotifier::from_config(config.notify.webhook_url.as_deref()) {
        observer = observer.with(webhook);
    }

    if config.dispatch.dry_run {
        warn!("Dry run enabled, no departures will be sent");
    }

    let engine = DispatchEngine::new(api, config.dispatch.clone()).with_observer(Arc::new(observer));
    Ok((engine, events))
}

async fn run_scheduler(config: AppConfig, stream_events: bool) -> Result<()> {
    if config.operators.is_empty() {
        return Err(PilotError::Validation(
            "operators must list at least one operator id".to_string(),
        ));
    }

    let (engine, events) = build_engine(&config)?;
    let engine = Arc::new(engine);
    if stream_events {
        tokio::spawn(print_events(events.subscribe()));
    }

    let registry = Arc::new(OperatorRegistry::new());
    for operator_id in &config.operators {
        registry.get_or_create(operator_id);
    }

    let (scheduler, handle) = DispatchScheduler::new(
        engine,
        registry,
        config.operators.clone(),
        config.scheduler.clone(),
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));
    tokio::spawn(dispatch_now_signal(handle, config.operators.clone()));

    info!("portpilot running, press Ctrl+C to stop");
    shutdown_signal().await;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(());
    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }

    info!("portpilot stopped");
    Ok(())
}

/// JSON lines on stdout, one per dispatch event
async fn print_events(mut rx: broadcast::Receiver<DispatchEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Could not serialize dispatch event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event stream lagged, dropped {} event(s)", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// SIGUSR1 queues an immediate pass for every configured operator
#[cfg(unix)]
async fn dispatch_now_signal(handle: SchedulerHandle, operators: Vec<String>) {
    let mut stream = match signal::unix::signal(signal::unix::SignalKind::user_defined1()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to install SIGUSR1 handler: {}", e);
            return;
        }
    };

    while stream.recv().await.is_some() {
        info!("SIGUSR1 received, dispatching now");
        for operator_id in &operators {
            if let Err(e) = handle.trigger_detached(operator_id) {
                warn!("Dispatch trigger for {} dropped: {}", operator_id, e);
            }
        }
    }
}

#[cfg(not(unix))]
async fn dispatch_now_signal(_handle: SchedulerHandle, _operators: Vec<String>) {}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},portpilot={}", config.level, config.level)));

    let file_layer = config.dir.as_deref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "Warning: Could not create log directory {} ({}), file logging disabled",
                dir, e
            );
            return None;
        }
        let file_appender = tracing_appender::rolling::daily(dir, "portpilot.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Keep the guard alive for the life of the process
        Box::leak(Box::new(guard));

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let (json_layer, text_layer) = if config.json {
        (Some(tracing_subscriber::fmt::layer().json().with_target(true)), None)
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
