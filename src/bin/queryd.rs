//! queryd CLI: run the query server or inspect stored results.

use anyhow::Context;
use clap::{Parser, Subcommand};
use queryd::api::filter::{ListFilter, ListParams};
use queryd::api::{AppState, build_router};
use queryd::config::Config;
use queryd::db::Db;
use queryd::engine::Dispatcher;
use queryd::executor::HttpExecutor;
use queryd::model::QueryId;
use queryd::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "queryd", about = "Outbound HTTP query server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server and dispatch engine
    Serve {
        /// Override MAX_WORKERS
        #[arg(long)]
        workers: Option<usize>,
        /// Override MAX_QUEUE
        #[arg(long)]
        queue: Option<usize>,
        /// Override PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Stored query results
    Queries {
        #[command(subcommand)]
        action: QueryAction,
    },
}

#[derive(Subcommand)]
enum QueryAction {
    /// List stored results in creation order
    List {
        /// Lower bound, YYYY-MM-DDTHH:MM:SS local time
        #[arg(long)]
        from: Option<String>,
        /// Upper bound, YYYY-MM-DDTHH:MM:SS local time
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show one result
    Show {
        /// Query ID (UUID)
        id: String,
    },
    /// Delete one result
    Delete {
        /// Query ID (UUID)
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            workers,
            queue,
            port,
        } => cmd_serve(workers, queue, port).await,
        Command::Queries { action } => {
            let config = Config::load()?;
            let db = Db::connect(config.database_url.expose_secret()).await?;
            db.migrate().await?;

            match action {
                QueryAction::List {
                    from,
                    to,
                    page,
                    limit,
                } => cmd_queries_list(&db, from, to, page, limit).await,
                QueryAction::Show { id } => cmd_queries_show(&db, &id).await,
                QueryAction::Delete { id } => cmd_queries_delete(&db, &id).await,
            }
        }
    }
}

async fn cmd_serve(
    workers: Option<usize>,
    queue: Option<usize>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(workers) = workers {
        config.workers = workers;
    }
    if let Some(queue) = queue {
        config.queue_capacity = queue;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "queryd".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;

    let executor = Arc::new(HttpExecutor::new(Arc::clone(&db), config.request_timeout)?);
    let mut dispatcher = Dispatcher::new(config.dispatch()?, executor);
    dispatcher.start()?;
    let dispatcher = Arc::new(dispatcher);

    let state = Arc::new(AppState {
        submitter: dispatcher.submitter(),
        db,
        base_url: config.base_url.clone(),
        dispatcher: dispatcher.subscribe_state(),
    });
    let app = build_router(state, config.http_log);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    info!(pid = std::process::id(), port = config.port, "HTTP server started");

    // On a signal the listener stops accepting at once, while the engine
    // drains alongside the requests still waiting on their jobs.
    let (signalled_tx, signalled) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutting down");
        signalled_tx.send_replace(true);
    });

    let deadline = config.shutdown_timeout;
    let draining = {
        let mut signalled = signalled.clone();
        tokio::spawn(async move {
            let _ = signalled.wait_for(|s| *s).await;
            drain(&*dispatcher, deadline).await;
        })
    };

    let mut signalled = signalled;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = signalled.wait_for(|s| *s).await;
        })
        .await?;
    draining.await?;

    info!("server stopped");
    Ok(())
}

/// Stop the engine, giving in-flight jobs at most `deadline` to finish.
async fn drain<E: queryd::executor::Executor>(dispatcher: &Dispatcher<E>, deadline: Duration) {
    match tokio::time::timeout(deadline, dispatcher.stop()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "dispatcher stop failed"),
        Err(_) => warn!(
            deadline_secs = deadline.as_secs(),
            "in-flight jobs still running at shutdown deadline"
        ),
    }
}

/// Resolves on SIGINT, SIGTERM, or SIGQUIT.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let other = async {
        use tokio::signal::unix::{SignalKind, signal};
        match (signal(SignalKind::terminate()), signal(SignalKind::quit())) {
            (Ok(mut term), Ok(mut quit)) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = quit.recv() => {}
                }
            }
            _ => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let other = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = other => {}
    }
}

async fn cmd_queries_list(
    db: &Db,
    from: Option<String>,
    to: Option<String>,
    page: u32,
    limit: u32,
) -> anyhow::Result<()> {
    let params = ListParams {
        from,
        to,
        page: Some(page.to_string()),
        limit: Some(limit.to_string()),
    };
    let filter = ListFilter::parse(&params).map_err(|errors| {
        let msgs: Vec<_> = errors
            .iter()
            .map(|e| match e.field {
                Some(ref f) => format!("{f}: {}", e.message),
                None => e.message.clone(),
            })
            .collect();
        anyhow::anyhow!("invalid filter: {}", msgs.join("; "))
    })?;

    let rows = db.list_queries(&filter.query).await?;
    let page = filter.into_page(rows, "");

    if page.results.is_empty() {
        println!("No query results found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<6}  {:<24}  {:>10}  CREATED",
        "ID", "CODE", "STATUS", "LENGTH"
    );
    println!("{}", "-".repeat(100));

    for record in &page.results {
        println!(
            "{:<36}  {:<6}  {:<24}  {:>10}  {}",
            record.id,
            record.status_code,
            record.status,
            record.length,
            record.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\n{} result(s)", page.size);
    if let Some(next) = page.next {
        println!("more: {next}");
    }
    Ok(())
}

async fn cmd_queries_show(db: &Db, id: &str) -> anyhow::Result<()> {
    let id: QueryId = id.parse().with_context(|| format!("invalid query id '{id}'"))?;
    let record = db.get_query(id).await?;

    println!("ID:         {}", record.id);
    println!("Status:     {}", record.status);
    println!("Code:       {}", record.status_code);
    println!("Length:     {}", record.length);
    println!("Created:    {}", record.created_at);
    println!(
        "Headers:    {}",
        serde_json::to_string_pretty(&record.headers)?
    );
    Ok(())
}

async fn cmd_queries_delete(db: &Db, id: &str) -> anyhow::Result<()> {
    let id: QueryId = id.parse().with_context(|| format!("invalid query id '{id}'"))?;
    db.delete_query(id).await?;
    println!("Deleted: {id}");
    Ok(())
}
