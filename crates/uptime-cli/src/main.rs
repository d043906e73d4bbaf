mod config;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use uptime_core::{
    CheckOutcome, CheckResult, HttpProber, MemoryStore, NewTarget, Repository, Scheduler,
    SchedulerConfig, TargetStatus, TargetStore,
};

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");

    if GIT_HASH.is_empty() {
        // Leak is fine, called once and lives for the program's lifetime.
        Box::leak(VERSION.to_string().into_boxed_str())
    } else {
        Box::leak(format!("{VERSION} ({GIT_HASH})").into_boxed_str())
    }
}

/// HTTP uptime monitor: periodic health checks with per-URL intervals.
#[derive(Parser)]
#[command(name = "uptime-monitor", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and the HTTP management API.
    Serve {
        /// Listen address (e.g. 0.0.0.0:8080). Overrides config file.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Check a single URL from the command line (no API server).
    Watch {
        /// URL to check.
        url: String,

        /// Seconds between checks.
        #[arg(short, long, default_value_t = 10)]
        interval: u64,

        /// Probe timeout in milliseconds.
        #[arg(short, long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { listen, config } => {
            run_serve(listen, config).await;
        }
        Commands::Watch {
            url,
            interval,
            timeout,
        } => {
            fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .init();
            run_watch(url, interval, timeout).await;
        }
    }
}

async fn run_serve(listen_override: Option<SocketAddr>, config_path: Option<PathBuf>) {
    let app_config = if let Some(ref path) = config_path {
        match config::AppConfig::load(path) {
            Ok(c) => {
                init_tracing(&c.server.log_format);
                tracing::info!(path = %path.display(), "Loaded config file");
                c
            }
            Err(e) => {
                init_tracing("pretty");
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
    } else {
        init_tracing("pretty");
        config::AppConfig::default()
    };

    let listen = listen_override.unwrap_or(app_config.server.listen);
    let scheduler_config = app_config.scheduler_config();

    let store = match app_config.store.path {
        Some(ref path) => match MemoryStore::open(path, app_config.store.history_limit).await {
            Ok(store) => {
                tracing::info!(
                    path = %path.display(),
                    targets = store.target_count().await,
                    "Opened target store"
                );
                store
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to open target store");
                std::process::exit(1);
            }
        },
        None => MemoryStore::new(app_config.store.history_limit),
    };
    let store = Arc::new(store);

    seed_targets(&store, &app_config, &scheduler_config).await;

    let prober = match HttpProber::from_config(&scheduler_config) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client");
            std::process::exit(1);
        }
    };

    // The first reconcile rebuilds every schedule entry from the store.
    let scheduler = Scheduler::new(
        scheduler_config.clone(),
        store.clone(),
        store.clone(),
        prober,
    )
    .spawn();

    let state = uptime_api::state::AppState::new(store, scheduler, scheduler_config);

    tracing::info!(%listen, "Starting uptime monitor API server");
    if let Err(e) = uptime_api::serve_with_state(listen, state, uptime_api::shutdown_signal()).await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }
    tracing::info!("Shutdown complete");
}

/// Registers configured targets whose URL is not in the store yet.
async fn seed_targets(
    store: &MemoryStore,
    app_config: &config::AppConfig,
    scheduler_config: &SchedulerConfig,
) {
    if app_config.target.is_empty() {
        return;
    }
    let existing: HashSet<String> = match store.list_targets().await {
        Ok(targets) => targets.into_iter().map(|t| t.url).collect(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list targets for seeding");
            return;
        }
    };

    for def in &app_config.target {
        if existing.contains(&def.url) {
            tracing::debug!(url = %def.url, "Seed target already registered");
            continue;
        }
        let new = match def.to_new_target(scheduler_config).validate(scheduler_config.min_interval) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(url = %def.url, error = %e, "Skipping invalid seed target");
                continue;
            }
        };
        match store.create_target(new).await {
            Ok(t) => tracing::info!(target_id = %t.id, url = %t.url, "Target registered from config"),
            Err(e) => tracing::error!(url = %def.url, error = %e, "Failed to register seed target"),
        }
    }
}

async fn run_watch(url: String, interval: u64, timeout_ms: Option<u64>) {
    let mut config = SchedulerConfig::default()
        .with_pool_size(2)
        .with_history_limit(100);
    if let Some(ms) = timeout_ms {
        config = config.with_probe_timeout(ms);
    }
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(config::default_probe_timeout);

    let new = match NewTarget::new(url.clone(), interval).validate(config.min_interval) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            std::process::exit(2);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(2);
    }

    let store = Arc::new(MemoryStore::new(config.history_limit));
    let target = match store.create_target(new).await {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            std::process::exit(1);
        }
    };
    let prober = match HttpProber::from_config(&config) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            std::process::exit(1);
        }
    };

    let multi = MultiProgress::new();
    let msg_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());

    multi
        .println(format!(
            "{} {}",
            style("uptime-monitor").bold(),
            style(version_string()).dim()
        ))
        .ok();
    multi
        .println(format!("  {} {}", style("url:     ").dim(), style(&url).bold()))
        .ok();
    multi
        .println(format!("  {} {}s", style("interval:").dim(), interval))
        .ok();
    multi
        .println(format!("  {} {}ms", style("timeout: ").dim(), timeout.as_millis()))
        .ok();
    multi.println("").ok();
    multi
        .println(format!("{}", style("Press Ctrl+C to stop").dim()))
        .ok();
    multi.println("").ok();

    let scheduler = Scheduler::new(config, store.clone(), store.clone(), prober).spawn();

    let status_bar = multi.add(ProgressBar::new_spinner().with_style(msg_style));
    status_bar.enable_steady_tick(Duration::from_millis(120));
    status_bar.set_message(format!("{}", style("Waiting for first check...").dim()));

    let mut seen = HashSet::new();
    let mut checks = 0u64;
    let mut up = 0u64;

    let shutdown = uptime_api::shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            _ = &mut shutdown => {
                status_bar.finish_and_clear();
                multi.println(format!("\n{}", style("Stopping...").dim())).ok();
                scheduler.shutdown().await;
                multi.println(format!("{}", style("Monitor stopped.").dim())).ok();
                return;
            }
        }

        let mut results = match store.list_results(Some(target.id), 20).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read results");
                continue;
            }
        };
        results.reverse();
        for r in results.iter().filter(|r| seen.insert(r.id)) {
            checks += 1;
            if r.outcome == CheckOutcome::Success {
                up += 1;
            }
            multi.println(format_result(r)).ok();
        }

        let status = store
            .get_target(target.id)
            .await
            .map(|t| t.current_status)
            .unwrap_or_default();
        let due = scheduler
            .snapshot()
            .await
            .ok()
            .and_then(|s| s.into_iter().next())
            .map(|v| format!("next in {:.1}s", v.due_in_ms as f64 / 1000.0))
            .unwrap_or_default();
        status_bar.set_message(format!(
            "{}  {}/{} up  {}",
            format_status(status),
            up,
            checks,
            style(due).dim()
        ));
    }
}

fn format_result(r: &CheckResult) -> String {
    let ts = r.observed_at.format("%H:%M:%S");
    let outcome = format!("{:<8}", r.outcome.to_string());
    let colored = match r.outcome {
        CheckOutcome::Success => style(outcome).green(),
        CheckOutcome::Failure => style(outcome).red().bold(),
        CheckOutcome::Timeout => style(outcome).yellow().bold(),
    };
    let code = r
        .status_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "---".into());
    let latency = r
        .latency_ms
        .map(|ms| format!("{:.1}ms", ms))
        .unwrap_or_default();
    format!(
        "  {}  {} {}  {}  {}",
        style(ts).dim(),
        colored,
        code,
        latency,
        style(r.detail.as_deref().unwrap_or("")).dim()
    )
}

fn format_status(status: TargetStatus) -> String {
    match status {
        TargetStatus::Up => style("UP").green().bold().to_string(),
        TargetStatus::Down => style("DOWN").red().bold().to_string(),
        TargetStatus::Unknown => style("UNKNOWN").dim().to_string(),
    }
}

fn init_tracing(log_format: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .init();
        }
    }
}
