use std::collections::HashMap;
use std::fmt::Write;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;

use uptime_core::TargetStatus;

use crate::state::AppState;

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let targets = match state.repo.list_targets().await {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "Metrics scrape could not list targets");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                e.to_string(),
            );
        }
    };
    let counters: HashMap<_, _> = state.scheduler.stats().all().into_iter().collect();
    let scheduler_state = state.scheduler.state().await.to_string();

    let mut out = String::with_capacity(4096);

    writeln!(out, "# TYPE uptime_scheduler_state stateset").unwrap();
    writeln!(out, "# HELP uptime_scheduler_state Current state of the scheduler").unwrap();
    for variant in &["idle", "running", "stopping", "stopped"] {
        writeln!(
            out,
            "uptime_scheduler_state{{state=\"{}\"}} {}",
            variant,
            if scheduler_state == *variant { 1 } else { 0 }
        )
        .unwrap();
    }

    writeln!(out, "# TYPE uptime_targets gauge").unwrap();
    writeln!(out, "# HELP uptime_targets Number of registered targets").unwrap();
    writeln!(out, "uptime_targets {}", targets.len()).unwrap();

    writeln!(out, "# TYPE uptime_pool_size gauge").unwrap();
    writeln!(out, "# HELP uptime_pool_size Maximum concurrent probes").unwrap();
    writeln!(out, "uptime_pool_size {}", state.scheduler.pool_size()).unwrap();

    writeln!(out, "# TYPE uptime_pool_queued gauge").unwrap();
    writeln!(out, "# HELP uptime_pool_queued Probes waiting for a free worker").unwrap();
    writeln!(out, "uptime_pool_queued {}", state.scheduler.queued()).unwrap();

    writeln!(out, "# TYPE uptime_pool_in_flight gauge").unwrap();
    writeln!(out, "# HELP uptime_pool_in_flight Probes currently running").unwrap();
    writeln!(out, "uptime_pool_in_flight {}", state.scheduler.in_flight()).unwrap();

    writeln!(out, "# TYPE uptime_store_write_errors counter").unwrap();
    writeln!(
        out,
        "# HELP uptime_store_write_errors Result or status writes dropped after a retry"
    )
    .unwrap();
    writeln!(
        out,
        "uptime_store_write_errors_total {}",
        state.scheduler.stats().write_errors()
    )
    .unwrap();

    writeln!(out, "# TYPE uptime_results_discarded counter").unwrap();
    writeln!(
        out,
        "# HELP uptime_results_discarded Results dropped because the target was deleted mid-probe"
    )
    .unwrap();
    writeln!(
        out,
        "uptime_results_discarded_total {}",
        state.scheduler.stats().discarded()
    )
    .unwrap();

    writeln!(out, "# TYPE uptime_target_status stateset").unwrap();
    writeln!(out, "# HELP uptime_target_status Last observed status of each target").unwrap();
    for t in &targets {
        for variant in [TargetStatus::Unknown, TargetStatus::Up, TargetStatus::Down] {
            writeln!(
                out,
                "uptime_target_status{{target_id=\"{}\",url=\"{}\",status=\"{}\"}} {}",
                t.id,
                escape(&t.url),
                variant,
                if t.current_status == variant { 1 } else { 0 }
            )
            .unwrap();
        }
    }

    writeln!(out, "# TYPE uptime_probes counter").unwrap();
    writeln!(out, "# HELP uptime_probes Completed probes by outcome").unwrap();
    for t in &targets {
        let Some(c) = counters.get(&t.id) else {
            continue;
        };
        for (outcome, count) in [
            ("success", c.successes),
            ("failure", c.failures),
            ("timeout", c.timeouts),
        ] {
            writeln!(
                out,
                "uptime_probes_total{{target_id=\"{}\",outcome=\"{}\"}} {}",
                t.id, outcome, count
            )
            .unwrap();
        }
    }

    writeln!(out, "# TYPE uptime_probe_latency_seconds gauge").unwrap();
    writeln!(
        out,
        "# HELP uptime_probe_latency_seconds Latency of the last successful probe"
    )
    .unwrap();
    for t in &targets {
        if let Some(ms) = counters.get(&t.id).and_then(|c| c.last_latency_ms) {
            writeln!(
                out,
                "uptime_probe_latency_seconds{{target_id=\"{}\"}} {}",
                t.id,
                ms / 1000.0
            )
            .unwrap();
        }
    }

    writeln!(out, "# TYPE uptime_last_check_timestamp_seconds gauge").unwrap();
    writeln!(
        out,
        "# HELP uptime_last_check_timestamp_seconds Time of the last recorded check"
    )
    .unwrap();
    for t in &targets {
        if let Some(at) = t.last_checked_at {
            writeln!(
                out,
                "uptime_last_check_timestamp_seconds{{target_id=\"{}\"}} {}",
                t.id,
                at.timestamp_millis() as f64 / 1000.0
            )
            .unwrap();
        }
    }

    writeln!(out, "# EOF").unwrap();

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        out,
    )
}

fn escape(label: &str) -> String {
    label
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
