use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Timelike, Utc};
use tokio::time::sleep;

use crate::services::portfolio;
use crate::state::AppState;

/// Background scheduler for the nightly portfolio rollup.
///
/// Ticks every 15 seconds and runs the rollup once per calendar day after the
/// configured UTC hour. The in-progress flag prevents two rollups from
/// overlapping: while one is still running the day is not marked done, so the
/// loop retries on a later tick instead of double-running.
pub async fn run_background_scheduler(state: AppState) {
    if !state.config.rollup_enabled {
        tracing::info!("Portfolio rollup disabled, scheduler not started");
        return;
    }
    if state.db_pool.is_none() {
        tracing::warn!("Scheduler: no database pool configured, exiting");
        return;
    }

    tracing::info!("Background scheduler started");

    let rollup_running = Arc::new(AtomicBool::new(false));
    let mut last_daily_run: Option<u32> = None;

    loop {
        sleep(Duration::from_secs(15)).await;

        let now_utc = Utc::now();
        let today_ordinal = now_utc.date_naive().ordinal();

        if last_daily_run == Some(today_ordinal) {
            continue;
        }
        if now_utc.hour() < state.config.rollup_hour_utc {
            continue;
        }
        if rollup_running.load(Ordering::SeqCst) {
            tracing::warn!("Scheduler: previous portfolio rollup still running, retrying later");
            continue;
        }

        last_daily_run = Some(today_ordinal);
        rollup_running.store(true, Ordering::SeqCst);

        let st = state.clone();
        let flag = rollup_running.clone();
        tokio::spawn(async move {
            run_portfolio_rollup(&st).await;
            flag.store(false, Ordering::SeqCst);
        });
    }
}

/// Compute the portfolio snapshot and emit it to the log stream. The rollup
/// is read-only; downstream dashboards consume the structured log events.
async fn run_portfolio_rollup(state: &AppState) {
    let started = tokio::time::Instant::now();

    let results = match portfolio::complex_metrics(state).await {
        Ok(results) => results,
        Err(error) => {
            tracing::error!(error = %error, "Scheduler: portfolio rollup failed");
            return;
        }
    };

    let failed = results.iter().filter(|item| item.is_failed()).count();
    let totals = portfolio::reduce_totals(&results);

    tracing::info!(
        complexes = results.len(),
        failed,
        total_properties = totals.total_properties,
        total_residents = totals.total_residents,
        total_pending_fees = %totals.total_pending_fees,
        total_income = %totals.total_income,
        total_open_tickets = totals.total_open_tickets,
        total_expenses = %totals.total_expenses,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Scheduler: nightly portfolio rollup completed"
    );

    for item in &results {
        if item.is_failed() {
            tracing::warn!(complex = %item.name(), "Scheduler: rollup skipped failed tenant");
        }
    }
}
