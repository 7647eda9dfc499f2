use serde::Serialize;
use std::{any::Any, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{signal, sync::watch};

use crate::db::{
    schema::{self, MySqlCatalog, ReconcileReport},
    DbPool,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    ConnectedServing,
    DegradedServing,
    ShuttingDown,
    Terminated,
}

impl Phase {
    fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Starting, ConnectedServing | DegradedServing | ShuttingDown)
                | (ConnectedServing, DegradedServing | ShuttingDown)
                | (DegradedServing, ConnectedServing | ShuttingDown)
                | (ShuttingDown, Terminated)
        )
    }

    pub fn is_serving(self) -> bool {
        matches!(self, Phase::ConnectedServing | Phase::DegradedServing)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("illegal lifecycle transition {from:?} -> {to:?}")]
    IllegalTransition { from: Phase, to: Phase },
}

/// Shared view of the process phase.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    phase: Arc<watch::Sender<Phase>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Phase::Starting);
        Self { phase: Arc::new(tx) }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Moves to `next`. Re-entering the current phase is a no-op.
    pub fn advance(&self, next: Phase) -> Result<(), LifecycleError> {
        let mut outcome = Ok(());
        self.phase.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_advance_to(next) {
                outcome = Err(LifecycleError::IllegalTransition {
                    from: *current,
                    to: next,
                });
                return false;
            }
            let from = *current;
            tracing::info!(?from, to = ?next, "Lifecycle phase changed");
            *current = next;
            true
        });
        outcome
    }

    /// Flips between connected and degraded serving as the database comes
    /// and goes. Outside the serving phases this only reports the phase.
    pub fn record_database(&self, reachable: bool) -> Phase {
        let current = self.phase();
        if current.is_serving() {
            let next = if reachable {
                Phase::ConnectedServing
            } else {
                Phase::DegradedServing
            };
            // A concurrent shutdown wins; the illegal transition is ignored.
            let _ = self.advance(next);
        }
        self.phase()
    }
}

/// Checks connectivity and reconciles the schema, then settles into a
/// serving phase. Never fails: the listener starts either way.
pub async fn boot(db: &DbPool, lifecycle: &Lifecycle) -> Phase {
    tracing::info!("Attempting to connect to database...");
    let connected = db.connect().await.is_ok();

    if !connected {
        tracing::warn!("Starting server without a database connection");
    }

    // Attempted even when the check failed; the pool reconnects lazily.
    reconcile_schema(db).await;

    let phase = if connected {
        Phase::ConnectedServing
    } else {
        Phase::DegradedServing
    };
    if let Err(e) = lifecycle.advance(phase) {
        tracing::warn!(error = %e, "Could not enter serving phase");
    }
    lifecycle.phase()
}

/// Best-effort reconciliation of the `donations` columns. Every problem is
/// logged as a warning and startup continues.
pub async fn reconcile_schema(db: &DbPool) -> ReconcileReport {
    let catalog = MySqlCatalog::new(db.pool().clone(), db.check_timeout());
    let report = schema::ensure_schema(&catalog, &schema::DONATION_COLUMNS).await;
    log_report(&report);
    report
}

fn log_report(report: &ReconcileReport) {
    for spec in report.added() {
        tracing::info!(table = spec.table, column = spec.column, "Added column");
    }
    for (spec, error) in report.failures() {
        tracing::warn!(
            table = spec.table,
            column = spec.column,
            error = %error,
            "Schema ensure skipped"
        );
    }
    if !report.skipped.is_empty() {
        let skipped: Vec<_> = report.skipped.iter().map(|spec| spec.column).collect();
        tracing::warn!(?skipped, "Database unavailable, remaining schema checks skipped");
    }

    if report.is_complete() {
        tracing::info!("Schema check completed");
    } else {
        tracing::warn!("Schema check completed with warnings");
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::warn!("Received Ctrl+C, shutting down gracefully..."),
        _ = terminate => tracing::warn!("Received SIGTERM, shutting down gracefully..."),
    }
}

/// Drains the pool and marks the process terminated. Errors are logged only.
pub async fn shutdown(db: &DbPool, lifecycle: &Lifecycle, drain_timeout: Duration) {
    if let Err(e) = lifecycle.advance(Phase::ShuttingDown) {
        tracing::debug!(error = %e, "Shutdown requested outside a serving phase");
    }

    db.disconnect(drain_timeout).await;

    if let Err(e) = lifecycle.advance(Phase::Terminated) {
        tracing::warn!(error = %e, "Could not mark process terminated");
    }
}

/// Routes uncaught panics through `tracing`. The process keeps running.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        tracing::error!(
            panic = %panic_message(info.payload()),
            %location,
            "Uncaught panic"
        );
    }));
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
