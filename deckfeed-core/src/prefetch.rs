//! Background filling of the sparse store.
//!
//! The loop ticks every `prefetch_interval`, asks the loader for the nearest
//! gap and fills it. A failed tick is logged and the next one runs as usual.
//! The task lives as long as its [`PrefetchHandle`]: stopping or dropping the
//! handle ends it, and with `stop_when_loaded` it also ends on its own once
//! the deck is complete.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::loader::{DeckLoader, PrefetchOutcome};

/// Totals reported when the background task ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    pub ticks: usize,
    pub merged: usize,
    pub failures: usize,
    pub fully_loaded: bool,
}

pub struct PrefetchHandle {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<PrefetchReport>>,
}

impl PrefetchHandle {
    /// Spawns the loop on the current tokio runtime.
    pub fn spawn(loader: Arc<DeckLoader>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(loader, stop_rx));
        Self {
            stop_tx,
            task: Some(task),
        }
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Waits for the loop to end on its own.
    pub async fn join(mut self) -> PrefetchReport {
        match self.task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => PrefetchReport::default(),
        }
    }

    /// Stops the loop and waits for it to wind down.
    pub async fn shutdown(self) -> PrefetchReport {
        self.stop();
        self.join().await
    }
}

impl Drop for PrefetchHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(loader: Arc<DeckLoader>, mut stop_rx: watch::Receiver<bool>) -> PrefetchReport {
    let interval = loader.config().prefetch_interval;
    let stop_when_loaded = loader.config().stop_when_loaded;
    let mut report = PrefetchReport::default();

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if *stop_rx.borrow() {
            break;
        }
        report.ticks += 1;

        let outcome = tokio::select! {
            _ = stop_rx.changed() => break,
            outcome = loader.prefetch_step() => outcome,
        };
        match outcome {
            Ok(PrefetchOutcome::Filled { hole, merged }) => {
                debug!(hole, merged, tick = report.ticks, "prefetch tick");
                report.merged += merged;
            }
            Ok(PrefetchOutcome::Complete) => {
                if stop_when_loaded {
                    info!(ticks = report.ticks, "prefetch finished, deck complete");
                    break;
                }
            }
            Ok(PrefetchOutcome::Waiting) => {}
            Err(err) => {
                report.failures += 1;
                warn!(%err, tick = report.ticks, "prefetch tick failed");
            }
        }
    }

    report.fully_loaded = loader.is_fully_loaded();
    report
}
