use std::time::Duration;

use crate::context::WorkerContext;
use crate::processor::{process_study, PassOutcome};

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub studies: usize,
    pub processed: usize,
    pub idle: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct Poller {
    ctx: WorkerContext,
    batch_size: usize,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl Poller {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_error_backoff(mut self, error_backoff: Duration) -> Self {
        self.error_backoff = error_backoff;
        self
    }

    /// Query once and run one pass per returned study.
    ///
    /// A failing study is logged and skipped; only the query itself can fail
    /// the tick.
    pub async fn run_tick(&self) -> Result<TickReport, aether_atoms::studies::StoreError> {
        let ids = self.ctx.store.find_pending(self.batch_size).await?;
        let mut report = TickReport {
            studies: ids.len(),
            ..TickReport::default()
        };

        for study_id in &ids {
            match process_study(&self.ctx, study_id).await {
                Ok(PassOutcome::Processed(_)) => report.processed += 1,
                Ok(PassOutcome::NothingPending) => report.idle += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!("❌ study {} pass failed: {}", study_id, e);
                }
            }
        }

        Ok(report)
    }

    pub async fn run_forever(&self) {
        tracing::info!(
            "🚀 AI worker polling: batch_size={}, interval={:?}, backoff={:?}",
            self.batch_size,
            self.poll_interval,
            self.error_backoff
        );

        loop {
            match self.run_tick().await {
                Ok(report) => {
                    if report.studies > 0 {
                        tracing::info!(
                            "⏱️ tick: studies={}, processed={}, idle={}, errors={}",
                            report.studies,
                            report.processed,
                            report.idle,
                            report.errors
                        );
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    tracing::error!("❌ poll query failed: {}", e);
                    tokio::time::sleep(self.error_backoff).await;
                }
            }
        }
    }
}
