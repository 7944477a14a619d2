use std::time::Duration;

use chrono::Utc;

use postbox_common::error::AppError;
use postbox_engine::{BatchReport, Worker};

/// Polls the job queue and hands due jobs to the [`Worker`].
///
/// Every tick first returns jobs whose claim went stale (a worker died
/// mid-send) to `pending`, then processes one batch. The loop only sleeps
/// when a tick found nothing to do, so a backlog drains at full speed.
pub struct JobPoller {
    worker: Worker,
    batch_size: i64,
    poll_interval: Duration,
    stale_after: chrono::Duration,
}

impl JobPoller {
    pub fn new(
        worker: Worker,
        batch_size: i64,
        poll_interval_ms: u64,
        stale_after_secs: u64,
    ) -> Self {
        Self {
            worker,
            batch_size: batch_size.max(1),
            poll_interval: Duration::from_millis(poll_interval_ms),
            stale_after: chrono::Duration::seconds(stale_after_secs.min(u32::MAX as u64) as i64),
        }
    }

    /// Start the polling loop. Runs until the task is cancelled.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            stale_after_secs = self.stale_after.num_seconds(),
            "Job poller started"
        );

        loop {
            match self.tick().await {
                Ok(report) if report.processed > 0 => {
                    tracing::info!(
                        processed = report.processed,
                        sent = report.sent,
                        suppressed = report.suppressed,
                        retried = report.retried,
                        dead = report.dead,
                        "Processed email batch"
                    );
                    // Backlog: go straight to the next batch.
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    // Database hiccup: back off and try again.
                    tracing::error!(error = %e, "Email batch failed");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One pass: recover stale claims, then run a single batch.
    pub async fn tick(&self) -> Result<BatchReport, AppError> {
        let now = Utc::now();
        self.worker
            .queue()
            .requeue_stale(self.stale_after, now)
            .await?;
        self.worker.run_batch_at(self.batch_size, now).await
    }
}
