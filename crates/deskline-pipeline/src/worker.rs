// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic driver of queue progress.
//!
//! [`Worker::tick`] is the unit of work: any scheduler (this loop, cron via
//! the CLI, an HTTP trigger) may call it, concurrently or not.

use std::time::Duration;

use deskline_core::{DesklineError, ProcessSummary};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::delay::{DelayTracker, SweepReport};
use crate::queue::MessageQueue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub recovered: u64,
    pub queue: ProcessSummary,
    pub delays: SweepReport,
}

#[derive(Clone)]
pub struct Worker {
    queue: MessageQueue,
    delay: DelayTracker,
    batch_size: u32,
    interval: Duration,
    sweep_interval: Duration,
    stale_after: Duration,
}

impl Worker {
    pub fn new(
        queue: MessageQueue,
        delay: DelayTracker,
        batch_size: u32,
        interval: Duration,
        sweep_interval: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            queue,
            delay,
            batch_size,
            interval,
            sweep_interval,
            stale_after,
        }
    }

    /// Recover abandoned claims, run one queue pass, then sweep delays.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickReport, DesklineError> {
        let (recovered, queue) = self.drain_queue(cancel).await?;
        let delays = if cancel.is_cancelled() {
            SweepReport::default()
        } else {
            self.delay.sweep().await?
        };
        Ok(TickReport {
            recovered,
            queue,
            delays,
        })
    }

    async fn drain_queue(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(u64, ProcessSummary), DesklineError> {
        let recovered = self.queue.recover_stale_sending(self.stale_after).await?;
        let summary = self.queue.process_pending(self.batch_size, cancel).await?;
        Ok((recovered, summary))
    }

    /// Drain the queue every `interval` and sweep delays every
    /// `sweep_interval` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            sweep_interval_secs = self.sweep_interval.as_secs(),
            batch_size = self.batch_size,
            "worker started"
        );
        let mut queue_tick = tokio::time::interval(self.interval);
        queue_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep_tick = tokio::time::interval(self.sweep_interval);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = queue_tick.tick() => {
                    match self.drain_queue(&cancel).await {
                        Ok((recovered, summary)) => debug!(recovered, ?summary, "queue tick"),
                        Err(e) => warn!(error = %e, "queue tick failed"),
                    }
                }
                _ = sweep_tick.tick() => {
                    match self.delay.sweep().await {
                        Ok(report) => debug!(?report, "delay sweep"),
                        Err(e) => warn!(error = %e, "delay sweep failed"),
                    }
                }
            }
        }
        info!("worker stopped");
    }
}
