// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot maintenance commands.
//!
//! Each command opens the configured database and driver, does one unit of
//! work, and returns a serializable result for the caller to print. They are
//! safe to run from cron while `deskline serve` is up: claims are state-gated.

use std::sync::Arc;

use deskline_bus::EventBus;
use deskline_config::DesklineConfig;
use deskline_core::{
    Clock, ConnectionStatus, DesklineError, ProcessSummary, ProviderDriver, QueueStats, SystemClock,
};
use deskline_pipeline::{Pipeline, SweepReport};
use deskline_storage::{AgentKpi, Database};
use serde::Serialize;

/// Open storage and the configured driver, and wire the pipeline.
pub async fn open_pipeline(config: &DesklineConfig) -> Result<(Pipeline, EventBus), DesklineError> {
    let driver = deskline_whatsapp::build_driver(&config.provider)?;
    open_pipeline_with(config, driver).await
}

pub async fn open_pipeline_with(
    config: &DesklineConfig,
    driver: Arc<dyn ProviderDriver>,
) -> Result<(Pipeline, EventBus), DesklineError> {
    let db = Database::open_with(&config.storage.database_path, config.storage.wal_mode).await?;
    let bus = EventBus::default();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pipeline = Pipeline::new(db, driver, bus.clone(), clock, config);
    Ok((pipeline, bus))
}

pub async fn process_queue(
    config: &DesklineConfig,
    batch_size: Option<u32>,
) -> Result<ProcessSummary, DesklineError> {
    let (pipeline, _) = open_pipeline(config).await?;
    let batch = batch_size.filter(|b| *b > 0).unwrap_or(config.queue.batch_size);
    let cancel = deskline_pipeline::install_signal_handler();
    pipeline.queue.recover_stale_sending(config.queue.stale_sending()).await?;
    pipeline.queue.process_pending(batch, &cancel).await
}

pub async fn retry_failed(config: &DesklineConfig, hours: u32) -> Result<u64, DesklineError> {
    let (pipeline, _) = open_pipeline(config).await?;
    pipeline.queue.retry_failed(hours).await
}

pub async fn queue_stats(config: &DesklineConfig) -> Result<QueueStats, DesklineError> {
    let (pipeline, _) = open_pipeline(config).await?;
    pipeline.queue.queue_stats().await
}

pub async fn sweep_delays(config: &DesklineConfig) -> Result<SweepReport, DesklineError> {
    let (pipeline, _) = open_pipeline(config).await?;
    pipeline.delay.sweep().await
}

pub async fn compute_kpis(config: &DesklineConfig, days: u32) -> Result<Vec<AgentKpi>, DesklineError> {
    let (pipeline, _) = open_pipeline(config).await?;
    pipeline.kpi.compute_range(days.max(1)).await
}

#[derive(Debug, Serialize)]
pub struct ProviderReport {
    pub provider: String,
    #[serde(flatten)]
    pub status: ConnectionStatus,
}

pub async fn provider_status(config: &DesklineConfig) -> Result<ProviderReport, DesklineError> {
    let driver = deskline_whatsapp::build_driver(&config.provider)?;
    let status = driver.connection_status().await;
    Ok(ProviderReport {
        provider: driver.name().to_string(),
        status,
    })
}
