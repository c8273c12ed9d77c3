// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message delivery pipeline for Deskline.
//!
//! Every component is an explicit service built once from configuration and
//! passed to the surfaces that need it. [`Pipeline`] wires them together.

pub mod assign;
pub mod dedup;
pub mod delay;
pub mod inbound;
pub mod kpi;
pub mod queue;
pub mod rate_limit;
pub mod shutdown;
pub mod worker;

use std::sync::Arc;

use deskline_bus::EventBus;
use deskline_config::DesklineConfig;
use deskline_core::{Clock, ProviderDriver};
use deskline_storage::Database;

pub use assign::AgentAssigner;
pub use dedup::{DedupGuard, content_hash};
pub use delay::{DelayTracker, DelayTransition, SweepReport, delay_anchor};
pub use inbound::{IgnoreReason, InboundHandler, InboundOutcome};
pub use kpi::{KpiAggregator, overall_score};
pub use queue::{EnqueueRequest, Enqueued, MessageQueue, QueueSettings};
pub use rate_limit::RateLimiter;
pub use shutdown::install_signal_handler;
pub use worker::{TickReport, Worker};

/// All pipeline services sharing one database, driver, bus, and clock.
#[derive(Clone)]
pub struct Pipeline {
    pub queue: MessageQueue,
    pub inbound: InboundHandler,
    pub delay: DelayTracker,
    pub assigner: AgentAssigner,
    pub kpi: KpiAggregator,
    pub worker: Worker,
    pub bus: EventBus,
}

impl Pipeline {
    pub fn new(
        db: Database,
        driver: Arc<dyn ProviderDriver>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        config: &DesklineConfig,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.max_per_window,
            config.rate_limit.window(),
            clock.clone(),
        ));
        let dedup = DedupGuard::new(
            db.clone(),
            config.queue.dedup_window(),
            config.inbound.dedup_window(),
        );
        let delay = DelayTracker::new(db.clone(), bus.clone(), clock.clone(), config.delay.threshold());
        let assigner = AgentAssigner::new(db.clone(), bus.clone(), clock.clone(), delay.clone());
        let queue = MessageQueue::new(
            db.clone(),
            driver,
            limiter,
            dedup.clone(),
            delay.clone(),
            bus.clone(),
            clock.clone(),
            QueueSettings::from_config(config),
        );
        let inbound = InboundHandler::new(
            db.clone(),
            dedup,
            delay.clone(),
            assigner.clone(),
            bus.clone(),
            clock.clone(),
            config.provider.default_country_code.clone(),
            config.inbound.placeholder_prefix.clone(),
        );
        let kpi = KpiAggregator::new(db, clock);
        let worker = Worker::new(
            queue.clone(),
            delay.clone(),
            config.queue.batch_size,
            config.queue.worker_interval(),
            config.delay.sweep_interval(),
            config.queue.stale_sending(),
        );

        Self {
            queue,
            inbound,
            delay,
            assigner,
            kpi,
            worker,
            bus,
        }
    }
}
