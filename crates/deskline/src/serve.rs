// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `deskline serve` command implementation.
//!
//! Runs the queue worker, the HTTP gateway and a bus subscriber that logs
//! desk events. SIGINT/SIGTERM cancel all three; in-flight work gets a grace
//! period before it is abandoned.

use std::time::Duration;

use deskline_bus::{DeskEvent, EventBus};
use deskline_config::DesklineConfig;
use deskline_core::DesklineError;
use deskline_gateway::{GatewayState, ServerConfig};
use deskline_pipeline::shutdown::{drain, install_signal_handler};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::commands::open_pipeline;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// Runs the `deskline serve` command.
pub async fn run_serve(config: DesklineConfig) -> Result<(), DesklineError> {
    info!(desk = %config.desk.name, provider = %config.provider.driver, "starting deskline serve");

    let (pipeline, bus) = open_pipeline(&config).await?;
    let cancel = install_signal_handler();

    let event_log = tokio::spawn(log_events(bus, cancel.clone()));

    let worker = pipeline.worker.clone();
    let worker_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { worker.run(cancel).await }
    });

    let gateway_task = if config.gateway.enabled {
        let server = ServerConfig::from(&config);
        let state = GatewayState::new(pipeline.clone(), &config, cancel.clone());
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            let result = deskline_gateway::start_server(&server, state, cancel.clone()).await;
            if let Err(e) = &result {
                error!(error = %e, "gateway failed, shutting down");
                cancel.cancel();
            }
            result
        }))
    } else {
        info!("gateway disabled by configuration");
        None
    };

    cancel.cancelled().await;
    info!("shutdown requested, draining");

    let mut outcome = Ok(());
    if drain(worker_task, SHUTDOWN_GRACE).await.is_none() {
        warn!("worker did not stop within the grace period");
    }
    if let Some(task) = gateway_task {
        match drain(task, SHUTDOWN_GRACE).await {
            Some(Ok(Ok(()))) => {}
            Some(Ok(Err(e))) => outcome = Err(e),
            Some(Err(e)) => warn!(error = %e, "gateway task panicked"),
            None => warn!("gateway did not stop within the grace period"),
        }
    }
    event_log.abort();

    info!("deskline stopped");
    outcome
}

/// Log every desk event until `cancel` fires.
async fn log_events(bus: EventBus, cancel: CancellationToken) {
    let mut rx = bus.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(envelope) => log_event(&envelope.event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

fn log_event(event: &DeskEvent) {
    let ticket_id = event.ticket_id();
    match event {
        DeskEvent::MessageFailed {
            message_id,
            error_kind,
            retry_count,
            terminal: true,
            ..
        } => warn!(
            event = event.name(),
            %ticket_id,
            %message_id,
            %error_kind,
            retry_count,
            "desk event"
        ),
        DeskEvent::DelayEnded {
            agent_id,
            duration_secs,
            reason,
            ..
        } => info!(
            event = event.name(),
            %ticket_id,
            agent_id = ?agent_id,
            duration_secs,
            %reason,
            "desk event"
        ),
        _ => debug!(event = event.name(), %ticket_id, "desk event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskline_core::{ErrorKind, MessageId, TicketId};

    #[tokio::test]
    async fn event_log_stops_on_cancel() {
        let bus = EventBus::new(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(log_events(bus.clone(), cancel.clone()));

        tokio::task::yield_now().await;
        bus.publish(DeskEvent::MessageFailed {
            message_id: MessageId(1),
            ticket_id: TicketId(2),
            error_kind: ErrorKind::InvalidRecipient,
            retry_count: 3,
            terminal: true,
        });
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
