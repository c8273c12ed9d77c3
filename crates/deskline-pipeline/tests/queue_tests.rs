// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound queue behaviour against a scripted driver.

use std::time::Duration;

use deskline_bus::DeskEvent;
use deskline_core::{
    Clock, DeliveryState, DesklineError, ErrorKind, MediaKind, MediaRef, Message, MessageId,
    SendResult,
};
use deskline_pipeline::{EnqueueRequest, Pipeline};
use deskline_storage::queries::{messages, tickets};
use deskline_test_utils::TestHarness;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

fn pipeline(h: &TestHarness) -> Pipeline {
    Pipeline::new(h.db.clone(), h.driver.clone(), h.bus.clone(), h.clock.clone(), &h.config)
}

async fn message(h: &TestHarness, id: MessageId) -> Message {
    messages::get_message(&h.db, id).await.unwrap().unwrap()
}

async fn process(p: &Pipeline, batch: u32) -> deskline_core::ProcessSummary {
    p.queue.process_pending(batch, &CancellationToken::new()).await.unwrap()
}

#[tokio::test]
async fn identical_enqueue_within_window_is_duplicate() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    let agent = h.agent(3, 5, true).await.unwrap();
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();

    let first = p
        .queue
        .enqueue(EnqueueRequest::text(ticket.id, Some(agent.id), "hello"))
        .await
        .unwrap();
    assert_eq!(first.state, DeliveryState::Pending);
    assert_eq!(first.ticket_number, ticket.ticket_number);

    h.clock.advance_secs(1);
    let second = p
        .queue
        .enqueue(EnqueueRequest::text(ticket.id, Some(agent.id), "hello"))
        .await;
    assert!(matches!(second, Err(DesklineError::Duplicate { ticket_id }) if ticket_id == ticket.id));

    let rows = messages::list_for_ticket(&h.db, ticket.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(h.driver.call_count().await, 0, "enqueue never calls the provider");
}

#[tokio::test]
async fn distinct_content_or_expired_window_creates_new_messages() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    let agent = h.agent(3, 5, true).await.unwrap();
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();

    p.queue.enqueue(EnqueueRequest::text(ticket.id, Some(agent.id), "hello")).await.unwrap();
    p.queue.enqueue(EnqueueRequest::text(ticket.id, Some(agent.id), "hello again")).await.unwrap();
    p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "hello")).await.unwrap();

    h.clock.advance_secs(301);
    p.queue.enqueue(EnqueueRequest::text(ticket.id, Some(agent.id), "hello")).await.unwrap();

    assert_eq!(messages::list_for_ticket(&h.db, ticket.id).await.unwrap().len(), 4);
    let stats = p.queue.queue_stats().await.unwrap();
    assert_eq!(stats.pending, 4);
    assert_eq!(stats.total, 4);
}

#[tokio::test]
async fn enqueue_rejects_missing_ticket_and_unroutable_customers() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);

    let missing = p
        .queue
        .enqueue(EnqueueRequest::text(deskline_core::TicketId(999), None, "hi"))
        .await;
    assert!(matches!(missing, Err(e) if e.is_not_found()));

    let short = h.customer("12345").await.unwrap();
    let ticket = h.open_ticket(&short).await.unwrap();
    let err = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "hi")).await.unwrap_err();
    assert!(err.is_invalid_recipient());

    let placeholder = h.customer("201000345678").await.unwrap();
    let ticket = h.open_ticket(&placeholder).await.unwrap();
    let err = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "hi")).await.unwrap_err();
    assert!(err.is_invalid_recipient());

    let opaque = h
        .customer_with_address("201000012345", "123456789012345@lid")
        .await
        .unwrap();
    let ticket = h.open_ticket(&opaque).await.unwrap();
    assert!(p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "hi")).await.is_ok());
}

#[tokio::test]
async fn sends_text_and_media_and_publishes_events() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    let mut rx = h.bus.subscribe();
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();

    let text = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "welcome")).await.unwrap();
    let media = p
        .queue
        .enqueue(EnqueueRequest {
            ticket_id: ticket.id,
            author_id: None,
            body: "invoice".into(),
            media: Some(MediaRef {
                url: "https://cdn.example/invoice.pdf".into(),
                mime: Some("application/pdf".into()),
            }),
        })
        .await
        .unwrap();

    let summary = process(&p, 10).await;
    assert_eq!((summary.processed, summary.sent, summary.failed), (2, 2, 0));

    let calls = h.driver.calls().await;
    assert_eq!(calls[0].address, "201001234567");
    assert_eq!(calls[0].body, "welcome");
    assert_eq!(calls[1].media_url.as_deref(), Some("https://cdn.example/invoice.pdf"));
    assert_eq!(calls[1].media_type, Some(MediaKind::Document));

    let sent = message(&h, text.message_id).await;
    assert_eq!(sent.state, DeliveryState::Sent);
    assert_eq!(sent.provider_message_id.as_deref(), Some("mock-1"));
    assert!(sent.sent_at.is_some());
    assert_eq!(message(&h, media.message_id).await.state, DeliveryState::Sent);

    let mut names = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        names.push(envelope.event.name());
    }
    assert_eq!(
        names,
        ["message_queued", "message_queued", "message_sent", "message_sent"]
    );
}

#[tokio::test]
async fn transient_failures_back_off_then_exhaust_retries() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    h.driver.fail_next(3, ErrorKind::TransientProviderError).await;
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    let queued = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "hi")).await.unwrap();

    assert_eq!(process(&p, 10).await.failed, 1);
    let after_one = message(&h, queued.message_id).await;
    assert_eq!(after_one.state, DeliveryState::Pending);
    assert_eq!(after_one.retry_count, 1);

    // Backoff of 5s has not elapsed yet.
    assert_eq!(process(&p, 10).await.processed, 0);
    h.clock.advance_secs(5);
    assert_eq!(process(&p, 10).await.failed, 1);
    assert_eq!(message(&h, queued.message_id).await.retry_count, 2);

    h.clock.advance_secs(29);
    assert_eq!(process(&p, 10).await.processed, 0);
    h.clock.advance_secs(1);
    assert_eq!(process(&p, 10).await.failed, 1);

    let failed = message(&h, queued.message_id).await;
    assert_eq!(failed.state, DeliveryState::Failed);
    assert_eq!(failed.retry_count, 3);
    assert_eq!(failed.error_kind, Some(ErrorKind::TransientProviderError));

    h.clock.advance_secs(600);
    assert_eq!(process(&p, 10).await.processed, 0, "failed rows are never picked up");
    assert_eq!(h.driver.call_count().await, 3);
}

#[tokio::test]
#[traced_test]
async fn invalid_recipient_fails_immediately_with_note() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    h.driver.fail_next(1, ErrorKind::TransientProviderError).await;
    h.driver.fail_next(1, ErrorKind::InvalidRecipient).await;
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    let queued = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "hi")).await.unwrap();

    process(&p, 10).await;
    h.clock.advance_secs(5);
    process(&p, 10).await;

    let failed = message(&h, queued.message_id).await;
    assert_eq!(failed.state, DeliveryState::Failed);
    assert_eq!(failed.retry_count, 3);
    assert_eq!(failed.error_kind, Some(ErrorKind::InvalidRecipient));
    assert!(failed.error_detail.unwrap().contains("reply to the customer manually"));
    assert!(logs_contain("message delivery failed permanently"));
    assert!(logs_contain("invalid_recipient"));
}

#[tokio::test]
async fn permanent_failure_does_not_retry() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    let mut rx = h.bus.subscribe();
    h.driver.fail_next(1, ErrorKind::PermanentProviderError).await;
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    let queued = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "hi")).await.unwrap();

    process(&p, 10).await;
    let failed = message(&h, queued.message_id).await;
    assert_eq!(failed.state, DeliveryState::Failed);
    assert_eq!(failed.retry_count, h.config.queue.max_retries);

    let _queued_event = rx.recv().await.unwrap();
    match rx.recv().await.unwrap().event {
        DeskEvent::MessageFailed { terminal, error_kind, .. } => {
            assert!(terminal);
            assert_eq!(error_kind, ErrorKind::PermanentProviderError);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn one_failure_does_not_block_the_batch() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    h.driver.fail_next(1, ErrorKind::PermanentProviderError).await;
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    for body in ["one", "two", "three"] {
        p.queue.enqueue(EnqueueRequest::text(ticket.id, None, body)).await.unwrap();
    }

    let summary = process(&p, 10).await;
    assert_eq!((summary.processed, summary.sent, summary.failed), (3, 2, 1));
}

#[tokio::test]
async fn concurrent_passes_never_double_send() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    for i in 0..6 {
        p.queue.enqueue(EnqueueRequest::text(ticket.id, None, format!("m{i}"))).await.unwrap();
    }

    let cancel = CancellationToken::new();
    let (a, b) = tokio::join!(
        p.queue.process_pending(10, &cancel),
        p.queue.process_pending(10, &cancel)
    );
    assert_eq!(a.unwrap().sent + b.unwrap().sent, 6);
    assert_eq!(h.driver.call_count().await, 6);

    assert_eq!(process(&p, 10).await.processed, 0);
    assert_eq!(p.queue.queue_stats().await.unwrap().sent, 6);
}

#[tokio::test]
async fn local_rate_limit_defers_without_counting() {
    let h = TestHarness::builder()
        .with_config(|c| c.rate_limit.max_per_window = 2)
        .build()
        .await
        .unwrap();
    let p = pipeline(&h);
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    let mut ids = Vec::new();
    for i in 0..3 {
        ids.push(
            p.queue
                .enqueue(EnqueueRequest::text(ticket.id, None, format!("m{i}")))
                .await
                .unwrap()
                .message_id,
        );
    }

    let summary = process(&p, 10).await;
    assert_eq!((summary.sent, summary.deferred), (2, 1));
    let deferred = message(&h, ids[2]).await;
    assert_eq!(deferred.state, DeliveryState::Pending);
    assert_eq!(deferred.retry_count, 0);

    assert_eq!(process(&p, 10).await.sent, 0);
    h.clock.advance_secs(60);
    assert_eq!(process(&p, 10).await.sent, 1);
    assert_eq!(h.driver.call_count().await, 3);
}

#[tokio::test]
async fn provider_rate_limit_keeps_message_pending() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    h.driver.fail_next(1, ErrorKind::RateLimited).await;
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    let queued = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "hi")).await.unwrap();

    let summary = process(&p, 10).await;
    assert_eq!(summary.deferred, 1);
    let row = message(&h, queued.message_id).await;
    assert_eq!(row.state, DeliveryState::Pending);
    assert_eq!(row.retry_count, 0);
}

#[tokio::test]
async fn stuck_provider_call_times_out_as_transient() {
    let h = TestHarness::builder()
        .with_config(|c| c.queue.send_timeout_secs = 1)
        .build()
        .await
        .unwrap();
    let p = pipeline(&h);
    h.driver.set_latency(Duration::from_secs(3)).await;
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    let queued = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "hi")).await.unwrap();

    assert_eq!(process(&p, 10).await.failed, 1);
    let row = message(&h, queued.message_id).await;
    assert_eq!(row.state, DeliveryState::Pending);
    assert_eq!(row.retry_count, 1);
    assert!(row.error_detail.unwrap().contains("timed out"));
}

#[tokio::test]
async fn cancelled_pass_sends_nothing() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "hi")).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = p.queue.process_pending(10, &cancel).await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(h.driver.call_count().await, 0);
    assert_eq!(p.queue.queue_stats().await.unwrap().pending, 1);
}

#[tokio::test]
async fn retry_failed_and_requeue() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    h.driver.fail_next(3, ErrorKind::TransientProviderError).await;
    h.driver.fail_next(1, ErrorKind::InvalidRecipient).await;
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    let exhausted = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "a")).await.unwrap();
    for step in [5, 30] {
        process(&p, 1).await;
        h.clock.advance_secs(step);
    }
    process(&p, 1).await;
    let unroutable = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "b")).await.unwrap();
    process(&p, 1).await;
    assert_eq!(p.queue.queue_stats().await.unwrap().failed, 2);

    // Nothing has retries left under the current maximum.
    assert_eq!(p.queue.retry_failed(24).await.unwrap(), 0);

    // Raising the maximum makes the exhausted message eligible again.
    let mut config = h.config.clone();
    config.queue.max_retries = 5;
    let wider = Pipeline::new(h.db.clone(), h.driver.clone(), h.bus.clone(), h.clock.clone(), &config);
    assert_eq!(wider.queue.retry_failed(24).await.unwrap(), 1);
    assert_eq!(message(&h, exhausted.message_id).await.state, DeliveryState::Pending);

    assert!(!p.queue.requeue(unroutable.message_id).await.unwrap());
    let missing = p.queue.requeue(MessageId(999)).await;
    assert!(matches!(missing, Err(e) if e.is_not_found()));
}

#[tokio::test]
async fn requeue_gives_a_fresh_set_of_attempts() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    h.driver.fail_next(1, ErrorKind::PermanentProviderError).await;
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    let queued = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "hi")).await.unwrap();
    process(&p, 10).await;

    assert!(p.queue.requeue(queued.message_id).await.unwrap());
    let row = message(&h, queued.message_id).await;
    assert_eq!(row.state, DeliveryState::Pending);
    assert_eq!(row.retry_count, 0);
    assert!(p.queue.process_message(queued.message_id).await.unwrap());
    assert!(!p.queue.process_message(queued.message_id).await.unwrap());
}

#[tokio::test]
async fn delivery_receipt_advances_sent_message() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    h.driver
        .push_results([SendResult::delivered(Some("wamid.ABC".into()))])
        .await;
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    let queued = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "hi")).await.unwrap();
    process(&p, 10).await;

    assert_eq!(p.queue.mark_delivered("wamid.ABC").await.unwrap(), Some(queued.message_id));
    assert_eq!(message(&h, queued.message_id).await.state, DeliveryState::Delivered);
    assert_eq!(p.queue.mark_delivered("wamid.ABC").await.unwrap(), None);
    assert_eq!(p.queue.mark_delivered("unknown").await.unwrap(), None);
}

#[tokio::test]
async fn abandoned_claims_are_recovered() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    let queued = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "hi")).await.unwrap();
    assert!(messages::claim(&h.db, queued.message_id, h.clock.now()).await.unwrap());

    assert_eq!(p.queue.recover_stale_sending(Duration::from_secs(300)).await.unwrap(), 0);
    h.clock.advance_secs(301);
    assert_eq!(p.queue.recover_stale_sending(Duration::from_secs(300)).await.unwrap(), 1);
    let row = message(&h, queued.message_id).await;
    assert_eq!(row.state, DeliveryState::Pending);
    assert_eq!(row.retry_count, 1);
}

#[tokio::test]
async fn claim_recovered_during_rate_limit_wait_is_not_sent_twice() {
    let h = TestHarness::builder()
        .with_config(|c| {
            c.rate_limit.max_per_window = 1;
            c.rate_limit.window_secs = 1;
            c.rate_limit.max_wait_secs = 5;
        })
        .build()
        .await
        .unwrap();
    let p = pipeline(&h);
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    let first = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "m0")).await.unwrap();
    let second = p.queue.enqueue(EnqueueRequest::text(ticket.id, None, "m1")).await.unwrap();

    // m0 takes the only slot, so the next attempt holds its claim while waiting.
    assert!(p.queue.process_message(first.message_id).await.unwrap());
    let waiting = tokio::spawn({
        let queue = p.queue.clone();
        async move { queue.process_message(second.message_id).await.unwrap() }
    });
    for _ in 0..100 {
        if message(&h, second.message_id).await.state == DeliveryState::Sending {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.clock.advance_secs(31);
    assert_eq!(p.queue.recover_stale_sending(Duration::from_secs(30)).await.unwrap(), 1);

    // The waiter gets a slot after recovery but no longer owns the row.
    assert!(!waiting.await.unwrap());
    h.clock.advance_secs(2);
    assert!(p.queue.process_message(second.message_id).await.unwrap());

    let m1_sends = h.driver.calls().await.iter().filter(|c| c.body == "m1").count();
    assert_eq!(m1_sends, 1);
    let row = message(&h, second.message_id).await;
    assert_eq!(row.state, DeliveryState::Sent);
    assert_eq!(row.provider_message_id.as_deref(), Some("mock-2"));
}

#[tokio::test]
async fn agent_reply_stamps_ticket_and_clears_delay() {
    let h = TestHarness::new().await.unwrap();
    let p = pipeline(&h);
    let agent = h.agent(1, 5, true).await.unwrap();
    let customer = h.customer("201001234567").await.unwrap();
    let ticket = h.open_ticket(&customer).await.unwrap();
    tickets::record_customer_message(&h.db, ticket.id, h.clock.now()).await.unwrap();
    h.clock.advance_secs(200);
    p.delay.sweep().await.unwrap();
    assert!(h.ticket(&ticket).await.unwrap().is_delayed);

    p.queue
        .enqueue(EnqueueRequest::text(ticket.id, Some(agent.id), "sorry for the wait"))
        .await
        .unwrap();
    let updated = h.ticket(&ticket).await.unwrap();
    assert!(!updated.is_delayed);
    assert_eq!(updated.last_agent_message_at, Some(h.clock.now()));
    assert_eq!(updated.first_response_at, Some(h.clock.now()));
    assert_eq!(updated.message_count, 2);
}
