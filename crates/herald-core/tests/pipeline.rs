//! End-to-end scenarios: enqueue, fan-out, supersession, retries and locks
//! driven through the worker with a fixed clock.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use serde_json::json;

use common::*;
use herald_core::app::{LockManager, PipelineContext, SendToFollowers};
use herald_core::config::PipelineConfig;
use herald_core::domain::{
    ActivityType, ActorKind, OutboxStatus, PUBLIC_AUDIENCE, PipelineError, PipelineEvent, Visibility,
};
use herald_core::impls::RecordingEventSink;
use herald_core::impls::sqlite::SqliteDatabase;
use herald_core::ports::{Clock, FixedClock};
use herald_core::typed::Trigger;

const SECOND: Duration = Duration::from_secs(1);
const HOUR: Duration = Duration::from_secs(60 * 60);

fn config(batch_size: usize) -> PipelineConfig {
    PipelineConfig {
        batch_size,
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn followers_are_reached_in_resumable_batches() {
    let h = Harness::new(directory(250), config(100));
    let id = h
        .pipeline
        .outbox
        .enqueue(
            &note("Create", "https://local.example/a/1", "https://local.example/p/1", &[PUBLIC_AUDIENCE]),
            ActorKind::User,
            Visibility::Public,
        )
        .await
        .unwrap();

    // process-outbox and the first follower batch
    assert_eq!(h.drain().await, 2);
    assert_eq!(h.transport.sent().len(), 100);
    assert_eq!(h.item(id).await.offset, Some(100));
    assert_eq!(h.item(id).await.status, OutboxStatus::Pending);

    // the continuation waits 30 seconds
    assert_eq!(h.drain().await, 0);
    h.clock.advance(30 * SECOND);
    assert_eq!(h.drain().await, 1);
    assert_eq!(h.item(id).await.offset, Some(200));

    h.clock.advance(30 * SECOND);
    assert_eq!(h.drain().await, 1);

    let item = h.item(id).await;
    assert_eq!(item.status, OutboxStatus::Published);
    assert_eq!(item.offset, None);

    let sent: BTreeSet<String> = h.transport.sent().into_iter().collect();
    assert_eq!(h.transport.sent().len(), 250);
    assert_eq!(sent.len(), 250);

    let offsets: Vec<usize> = h
        .events
        .named("batch_completed")
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::BatchCompleted { next_offset, .. } => Some(next_offset),
            _ => None,
        })
        .collect();
    assert_eq!(offsets, vec![100, 200]);
    assert_eq!(h.events.named("processing_completed").len(), 1);
    assert_eq!(h.ctx().scheduler.count().await.unwrap(), 0);
}

#[tokio::test]
async fn newer_update_supersedes_a_pending_one() {
    let h = Harness::new(directory(2), config(100));
    let object = "https://local.example/p/1";
    let first = h
        .pipeline
        .outbox
        .enqueue(
            &note("Update", "https://local.example/a/1", object, &[PUBLIC_AUDIENCE]),
            ActorKind::User,
            Visibility::Public,
        )
        .await
        .unwrap();
    let second = h
        .pipeline
        .outbox
        .enqueue(
            &note("Update", "https://local.example/a/2", object, &[PUBLIC_AUDIENCE]),
            ActorKind::User,
            Visibility::Public,
        )
        .await
        .unwrap();

    let old = h.item(first).await;
    assert_eq!(old.status, OutboxStatus::Published);
    assert!(old.invalidated_at.is_some());

    h.drain().await;
    assert_eq!(h.transport.sent().len(), 2);
    assert_eq!(h.item(second).await.status, OutboxStatus::Published);
    assert!(
        h.events
            .events()
            .iter()
            .filter(|e| e.name() == "delivery_attempted")
            .all(|e| e.item_id() == Some(second))
    );
}

#[tokio::test]
async fn undo_before_delivery_cancels_the_create() {
    let h = Harness::new(directory(1), config(100));
    let object = "https://local.example/p/1";
    let create = h
        .pipeline
        .outbox
        .enqueue(
            &note("Create", "https://local.example/a/1", object, &[PUBLIC_AUDIENCE]),
            ActorKind::User,
            Visibility::Public,
        )
        .await
        .unwrap();

    let delete = h.pipeline.outbox.undo(create).await.unwrap();

    assert!(h.item(create).await.is_invalidated());
    let item = h.item(delete).await;
    assert_eq!(item.activity_type, ActivityType::Delete);
    assert_eq!(item.object_reference, object);
    assert_eq!(h.scheduled("process-outbox").await.len(), 1);
}

#[tokio::test]
async fn unavailable_inbox_is_retried_after_one_then_four_hours() {
    let h = Harness::new(directory(1), config(100));
    let inbox = follower_inbox(0);
    h.transport.fail(&inbox, 503);
    let id = h
        .pipeline
        .outbox
        .enqueue(
            &note("Create", "https://local.example/a/1", "https://local.example/p/1", &[PUBLIC_AUDIENCE]),
            ActorKind::User,
            Visibility::Public,
        )
        .await
        .unwrap();

    h.drain().await;
    assert_eq!(h.transport.sent_to(&inbox), 1);
    assert_eq!(h.item(id).await.status, OutboxStatus::Published);

    let retries = h.scheduled("retry-activity").await;
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].run_at, start() + chrono::Duration::hours(1));

    h.clock.advance(HOUR);
    assert_eq!(h.drain().await, 1);
    assert_eq!(h.transport.sent_to(&inbox), 2);

    let retries = h.scheduled("retry-activity").await;
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].run_at, start() + chrono::Duration::hours(5));

    h.clock.advance(4 * HOUR);
    assert_eq!(h.drain().await, 1);
    assert_eq!(h.transport.sent_to(&inbox), 3);

    assert!(h.scheduled("retry-activity").await.is_empty());
    assert_eq!(h.events.named("retry_dropped").len(), 1);
    assert_eq!(h.ctx().retries.count().await.unwrap(), 0);
}

#[tokio::test]
async fn rejected_inbox_is_not_retried() {
    let h = Harness::new(directory(1), config(100));
    h.transport.fail(&follower_inbox(0), 410);
    h.pipeline
        .outbox
        .enqueue(
            &note("Create", "https://local.example/a/1", "https://local.example/p/1", &[PUBLIC_AUDIENCE]),
            ActorKind::User,
            Visibility::Public,
        )
        .await
        .unwrap();

    h.drain().await;
    assert!(h.scheduled("retry-activity").await.is_empty());
    assert_eq!(h.ctx().retries.count().await.unwrap(), 0);
}

#[tokio::test]
async fn delete_reaches_every_known_remote_inbox() {
    let h = Harness::new(directory(1), config(100));
    let id = h
        .pipeline
        .outbox
        .enqueue(
            &note("Delete", "https://local.example/a/9", "https://local.example/p/1", &[PUBLIC_AUDIENCE]),
            ActorKind::User,
            Visibility::Public,
        )
        .await
        .unwrap();

    h.drain().await;

    let sent: BTreeSet<String> = h.transport.sent().into_iter().collect();
    let expected: BTreeSet<String> = [
        "https://m.example/u/max/inbox".to_string(),
        "https://r.example/u/rae/inbox".to_string(),
    ]
    .into();
    assert_eq!(sent, expected);
    assert_eq!(h.item(id).await.status, OutboxStatus::Published);
}

#[tokio::test]
async fn held_lock_pushes_the_batch_back_a_minute() {
    let h = Harness::new(directory(3), config(100));
    let key = LockManager::key_for(SendToFollowers::NAME);
    h.ctx()
        .locks
        .try_acquire(&key, "other-worker", h.clock.now(), Duration::from_secs(30 * 60))
        .await
        .unwrap();

    let id = h
        .pipeline
        .outbox
        .enqueue(
            &note("Create", "https://local.example/a/1", "https://local.example/p/1", &[PUBLIC_AUDIENCE]),
            ActorKind::User,
            Visibility::Public,
        )
        .await
        .unwrap();

    assert_eq!(h.drain().await, 2);
    assert!(h.transport.sent().is_empty());
    let batches = h.scheduled(SendToFollowers::NAME).await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].run_at, start() + chrono::Duration::seconds(60));
    assert_eq!(batches[0].envelope.args()["offset"], json!(0));

    assert!(h.ctx().locks.release(&key, "other-worker").await.unwrap());
    h.clock.advance(60 * SECOND);
    assert_eq!(h.drain().await, 1);
    assert_eq!(h.transport.sent().len(), 3);
    assert_eq!(h.item(id).await.status, OutboxStatus::Published);
}

#[tokio::test]
async fn stale_lock_is_taken_over() {
    let h = Harness::new(directory(3), config(100));
    let key = LockManager::key_for(SendToFollowers::NAME);
    h.ctx()
        .locks
        .try_acquire(&key, "other-worker", h.clock.now(), Duration::from_secs(30 * 60))
        .await
        .unwrap();
    h.clock.advance(Duration::from_secs(31 * 60));

    h.pipeline
        .outbox
        .enqueue(
            &note("Create", "https://local.example/a/1", "https://local.example/p/1", &[PUBLIC_AUDIENCE]),
            ActorKind::User,
            Visibility::Public,
        )
        .await
        .unwrap();

    h.drain().await;
    assert_eq!(h.transport.sent().len(), 3);
    assert!(h.ctx().locks.get(&key).await.unwrap().is_none());
}

#[rstest]
#[case::private(Visibility::Private)]
#[case::local_only(Visibility::LocalOnly)]
#[tokio::test]
async fn restricted_items_never_reach_followers(#[case] visibility: Visibility) {
    let h = Harness::new(directory(5), config(100));
    let id = h
        .pipeline
        .outbox
        .enqueue(
            &note(
                "Create",
                "https://local.example/a/1",
                "https://local.example/p/1",
                &[ADMIN_FOLLOWERS, "https://m.example/u/max"],
            ),
            ActorKind::User,
            visibility,
        )
        .await
        .unwrap();

    h.drain().await;

    // the mentioned actor still gets it
    assert_eq!(h.transport.sent(), vec!["https://m.example/u/max/inbox".to_string()]);
    assert!(h.scheduled(SendToFollowers::NAME).await.is_empty());
    assert_eq!(h.item(id).await.status, OutboxStatus::Published);
}

#[tokio::test]
async fn item_of_removed_actor_is_published_without_delivery() {
    let clock = FixedClock::new(start());
    let transport = Arc::new(ScriptedTransport::default());
    let events = Arc::new(RecordingEventSink::new());
    let directory = Arc::new(directory(5));
    let ctx = PipelineContext {
        events: events.clone(),
        ..PipelineContext::in_memory(directory.clone(), transport.clone(), Arc::new(clock.clone()))
    };
    let h = Harness::with_context(ctx, config(100), clock, transport, events);
    let id = h
        .pipeline
        .outbox
        .enqueue(
            &note("Create", "https://local.example/a/1", "https://local.example/p/1", &[PUBLIC_AUDIENCE]),
            ActorKind::User,
            Visibility::Public,
        )
        .await
        .unwrap();
    directory.remove_actor(ActorKind::User);

    h.drain().await;

    assert!(h.transport.sent().is_empty());
    assert!(h.events.named("delivery_attempted").is_empty());
    assert_eq!(h.item(id).await.status, OutboxStatus::Published);
}

#[tokio::test]
async fn item_of_unknown_actor_is_rejected_at_enqueue() {
    let h = Harness::new(directory(5), config(100));
    let err = h
        .pipeline
        .outbox
        .enqueue(
            &note("Create", "https://local.example/a/1", "https://local.example/p/1", &[PUBLIC_AUDIENCE]),
            ActorKind::Blog,
            Visibility::Public,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Resolution(_)));
    let status = h.pipeline.status().await.unwrap();
    assert_eq!(status.pending, 0);
    assert!(h.scheduled("process-outbox").await.is_empty());
    assert_eq!(h.events.named("enqueue_failed").len(), 1);
}

#[tokio::test]
async fn reschedule_delivers_a_published_item_again() {
    let h = Harness::new(directory(2), config(100));
    let id = h
        .pipeline
        .outbox
        .enqueue(
            &note("Create", "https://local.example/a/1", "https://local.example/p/1", &[PUBLIC_AUDIENCE]),
            ActorKind::User,
            Visibility::Public,
        )
        .await
        .unwrap();
    h.drain().await;
    h.transport.clear();

    h.pipeline.outbox.reschedule(id).await.unwrap();
    assert_eq!(h.item(id).await.status, OutboxStatus::Pending);
    h.drain().await;

    assert_eq!(h.transport.sent().len(), 2);
    assert_eq!(h.item(id).await.status, OutboxStatus::Published);
}

#[tokio::test]
async fn status_counts_reflect_the_stores() {
    let h = Harness::new(directory(1), config(100));
    h.pipeline
        .outbox
        .enqueue(
            &note("Create", "https://local.example/a/1", "https://local.example/p/1", &[PUBLIC_AUDIENCE]),
            ActorKind::User,
            Visibility::Public,
        )
        .await
        .unwrap();

    let before = h.pipeline.status().await.unwrap();
    assert_eq!(before.pending, 1);
    assert_eq!(before.scheduled_tasks, 1);

    h.drain().await;
    let after = h.pipeline.status().await.unwrap();
    assert_eq!(after.pending, 0);
    assert_eq!(after.published, 1);
    assert_eq!(after.scheduled_tasks, 0);
}

#[tokio::test]
async fn purge_removes_old_published_items() {
    let h = Harness::new(directory(0), config(100));
    let id = h
        .pipeline
        .outbox
        .enqueue(
            &note("Create", "https://local.example/a/1", "https://local.example/p/1", &[PUBLIC_AUDIENCE]),
            ActorKind::User,
            Visibility::Public,
        )
        .await
        .unwrap();
    h.drain().await;
    assert_eq!(h.item(id).await.status, OutboxStatus::Published);

    h.clock.advance(Duration::from_secs(31 * 24 * 60 * 60));
    h.pipeline
        .outbox
        .schedule_purge(h.pipeline.config.retention(), 500)
        .await
        .unwrap();
    h.drain().await;

    assert!(h.ctx().outbox.get(id).await.unwrap().is_none());
}

#[tokio::test]
async fn pending_work_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("herald.db");
    let clock = FixedClock::new(start());

    let id = {
        let db = SqliteDatabase::open(&path).await.unwrap();
        let transport = Arc::new(ScriptedTransport::default());
        let ctx = PipelineContext::sqlite(
            &db,
            Arc::new(directory(2)),
            transport.clone(),
            Arc::new(clock.clone()),
        );
        let h = Harness::with_context(
            ctx,
            config(100),
            clock.clone(),
            transport,
            Arc::new(RecordingEventSink::new()),
        );
        h.pipeline
            .outbox
            .enqueue(
                &note("Create", "https://local.example/a/1", "https://local.example/p/1", &[PUBLIC_AUDIENCE]),
                ActorKind::User,
                Visibility::Public,
            )
            .await
            .unwrap()
    };

    let db = SqliteDatabase::open(&path).await.unwrap();
    let transport = Arc::new(ScriptedTransport::default());
    let ctx = PipelineContext::sqlite(
        &db,
        Arc::new(directory(2)),
        transport.clone(),
        Arc::new(clock.clone()),
    );
    let h = Harness::with_context(
        ctx,
        config(100),
        clock,
        transport,
        Arc::new(RecordingEventSink::new()),
    );

    assert_eq!(h.item(id).await.status, OutboxStatus::Pending);
    assert_eq!(h.scheduled("process-outbox").await.len(), 1);

    h.drain().await;
    assert_eq!(h.transport.sent().len(), 2);
    assert_eq!(h.item(id).await.status, OutboxStatus::Published);
}
