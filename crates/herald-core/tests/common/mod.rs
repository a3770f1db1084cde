//! Shared harness for the end-to-end pipeline tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};

use herald_core::app::{Pipeline, PipelineBuilder, PipelineContext, Worker};
use herald_core::config::PipelineConfig;
use herald_core::domain::{
    Activity, ActorKind, DeliveryResponse, OutboxItem, OutboxItemId, ScheduledTask, TransportError,
};
use herald_core::impls::{RecordingEventSink, StaticActorDirectory};
use herald_core::ports::{DeliveryRequest, DeliveryTransport, FixedClock, LocalActor};

pub const LOCAL: &str = "https://local.example";
pub const ADMIN: &str = "https://local.example/u/admin";
pub const ADMIN_FOLLOWERS: &str = "https://local.example/u/admin/followers";

/// Answers 202 unless a status is scripted for the inbox.
#[derive(Default)]
pub struct ScriptedTransport {
    statuses: Mutex<HashMap<String, u16>>,
    sent: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn fail(&self, inbox: &str, status: u16) {
        self.statuses
            .lock()
            .unwrap()
            .insert(inbox.to_string(), status);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, inbox: &str) -> usize {
        self.sent().iter().filter(|i| i.as_str() == inbox).count()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl DeliveryTransport for ScriptedTransport {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryResponse, TransportError> {
        let inbox = request.inbox.as_str().to_string();
        self.sent.lock().unwrap().push(inbox.clone());
        match self.statuses.lock().unwrap().get(&inbox) {
            Some(status) => Ok(DeliveryResponse::new(*status)),
            None => Ok(DeliveryResponse::new(202)),
        }
    }
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn follower_inbox(n: usize) -> String {
    format!("https://f{n}.example/inbox")
}

pub fn admin() -> LocalActor {
    LocalActor {
        kind: ActorKind::User,
        id: ADMIN.into(),
        followers: Some(ADMIN_FOLLOWERS.into()),
    }
}

/// A directory with the admin user, `followers` follower inboxes and two
/// remote actors that do not follow anyone.
pub fn directory(followers: usize) -> StaticActorDirectory {
    StaticActorDirectory::new(LOCAL)
        .with_actor(admin())
        .with_followers(ActorKind::User, (0..followers).map(follower_inbox))
        .with_remote_actor("https://m.example/u/max", "https://m.example/u/max/inbox")
        .with_remote_actor("https://r.example/u/rae", "https://r.example/u/rae/inbox")
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub worker: Worker,
    pub clock: FixedClock,
    pub transport: Arc<ScriptedTransport>,
    pub events: Arc<RecordingEventSink>,
}

impl Harness {
    pub fn new(directory: StaticActorDirectory, config: PipelineConfig) -> Self {
        let clock = FixedClock::new(start());
        let transport = Arc::new(ScriptedTransport::default());
        let events = Arc::new(RecordingEventSink::new());
        let ctx = PipelineContext {
            events: events.clone(),
            ..PipelineContext::in_memory(
                Arc::new(directory),
                transport.clone(),
                Arc::new(clock.clone()),
            )
        };
        Self::with_context(ctx, config, clock, transport, events)
    }

    pub fn with_context(
        ctx: PipelineContext,
        config: PipelineConfig,
        clock: FixedClock,
        transport: Arc<ScriptedTransport>,
        events: Arc<RecordingEventSink>,
    ) -> Self {
        let pipeline = PipelineBuilder::new(ctx, config).build().unwrap();
        Self {
            worker: pipeline.worker(),
            pipeline,
            clock,
            transport,
            events,
        }
    }

    pub fn ctx(&self) -> &PipelineContext {
        &self.pipeline.ctx
    }

    pub async fn item(&self, id: OutboxItemId) -> OutboxItem {
        self.ctx().outbox.get(id).await.unwrap().unwrap()
    }

    pub async fn scheduled(&self, trigger: &str) -> Vec<ScheduledTask> {
        self.ctx()
            .scheduler
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.envelope.trigger().as_str() == trigger)
            .collect()
    }

    pub async fn drain(&self) -> usize {
        self.worker.drain().await.unwrap()
    }
}

pub fn activity(value: Value) -> Activity {
    Activity::from_value(value).unwrap()
}

pub fn note(kind: &str, id: &str, object: &str, to: &[&str]) -> Activity {
    activity(json!({
        "id": id,
        "type": kind,
        "actor": ADMIN,
        "to": to,
        "object": {"id": object, "type": "Note"},
    }))
}
