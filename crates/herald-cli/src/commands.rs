use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use herald_core::app::{Pipeline, PipelineBuilder, PipelineContext};
use herald_core::config::PipelineConfig;
use herald_core::domain::{Activity, ActorKind, OutboxItemId, Visibility};
use herald_core::impls::StaticActorDirectory;
use herald_core::impls::http::{HttpTransport, HttpTransportConfig};
use herald_core::impls::sqlite::SqliteDatabase;
use herald_core::ports::SystemClock;
use tracing::info;

pub async fn open(database: &Path, directory: &Path, config: PipelineConfig) -> Result<Pipeline> {
    let db = SqliteDatabase::open(database)
        .await
        .with_context(|| format!("failed to open database {}", database.display()))?;
    let directory = StaticActorDirectory::from_json_file(directory)
        .with_context(|| format!("failed to load actor directory {}", directory.display()))?;
    let transport = HttpTransport::new(HttpTransportConfig {
        timeout: config.delivery_timeout(),
        max_response_bytes: config.max_response_bytes,
        ..HttpTransportConfig::default()
    })?;

    let ctx = PipelineContext::sqlite(
        &db,
        Arc::new(directory),
        Arc::new(transport),
        Arc::new(SystemClock),
    );
    Ok(PipelineBuilder::new(ctx, config).build()?)
}

pub async fn run(pipeline: &Pipeline) -> Result<()> {
    let group = pipeline.spawn();
    info!(workers = pipeline.config.workers, "pipeline running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown requested, waiting for in-flight steps");
    group.shutdown_and_join().await;
    Ok(())
}

pub async fn enqueue(
    pipeline: &Pipeline,
    file: &Path,
    actor: ActorKind,
    visibility: Visibility,
) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;
    let activity = Activity::from_value(value)
        .with_context(|| format!("{} is not a JSON object", file.display()))?;

    let id = pipeline.outbox.enqueue(&activity, actor, visibility).await?;
    println!("{id}");
    Ok(())
}

pub async fn undo(pipeline: &Pipeline, id: OutboxItemId) -> Result<()> {
    let inverse = pipeline.outbox.undo(id).await?;
    println!("{inverse}");
    Ok(())
}

pub async fn reschedule(pipeline: &Pipeline, id: OutboxItemId) -> Result<()> {
    let task_id = pipeline.outbox.reschedule(id).await?;
    info!(item_id = %id, task_id = %task_id, "rescheduled");
    Ok(())
}

pub async fn status(pipeline: &Pipeline) -> Result<()> {
    let counts = pipeline.status().await?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}

pub async fn purge(pipeline: &Pipeline) -> Result<()> {
    let retention = pipeline.config.retention();
    let task_id = pipeline
        .outbox
        .schedule_purge(retention, pipeline.config.purge_batch_size)
        .await?;
    info!(task_id = %task_id, retention_days = pipeline.config.retention_days, "purge scheduled");
    Ok(())
}
