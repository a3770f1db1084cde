//! herald-core
//!
//! Crash-safe outbox and fan-out delivery pipeline for federated activities.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, activity, outbox, retry, task, lock, events, errors）
//! - **ports**: 抽象化レイヤー（OutboxStore, RetryStore, LockStore, TaskScheduler, DeliveryTransport, など）
//! - **app**: アプリケーションロジック（builder, outbox, dispatcher, batch, worker, sweep, gc）
//! - **typed**: 型付き Trigger API（Trigger trait, StepHandler trait, TriggerRegistry）
//! - **impls**: 実装（InMemory / SQLite store、HTTP transport、actor ディレクトリ）
//! - **config**: JSON 設定ファイルと環境変数
//! - **observability**: tracing subscriber の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;
