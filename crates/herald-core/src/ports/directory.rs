//! ActorDirectory port - actor / follower / inbox の解決
//!
//! actor の解決とキャッシュはこのサブシステムの外側。ここでは問い合わせ口だけ定義する。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ActorKind, DirectoryError, Inbox};

/// A local identity that authors activities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalActor {
    pub kind: ActorKind,

    /// Actor URI.
    pub id: String,

    /// Followers collection URI, if the actor has one.
    #[serde(default)]
    pub followers: Option<String>,
}

#[async_trait]
pub trait ActorDirectory: Send + Sync {
    /// `None` when the identity no longer exists.
    async fn resolve_local(&self, kind: ActorKind) -> Result<Option<LocalActor>, DirectoryError>;

    /// A page of the actor's follower inboxes, in a stable order, deduplicated.
    async fn follower_inboxes(
        &self,
        actor: &LocalActor,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Inbox>, DirectoryError>;

    async fn follower_inbox_count(&self, actor: &LocalActor) -> Result<usize, DirectoryError>;

    /// A page of every known remote actor's inbox, in a stable order, deduplicated.
    async fn remote_inboxes(&self, offset: usize, limit: usize)
    -> Result<Vec<Inbox>, DirectoryError>;

    async fn remote_inbox_count(&self) -> Result<usize, DirectoryError>;

    /// Inbox of a remote actor.
    async fn inbox_of(&self, actor_uri: &str) -> Result<Option<Inbox>, DirectoryError>;

    /// Author (actor URI) of a remote object.
    async fn author_of(&self, object_uri: &str) -> Result<Option<String>, DirectoryError>;

    /// Whether `uri` lives on this server.
    fn is_local(&self, uri: &str) -> bool;
}
