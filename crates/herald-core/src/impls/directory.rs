//! StaticActorDirectory - JSON で定義する actor ディレクトリ
//!
//! CLI とテスト用。実運用では actor キャッシュを持つ外部サービスに差し替える。

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::delivery::origin_of;
use crate::domain::{ActorKind, DirectoryError, Inbox};
use crate::ports::{ActorDirectory, LocalActor};

/// On-disk shape of the directory file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryData {
    /// Origin (`scheme://host[:port]`) of this server.
    pub local_origin: String,

    #[serde(default)]
    pub actors: Vec<LocalActor>,

    /// Follower inboxes per local identity.
    #[serde(default)]
    pub followers: BTreeMap<ActorKind, Vec<String>>,

    /// Remote actor URI to inbox URI.
    #[serde(default)]
    pub remote_actors: BTreeMap<String, String>,

    /// Remote object URI to author actor URI.
    #[serde(default)]
    pub objects: BTreeMap<String, String>,
}

pub struct StaticActorDirectory {
    data: RwLock<DirectoryData>,
}

impl StaticActorDirectory {
    pub fn new(local_origin: impl Into<String>) -> Self {
        Self::from_data(DirectoryData {
            local_origin: local_origin.into(),
            ..DirectoryData::default()
        })
    }

    pub fn from_data(data: DirectoryData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::Unavailable(format!("{}: {e}", path.display())))?;
        let data: DirectoryData = serde_json::from_str(&raw)
            .map_err(|e| DirectoryError::Invalid(format!("{}: {e}", path.display())))?;
        Ok(Self::from_data(data))
    }

    pub fn with_actor(self, actor: LocalActor) -> Self {
        self.write().actors.push(actor);
        self
    }

    pub fn with_followers<I, S>(self, kind: ActorKind, inboxes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write()
            .followers
            .entry(kind)
            .or_default()
            .extend(inboxes.into_iter().map(Into::into));
        self
    }

    pub fn with_remote_actor(self, actor: impl Into<String>, inbox: impl Into<String>) -> Self {
        self.write().remote_actors.insert(actor.into(), inbox.into());
        self
    }

    pub fn with_object(self, object: impl Into<String>, author: impl Into<String>) -> Self {
        self.write().objects.insert(object.into(), author.into());
        self
    }

    /// Drops a local identity, as if it was deleted.
    pub fn remove_actor(&self, kind: ActorKind) {
        self.write().actors.retain(|actor| actor.kind != kind);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DirectoryData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DirectoryData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn followers_of(&self, kind: ActorKind) -> Vec<Inbox> {
        let data = self.read();
        let mut seen = BTreeSet::new();
        data.followers
            .get(&kind)
            .into_iter()
            .flatten()
            .filter(|inbox| seen.insert(inbox.as_str()))
            .map(|inbox| Inbox::new(inbox.as_str()))
            .collect()
    }

    fn all_remote(&self) -> Vec<Inbox> {
        let data = self.read();
        data.remote_actors
            .values()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|inbox| Inbox::new(inbox.as_str()))
            .collect()
    }
}

fn page(inboxes: Vec<Inbox>, offset: usize, limit: usize) -> Vec<Inbox> {
    inboxes.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl ActorDirectory for StaticActorDirectory {
    async fn resolve_local(&self, kind: ActorKind) -> Result<Option<LocalActor>, DirectoryError> {
        Ok(self
            .read()
            .actors
            .iter()
            .find(|actor| actor.kind == kind)
            .cloned())
    }

    async fn follower_inboxes(
        &self,
        actor: &LocalActor,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Inbox>, DirectoryError> {
        Ok(page(self.followers_of(actor.kind), offset, limit))
    }

    async fn follower_inbox_count(&self, actor: &LocalActor) -> Result<usize, DirectoryError> {
        Ok(self.followers_of(actor.kind).len())
    }

    async fn remote_inboxes(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Inbox>, DirectoryError> {
        Ok(page(self.all_remote(), offset, limit))
    }

    async fn remote_inbox_count(&self) -> Result<usize, DirectoryError> {
        Ok(self.all_remote().len())
    }

    async fn inbox_of(&self, actor_uri: &str) -> Result<Option<Inbox>, DirectoryError> {
        Ok(self
            .read()
            .remote_actors
            .get(actor_uri)
            .map(|inbox| Inbox::new(inbox.as_str())))
    }

    async fn author_of(&self, object_uri: &str) -> Result<Option<String>, DirectoryError> {
        Ok(self.read().objects.get(object_uri).cloned())
    }

    fn is_local(&self, uri: &str) -> bool {
        let data = self.read();
        origin_of(uri).is_some_and(|origin| origin == data.local_origin)
    }
}
