//! Additional (non-follower) recipients of an activity.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::activity::is_public_marker;
use crate::domain::{Activity, DirectoryError, Inbox};
use crate::ports::{ActorDirectory, LocalActor};

/// Computes the inboxes an activity goes to besides the actor's followers.
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    async fn additional_inboxes(
        &self,
        activity: &Activity,
        actor: &LocalActor,
    ) -> Result<Vec<Inbox>, DirectoryError>;
}

/// Mentioned actors, authors of remote reply targets, and relays for public
/// activities.
pub struct DefaultRecipientResolver {
    directory: Arc<dyn ActorDirectory>,
    relays: Vec<Inbox>,
}

impl DefaultRecipientResolver {
    pub fn new(directory: Arc<dyn ActorDirectory>, relays: Vec<Inbox>) -> Self {
        Self { directory, relays }
    }
}

#[async_trait]
impl RecipientResolver for DefaultRecipientResolver {
    async fn additional_inboxes(
        &self,
        activity: &Activity,
        actor: &LocalActor,
    ) -> Result<Vec<Inbox>, DirectoryError> {
        let mut inboxes = Vec::new();

        for uri in activity.all_recipients() {
            if is_public_marker(&uri)
                || actor.followers.as_deref() == Some(uri.as_str())
                || self.directory.is_local(&uri)
            {
                continue;
            }
            if let Some(inbox) = self.directory.inbox_of(&uri).await? {
                inboxes.push(inbox);
            }
        }

        for target in activity.in_reply_to() {
            if self.directory.is_local(&target) {
                continue;
            }
            let Some(author) = self.directory.author_of(&target).await? else {
                continue;
            };
            if self.directory.is_local(&author) {
                continue;
            }
            if let Some(inbox) = self.directory.inbox_of(&author).await? {
                inboxes.push(inbox);
            }
        }

        if activity.is_public() {
            inboxes.extend(self.relays.iter().cloned());
        }

        Ok(dedup_inboxes(inboxes))
    }
}

/// Drops repeated inboxes, keeping first occurrences in order.
pub fn dedup_inboxes(inboxes: Vec<Inbox>) -> Vec<Inbox> {
    let mut seen = HashSet::new();
    inboxes
        .into_iter()
        .filter(|inbox| seen.insert(inbox.clone()))
        .collect()
}
