use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{OutboxItemId, ScheduledTask, StoreError, TaskId};
use crate::ports::TaskScheduler;

/// Heap entry; Reverse ordering so BinaryHeap acts as a min-heap.
///
/// Entries are never removed eagerly: an entry whose task is gone, or whose
/// due time no longer matches the task, is skipped when popped.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DueEntry {
    due_at: DateTime<Utc>,
    task_id: TaskId,
}

impl PartialOrd for DueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due_at
            .cmp(&self.due_at)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<TaskId, ScheduledTask>,
    due: BinaryHeap<DueEntry>,
}

impl SchedulerState {
    fn push(&mut self, task: ScheduledTask) {
        self.due.push(DueEntry {
            due_at: task.due_at(),
            task_id: task.id,
        });
        self.tasks.insert(task.id, task);
    }
}

#[derive(Default)]
pub struct InMemoryTaskScheduler {
    state: Mutex<SchedulerState>,
}

impl InMemoryTaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskScheduler for InMemoryTaskScheduler {
    async fn schedule(&self, task: ScheduledTask) -> Result<(), StoreError> {
        self.state.lock().await.push(task);
        Ok(())
    }

    async fn lease_due(
        &self,
        now: DateTime<Utc>,
        visibility_timeout: Duration,
        limit: usize,
    ) -> Result<Vec<ScheduledTask>, StoreError> {
        let visible_again =
            now + chrono::Duration::from_std(visibility_timeout).unwrap_or(chrono::Duration::MAX);
        let mut state = self.state.lock().await;
        let mut leased = Vec::new();

        while leased.len() < limit {
            let Some(entry) = state.due.peek() else {
                break;
            };
            if entry.due_at > now {
                break; // heap is sorted
            }
            let Some(entry) = state.due.pop() else {
                break;
            };
            let Some(task) = state.tasks.get_mut(&entry.task_id) else {
                continue; // acked or cancelled
            };
            if task.due_at() != entry.due_at {
                continue; // re-leased since this entry was pushed
            }
            task.leased_until = Some(visible_again);
            task.deliveries += 1;
            let task = task.clone();
            state.due.push(DueEntry {
                due_at: visible_again,
                task_id: task.id,
            });
            leased.push(task);
        }
        Ok(leased)
    }

    async fn ack(&self, id: TaskId) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.tasks.remove(&id).is_some())
    }

    async fn cancel_for_item(&self, item_id: OutboxItemId) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.tasks.len();
        state
            .tasks
            .retain(|_, task| task.envelope.item_id() != Some(item_id));
        Ok(before - state.tasks.len())
    }

    async fn has_scheduled_for(&self, item_id: OutboxItemId) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .any(|task| task.envelope.item_id() == Some(item_id)))
    }

    async fn list(&self) -> Result<Vec<ScheduledTask>, StoreError> {
        let state = self.state.lock().await;
        let mut tasks: Vec<ScheduledTask> = state.tasks.values().cloned().collect();
        tasks.sort_by_key(|task| (task.due_at(), task.id));
        Ok(tasks)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().await.tasks.len())
    }
}
