//! Document stores behind the dispatcher.
//!
//! Every operation is atomic per document. The lease operation
//! ([`TaskStore::claim_pending`]) is a single find-and-modify: under any number
//! of concurrent callers each pending task is handed out at most once.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use vmci_core::{CoreError, Task, TaskId, TaskShellRecord, TaskState, WorkerId, WorkerRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task already exists: {0}")]
    DuplicateTask(TaskId),

    #[error(transparent)]
    Conflict(#[from] CoreError),

    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task.
    async fn insert(&self, task: Task) -> Result<(), StoreError>;

    async fn get(&self, id: &TaskId) -> Result<Option<Task>, StoreError>;

    /// All tasks, newest first.
    async fn list(&self) -> Result<Vec<Task>, StoreError>;

    async fn count_by_state(&self) -> Result<HashMap<TaskState, u64>, StoreError>;

    /// Lease the oldest pending task to `worker_id`.
    ///
    /// The returned task is already `Running` with `worker_id` and
    /// `dispatched_at` set. `None` means nothing is pending.
    async fn claim_pending(&self, worker_id: &WorkerId) -> Result<Option<Task>, StoreError>;

    /// Set `started_at` on a leased task.
    async fn mark_started(&self, id: &TaskId) -> Result<Task, StoreError>;

    /// Record the exit code; the task becomes `Succeeded` iff it is zero.
    async fn mark_finished(&self, id: &TaskId, exit_code: i32) -> Result<Task, StoreError>;
}

#[async_trait]
pub trait TaskShellStore: Send + Sync {
    /// Create or replace the output record `(task_id, index)`.
    async fn upsert(&self, record: TaskShellRecord) -> Result<(), StoreError>;

    /// Records of one task ordered by index.
    async fn list(&self, task_id: &TaskId) -> Result<Vec<TaskShellRecord>, StoreError>;
}

#[async_trait]
pub trait WorkerStore: Send + Sync {
    /// Create the worker or refresh its `last_keep_alive`.
    async fn keep_alive(&self, worker_id: &WorkerId) -> Result<WorkerRecord, StoreError>;

    async fn list(&self) -> Result<Vec<WorkerRecord>, StoreError>;
}

struct StoredTask {
    /// Insertion order, used to break `created_at` ties.
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct TaskTable {
    next_seq: u64,
    tasks: HashMap<TaskId, StoredTask>,
}

/// In-process implementation of all three stores.
///
/// Construct one and hand it to [`crate::AppState`]; there is no global
/// instance.
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<TaskTable>,
    shells: RwLock<HashMap<TaskId, BTreeMap<u32, String>>>,
    workers: RwLock<HashMap<WorkerId, WorkerRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: &TaskId, f: F) -> Result<Task, StoreError>
    where
        F: FnOnce(&mut Task) -> Result<(), CoreError> + Send,
    {
        let mut table = self.tasks.write().await;
        let stored = table
            .tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        f(&mut stored.task)?;
        Ok(stored.task.clone())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert(&self, task: Task) -> Result<(), StoreError> {
        let mut table = self.tasks.write().await;
        if table.tasks.contains_key(&task.id) {
            return Err(StoreError::DuplicateTask(task.id));
        }
        let seq = table.next_seq;
        table.next_seq += 1;
        table.tasks.insert(task.id.clone(), StoredTask { seq, task });
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        let table = self.tasks.read().await;
        Ok(table.tasks.get(id).map(|stored| stored.task.clone()))
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        let table = self.tasks.read().await;
        let mut stored: Vec<&StoredTask> = table.tasks.values().collect();
        stored.sort_by(|a, b| {
            b.task
                .created_at
                .cmp(&a.task.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(stored.into_iter().map(|s| s.task.clone()).collect())
    }

    async fn count_by_state(&self) -> Result<HashMap<TaskState, u64>, StoreError> {
        let table = self.tasks.read().await;
        let mut counts: HashMap<TaskState, u64> =
            TaskState::ALL.iter().map(|state| (*state, 0)).collect();
        for stored in table.tasks.values() {
            *counts.entry(stored.task.state).or_default() += 1;
        }
        Ok(counts)
    }

    async fn claim_pending(&self, worker_id: &WorkerId) -> Result<Option<Task>, StoreError> {
        // Find and modify under one write lock.
        let mut table = self.tasks.write().await;
        let Some(stored) = table
            .tasks
            .values_mut()
            .filter(|stored| stored.task.state == TaskState::Pending)
            .min_by(|a, b| {
                a.task
                    .created_at
                    .cmp(&b.task.created_at)
                    .then(a.seq.cmp(&b.seq))
            })
        else {
            return Ok(None);
        };

        stored.task.claim(worker_id.clone())?;
        Ok(Some(stored.task.clone()))
    }

    async fn mark_started(&self, id: &TaskId) -> Result<Task, StoreError> {
        self.update(id, |task| task.start()).await
    }

    async fn mark_finished(&self, id: &TaskId, exit_code: i32) -> Result<Task, StoreError> {
        self.update(id, |task| task.finish(exit_code)).await
    }
}

#[async_trait]
impl TaskShellStore for MemoryStore {
    async fn upsert(&self, record: TaskShellRecord) -> Result<(), StoreError> {
        let mut shells = self.shells.write().await;
        shells
            .entry(record.task_id)
            .or_default()
            .insert(record.index, record.output);
        Ok(())
    }

    async fn list(&self, task_id: &TaskId) -> Result<Vec<TaskShellRecord>, StoreError> {
        let shells = self.shells.read().await;
        Ok(shells
            .get(task_id)
            .map(|records| {
                records
                    .iter()
                    .map(|(index, output)| TaskShellRecord::new(task_id.clone(), *index, output.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl WorkerStore for MemoryStore {
    async fn keep_alive(&self, worker_id: &WorkerId) -> Result<WorkerRecord, StoreError> {
        let mut workers = self.workers.write().await;
        let record = workers
            .entry(worker_id.clone())
            .and_modify(|record| record.touch())
            .or_insert_with(|| WorkerRecord::new(worker_id.clone()));
        Ok(record.clone())
    }

    async fn list(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        let workers = self.workers.read().await;
        let mut records: Vec<WorkerRecord> = workers.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use vmci_core::TaskConfiguration;

    fn task_at(offset_secs: i64) -> Task {
        Task::new(TaskConfiguration::new("ubuntu")).with_created_at(Utc::now() + Duration::seconds(offset_secs))
    }

    #[tokio::test]
    async fn test_claim_oldest_first() {
        let store = MemoryStore::new();
        let newer = task_at(10);
        let older = task_at(-10);
        store.insert(newer.clone()).await.unwrap();
        store.insert(older.clone()).await.unwrap();

        let worker = WorkerId::new("w1");
        let first = store.claim_pending(&worker).await.unwrap().unwrap();
        assert_eq!(first.id, older.id);
        assert_eq!(first.state, TaskState::Running);
        assert_eq!(first.worker_id, Some(worker.clone()));
        assert!(first.dispatched_at.is_some());

        let second = store.claim_pending(&worker).await.unwrap().unwrap();
        assert_eq!(second.id, newer.id);

        assert!(store.claim_pending(&worker).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_ties_use_insertion_order() {
        let store = MemoryStore::new();
        let created_at = Utc::now();
        let a = Task::new(TaskConfiguration::new("m")).with_created_at(created_at);
        let b = Task::new(TaskConfiguration::new("m")).with_created_at(created_at);
        store.insert(a.clone()).await.unwrap();
        store.insert(b.clone()).await.unwrap();

        let worker = WorkerId::new("w");
        assert_eq!(store.claim_pending(&worker).await.unwrap().unwrap().id, a.id);
        assert_eq!(store.claim_pending(&worker).await.unwrap().unwrap().id, b.id);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryStore::new();
        let task = task_at(0);
        store.insert(task.clone()).await.unwrap();
        assert!(matches!(store.insert(task).await, Err(StoreError::DuplicateTask(_))));
    }

    #[tokio::test]
    async fn test_start_and_finish() {
        let store = MemoryStore::new();
        let task = task_at(0);
        store.insert(task.clone()).await.unwrap();

        // Not leased yet.
        assert!(matches!(
            store.mark_started(&task.id).await,
            Err(StoreError::Conflict(_))
        ));

        store.claim_pending(&WorkerId::new("w")).await.unwrap();
        let started = store.mark_started(&task.id).await.unwrap();
        assert!(started.started_at.is_some());

        let finished = store.mark_finished(&task.id, 2).await.unwrap();
        assert_eq!(finished.state, TaskState::Failed);
        assert_eq!(finished.exit_code, Some(2));
        assert!(finished.finished_at.is_some());

        let missing = TaskId::new("missing");
        assert!(matches!(
            store.mark_finished(&missing, 0).await,
            Err(StoreError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_count_by_state_includes_all_states() {
        let store = MemoryStore::new();
        store.insert(task_at(0)).await.unwrap();
        store.insert(task_at(1)).await.unwrap();
        store.claim_pending(&WorkerId::new("w")).await.unwrap();

        let counts = store.count_by_state().await.unwrap();
        assert_eq!(counts[&TaskState::Pending], 1);
        assert_eq!(counts[&TaskState::Running], 1);
        assert_eq!(counts[&TaskState::Succeeded], 0);
        assert_eq!(counts[&TaskState::Failed], 0);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = MemoryStore::new();
        let old = task_at(-5);
        let new = task_at(5);
        store.insert(old.clone()).await.unwrap();
        store.insert(new.clone()).await.unwrap();

        let ids: Vec<TaskId> = TaskStore::list(&store).await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![new.id, old.id]);
    }

    #[tokio::test]
    async fn test_shell_records_replace_and_order() {
        let store = MemoryStore::new();
        let task_id = TaskId::new("t");

        store.upsert(TaskShellRecord::new(task_id.clone(), 2, "b")).await.unwrap();
        store.upsert(TaskShellRecord::new(task_id.clone(), 1, "a")).await.unwrap();
        store.upsert(TaskShellRecord::new(task_id.clone(), 1, "a2")).await.unwrap();

        let records = TaskShellStore::list(&store, &task_id).await.unwrap();
        assert_eq!(
            records,
            vec![
                TaskShellRecord::new(task_id.clone(), 1, "a2"),
                TaskShellRecord::new(task_id.clone(), 2, "b"),
            ]
        );
        assert!(TaskShellStore::list(&store, &TaskId::new("other")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keep_alive_upserts() {
        let store = MemoryStore::new();
        let worker = WorkerId::new("w1");

        let first = store.keep_alive(&worker).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.keep_alive(&worker).await.unwrap();

        assert!(second.last_keep_alive >= first.last_keep_alive);
        assert_eq!(WorkerStore::list(&store).await.unwrap().len(), 1);
    }
}
