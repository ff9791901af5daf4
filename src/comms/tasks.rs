use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::security::CredentialOverride;
use crate::simulator::{self, Progress};
use crate::transport::ApiClient;

/// How long a finished task stays queryable.
pub const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(3600);
/// Finished tasks kept at most; the oldest go first.
pub const DEFAULT_MAX_FINISHED_TASKS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Running,
    Completed,
    Failed,
}

/// Snapshot of a background task as reported by `GET /tasks/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub id: Uuid,
    pub state: TaskState,
    pub completed: u32,
    pub failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
struct TaskEntry {
    state: TaskState,
    progress: Arc<Progress>,
    error: Option<String>,
    finished_at: Option<Instant>,
}

/// In-memory registry of background simulation runs.
///
/// Running tasks are always kept. Finished ones are pruned when a new task
/// is spawned, once they exceed the retention period or the count limit.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<Uuid, TaskEntry>>>,
    shutdown: CancellationToken,
    retention: Duration,
    max_finished: usize,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            retention: DEFAULT_TASK_RETENTION,
            max_finished: DEFAULT_MAX_FINISHED_TASKS,
        }
    }

    pub fn with_retention(mut self, retention: Duration, max_finished: usize) -> Self {
        self.retention = retention;
        self.max_finished = max_finished;
        self
    }

    fn prune(&self, tasks: &mut HashMap<Uuid, TaskEntry>) {
        let before = tasks.len();
        tasks.retain(|_, entry| {
            entry
                .finished_at
                .map_or(true, |at| at.elapsed() < self.retention)
        });

        let mut finished: Vec<(Uuid, Instant)> = tasks
            .iter()
            .filter_map(|(id, entry)| entry.finished_at.map(|at| (*id, at)))
            .collect();
        if finished.len() > self.max_finished {
            finished.sort_by_key(|(_, at)| *at);
            let excess = finished.len() - self.max_finished;
            for (id, _) in finished.into_iter().take(excess) {
                tasks.remove(&id);
            }
        }

        let pruned = before - tasks.len();
        if pruned > 0 {
            debug!(pruned, "finished tasks pruned");
        }
    }

    /// Start a dashboard simulation in the background and return its id.
    pub async fn spawn_dashboard(
        &self,
        api: ApiClient,
        override_credential: Option<CredentialOverride>,
        iterations: u32,
    ) -> (Uuid, JoinHandle<()>) {
        let id = Uuid::new_v4();
        let progress = Arc::new(Progress::default());
        {
            let mut tasks = self.tasks.write().await;
            self.prune(&mut tasks);
            tasks.insert(
                id,
                TaskEntry {
                    state: TaskState::Running,
                    progress: progress.clone(),
                    error: None,
                    finished_at: None,
                },
            );
        }

        let tasks = self.tasks.clone();
        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(async move {
            let outcome = simulator::run_dashboard(
                &api,
                override_credential.as_ref(),
                iterations,
                &progress,
                Some(&cancel),
            )
            .await;

            let mut tasks = tasks.write().await;
            if let Some(entry) = tasks.get_mut(&id) {
                entry.finished_at = Some(Instant::now());
                match outcome {
                    Ok(_) => entry.state = TaskState::Completed,
                    Err(e) => {
                        error!(task_id = %id, error = %e, "dashboard task failed");
                        entry.state = TaskState::Failed;
                        entry.error = Some(e.to_string());
                    }
                }
            }
        });

        info!(task_id = %id, iterations, "dashboard task spawned");
        (id, handle)
    }

    pub async fn status(&self, id: &Uuid) -> Option<TaskStatus> {
        let tasks = self.tasks.read().await;
        tasks.get(id).map(|entry| TaskStatus {
            id: *id,
            state: entry.state,
            completed: entry.progress.completed(),
            failed: entry.progress.failed(),
            error: entry.error.clone(),
        })
    }

    /// Ask every running task to stop after its current iteration.
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
