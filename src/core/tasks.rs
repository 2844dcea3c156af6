//! Task identities, cancellation tokens and the in-memory registry.
//!
//! The registry is plain bookkeeping with no locking of its own; the
//! translation service owns it behind its coordinator lock.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Finished tasks remembered for `status` lookups.
const DEFAULT_HISTORY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Logical editing session. Debouncing and supersession are scoped to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Cooperative cancellation flag, polled by the worker at checkpoints.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed)
    }
}

/// A validated submission. Never changes after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRequest {
    pub task_id: TaskId,
    pub session: SessionId,
    pub source_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub submitted_at: Instant,
    pub debounce: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    NotFound,
    AlreadyTerminal,
    /// Was pending; now terminal without ever running.
    Cancelled,
    /// Was running; the worker will stop at its next checkpoint.
    Flagged,
}

struct TaskEntry {
    request: Arc<TranslationRequest>,
    status: TaskStatus,
    token: CancelToken,
}

pub struct TaskRegistry {
    tasks: HashMap<TaskId, TaskEntry>,
    history: VecDeque<(TaskId, TaskStatus)>,
    history_capacity: usize,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }

    pub fn with_history(history_capacity: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            history: VecDeque::new(),
            history_capacity,
        }
    }

    /// Track a new request as `Pending`.
    pub fn insert(&mut self, request: TranslationRequest) -> CancelToken {
        let token = CancelToken::new();
        self.tasks.insert(
            request.task_id.clone(),
            TaskEntry {
                request: Arc::new(request),
                status: TaskStatus::Pending,
                token: token.clone(),
            },
        );
        token
    }

    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.tasks.get(id).map(|e| e.status).or_else(|| {
            self.history
                .iter()
                .rev()
                .find(|(done, _)| done == id)
                .map(|(_, status)| *status)
        })
    }

    pub fn request(&self, id: &TaskId) -> Option<Arc<TranslationRequest>> {
        self.tasks.get(id).map(|e| e.request.clone())
    }

    pub fn token(&self, id: &TaskId) -> Option<CancelToken> {
        self.tasks.get(id).map(|e| e.token.clone())
    }

    pub fn is_pending(&self, id: &TaskId) -> bool {
        self.tasks
            .get(id)
            .is_some_and(|e| e.status == TaskStatus::Pending && !e.token.is_cancelled())
    }

    /// Pending -> Running. False if the task is gone, cancelled or already running.
    pub fn mark_running(&mut self, id: &TaskId) -> bool {
        match self.tasks.get_mut(id) {
            Some(entry) if entry.status == TaskStatus::Pending && !entry.token.is_cancelled() => {
                entry.status = TaskStatus::Running;
                true
            }
            _ => false,
        }
    }

    /// Move a live task to a terminal status and forget it.
    pub fn finish(&mut self, id: &TaskId, status: TaskStatus) -> bool {
        debug_assert!(status.is_terminal());
        if self.tasks.remove(id).is_none() {
            return false;
        }
        if self.history_capacity > 0 {
            if self.history.len() >= self.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back((id.clone(), status));
        }
        true
    }

    pub fn cancel(&mut self, id: &TaskId) -> CancelOutcome {
        let status = match self.tasks.get(id) {
            Some(entry) => {
                entry.token.cancel();
                entry.status
            }
            None if self.status(id).is_some() => return CancelOutcome::AlreadyTerminal,
            None => return CancelOutcome::NotFound,
        };
        match status {
            TaskStatus::Pending => {
                self.finish(id, TaskStatus::Cancelled);
                CancelOutcome::Cancelled
            }
            _ => CancelOutcome::Flagged,
        }
    }

    /// Cancel every pending task of `session`, except `keep`. Running
    /// tasks are left alone. Returns the cancelled ids.
    pub fn cancel_pending_in_session(&mut self, session: &SessionId, keep: Option<&TaskId>) -> Vec<TaskId> {
        let ids: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(id, e)| {
                e.status == TaskStatus::Pending && &e.request.session == session && Some(*id) != keep
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            self.cancel(id);
        }
        ids
    }

    /// Cancel everything live. Returns the ids that became terminal here;
    /// running tasks are only flagged.
    pub fn cancel_all(&mut self) -> Vec<TaskId> {
        let ids: Vec<TaskId> = self.tasks.keys().cloned().collect();
        ids.into_iter()
            .filter(|id| self.cancel(id) == CancelOutcome::Cancelled)
            .collect()
    }

    /// Live tasks, oldest submission first.
    pub fn active(&self) -> Vec<(TaskId, TaskStatus)> {
        let mut live: Vec<_> = self
            .tasks
            .iter()
            .map(|(id, e)| (e.request.submitted_at, id.clone(), e.status))
            .collect();
        live.sort_by_key(|(at, _, _)| *at);
        live.into_iter().map(|(_, id, status)| (id, status)).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
