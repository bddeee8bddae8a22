//! FIFO task queue: strict submission order, a single active task, and a
//! bounded completed-task history. One mutex guards everything.

use mend_core::{Task, TaskState};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Completed-task history bound.
pub const MAX_COMPLETED_HISTORY: usize = 100;

/// A queued task with its 1-based position.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task: Task,
    pub position: usize,
}

#[derive(Debug, Default)]
struct QueueInner {
    queue: VecDeque<Task>,
    current: Option<Task>,
    completed: Vec<Task>,
}

/// Thread-safe FIFO queue shared between the runner and user-facing layers.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task; returns its 1-based queue position.
    pub fn add(&self, task: Task) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.push_back(task);
        inner.queue.len()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn peek(&self) -> Option<Task> {
        self.inner.lock().unwrap().queue.front().cloned()
    }

    pub fn dequeue(&self) -> Option<Task> {
        self.inner.lock().unwrap().queue.pop_front()
    }

    pub fn current(&self) -> Option<Task> {
        self.inner.lock().unwrap().current.clone()
    }

    pub fn set_current(&self, task: Option<Task>) {
        self.inner.lock().unwrap().current = task;
    }

    pub fn has_running_task(&self) -> bool {
        self.inner.lock().unwrap().current.is_some()
    }

    /// All queued tasks with their 1-based positions.
    pub fn list_queued(&self) -> Vec<QueuedTask> {
        self.inner
            .lock()
            .unwrap()
            .queue
            .iter()
            .enumerate()
            .map(|(i, task)| QueuedTask {
                task: task.clone(),
                position: i + 1,
            })
            .collect()
    }

    pub fn get_by_position(&self, position: usize) -> Option<Task> {
        if position == 0 {
            return None;
        }
        self.inner.lock().unwrap().queue.get(position - 1).cloned()
    }

    /// Find a task by id in the current slot or the queue.
    pub fn get_by_id(&self, task_id: &str) -> Option<Task> {
        let inner = self.inner.lock().unwrap();
        if let Some(current) = &inner.current {
            if current.id == task_id {
                return Some(current.clone());
            }
        }
        inner.queue.iter().find(|t| t.id == task_id).cloned()
    }

    /// Remove a still-queued task by position (1-based).
    pub fn remove_by_position(&self, position: usize) -> Option<Task> {
        if position == 0 {
            return None;
        }
        self.inner.lock().unwrap().queue.remove(position - 1)
    }

    /// Remove a still-queued task by id.
    pub fn remove_by_id(&self, task_id: &str) -> Option<Task> {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.queue.iter().position(|t| t.id == task_id)?;
        inner.queue.remove(index)
    }

    /// Archive a finished task into the bounded history, clearing the
    /// current slot if it matches.
    pub fn mark_completed(&self, task: Task) {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .current
            .as_ref()
            .is_some_and(|current| current.id == task.id)
        {
            inner.current = None;
        }
        inner.completed.push(task);
        if inner.completed.len() > MAX_COMPLETED_HISTORY {
            let excess = inner.completed.len() - MAX_COMPLETED_HISTORY;
            inner.completed.drain(..excess);
        }
    }

    /// Recently completed tasks, newest first.
    pub fn completed(&self, limit: usize) -> Vec<Task> {
        let inner = self.inner.lock().unwrap();
        inner.completed.iter().rev().take(limit).cloned().collect()
    }

    /// Clear the history; returns how many entries were dropped.
    pub fn clear_completed(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.completed.len();
        inner.completed.clear();
        count
    }

    /// Total tasks tracked: current plus queued.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.queue.len() + usize::from(inner.current.is_some())
    }
}

/// A removed-from-queue task marked cancelled for archival.
pub fn cancel_task(mut task: Task) -> Task {
    // Cancellation of a queued task cannot fail: QUEUED is not terminal.
    let _ = task.transition_to(TaskState::Cancelled);
    task.completed_at = Some(chrono::Utc::now());
    task
}
