//! Task bookkeeping.
//!
//! Long-running work (asset loads, mostly) is tracked as tasks so callers
//! can show a busy indicator. A task is started with a description and an
//! optional node ID, and ends finished or failed; the per-node counts let a
//! caller ask whether a particular subtree is still waiting on something.

use rustc_hash::FxHashMap;
use slotmap::{Key, SlotMap, new_key_type};

new_key_type! {
    pub struct TaskId;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub description: String,
    pub node_id: Option<String>,
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Finished,
    Failed(String),
}

#[derive(Debug, Default)]
pub struct Status {
    tasks: SlotMap<TaskId, Task>,
    per_node: FxHashMap<String, usize>,
    finished: u64,
    failed: u64,
}

impl Status {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_started(
        &mut self,
        description: impl Into<String>,
        node_id: Option<&str>,
    ) -> TaskId {
        let task = Task {
            description: description.into(),
            node_id: node_id.map(str::to_string),
        };
        if let Some(id) = &task.node_id {
            *self.per_node.entry(id.clone()).or_default() += 1;
        }
        log::debug!("Task started: {}", task.description);
        self.tasks.insert(task)
    }

    pub fn task_finished(&mut self, id: TaskId) -> Option<Task> {
        self.end(id, TaskOutcome::Finished)
    }

    pub fn task_failed(&mut self, id: TaskId, reason: impl Into<String>) -> Option<Task> {
        self.end(id, TaskOutcome::Failed(reason.into()))
    }

    fn end(&mut self, id: TaskId, outcome: TaskOutcome) -> Option<Task> {
        let task = self.tasks.remove(id)?;
        if let Some(node) = &task.node_id
            && let Some(count) = self.per_node.get_mut(node)
        {
            *count -= 1;
            if *count == 0 {
                self.per_node.remove(node);
            }
        }
        match outcome {
            TaskOutcome::Finished => {
                self.finished += 1;
                log::debug!("Task finished: {}", task.description);
            }
            TaskOutcome::Failed(reason) => {
                self.failed += 1;
                log::warn!("Task failed: {}: {reason}", task.description);
            }
        }
        Some(task)
    }

    /// Number of unfinished tasks.
    #[must_use]
    pub fn busy(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn node_busy(&self, node_id: &str) -> usize {
        self.per_node.get(node_id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn finished(&self) -> u64 {
        self.finished
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed
    }

    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }
}

impl TaskId {
    /// Stable number for event payloads.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.data().as_ffi()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_node_counts_follow_task_lifetimes() {
        let mut status = Status::new();
        let a = status.task_started("load brick.png", Some("wall"));
        let b = status.task_started("load teapot.json", Some("wall"));
        assert_eq!(status.node_busy("wall"), 2);

        status.task_finished(a);
        assert_eq!(status.node_busy("wall"), 1);
        status.task_failed(b, "404");
        assert_eq!(status.node_busy("wall"), 0);
        assert_eq!(status.busy(), 0);
        assert_eq!((status.finished(), status.failed()), (1, 1));

        assert!(status.task_finished(a).is_none());
    }
}
