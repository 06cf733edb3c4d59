// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Per-query bookkeeping held by the MPP task manager.
//!
//! Every read and write happens under the task manager lock. `aborting` works as
//! a write lock on the set: once it flips, registration is refused and only the
//! abort path and task teardown touch the collections.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::mpp_task::{MppTask, MppTaskId};

/// A registered task together with the thread count reserved for it.
#[derive(Clone)]
pub(crate) struct TaskEntry {
    pub(crate) task: Arc<dyn MppTask>,
    pub(crate) needed_threads: usize,
}

impl TaskEntry {
    pub(crate) fn new(task: Arc<dyn MppTask>) -> Self {
        let needed_threads = task.needed_threads();
        Self {
            task,
            needed_threads,
        }
    }

    pub(crate) fn id(&self) -> MppTaskId {
        self.task.id()
    }
}

/// Where a removed task was found.
pub(crate) enum RemovedTask {
    Admitted(TaskEntry),
    Waiting(TaskEntry),
}

#[derive(Default)]
pub(crate) struct QueryTaskSet {
    pub(crate) aborting: bool,
    pub(crate) error_reason: String,
    tasks: HashMap<MppTaskId, TaskEntry>,
    waiting: VecDeque<TaskEntry>,
}

impl QueryTaskSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.waiting.is_empty()
    }

    pub(crate) fn has_admitted(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub(crate) fn has_waiting(&self) -> bool {
        !self.waiting.is_empty()
    }

    pub(crate) fn contains(&self, id: &MppTaskId) -> bool {
        self.tasks.contains_key(id) || self.waiting.iter().any(|e| e.id() == *id)
    }

    pub(crate) fn is_admitted(&self, id: &MppTaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// Admitted or waiting task with the given id.
    pub(crate) fn find_task(&self, id: &MppTaskId) -> Option<&Arc<dyn MppTask>> {
        self.tasks
            .get(id)
            .or_else(|| self.waiting.iter().find(|e| e.id() == *id))
            .map(|e| &e.task)
    }

    pub(crate) fn admit(&mut self, entry: TaskEntry) {
        debug_assert!(!self.contains(&entry.id()));
        self.tasks.insert(entry.id(), entry);
    }

    pub(crate) fn push_waiting(&mut self, entry: TaskEntry) {
        debug_assert!(!self.contains(&entry.id()));
        self.waiting.push_back(entry);
    }

    pub(crate) fn front_waiting_threads(&self) -> Option<usize> {
        self.waiting.front().map(|e| e.needed_threads)
    }

    /// Moves the head of the waiting queue into the admitted map.
    pub(crate) fn admit_front_waiting(&mut self) -> Option<MppTaskId> {
        let entry = self.waiting.pop_front()?;
        let id = entry.id();
        self.tasks.insert(id, entry);
        Some(id)
    }

    pub(crate) fn remove(&mut self, id: &MppTaskId) -> Option<RemovedTask> {
        if let Some(entry) = self.tasks.remove(id) {
            return Some(RemovedTask::Admitted(entry));
        }
        let pos = self.waiting.iter().position(|e| e.id() == *id)?;
        self.waiting.remove(pos).map(RemovedTask::Waiting)
    }

    pub(crate) fn admitted_tasks(&self) -> impl Iterator<Item = &Arc<dyn MppTask>> {
        self.tasks.values().map(|e| &e.task)
    }

    pub(crate) fn drain_waiting(&mut self) -> Vec<TaskEntry> {
        self.waiting.drain(..).collect()
    }

    pub(crate) fn snapshot(&self, query_id: u64) -> QueryTaskSetSnapshot {
        let mut admitted: Vec<i64> = self.tasks.keys().map(|id| id.task_id).collect();
        admitted.sort_unstable();
        QueryTaskSetSnapshot {
            query_id,
            aborting: self.aborting,
            error_reason: self.error_reason.clone(),
            admitted,
            waiting: self.waiting.iter().map(|e| e.id().task_id).collect(),
        }
    }
}

/// Read-only copy of one query's registry entry, for diagnostics.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryTaskSetSnapshot {
    pub query_id: u64,
    pub aborting: bool,
    pub error_reason: String,
    /// Admitted task ids, ascending.
    pub admitted: Vec<i64>,
    /// Waiting task ids in admission order.
    pub waiting: Vec<i64>,
}

impl QueryTaskSetSnapshot {
    pub fn task_count(&self) -> usize {
        self.admitted.len() + self.waiting.len()
    }
}
