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
//! Node-wide registry of MPP tasks.
//!
//! Responsibilities:
//! - Maps each query (keyed by start ts) to its task set and owns those sets.
//! - Registers and unregisters tasks, delegating admission to `MinTsoScheduler`.
//! - Aborts queries, propagating cancellation to admitted and waiting tasks.
//! - Serves tunnel lookups that may race with local task registration.
//!
//! Key exported interfaces:
//! - Types: `MppTaskManager`.
//! - Functions: `mpp_task_manager`.
//!
//! All state sits behind one mutex, and a single condition variable is
//! broadcast on every mutation. Blocking calls loop on that condition variable
//! and re-check their predicate after each wake-up.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use super::aborted_queries::AbortedQueryCache;
use super::min_tso_scheduler::MinTsoScheduler;
use super::mpp_error::MppTaskError;
use super::mpp_task::{AbortType, MppTask, MppTaskId};
use super::mpp_tunnel::{EstablishMppConnectionRequest, MppTunnel};
use super::query_task_set::{QueryTaskSet, QueryTaskSetSnapshot, RemovedTask, TaskEntry};
use crate::novarocks_logging::{debug, info, warn};

struct MppTaskManagerInner {
    queries: HashMap<u64, QueryTaskSet>,
    scheduler: MinTsoScheduler,
    aborted: AbortedQueryCache,
}

impl MppTaskManagerInner {
    fn aborting_error(&self, query_id: u64) -> Option<MppTaskError> {
        let reason = match self.queries.get(&query_id) {
            Some(set) if set.aborting => set.error_reason.as_str(),
            Some(_) => return None,
            None => self.aborted.reason(query_id)?,
        };
        Some(MppTaskError::QueryAborting {
            query_id,
            reason: reason.to_string(),
        })
    }

    fn schedule_waiting(&mut self) {
        let admitted = self.scheduler.schedule_waiting_queries(&mut self.queries);
        if !admitted.is_empty() {
            debug!(
                "admitted waiting tasks {:?}, estimated_thread_usage={}",
                admitted,
                self.scheduler.estimated_thread_usage()
            );
        }
    }
}

pub struct MppTaskManager {
    inner: Mutex<MppTaskManagerInner>,
    cv: Condvar,
}

impl MppTaskManager {
    pub fn new(scheduler: MinTsoScheduler) -> Self {
        Self::with_aborted_cache(scheduler, AbortedQueryCache::from_config())
    }

    pub fn with_aborted_cache(scheduler: MinTsoScheduler, aborted: AbortedQueryCache) -> Self {
        Self {
            inner: Mutex::new(MppTaskManagerInner {
                queries: HashMap::new(),
                scheduler,
                aborted,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn from_config() -> Self {
        Self::new(MinTsoScheduler::from_config())
    }

    fn lock(&self) -> MutexGuard<'_, MppTaskManagerInner> {
        self.inner.lock().expect("mpp task manager lock")
    }

    /// Registers `task` and asks the scheduler whether it may start.
    ///
    /// Returns `Ok(true)` when the task was admitted and `Ok(false)` when it was
    /// queued behind other work; the caller then waits in
    /// [`MppTaskManager::wait_until_task_scheduled`].
    pub fn register_task(&self, task: Arc<dyn MppTask>) -> Result<bool, MppTaskError> {
        let entry = TaskEntry::new(task);
        let task_id = entry.id();
        let query_id = task_id.query_id();

        let mut guard = self.lock();
        let inner = &mut *guard;
        if let Some(err) = inner.aborting_error(query_id) {
            debug!("reject task {} registration: query is aborting", task_id);
            return Err(err);
        }
        let set = inner.queries.entry(query_id).or_insert_with(QueryTaskSet::new);
        if set.contains(&task_id) {
            return Err(MppTaskError::DuplicateTask { task_id });
        }
        let admitted = match inner.scheduler.try_to_schedule(task_id, entry.needed_threads) {
            Ok(admitted) => admitted,
            Err(err) => {
                if set.is_empty() {
                    inner.queries.remove(&query_id);
                }
                return Err(err);
            }
        };
        if admitted {
            set.admit(entry);
        } else {
            set.push_waiting(entry);
        }
        inner.scheduler.refresh_query(query_id, Some(&*set));
        debug!(
            "register task {}: admitted={} estimated_thread_usage={}",
            task_id,
            admitted,
            inner.scheduler.estimated_thread_usage()
        );
        drop(guard);
        self.cv.notify_all();
        Ok(admitted)
    }

    /// Removes a finished or failed task and hands its threads to waiting tasks.
    pub fn unregister_task(&self, task_id: &MppTaskId) -> Result<(), MppTaskError> {
        let query_id = task_id.query_id();
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(set) = inner.queries.get_mut(&query_id) else {
            return Err(MppTaskError::not_found(format!(
                "can't find query {} when unregistering task {}",
                query_id, task_id
            )));
        };
        let Some(removed) = set.remove(task_id) else {
            return Err(MppTaskError::not_found(format!(
                "task {} is not registered",
                task_id
            )));
        };
        if let RemovedTask::Admitted(entry) = &removed {
            inner.scheduler.release_threads(entry.needed_threads);
        }
        let now_empty = set.is_empty();
        inner.scheduler.refresh_query(query_id, Some(&*set));
        if now_empty {
            inner.queries.remove(&query_id);
            debug!("query {} has no tasks left, removed from registry", query_id);
        }
        inner.schedule_waiting();
        debug!(
            "unregister task {}: estimated_thread_usage={}",
            task_id,
            inner.scheduler.estimated_thread_usage()
        );
        drop(guard);
        self.cv.notify_all();
        // The task handle is released outside the lock.
        let (RemovedTask::Admitted(entry) | RemovedTask::Waiting(entry)) = removed;
        drop(entry);
        Ok(())
    }

    /// Aborts every task of `query_id`.
    ///
    /// The first call fixes the reason; repeated calls propagate cancellation
    /// again with that reason. Unknown queries are ignored.
    pub fn abort_mpp_query(&self, query_id: u64, reason: &str, abort_type: AbortType) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(set) = inner.queries.get_mut(&query_id) else {
            debug!("abort query {} ignored: no task registered", query_id);
            return;
        };
        if set.aborting {
            info!(
                "query {} is already aborting, propagate again: abort_type={}",
                query_id, abort_type
            );
        } else {
            set.aborting = true;
            set.error_reason = reason.to_string();
            inner.aborted.insert(query_id, reason);
            info!(
                "begin to abort query {}: abort_type={} reason={}",
                query_id, abort_type, reason
            );
        }

        let reason = set.error_reason.clone();
        let mut running = 0usize;
        for task in set.admitted_tasks() {
            task.cancel(&reason, abort_type);
            running += 1;
        }
        let drained = set.drain_waiting();
        for entry in &drained {
            entry.task.cancel(&reason, abort_type);
        }

        let now_empty = set.is_empty();
        inner.scheduler.refresh_query(query_id, Some(&*set));
        if now_empty {
            inner.queries.remove(&query_id);
        }
        // Dropping a waiting query may unblock higher query ids.
        inner.schedule_waiting();
        drop(guard);
        self.cv.notify_all();
        info!(
            "finish abort query {}: cancelled {} running and {} waiting tasks",
            query_id,
            running,
            drained.len()
        );
    }

    /// Blocks until `query_id` starts aborting or leaves the registry.
    pub fn wait_until_query_starts_abort(&self, query_id: u64) {
        let mut guard = self.lock();
        while guard
            .queries
            .get(&query_id)
            .is_some_and(|set| !set.aborting)
        {
            guard = self.cv.wait(guard).expect("mpp task manager wait");
        }
    }

    /// Blocks a queued task until the scheduler admits it.
    pub fn wait_until_task_scheduled(
        &self,
        task_id: &MppTaskId,
        timeout: Duration,
    ) -> Result<(), MppTaskError> {
        let query_id = task_id.query_id();
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        loop {
            if let Some(err) = guard.aborting_error(query_id) {
                return Err(err);
            }
            match guard.queries.get(&query_id) {
                Some(set) if set.is_admitted(task_id) => return Ok(()),
                Some(set) if set.contains(task_id) => {}
                _ => {
                    return Err(MppTaskError::not_found(format!(
                        "task {} is not registered",
                        task_id
                    )));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(MppTaskError::Timeout {
                    task_id: *task_id,
                    timeout,
                });
            }
            let (next, _) = self
                .cv
                .wait_timeout(guard, deadline - now)
                .expect("mpp task manager wait");
            guard = next;
        }
    }

    /// Raw admission check for a task the caller tracks itself.
    ///
    /// On `Ok(true)` the task's threads are reserved and must be handed back with
    /// [`MppTaskManager::release_threads_from_scheduler`]. Such reservations
    /// count against the thread budget only: the query does not join the
    /// min-tso ordering, so it neither holds back other queries nor gains the
    /// burst to the hard limit on later calls.
    pub fn try_to_schedule_task(&self, task: &dyn MppTask) -> Result<bool, MppTaskError> {
        let task_id = task.id();
        let needed_threads = task.needed_threads();
        let mut guard = self.lock();
        if let Some(err) = guard.aborting_error(task_id.query_id()) {
            return Err(err);
        }
        guard.scheduler.try_to_schedule(task_id, needed_threads)
    }

    pub fn release_threads_from_scheduler(&self, threads: usize) {
        let mut guard = self.lock();
        guard.scheduler.release_threads(threads);
        guard.schedule_waiting();
        drop(guard);
        self.cv.notify_all();
    }

    /// Returns the tunnel from the request's sender task to its receiver.
    ///
    /// The sender task may not be registered yet when a remote receiver
    /// connects, so this waits up to `timeout` for it to appear. Fails fast
    /// with the abort reason when the query is aborting.
    pub fn find_tunnel_with_timeout(
        &self,
        request: &EstablishMppConnectionRequest,
        timeout: Duration,
    ) -> Result<Arc<dyn MppTunnel>, MppTaskError> {
        let sender = request.sender_meta;
        let query_id = sender.query_id();
        let start = Instant::now();
        let deadline = start + timeout;
        let mut guard = self.lock();
        let task = loop {
            if let Some(err) = guard.aborting_error(query_id) {
                return Err(err);
            }
            if let Some(task) = guard
                .queries
                .get(&query_id)
                .and_then(|set| set.find_task(&sender))
            {
                break Arc::clone(task);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "find tunnel TIMEOUT: {} elapsed={:?} timeout={:?}",
                    request,
                    start.elapsed(),
                    timeout
                );
                return Err(MppTaskError::Timeout {
                    task_id: sender,
                    timeout,
                });
            }
            let (next, _) = self
                .cv
                .wait_timeout(guard, deadline - now)
                .expect("mpp task manager wait");
            guard = next;
        };
        drop(guard);

        task.tunnel(&request.receiver_meta).map_err(|err| {
            MppTaskError::not_found(format!(
                "can't find tunnel ({}): {}",
                request, err
            ))
        })
    }

    pub fn query_snapshot(&self, query_id: u64) -> Option<QueryTaskSetSnapshot> {
        let guard = self.lock();
        guard.queries.get(&query_id).map(|set| set.snapshot(query_id))
    }

    pub fn query_count(&self) -> usize {
        self.lock().queries.len()
    }

    pub fn estimated_thread_usage(&self) -> usize {
        self.lock().scheduler.estimated_thread_usage()
    }
}

impl fmt::Display for MppTaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.lock();
        let min_tso = guard.scheduler.min_tso();
        write!(
            f,
            "MppTaskManager(queries={}, estimated_thread_usage={}, thread_soft_limit={}, min_tso=",
            guard.queries.len(),
            guard.scheduler.estimated_thread_usage(),
            guard.scheduler.thread_soft_limit(),
        )?;
        if min_tso == u64::MAX {
            writeln!(f, "none)")?;
        } else {
            writeln!(f, "{})", min_tso)?;
        }
        let mut query_ids: Vec<u64> = guard.queries.keys().copied().collect();
        query_ids.sort_unstable();
        for query_id in query_ids {
            let snap = guard.queries[&query_id].snapshot(query_id);
            writeln!(
                f,
                "  query {}: aborting={} tasks={} admitted={:?} waiting={:?}",
                snap.query_id,
                snap.aborting,
                snap.task_count(),
                snap.admitted,
                snap.waiting
            )?;
        }
        Ok(())
    }
}

static MPP_TASK_MANAGER: OnceLock<Arc<MppTaskManager>> = OnceLock::new();

/// Process-wide task manager, configured from `[mpp]` on first use.
pub fn mpp_task_manager() -> Arc<MppTaskManager> {
    MPP_TASK_MANAGER
        .get_or_init(|| Arc::new(MppTaskManager::from_config()))
        .clone()
}
