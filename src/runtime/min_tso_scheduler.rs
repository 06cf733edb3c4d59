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
//! Min-TSO admission scheduler for MPP tasks.
//!
//! Responsibilities:
//! - Owns the node's thread budget (soft and hard limit) and the estimated usage.
//! - Decides whether a newly registered task may start, and which waiting tasks
//!   run once threads are released.
//!
//! Admission order is by query id (the query's start ts), lowest first, and FIFO
//! within one query. Every node applies the same rule without coordination, so
//! the query with the globally smallest start ts always makes progress and
//! cross-node exchange waits cannot form a cycle. The current minimum query may
//! burst past the soft limit up to the hard limit.
//!
//! The scheduler has no lock of its own: it lives inside the task manager state
//! and is only touched under the task manager lock.

use std::collections::{BTreeSet, HashMap};

use super::mpp_error::MppTaskError;
use super::mpp_task::MppTaskId;
use super::query_task_set::QueryTaskSet;
use crate::novarocks_logging::{debug, info, warn};

pub struct MinTsoScheduler {
    thread_soft_limit: usize,
    thread_hard_limit: usize,
    estimated_thread_usage: usize,
    /// Queries holding at least one admitted task.
    active_set: BTreeSet<u64>,
    /// Queries with at least one task waiting for admission.
    waiting_set: BTreeSet<u64>,
}

impl MinTsoScheduler {
    /// A `thread_soft_limit` of 0 disables admission control.
    pub fn new(thread_soft_limit: usize, thread_hard_limit: usize) -> Self {
        let thread_hard_limit = if thread_hard_limit < thread_soft_limit {
            warn!(
                "thread_hard_limit {} is below thread_soft_limit {}, using the soft limit",
                thread_hard_limit, thread_soft_limit
            );
            thread_soft_limit
        } else {
            thread_hard_limit
        };
        if thread_soft_limit == 0 {
            info!("min tso scheduler is disabled");
        } else {
            info!(
                "min tso scheduler started: thread_soft_limit={} thread_hard_limit={}",
                thread_soft_limit, thread_hard_limit
            );
        }
        Self {
            thread_soft_limit,
            thread_hard_limit,
            estimated_thread_usage: 0,
            active_set: BTreeSet::new(),
            waiting_set: BTreeSet::new(),
        }
    }

    pub fn from_config() -> Self {
        Self::new(
            crate::common::config::mpp_thread_soft_limit(),
            crate::common::config::mpp_thread_hard_limit(),
        )
    }

    pub fn is_disabled(&self) -> bool {
        self.thread_soft_limit == 0
    }

    pub fn thread_soft_limit(&self) -> usize {
        self.thread_soft_limit
    }

    pub fn thread_hard_limit(&self) -> usize {
        self.thread_hard_limit
    }

    pub fn estimated_thread_usage(&self) -> usize {
        self.estimated_thread_usage
    }

    /// Smallest query id that is running or waiting, `u64::MAX` when idle.
    pub fn min_tso(&self) -> u64 {
        let active = self.active_set.first().copied().unwrap_or(u64::MAX);
        let waiting = self.waiting_set.first().copied().unwrap_or(u64::MAX);
        active.min(waiting)
    }

    /// Queries with waiting tasks, in admission order.
    pub fn waiting_queries(&self) -> Vec<u64> {
        self.waiting_set.iter().copied().collect()
    }

    fn fits(&self, query_id: u64, needed_threads: usize) -> bool {
        let usage = self.estimated_thread_usage.saturating_add(needed_threads);
        usage <= self.thread_soft_limit
            || (query_id <= self.min_tso() && usage <= self.thread_hard_limit)
    }

    /// Admission check for a task that is not queued yet.
    ///
    /// Returns `Ok(true)` and reserves the threads when the task may start now,
    /// `Ok(false)` when it has to wait. A task that could never fit is an error.
    pub(crate) fn try_to_schedule(
        &mut self,
        task_id: MppTaskId,
        needed_threads: usize,
    ) -> Result<bool, MppTaskError> {
        if self.is_disabled() {
            return Ok(true);
        }
        if needed_threads > self.thread_hard_limit {
            warn!(
                "task {} needs {} threads, over thread_hard_limit {}",
                task_id, needed_threads, self.thread_hard_limit
            );
            return Err(MppTaskError::ExceedsThreadLimit {
                task_id,
                needed_threads,
                hard_limit: self.thread_hard_limit,
            });
        }
        let query_id = task_id.query_id();
        // Keep FIFO inside the query and never overtake a smaller query id.
        if self.waiting_set.contains(&query_id)
            || self.waiting_set.first().is_some_and(|&lowest| lowest < query_id)
        {
            debug!(
                "task {} queued behind waiting queries {:?}",
                task_id,
                self.waiting_queries()
            );
            return Ok(false);
        }
        if !self.fits(query_id, needed_threads) {
            debug!(
                "task {} queued: needed_threads={} estimated_thread_usage={} min_tso={}",
                task_id,
                needed_threads,
                self.estimated_thread_usage,
                self.min_tso()
            );
            return Ok(false);
        }
        self.estimated_thread_usage += needed_threads;
        debug!(
            "task {} scheduled: needed_threads={} estimated_thread_usage={}",
            task_id, needed_threads, self.estimated_thread_usage
        );
        Ok(true)
    }

    pub(crate) fn release_threads(&mut self, threads: usize) {
        if self.is_disabled() {
            return;
        }
        if threads > self.estimated_thread_usage {
            warn!(
                "releasing {} threads but only {} are in use",
                threads, self.estimated_thread_usage
            );
            self.estimated_thread_usage = 0;
        } else {
            self.estimated_thread_usage -= threads;
        }
    }

    /// Syncs the active and waiting sets with a query's current state.
    ///
    /// Aborting or removed queries leave both sets.
    pub(crate) fn refresh_query(&mut self, query_id: u64, set: Option<&QueryTaskSet>) {
        match set {
            Some(set) if !set.aborting => {
                if set.has_admitted() {
                    self.active_set.insert(query_id);
                } else {
                    self.active_set.remove(&query_id);
                }
                if set.has_waiting() {
                    self.waiting_set.insert(query_id);
                } else {
                    self.waiting_set.remove(&query_id);
                }
            }
            _ => {
                self.active_set.remove(&query_id);
                self.waiting_set.remove(&query_id);
            }
        }
    }

    /// Admits waiting tasks, lowest query id first, until the head task does not fit.
    ///
    /// Returns the ids of the tasks admitted by this pass.
    pub(crate) fn schedule_waiting_queries(
        &mut self,
        queries: &mut HashMap<u64, QueryTaskSet>,
    ) -> Vec<MppTaskId> {
        let mut admitted = Vec::new();
        while let Some(&query_id) = self.waiting_set.first() {
            let Some(set) = queries.get_mut(&query_id) else {
                self.waiting_set.remove(&query_id);
                continue;
            };
            while let Some(needed_threads) = set.front_waiting_threads() {
                if set.aborting {
                    break;
                }
                if !self.fits(query_id, needed_threads) {
                    self.refresh_query(query_id, Some(&*set));
                    return admitted;
                }
                self.estimated_thread_usage += needed_threads;
                if let Some(task_id) = set.admit_front_waiting() {
                    debug!(
                        "waiting task {} scheduled: needed_threads={} estimated_thread_usage={}",
                        task_id, needed_threads, self.estimated_thread_usage
                    );
                    admitted.push(task_id);
                }
            }
            self.refresh_query(query_id, Some(&*set));
        }
        admitted
    }
}
