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
//! MPP task identity and the surface the task manager needs from a task.
//!
//! The task's execution logic lives elsewhere; the registry only reads the
//! identity and thread requirement, invokes the abort hook and asks for tunnels.

use std::fmt;
use std::sync::Arc;

use super::mpp_tunnel::MppTunnel;

/// Identity of one node-local MPP task.
///
/// `start_ts` is the query's start timestamp and doubles as the query id; it is
/// globally comparable across nodes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct MppTaskId {
    pub start_ts: u64,
    pub task_id: i64,
}

impl MppTaskId {
    pub const fn new(start_ts: u64, task_id: i64) -> Self {
        Self { start_ts, task_id }
    }

    #[inline]
    pub const fn query_id(&self) -> u64 {
        self.start_ts
    }
}

impl fmt::Display for MppTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.start_ts, self.task_id)
    }
}

/// Cause of a query abort, forwarded verbatim to every task of the query.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AbortType {
    /// The client (or coordinator) cancelled the query.
    OnCancellation,
    /// A task of the query hit a fatal error.
    OnError,
    /// The query exceeded its deadline.
    OnTimeout,
}

impl AbortType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortType::OnCancellation => "ONCANCELLATION",
            AbortType::OnError => "ONERROR",
            AbortType::OnTimeout => "ONTIMEOUT",
        }
    }
}

impl fmt::Display for AbortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task as seen by the task manager.
///
/// `cancel` is invoked while the manager lock is held and must not block: set a
/// flag, wake the task's own waiters, and return.
pub trait MppTask: Send + Sync {
    fn id(&self) -> MppTaskId;

    /// Threads the task occupies once admitted.
    fn needed_threads(&self) -> usize;

    fn cancel(&self, reason: &str, abort_type: AbortType);

    /// Tunnel that sends this task's output to `receiver`.
    fn tunnel(&self, receiver: &MppTaskId) -> Result<Arc<dyn MppTunnel>, String>;
}
