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
use std::time::Duration;

use super::mpp_task::MppTaskId;

/// Failures surfaced by the MPP task manager.
///
/// Every variant renders to a message fit for returning to the caller; a
/// full scheduler budget is not an error and never appears here.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MppTaskError {
    /// The same task id was registered twice. Caller error, nothing was changed.
    #[error("task {task_id} has been registered")]
    DuplicateTask { task_id: MppTaskId },

    /// The query is being (or was recently) aborted. Renders as the abort reason verbatim.
    #[error("{reason}")]
    QueryAborting { query_id: u64, reason: String },

    #[error("{message}")]
    NotFound { message: String },

    /// Waited the whole timeout without the awaited task showing up.
    #[error("can't find task {task_id} within {} ms", .timeout.as_millis())]
    Timeout { task_id: MppTaskId, timeout: Duration },

    #[error("task {task_id} needs {needed_threads} threads, exceeds thread hard limit {hard_limit}")]
    ExceedsThreadLimit {
        task_id: MppTaskId,
        needed_threads: usize,
        hard_limit: usize,
    },

    #[error("establish mpp connection failed: {0}")]
    Connection(String),
}

impl MppTaskError {
    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        MppTaskError::NotFound {
            message: message.into(),
        }
    }

    /// Retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MppTaskError::Timeout { .. })
    }

    /// The query is gone for good; callers should stop issuing work for it.
    pub fn is_query_aborted(&self) -> bool {
        matches!(self, MppTaskError::QueryAborting { .. })
    }
}
