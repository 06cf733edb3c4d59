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
use std::fmt;

use super::mpp_task::MppTaskId;

/// Data-exchange endpoint owned by a sender task.
///
/// The task manager hands tunnels back to callers unchanged; only local
/// connection establishment looks at `is_local` and calls `connect`.
pub trait MppTunnel: Send + Sync + fmt::Debug {
    fn tunnel_id(&self) -> &str;

    /// Sender and receiver live in the same process.
    fn is_local(&self) -> bool;

    fn connect(&self) -> Result<(), String>;
}

/// Fields of an `EstablishMPPConnection` request used by tunnel lookup.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EstablishMppConnectionRequest {
    /// Task producing the data; owns the tunnel.
    pub sender_meta: MppTaskId,
    /// Task consuming the data.
    pub receiver_meta: MppTaskId,
}

impl EstablishMppConnectionRequest {
    pub fn new(sender_meta: MppTaskId, receiver_meta: MppTaskId) -> Self {
        Self {
            sender_meta,
            receiver_meta,
        }
    }
}

impl fmt::Display for EstablishMppConnectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sender {} -> receiver {}",
            self.sender_meta, self.receiver_meta
        )
    }
}
