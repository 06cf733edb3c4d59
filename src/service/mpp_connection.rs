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
//! Receiver-side setup of a local MPP connection.
//!
//! When sender and receiver tasks run in the same process the receiver skips
//! the RPC path and asks the task manager for the sender's tunnel directly.

use std::sync::Arc;
use std::time::Duration;

use crate::common::config::mpp_find_tunnel_timeout;
use crate::novarocks_logging::{debug, warn};
use crate::runtime::mpp_error::MppTaskError;
use crate::runtime::mpp_task_manager::MppTaskManager;
use crate::runtime::mpp_tunnel::{EstablishMppConnectionRequest, MppTunnel};

/// Finds the sender's tunnel, checks that it is local and connects it.
///
/// Waits up to `[mpp].find_tunnel_timeout_ms` for the sender task to register.
pub fn establish_mpp_connection_local(
    request: &EstablishMppConnectionRequest,
    manager: &MppTaskManager,
) -> Result<Arc<dyn MppTunnel>, MppTaskError> {
    establish_with_timeout(request, manager, mpp_find_tunnel_timeout())
}

fn establish_with_timeout(
    request: &EstablishMppConnectionRequest,
    manager: &MppTaskManager,
    timeout: Duration,
) -> Result<Arc<dyn MppTunnel>, MppTaskError> {
    let tunnel = manager.find_tunnel_with_timeout(request, timeout)?;
    if !tunnel.is_local() {
        warn!(
            "establish local mpp connection on remote tunnel {}: {}",
            tunnel.tunnel_id(),
            request
        );
        return Err(MppTaskError::Connection(format!(
            "EstablishMPPConnectionLocal into a remote channel: {}",
            tunnel.tunnel_id()
        )));
    }
    tunnel.connect().map_err(|err| {
        MppTaskError::Connection(format!(
            "connect local tunnel {} failed: {}",
            tunnel.tunnel_id(),
            err
        ))
    })?;
    debug!("local mpp connection established: {}", request);
    Ok(tunnel)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::establish_with_timeout;
    use crate::runtime::aborted_queries::AbortedQueryCache;
    use crate::runtime::min_tso_scheduler::MinTsoScheduler;
    use crate::runtime::mpp_error::MppTaskError;
    use crate::runtime::mpp_task::{AbortType, MppTask, MppTaskId};
    use crate::runtime::mpp_task_manager::MppTaskManager;
    use crate::runtime::mpp_tunnel::{EstablishMppConnectionRequest, MppTunnel};

    #[derive(Debug)]
    struct FakeTunnel {
        local: bool,
        fail_connect: bool,
        connected: AtomicBool,
    }

    impl MppTunnel for FakeTunnel {
        fn tunnel_id(&self) -> &str {
            "tunnel:[1,1]->[1,2]"
        }
        fn is_local(&self) -> bool {
            self.local
        }
        fn connect(&self) -> Result<(), String> {
            if self.fail_connect {
                return Err("receiver already attached".to_string());
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SenderTask {
        tunnel: Arc<FakeTunnel>,
    }

    impl MppTask for SenderTask {
        fn id(&self) -> MppTaskId {
            MppTaskId::new(1, 1)
        }
        fn needed_threads(&self) -> usize {
            1
        }
        fn cancel(&self, _reason: &str, _abort_type: AbortType) {}
        fn tunnel(&self, _receiver: &MppTaskId) -> Result<Arc<dyn MppTunnel>, String> {
            Ok(self.tunnel.clone())
        }
    }

    fn setup(local: bool, fail_connect: bool) -> (MppTaskManager, Arc<FakeTunnel>) {
        let mgr = MppTaskManager::with_aborted_cache(
            MinTsoScheduler::new(8, 8),
            AbortedQueryCache::new(8, Duration::from_secs(60)),
        );
        let tunnel = Arc::new(FakeTunnel {
            local,
            fail_connect,
            connected: AtomicBool::new(false),
        });
        let task = Arc::new(SenderTask {
            tunnel: tunnel.clone(),
        });
        assert_eq!(mgr.register_task(task), Ok(true));
        (mgr, tunnel)
    }

    fn request() -> EstablishMppConnectionRequest {
        EstablishMppConnectionRequest::new(MppTaskId::new(1, 1), MppTaskId::new(1, 2))
    }

    #[test]
    fn connects_local_tunnel() {
        let (mgr, tunnel) = setup(true, false);
        let found = establish_with_timeout(&request(), &mgr, Duration::from_millis(100))
            .expect("local tunnel");
        assert_eq!(found.tunnel_id(), "tunnel:[1,1]->[1,2]");
        assert!(tunnel.connected.load(Ordering::SeqCst));
    }

    #[test]
    fn rejects_remote_tunnel() {
        let (mgr, tunnel) = setup(false, false);
        let err = establish_with_timeout(&request(), &mgr, Duration::from_millis(100))
            .expect_err("remote tunnel");
        assert!(matches!(err, MppTaskError::Connection(_)));
        assert!(err.to_string().contains("remote channel"), "{err}");
        assert!(!tunnel.connected.load(Ordering::SeqCst));
    }

    #[test]
    fn surfaces_connect_failure() {
        let (mgr, _tunnel) = setup(true, true);
        let err = establish_with_timeout(&request(), &mgr, Duration::from_millis(100))
            .expect_err("connect fails");
        assert!(err.to_string().contains("receiver already attached"), "{err}");
    }

    #[test]
    fn unknown_sender_times_out() {
        let (mgr, _tunnel) = setup(true, false);
        let req = EstablishMppConnectionRequest::new(MppTaskId::new(2, 1), MppTaskId::new(2, 2));
        let err = establish_with_timeout(&req, &mgr, Duration::from_millis(20))
            .expect_err("no sender");
        assert!(err.is_retryable());
    }
}
