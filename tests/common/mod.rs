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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use novarocks_mpp::novarocks_config;
use novarocks_mpp::novarocks_logging;
use novarocks_mpp::{
    AbortType, AbortedQueryCache, MinTsoScheduler, MppTask, MppTaskId, MppTaskManager, MppTunnel,
};

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a new test configuration with small mpp limits.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_novarocks.toml");

        let config_content = r#"
log_level = "debug"

[mpp]
thread_soft_limit = 64
thread_hard_limit = 128
find_tunnel_timeout_ms = 200
aborted_query_cache_capacity = 32
aborted_query_ttl_secs = 30
"#;

        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        novarocks_logging::init_with_level("debug");
    }

    /// Load the test configuration.
    pub fn load_config(&self) -> anyhow::Result<&'static novarocks_config::NovaRocksConfig> {
        novarocks_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// Task manager with a fixed thread budget, independent of the global config.
pub fn test_manager(soft_limit: usize, hard_limit: usize) -> Arc<MppTaskManager> {
    Arc::new(MppTaskManager::with_aborted_cache(
        MinTsoScheduler::new(soft_limit, hard_limit),
        AbortedQueryCache::new(64, Duration::from_secs(60)),
    ))
}

/// In-process tunnel handed out by `TestTask`.
#[derive(Debug)]
pub struct TestTunnel {
    pub id: String,
    pub local: bool,
    pub connects: AtomicUsize,
}

impl TestTunnel {
    pub fn new(sender: MppTaskId, receiver: MppTaskId, local: bool) -> Arc<Self> {
        Arc::new(Self {
            id: format!("tunnel:{}->{}", sender, receiver),
            local,
            connects: AtomicUsize::new(0),
        })
    }
}

impl MppTunnel for TestTunnel {
    fn tunnel_id(&self) -> &str {
        &self.id
    }

    fn is_local(&self) -> bool {
        self.local
    }

    fn connect(&self) -> Result<(), String> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Task stub that records cancellation and serves one tunnel per receiver.
pub struct TestTask {
    pub id: MppTaskId,
    pub threads: usize,
    pub cancelled: AtomicBool,
    pub cancel_count: AtomicUsize,
    pub last_cancel: Mutex<Option<(String, AbortType)>>,
    pub tunnels: Mutex<Vec<(MppTaskId, Arc<TestTunnel>)>>,
}

impl TestTask {
    pub fn new(start_ts: u64, task_id: i64) -> Arc<Self> {
        Self::with_threads(start_ts, task_id, 1)
    }

    pub fn with_threads(start_ts: u64, task_id: i64, threads: usize) -> Arc<Self> {
        Arc::new(Self {
            id: MppTaskId::new(start_ts, task_id),
            threads,
            cancelled: AtomicBool::new(false),
            cancel_count: AtomicUsize::new(0),
            last_cancel: Mutex::new(None),
            tunnels: Mutex::new(Vec::new()),
        })
    }

    pub fn add_tunnel(&self, receiver: MppTaskId, local: bool) -> Arc<TestTunnel> {
        let tunnel = TestTunnel::new(self.id, receiver, local);
        self.tunnels
            .lock()
            .expect("test task tunnels lock")
            .push((receiver, tunnel.clone()));
        tunnel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn last_cancel(&self) -> Option<(String, AbortType)> {
        self.last_cancel
            .lock()
            .expect("test task cancel lock")
            .clone()
    }
}

impl MppTask for TestTask {
    fn id(&self) -> MppTaskId {
        self.id
    }

    fn needed_threads(&self) -> usize {
        self.threads
    }

    fn cancel(&self, reason: &str, abort_type: AbortType) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_count.fetch_add(1, Ordering::SeqCst);
        *self.last_cancel.lock().expect("test task cancel lock") =
            Some((reason.to_string(), abort_type));
    }

    fn tunnel(&self, receiver: &MppTaskId) -> Result<Arc<dyn MppTunnel>, String> {
        let tunnels = self.tunnels.lock().expect("test task tunnels lock");
        tunnels
            .iter()
            .find(|(id, _)| id == receiver)
            .map(|(_, tunnel)| tunnel.clone() as Arc<dyn MppTunnel>)
            .ok_or_else(|| format!("task {} has no tunnel for receiver {}", self.id, receiver))
    }
}

/// Wait for a condition to become true, with timeout.
pub fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Run `f` and fail the test if it does not finish within `timeout`.
pub fn run_with_timeout<F, T>(timeout: Duration, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(timeout) {
        Ok(v) => v,
        Err(_) => panic!("test timed out after {:?}", timeout),
    }
}

/// Assert that a result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is Err.
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => e,
        }
    };
}
