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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovaRocksConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovaRocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = NovaRocksConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    CONFIG
        .get()
        .ok_or_else(|| anyhow!("config not initialized after loading {}", path.display()))
}

pub fn init_from_env_or_default() -> Result<&'static NovaRocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    init_from_path(path)
}

pub fn config() -> Result<&'static NovaRocksConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVAROCKS_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("novarocks.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $NOVAROCKS_CONFIG or create ./novarocks.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct NovaRocksConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novarocks_mpp=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub mpp: MppConfig,
}

impl NovaRocksConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: NovaRocksConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }

    /// Filter expression handed to the tracing subscriber.
    pub fn effective_log_filter(&self) -> &str {
        self.log_filter
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(&self.log_level)
    }
}

impl Default for NovaRocksConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            mpp: MppConfig::default(),
        }
    }
}

/// Admission and lifecycle settings for MPP tasks.
#[derive(Clone, Debug, Deserialize)]
pub struct MppConfig {
    /// Threads the scheduler hands out before tasks start to queue.
    /// 0 disables admission control entirely.
    #[serde(default = "default_thread_soft_limit")]
    pub thread_soft_limit: usize,
    /// Upper bound the query with the smallest start ts may burst to.
    #[serde(default = "default_thread_hard_limit")]
    pub thread_hard_limit: usize,
    #[serde(default = "default_find_tunnel_timeout_ms")]
    pub find_tunnel_timeout_ms: u64,
    #[serde(default = "default_aborted_query_cache_capacity")]
    pub aborted_query_cache_capacity: usize,
    #[serde(default = "default_aborted_query_ttl_secs")]
    pub aborted_query_ttl_secs: u64,
}

fn default_thread_soft_limit() -> usize {
    5000
}

fn default_thread_hard_limit() -> usize {
    10000
}

fn default_find_tunnel_timeout_ms() -> u64 {
    10_000
}

fn default_aborted_query_cache_capacity() -> usize {
    8192
}

fn default_aborted_query_ttl_secs() -> u64 {
    600
}

impl Default for MppConfig {
    fn default() -> Self {
        Self {
            thread_soft_limit: default_thread_soft_limit(),
            thread_hard_limit: default_thread_hard_limit(),
            find_tunnel_timeout_ms: default_find_tunnel_timeout_ms(),
            aborted_query_cache_capacity: default_aborted_query_cache_capacity(),
            aborted_query_ttl_secs: default_aborted_query_ttl_secs(),
        }
    }
}
