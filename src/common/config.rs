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

use crate::novarocks_config::config as novarocks_app_config;

pub(crate) fn mpp_thread_soft_limit() -> usize {
    novarocks_app_config()
        .ok()
        .map(|c| c.mpp.thread_soft_limit)
        .unwrap_or(5000)
}

pub(crate) fn mpp_thread_hard_limit() -> usize {
    novarocks_app_config()
        .ok()
        .map(|c| c.mpp.thread_hard_limit)
        .unwrap_or(10000)
}

pub(crate) fn mpp_find_tunnel_timeout() -> Duration {
    let ms = novarocks_app_config()
        .ok()
        .map(|c| c.mpp.find_tunnel_timeout_ms)
        .unwrap_or(10_000);
    Duration::from_millis(ms)
}

pub(crate) fn mpp_aborted_query_cache_capacity() -> usize {
    novarocks_app_config()
        .ok()
        .map(|c| {
            if c.mpp.aborted_query_cache_capacity == 0 {
                8192
            } else {
                c.mpp.aborted_query_cache_capacity
            }
        })
        .unwrap_or(8192)
}

pub(crate) fn mpp_aborted_query_ttl() -> Duration {
    let secs = novarocks_app_config()
        .ok()
        .map(|c| c.mpp.aborted_query_ttl_secs)
        .unwrap_or(600);
    Duration::from_secs(secs)
}
