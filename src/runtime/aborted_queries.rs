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
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Recently aborted query ids and their reasons.
///
/// Once the last task of an aborted query leaves, its registry entry is gone;
/// this cache keeps rejecting late registrations and tunnel lookups for that
/// query with the original reason. Entries expire after `ttl`, and the oldest
/// entry is evicted once `capacity` is reached.
pub struct AbortedQueryCache {
    capacity: usize,
    ttl: Duration,
    reasons: HashMap<u64, (String, Instant)>,
    order: VecDeque<u64>,
}

impl AbortedQueryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            reasons: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn from_config() -> Self {
        Self::new(
            crate::common::config::mpp_aborted_query_cache_capacity(),
            crate::common::config::mpp_aborted_query_ttl(),
        )
    }

    /// Records the first abort reason for `query_id`; later calls keep it.
    pub fn insert(&mut self, query_id: u64, reason: &str) {
        let now = Instant::now();
        self.evict_expired(now);
        if self.reasons.contains_key(&query_id) {
            return;
        }
        while self.order.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.reasons.remove(&oldest);
        }
        self.reasons.insert(query_id, (reason.to_string(), now));
        self.order.push_back(query_id);
    }

    pub fn reason(&self, query_id: u64) -> Option<&str> {
        let (reason, at) = self.reasons.get(&query_id)?;
        (at.elapsed() <= self.ttl).then_some(reason.as_str())
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    fn evict_expired(&mut self, now: Instant) {
        // Insertion order is also expiry order.
        while let Some(&oldest) = self.order.front() {
            let expired = self
                .reasons
                .get(&oldest)
                .is_none_or(|(_, at)| now.duration_since(*at) > self.ttl);
            if !expired {
                break;
            }
            self.order.pop_front();
            self.reasons.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::AbortedQueryCache;

    #[test]
    fn first_reason_wins() {
        let mut cache = AbortedQueryCache::new(4, Duration::from_secs(60));
        cache.insert(1, "cancelled by client");
        cache.insert(1, "second abort");
        assert_eq!(cache.reason(1), Some("cancelled by client"));
        assert_eq!(cache.reason(2), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn oldest_entry_evicted_at_capacity() {
        let mut cache = AbortedQueryCache::new(2, Duration::from_secs(60));
        cache.insert(1, "a");
        cache.insert(2, "b");
        cache.insert(3, "c");
        assert_eq!(cache.reason(1), None);
        assert_eq!(cache.reason(2), Some("b"));
        assert_eq!(cache.reason(3), Some("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache = AbortedQueryCache::new(8, Duration::from_millis(20));
        cache.insert(1, "a");
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.reason(1), None);
        cache.insert(2, "b");
        assert_eq!(cache.len(), 1);
        assert!(!cache.is_empty());
    }
}
