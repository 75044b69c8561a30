//! Egress proxy rotation and per-proxy bookkeeping.
//!
//! Proxies are never evicted automatically: failures are counted and the
//! caller decides what to do with [`ProxyManager::get_stats`].

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// Successive calls walk the pool in order.
    #[default]
    RoundRobin,
    /// Always the first proxy.
    Stable,
    Random,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub last_failure_reason: Option<String>,
}

#[derive(Debug, Default)]
struct PoolState {
    proxies: Vec<String>,
    stats: HashMap<String, ProxyStats>,
    cursor: usize,
}

/// Proxy pool shared by cloning; counters live behind one mutex.
#[derive(Debug, Clone, Default)]
pub struct ProxyManager {
    strategy: RotationStrategy,
    inner: Arc<Mutex<PoolState>>,
}

impl ProxyManager {
    pub fn new(strategy: RotationStrategy) -> Self {
        Self {
            strategy,
            inner: Arc::new(Mutex::new(PoolState::default())),
        }
    }

    /// Round-robin when `enable_rotation`, otherwise a stable pick.
    pub fn from_config<I>(proxies: I, enable_rotation: bool) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let strategy = if enable_rotation {
            RotationStrategy::RoundRobin
        } else {
            RotationStrategy::Stable
        };
        let manager = Self::new(strategy);
        manager.load(proxies);
        manager
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut PoolState) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn strategy(&self) -> RotationStrategy {
        self.strategy
    }

    pub fn load<I>(&self, proxies: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.with_state(|state| {
            state.proxies.clear();
            state.cursor = 0;
        });
        for proxy in proxies {
            self.add_proxy(proxy);
        }
    }

    pub fn add_proxy(&self, proxy: impl Into<String>) {
        let endpoint = proxy.into();
        self.with_state(|state| {
            if state.proxies.contains(&endpoint) {
                return;
            }
            state.stats.entry(endpoint.clone()).or_default();
            state.proxies.push(endpoint);
        });
    }

    pub fn remove_proxy(&self, proxy: &str) {
        self.with_state(|state| {
            state.proxies.retain(|entry| entry != proxy);
            state.stats.remove(proxy);
        });
    }

    pub fn is_empty(&self) -> bool {
        self.with_state(|state| state.proxies.is_empty())
    }

    pub fn len(&self) -> usize {
        self.with_state(|state| state.proxies.len())
    }

    /// Next proxy under the configured strategy, or `None` for an empty pool.
    pub fn get_proxy(&self) -> Option<String> {
        let strategy = self.strategy;
        self.with_state(|state| {
            if state.proxies.is_empty() {
                return None;
            }
            let selected = match strategy {
                RotationStrategy::RoundRobin => {
                    let idx = state.cursor % state.proxies.len();
                    state.cursor = (idx + 1) % state.proxies.len();
                    state.proxies[idx].clone()
                }
                RotationStrategy::Stable => state.proxies[0].clone(),
                RotationStrategy::Random => state
                    .proxies
                    .choose(&mut rand::thread_rng())
                    .cloned()?,
            };
            let stats = state.stats.entry(selected.clone()).or_default();
            stats.requests += 1;
            stats.last_used = Some(Utc::now());
            Some(selected)
        })
    }

    pub fn report_success(&self, proxy: &str) {
        self.with_state(|state| {
            if let Some(stats) = state.stats.get_mut(proxy) {
                stats.successes += 1;
            }
        });
    }

    pub fn report_failure(&self, proxy: &str, reason: impl Into<String>) {
        let reason = reason.into();
        log::debug!("proxy {proxy} failed: {reason}");
        self.with_state(|state| {
            if let Some(stats) = state.stats.get_mut(proxy) {
                stats.failures += 1;
                stats.last_failure_reason = Some(reason);
            }
        });
    }

    pub fn get_stats(&self) -> HashMap<String, ProxyStats> {
        self.with_state(|state| state.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_round_robin() {
        let manager = ProxyManager::from_config(["http://a:8080", "http://b:8080"], true);
        let picks: Vec<_> = (0..4).filter_map(|_| manager.get_proxy()).collect();
        assert_eq!(
            picks,
            vec!["http://a:8080", "http://b:8080", "http://a:8080", "http://b:8080"]
        );
    }

    #[test]
    fn stable_without_rotation() {
        let manager = ProxyManager::from_config(["http://a:8080", "http://b:8080"], false);
        for _ in 0..3 {
            assert_eq!(manager.get_proxy().as_deref(), Some("http://a:8080"));
        }
    }

    #[test]
    fn empty_pool_yields_none() {
        let manager = ProxyManager::new(RotationStrategy::Random);
        assert!(manager.get_proxy().is_none());
    }

    #[test]
    fn counts_outcomes_without_evicting() {
        let manager = ProxyManager::from_config(["http://a:8080"], true);
        let proxy = manager.get_proxy().unwrap();
        manager.report_failure(&proxy, "connection reset");
        manager.report_failure(&proxy, "timeout");
        manager.report_success(&proxy);

        let stats = manager.get_stats().remove(&proxy).unwrap();
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.last_failure_reason.as_deref(), Some("timeout"));
        assert!(stats.last_used.is_some());
        assert_eq!(manager.get_proxy().as_deref(), Some("http://a:8080"));
    }

    #[test]
    fn clones_share_counters() {
        let manager = ProxyManager::from_config(["http://a:8080", "http://a:8080"], true);
        let shared = manager.clone();
        shared.get_proxy();
        assert_eq!(manager.get_stats()["http://a:8080"].requests, 1);
        assert_eq!(manager.get_stats().len(), 1);
    }
}
