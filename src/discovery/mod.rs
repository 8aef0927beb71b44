//! Client-side service discovery and load balancing (spec.md §4.8):
//! [`MultiServersDiscovery`] holds a plain in-memory address list;
//! [`RegistryDiscovery`] wraps one with a TTL-cached refresh against a
//! [`crate::registry::Registry`]'s HTTP surface.

use crate::error::Error;
use async_trait::async_trait;
use futures::lock::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How `Discovery::get` picks one address out of the live set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    Random,
    RoundRobin,
}

/// A source of candidate server addresses for [`crate::xclient::XClient`].
///
/// One mutex per component (spec.md §5's lock-discipline note) — `update`
/// is the sole writer of the address list, `get`/`get_all` the readers;
/// there's no second lock here to order against.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Re-pulls the address list from whatever backs this discovery
    /// source. A no-op for `MultiServersDiscovery`, since its list has no
    /// external source to refresh from.
    async fn refresh(&self) -> Result<(), Error>;

    /// Replaces the address list outright.
    async fn update(&self, servers: Vec<String>);

    /// Picks one address per `mode`. Errors if the list is empty
    /// (spec.md §8 B6).
    async fn get(&self, mode: SelectMode) -> Result<String, Error>;

    /// The full current address list.
    async fn get_all(&self) -> Vec<String>;
}

/// A static or manually-updated address list with no external registry.
pub struct MultiServersDiscovery {
    servers: Mutex<Vec<String>>,
    // Round-robin cursor, seeded from a random start so that many clients
    // constructed at the same instant don't all begin at server 0.
    index: AtomicUsize,
}

impl MultiServersDiscovery {
    pub fn new(servers: Vec<String>) -> Arc<Self> {
        let index = rand::thread_rng().gen::<usize>();
        Arc::new(Self {
            servers: Mutex::new(servers),
            index: AtomicUsize::new(index),
        })
    }
}

#[async_trait]
impl Discovery for MultiServersDiscovery {
    async fn refresh(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) {
        *self.servers.lock().await = servers;
    }

    async fn get(&self, mode: SelectMode) -> Result<String, Error> {
        let servers = self.servers.lock().await;
        if servers.is_empty() {
            return Err(Error::Rpc("rpc discovery: no available servers".into()));
        }
        match mode {
            SelectMode::Random => {
                let i = rand::thread_rng().gen_range(0..servers.len());
                Ok(servers[i].clone())
            }
            SelectMode::RoundRobin => {
                let i = self.index.fetch_add(1, Ordering::Relaxed) % servers.len();
                Ok(servers[i].clone())
            }
        }
    }

    async fn get_all(&self) -> Vec<String> {
        self.servers.lock().await.clone()
    }
}

/// Wraps a [`MultiServersDiscovery`] whose address list is periodically
/// refreshed from a registry's HTTP `GET`, rather than ever being set
/// directly by the caller.
pub struct RegistryDiscovery {
    inner: Arc<MultiServersDiscovery>,
    registry_url: String,
    refresh_ttl: Duration,
    last_refresh: Mutex<Option<Instant>>,
}

impl RegistryDiscovery {
    pub fn new(registry_url: impl Into<String>, refresh_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MultiServersDiscovery::new(Vec::new()),
            registry_url: registry_url.into(),
            refresh_ttl,
            last_refresh: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<(), Error> {
        let mut last = self.last_refresh.lock().await;
        if let Some(t) = *last {
            if t.elapsed() < self.refresh_ttl {
                return Ok(());
            }
        }

        let mut res = surf::get(&self.registry_url).await.map_err(|e| {
            log::error!(
                "rpc discovery: refresh against registry {} failed: {}",
                self.registry_url,
                e
            );
            Error::Rpc(format!("rpc discovery: registry refresh failed: {}", e))
        })?;
        let header = res
            .header(crate::registry::SERVERS_HEADER)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let servers: Vec<String> = header
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        log::debug!(
            "rpc discovery: refreshed {} server(s) from {}",
            servers.len(),
            self.registry_url
        );
        self.inner.update(servers).await;
        *last = Some(Instant::now());
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) {
        self.inner.update(servers).await;
        *self.last_refresh.lock().await = Some(Instant::now());
    }

    async fn get(&self, mode: SelectMode) -> Result<String, Error> {
        self.refresh().await?;
        self.inner.get(mode).await
    }

    async fn get_all(&self) -> Vec<String> {
        // A registry that's briefly unreachable shouldn't make every call
        // fail outright; fall back to the last good list.
        if let Err(e) = self.refresh().await {
            log::warn!(
                "rpc discovery: get_all serving stale list, refresh failed: {}",
                e
            );
        }
        self.inner.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[async_std::test]
    async fn empty_discovery_is_an_error() {
        let discovery = MultiServersDiscovery::new(Vec::new());
        let err = discovery.get(SelectMode::Random).await.unwrap_err();
        assert!(err.to_string().contains("no available servers"));
    }

    #[async_std::test]
    async fn round_robin_cycles_through_every_address() {
        let discovery = MultiServersDiscovery::new(vec!["a".into(), "b".into(), "c".into()]);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            seen.insert(discovery.get(SelectMode::RoundRobin).await.unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    #[async_std::test]
    async fn update_replaces_the_address_list() {
        let discovery = MultiServersDiscovery::new(vec!["a".into()]);
        discovery.update(vec!["b".into(), "c".into()]).await;
        let mut all = discovery.get_all().await;
        all.sort();
        assert_eq!(all, vec!["b".to_string(), "c".to_string()]);
    }
}
