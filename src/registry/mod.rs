//! Heartbeat-based service registry (spec.md §4.7): an in-memory map from
//! server address to last-heartbeat time, exposed over plain HTTP so that
//! servers and clients can be arbitrarily far apart on the network without
//! either side needing this crate's wire protocol for registry traffic
//! itself.
//!
//! GET returns the live address set in `X-Myrpc-Servers` (comma-joined,
//! sorted); POST with `X-Myrpc-Server` upserts one entry's heartbeat.
//! Everything else is `405`.

use crate::error::Error;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Header carrying the live address list on a registry `GET` response.
pub const SERVERS_HEADER: &str = "X-Myrpc-Servers";
/// Header carrying the heartbeating address on a registry `POST` request.
pub const SERVER_HEADER: &str = "X-Myrpc-Server";
/// Default mount path for the registry's HTTP endpoint.
pub const DEFAULT_PATH: &str = "/myRPC/registry";

/// TTL canonical default: an address not heard from in 5 minutes is
/// considered dead (spec.md §9 open question, resolved in DESIGN.md).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// The registry's in-memory state. Entries never persist across a restart
/// — that's out of scope (spec.md §4.7 Non-goals) and, in this heartbeat
/// model, also harmless: any server still alive re-registers within one
/// heartbeat period.
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Registry {
    /// `timeout == Duration::ZERO` means entries never expire.
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            timeout,
            servers: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_default_timeout() -> Arc<Self> {
        Self::new(DEFAULT_TIMEOUT)
    }

    pub fn put_server(&self, addr: &str) {
        let mut guard = self.servers.lock().expect("registry lock poisoned");
        guard.insert(addr.to_string(), Instant::now());
    }

    /// The live address set, sorted. Expired entries are evicted as a side
    /// effect of computing this, same as the reference registry's `aliveServers`.
    pub fn alive_servers(&self) -> Vec<String> {
        let mut guard = self.servers.lock().expect("registry lock poisoned");
        if !self.timeout.is_zero() {
            let now = Instant::now();
            guard.retain(|_, last| now.duration_since(*last) < self.timeout);
        }
        let mut addrs: Vec<String> = guard.keys().cloned().collect();
        addrs.sort();
        addrs
    }
}

/// Mounts `registry`'s HTTP surface onto a fresh `tide` app and serves it —
/// `tide` is this corpus's web framework of choice (the teacher's own
/// `http_tide` feature names it), used here for exactly the plain
/// GET/POST surface the registry needs.
pub async fn serve(registry: Arc<Registry>, addr: &str, path: &str) -> Result<(), Error> {
    let mut app = tide::with_state(registry);
    app.at(path).all(handle_registry_request);
    app.listen(addr)
        .await
        .map_err(|e| Error::Rpc(format!("rpc registry: http listen failed: {}", e)))
}

async fn handle_registry_request(req: tide::Request<Arc<Registry>>) -> tide::Result {
    match req.method() {
        tide::http::Method::Get => {
            let addrs = req.state().alive_servers();
            let mut res = tide::Response::new(200);
            res.insert_header(SERVERS_HEADER, addrs.join(","));
            Ok(res)
        }
        tide::http::Method::Post => match req.header(SERVER_HEADER) {
            Some(values) => {
                req.state().put_server(&values.to_string());
                Ok(tide::Response::new(200))
            }
            None => {
                log::warn!("rpc registry: POST missing {} header", SERVER_HEADER);
                Ok(tide::Response::new(500))
            }
        },
        other => {
            log::debug!("rpc registry: rejecting method {}", other);
            Ok(tide::Response::new(405))
        }
    }
}

/// Default heartbeat period given a registry TTL (spec.md §9 open
/// question, resolved in DESIGN.md): just under the TTL so a heartbeat
/// lands before the previous one expires, but never less than half the
/// TTL for very short TTLs.
pub fn default_heartbeat_period(timeout: Duration) -> Duration {
    let margin = Duration::from_secs(60);
    if timeout > margin {
        timeout - margin
    } else {
        timeout / 2
    }
}

/// Sends one heartbeat POST immediately, returning its result to the
/// caller; on success, spawns a task that repeats it every `period` and
/// stops at the first failure (the registry is assumed to have simply
/// dropped the entry by then, so there's nothing further worth retrying).
pub async fn start_heartbeat(
    registry_url: impl Into<String>,
    server_addr: impl Into<String>,
    period: Duration,
) -> Result<(), Error> {
    let registry_url = registry_url.into();
    let server_addr = server_addr.into();

    send_heartbeat(&registry_url, &server_addr).await?;

    async_std::task::spawn(async move {
        loop {
            async_std::task::sleep(period).await;
            if let Err(e) = send_heartbeat(&registry_url, &server_addr).await {
                log::warn!("rpc registry: heartbeat stopped: {}", e);
                return;
            }
        }
    });

    Ok(())
}

async fn send_heartbeat(registry_url: &str, server_addr: &str) -> Result<(), Error> {
    surf::post(registry_url)
        .header(SERVER_HEADER, server_addr)
        .await
        .map_err(|e| Error::Rpc(format!("rpc registry: heartbeat failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entries_are_alive() {
        let registry = Registry::new(Duration::from_secs(60));
        registry.put_server("127.0.0.1:9000");
        assert_eq!(registry.alive_servers(), vec!["127.0.0.1:9000".to_string()]);
    }

    #[test]
    fn zero_timeout_never_expires() {
        let registry = Registry::new(Duration::ZERO);
        registry.put_server("127.0.0.1:9000");
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(registry.alive_servers().len(), 1);
    }

    #[test]
    fn alive_servers_are_sorted() {
        let registry = Registry::new(Duration::from_secs(60));
        registry.put_server("b:1");
        registry.put_server("a:1");
        assert_eq!(registry.alive_servers(), vec!["a:1".to_string(), "b:1".to_string()]);
    }

    #[test]
    fn heartbeat_period_is_clamped_for_short_ttls() {
        assert_eq!(
            default_heartbeat_period(Duration::from_secs(30)),
            Duration::from_secs(15)
        );
        assert_eq!(
            default_heartbeat_period(Duration::from_secs(300)),
            Duration::from_secs(240)
        );
    }
}
