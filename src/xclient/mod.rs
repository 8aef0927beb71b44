//! Load-balanced, connection-caching client (spec.md §4.9): picks an
//! address from a [`crate::discovery::Discovery`], reuses one [`Client`]
//! per address, and fans calls out to every known address on `broadcast`.

use crate::client::{dial_timeout, Client};
use crate::codec::{decode_body, encode_body};
use crate::discovery::{Discovery, SelectMode};
use crate::error::Error;
use crate::message::HandshakeOption;
use futures::lock::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

/// Discovery-backed client: every `call`/`broadcast` resolves an address
/// through `discovery` first, then reuses (or lazily dials) a cached
/// [`Client`] for it.
pub struct XClient {
    discovery: Arc<dyn Discovery>,
    mode: SelectMode,
    opt: HandshakeOption,
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

impl XClient {
    pub fn new(discovery: Arc<dyn Discovery>, mode: SelectMode, opt: HandshakeOption) -> Arc<Self> {
        Arc::new(Self {
            discovery,
            mode,
            opt,
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the cached client for `addr`, dialling a fresh one if there
    /// is none, or the cached one has gone unavailable (closed, or its
    /// connection died under it).
    async fn dial(&self, addr: &str) -> Result<Arc<Client>, Error> {
        let mut guard = self.clients.lock().await;
        if let Some(client) = guard.get(addr) {
            if client.is_available().await {
                return Ok(client.clone());
            }
            let _ = client.close().await;
            guard.remove(addr);
        }

        let client = Arc::new(dial_timeout(addr, self.opt.clone()).await?);
        guard.insert(addr.to_string(), client.clone());
        Ok(client)
    }

    /// Resolves one address via `discovery` and calls it.
    pub async fn call<A, R>(&self, method: &str, args: &A, reply: &mut R) -> Result<(), Error>
    where
        A: Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        let addr = self.discovery.get(self.mode).await?;
        let client = self.dial(&addr).await?;
        client.call(method, args, reply).await
    }

    /// Calls every address `discovery` currently knows about, concurrently.
    /// The first failure (dial or call) is recorded and short-circuits any
    /// address not yet dispatched; addresses already in flight are not
    /// forcibly aborted, only ignored once they resolve.
    ///
    /// `reply` is populated from the first address to answer successfully;
    /// later successes are discarded without decoding. Passing `None`
    /// discards every reply outright and skips decoding entirely — the
    /// call still happens, but nothing is ever materialized into `R`.
    pub async fn broadcast<A, R>(
        &self,
        method: &str,
        args: &A,
        mut reply: Option<&mut R>,
    ) -> Result<(), Error>
    where
        A: Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        let addrs = self.discovery.get_all().await;
        if addrs.is_empty() {
            return Err(Error::Rpc("rpc discovery: no available servers".into()));
        }

        // Arguments are encoded once (every cached client shares this
        // XClient's single negotiated codec) and the same bytes are fanned
        // out to every address, rather than re-running erased_serde once
        // per target.
        let body_bytes = encode_body(self.opt.codec_type, args)?;

        let error_slot: StdMutex<Option<Error>> = StdMutex::new(None);
        let reply_slot: StdMutex<Option<Vec<u8>>> = StdMutex::new(None);
        let cancelled = AtomicBool::new(false);
        let want_reply = reply.is_some();

        let tasks = addrs.into_iter().map(|addr| {
            let body_bytes = &body_bytes;
            let error_slot = &error_slot;
            let reply_slot = &reply_slot;
            let cancelled = &cancelled;
            async move {
                if cancelled.load(Ordering::Acquire) {
                    return;
                }
                let client = match self.dial(&addr).await {
                    Ok(c) => c,
                    Err(e) => {
                        record_first_error(error_slot, cancelled, e);
                        return;
                    }
                };
                if cancelled.load(Ordering::Acquire) {
                    return;
                }
                match client.call_raw(method, body_bytes).await {
                    Ok(bytes) => {
                        if want_reply {
                            let mut slot = reply_slot.lock().expect("xclient reply slot poisoned");
                            if slot.is_none() {
                                *slot = Some(bytes);
                            }
                        }
                    }
                    Err(e) => record_first_error(error_slot, cancelled, e),
                }
            }
        });

        // No `async_std::task::spawn` here: these futures borrow `self` and
        // `body_bytes`, so they're driven concurrently on the current task
        // via `join_all` rather than handed off to the executor, which
        // would require them to be `'static`.
        futures::future::join_all(tasks).await;

        if let Some(out) = reply.as_deref_mut() {
            if let Some(bytes) = reply_slot.into_inner().expect("xclient reply slot poisoned") {
                *out = decode_body(self.opt.codec_type, &bytes)?;
            }
        }

        match error_slot.into_inner().expect("xclient error slot poisoned") {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Closes every cached connection. Errors from individual closes
    /// (a peer that already dropped the connection, say) are logged, not
    /// propagated — the point of `close` is "stop using these", which
    /// holds regardless.
    pub async fn close(&self) {
        let mut guard = self.clients.lock().await;
        for (addr, client) in guard.drain() {
            if let Err(e) = client.close().await {
                log::debug!("rpc xclient: closing connection to {} failed: {}", addr, e);
            }
        }
    }
}

fn record_first_error(error_slot: &StdMutex<Option<Error>>, cancelled: &AtomicBool, e: Error) {
    let mut guard = error_slot.lock().expect("xclient error slot poisoned");
    if guard.is_none() {
        *guard = Some(e);
        cancelled.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::MultiServersDiscovery;

    #[async_std::test]
    async fn broadcast_with_no_servers_is_an_error() {
        let discovery = MultiServersDiscovery::new(Vec::new());
        let xclient = XClient::new(discovery, SelectMode::Random, HandshakeOption::default());
        let err = xclient
            .broadcast::<(), ()>("Arith.sum", &(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no available servers"));
    }

    #[async_std::test]
    async fn call_with_no_servers_is_an_error() {
        let discovery = MultiServersDiscovery::new(Vec::new());
        let xclient = XClient::new(discovery, SelectMode::RoundRobin, HandshakeOption::default());
        let mut reply = 0i64;
        let err = xclient
            .call("Arith.sum", &(), &mut reply)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no available servers"));
    }
}
