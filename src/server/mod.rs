//! Server dispatch engine: accept, handshake, read/dispatch/reply.

mod http;

pub use http::{CONNECT_METHOD, serve_http_connection};

use crate::codec::{new_codec, Codec};
use crate::error::{Error, RpcError};
use crate::message::{Header, HandshakeOption};
use crate::service::Service;
use crate::transport::frame::{FrameRead, FrameWrite};
use crate::transport::Stream;
use async_std::net::{TcpListener, TcpStream};
use async_std::sync::Mutex;
use async_std::task;
use futures::channel::oneshot;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

struct ServiceEntry {
    service: Arc<dyn Service>,
    counters: HashMap<String, AtomicU64>,
}

type ServiceMap = RwLock<HashMap<String, Arc<ServiceEntry>>>;

/// Holds every registered [`Service`] keyed by name. Cheaply cloneable
/// (internally `Arc`-wrapped), so `accept` can hand a copy to each
/// connection task without the caller needing to wrap `Server` itself in
/// an `Arc`.
pub struct Server {
    services: Arc<ServiceMap>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Registers a service object. Rejects duplicate registration under
    /// the same service name.
    pub fn register(&self, service: Arc<dyn Service>) -> Result<(), Error> {
        let name = service.name();
        let mut counters = HashMap::new();
        for method in service.method_names() {
            counters.insert((*method).to_string(), AtomicU64::new(0));
        }
        let entry = Arc::new(ServiceEntry { service, counters });

        let mut guard = self
            .services
            .write()
            .expect("service registry lock poisoned");
        if guard.contains_key(name) {
            return Err(Error::Rpc(format!(
                "rpc server: service already defined: {}",
                name
            )));
        }
        guard.insert(name.to_string(), entry);
        Ok(())
    }

    /// Current call count for `"Service.method"`, or `None` if unknown.
    /// Exposed mainly for tests that want to assert dispatch actually
    /// happened without round-tripping through a client.
    pub fn call_count(&self, service_method: &str) -> Option<u64> {
        let pos = service_method.rfind('.')?;
        let (service_name, method) = (&service_method[..pos], &service_method[pos + 1..]);
        let guard = self.services.read().expect("service registry lock poisoned");
        let entry = guard.get(service_name)?;
        Some(entry.counters.get(method)?.load(Ordering::Relaxed))
    }

    /// Accepts connections on a plain TCP listener, handshaking each one
    /// with `opt` and spawning one serve-loop task per connection.
    pub async fn accept(&self, listener: TcpListener, opt: HandshakeOption) -> Result<(), Error> {
        let mut incoming = listener.incoming();
        while let Some(conn) = incoming.next().await {
            let stream = conn?;
            let peer = stream.peer_addr().ok();
            log::info!("rpc server: accepted connection from {:?}", peer);
            let services = self.services.clone();
            let opt = opt.clone();
            task::spawn(async move {
                if let Err(e) = serve_connection(Box::new(stream), services, opt).await {
                    log::debug!("rpc server: connection from {:?} ended: {}", peer, e);
                }
            });
        }
        Ok(())
    }

    /// Accepts connections that arrive as `CONNECT <path> HTTP/1.0` tunnels
    /// (see [`http`]) in addition to the handshake each tunnelled stream
    /// still has to pass.
    pub async fn accept_http(
        &self,
        listener: TcpListener,
        opt: HandshakeOption,
        rpc_path: &'static str,
    ) -> Result<(), Error> {
        let mut incoming = listener.incoming();
        while let Some(conn) = incoming.next().await {
            let stream = conn?;
            let services = self.services.clone();
            let opt = opt.clone();
            task::spawn(async move {
                match serve_http_connection(stream, rpc_path).await {
                    Ok(Some(tunnelled)) => {
                        if let Err(e) = serve_connection(tunnelled, services, opt).await {
                            log::debug!("rpc server: tunnelled connection ended: {}", e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => log::debug!("rpc server: http tunnel failed: {}", e),
                }
            });
        }
        Ok(())
    }

    /// Serves a single already-connected stream, e.g. one obtained outside
    /// of `accept`'s own loop.
    pub async fn serve_conn(&self, stream: TcpStream, opt: HandshakeOption) -> Result<(), Error> {
        serve_connection(Box::new(stream), self.services.clone(), opt).await
    }
}

pub struct ServerBuilder {
    services: Vec<Arc<dyn Service>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
        }
    }

    pub fn register(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    pub fn build(self) -> Result<Server, Error> {
        let server = Server::new();
        for service in self.services {
            server.register(service)?;
        }
        Ok(server)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_handshake(stream: &mut Box<dyn Stream>) -> Result<HandshakeOption, Error> {
    let payload = stream
        .read_frame()
        .await
        .ok_or_else(|| Error::Rpc("rpc server: connection closed before handshake".into()))??;
    Ok(serde_json::from_slice(&payload)?)
}

async fn serve_connection(
    mut stream: Box<dyn Stream>,
    services: Arc<ServiceMap>,
    _default_opt: HandshakeOption,
) -> Result<(), Error> {
    let opt = read_handshake(&mut stream).await?;
    if !opt.validate() {
        log::warn!("rpc server: bad magic number, closing connection");
        return Err(Error::Rpc("rpc server: bad magic number in handshake".into()));
    }

    let codec: Arc<Mutex<Box<dyn Codec>>> = Arc::new(Mutex::new(new_codec(opt.codec_type, stream)));
    let handle_timeout = opt.handle_timeout;

    let mut handlers = Vec::new();
    loop {
        let header = {
            let mut c = codec.lock().await;
            c.read_header().await
        };
        let header = match header {
            None => break,
            Some(Ok(h)) => h,
            Some(Err(e)) => {
                log::debug!("rpc server: header read error: {}", e);
                break;
            }
        };

        let body_bytes = {
            let mut c = codec.lock().await;
            c.read_body_bytes().await
        };
        let body_bytes = match body_bytes {
            Ok(b) => b,
            Err(e) => {
                log::debug!("rpc server: body read error: {}", e);
                break;
            }
        };

        let services = services.clone();
        let codec_handle = codec.clone();
        handlers.push(task::spawn(handle_request(
            header,
            body_bytes,
            services,
            codec_handle,
            handle_timeout,
        )));
    }

    for handler in handlers {
        handler.await;
    }

    codec.lock().await.close().await?;
    Ok(())
}

type DispatchReply = Box<dyn erased_serde::Serialize + Send + Sync>;

fn invalid_reply() -> DispatchReply {
    Box::new(())
}

async fn dispatch(
    services: &ServiceMap,
    header: &Header,
    codec_type: crate::message::CodecType,
    body_bytes: &[u8],
) -> (String, DispatchReply) {
    let pos = match header.service_method.rfind('.') {
        Some(p) => p,
        None => {
            return (
                RpcError::IllFormedRequest(header.service_method.clone()).to_string(),
                invalid_reply(),
            )
        }
    };
    let service_name = &header.service_method[..pos];
    let method_name = &header.service_method[pos + 1..];

    let entry = {
        let guard = services.read().expect("service registry lock poisoned");
        guard.get(service_name).cloned()
    };
    let entry = match entry {
        Some(e) => e,
        None => {
            return (
                RpcError::ServiceNotFound(service_name.to_string()).to_string(),
                invalid_reply(),
            )
        }
    };

    match entry.service.call(method_name, codec_type, body_bytes).await {
        Ok(reply) => {
            if let Some(counter) = entry.counters.get(method_name) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            (String::new(), reply)
        }
        Err(e) => (e.to_string(), invalid_reply()),
    }
}

/// Runs one request to completion on a spawned task and races it against
/// `handle_timeout`. The oneshot channel's own drop-on-timeout behaviour is
/// this function's instance of the leak-free hand-off idiom (spec.md §9):
/// if the timeout arm wins, `rx` is dropped, and the still-running worker's
/// later `tx.send(..)` simply fails and is discarded — it never blocks.
async fn handle_request(
    header: Header,
    body_bytes: Vec<u8>,
    services: Arc<ServiceMap>,
    codec: Arc<Mutex<Box<dyn Codec>>>,
    handle_timeout: Duration,
) {
    let seq = header.seq;
    let service_method = header.service_method.clone();
    let codec_type = { codec.lock().await.codec_type() };

    let (tx, rx) = oneshot::channel::<(String, DispatchReply)>();
    task::spawn(async move {
        let result = dispatch(&services, &header, codec_type, &body_bytes).await;
        let _ = tx.send(result);
    });

    let outcome = if handle_timeout.as_nanos() == 0 {
        rx.await.ok()
    } else {
        async_std::future::timeout(handle_timeout, rx)
            .await
            .ok()
            .and_then(|r| r.ok())
    };

    let (error, reply) = match outcome {
        Some(pair) => pair,
        None => {
            log::warn!(
                "rpc server: handler for {} (seq {}) timed out",
                service_method,
                seq
            );
            (RpcError::HandleTimeout.to_string(), invalid_reply())
        }
    };

    let resp_header = Header {
        service_method,
        seq,
        error,
    };

    let mut c = codec.lock().await;
    if let Err(e) = c.write_header(&resp_header).await {
        log::error!("rpc server: failed to write response header: {}", e);
        return;
    }
    if let Err(e) = c.write_body(&*reply).await {
        log::error!("rpc server: failed to write response body: {}", e);
    }
}
