//! Client concurrency engine: multiplexed calls over one duplex connection.

mod dial;

pub use dial::{dial, dial_timeout, xdial};

use crate::codec::{decode_body, Codec};
use crate::error::Error;
use crate::message::{CodecType, Header, HandshakeOption};
use futures::channel::{mpsc, oneshot};
use futures::lock::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

type PendingResult = Result<Vec<u8>, String>;

/// Everything the pending table needs to resolve one in-flight call: the
/// reply/terminal-error channel `PendingCall` awaits, plus the optional
/// caller-supplied completion notifier from `Go` (spec.md §4.5's `Call.done`).
struct PendingEntry {
    tx: oneshot::Sender<PendingResult>,
    done: Option<mpsc::Sender<u64>>,
}

type PendingMap = HashMap<u64, PendingEntry>;

struct ClientState {
    seq: u64,
    pending: PendingMap,
    closed: bool,
    shutdown: bool,
}

impl ClientState {
    fn new() -> Self {
        Self {
            seq: 1,
            pending: HashMap::new(),
            closed: false,
            shutdown: false,
        }
    }
}

/// A multiplexed RPC client. One receive-pump task is spawned per `Client`
/// for its whole lifetime; every `call`/`go` shares the same underlying
/// connection, correlated purely by `seq`.
pub struct Client {
    // Doubles as the spec's "send mutex": held across a full
    // `(header, body)` write so frames stay atomic, and also the only lock
    // the receive pump takes to read frames. Lock ordering throughout the
    // client is "this mutex before the state mutex", matching spec.md §5.
    codec: Arc<Mutex<Box<dyn Codec>>>,
    state: Arc<Mutex<ClientState>>,
    codec_type: CodecType,
}

/// A fire-and-forget handle returned by [`Client::go`]. Awaiting it
/// resolves once the matching reply (or a terminal error) arrives; it can
/// also be cancelled before that happens.
pub struct PendingCall<R> {
    seq: u64,
    codec_type: CodecType,
    rx: oneshot::Receiver<PendingResult>,
    state: Arc<Mutex<ClientState>>,
    _marker: PhantomData<R>,
}

impl<R: DeserializeOwned> PendingCall<R> {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Waits for the reply and decodes it as `R`.
    pub async fn result(self) -> Result<R, Error> {
        match self.rx.await {
            Ok(Ok(bytes)) => decode_body(self.codec_type, &bytes).map_err(Into::into),
            Ok(Err(msg)) => Err(Error::Rpc(msg)),
            Err(_) => Err(Error::Shutdown),
        }
    }

    /// Removes the call from the pending table and drops it. Any reply
    /// that later arrives for this `seq` is tolerated by the receive pump
    /// (it finds no matching pending entry and discards the body).
    pub async fn cancel(self) {
        let mut state = self.state.lock().await;
        state.pending.remove(&self.seq);
    }
}

impl Client {
    /// Wraps an already-handshaken stream: writes `opt`, negotiates the
    /// codec, and starts the background receive pump.
    pub async fn new(
        mut stream: Box<dyn crate::transport::Stream>,
        opt: HandshakeOption,
    ) -> Result<Self, Error> {
        use crate::transport::frame::FrameWrite;
        let buf = serde_json::to_vec(&opt)?;
        stream.write_frame(&buf).await?;

        let codec_type = opt.codec_type;
        let codec: Arc<Mutex<Box<dyn Codec>>> =
            Arc::new(Mutex::new(crate::codec::new_codec(codec_type, stream)));
        let state = Arc::new(Mutex::new(ClientState::new()));

        log::info!("rpc client: connected, codec={:?}", codec_type);
        async_std::task::spawn(receive_pump(codec.clone(), state.clone()));

        Ok(Self {
            codec,
            state,
            codec_type,
        })
    }

    /// Registers a pending call and writes its frame, returning immediately
    /// without waiting for the reply — the fire-and-forget primitive the
    /// synchronous `call` is built on top of.
    ///
    /// `done`, if supplied, is notified with the call's `seq` once its
    /// reply (or a terminal error) has been recorded — the Rust analogue of
    /// spec.md §4.5's `Call.done` channel, for callers that want to
    /// `select!` across many in-flight calls rather than await one
    /// `PendingCall` directly. Passing a zero-capacity channel is a
    /// programming error (spec.md §7 Misuse, boundary B1) and panics
    /// immediately, before anything is sent on the wire.
    pub async fn go<A, R>(
        &self,
        method: &str,
        args: &A,
        done: Option<mpsc::Sender<u64>>,
    ) -> Result<PendingCall<R>, Error>
    where
        A: Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        validate_done_capacity(&done);
        let (seq, rx) = self.send(method, args, done).await?;
        log::debug!("rpc client: dispatched {} (seq {})", method, seq);
        Ok(PendingCall {
            seq,
            codec_type: self.codec_type,
            rx,
            state: self.state.clone(),
            _marker: PhantomData,
        })
    }

    /// Blocks until the reply arrives, decoding it into `reply`.
    pub async fn call<A, R>(&self, method: &str, args: &A, reply: &mut R) -> Result<(), Error>
    where
        A: Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        // No external `done` is needed here: awaiting `pending.result()`
        // directly already gives capacity-1-equivalent completion
        // signalling, matching spec.md §4.5's "Call: Go with a fresh done
        // channel of capacity 1" without actually allocating one.
        let pending: PendingCall<R> = self.go(method, args, None).await?;
        *reply = pending.result().await?;
        Ok(())
    }

    /// Like `call`, but races the reply against a wall-clock deadline.
    /// On timeout, the call is removed from pending (any later reply is
    /// discarded by the receive pump) and a timeout error is returned.
    pub async fn call_timeout<A, R>(
        &self,
        method: &str,
        args: &A,
        reply: &mut R,
        timeout: Duration,
    ) -> Result<(), Error>
    where
        A: Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        let pending: PendingCall<R> = self.go(method, args, None).await?;
        let seq = pending.seq();
        let state = pending.state.clone();
        match async_std::future::timeout(timeout, pending.result()).await {
            Ok(res) => {
                *reply = res?;
                Ok(())
            }
            Err(_) => {
                let mut guard = state.lock().await;
                guard.pending.remove(&seq);
                drop(guard);
                log::warn!(
                    "rpc client: call (seq {}) timed out after {:?}",
                    seq,
                    timeout
                );
                Err(Error::Rpc(format!(
                    "rpc client: call failed: context deadline exceeded after {:?}",
                    timeout
                )))
            }
        }
    }

    async fn send<A: Serialize + Send + Sync>(
        &self,
        method: &str,
        args: &A,
        done: Option<mpsc::Sender<u64>>,
    ) -> Result<(u64, oneshot::Receiver<PendingResult>), Error> {
        let mut codec = self.codec.lock().await;

        let (seq, rx) = {
            let mut state = self.state.lock().await;
            if state.closed || state.shutdown {
                return Err(Error::Shutdown);
            }
            let seq = state.seq;
            state.seq += 1;
            let (tx, rx) = oneshot::channel();
            state.pending.insert(seq, PendingEntry { tx, done });
            (seq, rx)
        };

        let header = Header::new(method, seq);
        let write_result = async {
            codec.write_header(&header).await?;
            codec.write_body(args).await?;
            Ok::<(), Error>(())
        }
        .await;

        if let Err(e) = write_result {
            log::error!("rpc client: failed to write request (seq {}): {}", seq, e);
            let mut state = self.state.lock().await;
            if let Some(entry) = state.pending.remove(&seq) {
                let _ = entry.tx.send(Err(e.to_string()));
            }
            return Err(e);
        }

        Ok((seq, rx))
    }

    /// Like `send`, but for a body that's already been encoded for this
    /// client's negotiated codec (see [`crate::codec::encode_body`]) —
    /// `XClient::broadcast` uses this to encode its arguments once and
    /// reuse the bytes across every target address instead of re-running
    /// `erased_serde` per connection.
    async fn send_bytes(
        &self,
        method: &str,
        body_bytes: &[u8],
    ) -> Result<(u64, oneshot::Receiver<PendingResult>), Error> {
        let mut codec = self.codec.lock().await;

        let (seq, rx) = {
            let mut state = self.state.lock().await;
            if state.closed || state.shutdown {
                return Err(Error::Shutdown);
            }
            let seq = state.seq;
            state.seq += 1;
            let (tx, rx) = oneshot::channel();
            state.pending.insert(seq, PendingEntry { tx, done: None });
            (seq, rx)
        };

        let header = Header::new(method, seq);
        let write_result = async {
            codec.write_header(&header).await?;
            codec.write_body_bytes(body_bytes).await?;
            Ok::<(), Error>(())
        }
        .await;

        if let Err(e) = write_result {
            log::error!("rpc client: failed to write request (seq {}): {}", seq, e);
            let mut state = self.state.lock().await;
            if let Some(entry) = state.pending.remove(&seq) {
                let _ = entry.tx.send(Err(e.to_string()));
            }
            return Err(e);
        }

        Ok((seq, rx))
    }

    /// Fires a call with a pre-encoded body and returns the raw reply
    /// bytes, without decoding into any concrete type. Used where the
    /// caller may not need (or know) the reply type for every target, e.g.
    /// a broadcast whose caller passed no reply slot at all.
    pub async fn call_raw(&self, method: &str, body_bytes: &[u8]) -> Result<Vec<u8>, Error> {
        let (_, rx) = self.send_bytes(method, body_bytes).await?;
        match rx.await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(msg)) => Err(Error::Rpc(msg)),
            Err(_) => Err(Error::Shutdown),
        }
    }

    pub async fn is_available(&self) -> bool {
        let state = self.state.lock().await;
        !state.closed && !state.shutdown
    }

    /// Idempotent-rejecting: the first `close` succeeds, any further one
    /// returns the shutdown error.
    pub async fn close(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if state.closed {
            log::debug!("rpc client: close called on an already-closed client");
            return Err(Error::Shutdown);
        }
        state.closed = true;
        drop(state);
        log::info!("rpc client: closing connection");
        self.codec.lock().await.close().await
    }
}

/// Panics if `done` is `Some` and was constructed with zero capacity — the
/// Rust analogue of passing Go's `make(chan *Call)` (unbuffered) to `Go`
/// (spec.md §7 Misuse, boundary B1). Pulled out as a standalone function so
/// it can be unit-tested without a live connection.
fn validate_done_capacity(done: &Option<mpsc::Sender<u64>>) {
    if let Some(sender) = done {
        assert!(
            sender.capacity() > 0,
            "rpc client: Go called with an unbuffered done channel"
        );
    }
}

/// Reads replies off the wire for as long as the connection is healthy,
/// pairing each one to its pending call by `seq`. On a terminal read
/// error it calls `terminate_calls`, which is the only place both the
/// codec ("send") mutex and the state mutex are held together, always in
/// that order.
async fn receive_pump(codec: Arc<Mutex<Box<dyn Codec>>>, state: Arc<Mutex<ClientState>>) {
    loop {
        let header = {
            let mut c = codec.lock().await;
            c.read_header().await
        };
        let header = match header {
            None => {
                log::info!("rpc client: connection closed by peer");
                terminate_calls(&codec, &state, "rpc client: connection closed by peer".into())
                    .await;
                return;
            }
            Some(Ok(h)) => h,
            Some(Err(e)) => {
                log::error!("rpc client: codec error reading frame: {}", e);
                terminate_calls(&codec, &state, e.to_string()).await;
                return;
            }
        };

        let body_bytes = {
            let mut c = codec.lock().await;
            c.read_body_bytes().await
        };
        if let Err(e) = &body_bytes {
            log::error!("rpc client: codec error reading body (seq {}): {}", header.seq, e);
        }

        let mut st = state.lock().await;
        let entry = st.pending.remove(&header.seq);
        drop(st);

        let Some(entry) = entry else {
            // No matching pending call (already cancelled, or a stray
            // reply): the body was still consumed above, so just drop it.
            log::debug!(
                "rpc client: reply for seq {} had no waiting call (already cancelled)",
                header.seq
            );
            continue;
        };

        let result = if header.is_error() {
            Err(header.error)
        } else {
            match body_bytes {
                Ok(bytes) => Ok(bytes),
                Err(e) => Err(e.to_string()),
            }
        };

        if entry.tx.send(result).is_err() {
            log::error!(
                "rpc client: failed to deliver reply for seq {}: receiver already dropped",
                header.seq
            );
        }
        if let Some(mut done) = entry.done {
            if done.try_send(header.seq).is_err() {
                log::debug!(
                    "rpc client: done notification for seq {} discarded (full or dropped)",
                    header.seq
                );
            }
        }
    }
}

async fn terminate_calls(
    codec: &Arc<Mutex<Box<dyn Codec>>>,
    state: &Arc<Mutex<ClientState>>,
    err: String,
) {
    let _codec_guard = codec.lock().await;
    let mut st = state.lock().await;
    st.shutdown = true;
    let pending = std::mem::take(&mut st.pending);
    drop(st);

    if !pending.is_empty() {
        log::warn!(
            "rpc client: terminating {} pending call(s): {}",
            pending.len(),
            err
        );
    }
    for (seq, entry) in pending {
        if entry.tx.send(Err(err.clone())).is_err() {
            log::error!(
                "rpc client: failed to deliver termination error for seq {}: receiver already dropped",
                seq
            );
        }
        if let Some(mut done) = entry.done {
            let _ = done.try_send(seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CodecType;

    #[test]
    fn seq_starts_at_one_and_increments() {
        // Exercised indirectly through integration tests; this just pins
        // down the invariant that ClientState starts seq at 1.
        let state = ClientState::new();
        assert_eq!(state.seq, 1);
        let _ = CodecType::Json; // keep import alive under all cfgs
    }

    #[test]
    fn none_done_passes_validation() {
        validate_done_capacity(&None);
    }

    #[test]
    fn buffered_done_passes_validation() {
        let (tx, _rx) = mpsc::channel::<u64>(1);
        validate_done_capacity(&Some(tx));
    }

    #[test]
    #[should_panic(expected = "unbuffered done channel")]
    fn unbuffered_done_channel_is_misuse() {
        let (tx, _rx) = mpsc::channel::<u64>(0);
        validate_done_capacity(&Some(tx));
    }
}
