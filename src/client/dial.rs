//! Connection establishment: plain dial, connect-timeout-bounded dial, and
//! the `protocol@addr` dispatcher.

use super::Client;
use crate::error::Error;
use crate::message::{HandshakeOption, CONNECTED_BANNER, DEFAULT_RPC_PATH};
use async_std::io::{BufReadExt, BufReader, WriteExt};
use async_std::net::TcpStream;
use futures::channel::oneshot;

/// Dials `addr` and runs the handshake, bounding the whole operation by
/// `opt.connect_timeout` (see [`dial_timeout`] for the zero-timeout case).
pub async fn dial(addr: &str, opt: HandshakeOption) -> Result<Client, Error> {
    dial_timeout(addr, opt).await
}

/// Connects to `addr` and constructs a [`Client`], bounding the whole
/// operation (TCP connect *and* the handshake/codec setup that
/// `Client::new` performs) by `opt.connect_timeout`.
///
/// `connect_timeout == 0` means "no deadline": no timer task is spawned at
/// all, and this simply awaits the connect + setup directly — it really
/// will block forever against a blackhole address, matching spec.md §8 B3.
///
/// Otherwise, setup runs on a spawned task that hands the finished
/// `Client` back over a oneshot channel. If the deadline fires first, the
/// parent drops its receiver; the still-running task's later `send` on
/// that channel is then just an ignored error — the leak-free hand-off
/// idiom from spec.md §9, realised via the channel's own drop semantics
/// rather than a second, bespoke "parent departed" signal.
pub async fn dial_timeout(addr: &str, opt: HandshakeOption) -> Result<Client, Error> {
    let connect_timeout = opt.connect_timeout;
    let addr = addr.to_string();

    if connect_timeout.as_nanos() == 0 {
        log::debug!("rpc client: dialing {} (no connect timeout)", addr);
        let stream = TcpStream::connect(&addr).await?;
        return Client::new(Box::new(stream), opt).await;
    }

    log::debug!("rpc client: dialing {} (timeout {:?})", addr, connect_timeout);
    let (tx, rx) = oneshot::channel();
    let setup_opt = opt.clone();
    let spawn_addr = addr.clone();
    async_std::task::spawn(async move {
        let result = async {
            let stream = TcpStream::connect(&spawn_addr).await?;
            Client::new(Box::new(stream), setup_opt).await
        }
        .await;
        if tx.send(result).is_err() {
            log::error!(
                "rpc client: dial of {} finished after the caller gave up waiting",
                spawn_addr
            );
        }
    });

    match async_std::future::timeout(connect_timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(Error::Rpc(
            "rpc client: connection setup task vanished".into(),
        )),
        Err(_) => {
            log::warn!(
                "rpc client: connect to {} timed out after {:?}",
                addr,
                connect_timeout
            );
            Err(Error::Rpc(format!(
                "rpc client: connect timeout: expect within {:?}",
                connect_timeout
            )))
        }
    }
}

/// Parses `protocol@addr` and dials either the HTTP `CONNECT` tunnel
/// (`protocol == "http"`) or a plain stream connection (anything else,
/// treated as a TCP-style address — the pedagogical scope of this runtime
/// doesn't stretch to also supporting Unix-domain sockets generically).
pub async fn xdial(rpc_addr: &str) -> Result<Client, Error> {
    xdial_with_option(rpc_addr, HandshakeOption::default()).await
}

pub async fn xdial_with_option(rpc_addr: &str, opt: HandshakeOption) -> Result<Client, Error> {
    let (protocol, addr) = rpc_addr.split_once('@').ok_or_else(|| {
        Error::Rpc(format!(
            "rpc client: ill-formed address, expected protocol@addr: {}",
            rpc_addr
        ))
    })?;

    if protocol == "http" {
        dial_http(addr, opt).await
    } else {
        dial_timeout(addr, opt).await
    }
}

/// Dials the default RPC path over an HTTP `CONNECT` tunnel.
pub async fn dial_http(addr: &str, opt: HandshakeOption) -> Result<Client, Error> {
    dial_http_path(addr, DEFAULT_RPC_PATH, opt).await
}

pub async fn dial_http_path(addr: &str, rpc_path: &str, opt: HandshakeOption) -> Result<Client, Error> {
    log::debug!("rpc client: dialing {} over HTTP CONNECT ({})", addr, rpc_path);
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!("CONNECT {} HTTP/1.0\r\n\r\n", rpc_path);
    stream.write_all(request.as_bytes()).await?;

    let mut reader = BufReader::new(stream);
    let mut status_line = String::new();
    reader.read_line(&mut status_line).await?;
    if !status_line.trim_end().contains(CONNECTED_BANNER) {
        log::error!(
            "rpc client: CONNECT to {} rejected: {}",
            addr,
            status_line.trim_end()
        );
        return Err(Error::Rpc(format!(
            "rpc client: unexpected response to CONNECT: {}",
            status_line.trim_end()
        )));
    }

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line.trim_end().is_empty() {
            break;
        }
    }

    let stream = reader.into_inner();
    Client::new(Box::new(stream), opt).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdial_rejects_addresses_without_a_protocol() {
        let res = async_std::task::block_on(xdial("127.0.0.1:1234"));
        assert!(res.is_err());
    }
}
