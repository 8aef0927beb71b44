//! `CONNECT`-based hijack tunnel (spec.md §4.4 / §6.2).
//!
//! A full HTTP stack (routing, headers, content negotiation) would be
//! pulling in a web framework to support exactly one hand-rolled verb, so
//! this reads the request line itself, at the raw socket level, the same
//! way `net/rpc`'s `http.Hijacker`-based tunnel does in the reference this
//! runtime is modelled on.

use crate::error::Error;
use crate::message::CONNECTED_BANNER;
use crate::transport::Stream;
use async_std::io::{BufReadExt, BufReader, WriteExt};
use async_std::net::TcpStream;

pub const CONNECT_METHOD: &str = "CONNECT";

/// Reads one request line off `stream`. On a matching `CONNECT <rpc_path>`,
/// writes the success banner and returns the raw stream ready for the
/// Option handshake. On anything else, writes `405` and returns `Ok(None)`
/// — the caller has nothing further to do with this connection.
pub async fn serve_http_connection(
    stream: TcpStream,
    rpc_path: &str,
) -> Result<Option<Box<dyn Stream>>, Error> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }

    let mut parts = line.trim_end().splitn(3, ' ');
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");

    let mut stream = reader.into_inner();
    if method != CONNECT_METHOD || path != rpc_path {
        log::debug!("rpc server: rejecting non-CONNECT request {:?}", line.trim_end());
        stream
            .write_all(b"HTTP/1.0 405 must CONNECT\r\n\r\n")
            .await?;
        stream.flush().await?;
        return Ok(None);
    }

    // Drain the rest of the CONNECT request's headers up to the blank line;
    // a real client sends none, but tolerate a well-formed one.
    let mut reader = BufReader::new(stream);
    loop {
        let mut header_line = String::new();
        let n = reader.read_line(&mut header_line).await?;
        if n == 0 || header_line.trim_end().is_empty() {
            break;
        }
    }
    let mut stream = reader.into_inner();

    stream
        .write_all(format!("{}\n\n", CONNECTED_BANNER).as_bytes())
        .await?;
    stream.flush().await?;

    Ok(Some(Box::new(stream)))
}
