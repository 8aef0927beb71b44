pub mod frame;

use async_std::io::{Read, Write};

/// A duplex byte stream usable as the underlying transport for a codec:
/// a plain TCP/Unix socket, or the raw stream handed back after an HTTP
/// `CONNECT` hijack.
pub trait Stream: Read + Write + Send + Unpin + 'static {}
impl<T: Read + Write + Send + Unpin + 'static> Stream for T {}
