use serde::{Deserialize, Serialize};

/// Errors surfaced on the wire as `Header.error` text.
///
/// These are the only error shapes a server ever sends back to a client;
/// everything else (handshake failures, transport drops) stays local to
/// whichever side observed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RpcError {
    /// `service.method` did not parse as `"Service.Method"`.
    IllFormedRequest(String),
    /// No service registered under this name.
    ServiceNotFound(String),
    /// Service exists, but has no method by this name.
    MethodNotFound(String),
    /// The request body failed to decode as the method's argument type.
    InvalidArgs(String),
    /// The invoked method returned an application-level error.
    Application(String),
    /// The server synthesised this response because `handle_timeout` elapsed.
    HandleTimeout,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::IllFormedRequest(s) => {
                write!(f, "rpc server: service/method request ill-formed: {}", s)
            }
            RpcError::ServiceNotFound(s) => write!(f, "rpc server: can't find service {}", s),
            RpcError::MethodNotFound(s) => write!(f, "rpc server: can't find method {}", s),
            RpcError::InvalidArgs(s) => write!(f, "rpc server: invalid arguments: {}", s),
            RpcError::Application(s) => write!(f, "{}", s),
            RpcError::HandleTimeout => write!(f, "rpc server: request handle timeout"),
        }
    }
}

impl std::error::Error for RpcError {}

/// Crate-wide error type.
///
/// `Rpc` carries a pre-rendered message rather than an `RpcError` because
/// most of its variants (timeouts, shutdown, dial failures) never touch the
/// wire and have no business being `(de)serializable`.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Codec(Box<dyn std::error::Error + Send + Sync>),
    /// Any of the stable error-surface strings from the spec: connect
    /// timeout, call failure, shutdown, cancellation, handshake mismatch.
    Rpc(String),
    /// A remote method call returned a non-nil error, or the server
    /// couldn't resolve service/method; carries the structured cause.
    Remote(RpcError),
    /// The client is shut down; no further calls may be registered.
    Shutdown,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => e.fmt(f),
            Error::Codec(e) => e.fmt(f),
            Error::Rpc(s) => write!(f, "{}", s),
            Error::Remote(e) => write!(f, "rpc client: call failed: {}", e),
            Error::Shutdown => write!(f, "connection is shut down"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Codec(e) => Some(e.as_ref()),
            Error::Rpc(_) => None,
            Error::Remote(e) => Some(e),
            Error::Shutdown => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec(Box::new(err))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Codec(Box::new(err))
    }
}

impl From<RpcError> for Error {
    fn from(err: RpcError) -> Self {
        Error::Remote(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_renders_call_failed_prefix() {
        let e = Error::Remote(RpcError::MethodNotFound("Arith.Sub".into()));
        assert_eq!(
            e.to_string(),
            "rpc client: call failed: rpc server: can't find method Arith.Sub"
        );
    }

    #[test]
    fn shutdown_error_message() {
        assert_eq!(Error::Shutdown.to_string(), "connection is shut down");
    }
}
