//! A pedagogical RPC runtime: pluggable `(header, body)` codecs over a
//! hand-rolled length-prefixed frame, a multiplexed async client, an HTTP
//! `CONNECT` tunnel for environments that only let HTTP traffic through, and
//! a small heartbeat-based registry with client-side service discovery and
//! load balancing on top.
//!
//! Start at [`server::Server`] and [`client::dial`]/[`client::Client`] for
//! the point-to-point runtime; [`registry`], [`discovery`] and [`xclient`]
//! layer service discovery and load balancing on top of it.

pub mod client;
pub mod codec;
pub mod defaults;
pub mod discovery;
pub mod error;
pub mod message;
pub mod registry;
pub mod server;
pub mod service;
pub mod transport;
pub mod xclient;

// Re-exported so that code generated by `impl_service!` (invoked from a
// downstream crate, where `$crate` resolves to this one) can reach
// `$crate::async_trait::async_trait` and `$crate::erased_serde::Serialize`
// without the caller needing its own direct dependency on either crate.
pub use async_trait;
pub use erased_serde;

pub use client::{dial, dial_timeout, xdial, Client};
pub use discovery::{Discovery, MultiServersDiscovery, RegistryDiscovery, SelectMode};
pub use error::{Error, RpcError};
pub use message::{CodecType, HandshakeOption};
pub use registry::Registry;
pub use server::{Server, ServerBuilder};
pub use xclient::XClient;
