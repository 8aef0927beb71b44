//! Wire-level records: the per-frame `Header` and the connection-opening
//! `HandshakeOption`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 24-bit sentinel identifying this protocol. Not configurable: the
/// reference implementation this runtime is modelled on overwrites whatever
/// value a caller supplies, so we don't expose a way to change it at all.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Default RPC path used by the HTTP CONNECT tunnel.
pub const DEFAULT_RPC_PATH: &str = "/_myRPC_";

/// Success banner written after a successful `CONNECT`.
pub const CONNECTED_BANNER: &str = "HTTP/1.0 200 Connected to myRPC";

/// Names one entry of the codec registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecType {
    Json,
    Bincode,
}

impl Default for CodecType {
    fn default() -> Self {
        CodecType::Json
    }
}

/// Connection-level handshake record. The first thing written on every
/// accepted connection, stream or tunnelled, before any `(Header, Body)`
/// frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeOption {
    pub magic_number: u32,
    pub codec_type: CodecType,
    /// Zero means "no deadline".
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
    /// Zero means "no deadline".
    #[serde(with = "duration_millis")]
    pub handle_timeout: Duration,
}

impl Default for HandshakeOption {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: CodecType::default(),
            connect_timeout: Duration::from_secs(10),
            handle_timeout: Duration::from_secs(0),
        }
    }
}

impl HandshakeOption {
    /// Parses an option off the wire, enforcing the non-configurability of
    /// `magic_number` (spec.md §9 open question): whatever value arrives is
    /// checked against the canonical sentinel, never adopted.
    pub fn validate(&self) -> bool {
        self.magic_number == MAGIC_NUMBER
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Per-frame header shared by requests and responses. `seq` is the sole
/// correlator between a client's outgoing call and its eventual reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    pub service_method: String,
    pub seq: u64,
    /// Empty on success. Carries a rendered `RpcError` (or transport-level
    /// message) otherwise.
    pub error: String,
}

impl Header {
    pub fn new(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_round_trips_through_json() {
        let opt = HandshakeOption::default();
        let encoded = serde_json::to_string(&opt).unwrap();
        let decoded: HandshakeOption = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.validate());
        assert_eq!(decoded.codec_type, CodecType::Json);
    }

    #[test]
    fn tampered_magic_number_fails_validation() {
        let mut opt = HandshakeOption::default();
        opt.magic_number = 0xdead;
        assert!(!opt.validate());
    }
}
