//! Pluggable (header, body) framing over a byte stream.
//!
//! A `Codec` owns a connected [`crate::transport::Stream`] and exposes a
//! small, fixed, object-safe capability set so that server and client code
//! never has to know which wire format is actually in play. Decoding the
//! request/reply *body* into a concrete user type is deliberately kept out
//! of this trait (see [`decode_body`]) — the codec only ever hands back
//! raw bytes plus the tag identifying how they were encoded, and the caller
//! (service dispatch on the server, the waiting `Call` on the client)
//! decodes once it knows the target type.

mod bincode_codec;
mod json;

use crate::error::Error;
use crate::message::{CodecType, Header};
use crate::transport::Stream;
use async_trait::async_trait;
use serde::de::DeserializeOwned;

pub use bincode_codec::BincodeCodec;
pub use json::JsonCodec;

#[async_trait]
pub trait Codec: Send {
    fn codec_type(&self) -> CodecType;

    /// `None` means a clean EOF between frames; `Some(Err(_))` a transport
    /// or decode error partway through one.
    async fn read_header(&mut self) -> Option<Result<Header, Error>>;

    /// Raw, still-encoded body bytes for the frame whose header was just
    /// read. Must always be called exactly once per `read_header` that
    /// returned `Some(Ok(_))`, even if the body is going to be discarded.
    async fn read_body_bytes(&mut self) -> Result<Vec<u8>, Error>;

    async fn write_header(&mut self, header: &Header) -> Result<(), Error>;

    async fn write_body(
        &mut self,
        body: &(dyn erased_serde::Serialize + Send + Sync),
    ) -> Result<(), Error>;

    /// Writes a body that has already been encoded for this exact codec
    /// (see [`encode_body`]), skipping a second encode pass. Used by
    /// `XClient::broadcast`, which encodes its arguments once and fans the
    /// same bytes out to every target address.
    async fn write_body_bytes(&mut self, bytes: &[u8]) -> Result<(), Error>;

    async fn close(&mut self) -> Result<(), Error>;
}

/// Constructs a codec of the negotiated type around an already-handshaken
/// stream. This is the "registry maps `CodecType` -> constructor" half of
/// the handshake contract; `JsonCodec` is the default entry.
pub fn new_codec(codec_type: CodecType, stream: Box<dyn Stream>) -> Box<dyn Codec> {
    match codec_type {
        CodecType::Json => Box::new(JsonCodec::new(stream)),
        CodecType::Bincode => Box::new(BincodeCodec::new(stream)),
    }
}

/// Decodes raw body bytes into a concrete type using whichever codec
/// produced them. Call sites know `T` (the method's declared Arg or Reply
/// type); the codec only ever deals in bytes.
pub fn decode_body<T: DeserializeOwned>(codec_type: CodecType, bytes: &[u8]) -> Result<T, Error> {
    match codec_type {
        CodecType::Json => Ok(serde_json::from_slice(bytes)?),
        CodecType::Bincode => Ok(bincode::deserialize(bytes)?),
    }
}

/// Encodes a value into raw body bytes for the given codec, used when a
/// caller already has a concrete type and just wants bytes without going
/// through a live `Codec` (e.g. re-encoding a cached reply).
pub fn encode_body<T: serde::Serialize>(codec_type: CodecType, value: &T) -> Result<Vec<u8>, Error> {
    match codec_type {
        CodecType::Json => Ok(serde_json::to_vec(value)?),
        CodecType::Bincode => Ok(bincode::serialize(value)?),
    }
}
