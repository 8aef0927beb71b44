use super::Codec;
use crate::error::Error;
use crate::message::{CodecType, Header};
use crate::transport::frame::{FrameRead, FrameWrite};
use crate::transport::Stream;
use async_trait::async_trait;

/// The default codec entry: newline-free, length-prefixed JSON frames.
/// JSON is the canonical "codec-independent self-delimiting encoding" the
/// handshake itself is bootstrapped with (see [`crate::client::write_handshake`]),
/// so this codec is mostly the handshake's encoding applied to every
/// subsequent frame too.
pub struct JsonCodec {
    stream: Box<dyn Stream>,
}

impl JsonCodec {
    pub fn new(stream: Box<dyn Stream>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Codec for JsonCodec {
    fn codec_type(&self) -> CodecType {
        CodecType::Json
    }

    async fn read_header(&mut self) -> Option<Result<Header, Error>> {
        let payload = match self.stream.read_frame().await? {
            Ok(p) => p,
            Err(e) => return Some(Err(e)),
        };
        Some(serde_json::from_slice(&payload).map_err(Error::from))
    }

    async fn read_body_bytes(&mut self) -> Result<Vec<u8>, Error> {
        self.stream
            .read_frame()
            .await
            .ok_or_else(|| Error::Rpc("rpc: unexpected EOF reading body".into()))?
    }

    async fn write_header(&mut self, header: &Header) -> Result<(), Error> {
        let buf = serde_json::to_vec(header)?;
        self.stream.write_frame(&buf).await
    }

    async fn write_body(
        &mut self,
        body: &(dyn erased_serde::Serialize + Send + Sync),
    ) -> Result<(), Error> {
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::new(&mut buf);
        erased_serde::serialize(body, &mut ser).map_err(|e| Error::Codec(Box::new(e)))?;
        self.stream.write_frame(&buf).await
    }

    async fn write_body_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.stream.write_frame(bytes).await
    }

    async fn close(&mut self) -> Result<(), Error> {
        use async_std::io::WriteExt;
        self.stream.close().await?;
        Ok(())
    }
}
