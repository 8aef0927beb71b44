use super::Codec;
use crate::error::Error;
use crate::message::{CodecType, Header};
use crate::transport::frame::{FrameRead, FrameWrite};
use crate::transport::Stream;
use async_trait::async_trait;
use bincode::Options;

fn bincode_options() -> impl bincode::Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// A second, binary codec behind the same [`Codec`] trait, so the codec
/// registry actually demonstrates the plugin point rather than having
/// exactly one working entry.
pub struct BincodeCodec {
    stream: Box<dyn Stream>,
}

impl BincodeCodec {
    pub fn new(stream: Box<dyn Stream>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Codec for BincodeCodec {
    fn codec_type(&self) -> CodecType {
        CodecType::Bincode
    }

    async fn read_header(&mut self) -> Option<Result<Header, Error>> {
        let payload = match self.stream.read_frame().await? {
            Ok(p) => p,
            Err(e) => return Some(Err(e)),
        };
        Some(
            bincode_options()
                .deserialize(&payload)
                .map_err(Error::from),
        )
    }

    async fn read_body_bytes(&mut self) -> Result<Vec<u8>, Error> {
        self.stream
            .read_frame()
            .await
            .ok_or_else(|| Error::Rpc("rpc: unexpected EOF reading body".into()))?
    }

    async fn write_header(&mut self, header: &Header) -> Result<(), Error> {
        let buf = bincode_options().serialize(header)?;
        self.stream.write_frame(&buf).await
    }

    async fn write_body(
        &mut self,
        body: &(dyn erased_serde::Serialize + Send + Sync),
    ) -> Result<(), Error> {
        let mut buf = Vec::new();
        let mut ser = bincode::Serializer::new(&mut buf, bincode_options());
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
