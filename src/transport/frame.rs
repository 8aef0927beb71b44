//! Length-prefixed framing shared by every codec. A frame is a single sync
//! byte, a big-endian `u32` payload length, then the payload itself — the
//! same "magic byte + fixed header + payload" shape the handshake uses one
//! level up, just sized for one `(Header, Body)` half-frame at a time.

use crate::error::Error;
use async_std::io::{ReadExt, WriteExt};
use async_trait::async_trait;

/// Low byte of [`crate::message::MAGIC_NUMBER`]; reused here purely as a
/// frame-sync sentinel so a desynced reader fails fast instead of
/// interpreting garbage as a length.
const FRAME_SYNC: u8 = 0x5c;

const MAX_PAYLOAD_LEN: u32 = 64 * 1024 * 1024;

#[async_trait]
pub trait FrameRead {
    /// `None` signals a clean EOF (no bytes at all were available for the
    /// sync byte); `Some(Err(_))` signals a mid-frame transport error.
    async fn read_frame(&mut self) -> Option<Result<Vec<u8>, Error>>;
}

#[async_trait]
pub trait FrameWrite {
    async fn write_frame(&mut self, payload: &[u8]) -> Result<(), Error>;
}

#[async_trait]
impl<R: async_std::io::Read + Unpin + Send> FrameRead for R {
    async fn read_frame(&mut self) -> Option<Result<Vec<u8>, Error>> {
        let mut sync = [0u8; 1];
        match self.read_exact(&mut sync).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e.into())),
        }
        if sync[0] != FRAME_SYNC {
            return Some(Err(Error::Rpc(format!(
                "rpc: frame sync byte mismatch, expected {:#x} found {:#x}",
                FRAME_SYNC, sync[0]
            ))));
        }

        let mut len_buf = [0u8; 4];
        if let Err(e) = self.read_exact(&mut len_buf).await {
            return Some(Err(e.into()));
        }
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_PAYLOAD_LEN {
            return Some(Err(Error::Rpc(format!(
                "rpc: frame payload length {} exceeds maximum {}",
                len, MAX_PAYLOAD_LEN
            ))));
        }

        let mut payload = vec![0u8; len as usize];
        if let Err(e) = self.read_exact(&mut payload).await {
            return Some(Err(e.into()));
        }
        Some(Ok(payload))
    }
}

#[async_trait]
impl<W: async_std::io::Write + Unpin + Send> FrameWrite for W {
    async fn write_frame(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() as u64 > MAX_PAYLOAD_LEN as u64 {
            return Err(Error::Rpc(format!(
                "rpc: frame payload length {} exceeds maximum {}",
                payload.len(),
                MAX_PAYLOAD_LEN
            )));
        }
        self.write_all(&[FRAME_SYNC]).await?;
        self.write_all(&(payload.len() as u32).to_be_bytes())
            .await?;
        self.write_all(payload).await?;
        self.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::io::Cursor;

    #[async_std::test]
    async fn round_trips_a_payload() {
        let mut buf = Vec::new();
        buf.write_frame(b"hello world").await.unwrap();

        let mut cursor = Cursor::new(buf);
        let payload = cursor.read_frame().await.unwrap().unwrap();
        assert_eq!(payload, b"hello world");
    }

    #[async_std::test]
    async fn clean_eof_before_any_byte_returns_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(cursor.read_frame().await.is_none());
    }

    #[async_std::test]
    async fn bad_sync_byte_is_an_error() {
        let mut cursor = Cursor::new(vec![0xffu8, 0, 0, 0, 0]);
        assert!(cursor.read_frame().await.unwrap().is_err());
    }
}
