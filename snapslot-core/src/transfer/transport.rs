//! Encrypted transport: plaintext stream → cipher → remote file.
//!
//! The cipher writes into one end of a bounded in-memory pipe while the
//! gateway uploads from the other, so neither plaintext nor ciphertext is
//! ever stored as a whole.

use crate::crypto::Cipher;
use crate::remote::RemoteGateway;
use crate::utils::errors::Result;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;

/// Bytes moved by one [`EncryptedTransport::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sent {
    /// Ciphertext produced by the cipher
    pub encrypted: u64,
    /// Bytes stored remotely
    pub uploaded: u64,
}

pub struct EncryptedTransport<'a> {
    gateway: &'a dyn RemoteGateway,
    cipher: &'a dyn Cipher,
    pipe_capacity: usize,
}

impl<'a> EncryptedTransport<'a> {
    pub fn new(gateway: &'a dyn RemoteGateway, cipher: &'a dyn Cipher, pipe_capacity: usize) -> Self {
        Self {
            gateway,
            cipher,
            pipe_capacity,
        }
    }

    /// Encrypt `plaintext` into a newly created remote file at `destination`.
    ///
    /// On error the remote file may exist partially written; callers must
    /// never reference it from a sidecar.
    pub async fn send<R>(&self, plaintext: &mut R, destination: &str) -> Result<Sent>
    where
        R: AsyncRead + Send + Unpin,
    {
        debug!("Streaming encrypted data to {}", destination);
        let (mut writer, reader) = tokio::io::duplex(self.pipe_capacity);

        let encrypt = async {
            let written = self.cipher.encrypt(&mut *plaintext, &mut writer).await;
            // Close the pipe even on failure so the upload side sees EOF.
            let _ = writer.shutdown().await;
            written
        };
        let upload = self.gateway.write_stream(destination, Box::new(reader));

        let (encrypted, uploaded) = tokio::try_join!(encrypt, upload)?;
        Ok(Sent {
            encrypted,
            uploaded,
        })
    }

    /// Stream the remote file at `source` through decryption into `output`.
    pub async fn receive<W>(&self, source: &str, output: &mut W) -> Result<u64>
    where
        W: tokio::io::AsyncWrite + Send + Unpin,
    {
        let (writer, mut reader) = tokio::io::duplex(self.pipe_capacity);

        let download = self.gateway.read_stream(source, Box::new(writer));
        let decrypt = self.cipher.decrypt(&mut reader, output);

        let (_, written) = tokio::try_join!(download, decrypt)?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MemoryGateway, RecordingCipher};
    use crate::SnapError;

    #[tokio::test]
    async fn test_send_streams_through_small_pipe() -> Result<()> {
        let gateway = MemoryGateway::new();
        gateway.insert_dir("backups/2024-03-01");
        let cipher = RecordingCipher::new();
        let transport = EncryptedTransport::new(&gateway, &cipher, 16);

        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 7) as u8).collect();
        let sent = transport
            .send(&mut data.as_slice(), "backups/2024-03-01/a.tar.gpg")
            .await?;

        assert_eq!(sent.encrypted, data.len() as u64);
        assert_eq!(sent.uploaded, data.len() as u64);
        assert_eq!(gateway.file("backups/2024-03-01/a.tar.gpg"), Some(data.clone()));
        assert_eq!(cipher.plaintexts(), vec![data]);
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_failure_is_reported() {
        let gateway = MemoryGateway::new();
        gateway.insert_dir("backups/d");
        gateway.fail_writes_named("a.tar.gpg");
        let cipher = RecordingCipher::new();
        let transport = EncryptedTransport::new(&gateway, &cipher, 1024);

        let result = transport.send(&mut &b"payload"[..], "backups/d/a.tar.gpg").await;
        assert!(matches!(result, Err(SnapError::Remote { .. })));
    }

    #[tokio::test]
    async fn test_receive_roundtrip() -> Result<()> {
        let gateway = MemoryGateway::new();
        gateway.insert_file("backups/d/a.tar.gpg", b"ciphertext");
        let cipher = RecordingCipher::new();
        let transport = EncryptedTransport::new(&gateway, &cipher, 4);

        let mut output = Vec::new();
        let written = transport.receive("backups/d/a.tar.gpg", &mut output).await?;
        assert_eq!(written, 10);
        assert_eq!(output, b"ciphertext");
        Ok(())
    }
}
