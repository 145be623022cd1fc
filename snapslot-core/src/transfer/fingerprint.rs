//! Content fingerprints computed while a stream is being consumed.
//!
//! [`FingerprintReader`] is a tee: every byte read through it is forwarded
//! unmodified to the caller and fed to a SHA-256 hasher on the way. Memory use
//! is constant regardless of stream length, and backpressure comes entirely
//! from whoever is reading.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Length of a hex-encoded SHA-256 digest.
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Lowercase hex SHA-256 of an archive's raw (pre-encryption) bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Accepts exactly 64 lowercase hex characters.
    pub fn parse(hex: &str) -> Option<Self> {
        let valid = hex.len() == FINGERPRINT_HEX_LEN
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fingerprint of an in-memory buffer.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reader wrapper that hashes every byte passing through it.
pub struct FingerprintReader<R> {
    inner: R,
    hasher: Sha256,
    bytes_read: u64,
}

impl<R> FingerprintReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_read: 0,
        }
    }

    /// Bytes forwarded so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Consume the tee and return the digest of everything that was read.
    ///
    /// Only meaningful once the inner reader reached EOF and its producer
    /// reported success.
    pub fn finish(self) -> (Fingerprint, u64) {
        (
            Fingerprint(hex::encode(self.hasher.finalize())),
            self.bytes_read,
        )
    }
}

impl<R> AsyncRead for FingerprintReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let fresh = &buf.filled()[before..];
                this.hasher.update(fresh);
                this.bytes_read += fresh.len() as u64;
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Drain `reader` into a discard sink and return its fingerprint.
pub async fn fingerprint_stream<R>(reader: R) -> std::io::Result<(Fingerprint, u64)>
where
    R: AsyncRead + Unpin,
{
    let mut tee = FingerprintReader::new(reader);
    tokio::io::copy(&mut tee, &mut tokio::io::sink()).await?;
    Ok(tee.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    // sha256("abc")
    const ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Fingerprint::parse(ABC).is_some());
        assert!(Fingerprint::parse(&ABC.to_uppercase()).is_none());
        assert!(Fingerprint::parse(&ABC[..63]).is_none());
        assert!(Fingerprint::parse("gpg").is_none());
    }

    #[test]
    fn test_of_bytes_matches_known_digest() {
        assert_eq!(Fingerprint::of_bytes(b"abc").as_str(), ABC);
    }

    #[tokio::test]
    async fn test_tee_forwards_bytes_unmodified() -> std::io::Result<()> {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let mut tee = FingerprintReader::new(data.as_slice());

        let mut forwarded = Vec::new();
        tee.read_to_end(&mut forwarded).await?;

        let (fp, bytes) = tee.finish();
        assert_eq!(forwarded, data);
        assert_eq!(bytes, data.len() as u64);
        assert_eq!(fp, Fingerprint::of_bytes(&data));
        Ok(())
    }

    #[tokio::test]
    async fn test_fingerprint_through_small_pipe() -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let (mut writer, reader) = tokio::io::duplex(64);
        let producer = tokio::spawn(async move {
            for _ in 0..1000 {
                writer.write_all(b"abc").await?;
            }
            writer.shutdown().await
        });

        let (fp, bytes) = fingerprint_stream(reader).await?;
        producer.await??;

        assert_eq!(bytes, 3000);
        assert_eq!(fp, Fingerprint::of_bytes(&b"abc".repeat(1000)));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_stream() -> std::io::Result<()> {
        let (fp, bytes) = fingerprint_stream(&b""[..]).await?;
        assert_eq!(bytes, 0);
        assert_eq!(
            fp.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        Ok(())
    }
}
