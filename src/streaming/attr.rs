//! TLV attribute decoding.
//!
//! Attributes inside a command must appear in the order the protocol
//! mandates, so every read names the tag it expects and a mismatch is a
//! hard protocol error.

use crate::error::{DiffError, Result};
use crate::streaming::protocol::{Attribute, ATTRIBUTE_HEADER_SIZE};
use std::ffi::OsString;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Reads attributes of one command and counts the payload bytes consumed.
pub struct AttributeReader<'a, R> {
    inner: &'a mut R,
    consumed: u64,
}

impl<'a, R: AsyncRead + Unpin> AttributeReader<'a, R> {
    pub fn new(inner: &'a mut R) -> Self {
        Self { inner, consumed: 0 }
    }

    /// Payload bytes read so far, TLV headers included.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub async fn read_bytes(&mut self, tag: Attribute) -> Result<Vec<u8>> {
        let got = self.inner.read_u16_le().await?;
        let len = self.inner.read_u16_le().await?;
        self.consumed += ATTRIBUTE_HEADER_SIZE as u64;

        if got != tag as u16 {
            return Err(DiffError::Protocol(format!(
                "unexpected TLV attribute: expected {:?} ({}), got {}",
                tag, tag as u16, got
            )));
        }

        let mut data = vec![0u8; len as usize];
        self.inner.read_exact(&mut data).await?;
        self.consumed += u64::from(len);

        trace!(attr = ?tag, len, "read attribute");
        Ok(data)
    }

    /// Payload bytes are the string content, no length prefix inside. Names
    /// are kept byte for byte; Linux filenames need not be UTF-8.
    pub async fn read_string(&mut self, tag: Attribute) -> Result<OsString> {
        let data = self.read_bytes(tag).await?;
        Ok(os_string_from_bytes(data))
    }

    pub async fn read_u64(&mut self, tag: Attribute) -> Result<u64> {
        let data = self.read_bytes(tag).await?;
        let raw: [u8; 8] = data.as_slice().try_into().map_err(|_| {
            DiffError::Protocol(format!(
                "attribute {:?} should hold 8 bytes, got {}",
                tag,
                data.len()
            ))
        })?;
        Ok(u64::from_le_bytes(raw))
    }

    /// Discard the rest of a payload of `total` bytes.
    pub async fn skip_remaining(&mut self, total: u64) -> Result<u64> {
        let rest = total.saturating_sub(self.consumed);
        skip_bytes(&mut *self.inner, rest).await?;
        self.consumed += rest;
        Ok(rest)
    }
}

#[cfg(unix)]
fn os_string_from_bytes(data: Vec<u8>) -> OsString {
    use std::os::unix::ffi::OsStringExt;
    OsString::from_vec(data)
}

#[cfg(not(unix))]
fn os_string_from_bytes(data: Vec<u8>) -> OsString {
    OsString::from(String::from_utf8_lossy(&data).into_owned())
}

/// Read and drop exactly `n` bytes without buffering them.
pub async fn skip_bytes<R: AsyncRead + Unpin>(r: &mut R, n: u64) -> Result<()> {
    if n == 0 {
        return Ok(());
    }
    let mut limited = r.take(n);
    let copied = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
    if copied != n {
        return Err(DiffError::unexpected_eof("skipping command payload", n, copied));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn tlv(tag: u16, data: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u16_le(tag);
        buf.put_u16_le(data.len() as u16);
        buf.put_slice(data);
        buf.to_vec()
    }

    #[tokio::test]
    async fn test_read_string() {
        let input = tlv(Attribute::Path as u16, b"usr/bin/env");
        let mut src = &input[..];
        let mut attrs = AttributeReader::new(&mut src);

        let path = attrs.read_string(Attribute::Path).await.unwrap();
        assert_eq!(path, "usr/bin/env");
        assert_eq!(attrs.consumed(), 4 + 11);
    }

    #[tokio::test]
    async fn test_read_u64() {
        let input = tlv(Attribute::Size as u16, &4096u64.to_le_bytes());
        let mut src = &input[..];
        let mut attrs = AttributeReader::new(&mut src);
        assert_eq!(attrs.read_u64(Attribute::Size).await.unwrap(), 4096);
    }

    #[tokio::test]
    async fn test_tag_mismatch() {
        let input = tlv(Attribute::Ino as u16, &1u64.to_le_bytes());
        let mut src = &input[..];
        let mut attrs = AttributeReader::new(&mut src);

        let err = attrs.read_string(Attribute::Path).await.unwrap_err();
        assert!(matches!(err, DiffError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_u64_wrong_width() {
        for width in [0usize, 4, 7, 9, 16] {
            let input = tlv(Attribute::Mode as u16, &vec![1u8; width]);
            let mut src = &input[..];
            let mut attrs = AttributeReader::new(&mut src);

            let err = attrs.read_u64(Attribute::Mode).await.unwrap_err();
            match err {
                DiffError::Protocol(msg) => assert!(msg.contains(&format!("got {}", width))),
                other => panic!("Expected Protocol error for width {}, got {:?}", width, other),
            }
        }
    }

    #[tokio::test]
    async fn test_short_payload_is_io_error() {
        let mut input = tlv(Attribute::Path as u16, b"abcdef");
        input.truncate(7);
        let mut src = &input[..];
        let mut attrs = AttributeReader::new(&mut src);

        let err = attrs.read_bytes(Attribute::Path).await.unwrap_err();
        assert!(matches!(err, DiffError::Io(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_string_kept_exact() {
        use std::os::unix::ffi::OsStrExt;

        let mut input = tlv(Attribute::Path as u16, b"a\xffb");
        input.extend(tlv(Attribute::Path as u16, b"a\xfeb"));
        let mut src = &input[..];
        let mut attrs = AttributeReader::new(&mut src);

        let first = attrs.read_string(Attribute::Path).await.unwrap();
        let second = attrs.read_string(Attribute::Path).await.unwrap();
        assert_eq!(first.as_bytes(), b"a\xffb");
        assert_eq!(second.as_bytes(), b"a\xfeb");
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_skip_bytes() {
        let input = [1u8, 2, 3, 4, 5];
        let mut src = &input[..];
        skip_bytes(&mut src, 3).await.unwrap();
        assert_eq!(src, &[4, 5]);

        let err = skip_bytes(&mut src, 10).await.unwrap_err();
        assert!(matches!(err, DiffError::Io(_)));
    }
}
