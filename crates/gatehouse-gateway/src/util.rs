use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::{GatewayError, Result};

pub(crate) fn unix_nanos(t: &DateTime<Utc>) -> u64 {
    t.timestamp_nanos_opt().map(|n| n as u64).unwrap_or(0)
}

/// Wraps the request body and digests everything that flows through, so
/// the ETag comes out of the same pass that feeds the storage driver.
pub(crate) struct Md5Reader<'a, R: ?Sized> {
    inner: &'a mut R,
    context: md5::Context,
}

impl<'a, R: AsyncRead + Unpin + ?Sized> Md5Reader<'a, R> {
    pub(crate) fn new(inner: &'a mut R) -> Self {
        Self {
            inner,
            context: md5::Context::new(),
        }
    }

    pub(crate) fn hex_digest(self) -> String {
        format!("{:x}", self.context.compute())
    }
}

impl<'a, R: AsyncRead + Unpin + ?Sized> AsyncRead for Md5Reader<'a, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut *me.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                me.context.consume(&buf.filled()[before..]);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Composite ETag of a completed multipart upload: the digest of the
/// concatenated part digests, suffixed with the part count.
pub(crate) fn multipart_etag(part_etags: &[String]) -> Result<String> {
    let mut concatenated = Vec::with_capacity(part_etags.len() * 16);
    for etag in part_etags {
        let digest = hex::decode(etag)
            .map_err(|_| GatewayError::InvalidArgument(format!("bad part etag {etag:?}")))?;
        concatenated.extend_from_slice(&digest);
    }
    Ok(format!(
        "{:x}-{}",
        md5::compute(&concatenated),
        part_etags.len()
    ))
}

/// S3 bucket naming rules: 3-63 characters of lowercase letters, digits,
/// dots and hyphens, starting and ending alphanumeric, and not shaped
/// like an IPv4 address.
pub(crate) fn check_valid_bucket_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| GatewayError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.len() < 3 || name.len() > 63 {
        return Err(invalid("length must be between 3 and 63"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
    {
        return Err(invalid(
            "only lowercase letters, digits, dots and hyphens are allowed",
        ));
    }
    let first = name.chars().next().unwrap();
    let last = name.chars().last().unwrap();
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err(invalid("must start and end with a letter or digit"));
    }
    if name.contains("..") || name.contains(".-") || name.contains("-.") {
        return Err(invalid("labels must not be empty"));
    }
    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() == 4 && labels.iter().all(|l| l.parse::<u8>().is_ok()) {
        return Err(invalid("must not be formatted as an IP address"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_name_validation() {
        for ok in ["abc", "my-bucket", "a.b.c", "bucket-2024", "0name0"] {
            check_valid_bucket_name(ok).unwrap();
        }
        for bad in [
            "ab",
            "UPPER",
            "-start",
            "end-",
            "double..dot",
            "dot.-dash",
            "192.168.0.1",
            "under_score",
            &"x".repeat(64),
        ] {
            assert!(check_valid_bucket_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn composite_etag_shape() {
        let etags = vec![
            format!("{:x}", md5::compute(b"part one")),
            format!("{:x}", md5::compute(b"part two")),
        ];
        let etag = multipart_etag(&etags).unwrap();
        assert!(etag.ends_with("-2"));
        assert_eq!(etag.len(), 32 + 2);
    }

    #[tokio::test]
    async fn md5_reader_digests_the_stream() {
        use tokio::io::AsyncReadExt;
        let data = b"hello md5 reader".to_vec();
        let mut source = data.as_slice();
        let mut reader = Md5Reader::new(&mut source);
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).await.unwrap();
        assert_eq!(sink, data);
        assert_eq!(reader.hex_digest(), format!("{:x}", md5::compute(&data)));
    }
}
