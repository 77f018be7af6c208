//! Ranged content reads used to answer hydration requests.

use anyhow::{Context, Result};
use bytes::Bytes;
use opendal::Operator;
use tracing::debug;

/// Read `[offset, offset + length)` of `object`, clamped to the object size.
///
/// A range starting at or past EOF yields an empty buffer rather than an
/// error; the caller decides whether that is a failure.
pub async fn read_range(op: &Operator, object: &str, offset: u64, length: u64) -> Result<Bytes> {
    let size = op
        .stat(object)
        .await
        .with_context(|| format!("stat {object}"))?
        .content_length();

    let end = offset.saturating_add(length).min(size);
    if offset >= end {
        return Ok(Bytes::new());
    }

    let buf = op
        .read_with(object)
        .range(offset..end)
        .await
        .with_context(|| format!("reading {object} [{offset}, {end})"))?;

    debug!(object = %object, offset, bytes = end - offset, "read remote range");
    Ok(buf.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn operator_with(object: &str, data: Vec<u8>) -> Operator {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        op.write(object, data).await.unwrap();
        op
    }

    #[tokio::test]
    async fn reads_requested_window() {
        let data: Vec<u8> = (0u8..=255).collect();
        let op = operator_with("obj", data.clone()).await;
        let got = read_range(&op, "obj", 16, 32).await.unwrap();
        assert_eq!(&got[..], &data[16..48]);
    }

    #[tokio::test]
    async fn clamps_at_end_of_object() {
        let op = operator_with("obj", vec![7u8; 100]).await;
        let got = read_range(&op, "obj", 90, 4096).await.unwrap();
        assert_eq!(got.len(), 10);
        assert!(read_range(&op, "obj", 100, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_object_is_an_error() {
        let op = operator_with("obj", vec![1]).await;
        assert!(read_range(&op, "nope", 0, 1).await.is_err());
    }
}
