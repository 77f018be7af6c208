//! Hydration content straight from the remote store.
//!
//! A placeholder's file identity is the UTF-8 object key it was created
//! from, so answering a fetch is a ranged read of that object.

use anyhow::{Context, Result};
use bytes::Bytes;
use opendal::Operator;
use stratus_cloudfilter::{ContentSource, FileIdentity};

pub struct RemoteSource {
    op: Operator,
}

impl RemoteSource {
    pub fn new(op: Operator) -> Self {
        RemoteSource { op }
    }
}

impl ContentSource for RemoteSource {
    async fn fetch_range(&self, identity: &FileIdentity, offset: u64, length: u64) -> Result<Bytes> {
        let object = std::str::from_utf8(identity.as_bytes())
            .context("file identity is not a UTF-8 object key")?;
        stratus_storage::read_range(&self.op, object, offset, length).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_the_object_named_by_the_identity() {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        op.write("p/objects/a", b"0123456789".to_vec()).await.unwrap();

        let source = RemoteSource::new(op);
        let got = source
            .fetch_range(&FileIdentity::from("p/objects/a"), 2, 4)
            .await
            .unwrap();
        assert_eq!(&got[..], b"2345");

        let missing = source.fetch_range(&FileIdentity::from("p/objects/zz"), 0, 1).await;
        assert!(missing.is_err());

        let not_utf8 = source
            .fetch_range(&FileIdentity::from(vec![0xff, 0xfe]), 0, 1)
            .await;
        assert!(not_utf8.is_err());
    }
}
