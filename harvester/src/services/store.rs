use crate::models::{
    CaptionRecord, ChannelRecord, RecommendationEdge, SnapshotMetadata, VideoRecord, VideoRef,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// A record kept in an append-only store.
pub trait Snapshot: Serialize + Send + Sync {
    fn channel_id(&self) -> &str;

    /// Timestamp an append of this record contributes to its snapshot metadata.
    fn snapshot_ts(&self) -> DateTime<Utc>;
}

impl Snapshot for ChannelRecord {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn snapshot_ts(&self) -> DateTime<Utc> {
        self.updated
    }
}

impl Snapshot for VideoRecord {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn snapshot_ts(&self) -> DateTime<Utc> {
        self.upload_date
    }
}

impl Snapshot for CaptionRecord {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn snapshot_ts(&self) -> DateTime<Utc> {
        self.upload_date
    }
}

impl Snapshot for RecommendationEdge {
    fn channel_id(&self) -> &str {
        &self.from_channel_id
    }

    fn snapshot_ts(&self) -> DateTime<Utc> {
        self.updated
    }
}

#[async_trait]
pub trait AppendOnlyStore<T: Snapshot>: Send + Sync {
    /// Appends all records as one batch.
    async fn append(&self, records: &[T]) -> Result<()>;

    /// Metadata of the most recent append, `None` if nothing was ever stored.
    async fn latest_snapshot_metadata(&self) -> Result<Option<SnapshotMetadata>>;
}

/// Hands out the logical store for each record kind (and channel).
pub trait StoreFactory: Send + Sync {
    fn channels(&self) -> Arc<dyn AppendOnlyStore<ChannelRecord>>;
    fn videos(&self, channel_id: &str) -> Arc<dyn AppendOnlyStore<VideoRecord>>;
    fn captions(&self, channel_id: &str) -> Arc<dyn AppendOnlyStore<CaptionRecord>>;
    fn recommendations(&self, channel_id: &str) -> Arc<dyn AppendOnlyStore<RecommendationEdge>>;
}

/// Videos of a channel with no recommendation edge ever recorded.
#[async_trait]
pub trait MissingRecsQuery: Send + Sync {
    async fn videos_without_recs(&self, channel_id: &str) -> Result<Vec<VideoRef>>;
}
