use crate::models::{
    CaptionRecord, ChannelRecord, RecommendationEdge, SnapshotMetadata, VideoRecord, VideoRef,
};
use crate::services::store::{AppendOnlyStore, MissingRecsQuery, Snapshot, StoreFactory};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use elasticsearch::http::request::JsonBody;
use elasticsearch::params::Refresh;
use elasticsearch::{indices::IndicesCreateParts, BulkParts, Elasticsearch, IndexParts, SearchParts};
use log::{error, info};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

pub const CHANNELS_INDEX: &str = "yt_channels";
pub const VIDEOS_INDEX: &str = "yt_videos";
pub const CAPTIONS_INDEX: &str = "yt_captions";
pub const RECS_INDEX: &str = "yt_recs";
pub const SNAPSHOTS_INDEX: &str = "yt_snapshots";

const COMPOSITE_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Channel,
    Video,
    Caption,
    Recommendation,
}

impl RecordKind {
    pub fn index(&self) -> &'static str {
        match self {
            RecordKind::Channel => CHANNELS_INDEX,
            RecordKind::Video => VIDEOS_INDEX,
            RecordKind::Caption => CAPTIONS_INDEX,
            RecordKind::Recommendation => RECS_INDEX,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecordKind::Channel => "channels",
            RecordKind::Video => "videos",
            RecordKind::Caption => "captions",
            RecordKind::Recommendation => "recs",
        }
    }
}

fn index_mappings() -> Vec<(&'static str, Value)> {
    vec![
        (
            CHANNELS_INDEX,
            json!({ "mappings": { "properties": {
                "channel_id": { "type": "keyword" },
                "status": { "type": "keyword" },
                "updated": { "type": "date" }
            }}}),
        ),
        (
            VIDEOS_INDEX,
            json!({ "mappings": { "properties": {
                "video_id": { "type": "keyword" },
                "channel_id": { "type": "keyword" },
                "title": { "type": "text", "fields": { "raw": { "type": "keyword" } } },
                "upload_date": { "type": "date" },
                "updated": { "type": "date" }
            }}}),
        ),
        (
            CAPTIONS_INDEX,
            json!({ "mappings": { "properties": {
                "video_id": { "type": "keyword" },
                "channel_id": { "type": "keyword" },
                "captions.text": { "type": "text" },
                "upload_date": { "type": "date" },
                "updated": { "type": "date" }
            }}}),
        ),
        (
            RECS_INDEX,
            json!({ "mappings": { "properties": {
                "from_channel_id": { "type": "keyword" },
                "from_video_id": { "type": "keyword" },
                "to_video_id": { "type": "keyword" },
                "to_channel_id": { "type": "keyword" },
                "source": { "type": "keyword" },
                "updated": { "type": "date" }
            }}}),
        ),
        (
            SNAPSHOTS_INDEX,
            json!({ "mappings": { "properties": {
                "store": { "type": "keyword" },
                "channel_id": { "type": "keyword" },
                "ts": { "type": "date" },
                "modified": { "type": "date" }
            }}}),
        ),
    ]
}

pub async fn create_harvest_indices(es_client: &Elasticsearch) {
    for (index, body) in index_mappings() {
        match es_client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(body)
            .send()
            .await
        {
            Ok(response) => {
                if response.status_code().is_success() {
                    info!("Elasticsearch index '{index}' created.");
                } else {
                    let response_text = response.text().await.unwrap_or_default();
                    if response_text.contains("resource_already_exists_exception") {
                        info!("Elasticsearch index '{index}' already exists.");
                    } else {
                        error!("Failed to create Elasticsearch index '{index}': {response_text}");
                    }
                }
            }
            Err(e) => {
                error!("Failed to connect to Elasticsearch to create index '{index}': {e:?}");
            }
        }
    }
}

async fn search(es_client: &Elasticsearch, index: &str, body: Value) -> Result<Value> {
    let response = es_client
        .search(SearchParts::Index(&[index]))
        .body(body)
        .send()
        .await?;

    if !response.status_code().is_success() {
        return Err(anyhow!(
            "Elasticsearch search on {index} failed with status: {}",
            response.status_code()
        ));
    }

    Ok(response.json::<Value>().await?)
}

/// A logical store: one record kind, optionally scoped to one channel.
pub struct EsAppendStore<T> {
    es_client: Elasticsearch,
    kind: RecordKind,
    channel_id: Option<String>,
    _record: PhantomData<fn() -> T>,
}

impl<T> EsAppendStore<T> {
    pub fn new(es_client: Elasticsearch, kind: RecordKind, channel_id: Option<String>) -> Self {
        EsAppendStore {
            es_client,
            kind,
            channel_id,
            _record: PhantomData,
        }
    }

    async fn write_manifest(&self, metadata: SnapshotMetadata) -> Result<()> {
        let response = self
            .es_client
            .index(IndexParts::Index(SNAPSHOTS_INDEX))
            .refresh(Refresh::WaitFor)
            .body(json!({
                "store": self.kind.name(),
                "channel_id": self.channel_id,
                "ts": metadata.ts,
                "modified": metadata.modified,
            }))
            .send()
            .await?;

        if !response.status_code().is_success() {
            return Err(anyhow!(
                "Failed to record {} snapshot: {:?}",
                self.kind.name(),
                response.text().await
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<T> AppendOnlyStore<T> for EsAppendStore<T>
where
    T: Snapshot + 'static,
{
    async fn append(&self, records: &[T]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(records.len() * 2);
        for record in records {
            body.push(json!({ "index": {} }).into());
            body.push(serde_json::to_value(record)?.into());
        }

        let response = self
            .es_client
            .bulk(BulkParts::Index(self.kind.index()))
            .body(body)
            .send()
            .await?;

        if !response.status_code().is_success() {
            return Err(anyhow!(
                "Bulk append to {} failed: {:?}",
                self.kind.index(),
                response.text().await
            ));
        }

        let result: Value = response.json().await?;
        if result["errors"].as_bool().unwrap_or(false) {
            return Err(anyhow!(
                "Bulk append to {} reported item errors",
                self.kind.index()
            ));
        }

        let ts = records.iter().map(Snapshot::snapshot_ts).max();
        self.write_manifest(SnapshotMetadata {
            ts,
            modified: Utc::now(),
        })
        .await
    }

    async fn latest_snapshot_metadata(&self) -> Result<Option<SnapshotMetadata>> {
        let mut filters = vec![json!({ "term": { "store": self.kind.name() } })];
        if let Some(channel_id) = &self.channel_id {
            filters.push(json!({ "term": { "channel_id": channel_id } }));
        }

        let response = search(
            &self.es_client,
            SNAPSHOTS_INDEX,
            json!({
                "size": 1,
                "query": { "bool": { "filter": filters } },
                "sort": [{ "modified": { "order": "desc" } }]
            }),
        )
        .await?;

        match response["hits"]["hits"]
            .as_array()
            .and_then(|hits| hits.first())
        {
            Some(hit) => Ok(Some(serde_json::from_value(hit["_source"].clone())?)),
            None => Ok(None),
        }
    }
}

pub struct EsStoreFactory {
    es_client: Elasticsearch,
}

impl EsStoreFactory {
    pub fn new(es_client: Elasticsearch) -> Self {
        EsStoreFactory { es_client }
    }
}

impl StoreFactory for EsStoreFactory {
    fn channels(&self) -> Arc<dyn AppendOnlyStore<ChannelRecord>> {
        Arc::new(EsAppendStore::new(
            self.es_client.clone(),
            RecordKind::Channel,
            None,
        ))
    }

    fn videos(&self, channel_id: &str) -> Arc<dyn AppendOnlyStore<VideoRecord>> {
        Arc::new(EsAppendStore::new(
            self.es_client.clone(),
            RecordKind::Video,
            Some(channel_id.to_string()),
        ))
    }

    fn captions(&self, channel_id: &str) -> Arc<dyn AppendOnlyStore<CaptionRecord>> {
        Arc::new(EsAppendStore::new(
            self.es_client.clone(),
            RecordKind::Caption,
            Some(channel_id.to_string()),
        ))
    }

    fn recommendations(&self, channel_id: &str) -> Arc<dyn AppendOnlyStore<RecommendationEdge>> {
        Arc::new(EsAppendStore::new(
            self.es_client.clone(),
            RecordKind::Recommendation,
            Some(channel_id.to_string()),
        ))
    }
}

pub struct EsMissingRecs {
    es_client: Elasticsearch,
}

impl EsMissingRecs {
    pub fn new(es_client: Elasticsearch) -> Self {
        EsMissingRecs { es_client }
    }
}

/// Every bucket of a `terms` composite aggregation on `field`, following
/// `after_key` until a page comes back empty.
async fn composite_buckets(
    es_client: &Elasticsearch,
    index: &str,
    query: Value,
    field: &str,
    sub_aggs: Option<Value>,
) -> Result<Vec<Value>> {
    let mut buckets = Vec::new();
    let mut after: Option<Value> = None;

    loop {
        let body = composite_request(&query, field, after.as_ref(), sub_aggs.as_ref());
        let response = search(es_client, index, body).await?;

        let page = &response["aggregations"]["page"];
        let page_buckets = page["buckets"].as_array().cloned().unwrap_or_default();
        if page_buckets.is_empty() {
            break;
        }
        buckets.extend(page_buckets);

        match page.get("after_key") {
            Some(key) if !key.is_null() => after = Some(key.clone()),
            _ => break,
        }
    }

    Ok(buckets)
}

fn composite_request(
    query: &Value,
    field: &str,
    after: Option<&Value>,
    sub_aggs: Option<&Value>,
) -> Value {
    let mut composite = json!({
        "size": COMPOSITE_PAGE_SIZE,
        "sources": [ { "key": { "terms": { "field": field } } } ]
    });
    if let Some(after) = after {
        composite["after"] = after.clone();
    }
    let mut agg = json!({ "composite": composite });
    if let Some(sub_aggs) = sub_aggs {
        agg["aggs"] = sub_aggs.clone();
    }
    json!({ "size": 0, "query": query, "aggs": { "page": agg } })
}

fn bucket_key(bucket: &Value) -> Option<&str> {
    bucket["key"]["key"].as_str()
}

#[async_trait]
impl MissingRecsQuery for EsMissingRecs {
    async fn videos_without_recs(&self, channel_id: &str) -> Result<Vec<VideoRef>> {
        let videos = composite_buckets(
            &self.es_client,
            VIDEOS_INDEX,
            json!({ "term": { "channel_id": channel_id } }),
            "video_id",
            Some(json!({
                "latest": {
                    "top_hits": { "size": 1, "sort": [ { "updated": "desc" } ], "_source": ["title"] }
                }
            })),
        )
        .await?;

        let recs = composite_buckets(
            &self.es_client,
            RECS_INDEX,
            json!({ "term": { "from_channel_id": channel_id } }),
            "from_video_id",
            None,
        )
        .await?;

        let with_recs: HashSet<&str> = recs.iter().filter_map(bucket_key).collect();
        let missing = missing_from_buckets(&videos, &with_recs);
        info!(
            "{channel_id} - found {} videos missing recommendations",
            missing.len()
        );
        Ok(missing)
    }
}

/// Videos (one bucket per id) that have no recommendations, titled from
/// their latest snapshot.
fn missing_from_buckets(videos: &[Value], with_recs: &HashSet<&str>) -> Vec<VideoRef> {
    videos
        .iter()
        .filter_map(|bucket| {
            let video_id = bucket_key(bucket)?;
            if with_recs.contains(video_id) {
                return None;
            }
            let title = bucket["latest"]["hits"]["hits"][0]["_source"]["title"]
                .as_str()
                .unwrap_or("");
            Some(VideoRef {
                id: video_id.to_string(),
                title: title.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_record_kind_has_a_mapped_index() {
        let mapped: HashSet<&str> = index_mappings().into_iter().map(|(i, _)| i).collect();
        for kind in [
            RecordKind::Channel,
            RecordKind::Video,
            RecordKind::Caption,
            RecordKind::Recommendation,
        ] {
            assert!(mapped.contains(kind.index()), "{:?} has no mapping", kind);
        }
        assert!(mapped.contains(SNAPSHOTS_INDEX));
    }

    fn video_bucket(id: &str, title: &str) -> Value {
        json!({
            "key": { "key": id },
            "doc_count": 30,
            "latest": { "hits": { "hits": [ { "_source": { "title": title } } ] } }
        })
    }

    #[test]
    fn missing_recs_exclude_videos_with_edges() {
        let videos = vec![
            video_bucket("a", "A"),
            video_bucket("b", "B"),
            video_bucket("c", "C"),
            json!({ "key": { "key": "d" }, "doc_count": 1 }),
        ];
        let with_recs: HashSet<&str> = ["b"].into_iter().collect();

        let missing = missing_from_buckets(&videos, &with_recs);

        assert_eq!(
            missing,
            vec![
                VideoRef { id: "a".into(), title: "A".into() },
                VideoRef { id: "c".into(), title: "C".into() },
                VideoRef { id: "d".into(), title: "".into() },
            ]
        );
    }

    #[test]
    fn composite_pages_resume_after_the_last_key() {
        let query = json!({ "term": { "channel_id": "UC1" } });

        let first = composite_request(&query, "video_id", None, None);
        assert_eq!(first["size"], 0);
        assert!(first["aggs"]["page"]["composite"].get("after").is_none());
        assert!(first["aggs"]["page"].get("aggs").is_none());

        let after = json!({ "key": "v500" });
        let sub = json!({ "latest": { "top_hits": { "size": 1 } } });
        let next = composite_request(&query, "video_id", Some(&after), Some(&sub));
        let composite = &next["aggs"]["page"]["composite"];
        assert_eq!(composite["after"]["key"], "v500");
        assert_eq!(composite["sources"][0]["key"]["terms"]["field"], "video_id");
        assert_eq!(next["aggs"]["page"]["aggs"]["latest"]["top_hits"]["size"], 1);
        assert_eq!(next["query"], query);
    }

    #[test]
    fn snapshot_manifest_round_trips_from_source() {
        let source = json!({
            "store": "videos",
            "channel_id": "UC1",
            "ts": "2021-06-01T00:00:00Z",
            "modified": "2021-06-02T00:00:00Z"
        });
        let metadata: SnapshotMetadata = serde_json::from_value(source).unwrap();
        assert!(metadata.ts.is_some());
        assert!(metadata.modified > metadata.ts.unwrap());
    }
}
