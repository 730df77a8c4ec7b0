//! In-memory stand-ins for the external collaborators.

use crate::error::ApiError;
use crate::models::{
    CaptionLine, CaptionRecord, CaptionTrack, CaptionTrackInfo, ChannelData, ChannelRecord,
    ChannelVideoStub, Page, RecommendationEdge, RecommendedVideo, RelatedVideo, SeedChannel,
    SnapshotMetadata, VideoData, VideoItem, VideoRecord, VideoRef, VideoStats,
};
use crate::services::credential_pool::CredentialPool;
use crate::services::executor::{BackoffPolicy, QuotaAwareExecutor};
use crate::services::scraper::Scraper;
use crate::services::seeds::SeedChannelSource;
use crate::services::store::{AppendOnlyStore, MissingRecsQuery, Snapshot, StoreFactory};
use crate::services::youtube_api::{ApiClient, YouTubeApi};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn video_item(id: &str, upload_date: DateTime<Utc>) -> VideoItem {
    VideoItem {
        id: id.to_string(),
        title: format!("Video {id}"),
        description: None,
        duration_secs: Some(60),
        keywords: Vec::new(),
        statistics: VideoStats {
            views: Some(100),
            likes: Some(10),
            dislikes: None,
        },
        upload_date,
    }
}

pub fn trending_video(id: &str, category_id: &str) -> VideoData {
    VideoData {
        video_id: id.to_string(),
        video_title: format!("Trending {id}"),
        channel_id: format!("UC-{id}"),
        channel_title: format!("Channel {id}"),
        category_id: Some(category_id.to_string()),
        ..Default::default()
    }
}

pub fn seed(id: &str, title: &str) -> SeedChannel {
    SeedChannel {
        id: id.to_string(),
        title: title.to_string(),
        ..Default::default()
    }
}

pub fn api_client(api: Arc<FakeYouTubeApi>, keys: &[&str]) -> ApiClient {
    let pool = Arc::new(CredentialPool::new(keys.iter().map(|k| k.to_string())));
    let executor = QuotaAwareExecutor::new(
        pool,
        BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        },
    );
    ApiClient::new(api, executor, 10)
}

fn page_index(page_token: Option<&str>) -> usize {
    page_token.and_then(|t| t.parse().ok()).unwrap_or(0)
}

fn page_of<T: Clone>(pages: &[Vec<T>], page_token: Option<&str>) -> Page<T> {
    let idx = page_index(page_token);
    Page {
        items: pages.get(idx).cloned().unwrap_or_default(),
        next_page_token: (idx + 1 < pages.len()).then(|| (idx + 1).to_string()),
    }
}

#[derive(Default)]
pub struct FakeYouTubeApi {
    channels: Mutex<HashMap<String, ChannelData>>,
    failing_channels: Mutex<HashMap<String, u16>>,
    related: Mutex<HashMap<String, Vec<RelatedVideo>>>,
    failing_related: Mutex<HashSet<String>>,
    upload_pages: Mutex<Vec<Vec<ChannelVideoStub>>>,
    trending_pages: Mutex<Vec<Vec<VideoData>>>,
    pub related_calls: Mutex<Vec<String>>,
}

impl FakeYouTubeApi {
    pub fn set_channel(&self, channel_id: &str, title: &str) {
        self.channels.lock().unwrap().insert(
            channel_id.to_string(),
            ChannelData {
                id: channel_id.to_string(),
                title: title.to_string(),
                subscriber_count: Some(1000),
                view_count: Some(50_000),
                ..Default::default()
            },
        );
    }

    /// Every lookup of the channel answers with the given HTTP status.
    pub fn fail_channel(&self, channel_id: &str, status: u16) {
        self.failing_channels
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), status);
    }

    pub fn set_related(&self, video_id: &str, related_ids: &[&str]) {
        let related = related_ids
            .iter()
            .enumerate()
            .map(|(i, id)| RelatedVideo {
                video_id: id.to_string(),
                video_title: format!("Related {id}"),
                channel_id: Some("UC-related".to_string()),
                channel_title: Some("Related channel".to_string()),
                rank: (i + 10) as u32,
            })
            .collect();
        self.related
            .lock()
            .unwrap()
            .insert(video_id.to_string(), related);
    }

    pub fn fail_related(&self, video_id: &str) {
        self.failing_related
            .lock()
            .unwrap()
            .insert(video_id.to_string());
    }

    pub fn set_upload_pages(&self, pages: Vec<Vec<(&str, DateTime<Utc>)>>) {
        *self.upload_pages.lock().unwrap() = pages
            .into_iter()
            .map(|page| {
                page.into_iter()
                    .map(|(id, published_at)| ChannelVideoStub {
                        video_id: id.to_string(),
                        video_title: format!("Video {id}"),
                        published_at,
                    })
                    .collect()
            })
            .collect();
    }

    pub fn set_trending_pages(&self, pages: Vec<Vec<VideoData>>) {
        *self.trending_pages.lock().unwrap() = pages;
    }

    pub fn related_calls(&self) -> Vec<String> {
        self.related_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl YouTubeApi for FakeYouTubeApi {
    async fn channel(&self, _key: &str, channel_id: &str) -> Result<Option<ChannelData>, ApiError> {
        if let Some(status) = self.failing_channels.lock().unwrap().get(channel_id) {
            return Err(ApiError::from_status(*status, "channel lookup failed".to_string()));
        }
        Ok(self.channels.lock().unwrap().get(channel_id).cloned())
    }

    async fn video(&self, _key: &str, _video_id: &str) -> Result<Option<VideoData>, ApiError> {
        Ok(None)
    }

    async fn search_related(
        &self,
        _key: &str,
        video_id: &str,
        _max_results: u32,
    ) -> Result<Vec<RelatedVideo>, ApiError> {
        self.related_calls
            .lock()
            .unwrap()
            .push(video_id.to_string());
        if self.failing_related.lock().unwrap().contains(video_id) {
            return Err(ApiError::from_status(400, "invalid video".to_string()));
        }
        Ok(self
            .related
            .lock()
            .unwrap()
            .get(video_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn search_channel_uploads(
        &self,
        _key: &str,
        _channel_id: &str,
        _published_after: Option<DateTime<Utc>>,
        _published_before: Option<DateTime<Utc>>,
        page_token: Option<&str>,
    ) -> Result<Page<ChannelVideoStub>, ApiError> {
        Ok(page_of(&self.upload_pages.lock().unwrap(), page_token))
    }

    async fn list_trending(
        &self,
        _key: &str,
        _region_code: &str,
        _category_id: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<Page<VideoData>, ApiError> {
        Ok(page_of(&self.trending_pages.lock().unwrap(), page_token))
    }
}

#[derive(Default)]
pub struct FakeScraper {
    uploads: Mutex<HashMap<String, Vec<Vec<VideoItem>>>>,
    failing_listings: Mutex<HashSet<String>>,
    caption_tracks: Mutex<HashMap<String, Vec<CaptionTrackInfo>>>,
    failing_captions: Mutex<HashSet<String>>,
    recommendations: Mutex<HashMap<String, Vec<RecommendedVideo>>>,
    failing_recommendations: Mutex<HashSet<String>>,
    pub batches_pulled: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub rec_calls: Mutex<Vec<String>>,
    requests: AtomicU64,
}

impl FakeScraper {
    pub fn set_uploads(&self, channel_id: &str, batches: Vec<Vec<VideoItem>>) {
        self.uploads
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), batches);
    }

    /// The listing yields an error after all configured batches.
    pub fn fail_listing(&self, channel_id: &str) {
        self.failing_listings
            .lock()
            .unwrap()
            .insert(channel_id.to_string());
    }

    pub fn set_caption_languages(&self, video_id: &str, languages: &[&str]) {
        let tracks = languages
            .iter()
            .map(|lang| CaptionTrackInfo {
                video_id: video_id.to_string(),
                language_code: lang.to_string(),
                name: None,
                is_generated: false,
            })
            .collect();
        self.caption_tracks
            .lock()
            .unwrap()
            .insert(video_id.to_string(), tracks);
    }

    pub fn fail_captions(&self, video_id: &str) {
        self.failing_captions
            .lock()
            .unwrap()
            .insert(video_id.to_string());
    }

    pub fn set_recommendations(&self, video_id: &str, to_ids: &[&str]) {
        let recs = to_ids
            .iter()
            .map(|id| RecommendedVideo {
                to_video_id: id.to_string(),
                to_video_title: format!("Video {id}"),
                to_channel_id: Some("UC-rec".to_string()),
                to_channel_title: Some("Rec channel".to_string()),
            })
            .collect();
        self.recommendations
            .lock()
            .unwrap()
            .insert(video_id.to_string(), recs);
    }

    pub fn fail_recommendations(&self, video_id: &str) {
        self.failing_recommendations
            .lock()
            .unwrap()
            .insert(video_id.to_string());
    }

    pub fn rec_calls(&self) -> Vec<String> {
        self.rec_calls.lock().unwrap().clone()
    }

    fn count_request(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Scraper for FakeScraper {
    fn list_uploads<'a>(&'a self, channel_id: &'a str) -> BoxStream<'a, Result<Vec<VideoItem>>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let batches = self
            .uploads
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .unwrap_or_default();
        let failure = self
            .failing_listings
            .lock()
            .unwrap()
            .contains(channel_id)
            .then(|| Err(anyhow!("listing of {channel_id} failed")));

        stream::iter(batches.into_iter().map(Ok).chain(failure))
            .inspect(move |_| {
                self.batches_pulled.fetch_add(1, Ordering::SeqCst);
                self.count_request();
            })
            .boxed()
    }

    async fn list_caption_tracks(&self, video_id: &str) -> Result<Vec<CaptionTrackInfo>> {
        self.count_request();
        if self.failing_captions.lock().unwrap().contains(video_id) {
            return Err(anyhow!("caption tracks for {video_id} unavailable"));
        }
        Ok(self
            .caption_tracks
            .lock()
            .unwrap()
            .get(video_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_caption_track(&self, track: &CaptionTrackInfo) -> Result<CaptionTrack> {
        self.count_request();
        Ok(CaptionTrack {
            info: track.clone(),
            lines: vec![CaptionLine {
                text: format!("{} says hello", track.video_id),
                start_time: 0.0,
                end_time: 1.5,
            }],
        })
    }

    async fn fetch_recommendations(&self, video_id: &str) -> Result<Vec<RecommendedVideo>> {
        self.count_request();
        self.rec_calls.lock().unwrap().push(video_id.to_string());
        if self.failing_recommendations.lock().unwrap().contains(video_id) {
            return Err(anyhow!("watch page of {video_id} unavailable"));
        }
        Ok(self
            .recommendations
            .lock()
            .unwrap()
            .get(video_id)
            .cloned()
            .unwrap_or_default())
    }

    fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

pub struct MemoryStore<T> {
    records: Mutex<Vec<T>>,
    metadata: Mutex<Option<SnapshotMetadata>>,
    pub appends: AtomicUsize,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        MemoryStore {
            records: Mutex::new(Vec::new()),
            metadata: Mutex::new(None),
            appends: AtomicUsize::new(0),
        }
    }
}

impl<T: Clone> MemoryStore<T> {
    pub fn records(&self) -> Vec<T> {
        self.records.lock().unwrap().clone()
    }

    /// Pretends an earlier run already appended to this store.
    pub fn preset(&self, metadata: SnapshotMetadata) {
        *self.metadata.lock().unwrap() = Some(metadata);
    }
}

#[async_trait]
impl<T> AppendOnlyStore<T> for MemoryStore<T>
where
    T: Snapshot + Clone + 'static,
{
    async fn append(&self, records: &[T]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.appends.fetch_add(1, Ordering::SeqCst);
        self.records.lock().unwrap().extend_from_slice(records);
        *self.metadata.lock().unwrap() = Some(SnapshotMetadata {
            ts: records.iter().map(Snapshot::snapshot_ts).max(),
            modified: Utc::now(),
        });
        Ok(())
    }

    async fn latest_snapshot_metadata(&self) -> Result<Option<SnapshotMetadata>> {
        Ok(*self.metadata.lock().unwrap())
    }
}

type PerChannel<T> = Mutex<HashMap<String, Arc<MemoryStore<T>>>>;

fn store_for<T>(stores: &PerChannel<T>, channel_id: &str) -> Arc<MemoryStore<T>> {
    stores
        .lock()
        .unwrap()
        .entry(channel_id.to_string())
        .or_default()
        .clone()
}

#[derive(Default)]
pub struct MemoryStoreFactory {
    channels: Arc<MemoryStore<ChannelRecord>>,
    videos: PerChannel<VideoRecord>,
    captions: PerChannel<CaptionRecord>,
    recommendations: PerChannel<RecommendationEdge>,
}

impl MemoryStoreFactory {
    pub fn channel_store(&self) -> Arc<MemoryStore<ChannelRecord>> {
        self.channels.clone()
    }

    pub fn video_store(&self, channel_id: &str) -> Arc<MemoryStore<VideoRecord>> {
        store_for(&self.videos, channel_id)
    }

    pub fn caption_store(&self, channel_id: &str) -> Arc<MemoryStore<CaptionRecord>> {
        store_for(&self.captions, channel_id)
    }

    pub fn rec_store(&self, channel_id: &str) -> Arc<MemoryStore<RecommendationEdge>> {
        store_for(&self.recommendations, channel_id)
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn channels(&self) -> Arc<dyn AppendOnlyStore<ChannelRecord>> {
        self.channel_store()
    }

    fn videos(&self, channel_id: &str) -> Arc<dyn AppendOnlyStore<VideoRecord>> {
        self.video_store(channel_id)
    }

    fn captions(&self, channel_id: &str) -> Arc<dyn AppendOnlyStore<CaptionRecord>> {
        self.caption_store(channel_id)
    }

    fn recommendations(&self, channel_id: &str) -> Arc<dyn AppendOnlyStore<RecommendationEdge>> {
        self.rec_store(channel_id)
    }
}

#[derive(Default)]
pub struct FakeMissingRecs {
    missing: Mutex<HashMap<String, Vec<VideoRef>>>,
    stores: Mutex<Option<Arc<MemoryStoreFactory>>>,
}

impl FakeMissingRecs {
    pub fn set_missing(&self, channel_id: &str, video_ids: &[&str]) {
        let refs = video_ids
            .iter()
            .map(|id| VideoRef {
                id: id.to_string(),
                title: format!("Video {id}"),
            })
            .collect();
        self.missing
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), refs);
    }

    /// Answers from what the stores hold at query time: stored videos
    /// without any recommendation edge.
    pub fn derive_from(&self, stores: Arc<MemoryStoreFactory>) {
        *self.stores.lock().unwrap() = Some(stores);
    }
}

#[async_trait]
impl MissingRecsQuery for FakeMissingRecs {
    async fn videos_without_recs(&self, channel_id: &str) -> Result<Vec<VideoRef>> {
        let stores = self.stores.lock().unwrap().clone();
        if let Some(stores) = stores {
            let with_recs: HashSet<String> = stores
                .rec_store(channel_id)
                .records()
                .into_iter()
                .map(|e| e.from_video_id)
                .collect();
            let mut missing: Vec<VideoRef> = Vec::new();
            for video in stores.video_store(channel_id).records() {
                if !with_recs.contains(&video.video_id)
                    && !missing.iter().any(|m| m.id == video.video_id)
                {
                    missing.push(VideoRef {
                        id: video.video_id,
                        title: video.title,
                    });
                }
            }
            return Ok(missing);
        }

        Ok(self
            .missing
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct FakeSeeds(pub Vec<SeedChannel>);

#[async_trait]
impl SeedChannelSource for FakeSeeds {
    async fn channels(&self) -> Result<Vec<SeedChannel>> {
        Ok(self.0.clone())
    }
}
