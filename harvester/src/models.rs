use chrono::{DateTime, Utc};
use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::Responder;
use rocket::{response, Response};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminToken(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// Channel stats, then videos, captions and recommendations.
    All,
    /// Channel stats only.
    Channels,
    /// Like `All`, but recommendations are refreshed for every video that has none recorded.
    #[value(name = "missing-recs")]
    AllWithMissingRecs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Alive,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecSource {
    Scraper,
    Api,
}

/// A channel from the curated seed list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedChannel {
    pub id: String,
    pub title: String,
    pub main_channel_id: Option<String>,
    pub relevance: Option<f64>,
    pub lr: Option<String>,
    pub hard_tags: Vec<String>,
    pub soft_tags: Vec<String>,
    pub user_channels: Vec<String>,
    pub status_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel_id: String,
    pub channel_title: String,
    pub main_channel_id: Option<String>,
    pub description: Option<String>,
    pub country: Option<String>,
    pub logo_url: Option<String>,
    pub subscriber_count: Option<u64>,
    pub view_count: Option<u64>,
    pub status: ChannelStatus,
    pub status_message: Option<String>,
    pub relevance: Option<f64>,
    pub lr: Option<String>,
    pub hard_tags: Vec<String>,
    pub soft_tags: Vec<String>,
    pub user_channels: Vec<String>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStats {
    pub views: Option<u64>,
    pub likes: Option<u64>,
    pub dislikes: Option<u64>,
}

/// A video as listed by the scraper, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoItem {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub duration_secs: Option<i64>,
    pub keywords: Vec<String>,
    pub statistics: VideoStats,
    pub upload_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub duration_secs: Option<i64>,
    pub keywords: Vec<String>,
    pub statistics: VideoStats,
    pub channel_id: String,
    pub channel_title: String,
    pub upload_date: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// The (id, title) pair a recommendation refresh is requested for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRef {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionTrackInfo {
    pub video_id: String,
    pub language_code: String,
    pub name: Option<String>,
    pub is_generated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionLine {
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionTrack {
    pub info: CaptionTrackInfo,
    pub lines: Vec<CaptionLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionRecord {
    pub video_id: String,
    pub channel_id: String,
    pub upload_date: DateTime<Utc>,
    pub info: CaptionTrackInfo,
    pub captions: Vec<CaptionLine>,
    pub updated: DateTime<Utc>,
}

/// One scraped recommendation. Position in the returned list is its rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedVideo {
    pub to_video_id: String,
    pub to_video_title: String,
    pub to_channel_id: Option<String>,
    pub to_channel_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationEdge {
    pub from_channel_id: String,
    pub from_video_id: String,
    pub from_video_title: String,
    pub to_video_id: String,
    pub to_video_title: String,
    pub to_channel_id: Option<String>,
    pub to_channel_title: Option<String>,
    pub rank: u32,
    pub source: RecSource,
    pub updated: DateTime<Utc>,
}

/// Channel snippet + statistics from the Data API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelData {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub country: Option<String>,
    pub logo_url: Option<String>,
    pub subscriber_count: Option<u64>,
    pub view_count: Option<u64>,
}

/// Video snippet + statistics + topics from the Data API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoData {
    pub video_id: String,
    pub video_title: String,
    pub description: Option<String>,
    pub channel_id: String,
    pub channel_title: String,
    pub language: Option<String>,
    pub category_id: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub tags: Vec<String>,
    pub topics: Vec<String>,
    pub stats: VideoStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedVideo {
    pub video_id: String,
    pub video_title: String,
    pub channel_id: Option<String>,
    pub channel_title: Option<String>,
    pub rank: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelVideoStub {
    pub video_id: String,
    pub video_title: String,
    pub published_at: DateTime<Utc>,
}

/// One page of a token-paginated API listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

/// Describes the most recent append to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Latest upload (or append time, for recommendations) covered by the append.
    pub ts: Option<DateTime<Utc>>,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub update_type: UpdateType,
    pub started: DateTime<Utc>,
    pub duration_secs: f64,
    pub channels_total: usize,
    pub channels_alive: usize,
    pub channels_dead: usize,
    pub channels_succeeded: usize,
    pub channels_failed: usize,
    pub channels_skipped: usize,
    pub videos_stored: usize,
    pub captions_stored: usize,
    pub recs_stored: usize,
    pub api_requests: u64,
    pub scraper_requests: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunRequest {
    pub mode: UpdateType,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunStartedResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialStatus {
    pub available: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrendingExportResponse {
    pub success: bool,
    pub message: String,
    pub path: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl<'r> Responder<'r, 'static> for ErrorResponse {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let json = serde_json::to_string(&self).map_err(|_| Status::InternalServerError)?;
        Response::build()
            .status(Status::Conflict)
            .header(ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}
