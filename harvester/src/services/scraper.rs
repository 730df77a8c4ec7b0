use crate::models::{
    CaptionLine, CaptionTrack, CaptionTrackInfo, ChannelVideoStub, RecommendedVideo, VideoData,
    VideoItem, VideoStats,
};
use crate::services::youtube_api::ApiClient;
use crate::utils::{parse_count, string_list};
use chrono::{DateTime, Utc};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;
use yt_transcript_rs::api::YouTubeTranscriptApi;

const UPLOADS_FEED_URL: &str = "https://www.youtube.com/feeds/videos.xml";
const WATCH_URL: &str = "https://www.youtube.com/watch";
/// The uploads feed never lists more entries than this.
const FEED_ENTRY_LIMIT: usize = 15;
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

lazy_static! {
    static ref INITIAL_PLAYER_RESPONSE: Regex =
        Regex::new(r"(?s)ytInitialPlayerResponse\s*=\s*(\{.+?\});\s*(?:var\s|</script>)")
            .expect("valid player response regex");
    static ref INITIAL_DATA: Regex =
        Regex::new(r"(?s)ytInitialData\s*=\s*(\{.+?\});\s*(?:var\s|</script>)")
            .expect("valid initial data regex");
}

/// The scraped web interface. Free of quota, but unreliable per video.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Channel uploads as batches, newest first. Pull-based: nothing more is
    /// fetched once the consumer stops polling.
    fn list_uploads<'a>(&'a self, channel_id: &'a str) -> BoxStream<'a, Result<Vec<VideoItem>>>;

    async fn list_caption_tracks(&self, video_id: &str) -> Result<Vec<CaptionTrackInfo>>;

    async fn fetch_caption_track(&self, track: &CaptionTrackInfo) -> Result<CaptionTrack>;

    /// Recommendations shown next to a video, in display order. May be empty.
    async fn fetch_recommendations(&self, video_id: &str) -> Result<Vec<RecommendedVideo>>;

    fn request_count(&self) -> u64;
}

/// Reads the public uploads feed and watch pages. Uploads older than the feed
/// reaches, and details a watch page won't give, come from the Data API.
pub struct WebScraper {
    client: Client,
    api: Arc<ApiClient>,
    requests: AtomicU64,
}

impl WebScraper {
    pub fn new(api: Arc<ApiClient>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build scraper HTTP client")?;
        Ok(WebScraper {
            client,
            api,
            requests: AtomicU64::new(0),
        })
    }

    async fn get_text(&self, url: Url) -> Result<String> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .get(url.clone())
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Request to {url} returned status {status}");
        }

        response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {url}"))
    }

    async fn watch_page(&self, video_id: &str) -> Result<String> {
        let url = Url::parse_with_params(WATCH_URL, &[("v", video_id), ("hl", "en")])?;
        self.get_text(url).await
    }

    async fn player_response(&self, video_id: &str) -> Result<Value> {
        let html = self.watch_page(video_id).await?;
        extract_initial_json(&html, &INITIAL_PLAYER_RESPONSE)
            .with_context(|| format!("No player response on watch page of {video_id}"))
    }

    async fn feed_batch(&self, channel_id: &str) -> Result<Vec<VideoItem>> {
        let url = Url::parse_with_params(UPLOADS_FEED_URL, &[("channel_id", channel_id)])?;
        let feed = self.get_text(url).await?;
        let stubs = parse_upload_feed(feed.as_bytes())?;

        let vids = self.with_details(stubs).await;
        info!("Scraped {} uploads for channel {channel_id}", vids.len());
        Ok(vids)
    }

    /// Fills in each stub from its watch page, or from videos.list when the
    /// page can't be read. Upload dates are left as listed.
    async fn with_details(&self, stubs: Vec<VideoItem>) -> Vec<VideoItem> {
        let mut vids = Vec::with_capacity(stubs.len());
        for stub in stubs {
            let video = match self.player_response(&stub.id).await {
                Ok(player) => apply_video_details(stub, &player),
                Err(e) => {
                    warn!("Unable to read watch page of video {}: {e:#}", stub.id);
                    match self.api.video_data(&stub.id).await {
                        Ok(Some(data)) => apply_api_details(stub, data),
                        Ok(None) => stub,
                        Err(e) => {
                            warn!("Unable to read details for video {}: {e}", stub.id);
                            stub
                        }
                    }
                }
            };
            vids.push(video);
        }
        vids
    }
}

#[async_trait]
impl Scraper for WebScraper {
    fn list_uploads<'a>(&'a self, channel_id: &'a str) -> BoxStream<'a, Result<Vec<VideoItem>>> {
        stream::once(self.feed_batch(channel_id))
            .flat_map(move |feed| {
                let older = match feed.as_ref().ok().and_then(|vids| older_than_feed(vids)) {
                    Some(oldest) => self
                        .api
                        .uploads_before(channel_id, oldest)
                        .then(move |page| async move {
                            let stubs: Vec<VideoItem> =
                                page?.into_iter().map(VideoItem::from).collect();
                            anyhow::Ok(self.with_details(stubs).await)
                        })
                        .boxed(),
                    None => stream::empty().boxed(),
                };
                stream::iter([feed]).chain(older)
            })
            .boxed()
    }

    async fn list_caption_tracks(&self, video_id: &str) -> Result<Vec<CaptionTrackInfo>> {
        let player = self.player_response(video_id).await?;
        Ok(parse_caption_tracks(video_id, &player))
    }

    async fn fetch_caption_track(&self, track: &CaptionTrackInfo) -> Result<CaptionTrack> {
        let api = YouTubeTranscriptApi::new(None, None, None)
            .map_err(|e| anyhow::anyhow!("Failed to create YouTubeTranscriptApi: {e:?}"))?;
        let languages = &[track.language_code.as_str()];

        self.requests.fetch_add(1, Ordering::Relaxed);
        let transcript = api
            .fetch_transcript(&track.video_id, languages, false)
            .await
            .map_err(|e| {
                anyhow::anyhow!("Failed to fetch transcript for {}: {e:?}", track.video_id)
            })?;

        let mut lines = Vec::new();
        for entry in transcript {
            lines.push(CaptionLine {
                text: entry.text,
                start_time: entry.start,
                end_time: entry.start + entry.duration,
            });
        }

        Ok(CaptionTrack {
            info: track.clone(),
            lines,
        })
    }

    async fn fetch_recommendations(&self, video_id: &str) -> Result<Vec<RecommendedVideo>> {
        let html = self.watch_page(video_id).await?;
        let data = extract_initial_json(&html, &INITIAL_DATA)
            .with_context(|| format!("No initial data on watch page of {video_id}"))?;
        Ok(parse_recommendations(&data))
    }

    fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

fn extract_initial_json(html: &str, pattern: &Regex) -> Option<Value> {
    let captures = pattern.captures(html)?;
    serde_json::from_str(captures.get(1)?.as_str()).ok()
}

/// Entries of a channel's Atom upload feed, newest first.
pub(crate) fn parse_upload_feed(bytes: &[u8]) -> Result<Vec<VideoItem>> {
    let feed = feed_rs::parser::parse(bytes).context("Failed to parse uploads feed")?;

    let mut vids: Vec<VideoItem> = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let id = entry
                .id
                .strip_prefix("yt:video:")
                .unwrap_or(&entry.id)
                .to_string();
            let upload_date = entry.published.or(entry.updated)?;
            Some(VideoItem {
                id,
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                description: None,
                duration_secs: None,
                keywords: Vec::new(),
                statistics: VideoStats::default(),
                upload_date,
            })
        })
        .collect();

    vids.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
    Ok(vids)
}

fn apply_video_details(mut video: VideoItem, player: &Value) -> VideoItem {
    let details = &player["videoDetails"];
    if let Some(title) = details["title"].as_str() {
        video.title = title.to_string();
    }
    video.description = details["shortDescription"].as_str().map(String::from);
    video.duration_secs = details["lengthSeconds"]
        .as_str()
        .and_then(|s| s.parse().ok());
    video.keywords = string_list(&details["keywords"]);
    video.statistics.views = parse_count(&details["viewCount"]);

    video
}

fn apply_api_details(mut video: VideoItem, data: VideoData) -> VideoItem {
    if !data.video_title.is_empty() {
        video.title = data.video_title;
    }
    video.description = data.description;
    video.duration_secs = data.duration_secs;
    video.keywords = data.tags;
    video.statistics = data.stats;
    video
}

/// Where listing continues when the feed may have cut off older uploads.
fn older_than_feed(feed: &[VideoItem]) -> Option<DateTime<Utc>> {
    if feed.len() < FEED_ENTRY_LIMIT {
        return None;
    }
    feed.iter().map(|v| v.upload_date).min()
}

impl From<ChannelVideoStub> for VideoItem {
    fn from(stub: ChannelVideoStub) -> Self {
        VideoItem {
            id: stub.video_id,
            title: stub.video_title,
            description: None,
            duration_secs: None,
            keywords: Vec::new(),
            statistics: VideoStats::default(),
            upload_date: stub.published_at,
        }
    }
}

pub(crate) fn parse_caption_tracks(video_id: &str, player: &Value) -> Vec<CaptionTrackInfo> {
    player["captions"]["playerCaptionsTracklistRenderer"]["captionTracks"]
        .as_array()
        .map(|tracks| {
            tracks
                .iter()
                .filter_map(|track| {
                    Some(CaptionTrackInfo {
                        video_id: video_id.to_string(),
                        language_code: track["languageCode"].as_str()?.to_string(),
                        name: track["name"]["simpleText"]
                            .as_str()
                            .or_else(|| track["name"]["runs"][0]["text"].as_str())
                            .map(String::from),
                        is_generated: track["kind"].as_str() == Some("asr"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn parse_recommendations(data: &Value) -> Vec<RecommendedVideo> {
    let results = &data["contents"]["twoColumnWatchNextResults"]["secondaryResults"]
        ["secondaryResults"]["results"];

    results
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let renderer = &item["compactVideoRenderer"];
                    let video_id = renderer["videoId"].as_str()?;
                    let byline = &renderer["longBylineText"]["runs"][0];
                    Some(RecommendedVideo {
                        to_video_id: video_id.to_string(),
                        to_video_title: renderer["title"]["simpleText"]
                            .as_str()
                            .or_else(|| renderer["title"]["runs"][0]["text"].as_str())
                            .unwrap_or("")
                            .to_string(),
                        to_channel_id: byline["navigationEndpoint"]["browseEndpoint"]["browseId"]
                            .as_str()
                            .map(String::from),
                        to_channel_title: byline["text"].as_str().map(String::from),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
