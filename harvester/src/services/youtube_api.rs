use crate::error::ApiError;
use crate::models::{ChannelData, ChannelVideoStub, Page, RelatedVideo, VideoData, VideoStats};
use crate::services::executor::QuotaAwareExecutor;
use crate::utils::{parse_count, parse_datetime, parse_iso8601_duration_to_seconds, string_list};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const MAX_PAGE_SIZE: &str = "50";

/// The YouTube Data API v3, one request per call. Every call takes the key to use.
#[async_trait]
pub trait YouTubeApi: Send + Sync {
    async fn channel(&self, key: &str, channel_id: &str) -> Result<Option<ChannelData>, ApiError>;

    async fn video(&self, key: &str, video_id: &str) -> Result<Option<VideoData>, ApiError>;

    async fn search_related(
        &self,
        key: &str,
        video_id: &str,
        max_results: u32,
    ) -> Result<Vec<RelatedVideo>, ApiError>;

    async fn search_channel_uploads(
        &self,
        key: &str,
        channel_id: &str,
        published_after: Option<DateTime<Utc>>,
        published_before: Option<DateTime<Utc>>,
        page_token: Option<&str>,
    ) -> Result<Page<ChannelVideoStub>, ApiError>;

    async fn list_trending(
        &self,
        key: &str,
        region_code: &str,
        category_id: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<Page<VideoData>, ApiError>;
}

pub struct YouTubeDataApi {
    client: Client,
}

impl Default for YouTubeDataApi {
    fn default() -> Self {
        Self::new()
    }
}

impl YouTubeDataApi {
    pub fn new() -> Self {
        YouTubeDataApi {
            client: Client::new(),
        }
    }

    async fn get_json(
        &self,
        resource: &str,
        key: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        // Documentation: https://developers.google.com/youtube/v3/docs
        let url = format!("{API_BASE}/{resource}");
        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("key", key)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), body));
        }

        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl YouTubeApi for YouTubeDataApi {
    async fn channel(&self, key: &str, channel_id: &str) -> Result<Option<ChannelData>, ApiError> {
        let response = self
            .get_json(
                "channels",
                key,
                &[
                    ("part", "snippet,statistics".to_string()),
                    ("id", channel_id.to_string()),
                ],
            )
            .await?;

        Ok(first_item(&response).map(|item| parse_channel(channel_id, item)))
    }

    async fn video(&self, key: &str, video_id: &str) -> Result<Option<VideoData>, ApiError> {
        let response = self
            .get_json(
                "videos",
                key,
                &[
                    ("part", "snippet,topicDetails,statistics,contentDetails".to_string()),
                    ("id", video_id.to_string()),
                ],
            )
            .await?;

        Ok(first_item(&response).map(parse_video))
    }

    async fn search_related(
        &self,
        key: &str,
        video_id: &str,
        max_results: u32,
    ) -> Result<Vec<RelatedVideo>, ApiError> {
        let response = self
            .get_json(
                "search",
                key,
                &[
                    ("part", "snippet".to_string()),
                    ("relatedToVideoId", video_id.to_string()),
                    ("type", "video".to_string()),
                    ("maxResults", max_results.to_string()),
                ],
            )
            .await?;

        Ok(parse_related(&response))
    }

    async fn search_channel_uploads(
        &self,
        key: &str,
        channel_id: &str,
        published_after: Option<DateTime<Utc>>,
        published_before: Option<DateTime<Utc>>,
        page_token: Option<&str>,
    ) -> Result<Page<ChannelVideoStub>, ApiError> {
        let mut params = vec![
            ("part", "snippet".to_string()),
            ("channelId", channel_id.to_string()),
            ("type", "video".to_string()),
            ("order", "date".to_string()),
            ("maxResults", MAX_PAGE_SIZE.to_string()),
        ];
        if let Some(after) = published_after {
            params.push((
                "publishedAfter",
                after.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        if let Some(before) = published_before {
            params.push((
                "publishedBefore",
                before.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let response = self.get_json("search", key, &params).await?;

        Ok(Page {
            items: parse_upload_stubs(&response),
            next_page_token: next_page_token(&response),
        })
    }

    async fn list_trending(
        &self,
        key: &str,
        region_code: &str,
        category_id: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<Page<VideoData>, ApiError> {
        let mut params = vec![
            ("part", "snippet,statistics".to_string()),
            ("chart", "mostPopular".to_string()),
            ("regionCode", region_code.to_string()),
            ("maxResults", MAX_PAGE_SIZE.to_string()),
        ];
        if let Some(category) = category_id {
            params.push(("videoCategoryId", category.to_string()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let response = self.get_json("videos", key, &params).await?;
        let items = response["items"]
            .as_array()
            .map(|items| items.iter().map(parse_video).collect())
            .unwrap_or_default();

        Ok(Page {
            items,
            next_page_token: next_page_token(&response),
        })
    }
}

fn first_item(response: &Value) -> Option<&Value> {
    response["items"].as_array().and_then(|items| items.first())
}

fn next_page_token(response: &Value) -> Option<String> {
    response["nextPageToken"]
        .as_str()
        .filter(|t| !t.is_empty())
        .map(String::from)
}

fn opt_str(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(String::from)
}

pub(crate) fn parse_channel(channel_id: &str, item: &Value) -> ChannelData {
    ChannelData {
        id: channel_id.to_string(),
        title: item["snippet"]["title"].as_str().unwrap_or("").to_string(),
        description: opt_str(&item["snippet"]["description"]),
        country: opt_str(&item["snippet"]["country"]),
        logo_url: opt_str(&item["snippet"]["thumbnails"]["default"]["url"]),
        subscriber_count: parse_count(&item["statistics"]["subscriberCount"]),
        view_count: parse_count(&item["statistics"]["viewCount"]),
    }
}

pub(crate) fn parse_video(item: &Value) -> VideoData {
    // videos.list returns the id as a string, search.list as an object
    let video_id = item["id"]
        .as_str()
        .or_else(|| item["id"]["videoId"].as_str())
        .unwrap_or("")
        .to_string();

    VideoData {
        video_id,
        video_title: item["snippet"]["title"].as_str().unwrap_or("").to_string(),
        description: opt_str(&item["snippet"]["description"]),
        channel_id: item["snippet"]["channelId"]
            .as_str()
            .unwrap_or("")
            .to_string(),
        channel_title: item["snippet"]["channelTitle"]
            .as_str()
            .unwrap_or("")
            .to_string(),
        language: opt_str(&item["snippet"]["defaultLanguage"]),
        category_id: opt_str(&item["snippet"]["categoryId"]),
        published_at: item["snippet"]["publishedAt"]
            .as_str()
            .and_then(parse_datetime),
        duration_secs: item["contentDetails"]["duration"]
            .as_str()
            .and_then(parse_iso8601_duration_to_seconds),
        tags: string_list(&item["snippet"]["tags"]),
        topics: string_list(&item["topicDetails"]["relevantTopicIds"]),
        stats: VideoStats {
            views: parse_count(&item["statistics"]["viewCount"]),
            likes: parse_count(&item["statistics"]["likeCount"]),
            dislikes: parse_count(&item["statistics"]["dislikeCount"]),
        },
    }
}

pub(crate) fn parse_related(response: &Value) -> Vec<RelatedVideo> {
    let mut vids = Vec::new();
    let mut rank = 1;
    if let Some(items) = response["items"].as_array() {
        for item in items {
            let Some(video_id) = item["id"]["videoId"].as_str() else {
                continue;
            };
            vids.push(RelatedVideo {
                video_id: video_id.to_string(),
                video_title: item["snippet"]["title"].as_str().unwrap_or("").to_string(),
                channel_id: opt_str(&item["snippet"]["channelId"]),
                channel_title: opt_str(&item["snippet"]["channelTitle"]),
                rank,
            });
            rank += 1;
        }
    }
    vids
}

pub(crate) fn parse_upload_stubs(response: &Value) -> Vec<ChannelVideoStub> {
    response["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let published_at = item["snippet"]["publishedAt"]
                        .as_str()
                        .and_then(parse_datetime)?;
                    Some(ChannelVideoStub {
                        video_id: item["id"]["videoId"].as_str()?.to_string(),
                        video_title: item["snippet"]["title"].as_str().unwrap_or("").to_string(),
                        published_at,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// The Data API behind the credential pool: every call goes through the
/// quota-aware executor, paginated listings are followed to the last page.
pub struct ApiClient {
    api: Arc<dyn YouTubeApi>,
    executor: QuotaAwareExecutor,
    related_max_results: u32,
}

impl ApiClient {
    pub fn new(api: Arc<dyn YouTubeApi>, executor: QuotaAwareExecutor, related_max_results: u32) -> Self {
        ApiClient {
            api,
            executor,
            related_max_results,
        }
    }

    pub fn request_count(&self) -> u64 {
        self.executor.request_count()
    }

    pub fn credentials_available(&self) -> usize {
        self.executor.pool().available()
    }

    pub async fn channel_data(&self, channel_id: &str) -> Result<Option<ChannelData>, ApiError> {
        let api = self.api.as_ref();
        self.executor
            .execute("channels.list", move |key| async move {
                api.channel(&key, channel_id).await
            })
            .await
    }

    pub async fn video_data(&self, video_id: &str) -> Result<Option<VideoData>, ApiError> {
        let api = self.api.as_ref();
        self.executor
            .execute("videos.list", move |key| async move {
                api.video(&key, video_id).await
            })
            .await
    }

    pub async fn related_videos(&self, video_id: &str) -> Result<Vec<RelatedVideo>, ApiError> {
        let api = self.api.as_ref();
        let max_results = self.related_max_results;
        self.executor
            .execute("search.list related", move |key| async move {
                api.search_related(&key, video_id, max_results).await
            })
            .await
    }

    /// Uploads published strictly before `published_before`, newest first, one
    /// search page per batch. A page is only requested when the stream is polled.
    pub fn uploads_before<'a>(
        &'a self,
        channel_id: &'a str,
        published_before: DateTime<Utc>,
    ) -> BoxStream<'a, Result<Vec<ChannelVideoStub>, ApiError>> {
        // state: the token of the next page to read, None once the last page is read
        stream::unfold(Some(None::<String>), move |next| async move {
            let token = next?;
            let api = self.api.as_ref();
            let page = self
                .executor
                .execute("search.list channel", move |key| {
                    let token = token.clone();
                    async move {
                        api.search_channel_uploads(
                            &key,
                            channel_id,
                            None,
                            Some(published_before),
                            token.as_deref(),
                        )
                        .await
                    }
                })
                .await;

            match page {
                Ok(page) => {
                    let mut vids: Vec<ChannelVideoStub> = page
                        .items
                        .into_iter()
                        .filter(|v| v.published_at < published_before)
                        .collect();
                    vids.sort_by(|a, b| b.published_at.cmp(&a.published_at));
                    Some((Ok(vids), page.next_page_token.map(Some)))
                }
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }

    /// Up to `max` most popular videos, skipping excluded categories.
    pub async fn trending(
        &self,
        region_code: &str,
        category_id: Option<&str>,
        max: usize,
        excluded_categories: &HashSet<String>,
    ) -> Result<Vec<VideoData>, ApiError> {
        let api = self.api.as_ref();
        let mut videos = Vec::new();
        let mut next_page_token: Option<String> = None;

        while videos.len() < max {
            let token = next_page_token.clone();
            let page = self
                .executor
                .execute("videos.list chart", move |key| {
                    let token = token.clone();
                    async move {
                        api.list_trending(&key, region_code, category_id, token.as_deref())
                            .await
                    }
                })
                .await?;

            let remaining = max - videos.len();
            videos.extend(
                page.items
                    .into_iter()
                    .filter(|v| !is_excluded(v, excluded_categories))
                    .take(remaining),
            );

            match page.next_page_token {
                Some(token) => next_page_token = Some(token),
                None => break,
            }
        }

        Ok(videos)
    }
}

fn is_excluded(video: &VideoData, excluded_categories: &HashSet<String>) -> bool {
    video
        .category_id
        .as_ref()
        .is_some_and(|c| excluded_categories.contains(c))
}
