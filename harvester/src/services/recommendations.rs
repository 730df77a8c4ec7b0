use crate::models::{RecSource, RecommendationEdge, RecommendedVideo, RelatedVideo, VideoRef};
use crate::services::fanout;
use crate::services::scraper::Scraper;
use crate::services::youtube_api::ApiClient;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::Arc;

/// Edges for a batch of videos, plus the videos that needed the API.
#[derive(Debug, Default)]
pub struct ResolvedRecommendations {
    pub edges: Vec<RecommendationEdge>,
    pub api_fallbacks: Vec<VideoRef>,
}

/// Recommendations come from the scraper. Videos it returns nothing for
/// (failed or empty) fall back to a related-video search.
#[derive(Clone)]
pub struct RecommendationResolver {
    scraper: Arc<dyn Scraper>,
    api: Arc<ApiClient>,
    parallel: usize,
}

impl RecommendationResolver {
    pub fn new(scraper: Arc<dyn Scraper>, api: Arc<ApiClient>, parallel: usize) -> Self {
        RecommendationResolver {
            scraper,
            api,
            parallel,
        }
    }

    pub async fn resolve(
        &self,
        channel_id: &str,
        channel_title: &str,
        videos: Vec<VideoRef>,
    ) -> ResolvedRecommendations {
        let updated = Utc::now();
        let scraper = self.scraper.clone();

        let scraped = fanout::map(
            videos,
            self.parallel,
            move |video: VideoRef| {
                let scraper = scraper.clone();
                async move { scraper.fetch_recommendations(&video.id).await }
            },
            None,
        )
        .await;

        let mut resolved = ResolvedRecommendations::default();
        let mut empty = Vec::new();
        for result in scraped {
            match result.outcome {
                Ok(recs) if !recs.is_empty() => resolved.edges.extend(rank_edges(
                    channel_id,
                    &result.item,
                    recs,
                    RecSource::Scraper,
                    updated,
                )),
                Ok(_) => empty.push(result.item),
                Err(e) => {
                    warn!(
                        "{channel_title} - unable to scrape recommendations for {}: {e:#}",
                        result.item.id
                    );
                    empty.push(result.item);
                }
            }
        }

        if empty.is_empty() {
            return resolved;
        }

        let api = self.api.clone();
        let related = fanout::map(
            empty,
            self.parallel,
            move |video: VideoRef| {
                let api = api.clone();
                async move {
                    api.related_videos(&video.id)
                        .await
                        .map_err(anyhow::Error::from)
                }
            },
            None,
        )
        .await;

        for result in related {
            match result.outcome {
                Ok(related) => {
                    let recs = related.into_iter().map(RecommendedVideo::from).collect();
                    resolved.edges.extend(rank_edges(
                        channel_id,
                        &result.item,
                        recs,
                        RecSource::Api,
                        updated,
                    ));
                }
                Err(e) => warn!(
                    "{channel_title} - related video fallback failed for {}, no recommendations stored: {e:#}",
                    result.item.id
                ),
            }
            resolved.api_fallbacks.push(result.item);
        }

        info!(
            "{channel_title} - {} videos fell back to the API for recommendations: {}",
            resolved.api_fallbacks.len(),
            resolved
                .api_fallbacks
                .iter()
                .map(|v| v.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        resolved
    }
}

impl From<RelatedVideo> for RecommendedVideo {
    fn from(related: RelatedVideo) -> Self {
        RecommendedVideo {
            to_video_id: related.video_id,
            to_video_title: related.video_title,
            to_channel_id: related.channel_id,
            to_channel_title: related.channel_title,
        }
    }
}

/// Ranks are the 1-based position in `recs`, whatever rank the source reported.
pub fn rank_edges(
    channel_id: &str,
    from: &VideoRef,
    recs: Vec<RecommendedVideo>,
    source: RecSource,
    updated: DateTime<Utc>,
) -> Vec<RecommendationEdge> {
    recs.into_iter()
        .zip(1..)
        .map(|(rec, rank)| RecommendationEdge {
            from_channel_id: channel_id.to_string(),
            from_video_id: from.id.clone(),
            from_video_title: from.title.clone(),
            to_video_id: rec.to_video_id,
            to_video_title: rec.to_video_title,
            to_channel_id: rec.to_channel_id,
            to_channel_title: rec.to_channel_title,
            rank,
            source,
            updated,
        })
        .collect()
}
