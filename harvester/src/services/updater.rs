use crate::config::{HarvestConfig, RefreshWindowConfig};
use crate::error::ApiError;
use crate::models::{
    CaptionRecord, ChannelData, ChannelRecord, ChannelStatus, RunSummary, SeedChannel,
    SnapshotMetadata, UpdateType, VideoItem, VideoRecord, VideoRef,
};
use crate::services::fanout;
use crate::services::freshness;
use crate::services::recommendations::RecommendationResolver;
use crate::services::scraper::Scraper;
use crate::services::seeds::SeedChannelSource;
use crate::services::store::{AppendOnlyStore, MissingRecsQuery, StoreFactory};
use crate::services::youtube_api::ApiClient;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Instant;

/// How one channel's video/caption/recommendation pipeline ended.
#[derive(Debug)]
pub enum ChannelOutcome {
    Skipped,
    Refreshed(ChannelUpdate),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelUpdate {
    pub videos: usize,
    pub captions: usize,
    pub recs: usize,
}

#[derive(Clone)]
pub struct DataUpdater {
    api: Arc<ApiClient>,
    scraper: Arc<dyn Scraper>,
    stores: Arc<dyn StoreFactory>,
    seeds: Arc<dyn SeedChannelSource>,
    missing_recs: Arc<dyn MissingRecsQuery>,
    recommendations: RecommendationResolver,
    limited_to_seed_channels: Vec<String>,
    parallel_channels: usize,
    default_parallel: usize,
    caption_language: String,
    refresh: RefreshWindowConfig,
}

impl DataUpdater {
    pub fn new(
        api: Arc<ApiClient>,
        scraper: Arc<dyn Scraper>,
        stores: Arc<dyn StoreFactory>,
        seeds: Arc<dyn SeedChannelSource>,
        missing_recs: Arc<dyn MissingRecsQuery>,
        config: &HarvestConfig,
    ) -> Self {
        let recommendations =
            RecommendationResolver::new(scraper.clone(), api.clone(), config.default_parallel);
        DataUpdater {
            api,
            scraper,
            stores,
            seeds,
            missing_recs,
            recommendations,
            limited_to_seed_channels: config.limited_to_seed_channels.clone(),
            parallel_channels: config.parallel_channels,
            default_parallel: config.default_parallel,
            caption_language: config.caption_language.clone(),
            refresh: config.refresh.clone(),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub async fn update_data(&self, update_type: UpdateType) -> Result<RunSummary> {
        info!("Starting data update: {update_type:?}");
        let started = Utc::now();
        let timer = Instant::now();
        let api_requests_before = self.api.request_count();
        let scraper_requests_before = self.scraper.request_count();

        let channels = self.update_channels().await?;
        let alive: Vec<ChannelRecord> = channels
            .iter()
            .filter(|c| c.status == ChannelStatus::Alive)
            .cloned()
            .collect();
        let dead = channels.len() - alive.len();
        info!(
            "Updated stats for {} channels ({} alive, {dead} dead) in {:.1}s",
            channels.len(),
            alive.len(),
            timer.elapsed().as_secs_f64()
        );

        if self.api.credentials_available() == 0 {
            error!("All API keys have run out of quota, aborting {update_type:?} update");
            return Err(ApiError::PoolExhausted.into());
        }

        let mut summary = RunSummary {
            update_type,
            started,
            duration_secs: 0.0,
            channels_total: channels.len(),
            channels_alive: alive.len(),
            channels_dead: dead,
            channels_succeeded: 0,
            channels_failed: dead,
            channels_skipped: 0,
            videos_stored: 0,
            captions_stored: 0,
            recs_stored: 0,
            api_requests: 0,
            scraper_requests: 0,
        };

        if update_type == UpdateType::Channels {
            summary.channels_succeeded = alive.len();
        } else {
            let total = alive.len();
            let progress = |done: usize, total: usize| {
                debug!("Channel updates {done}/{total} complete");
            };
            let updater = Arc::new(self.clone());
            let results = fanout::map(
                alive,
                self.parallel_channels,
                move |channel: ChannelRecord| {
                    let updater = updater.clone();
                    async move { updater.update_all_in_channel(&channel, update_type).await }
                },
                Some(&progress),
            )
            .await;

            for result in results {
                let title = &result.item.channel_title;
                match result.outcome {
                    Ok(ChannelOutcome::Skipped) => summary.channels_skipped += 1,
                    Ok(ChannelOutcome::Refreshed(update)) => {
                        summary.channels_succeeded += 1;
                        summary.videos_stored += update.videos;
                        summary.captions_stored += update.captions;
                        summary.recs_stored += update.recs;
                        info!(
                            "{title} - Completed {}/{total} update of videos/recs/captions in {:.1}s",
                            summary.channels_succeeded + summary.channels_skipped,
                            timer.elapsed().as_secs_f64()
                        );
                    }
                    Err(e) => {
                        error!("{title} - Error updating channel: {e:#}");
                        summary.channels_failed += 1;
                    }
                }
            }
        }

        summary.duration_secs = timer.elapsed().as_secs_f64();
        summary.api_requests = self.api.request_count() - api_requests_before;
        summary.scraper_requests = self.scraper.request_count() - scraper_requests_before;

        info!(
            "Update complete: {} channels succeeded, {} failed, {} skipped in {:.1}s, {} api requests, {} scraper requests",
            summary.channels_succeeded,
            summary.channels_failed,
            summary.channels_skipped,
            summary.duration_secs,
            summary.api_requests,
            summary.scraper_requests
        );
        Ok(summary)
    }

    async fn update_channels(&self) -> Result<Vec<ChannelRecord>> {
        let mut seeds = self
            .seeds
            .channels()
            .await
            .context("Failed to read seed channels")?;

        if self.limited_to_seed_channels.is_empty() {
            info!("Starting channels update. Limited to (All)");
        } else {
            info!(
                "Starting channels update. Limited to ({})",
                self.limited_to_seed_channels.join("|")
            );
            seeds.retain(|s| self.limited_to_seed_channels.contains(&s.id));
        }

        let updated = Utc::now();
        let total = seeds.len();
        let progress = |done: usize, _: usize| debug!("Reading channels {done}/{total}");
        let api = self.api.clone();
        let results = fanout::map(
            seeds,
            self.default_parallel,
            move |seed: SeedChannel| {
                let api = api.clone();
                async move { anyhow::Ok(lookup_channel(&api, seed, updated).await) }
            },
            Some(&progress),
        )
        .await;

        let channels: Vec<ChannelRecord> = results
            .into_iter()
            .map(|result| match result.outcome {
                Ok(record) => record,
                Err(e) => channel_record(result.item, None, Some(format!("{e:#}")), updated),
            })
            .collect();

        if !channels.is_empty() {
            self.stores
                .channels()
                .append(&channels)
                .await
                .context("Failed to store channel records")?;
        }
        Ok(channels)
    }

    pub async fn update_all_in_channel(
        &self,
        channel: &ChannelRecord,
        update_type: UpdateType,
    ) -> Result<ChannelOutcome> {
        let title = &channel.channel_title;
        if let Some(message) = &channel.status_message {
            info!("{title} - Not updating videos/recs/captions because it has a status msg: {message}");
            return Ok(ChannelOutcome::Skipped);
        }
        info!("{title} - Starting channel update of videos/recs/captions");

        let now = Utc::now();
        let video_store = self.stores.videos(&channel.channel_id);
        let prior_videos = video_store.latest_snapshot_metadata().await?;

        let videos = if freshness::channel_needs_refresh(
            prior_videos.map(|m| m.modified),
            now,
            self.refresh.refresh_all_after,
        ) {
            let cutoff = freshness::video_backfill_cutoff(
                prior_videos.is_some(),
                now,
                self.refresh.refresh_videos_within,
                self.refresh.from,
            );
            Some(self.channel_videos(channel, cutoff).await)
        } else {
            info!(
                "{title} - skipping update, video stats have been updated recently {:?}",
                prior_videos.map(|m| m.modified)
            );
            None
        };

        if videos.is_none() && update_type != UpdateType::AllWithMissingRecs {
            return Ok(ChannelOutcome::Skipped);
        }

        let mut update = ChannelUpdate::default();
        let mut rec_candidates = Vec::new();
        if let Some(videos) = &videos {
            if update_type != UpdateType::AllWithMissingRecs {
                rec_candidates = self.videos_to_update_recs(channel, videos, now).await?;
            }
            update.videos = self
                .save_videos(channel, video_store.as_ref(), videos, prior_videos)
                .await?;
            update.captions = self.save_new_captions(channel, videos).await?;
        }
        // after the video save, so uploads listed in this run are included
        if update_type == UpdateType::AllWithMissingRecs {
            rec_candidates = self
                .missing_recs
                .videos_without_recs(&channel.channel_id)
                .await
                .context("Failed to query videos missing recommendations")?;
        }
        update.recs = self.save_recs(channel, rec_candidates).await?;

        Ok(ChannelOutcome::Refreshed(update))
    }

    /// Uploads newer than `cutoff`. Stops pulling batches at the first older video.
    async fn channel_videos(&self, channel: &ChannelRecord, cutoff: DateTime<Utc>) -> Vec<VideoItem> {
        let mut uploads = self.scraper.list_uploads(&channel.channel_id);
        let mut videos = Vec::new();

        'batches: while let Some(batch) = uploads.next().await {
            match batch {
                Ok(batch) => {
                    for video in batch {
                        if video.upload_date <= cutoff {
                            break 'batches;
                        }
                        videos.push(video);
                    }
                }
                Err(e) => {
                    warn!(
                        "{} - Unable to list uploads, keeping {} read so far: {e:#}",
                        channel.channel_title,
                        videos.len()
                    );
                    break;
                }
            }
        }
        videos
    }

    async fn save_videos(
        &self,
        channel: &ChannelRecord,
        store: &dyn AppendOnlyStore<VideoRecord>,
        videos: &[VideoItem],
        prior: Option<SnapshotMetadata>,
    ) -> Result<usize> {
        let updated = Utc::now();
        let records: Vec<VideoRecord> = videos
            .iter()
            .map(|v| VideoRecord {
                video_id: v.id.clone(),
                title: v.title.clone(),
                description: v.description.clone(),
                duration_secs: v.duration_secs,
                keywords: v.keywords.clone(),
                statistics: v.statistics.clone(),
                channel_id: channel.channel_id.clone(),
                channel_title: channel.channel_title.clone(),
                upload_date: v.upload_date,
                updated,
            })
            .collect();

        store
            .append(&records)
            .await
            .context("Failed to store videos")?;

        let last_upload = prior.and_then(|m| m.ts);
        let new_videos = records
            .iter()
            .filter(|v| last_upload.map_or(true, |last| v.upload_date > last))
            .count();
        info!(
            "{} - Recorded {} videos. {new_videos} new, {} updated",
            channel.channel_title,
            records.len(),
            records.len() - new_videos
        );
        Ok(records.len())
    }

    /// Captions for videos uploaded after the latest one already captioned.
    async fn save_new_captions(&self, channel: &ChannelRecord, videos: &[VideoItem]) -> Result<usize> {
        let store = self.stores.captions(&channel.channel_id);
        let last_upload = store.latest_snapshot_metadata().await?.and_then(|m| m.ts);

        let to_fetch: Vec<VideoItem> = videos
            .iter()
            .filter(|v| last_upload.map_or(true, |last| v.upload_date > last))
            .cloned()
            .collect();

        let updater = Arc::new(self.clone());
        let owner = Arc::new(channel.clone());
        let results = fanout::map(
            to_fetch,
            self.default_parallel,
            move |video: VideoItem| {
                let (updater, owner) = (updater.clone(), owner.clone());
                async move { updater.caption(&owner, &video).await }
            },
            None,
        )
        .await;

        let mut captions = Vec::new();
        for result in results {
            match result.outcome {
                Ok(Some(caption)) => captions.push(caption),
                Ok(None) => {}
                Err(e) => warn!(
                    "{} - Unable to get captions for {}: {e:#}",
                    channel.channel_title, result.item.id
                ),
            }
        }

        store
            .append(&captions)
            .await
            .context("Failed to store captions")?;
        info!(
            "{} - Saved {} captions",
            channel.channel_title,
            captions.len()
        );
        Ok(captions.len())
    }

    async fn caption(&self, channel: &ChannelRecord, video: &VideoItem) -> Result<Option<CaptionRecord>> {
        let tracks = self.scraper.list_caption_tracks(&video.id).await?;
        let Some(info) = tracks
            .into_iter()
            .find(|t| t.language_code == self.caption_language)
        else {
            return Ok(None);
        };

        let track = self.scraper.fetch_caption_track(&info).await?;
        Ok(Some(CaptionRecord {
            video_id: video.id.clone(),
            channel_id: channel.channel_id.clone(),
            upload_date: video.upload_date,
            info: track.info,
            captions: track.lines,
            updated: Utc::now(),
        }))
    }

    async fn videos_to_update_recs(
        &self,
        channel: &ChannelRecord,
        videos: &[VideoItem],
        now: DateTime<Utc>,
    ) -> Result<Vec<VideoRef>> {
        let prior = self
            .stores
            .recommendations(&channel.channel_id)
            .latest_snapshot_metadata()
            .await?;

        Ok(freshness::videos_needing_recommendation_refresh(
            videos,
            prior.and_then(|m| m.ts),
            now,
            self.refresh.refresh_recs_within,
            self.refresh.refresh_recs_min,
        ))
    }

    async fn save_recs(&self, channel: &ChannelRecord, videos: Vec<VideoRef>) -> Result<usize> {
        let resolved = self
            .recommendations
            .resolve(&channel.channel_id, &channel.channel_title, videos)
            .await;

        self.stores
            .recommendations(&channel.channel_id)
            .append(&resolved.edges)
            .await
            .context("Failed to store recommendations")?;

        info!(
            "{} - Recorded {} recs",
            channel.channel_title,
            resolved.edges.len()
        );
        Ok(resolved.edges.len())
    }
}

async fn lookup_channel(api: &ApiClient, seed: SeedChannel, updated: DateTime<Utc>) -> ChannelRecord {
    match api.channel_data(&seed.id).await {
        Ok(Some(data)) => {
            info!("{} - read channel details", data.title);
            let status_message = seed.status_message.clone();
            channel_record(seed, Some(data), status_message, updated)
        }
        Ok(None) => {
            warn!("{} - channel not found, marking it dead", seed.title);
            channel_record(seed, None, Some("Channel not found".to_string()), updated)
        }
        Err(e) => {
            error!(
                "{} - Error when updating details for channel: {e}",
                seed.title
            );
            channel_record(seed, None, Some(e.to_string()), updated)
        }
    }
}

/// Merges seed attributes with API data. No data means the channel is dead.
fn channel_record(
    seed: SeedChannel,
    data: Option<ChannelData>,
    status_message: Option<String>,
    updated: DateTime<Utc>,
) -> ChannelRecord {
    let status = if data.is_some() {
        ChannelStatus::Alive
    } else {
        ChannelStatus::Dead
    };
    let data = data.unwrap_or_default();
    let channel_title = if data.title.is_empty() {
        seed.title
    } else {
        data.title
    };

    ChannelRecord {
        channel_id: seed.id,
        channel_title,
        main_channel_id: seed.main_channel_id,
        description: data.description,
        country: data.country,
        logo_url: data.logo_url,
        subscriber_count: data.subscriber_count,
        view_count: data.view_count,
        status,
        status_message,
        relevance: seed.relevance,
        lr: seed.lr,
        hard_tags: seed.hard_tags,
        soft_tags: seed.soft_tags,
        user_channels: seed.user_channels,
        updated,
    }
}
