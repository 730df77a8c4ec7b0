//! Refresh decisions. Pure functions of timestamps and the configured windows.

use crate::models::{VideoItem, VideoRef};
use chrono::{DateTime, Duration, Utc};

/// Whether a channel's videos are stale. A channel that was never
/// harvested always needs a refresh.
pub fn channel_needs_refresh(
    last_modified: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> bool {
    match last_modified {
        Some(modified) => now - modified >= cooldown,
        None => true,
    }
}

/// Oldest upload date to collect video stats for.
///
/// With a prior snapshot the window overlaps what was already captured, so
/// recent videos get another stats sample rather than being skipped.
pub fn video_backfill_cutoff(
    has_prior_snapshot: bool,
    now: DateTime<Utc>,
    overlap_window: Duration,
    global_from: DateTime<Utc>,
) -> DateTime<Utc> {
    if has_prior_snapshot {
        now - overlap_window
    } else {
        global_from
    }
}

/// Videos whose recommendations should be fetched, newest first.
///
/// Without a prior recommendation snapshot every video qualifies. Otherwise
/// videos uploaded since that snapshot or within `rec_window` of `now` do,
/// padded with the newest remaining videos up to `minimum_count`.
pub fn videos_needing_recommendation_refresh(
    videos: &[VideoItem],
    prior_snapshot: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    rec_window: Duration,
    minimum_count: usize,
) -> Vec<VideoRef> {
    let mut newest_first: Vec<&VideoItem> = videos.iter().collect();
    newest_first.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));

    let Some(prior) = prior_snapshot else {
        return newest_first.into_iter().map(video_ref).collect();
    };

    let (mut selected, rest): (Vec<&VideoItem>, Vec<&VideoItem>) = newest_first
        .into_iter()
        .partition(|v| v.upload_date > prior || now - v.upload_date <= rec_window);

    let deficit = minimum_count.saturating_sub(selected.len());
    if deficit > 0 {
        selected.extend(rest.into_iter().take(deficit));
    }

    selected.into_iter().map(video_ref).collect()
}

fn video_ref(v: &VideoItem) -> VideoRef {
    VideoRef {
        id: v.id.clone(),
        title: v.title.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::video_item;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, 30, 12, 0, 0).unwrap()
    }

    fn ids(refs: &[VideoRef]) -> Vec<&str> {
        refs.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn never_harvested_channel_needs_refresh() {
        assert!(channel_needs_refresh(None, now(), Duration::hours(12)));
    }

    #[test]
    fn channel_inside_cooldown_is_skipped() {
        let cooldown = Duration::hours(12);
        let last = now() - cooldown + Duration::seconds(1);
        assert!(!channel_needs_refresh(Some(last), now(), cooldown));
    }

    #[test]
    fn channel_at_or_past_cooldown_is_refreshed() {
        let cooldown = Duration::hours(12);
        assert!(channel_needs_refresh(Some(now() - cooldown), now(), cooldown));
        assert!(channel_needs_refresh(
            Some(now() - Duration::days(3)),
            now(),
            cooldown
        ));
    }

    #[test]
    fn cutoff_without_prior_snapshot_is_global_from() {
        let from = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            video_backfill_cutoff(false, now(), Duration::days(5), from),
            from
        );
    }

    #[test]
    fn cutoff_with_prior_snapshot_overlaps() {
        let from = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        // the snapshot's own age (e.g. 10 days) does not matter, only the overlap
        assert_eq!(
            video_backfill_cutoff(true, now(), Duration::days(5), from),
            now() - Duration::days(5)
        );
    }

    #[test]
    fn first_recommendation_refresh_takes_everything_newest_first() {
        let videos = vec![
            video_item("old", now() - Duration::days(90)),
            video_item("new", now() - Duration::days(1)),
            video_item("mid", now() - Duration::days(40)),
        ];

        let refs =
            videos_needing_recommendation_refresh(&videos, None, now(), Duration::days(30), 0);
        assert_eq!(ids(&refs), vec!["new", "mid", "old"]);
    }

    #[test]
    fn selects_new_since_snapshot_or_inside_window() {
        let prior = now() - Duration::days(50);
        let videos = vec![
            video_item("recent", now() - Duration::days(2)),
            video_item("since-snapshot", now() - Duration::days(45)),
            video_item("stale", now() - Duration::days(60)),
        ];

        let refs = videos_needing_recommendation_refresh(
            &videos,
            Some(prior),
            now(),
            Duration::days(30),
            0,
        );
        assert_eq!(ids(&refs), vec!["recent", "since-snapshot"]);
    }

    #[test]
    fn pads_up_to_minimum_with_newest_remaining() {
        let prior = now() - Duration::days(1);
        let videos = vec![
            video_item("a", now() - Duration::days(100)),
            video_item("b", now() - Duration::days(80)),
            video_item("c", now() - Duration::days(60)),
            video_item("d", now() - Duration::days(3)),
        ];

        let refs = videos_needing_recommendation_refresh(
            &videos,
            Some(prior),
            now(),
            Duration::days(30),
            3,
        );
        assert_eq!(ids(&refs), vec!["d", "c", "b"]);
    }

    #[test]
    fn floor_is_capped_by_available_videos() {
        let prior = now();
        let window = Duration::days(1);
        for total in 0..6 {
            let videos: Vec<_> = (0..total)
                .map(|i| video_item(&format!("v{i}"), now() - Duration::days(10 + i as i64)))
                .collect();
            for minimum in 0..8 {
                let refs =
                    videos_needing_recommendation_refresh(&videos, Some(prior), now(), window, minimum);
                assert_eq!(refs.len(), minimum.min(total), "total={total} min={minimum}");
            }
        }
    }
}
