use crate::models::VideoData;
use crate::services::youtube_api::ApiClient;
use crate::utils::{category_name, file_safe_timestamp};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const TRENDING_REGION: &str = "us";
const ENTERTAINMENT_CATEGORY: &str = "24";
const TRENDING_MAX: usize = 100;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TrendingRow<'a> {
    include: u8,
    id: &'a str,
    channel_title: &'a str,
    title: &'a str,
    category_name: &'a str,
    channel_id: &'a str,
}

/// Writes the current most popular US videos, then the most popular in
/// Entertainment, to a timestamped CSV in `dir`.
pub async fn save_trending_csv(
    api: &ApiClient,
    dir: &Path,
    excluded_categories: &HashSet<String>,
) -> Result<PathBuf> {
    let mut videos = api
        .trending(TRENDING_REGION, None, TRENDING_MAX, excluded_categories)
        .await
        .context("Failed to list trending videos")?;
    videos.extend(
        api.trending(
            TRENDING_REGION,
            Some(ENTERTAINMENT_CATEGORY),
            TRENDING_MAX,
            excluded_categories,
        )
        .await
        .context("Failed to list trending entertainment videos")?,
    );

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(format!("{} Trending.csv", file_safe_timestamp(Utc::now())));
    write_trending_csv(&path, &videos)?;
    Ok(path)
}

pub fn write_trending_csv(path: &Path, videos: &[VideoData]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    for video in videos {
        writer.serialize(TrendingRow {
            include: 0,
            id: &video.video_id,
            channel_title: &video.channel_title,
            title: &video.video_title,
            category_name: video.category_id.as_deref().map_or("", category_name),
            channel_id: &video.channel_id,
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{api_client, trending_video, FakeYouTubeApi};
    use std::sync::Arc;

    #[tokio::test]
    async fn writes_both_charts_without_excluded_categories() {
        let api = Arc::new(FakeYouTubeApi::default());
        api.set_trending_pages(vec![vec![
            trending_video("a", "25"),
            trending_video("b", "10"),
            trending_video("c", "24"),
        ]]);
        let client = api_client(api, &["k1"]);
        let dir = tempfile::tempdir().unwrap();
        let excluded: HashSet<String> = ["10".to_string()].into_iter().collect();

        let path = save_trending_csv(&client, &dir.path().join("trending"), &excluded)
            .await
            .unwrap();

        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with(" Trending.csv"));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["Include", "Id", "ChannelTitle", "Title", "CategoryName", "ChannelId"]
        );
        let ids: Vec<String> = reader
            .records()
            .map(|r| r.unwrap()[1].to_string())
            .collect();
        // the fake serves the same chart for both requests
        assert_eq!(ids, vec!["a", "c", "a", "c"]);
    }

    #[test]
    fn category_ids_are_written_as_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_trending_csv(&path, &[trending_video("x", "25")]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let row = contents.lines().nth(1).unwrap();
        assert!(row.starts_with("0,x,"));
        assert!(row.contains(category_name("25")));
    }
}
