use crate::models::SeedChannel;
use anyhow::{Context, Result};
use async_trait::async_trait;
use csv::ReaderBuilder;
use log::info;
use serde::Deserialize;
use std::path::PathBuf;

#[async_trait]
pub trait SeedChannelSource: Send + Sync {
    /// The curated channels to harvest, in list order.
    async fn channels(&self) -> Result<Vec<SeedChannel>>;
}

/// Seed channels kept in a CSV file. Tag columns hold `|`-separated values.
pub struct CsvSeedChannels {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct SeedRow {
    #[serde(alias = "Id")]
    id: String,
    #[serde(alias = "Title", default)]
    title: String,
    #[serde(alias = "MainChannelId", default)]
    main_channel_id: Option<String>,
    #[serde(alias = "Relevance", default)]
    relevance: Option<f64>,
    #[serde(alias = "LR", default)]
    lr: Option<String>,
    #[serde(alias = "HardTags", default)]
    hard_tags: Option<String>,
    #[serde(alias = "SoftTags", default)]
    soft_tags: Option<String>,
    #[serde(alias = "UserChannels", default)]
    user_channels: Option<String>,
    #[serde(alias = "StatusMessage", default)]
    status_message: Option<String>,
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl From<SeedRow> for SeedChannel {
    fn from(row: SeedRow) -> Self {
        SeedChannel {
            id: row.id.trim().to_string(),
            title: row.title.trim().to_string(),
            main_channel_id: non_empty(row.main_channel_id),
            relevance: row.relevance,
            lr: non_empty(row.lr),
            hard_tags: split_list(row.hard_tags),
            soft_tags: split_list(row.soft_tags),
            user_channels: split_list(row.user_channels),
            status_message: non_empty(row.status_message),
        }
    }
}

impl CsvSeedChannels {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvSeedChannels { path: path.into() }
    }

    fn read(&self) -> Result<Vec<SeedChannel>> {
        let mut reader = ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .from_path(&self.path)
            .with_context(|| format!("Failed to open seed channels {}", self.path.display()))?;

        let mut channels = Vec::new();
        for (idx, row) in reader.deserialize::<SeedRow>().enumerate() {
            let row = row.with_context(|| {
                format!("Invalid seed channel row {} in {}", idx + 2, self.path.display())
            })?;
            if row.id.trim().is_empty() {
                continue;
            }
            channels.push(SeedChannel::from(row));
        }
        Ok(channels)
    }
}

#[async_trait]
impl SeedChannelSource for CsvSeedChannels {
    async fn channels(&self) -> Result<Vec<SeedChannel>> {
        let channels = self.read()?;
        info!(
            "Loaded {} seed channels from {}",
            channels.len(),
            self.path.display()
        );
        Ok(channels)
    }
}
