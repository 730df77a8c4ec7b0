use crate::models::{AdminToken, UpdateType};
use crate::services::credential_pool::CredentialPool;
use crate::services::elasticsearch_service::{create_harvest_indices, EsMissingRecs, EsStoreFactory};
use crate::services::executor::{BackoffPolicy, QuotaAwareExecutor};
use crate::services::harvest::Harvester;
use crate::services::scraper::WebScraper;
use crate::services::seeds::CsvSeedChannels;
use crate::services::updater::DataUpdater;
use crate::services::youtube_api::{ApiClient, YouTubeDataApi};
use crate::utils::parse_datetime;
use crate::AppState;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use elasticsearch::{
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    Elasticsearch,
};
use env_logger::{Builder, Env};
use lazy_static::lazy_static;
use log::{error, info, warn};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::Request;
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

lazy_static! {
    pub static ref ADMIN_TOKEN: Option<String> = env::var("ADMIN_TOKEN").ok();
    pub static ref ELASTICSEARCH_URL: String =
        env::var("ELASTICSEARCH_URL").unwrap_or_else(|_| "http://localhost:9200".to_string());
    pub static ref HARVEST_SCHEDULE: String =
        env::var("HARVEST_SCHEDULE").unwrap_or_else(|_| "0 0 5 * * *".to_string());
}

pub fn init_logger() {
    Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting YouTube harvester...");
}

pub fn load_environment() {
    dotenv::dotenv().ok();
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(value) => match value.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Ignoring invalid value for {name}: {value}");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Windows that decide what a run refreshes.
#[derive(Debug, Clone)]
pub struct RefreshWindowConfig {
    /// A channel's videos are not refreshed again within this time.
    pub refresh_all_after: Duration,
    /// Stats are re-captured for videos uploaded within this window.
    pub refresh_videos_within: Duration,
    pub refresh_recs_within: Duration,
    pub refresh_recs_min: usize,
    /// Earliest upload collected for a channel without prior videos.
    pub from: DateTime<Utc>,
}

impl Default for RefreshWindowConfig {
    fn default() -> Self {
        RefreshWindowConfig {
            refresh_all_after: Duration::hours(23),
            refresh_videos_within: Duration::days(120),
            refresh_recs_within: Duration::days(30),
            refresh_recs_min: 5,
            from: Utc
                .with_ymd_and_hms(2019, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

impl RefreshWindowConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let from = env::var("HARVEST_FROM")
            .ok()
            .and_then(|v| parse_datetime(v.trim()))
            .unwrap_or(defaults.from);

        RefreshWindowConfig {
            refresh_all_after: Duration::hours(env_or("REFRESH_ALL_AFTER_HOURS", 23)),
            refresh_videos_within: Duration::days(env_or("REFRESH_VIDEOS_WITHIN_DAYS", 120)),
            refresh_recs_within: Duration::days(env_or("REFRESH_RECS_WITHIN_DAYS", 30)),
            refresh_recs_min: env_or("REFRESH_RECS_MIN", defaults.refresh_recs_min),
            from,
        }
    }
}

#[derive(Clone)]
pub struct HarvestConfig {
    pub api_keys: Vec<String>,
    pub seed_channels_path: PathBuf,
    /// Only these seed channels are harvested. Empty means all.
    pub limited_to_seed_channels: Vec<String>,
    pub parallel_channels: usize,
    pub default_parallel: usize,
    pub related_max_results: u32,
    pub caption_language: String,
    pub trending_dir: PathBuf,
    pub trending_excluded_categories: HashSet<String>,
    pub retry_base_delay: std::time::Duration,
    pub refresh: RefreshWindowConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        HarvestConfig {
            api_keys: Vec::new(),
            seed_channels_path: PathBuf::from("channels.csv"),
            limited_to_seed_channels: Vec::new(),
            parallel_channels: 4,
            default_parallel: 8,
            related_max_results: 20,
            caption_language: "en".to_string(),
            trending_dir: PathBuf::from("trending"),
            trending_excluded_categories: HashSet::new(),
            retry_base_delay: std::time::Duration::from_secs(1),
            refresh: RefreshWindowConfig::default(),
        }
    }
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut api_keys = env_list("YOUTUBE_API_KEYS");
        if api_keys.is_empty() {
            api_keys = env_list("YOUTUBE_API_KEY");
        }
        if api_keys.is_empty() {
            warn!("Neither YOUTUBE_API_KEYS nor YOUTUBE_API_KEY is set, every API call will fail");
        }

        HarvestConfig {
            api_keys,
            seed_channels_path: env::var("SEED_CHANNELS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.seed_channels_path),
            limited_to_seed_channels: env_list("LIMITED_TO_SEED_CHANNELS"),
            parallel_channels: env_or("PARALLEL_CHANNELS", defaults.parallel_channels),
            default_parallel: env_or("DEFAULT_PARALLEL", defaults.default_parallel),
            related_max_results: env_or("RELATED_MAX_RESULTS", defaults.related_max_results),
            caption_language: env::var("CAPTION_LANGUAGE").unwrap_or(defaults.caption_language),
            trending_dir: env::var("TRENDING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.trending_dir),
            trending_excluded_categories: env_list("TRENDING_EXCLUDED_CATEGORIES")
                .into_iter()
                .collect(),
            retry_base_delay: std::time::Duration::from_millis(env_or(
                "RETRY_BASE_DELAY_MS",
                1000,
            )),
            refresh: RefreshWindowConfig::from_env(),
        }
    }
}

pub fn create_elasticsearch_client() -> Result<Elasticsearch> {
    let es_url = &*ELASTICSEARCH_URL;
    info!("Connecting to Elasticsearch at: {es_url}");

    let transport =
        TransportBuilder::new(SingleNodeConnectionPool::new(es_url.parse()?)).build()?;

    Ok(Elasticsearch::new(transport))
}

pub fn create_api_client(config: &HarvestConfig) -> Arc<ApiClient> {
    let pool = Arc::new(CredentialPool::new(config.api_keys.clone()));
    let executor = QuotaAwareExecutor::new(
        pool,
        BackoffPolicy {
            base_delay: config.retry_base_delay,
            ..BackoffPolicy::default()
        },
    );
    Arc::new(ApiClient::new(
        Arc::new(YouTubeDataApi::new()),
        executor,
        config.related_max_results,
    ))
}

pub async fn create_harvester(es_client: &Elasticsearch) -> Result<Arc<Harvester>> {
    let config = HarvestConfig::from_env();

    create_harvest_indices(es_client).await;

    let api = create_api_client(&config);
    let scraper = Arc::new(WebScraper::new(api.clone())?);
    let updater = DataUpdater::new(
        api.clone(),
        scraper,
        Arc::new(EsStoreFactory::new(es_client.clone())),
        Arc::new(CsvSeedChannels::new(config.seed_channels_path.clone())),
        Arc::new(EsMissingRecs::new(es_client.clone())),
        &config,
    );

    Ok(Arc::new(Harvester::new(
        updater,
        config.trending_dir.clone(),
        config.trending_excluded_categories.clone(),
    )))
}

pub async fn setup_harvest_scheduler(harvester: Arc<Harvester>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let harvester_clone = harvester.clone();

    let harvest_job = Job::new_async(HARVEST_SCHEDULE.as_str(), move |_uuid, _l| {
        let harvester = harvester_clone.clone();
        Box::pin(async move {
            if !harvester.try_start(UpdateType::All) {
                info!("Skipping scheduled harvest, a run is already in progress.");
            }
        })
    })?;

    scheduler.add(harvest_job).await?;
    scheduler.start().await?;
    info!("Harvest scheduler started ({}).", *HARVEST_SCHEDULE);

    Ok(scheduler)
}

pub async fn create_app_state() -> Result<AppState> {
    let es_client = create_elasticsearch_client()?;
    let harvester = create_harvester(&es_client)
        .await
        .context("Failed to set up harvester")?;

    let scheduler = setup_harvest_scheduler(harvester.clone()).await?;

    Ok(AppState {
        harvester,
        scheduler: Mutex::new(scheduler),
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminToken {
    type Error = &'static str;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(expected) = ADMIN_TOKEN.as_deref() else {
            error!("ADMIN_TOKEN is not set, rejecting admin request");
            return Outcome::Error((Status::Unauthorized, "Admin access disabled"));
        };

        let token = request
            .headers()
            .get_one("Authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "));

        match token {
            Some(t) => {
                if t == expected {
                    Outcome::Success(AdminToken(t.to_string()))
                } else {
                    Outcome::Error((Status::Unauthorized, "Invalid token"))
                }
            }
            None => Outcome::Error((Status::Unauthorized, "Missing token")),
        }
    }
}
