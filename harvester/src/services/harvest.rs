use crate::models::{RunSummary, UpdateType};
use crate::services::trending::save_trending_csv;
use crate::services::updater::DataUpdater;
use anyhow::Result;
use log::{error, info};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Entry point for runs. Scheduled, manual and CLI runs never overlap.
pub struct Harvester {
    updater: DataUpdater,
    trending_dir: PathBuf,
    trending_excluded_categories: HashSet<String>,
    run_lock: Arc<Mutex<()>>,
    last_run: RwLock<Option<RunSummary>>,
}

impl Harvester {
    pub fn new(
        updater: DataUpdater,
        trending_dir: PathBuf,
        trending_excluded_categories: HashSet<String>,
    ) -> Self {
        Harvester {
            updater,
            trending_dir,
            trending_excluded_categories,
            run_lock: Arc::new(Mutex::new(())),
            last_run: RwLock::new(None),
        }
    }

    /// Runs an update, waiting for any run in progress to finish first.
    pub async fn run(&self, update_type: UpdateType) -> Result<RunSummary> {
        let guard = self.run_lock.clone().lock_owned().await;
        self.run_locked(update_type, guard).await
    }

    /// Starts an update in the background. False if a run is already in progress.
    pub fn try_start(self: &Arc<Self>, update_type: UpdateType) -> bool {
        let Ok(guard) = self.run_lock.clone().try_lock_owned() else {
            return false;
        };

        let harvester = self.clone();
        tokio::spawn(async move {
            if let Err(e) = harvester.run_locked(update_type, guard).await {
                error!("{update_type:?} update failed: {e:#}");
            }
        });
        true
    }

    async fn run_locked(
        &self,
        update_type: UpdateType,
        _guard: OwnedMutexGuard<()>,
    ) -> Result<RunSummary> {
        let summary = self.updater.update_data(update_type).await?;
        *self.last_run.write().await = Some(summary.clone());
        Ok(summary)
    }

    pub async fn last_run(&self) -> Option<RunSummary> {
        self.last_run.read().await.clone()
    }

    pub fn credentials_available(&self) -> usize {
        self.updater.api().credentials_available()
    }

    pub async fn save_trending(&self) -> Result<PathBuf> {
        let path = save_trending_csv(
            self.updater.api(),
            &self.trending_dir,
            &self.trending_excluded_categories,
        )
        .await?;
        info!("Saved trending videos to {}", path.display());
        Ok(path)
    }
}
