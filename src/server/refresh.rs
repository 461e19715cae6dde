//! Background refresh of stale modules
//!
//! Every tick the least recently refreshed module is re-fetched at `latest`
//! on the default platform if it is older than the configured maximum age.
//! The fetch touches the module before retrieving it, so overlapping ticks
//! see it as fresh (or in flight) and never fetch it twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::fetch::Fetcher;
use crate::module::{LATEST, Module, Platform};
use crate::store::Repository;

#[derive(Debug)]
pub enum RefreshOutcome {
    /// Nothing stored yet
    Empty,
    /// The oldest module is younger than the maximum age
    Fresh,
    Refreshed(Module),
    /// Another fetch of the module is running or the fetcher is saturated
    Busy,
    Failed(Error),
}

/// Re-fetches the oldest module if it is stale.
pub async fn refresh_oldest(
    repo: &dyn Repository,
    fetcher: &Fetcher,
    platform: &Platform,
    max_age: Duration,
) -> RefreshOutcome {
    let (module_path, updated) = match repo.oldest() {
        Ok(Some(oldest)) => oldest,
        Ok(None) => return RefreshOutcome::Empty,
        Err(e) => return RefreshOutcome::Failed(e.into()),
    };

    let age = (Utc::now() - updated).to_std().unwrap_or_default();
    if age < max_age {
        return RefreshOutcome::Fresh;
    }

    debug!("Refreshing {} (last refreshed {})", module_path, updated);
    match fetcher.fetch(platform, &module_path, LATEST).await {
        Ok(module) => {
            info!("Refreshed {}@{}", module.path, module.version);
            RefreshOutcome::Refreshed(module)
        }
        Err(e) if e.is_retryable() => RefreshOutcome::Busy,
        Err(e) => {
            warn!("Failed to refresh {}: {}", module_path, e);
            RefreshOutcome::Failed(e)
        }
    }
}

/// Runs [`refresh_oldest`] every `every` until the runtime shuts down.
pub fn spawn_refresh_loop(
    repo: Arc<dyn Repository>,
    fetcher: Arc<Fetcher>,
    platform: Platform,
    every: Duration,
    max_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let RefreshOutcome::Failed(Error::Store(e)) =
                refresh_oldest(repo.as_ref(), &fetcher, &platform, max_age).await
            {
                error!("Refresh loop store error: {}", e);
            }
        }
    })
}
