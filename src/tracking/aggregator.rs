//! Per-website engagement snapshots
//!
//! A snapshot is rebuilt from scratch out of the sessions active right now and
//! written over the previous one. It can be requested on demand or produced for
//! every tracked website by a background task.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::TrackingResult;
use crate::models::{Session, WebsiteStats};
use crate::storage::Storage;
use crate::tracking::SessionTracker;

pub struct EngagementAggregator {
    tracker: Arc<SessionTracker>,
    storage: Arc<dyn Storage>,
    shutdown_tx: watch::Sender<bool>,
}

impl EngagementAggregator {
    pub fn new(tracker: Arc<SessionTracker>, storage: Arc<dyn Storage>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tracker,
            storage,
            shutdown_tx,
        }
    }

    /// Rebuild and store the snapshot for one website
    pub async fn compute_stats(&self, website_id: &str) -> TrackingResult<WebsiteStats> {
        let sessions = self.tracker.get_active_sessions(website_id);
        let stats = summarize(website_id, &sessions, Utc::now());

        self.storage.upsert_website_stats(&stats).await?;

        debug!(
            website_id = %website_id,
            active_users = stats.active_users,
            "computed website stats"
        );
        Ok(stats)
    }

    /// Last stored snapshot, without recomputing
    pub async fn latest_stats(&self, website_id: &str) -> TrackingResult<Option<WebsiteStats>> {
        Ok(self.storage.get_website_stats(website_id).await?)
    }

    /// Compute snapshots for every website the tracker knows about.
    ///
    /// A failing website is logged and skipped. Returns how many succeeded.
    pub async fn run_pass(&self) -> usize {
        let mut computed = 0;
        for website_id in self.tracker.website_ids() {
            match self.compute_stats(&website_id).await {
                Ok(_) => computed += 1,
                Err(e) => {
                    warn!(website_id = %website_id, error = %e, "failed to compute website stats");
                }
            }
        }
        computed
    }

    /// Start the scheduled aggregation task
    pub fn start(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let aggregator = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));

            // Skip the first tick which fires immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let computed = aggregator.run_pass().await;
                        if computed > 0 {
                            debug!(websites = computed, "aggregation pass complete");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Engagement aggregator shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Signal the scheduled task to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Fold a set of active sessions into a stats snapshot
pub fn summarize(website_id: &str, sessions: &[Session], now: DateTime<Utc>) -> WebsiteStats {
    let active_users = sessions.len() as u64;

    let reported: Vec<_> = sessions.iter().filter_map(|s| s.metrics).collect();
    let (avg_scroll_percentage, avg_time_on_page) = if reported.is_empty() {
        (0.0, 0.0)
    } else {
        let n = reported.len() as f64;
        let scroll: f64 = reported.iter().map(|m| m.scroll_percentage).sum();
        let time: f64 = reported.iter().map(|m| m.time_on_page).sum();
        (scroll / n, time / n)
    };
    let total_clicks: u64 = reported.iter().map(|m| m.click_count).sum();

    let mut users_by_country = BTreeMap::new();
    let mut users_by_city = BTreeMap::new();
    for location in sessions.iter().filter_map(|s| s.location.as_ref()) {
        if let Some(country) = &location.country {
            *users_by_country.entry(country.clone()).or_insert(0) += 1;
        }
        if let Some(city) = &location.city {
            *users_by_city.entry(city.clone()).or_insert(0) += 1;
        }
    }

    WebsiteStats {
        website_id: website_id.to_string(),
        active_users,
        avg_scroll_percentage,
        avg_time_on_page,
        total_clicks,
        users_by_country,
        users_by_city,
        updated_at: now,
    }
}
