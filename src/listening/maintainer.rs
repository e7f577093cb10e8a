//! Aggregate Maintainer: applies play events to every per-subject view and
//! answers top-N questions from the rank tables.

use super::batch_builder::{self, DimensionSnapshot, FanoutBatchBuilder};
use super::error::ListeningError;
use super::models::{
    DailyListenRecord, PlayEvent, PlayOutcome, Subject, SubjectKind, TopTrack,
};
use super::registry::EntityRegistry;
use super::views::ListeningViews;
use crate::server::metrics;
use crate::wide_column::{StorageEngine, StorageError};
use chrono::{Local, NaiveDate};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_TOP_LIMIT: usize = 10;
pub const DEFAULT_DAILY_LIMIT: usize = 10;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone)]
pub struct MaintainerConfig {
    /// Upper bound for each read of a prior value. A read that takes longer
    /// is treated as finding nothing.
    pub read_timeout: Duration,
    /// Number of tracks returned by top-N queries that do not ask for a limit.
    pub top_limit: usize,
}

impl Default for MaintainerConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            top_limit: DEFAULT_TOP_LIMIT,
        }
    }
}

#[derive(Clone)]
pub struct AggregateMaintainer {
    engine: Arc<dyn StorageEngine>,
    registry: EntityRegistry,
    views: ListeningViews,
    config: MaintainerConfig,
}

impl AggregateMaintainer {
    pub fn new(engine: Arc<dyn StorageEngine>, config: MaintainerConfig) -> Self {
        Self {
            registry: EntityRegistry::new(engine.clone()),
            views: ListeningViews::new(engine.clone()),
            engine,
            config,
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn views(&self) -> &ListeningViews {
        &self.views
    }

    /// Reflects one play in the daily, running-total and rank views of the
    /// listener, the track's genre and the listener's city.
    ///
    /// Prior values are read before the single write batch. A prior read that
    /// fails counts as "no prior value" and is reported in
    /// [`PlayOutcome::degraded_reads`]; the batch itself failing fails the event.
    /// Concurrent events on the same subject and track may lose updates.
    pub async fn apply_play_event(&self, event: PlayEvent) -> Result<PlayOutcome, ListeningError> {
        let start = Instant::now();
        let result = self.apply(event).await;
        let status = match &result {
            Ok(_) => "applied",
            Err(ListeningError::NotFound { .. }) => "not_found",
            Err(ListeningError::Validation { .. }) => "invalid",
            Err(ListeningError::Storage(_)) => "failed",
        };
        metrics::record_play_event(status, start.elapsed());
        result
    }

    async fn apply(&self, event: PlayEvent) -> Result<PlayOutcome, ListeningError> {
        if let Some(minutes) = &event.minutes {
            minutes.require_positive("minutes")?;
        }

        let (listener, track) = tokio::try_join!(
            self.registry.find_listener(event.listener_id),
            self.registry.find_track(event.track_id)
        )?;
        let listener =
            listener.ok_or_else(|| ListeningError::not_found("listener", event.listener_id))?;
        let track = track.ok_or_else(|| ListeningError::not_found("track", event.track_id))?;

        let minutes = event.minutes.unwrap_or_else(|| track.duration.clone());
        let date = event.date.unwrap_or_else(|| Local::now().date_naive());

        let reads = Subject::all_for(&listener, &track)
            .into_iter()
            .map(|subject| self.snapshot(subject, date, track.id));
        let snapshots = join_all(reads).await;
        let degraded_reads = snapshots.iter().map(|(_, degraded)| degraded).sum();

        let mut builder = FanoutBatchBuilder::new(&track, date, &minutes);
        for (snapshot, _) in &snapshots {
            builder.add_dimension(snapshot);
        }
        let (batch, totals) = builder.build();
        batch_builder::submit(self.engine.as_ref(), batch).await?;

        info!(
            "Applied {} minutes of track {} by listener {} on {}",
            minutes, track.id, listener.id, date
        );
        Ok(PlayOutcome {
            listener_id: listener.id,
            track_id: track.id,
            date,
            minutes,
            totals,
            degraded_reads,
        })
    }

    /// Reads the prior daily minutes and running total of one subject.
    /// Returns the snapshot and how many of its reads degraded.
    async fn snapshot(
        &self,
        subject: Subject,
        date: NaiveDate,
        track_id: Uuid,
    ) -> (DimensionSnapshot, usize) {
        let dimension = subject.dimension();
        let (daily, total) = tokio::join!(
            self.read_prior(
                dimension.daily.name,
                &subject,
                track_id,
                self.views.daily_record(&subject, date, track_id)
            ),
            self.read_prior(
                dimension.running_total.name,
                &subject,
                track_id,
                self.views.running_total(&subject, track_id)
            )
        );
        let degraded = usize::from(daily.is_err()) + usize::from(total.is_err());
        let snapshot = DimensionSnapshot {
            prior_daily: daily.ok().flatten().map(|record| record.minutes),
            prior_total: total.ok().flatten().map(|total| total.total_minutes),
            subject,
        };
        debug!("Prior state: {:?}", snapshot);
        (snapshot, degraded)
    }

    /// Runs one prior-value read under the read timeout. An `Err` means the
    /// read degraded and has already been logged and counted.
    async fn read_prior<T, F>(
        &self,
        table: &'static str,
        subject: &Subject,
        track_id: Uuid,
        read: F,
    ) -> Result<Option<T>, StorageError>
    where
        F: Future<Output = Result<Option<T>, StorageError>>,
    {
        let result = match tokio::time::timeout(self.config.read_timeout, read).await {
            Ok(result) => result,
            Err(elapsed) => Err(elapsed.into()),
        };
        if let Err(e) = &result {
            warn!(
                "Reading prior value from {} for {} and track {} failed, assuming none. Totals may drift: {}",
                table, subject, track_id, e
            );
            metrics::record_degraded_read(table);
        }
        result
    }

    /// Highest-total tracks of a subject joined with their title and artist.
    pub async fn top_tracks_for(
        &self,
        kind: SubjectKind,
        value: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TopTrack>, ListeningError> {
        let subject = Subject::parse(kind, value)?;
        let limit = positive_limit(limit, self.config.top_limit)?;
        let entries = self.views.rank_entries(&subject, Some(limit)).await?;

        let lookups = entries
            .iter()
            .map(|entry| self.registry.find_track(entry.track_id));
        let tracks = join_all(lookups).await;

        entries
            .into_iter()
            .zip(tracks)
            .map(|(entry, track)| {
                let track = track?;
                Ok(TopTrack {
                    track_id: entry.track_id,
                    title: track.as_ref().map(|t| t.title.clone()),
                    artist: track.map(|t| t.artist),
                    total_minutes: entry.total_minutes,
                })
            })
            .collect()
    }

    /// Latest daily records of a subject, most recent day first.
    pub async fn recent_daily_listens(
        &self,
        kind: SubjectKind,
        value: &str,
        limit: Option<usize>,
    ) -> Result<Vec<DailyListenRecord>, ListeningError> {
        let subject = Subject::parse(kind, value)?;
        let limit = positive_limit(limit, DEFAULT_DAILY_LIMIT)?;
        Ok(self.views.recent_daily_records(&subject, limit).await?)
    }
}

fn positive_limit(limit: Option<usize>, default: usize) -> Result<usize, ListeningError> {
    match limit {
        None => Ok(default),
        Some(0) => Err(ListeningError::validation("limit", "must be at least 1")),
        Some(limit) => Ok(limit),
    }
}
