//! Typed reads over the per-subject views.

use super::models::{DailyListenRecord, RankEntry, RunningTotal, Subject};
use super::schema::{LISTEN_DATE, TRACK_ID};
use crate::wide_column::{FromRow, Select, StorageEngine, StorageError, TableSchema};
use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct ListeningViews {
    engine: Arc<dyn StorageEngine>,
}

impl ListeningViews {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    fn partition(subject: &Subject, table: &'static TableSchema) -> Select {
        Select::on(table).eq(subject.dimension().subject_column, subject.value())
    }

    async fn load<T: FromRow>(&self, select: Select) -> Result<Vec<T>, StorageError> {
        self.engine
            .execute(select.into())
            .await?
            .iter()
            .map(T::from_row)
            .collect()
    }

    pub async fn daily_record(
        &self,
        subject: &Subject,
        date: NaiveDate,
        track_id: Uuid,
    ) -> Result<Option<DailyListenRecord>, StorageError> {
        let select = Self::partition(subject, subject.dimension().daily)
            .eq(LISTEN_DATE, date)
            .eq(TRACK_ID, track_id)
            .limit(1);
        Ok(self.load(select).await?.into_iter().next())
    }

    /// Latest daily records of a subject, most recent day first.
    pub async fn recent_daily_records(
        &self,
        subject: &Subject,
        limit: usize,
    ) -> Result<Vec<DailyListenRecord>, StorageError> {
        self.load(Self::partition(subject, subject.dimension().daily).limit(limit))
            .await
    }

    pub async fn running_total(
        &self,
        subject: &Subject,
        track_id: Uuid,
    ) -> Result<Option<RunningTotal>, StorageError> {
        let select = Self::partition(subject, subject.dimension().running_total)
            .eq(TRACK_ID, track_id)
            .limit(1);
        Ok(self.load(select).await?.into_iter().next())
    }

    pub async fn running_totals(&self, subject: &Subject) -> Result<Vec<RunningTotal>, StorageError> {
        self.load(Self::partition(subject, subject.dimension().running_total))
            .await
    }

    /// Rank entries of a subject, highest total first.
    pub async fn rank_entries(
        &self,
        subject: &Subject,
        limit: Option<usize>,
    ) -> Result<Vec<RankEntry>, StorageError> {
        let mut select = Self::partition(subject, subject.dimension().rank);
        if let Some(limit) = limit {
            select = select.limit(limit);
        }
        self.load(select).await
    }
}
