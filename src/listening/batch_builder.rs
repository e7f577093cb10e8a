//! Event Fan-out Batch Builder.
//!
//! Turns one play event plus the prior state of each dimension into the full
//! list of writes: daily upserts first, then running-total rotations, then
//! rank rotations. The result is submitted as a single batch.

use super::models::{DimensionTotal, Minutes, Subject, Track};
use super::rotation::RotatingRecord;
use super::schema::{
    LISTEN_DATE, MINUTES, TOTAL_MINUTES, TRACK_ARTIST, TRACK_GENRE, TRACK_ID, TRACK_TITLE,
};
use crate::server::metrics;
use crate::wide_column::{Batch, Mutation, StorageEngine, StorageError, Upsert, Value};
use chrono::NaiveDate;
use tracing::{debug, error};

/// What was stored for one subject before the event, as far as it could be read.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionSnapshot {
    pub subject: Subject,
    pub prior_daily: Option<Minutes>,
    pub prior_total: Option<Minutes>,
}

impl DimensionSnapshot {
    pub fn empty(subject: Subject) -> Self {
        Self {
            subject,
            prior_daily: None,
            prior_total: None,
        }
    }
}

pub struct FanoutBatchBuilder<'a> {
    track: &'a Track,
    date: NaiveDate,
    minutes: &'a Minutes,
    daily: Vec<Mutation>,
    running_totals: Vec<Mutation>,
    ranks: Vec<Mutation>,
    totals: Vec<DimensionTotal>,
}

impl<'a> FanoutBatchBuilder<'a> {
    pub fn new(track: &'a Track, date: NaiveDate, minutes: &'a Minutes) -> Self {
        Self {
            track,
            date,
            minutes,
            daily: Vec::new(),
            running_totals: Vec::new(),
            ranks: Vec::new(),
            totals: Vec::new(),
        }
    }

    /// Queues the writes for one subject and returns its new running total.
    pub fn add_dimension(&mut self, snapshot: &DimensionSnapshot) -> Minutes {
        let subject = &snapshot.subject;
        let dimension = subject.dimension();
        let zero = Minutes::zero();

        let new_daily = snapshot.prior_daily.as_ref().unwrap_or(&zero) + self.minutes;
        self.daily.push(
            Upsert::on(dimension.daily)
                .set(dimension.subject_column, subject.value())
                .set(LISTEN_DATE, self.date)
                .set(TRACK_ID, self.track.id)
                .set(MINUTES, &new_daily)
                .set(TRACK_TITLE, self.track.title.as_str())
                .set(TRACK_ARTIST, self.track.artist.as_str())
                .set(TRACK_GENRE, self.track.genre.as_str())
                .into(),
        );

        let new_total = snapshot.prior_total.as_ref().unwrap_or(&zero) + self.minutes;
        let old_total = snapshot.prior_total.as_ref().map(Value::from);
        for (table, queue) in [
            (dimension.running_total, &mut self.running_totals),
            (dimension.rank, &mut self.ranks),
        ] {
            let record = RotatingRecord::new(table, TOTAL_MINUTES)
                .key(dimension.subject_column, subject.value())
                .key(TRACK_ID, self.track.id);
            queue.extend(record.rotate(old_total.clone(), Value::from(&new_total)));
        }

        self.totals.push(DimensionTotal {
            kind: subject.kind(),
            subject: subject.value().to_string(),
            total_minutes: new_total.clone(),
        });
        new_total
    }

    pub fn build(self) -> (Batch, Vec<DimensionTotal>) {
        let mut batch = Batch::new();
        batch.extend(self.daily);
        batch.extend(self.running_totals);
        batch.extend(self.ranks);
        (batch, self.totals)
    }
}

/// Submits the batch as one unit. On failure nothing of the event may be
/// assumed applied.
pub async fn submit(engine: &dyn StorageEngine, batch: Batch) -> Result<(), StorageError> {
    let size = batch.len();
    let partitions = batch.partition_groups().len();
    metrics::record_batch_size(size);
    debug!(
        "Submitting batch with {} mutations across {} partitions",
        size, partitions
    );
    engine.batch(batch).await.map_err(|e| {
        error!("Batch of {} mutations failed: {}", size, e);
        e
    })
}
