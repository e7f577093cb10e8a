//! Bulk Loader Adapter.
//!
//! Feeds CSV exports of listeners, tracks and plays through the same
//! operations the interactive surface uses, one row at a time and in file
//! order. Bad rows are skipped with a warning; they never abort the import.

use crate::listening::{
    AggregateMaintainer, Listener, ListeningError, Minutes, PlayEvent, Track,
};
use crate::server::metrics;
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Cannot read import file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed CSV input: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing required column {0}")]
    MissingColumn(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ImportKind {
    Listeners,
    Tracks,
    Plays,
}

impl ImportKind {
    fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Listeners => "listener",
            ImportKind::Tracks => "track",
            ImportKind::Plays => "play",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ImportReport {
    fn tally(&mut self, kind: ImportKind, line: u64, result: Result<(), ListeningError>) {
        match result {
            Ok(()) => {
                self.imported += 1;
                metrics::record_imported_row(kind.as_str(), "imported");
            }
            Err(e @ (ListeningError::Validation { .. } | ListeningError::NotFound { .. })) => {
                warn!("Skipping {} row at line {}: {}", kind.as_str(), line, e);
                self.skipped += 1;
                metrics::record_imported_row(kind.as_str(), "skipped");
            }
            Err(e) => {
                error!("Failed to import {} row at line {}: {}", kind.as_str(), line, e);
                self.failed += 1;
                metrics::record_imported_row(kind.as_str(), "failed");
            }
        }
    }
}

const LISTENER_COLUMNS: [&str; 3] = ["listener_id", "name", "city"];
const TRACK_COLUMNS: [&str; 5] = ["track_id", "artist", "title", "genre", "duration"];
const PLAY_COLUMNS: [&str; 3] = ["listener_id", "track_id", "date"];
const PLAY_MINUTES_COLUMN: &str = "minutes";

/// Positions of the named columns in the header row.
struct HeaderIndex {
    headers: StringRecord,
}

impl HeaderIndex {
    fn position(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    }

    fn require<const N: usize>(&self, names: [&'static str; N]) -> Result<[usize; N], ImportError> {
        let mut positions = [0; N];
        for (slot, name) in positions.iter_mut().zip(names) {
            *slot = self.position(name).ok_or(ImportError::MissingColumn(name))?;
        }
        Ok(positions)
    }
}

fn field<'r>(
    record: &'r StringRecord,
    index: usize,
    name: &'static str,
) -> Result<&'r str, ListeningError> {
    match record.get(index).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ListeningError::validation(name, "missing value")),
    }
}

fn uuid_field(record: &StringRecord, index: usize, name: &'static str) -> Result<Uuid, ListeningError> {
    let raw = field(record, index, name)?;
    Uuid::parse_str(raw).map_err(|e| ListeningError::validation(name, format!("{:?}: {}", raw, e)))
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

pub struct BulkImporter {
    maintainer: AggregateMaintainer,
}

impl BulkImporter {
    pub fn new(maintainer: AggregateMaintainer) -> Self {
        Self { maintainer }
    }

    pub fn maintainer(&self) -> &AggregateMaintainer {
        &self.maintainer
    }

    pub async fn import_path(&self, kind: ImportKind, path: &Path) -> Result<ImportReport, ImportError> {
        info!("Importing {}s from {}", kind.as_str(), path.display());
        let file = std::fs::File::open(path)?;
        self.import(kind, file).await
    }

    pub async fn import<R: Read>(&self, kind: ImportKind, reader: R) -> Result<ImportReport, ImportError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);
        let index = HeaderIndex {
            headers: reader.headers()?.clone(),
        };

        let mut report = ImportReport::default();
        match kind {
            ImportKind::Listeners => {
                let columns = index.require(LISTENER_COLUMNS)?;
                for record in reader.records() {
                    let Some(record) = readable(record, kind, &mut report) else {
                        continue;
                    };
                    let result = self.import_listener(&record, columns).await;
                    report.tally(kind, line_of(&record), result);
                }
            }
            ImportKind::Tracks => {
                let columns = index.require(TRACK_COLUMNS)?;
                for record in reader.records() {
                    let Some(record) = readable(record, kind, &mut report) else {
                        continue;
                    };
                    let result = self.import_track(&record, columns).await;
                    report.tally(kind, line_of(&record), result);
                }
            }
            ImportKind::Plays => {
                let columns = index.require(PLAY_COLUMNS)?;
                let minutes_column = index.position(PLAY_MINUTES_COLUMN);
                for record in reader.records() {
                    let Some(record) = readable(record, kind, &mut report) else {
                        continue;
                    };
                    let result = self.import_play(&record, columns, minutes_column).await;
                    report.tally(kind, line_of(&record), result);
                }
            }
        }

        info!(
            "Imported {} {}s, skipped {}, failed {}",
            report.imported,
            kind.as_str(),
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    async fn import_listener(
        &self,
        record: &StringRecord,
        [id, name, city]: [usize; 3],
    ) -> Result<(), ListeningError> {
        let listener = Listener {
            id: uuid_field(record, id, "listener_id")?,
            name: field(record, name, "name")?.to_string(),
            city: field(record, city, "city")?.to_string(),
        };
        self.maintainer.registry().insert_listener(listener).await?;
        Ok(())
    }

    async fn import_track(
        &self,
        record: &StringRecord,
        [id, artist, title, genre, duration]: [usize; 5],
    ) -> Result<(), ListeningError> {
        let track = Track {
            id: uuid_field(record, id, "track_id")?,
            artist: field(record, artist, "artist")?.to_string(),
            title: field(record, title, "title")?.to_string(),
            genre: field(record, genre, "genre")?.to_string(),
            duration: Minutes::parse_positive("duration", field(record, duration, "duration")?)?,
        };
        self.maintainer.registry().insert_track(track).await?;
        Ok(())
    }

    async fn import_play(
        &self,
        record: &StringRecord,
        [listener_id, track_id, date]: [usize; 3],
        minutes_column: Option<usize>,
    ) -> Result<(), ListeningError> {
        let raw_date = field(record, date, "date")?;
        let date = NaiveDate::parse_from_str(raw_date, crate::wide_column::DATE_FORMAT)
            .map_err(|e| ListeningError::validation("date", format!("{:?}: {}", raw_date, e)))?;
        let mut event = PlayEvent::new(
            uuid_field(record, listener_id, "listener_id")?,
            uuid_field(record, track_id, "track_id")?,
        )
        .on(date);

        // An empty minutes cell means the whole track was played.
        if let Some(raw) = minutes_column
            .and_then(|index| record.get(index))
            .filter(|raw| !raw.trim().is_empty())
        {
            event = event.with_minutes(Minutes::parse_positive("minutes", raw)?);
        }

        self.maintainer.apply_play_event(event).await?;
        Ok(())
    }
}

/// Unreadable records (bad UTF-8 and the like) are skipped like invalid rows.
fn readable(
    record: Result<StringRecord, csv::Error>,
    kind: ImportKind,
    report: &mut ImportReport,
) -> Option<StringRecord> {
    match record {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Skipping unreadable {} row: {}", kind.as_str(), e);
            report.skipped += 1;
            metrics::record_imported_row(kind.as_str(), "skipped");
            None
        }
    }
}
