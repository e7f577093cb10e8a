use super::error::ListeningError;
use super::schema::{
    Dimension, ARTIST, CITY, CITY_DIMENSION, DURATION, GENRE, GENRE_DIMENSION, LISTENER_DIMENSION,
    LISTENER_ID, LISTEN_DATE, MINUTES, NAME, TITLE, TOTAL_MINUTES, TRACK_ARTIST, TRACK_GENRE,
    TRACK_ID, TRACK_TITLE,
};
use crate::wide_column::{FromRow, Row, StorageError, Value};
use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::ops::Add;
use std::str::FromStr;
use uuid::Uuid;

/// Most fractional digits an amount of minutes may carry.
pub const MAX_SCALE: i64 = 9;

/// Most digits an amount of minutes may carry once written out in full.
/// Rank order compares totals as doubles, so totals that only differ past
/// the 15th significant digit may tie and fall back to track order.
pub const MAX_DIGITS: u64 = 38;

/// An exact, non-floating amount of listening time in minutes.
///
/// Always held in canonical form so equal amounts compare and encode equally.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(into = "BigDecimal")]
pub struct Minutes(BigDecimal);

impl Minutes {
    /// Canonical form of an amount that is already within bounds.
    fn canonical(value: BigDecimal) -> Self {
        let normalized = value.normalized();
        let (_, scale) = normalized.as_bigint_and_exponent();
        if scale < 0 {
            Minutes(normalized.with_scale(0))
        } else {
            Minutes(normalized)
        }
    }

    /// Accepts amounts with at most [`MAX_SCALE`] fractional digits and
    /// [`MAX_DIGITS`] digits in total.
    pub fn bounded(field: &'static str, value: BigDecimal) -> Result<Self, ListeningError> {
        let normalized = value.normalized();
        let (_, scale) = normalized.as_bigint_and_exponent();
        if scale > MAX_SCALE {
            return Err(ListeningError::validation(
                field,
                format!("more than {} decimal places", MAX_SCALE),
            ));
        }
        let written_digits = normalized.digits().saturating_add((-scale).max(0) as u64);
        if written_digits > MAX_DIGITS {
            return Err(ListeningError::validation(
                field,
                format!("more than {} digits", MAX_DIGITS),
            ));
        }
        Ok(Self::canonical(normalized))
    }

    pub fn zero() -> Self {
        Minutes(BigDecimal::zero())
    }

    pub fn parse(field: &'static str, raw: &str) -> Result<Self, ListeningError> {
        let value = BigDecimal::from_str(raw.trim())
            .map_err(|e| ListeningError::validation(field, format!("{:?}: {}", raw, e)))?;
        Self::bounded(field, value)
    }

    /// Parses and additionally requires a strictly positive amount.
    pub fn parse_positive(field: &'static str, raw: &str) -> Result<Self, ListeningError> {
        let minutes = Self::parse(field, raw)?;
        minutes.require_positive(field)?;
        Ok(minutes)
    }

    pub fn require_positive(&self, field: &'static str) -> Result<(), ListeningError> {
        if self.is_positive() {
            Ok(())
        } else {
            Err(ListeningError::validation(
                field,
                format!("{} is not a positive amount of minutes", self),
            ))
        }
    }

    pub fn is_positive(&self) -> bool {
        self.0 > BigDecimal::zero()
    }
}

/// Accepts JSON numbers as well as decimal strings. Floats go through their
/// shortest textual form so `0.1` stays `0.1`.
impl<'de> Deserialize<'de> for Minutes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MinutesVisitor)
    }
}

struct MinutesVisitor;

impl<'de> Visitor<'de> for MinutesVisitor {
    type Value = Minutes;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an amount of minutes as a number or a decimal string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Minutes, E> {
        Minutes::parse("minutes", v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Minutes, E> {
        Minutes::bounded("minutes", BigDecimal::from(v)).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Minutes, E> {
        Minutes::bounded("minutes", BigDecimal::from(v)).map_err(E::custom)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Minutes, E> {
        if !v.is_finite() {
            return Err(E::custom(format!("{} is not a finite amount of minutes", v)));
        }
        Minutes::parse("minutes", &v.to_string()).map_err(E::custom)
    }
}

impl From<Minutes> for BigDecimal {
    fn from(value: Minutes) -> Self {
        value.0
    }
}

impl From<Minutes> for Value {
    fn from(value: Minutes) -> Self {
        Value::Decimal(value.0)
    }
}

impl From<&Minutes> for Value {
    fn from(value: &Minutes) -> Self {
        Value::Decimal(value.0.clone())
    }
}

impl Add for &Minutes {
    type Output = Minutes;

    fn add(self, rhs: &Minutes) -> Minutes {
        Minutes::canonical(&self.0 + &rhs.0)
    }
}

impl fmt::Display for Minutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn minutes_column(row: &Row, column: &'static str) -> Result<Minutes, StorageError> {
    row.decimal(column).map(Minutes::canonical)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub id: Uuid,
    pub name: String,
    pub city: String,
}

impl FromRow for Listener {
    fn from_row(row: &Row) -> Result<Self, StorageError> {
        Ok(Listener {
            id: row.uuid(LISTENER_ID)?,
            name: row.text(NAME)?,
            city: row.text(CITY)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub artist: String,
    pub title: String,
    pub genre: String,
    pub duration: Minutes,
}

impl FromRow for Track {
    fn from_row(row: &Row) -> Result<Self, StorageError> {
        Ok(Track {
            id: row.uuid(TRACK_ID)?,
            artist: row.text(ARTIST)?,
            title: row.text(TITLE)?,
            genre: row.text(GENRE)?,
            duration: minutes_column(row, DURATION)?,
        })
    }
}

/// One play of a track. Missing minutes mean the whole track, a missing date
/// means today.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayEvent {
    pub listener_id: Uuid,
    pub track_id: Uuid,
    #[serde(default)]
    pub minutes: Option<Minutes>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl PlayEvent {
    pub fn new(listener_id: Uuid, track_id: Uuid) -> Self {
        PlayEvent {
            listener_id,
            track_id,
            minutes: None,
            date: None,
        }
    }

    pub fn with_minutes(mut self, minutes: Minutes) -> Self {
        self.minutes = Some(minutes);
        self
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Listener,
    Genre,
    City,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Listener => "listener",
            SubjectKind::Genre => "genre",
            SubjectKind::City => "city",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectKind {
    type Err = ListeningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "listener" => Ok(SubjectKind::Listener),
            "genre" => Ok(SubjectKind::Genre),
            "city" => Ok(SubjectKind::City),
            other => Err(ListeningError::validation(
                "subject kind",
                format!("{:?} is not one of listener, genre, city", other),
            )),
        }
    }
}

/// A concrete aggregation subject: a listener, a genre or a city.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    Listener(Uuid),
    Genre(String),
    City(String),
}

impl Subject {
    pub fn parse(kind: SubjectKind, raw: &str) -> Result<Self, ListeningError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ListeningError::validation("subject", "must not be empty"));
        }
        match kind {
            SubjectKind::Listener => Uuid::parse_str(raw)
                .map(Subject::Listener)
                .map_err(|e| ListeningError::validation("listener id", e.to_string())),
            SubjectKind::Genre => Ok(Subject::Genre(raw.to_string())),
            SubjectKind::City => Ok(Subject::City(raw.to_string())),
        }
    }

    pub fn kind(&self) -> SubjectKind {
        match self {
            Subject::Listener(_) => SubjectKind::Listener,
            Subject::Genre(_) => SubjectKind::Genre,
            Subject::City(_) => SubjectKind::City,
        }
    }

    pub fn dimension(&self) -> &'static Dimension {
        match self {
            Subject::Listener(_) => &LISTENER_DIMENSION,
            Subject::Genre(_) => &GENRE_DIMENSION,
            Subject::City(_) => &CITY_DIMENSION,
        }
    }

    pub fn value(&self) -> Value {
        match self {
            Subject::Listener(id) => Value::Uuid(*id),
            Subject::Genre(genre) => Value::Text(genre.clone()),
            Subject::City(city) => Value::Text(city.clone()),
        }
    }

    /// The three subjects a play of `track` by `listener` contributes to.
    pub fn all_for(listener: &Listener, track: &Track) -> [Subject; 3] {
        [
            Subject::Listener(listener.id),
            Subject::Genre(track.genre.clone()),
            Subject::City(listener.city.clone()),
        ]
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Listener(id) => write!(f, "listener {}", id),
            Subject::Genre(genre) => write!(f, "genre {}", genre),
            Subject::City(city) => write!(f, "city {}", city),
        }
    }
}

/// Minutes a subject listened to one track on one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyListenRecord {
    pub listen_date: NaiveDate,
    pub track_id: Uuid,
    pub minutes: Minutes,
    pub track_title: String,
    pub track_artist: String,
    pub track_genre: String,
}

impl FromRow for DailyListenRecord {
    fn from_row(row: &Row) -> Result<Self, StorageError> {
        Ok(DailyListenRecord {
            listen_date: row.date(LISTEN_DATE)?,
            track_id: row.uuid(TRACK_ID)?,
            minutes: minutes_column(row, MINUTES)?,
            track_title: row.text(TRACK_TITLE)?,
            track_artist: row.text(TRACK_ARTIST)?,
            track_genre: row.text(TRACK_GENRE)?,
        })
    }
}

/// Lifetime minutes of one track for one subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningTotal {
    pub track_id: Uuid,
    pub total_minutes: Minutes,
}

impl FromRow for RunningTotal {
    fn from_row(row: &Row) -> Result<Self, StorageError> {
        Ok(RunningTotal {
            track_id: row.uuid(TRACK_ID)?,
            total_minutes: minutes_column(row, TOTAL_MINUTES)?,
        })
    }
}

/// A row of a rank table. Mirrors a [`RunningTotal`] but is keyed by it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankEntry {
    pub track_id: Uuid,
    pub total_minutes: Minutes,
}

impl FromRow for RankEntry {
    fn from_row(row: &Row) -> Result<Self, StorageError> {
        Ok(RankEntry {
            track_id: row.uuid(TRACK_ID)?,
            total_minutes: minutes_column(row, TOTAL_MINUTES)?,
        })
    }
}

/// A rank entry joined with its track. Title and artist are `None` when the
/// track cannot be resolved anymore.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopTrack {
    pub track_id: Uuid,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub total_minutes: Minutes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionTotal {
    pub kind: SubjectKind,
    pub subject: String,
    pub total_minutes: Minutes,
}

/// What applying a play event did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayOutcome {
    pub listener_id: Uuid,
    pub track_id: Uuid,
    pub date: NaiveDate,
    pub minutes: Minutes,
    pub totals: Vec<DimensionTotal>,
    /// Prior-value reads that failed and were taken as absent.
    pub degraded_reads: usize,
}

impl PlayOutcome {
    pub fn total_for(&self, kind: SubjectKind) -> Option<&Minutes> {
        self.totals
            .iter()
            .find(|t| t.kind == kind)
            .map(|t| &t.total_minutes)
    }
}
