//! The `listening_stats` keyspace.
//!
//! Two entity kinds are stored twice each (by id and by a lookup dimension).
//! Every subject kind then owns three views: a daily log, a running total per
//! track and a rank table clustered by that total.

use super::models::SubjectKind;
use crate::wide_column::{
    ClusteringColumn, ClusteringOrder, Column, ColumnType, Keyspace, TableSchema,
};

pub const KEYSPACE_NAME: &str = "listening_stats";

pub const LISTENER_ID: &str = "listener_id";
pub const TRACK_ID: &str = "track_id";
pub const NAME: &str = "name";
pub const CITY: &str = "city";
pub const ARTIST: &str = "artist";
pub const TITLE: &str = "title";
pub const GENRE: &str = "genre";
pub const DURATION: &str = "duration";
pub const LISTEN_DATE: &str = "listen_date";
pub const MINUTES: &str = "minutes";
pub const TRACK_TITLE: &str = "track_title";
pub const TRACK_ARTIST: &str = "track_artist";
pub const TRACK_GENRE: &str = "track_genre";
pub const TOTAL_MINUTES: &str = "total_minutes";

const fn column(name: &'static str, column_type: ColumnType) -> Column {
    Column { name, column_type }
}

const fn asc(name: &'static str) -> ClusteringColumn {
    ClusteringColumn {
        name,
        order: ClusteringOrder::Asc,
    }
}

const fn desc(name: &'static str) -> ClusteringColumn {
    ClusteringColumn {
        name,
        order: ClusteringOrder::Desc,
    }
}

pub const LISTENERS_BY_ID: TableSchema = TableSchema {
    name: "listeners_by_id",
    columns: &[
        column(LISTENER_ID, ColumnType::Uuid),
        column(NAME, ColumnType::Text),
        column(CITY, ColumnType::Text),
    ],
    partition_key: &[LISTENER_ID],
    clustering: &[],
};

pub const LISTENERS_BY_CITY: TableSchema = TableSchema {
    name: "listeners_by_city",
    columns: &[
        column(CITY, ColumnType::Text),
        column(LISTENER_ID, ColumnType::Uuid),
        column(NAME, ColumnType::Text),
    ],
    partition_key: &[CITY],
    clustering: &[asc(LISTENER_ID)],
};

pub const TRACKS_BY_ID: TableSchema = TableSchema {
    name: "tracks_by_id",
    columns: &[
        column(TRACK_ID, ColumnType::Uuid),
        column(ARTIST, ColumnType::Text),
        column(TITLE, ColumnType::Text),
        column(GENRE, ColumnType::Text),
        column(DURATION, ColumnType::Decimal),
    ],
    partition_key: &[TRACK_ID],
    clustering: &[],
};

pub const TRACKS_BY_ARTIST: TableSchema = TableSchema {
    name: "tracks_by_artist",
    columns: &[
        column(ARTIST, ColumnType::Text),
        column(TITLE, ColumnType::Text),
        column(TRACK_ID, ColumnType::Uuid),
        column(GENRE, ColumnType::Text),
        column(DURATION, ColumnType::Decimal),
    ],
    partition_key: &[ARTIST],
    clustering: &[asc(TITLE), asc(TRACK_ID)],
};

macro_rules! daily_listens_table {
    ($name:expr, $subject:expr, $subject_type:expr) => {
        TableSchema {
            name: $name,
            columns: &[
                column($subject, $subject_type),
                column(LISTEN_DATE, ColumnType::Date),
                column(TRACK_ID, ColumnType::Uuid),
                column(MINUTES, ColumnType::Decimal),
                column(TRACK_TITLE, ColumnType::Text),
                column(TRACK_ARTIST, ColumnType::Text),
                column(TRACK_GENRE, ColumnType::Text),
            ],
            partition_key: &[$subject],
            clustering: &[desc(LISTEN_DATE), asc(TRACK_ID)],
        }
    };
}

macro_rules! track_minutes_table {
    ($name:expr, $subject:expr, $subject_type:expr) => {
        TableSchema {
            name: $name,
            columns: &[
                column($subject, $subject_type),
                column(TRACK_ID, ColumnType::Uuid),
                column(TOTAL_MINUTES, ColumnType::Decimal),
            ],
            partition_key: &[$subject],
            clustering: &[asc(TRACK_ID)],
        }
    };
}

// total_minutes is part of the key here, so a changed total means a new row.
macro_rules! top_tracks_table {
    ($name:expr, $subject:expr, $subject_type:expr) => {
        TableSchema {
            name: $name,
            columns: &[
                column($subject, $subject_type),
                column(TOTAL_MINUTES, ColumnType::Decimal),
                column(TRACK_ID, ColumnType::Uuid),
            ],
            partition_key: &[$subject],
            clustering: &[desc(TOTAL_MINUTES), asc(TRACK_ID)],
        }
    };
}

pub const DAILY_LISTENS_BY_LISTENER: TableSchema =
    daily_listens_table!("daily_listens_by_listener", LISTENER_ID, ColumnType::Uuid);
pub const DAILY_LISTENS_BY_GENRE: TableSchema =
    daily_listens_table!("daily_listens_by_genre", GENRE, ColumnType::Text);
pub const DAILY_LISTENS_BY_CITY: TableSchema =
    daily_listens_table!("daily_listens_by_city", CITY, ColumnType::Text);

pub const LISTENER_TRACK_MINUTES: TableSchema =
    track_minutes_table!("listener_track_minutes", LISTENER_ID, ColumnType::Uuid);
pub const GENRE_TRACK_MINUTES: TableSchema =
    track_minutes_table!("genre_track_minutes", GENRE, ColumnType::Text);
pub const CITY_TRACK_MINUTES: TableSchema =
    track_minutes_table!("city_track_minutes", CITY, ColumnType::Text);

pub const TOP_TRACKS_BY_LISTENER: TableSchema =
    top_tracks_table!("top_tracks_by_listener", LISTENER_ID, ColumnType::Uuid);
pub const TOP_TRACKS_BY_GENRE: TableSchema =
    top_tracks_table!("top_tracks_by_genre", GENRE, ColumnType::Text);
pub const TOP_TRACKS_BY_CITY: TableSchema =
    top_tracks_table!("top_tracks_by_city", CITY, ColumnType::Text);

pub const KEYSPACE: Keyspace = Keyspace {
    name: KEYSPACE_NAME,
    version: 0,
    tables: &[
        &LISTENERS_BY_ID,
        &LISTENERS_BY_CITY,
        &TRACKS_BY_ID,
        &TRACKS_BY_ARTIST,
        &DAILY_LISTENS_BY_LISTENER,
        &DAILY_LISTENS_BY_GENRE,
        &DAILY_LISTENS_BY_CITY,
        &LISTENER_TRACK_MINUTES,
        &GENRE_TRACK_MINUTES,
        &CITY_TRACK_MINUTES,
        &TOP_TRACKS_BY_LISTENER,
        &TOP_TRACKS_BY_GENRE,
        &TOP_TRACKS_BY_CITY,
    ],
};

/// The three views owned by one subject kind, and the column holding the
/// subject in each of them.
#[derive(Debug)]
pub struct Dimension {
    pub kind: SubjectKind,
    pub subject_column: &'static str,
    pub daily: &'static TableSchema,
    pub running_total: &'static TableSchema,
    pub rank: &'static TableSchema,
}

pub const LISTENER_DIMENSION: Dimension = Dimension {
    kind: SubjectKind::Listener,
    subject_column: LISTENER_ID,
    daily: &DAILY_LISTENS_BY_LISTENER,
    running_total: &LISTENER_TRACK_MINUTES,
    rank: &TOP_TRACKS_BY_LISTENER,
};

pub const GENRE_DIMENSION: Dimension = Dimension {
    kind: SubjectKind::Genre,
    subject_column: GENRE,
    daily: &DAILY_LISTENS_BY_GENRE,
    running_total: &GENRE_TRACK_MINUTES,
    rank: &TOP_TRACKS_BY_GENRE,
};

pub const CITY_DIMENSION: Dimension = Dimension {
    kind: SubjectKind::City,
    subject_column: CITY,
    daily: &DAILY_LISTENS_BY_CITY,
    running_total: &CITY_TRACK_MINUTES,
    rank: &TOP_TRACKS_BY_CITY,
};

pub const DIMENSIONS: [&Dimension; 3] = [&LISTENER_DIMENSION, &GENRE_DIMENSION, &CITY_DIMENSION];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyspace_declares_every_view() {
        assert_eq!(KEYSPACE.tables.len(), 13);
        for table in KEYSPACE.tables {
            table.check_declaration().unwrap();
        }
        for dimension in DIMENSIONS {
            for table in [dimension.daily, dimension.running_total, dimension.rank] {
                assert!(table.is_partition_column(dimension.subject_column));
                assert!(KEYSPACE.tables.iter().any(|t| t.name == table.name));
            }
        }
    }

    #[test]
    fn rank_tables_embed_total_in_key() {
        for dimension in DIMENSIONS {
            assert!(dimension.rank.is_key_column(TOTAL_MINUTES));
            assert!(!dimension.running_total.is_key_column(TOTAL_MINUTES));
            assert_eq!(dimension.rank.clustering[0].order, ClusteringOrder::Desc);
            assert_eq!(dimension.daily.clustering[0].name, LISTEN_DATE);
            assert_eq!(dimension.daily.clustering[0].order, ClusteringOrder::Desc);
        }
    }
}
