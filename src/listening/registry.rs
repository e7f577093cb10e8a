//! Entity Registry: listeners and tracks, by id and by lookup dimension.

use super::error::ListeningError;
use super::models::{Listener, Minutes, Track};
use super::schema::{
    ARTIST, CITY, DURATION, GENRE, LISTENERS_BY_CITY, LISTENERS_BY_ID, LISTENER_ID, NAME, TITLE,
    TRACKS_BY_ARTIST, TRACKS_BY_ID, TRACK_ID,
};
use crate::wide_column::{Batch, Delete, FromRow, Select, StorageEngine, Upsert};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

fn non_empty(field: &'static str, value: &str) -> Result<String, ListeningError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ListeningError::validation(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

#[derive(Clone)]
pub struct EntityRegistry {
    engine: Arc<dyn StorageEngine>,
}

impl EntityRegistry {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    /// Creates a listener under a fresh id.
    pub async fn register_listener(&self, name: &str, city: &str) -> Result<Uuid, ListeningError> {
        let listener = Listener {
            id: Uuid::new_v4(),
            name: name.to_string(),
            city: city.to_string(),
        };
        self.insert_listener(listener).await
    }

    /// Writes a listener whose id is already known, e.g. from an import file.
    /// Writing the same id again overwrites it, and a changed city moves it
    /// out of the old city's lookup.
    pub async fn insert_listener(&self, listener: Listener) -> Result<Uuid, ListeningError> {
        let name = non_empty("name", &listener.name)?;
        let city = non_empty("city", &listener.city)?;

        let mut batch = Batch::new();
        if let Some(previous) = self.find_listener(listener.id).await? {
            if previous.city != city {
                debug!("Listener {} moves from {} to {}", listener.id, previous.city, city);
                batch.push(
                    Delete::on(&LISTENERS_BY_CITY)
                        .key(CITY, previous.city)
                        .key(LISTENER_ID, listener.id),
                );
            }
        }
        batch.push(
            Upsert::on(&LISTENERS_BY_ID)
                .set(LISTENER_ID, listener.id)
                .set(NAME, name.as_str())
                .set(CITY, city.as_str()),
        );
        batch.push(
            Upsert::on(&LISTENERS_BY_CITY)
                .set(CITY, city.as_str())
                .set(LISTENER_ID, listener.id)
                .set(NAME, name.as_str()),
        );
        self.engine.batch(batch).await?;

        info!("Registered listener {} ({}) in {}", listener.id, name, city);
        Ok(listener.id)
    }

    pub async fn register_track(
        &self,
        artist: &str,
        title: &str,
        genre: &str,
        duration: Minutes,
    ) -> Result<Uuid, ListeningError> {
        let track = Track {
            id: Uuid::new_v4(),
            artist: artist.to_string(),
            title: title.to_string(),
            genre: genre.to_string(),
            duration,
        };
        self.insert_track(track).await
    }

    /// Same overwrite rules as [`Self::insert_listener`], keyed on artist and title.
    pub async fn insert_track(&self, track: Track) -> Result<Uuid, ListeningError> {
        let artist = non_empty("artist", &track.artist)?;
        let title = non_empty("title", &track.title)?;
        let genre = non_empty("genre", &track.genre)?;
        track.duration.require_positive("duration")?;

        let mut batch = Batch::new();
        if let Some(previous) = self.find_track(track.id).await? {
            if previous.artist != artist || previous.title != title {
                batch.push(
                    Delete::on(&TRACKS_BY_ARTIST)
                        .key(ARTIST, previous.artist)
                        .key(TITLE, previous.title)
                        .key(TRACK_ID, track.id),
                );
            }
        }
        batch.push(
            Upsert::on(&TRACKS_BY_ID)
                .set(TRACK_ID, track.id)
                .set(ARTIST, artist.as_str())
                .set(TITLE, title.as_str())
                .set(GENRE, genre.as_str())
                .set(DURATION, &track.duration),
        );
        batch.push(
            Upsert::on(&TRACKS_BY_ARTIST)
                .set(ARTIST, artist.as_str())
                .set(TITLE, title.as_str())
                .set(TRACK_ID, track.id)
                .set(GENRE, genre.as_str())
                .set(DURATION, &track.duration),
        );
        self.engine.batch(batch).await?;

        info!("Registered track {} ({} - {})", track.id, artist, title);
        Ok(track.id)
    }

    pub async fn find_listener(&self, id: Uuid) -> Result<Option<Listener>, ListeningError> {
        debug!("Looking up listener {}", id);
        let rows = self
            .engine
            .execute(Select::on(&LISTENERS_BY_ID).eq(LISTENER_ID, id).limit(1).into())
            .await?;
        Ok(rows.first().map(Listener::from_row).transpose()?)
    }

    pub async fn find_track(&self, id: Uuid) -> Result<Option<Track>, ListeningError> {
        debug!("Looking up track {}", id);
        let rows = self
            .engine
            .execute(Select::on(&TRACKS_BY_ID).eq(TRACK_ID, id).limit(1).into())
            .await?;
        Ok(rows.first().map(Track::from_row).transpose()?)
    }

    pub async fn listeners_in_city(&self, city: &str) -> Result<Vec<Listener>, ListeningError> {
        let city = non_empty("city", city)?;
        self.load(Select::on(&LISTENERS_BY_CITY).eq(CITY, city)).await
    }

    /// Tracks of one artist, ordered by title.
    pub async fn tracks_by_artist(&self, artist: &str) -> Result<Vec<Track>, ListeningError> {
        let artist = non_empty("artist", artist)?;
        self.load(Select::on(&TRACKS_BY_ARTIST).eq(ARTIST, artist)).await
    }

    pub async fn list_listeners(&self) -> Result<Vec<Listener>, ListeningError> {
        self.load(Select::on(&LISTENERS_BY_ID)).await
    }

    pub async fn list_tracks(&self) -> Result<Vec<Track>, ListeningError> {
        self.load(Select::on(&TRACKS_BY_ID)).await
    }

    async fn load<T: FromRow>(&self, select: Select) -> Result<Vec<T>, ListeningError> {
        let rows = self.engine.execute(select.into()).await?;
        Ok(rows.iter().map(T::from_row).collect::<Result<Vec<_>, _>>()?)
    }
}
