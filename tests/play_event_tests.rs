//! Tests for applying play events across every per-subject view
//!
//! Covers accumulation, agreement between running totals and ranks,
//! and how failed reads and failed batches show up in the stored state.

mod common;

use chrono::NaiveDate;
use common::{maintainer, maintainer_with, minutes, provisioned_engine, FaultyEngine, RecordingEngine};
use listening_views::listening::schema::{
    DAILY_LISTENS_BY_CITY, LISTENER_TRACK_MINUTES, TRACKS_BY_ID,
};
use listening_views::listening::{
    AggregateMaintainer, ListeningError, Minutes, PlayEvent, Subject, SubjectKind,
};
use listening_views::{open_storage, MaintainerConfig};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

/// Running totals and rank entries of a subject as comparable sets.
async fn totals_and_ranks(
    maintainer: &AggregateMaintainer,
    subject: &Subject,
) -> (BTreeSet<(Uuid, String)>, BTreeSet<(Uuid, String)>) {
    let views = maintainer.views();
    let totals = views
        .running_totals(subject)
        .await
        .unwrap()
        .into_iter()
        .map(|t| (t.track_id, t.total_minutes.to_string()))
        .collect();
    let ranks = views
        .rank_entries(subject, None)
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.track_id, r.total_minutes.to_string()))
        .collect();
    (totals, ranks)
}

#[tokio::test]
async fn test_city_total_is_sum_of_its_listeners() {
    let maintainer = maintainer().await;
    let registry = maintainer.registry();
    let ana = registry.register_listener("Ana", "Lima").await.unwrap();
    let bruno = registry.register_listener("Bruno", "Lima").await.unwrap();
    let track = registry
        .register_track("Soda Stereo", "De Musica Ligera", "rock", minutes("3.5"))
        .await
        .unwrap();

    let plays = [(ana, "1.25"), (bruno, "2"), (ana, "0.75"), (bruno, "4.5")];
    for (listener, played) in plays {
        maintainer
            .apply_play_event(PlayEvent::new(listener, track).with_minutes(minutes(played)).on(day(1)))
            .await
            .unwrap();
    }

    let expected = [
        (Subject::Listener(ana), "2"),
        (Subject::Listener(bruno), "6.5"),
        (Subject::City("Lima".to_string()), "8.5"),
        (Subject::Genre("rock".to_string()), "8.5"),
    ];
    let views = maintainer.views();
    for (subject, total) in expected {
        let stored = views.running_total(&subject, track).await.unwrap().unwrap();
        assert_eq!(stored.total_minutes, minutes(total), "{}", subject);
    }

    let city_daily = views
        .daily_record(&Subject::City("Lima".to_string()), day(1), track)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(city_daily.minutes, minutes("8.5"));
}

#[tokio::test]
async fn test_ranks_mirror_running_totals() {
    let maintainer = maintainer().await;
    let registry = maintainer.registry();
    let listener = registry.register_listener("Ana", "Quito").await.unwrap();
    let mut tracks = Vec::new();
    for title in ["A", "B", "C"] {
        tracks.push(
            registry
                .register_track("Artist", title, "cumbia", minutes("3"))
                .await
                .unwrap(),
        );
    }

    // Repeated plays rotate rank rows several times.
    for (i, played) in ["1", "2.5", "0.5", "4", "1", "2"].iter().enumerate() {
        let track = tracks[i % tracks.len()];
        maintainer
            .apply_play_event(PlayEvent::new(listener, track).with_minutes(minutes(played)))
            .await
            .unwrap();
    }

    let subjects = [
        Subject::Listener(listener),
        Subject::Genre("cumbia".to_string()),
        Subject::City("Quito".to_string()),
    ];
    for subject in &subjects {
        let (totals, ranks) = totals_and_ranks(&maintainer, subject).await;
        assert_eq!(totals.len(), 3, "{}", subject);
        assert_eq!(totals, ranks, "{}", subject);
    }

    let ranked = maintainer
        .views()
        .rank_entries(&Subject::Genre("cumbia".to_string()), None)
        .await
        .unwrap();
    let ordered: Vec<Minutes> = ranked.into_iter().map(|r| r.total_minutes).collect();
    assert_eq!(ordered, vec![minutes("5"), minutes("3.5"), minutes("2.5")]);
}

#[tokio::test]
async fn test_daily_records_accumulate_per_date() {
    let maintainer = maintainer().await;
    let registry = maintainer.registry();
    let listener = registry.register_listener("Ana", "Lima").await.unwrap();
    let track = registry
        .register_track("Artist", "T", "rock", minutes("3"))
        .await
        .unwrap();

    for (date, played) in [(day(1), "1"), (day(1), "2"), (day(2), "4")] {
        maintainer
            .apply_play_event(PlayEvent::new(listener, track).with_minutes(minutes(played)).on(date))
            .await
            .unwrap();
    }

    let subject = Subject::Listener(listener);
    let views = maintainer.views();
    let first = views.daily_record(&subject, day(1), track).await.unwrap().unwrap();
    let second = views.daily_record(&subject, day(2), track).await.unwrap().unwrap();
    assert_eq!(first.minutes, minutes("3"));
    assert_eq!(second.minutes, minutes("4"));
    assert_eq!(first.track_title, "T");
    assert_eq!(first.track_artist, "Artist");
    assert_eq!(first.track_genre, "rock");

    let total = views.running_total(&subject, track).await.unwrap().unwrap();
    assert_eq!(total.total_minutes, minutes("7"));
}

#[tokio::test]
async fn test_minutes_default_to_track_duration() {
    let maintainer = maintainer().await;
    let registry = maintainer.registry();
    let listener = registry.register_listener("Ana", "Lima").await.unwrap();
    let track = registry
        .register_track("Artist", "T", "rock", minutes("4.25"))
        .await
        .unwrap();

    let outcome = maintainer
        .apply_play_event(PlayEvent::new(listener, track))
        .await
        .unwrap();

    assert_eq!(outcome.minutes, minutes("4.25"));
    assert_eq!(outcome.totals.len(), 3);
    for kind in [SubjectKind::Listener, SubjectKind::Genre, SubjectKind::City] {
        assert_eq!(outcome.total_for(kind), Some(&minutes("4.25")));
    }
}

#[tokio::test]
async fn test_play_is_one_batch_and_rotates_ranks() {
    let engine = RecordingEngine::wrap(provisioned_engine().await);
    let maintainer = maintainer_with(engine.clone());
    let registry = maintainer.registry();
    let listener = registry.register_listener("Ana", "Lima").await.unwrap();
    let track = registry
        .register_track("Artist", "T", "rock", minutes("3"))
        .await
        .unwrap();
    engine.reset();

    maintainer
        .apply_play_event(PlayEvent::new(listener, track))
        .await
        .unwrap();
    assert_eq!(engine.batches(), 1);
    assert_eq!(engine.mutations(), 9);
    assert_eq!(engine.deletes(), 0);

    engine.reset();
    maintainer
        .apply_play_event(PlayEvent::new(listener, track))
        .await
        .unwrap();
    assert_eq!(engine.batches(), 1);
    // Only the three rank rows move; running totals are overwritten in place.
    assert_eq!(engine.deletes(), 3);
    assert_eq!(engine.mutations(), 12);
}

#[tokio::test]
async fn test_unknown_listener_writes_nothing() {
    let engine = RecordingEngine::wrap(provisioned_engine().await);
    let maintainer = maintainer_with(engine.clone());
    let track = maintainer
        .registry()
        .register_track("Artist", "T", "rock", minutes("3"))
        .await
        .unwrap();
    engine.reset();

    let result = maintainer
        .apply_play_event(PlayEvent::new(Uuid::new_v4(), track))
        .await;

    assert!(matches!(
        result,
        Err(ListeningError::NotFound { kind: "listener", .. })
    ));
    assert_eq!(engine.batches(), 0);
    assert_eq!(engine.mutations(), 0);
}

#[tokio::test]
async fn test_negative_minutes_are_rejected_before_any_read() {
    let engine = RecordingEngine::wrap(provisioned_engine().await);
    let maintainer = maintainer_with(engine.clone());

    let result = maintainer
        .apply_play_event(PlayEvent::new(Uuid::new_v4(), Uuid::new_v4()).with_minutes(minutes("-1")))
        .await;

    assert!(matches!(result, Err(ListeningError::Validation { .. })));
    assert_eq!(engine.batches(), 0);
}

#[tokio::test]
async fn test_failed_total_read_restarts_total_and_orphans_rank() {
    let engine = FaultyEngine::wrap(provisioned_engine().await);
    let maintainer = maintainer_with(engine.clone());
    let registry = maintainer.registry();
    let listener = registry.register_listener("Ana", "Lima").await.unwrap();
    let track = registry
        .register_track("Artist", "T", "rock", minutes("3.5"))
        .await
        .unwrap();
    maintainer
        .apply_play_event(PlayEvent::new(listener, track).on(day(1)))
        .await
        .unwrap();

    engine.fail_reads_of(&LISTENER_TRACK_MINUTES);
    let outcome = maintainer
        .apply_play_event(PlayEvent::new(listener, track).with_minutes(minutes("2")).on(day(1)))
        .await
        .unwrap();
    engine.heal();

    assert_eq!(outcome.degraded_reads, 1);
    // The unreadable prior total counts as zero.
    assert_eq!(outcome.total_for(SubjectKind::Listener), Some(&minutes("2")));
    assert_eq!(outcome.total_for(SubjectKind::Genre), Some(&minutes("5.5")));

    let subject = Subject::Listener(listener);
    let views = maintainer.views();
    let total = views.running_total(&subject, track).await.unwrap().unwrap();
    assert_eq!(total.total_minutes, minutes("2"));

    // The rank row under the old total was never deleted.
    let ranks = views.rank_entries(&subject, None).await.unwrap();
    let totals: Vec<Minutes> = ranks.into_iter().map(|r| r.total_minutes).collect();
    assert_eq!(totals, vec![minutes("3.5"), minutes("2")]);

    // Daily minutes were read fine and still accumulate.
    let daily = views.daily_record(&subject, day(1), track).await.unwrap().unwrap();
    assert_eq!(daily.minutes, minutes("5.5"));
}

#[tokio::test]
async fn test_failed_daily_read_overwrites_daily_minutes() {
    let engine = FaultyEngine::wrap(provisioned_engine().await);
    let maintainer = maintainer_with(engine.clone());
    let registry = maintainer.registry();
    let listener = registry.register_listener("Ana", "Lima").await.unwrap();
    let track = registry
        .register_track("Artist", "T", "rock", minutes("3"))
        .await
        .unwrap();
    maintainer
        .apply_play_event(PlayEvent::new(listener, track).on(day(5)))
        .await
        .unwrap();

    engine.fail_reads_of(&DAILY_LISTENS_BY_CITY);
    let outcome = maintainer
        .apply_play_event(PlayEvent::new(listener, track).with_minutes(minutes("1")).on(day(5)))
        .await
        .unwrap();
    engine.heal();

    assert_eq!(outcome.degraded_reads, 1);
    let city = Subject::City("Lima".to_string());
    let daily = maintainer
        .views()
        .daily_record(&city, day(5), track)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(daily.minutes, minutes("1"));
    assert_eq!(outcome.total_for(SubjectKind::City), Some(&minutes("4")));
}

#[tokio::test]
async fn test_stalled_read_times_out_as_degraded() {
    let engine = FaultyEngine::wrap(provisioned_engine().await);
    let maintainer = AggregateMaintainer::new(
        engine.clone(),
        MaintainerConfig {
            read_timeout: Duration::from_millis(50),
            ..Default::default()
        },
    );
    let registry = maintainer.registry();
    let listener = registry.register_listener("Ana", "Lima").await.unwrap();
    let track = registry
        .register_track("Artist", "T", "rock", minutes("3"))
        .await
        .unwrap();

    engine.stall_reads_of(&LISTENER_TRACK_MINUTES);
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        maintainer.apply_play_event(PlayEvent::new(listener, track)),
    )
    .await
    .expect("stalled read was not bounded")
    .unwrap();

    assert_eq!(outcome.degraded_reads, 1);
    assert_eq!(outcome.total_for(SubjectKind::Listener), Some(&minutes("3")));
}

#[tokio::test]
async fn test_failed_batch_leaves_no_trace() {
    let engine = FaultyEngine::wrap(provisioned_engine().await);
    let maintainer = maintainer_with(engine.clone());
    let registry = maintainer.registry();
    let listener = registry.register_listener("Ana", "Lima").await.unwrap();
    let track = registry
        .register_track("Artist", "T", "rock", minutes("3"))
        .await
        .unwrap();

    engine.fail_batches();
    let result = maintainer
        .apply_play_event(PlayEvent::new(listener, track))
        .await;
    engine.heal();

    assert!(matches!(result, Err(ListeningError::Storage(_))));
    for subject in [
        Subject::Listener(listener),
        Subject::Genre("rock".to_string()),
        Subject::City("Lima".to_string()),
    ] {
        let (totals, ranks) = totals_and_ranks(&maintainer, &subject).await;
        assert!(totals.is_empty());
        assert!(ranks.is_empty());
    }
}

#[tokio::test]
async fn test_failed_entity_read_fails_the_event() {
    let engine = FaultyEngine::wrap(provisioned_engine().await);
    let maintainer = maintainer_with(engine.clone());
    let listener = maintainer
        .registry()
        .register_listener("Ana", "Lima")
        .await
        .unwrap();
    engine.fail_reads_of(&TRACKS_BY_ID);

    let result = maintainer
        .apply_play_event(PlayEvent::new(listener, Uuid::new_v4()))
        .await;

    assert!(matches!(result, Err(ListeningError::Storage(_))));
}

#[tokio::test]
async fn test_top_tracks_of_genre_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    let engine = open_storage(Some(dir.path())).await.unwrap();
    let maintainer = maintainer_with(engine.clone());
    let registry = maintainer.registry();
    let listener = registry.register_listener("Ana", "Lima").await.unwrap();
    let track = registry
        .register_track("Artist", "T", "salsa", minutes("3"))
        .await
        .unwrap();
    maintainer
        .apply_play_event(PlayEvent::new(listener, track))
        .await
        .unwrap();
    engine.close().await.unwrap();

    let engine = open_storage(Some(dir.path())).await.unwrap();
    let maintainer = maintainer_with(engine);
    let top = maintainer
        .top_tracks_for(SubjectKind::Genre, "salsa", None)
        .await
        .unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].track_id, track);
    assert_eq!(top[0].title.as_deref(), Some("T"));

    let raw = maintainer
        .views()
        .rank_entries(&Subject::Genre("salsa".to_string()), None)
        .await
        .unwrap();
    assert_eq!(raw.len(), 1);
}
