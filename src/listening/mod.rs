//! Listening statistics kept as denormalized per-subject views.

pub mod batch_builder;
mod error;
pub mod maintainer;
pub mod models;
mod provisioner;
mod registry;
pub mod rotation;
pub mod schema;
mod views;

pub use error::ListeningError;
pub use maintainer::{AggregateMaintainer, MaintainerConfig};
pub use models::{
    DailyListenRecord, DimensionTotal, Listener, Minutes, PlayEvent, PlayOutcome, RankEntry,
    RunningTotal, Subject, SubjectKind, TopTrack, Track,
};
pub use provisioner::SchemaProvisioner;
pub use registry::EntityRegistry;
pub use views::ListeningViews;
