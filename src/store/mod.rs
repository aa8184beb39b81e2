pub mod cache;
pub mod model;
pub mod reconciler;

pub use cache::{CachedSnapshot, JsonFileStore, SnapshotStore};
pub use model::{ModelSummary, ReadingFilter, TelemetryModel, TimeRange};
pub use reconciler::{ChannelAlert, ModelObserver, ModelUpdate, Reconciler};
