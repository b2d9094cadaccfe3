//! Spatiotemporal matching over the store
//!
//! - `nearest_match`: best document for a `(timestamp, lat, lon)` point
//! - `build_training_set`: measures joined with their nearest conditions

mod nearest;
mod training;

pub use nearest::{nearest_match, MatchDiffs, NearMatch, QueryPoint, SearchWindow};
pub use training::{
    build_training_set, join_measure, ExtraSourceError, JoinError, TrainingExample, TrainingQuery,
};
